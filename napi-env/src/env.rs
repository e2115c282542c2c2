//! Per-context engine state.
//!
//! An [`Env`] owns one host [`Heap`], the native memory native code runs against, and every table
//! that maps the integer ids native code holds onto host values. All boundary entry points in
//! [`abi`](crate::abi) operate on an `Env`.
//!
//! ## Native-visible state
//!
//! A 20-byte control block is allocated in native memory when the env is created:
//!
//! | offset | field |
//! |---|---|
//! | 0 | `error_message` (pointer to a NUL-terminated string) |
//! | 4 | `engine_reserved` |
//! | 8 | `engine_error_code` |
//! | 12 | `error_code` ([`Status`]) |
//! | 16 | pointer to the 12-byte instance data record `{ data, has_finalizer, hint }` |
//!
//! All fields are little-endian `u32`s.
//!
//! ## Rooting
//!
//! The heap may collect on any allocation. Everything the engine hands out an id for (handles,
//! strong references, pending deferreds, in-flight call records, the exception mailbox) holds a
//! persistent heap root for as long as the id is live.

use core::fmt;

use tracing::{debug, trace};

use crate::callback_info::{CallbackInfo, CallbackInfoId, CallbackInfoStore};
use crate::deferred::{DeferredId, DeferredStore};
use crate::finalizer::{FinalizeCallback, Finalizer, FinalizerQueue, PendingFinalizer};
use crate::handle_store::{HandleId, HandleStore};
use crate::heap::{ErrorKind, FunctionKind, HeapLimits, HostFn, PromiseState};
use crate::memory::NativeMemory;
use crate::pointer::{InternEntry, PointerInterner};
use crate::reference::{RefId, RefStore, ReferenceOwnership};
use crate::registry::EnvId;
use crate::scope::{ScopeId, ScopeKind, ScopeStore};
use crate::status::{ExtendedErrorInfo, Status};
use crate::try_catch::TryCatch;
use crate::{GcObject, Heap, NapiError, RootId, Value, VmError, WeakObject};

/// A native function callable from the host: `(env, info) -> napi_value`.
///
/// The returned raw handle id is the call's result; `0` means `undefined`.
pub type NativeCallback = fn(env: &mut Env, info: CallbackInfoId) -> u32;

const CONTROL_BLOCK_SIZE: u32 = 20;
const OFFSET_INSTANCE_DATA: u32 = 16;
const INSTANCE_DATA_SIZE: u32 = 12;

/// Node-API version reported by `napi_get_version`.
pub const NAPI_VERSION: u32 = 8;

/// Env configuration.
#[derive(Debug, Clone)]
pub struct EnvOptions {
  pub heap_limits: HeapLimits,
  /// Run queued finalizers at the end of every [`Env::collect_garbage`] instead of waiting for the
  /// next explicit drain.
  pub run_finalizers_after_gc: bool,
  pub napi_version: u32,
}

impl Default for EnvOptions {
  fn default() -> Self {
    Self {
      heap_limits: HeapLimits::default(),
      run_finalizers_after_gc: false,
      napi_version: NAPI_VERSION,
    }
  }
}

#[derive(Debug)]
struct InstanceData {
  data: u32,
  finalizer: Option<Finalizer>,
  block: u32,
}

/// One isolated execution context.
pub struct Env {
  id: Option<EnvId>,
  options: EnvOptions,
  heap: Heap,
  memory: Box<dyn NativeMemory>,
  control_block: u32,
  memory_buffer: GcObject,
  memory_buffer_root: RootId,
  module_object: Option<(Value, RootId)>,
  scopes: ScopeStore,
  handles: HandleStore,
  refs: RefStore,
  deferreds: DeferredStore,
  cb_infos: CallbackInfoStore,
  try_catch: TryCatch,
  interned: PointerInterner,
  finalizers: FinalizerQueue,
  instance_data: Option<InstanceData>,
  error_messages: [u32; Status::ALL.len()],
  observed_gc_runs: u64,
}

impl fmt::Debug for Env {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Env")
      .field("id", &self.id)
      .field("control_block", &self.control_block)
      .field("open_scopes", &self.scopes.open_count())
      .field("handles", &self.handles.len())
      .field("references", &self.refs.len())
      .field("in_flight_calls", &self.cb_infos.len())
      .finish_non_exhaustive()
  }
}

impl Env {
  /// Creates an env over `memory`. Fails only if the control block cannot be allocated.
  pub fn new(mut memory: Box<dyn NativeMemory>, options: EnvOptions) -> Result<Self, VmError> {
    let control_block = memory
      .malloc(CONTROL_BLOCK_SIZE)
      .ok_or(VmError::OutOfMemory)?;
    memory.write(control_block, &[0; CONTROL_BLOCK_SIZE as usize])?;

    let mut heap = Heap::new(options.heap_limits);
    let memory_buffer = heap.alloc_linear_memory_buffer(memory.size())?;
    let memory_buffer_root = heap.add_root(Value::Object(memory_buffer));

    let env = Self {
      id: None,
      options,
      heap,
      memory,
      control_block,
      memory_buffer,
      memory_buffer_root,
      module_object: None,
      scopes: ScopeStore::new()?,
      handles: HandleStore::new(),
      refs: RefStore::new(),
      deferreds: DeferredStore::new(),
      cb_infos: CallbackInfoStore::new(),
      try_catch: TryCatch::new(),
      interned: PointerInterner::new(),
      finalizers: FinalizerQueue::new(),
      instance_data: None,
      error_messages: [0; Status::ALL.len()],
      observed_gc_runs: 0,
    };
    debug!(target: "napi_env::env", control_block, "create env");
    Ok(env)
  }

  /// The registry id of this env, once it has been registered.
  pub fn id(&self) -> Option<EnvId> {
    self.id
  }

  pub(crate) fn set_id(&mut self, id: EnvId) {
    self.id = Some(id);
  }

  pub fn options(&self) -> &EnvOptions {
    &self.options
  }

  pub fn heap(&self) -> &Heap {
    &self.heap
  }

  pub fn heap_mut(&mut self) -> &mut Heap {
    &mut self.heap
  }

  pub fn memory(&self) -> &dyn NativeMemory {
    &*self.memory
  }

  pub fn memory_mut(&mut self) -> &mut dyn NativeMemory {
    &mut *self.memory
  }

  /// Native address of the control block.
  pub fn control_block(&self) -> u32 {
    self.control_block
  }

  /// The array buffer exposing native memory to the host.
  pub fn memory_buffer(&self) -> GcObject {
    self.memory_buffer
  }

  pub fn module_object(&self) -> Option<Value> {
    self.module_object.map(|(value, _)| value)
  }

  pub(crate) fn set_module_object(&mut self, value: Value) {
    if let Some((_, root)) = self.module_object.take() {
      self.heap.remove_root(root);
    }
    let root = self.heap.add_root(value);
    self.module_object = Some((value, root));
  }

  // Scopes and handles.

  pub fn open_scope(&mut self, kind: ScopeKind) -> Result<ScopeId, VmError> {
    self.scopes.open(kind)
  }

  /// Closes `scope`, destroying every handle it owns.
  pub fn close_scope(&mut self, scope: ScopeId) -> Result<(), NapiError> {
    for handle in self.scopes.close(scope)? {
      self.handles.remove(&mut self.heap, handle)?;
    }
    Ok(())
  }

  /// Promotes the value of `handle` out of the escapable `scope` into its parent.
  pub fn escape_handle(&mut self, scope: ScopeId, handle: HandleId) -> Result<HandleId, NapiError> {
    let value = self.handles.get(handle)?;
    let parent = self.scopes.begin_escape(scope)?;
    let escaped = self.handles.push(&mut self.heap, value, parent)?;
    self.scopes.attach(parent, escaped)?;
    Ok(escaped)
  }

  pub fn current_scope(&self) -> Option<ScopeId> {
    self.scopes.current()
  }

  pub fn root_scope(&self) -> ScopeId {
    self.scopes.root()
  }

  pub fn open_scope_count(&self) -> u32 {
    self.scopes.open_count()
  }

  pub fn scope_handles(&self, scope: ScopeId) -> Result<&[HandleId], VmError> {
    self.scopes.handles(scope)
  }

  pub fn scope_parent(&self, scope: ScopeId) -> Result<Option<ScopeId>, VmError> {
    self.scopes.parent(scope)
  }

  pub fn scope_child(&self, scope: ScopeId) -> Result<Option<ScopeId>, VmError> {
    self.scopes.child(scope)
  }

  /// Number of live handles across all scopes.
  pub fn handle_count(&self) -> usize {
    self.handles.len()
  }

  /// Returns the live handle for an object if there is one; otherwise creates a handle in the
  /// current scope. Primitives always get a fresh handle.
  pub fn ensure_handle_id(&mut self, value: Value) -> Result<HandleId, VmError> {
    if let Value::Object(obj) = value {
      if let Some(id) = self.handles.lookup_object(obj) {
        return Ok(id);
      }
    }
    self.add_to_current_scope(value)
  }

  pub fn add_to_current_scope(&mut self, value: Value) -> Result<HandleId, VmError> {
    let scope = self.scopes.current_or_root();
    let id = self.handles.push(&mut self.heap, value, scope)?;
    if let Err(err) = self.scopes.attach(scope, id) {
      let _ = self.handles.remove(&mut self.heap, id);
      return Err(err);
    }
    Ok(id)
  }

  pub fn handle_value(&self, id: HandleId) -> Result<Value, VmError> {
    self.handles.get(id)
  }

  pub fn handle_scope(&self, id: HandleId) -> Result<ScopeId, VmError> {
    self.handles.scope_of(id)
  }

  pub fn is_live_handle(&self, id: HandleId) -> bool {
    self.handles.contains(id)
  }

  // Last error.

  fn read_control(&self, offset: u32) -> u32 {
    self.memory.read_u32(self.control_block + offset).unwrap_or(0)
  }

  fn write_control(&mut self, offset: u32, value: u32) {
    let written = self.memory.write_u32(self.control_block + offset, value);
    debug_assert!(written.is_ok(), "control block is out of bounds");
  }

  pub fn clear_last_error(&mut self) -> Status {
    self.write_control(ExtendedErrorInfo::OFFSET_ERROR_MESSAGE, 0);
    self.write_control(ExtendedErrorInfo::OFFSET_ERROR_CODE, 0);
    self.write_control(ExtendedErrorInfo::OFFSET_ENGINE_ERROR_CODE, 0);
    self.write_control(ExtendedErrorInfo::OFFSET_ENGINE_RESERVED, 0);
    Status::Ok
  }

  pub fn set_last_error(&mut self, code: Status, engine_code: u32, engine_reserved: u32) -> Status {
    self.write_control(ExtendedErrorInfo::OFFSET_ERROR_CODE, code.code() as u32);
    self.write_control(ExtendedErrorInfo::OFFSET_ENGINE_ERROR_CODE, engine_code);
    self.write_control(ExtendedErrorInfo::OFFSET_ENGINE_RESERVED, engine_reserved);
    code
  }

  /// The last-error record as currently stored in native memory.
  pub fn last_error(&self) -> ExtendedErrorInfo {
    let code = self.read_control(ExtendedErrorInfo::OFFSET_ERROR_CODE) as i32;
    ExtendedErrorInfo {
      error_message: self.read_control(ExtendedErrorInfo::OFFSET_ERROR_MESSAGE),
      engine_reserved: self.read_control(ExtendedErrorInfo::OFFSET_ENGINE_RESERVED),
      engine_error_code: self.read_control(ExtendedErrorInfo::OFFSET_ENGINE_ERROR_CODE),
      error_code: Status::from_code(code).unwrap_or(Status::GenericFailure),
    }
  }

  /// Fills in the message pointer for the current code and returns a snapshot of the record.
  pub fn last_error_info(&mut self) -> ExtendedErrorInfo {
    let code = self.last_error().error_code;
    let message = self.error_message_ptr(code);
    if code.is_ok() {
      self.clear_last_error();
    }
    self.write_control(ExtendedErrorInfo::OFFSET_ERROR_MESSAGE, message);
    self.last_error()
  }

  /// Native address of the NUL-terminated message for `status`, interned on first use.
  fn error_message_ptr(&mut self, status: Status) -> u32 {
    let Some(message) = status.message() else {
      return 0;
    };
    let slot = &mut self.error_messages[status.code() as usize];
    if *slot == 0 {
      let len = message.len() as u32 + 1;
      if let Some(ptr) = self.memory.malloc(len) {
        let mut bytes = Vec::with_capacity(len as usize);
        bytes.extend_from_slice(message.as_bytes());
        bytes.push(0);
        if self.memory.write(ptr, &bytes).is_ok() {
          *slot = ptr;
        } else {
          self.memory.free(ptr);
        }
      }
    }
    *slot
  }

  /// `ok` if no exception is pending, otherwise records and returns `pending_exception`.
  pub fn get_return_status(&mut self) -> Status {
    if self.try_catch.has_caught() {
      self.set_last_error(Status::PendingException, 0, 0)
    } else {
      Status::Ok
    }
  }

  // Exceptions.

  pub fn is_exception_pending(&self) -> bool {
    self.try_catch.has_caught()
  }

  /// Puts `value` in the exception mailbox, replacing any pending exception.
  pub fn throw(&mut self, value: Value) {
    self.try_catch.set_error(&mut self.heap, value);
  }

  /// Empties the exception mailbox. The value is unrooted once returned.
  pub fn take_exception(&mut self) -> Option<Value> {
    self.try_catch.extract_exception(&mut self.heap)
  }

  /// Maps a host failure onto the error channels and returns the resulting status.
  pub(crate) fn capture(&mut self, err: VmError) -> Status {
    let value = match err {
      VmError::InvalidHandle => return self.set_last_error(Status::InvalidArg, 0, 0),
      VmError::OutOfMemory => return self.set_last_error(Status::GenericFailure, 0, 0),
      VmError::Throw(value) => value,
      VmError::TypeError(message) => {
        match self.heap.alloc_error_with_message(ErrorKind::TypeError, message) {
          Ok(obj) => Value::Object(obj),
          Err(_) => return self.set_last_error(Status::GenericFailure, 0, 0),
        }
      }
      VmError::RangeError(message) => {
        match self.heap.alloc_error_with_message(ErrorKind::RangeError, message) {
          Ok(obj) => Value::Object(obj),
          Err(_) => return self.set_last_error(Status::GenericFailure, 0, 0),
        }
      }
    };
    self.try_catch.set_error(&mut self.heap, value);
    self.set_last_error(Status::PendingException, 0, 0)
  }

  /// Records the outcome of an entry point and returns its status.
  pub(crate) fn finish(&mut self, result: Result<(), NapiError>) -> Status {
    self.observe_collections();
    match result {
      Ok(()) => self.clear_last_error(),
      Err(NapiError::Status(status)) => self.set_last_error(status, 0, 0),
      Err(NapiError::Vm(err)) => self.capture(err),
    }
  }

  /// Runs an entry point that does not call into host code.
  pub(crate) fn checked(&mut self, f: impl FnOnce(&mut Env) -> Result<(), NapiError>) -> Status {
    self.clear_last_error();
    let result = f(self);
    self.finish(result)
  }

  /// Runs an entry point that may call into host code. Refuses to run while an exception is
  /// pending.
  pub(crate) fn preamble(&mut self, f: impl FnOnce(&mut Env) -> Result<(), NapiError>) -> Status {
    if self.try_catch.has_caught() {
      return self.set_last_error(Status::PendingException, 0, 0);
    }
    self.checked(f)
  }

  // Calls.

  /// Runs native code. An exception left pending by `f` is taken out of the mailbox and returned as
  /// [`VmError::Throw`].
  pub fn call_into_module<T>(&mut self, f: impl FnOnce(&mut Env) -> T) -> Result<T, VmError> {
    self.clear_last_error();
    let result = f(self);
    match self.try_catch.extract_exception(&mut self.heap) {
      Some(value) => Err(VmError::Throw(value)),
      None => Ok(result),
    }
  }

  /// Calls a native function from the host side.
  ///
  /// The call runs in its own handle scope. With no scope open that is the root scope, so handles
  /// created outside any scope do not survive the call.
  pub fn invoke_native(
    &mut self,
    callback: NativeCallback,
    data: u32,
    this: Value,
    args: &[Value],
    new_target: Option<Value>,
  ) -> Result<Value, VmError> {
    let scope = self.open_scope(ScopeKind::Plain)?;
    let info = CallbackInfo {
      this,
      args: args.to_vec(),
      data,
      new_target,
    };
    let info = match self.cb_infos.push(&mut self.heap, info) {
      Ok(info) => info,
      Err(err) => {
        self.close_call_scope(scope);
        return Err(err);
      }
    };
    trace!(target: "napi_env::env", ?info, argc = args.len(), "invoke native");

    let result = match self.call_into_module(|env| callback(env, info)) {
      Ok(raw) => match HandleId::from_raw(raw) {
        Some(handle) => self.handle_value(handle),
        None => Ok(Value::Undefined),
      },
      Err(err) => Err(err),
    };

    self.cb_infos.remove(&mut self.heap, info)?;
    self.close_call_scope(scope);
    result
  }

  fn close_call_scope(&mut self, scope: ScopeId) {
    if let Err(err) = self.close_scope(scope) {
      debug!(target: "napi_env::env", ?scope, %err, "call scope was already closed");
    }
  }

  pub fn callback_info(&self, info: CallbackInfoId) -> Result<&CallbackInfo, VmError> {
    self.cb_infos.get(info)
  }

  /// Calls `func` with `this` and `args`.
  pub fn call_function(&mut self, this: Value, func: Value, args: &[Value]) -> Result<Value, VmError> {
    match self.heap.function_kind(func)? {
      FunctionKind::Host(f) => self.call_host(f, this, args),
      FunctionKind::Native { callback, data } => self.invoke_native(callback, data, this, args, None),
    }
  }

  /// Calls `ctor` as a constructor with a fresh ordinary object as `this`.
  pub fn construct(&mut self, ctor: Value, args: &[Value]) -> Result<Value, VmError> {
    let kind = self.heap.function_kind(ctor)?;
    let this = {
      let mut scope = self.heap.scope();
      scope.push_root(ctor);
      for arg in args {
        scope.push_root(*arg);
      }
      Value::Object(scope.heap_mut().alloc_object()?)
    };
    let result = match kind {
      FunctionKind::Host(f) => self.call_host(f, this, args)?,
      FunctionKind::Native { callback, data } => {
        self.invoke_native(callback, data, this, args, Some(ctor))?
      }
    };
    Ok(if result.is_object() { result } else { this })
  }

  fn call_host(&mut self, f: HostFn, this: Value, args: &[Value]) -> Result<Value, VmError> {
    let mut scope = self.heap.scope();
    scope.push_root(this);
    for arg in args {
      scope.push_root(*arg);
    }
    f(scope.heap_mut(), this, args)
  }

  // References.

  pub fn create_reference(
    &mut self,
    obj: GcObject,
    count: u32,
    finalize: Option<(FinalizeCallback, u32)>,
    ownership: ReferenceOwnership,
  ) -> Result<RefId, VmError> {
    self.refs.create(&mut self.heap, obj, count, finalize, ownership)
  }

  /// Deletes a reference, cancelling its finalizer if one is queued.
  pub fn delete_reference(&mut self, reference: RefId) -> Result<(), VmError> {
    self.refs.delete(&mut self.heap, reference)?;
    self.finalizers.cancel_reference(reference);
    Ok(())
  }

  pub fn reference_ref(&mut self, reference: RefId) -> Result<u32, VmError> {
    self.refs.ref_(&mut self.heap, reference)
  }

  pub fn reference_unref(&mut self, reference: RefId) -> Result<u32, NapiError> {
    self.refs.unref(&mut self.heap, reference)
  }

  pub fn reference_count(&self, reference: RefId) -> Result<u32, VmError> {
    self.refs.count(reference)
  }

  /// The referenced object, or `None` once it has been collected.
  pub fn reference_value(&self, reference: RefId) -> Result<Option<GcObject>, VmError> {
    self.refs.get(&self.heap, reference)
  }

  pub fn reference_count_live(&self) -> usize {
    self.refs.len()
  }

  /// Attaches a finalizer to `obj` through a weak reference. Without `keep_reference` the
  /// reference is owned by the runtime and deleted after the finalizer runs.
  pub fn add_finalizer(
    &mut self,
    obj: GcObject,
    finalizer: Finalizer,
    keep_reference: bool,
  ) -> Result<RefId, VmError> {
    let ownership = if keep_reference {
      ReferenceOwnership::Userland
    } else {
      ReferenceOwnership::Runtime
    };
    let reference = self.refs.create(&mut self.heap, obj, 0, None, ownership)?;
    self.refs.set_finalizer(reference, finalizer)?;
    Ok(reference)
  }

  // Promises.

  pub fn create_deferred(&mut self) -> Result<(DeferredId, GcObject), VmError> {
    self.deferreds.create(&mut self.heap)
  }

  pub fn settle_deferred(
    &mut self,
    deferred: DeferredId,
    state: PromiseState,
    value: Value,
  ) -> Result<(), NapiError> {
    self.deferreds.settle(&mut self.heap, deferred, state, value)
  }

  pub fn pending_deferreds(&self) -> usize {
    self.deferreds.len()
  }

  // Pointers.

  /// Native address of `buffer`'s contents. The linear memory buffer is at `0`; heap-owned buffers
  /// are mirrored into a native allocation that is refreshed on every call.
  pub fn get_array_buffer_pointer(&mut self, buffer: GcObject) -> Result<u32, VmError> {
    if self.heap.array_buffer_is_linear_memory(buffer)? {
      return Ok(0);
    }
    let key = WeakObject::of(buffer);
    let existing = self.interned.buffer(key);
    let Some(bytes) = self.heap.array_buffer_data(buffer)? else {
      return Ok(0);
    };
    let ptr = mirror(&mut *self.memory, existing, bytes)?;
    if existing.is_none() && ptr != 0 {
      self.interned.insert_buffer(
        key,
        InternEntry {
          ptr,
          len: bytes.len() as u32,
        },
      );
    }
    Ok(ptr)
  }

  /// Native address of `view`'s bytes. Views onto linear memory resolve to their byte offset;
  /// other views are mirrored like [`Env::get_array_buffer_pointer`].
  pub fn get_view_pointer(&mut self, view: GcObject) -> Result<u32, VmError> {
    let info = self.heap.typed_array_info(view)?;
    if self.heap.array_buffer_is_linear_memory(info.buffer)? {
      return Ok(info.byte_offset);
    }
    let key = WeakObject::of(view);
    let existing = self.interned.view(key);
    let Some(data) = self.heap.array_buffer_data(info.buffer)? else {
      return Ok(0);
    };
    let start = info.byte_offset as usize;
    let bytes = &data[start..start + info.byte_length as usize];
    let ptr = mirror(&mut *self.memory, existing, bytes)?;
    if existing.is_none() && ptr != 0 {
      self.interned.insert_view(
        key,
        InternEntry {
          ptr,
          len: info.byte_length,
        },
      );
    }
    Ok(ptr)
  }

  /// Number of buffers and views currently mirrored into native memory.
  pub fn interned_count(&self) -> usize {
    self.interned.len()
  }

  // Instance data.

  /// Replaces the instance data, finalizing the previous value first.
  pub fn set_instance_data(
    &mut self,
    data: u32,
    finalize: Option<(FinalizeCallback, u32)>,
  ) -> Result<(), VmError> {
    if let Some(old) = self.instance_data.take() {
      self.release_instance_data(old);
    }
    let block = self
      .memory
      .malloc(INSTANCE_DATA_SIZE)
      .ok_or(VmError::OutOfMemory)?;
    let hint = finalize.map_or(0, |(_, hint)| hint);
    self.memory.write_u32(block, data)?;
    self.memory.write_u32(block + 4, finalize.is_some() as u32)?;
    self.memory.write_u32(block + 8, hint)?;
    self.write_control(OFFSET_INSTANCE_DATA, block);
    self.instance_data = Some(InstanceData {
      data,
      finalizer: finalize.map(|(callback, hint)| Finalizer::new(callback, data, hint)),
      block,
    });
    Ok(())
  }

  /// The instance data pointer, `0` if none was set.
  pub fn instance_data(&self) -> u32 {
    self.instance_data.as_ref().map_or(0, |d| d.data)
  }

  fn release_instance_data(&mut self, old: InstanceData) {
    self.write_control(OFFSET_INSTANCE_DATA, 0);
    self.memory.free(old.block);
    if let Some(finalizer) = old.finalizer {
      trace!(target: "napi_env::env", data = old.data, "finalize instance data");
      finalizer.call(self);
    }
  }

  // Collection and finalization.

  /// Runs a host collection and queues the finalizers it makes due.
  pub fn collect_garbage(&mut self) {
    self.heap.collect_garbage();
    self.observe_collections();
    if self.options.run_finalizers_after_gc {
      self.drain_finalizers();
    }
  }

  /// Number of finalizers (and native frees) waiting for the next drain.
  pub fn pending_finalizers(&self) -> usize {
    self.finalizers.len()
  }

  /// Runs every queued finalizer, including ones queued while draining. Returns the number of
  /// finalize callbacks run.
  pub fn drain_finalizers(&mut self) -> usize {
    self.observe_collections();
    let mut ran = 0;
    while let Some(pending) = self.finalizers.pop() {
      match pending {
        PendingFinalizer::FreeMemory { ptr } => {
          trace!(target: "napi_env::finalizer", ptr, "free interned memory");
          self.memory.free(ptr);
        }
        PendingFinalizer::Reference {
          reference,
          finalizer,
        } => {
          let runtime_owned = matches!(
            self.refs.ownership(reference),
            Ok(ReferenceOwnership::Runtime)
          );
          trace!(target: "napi_env::finalizer", ?reference, ?finalizer, "run finalizer");
          finalizer.call(self);
          if runtime_owned {
            // The callback may already have deleted it.
            let _ = self.refs.delete(&mut self.heap, reference);
          }
          ran += 1;
        }
      }
    }
    ran
  }

  /// Turns the results of any collection since the last call into queued finalizers.
  fn observe_collections(&mut self) {
    let gc_runs = self.heap.gc_runs();
    if gc_runs == self.observed_gc_runs {
      return;
    }
    self.observed_gc_runs = gc_runs;

    let collected = self.refs.sweep(&self.heap);
    let freed = self.interned.sweep(&self.heap);
    trace!(
      target: "napi_env::finalizer",
      gc_runs,
      references = collected.len(),
      interned = freed.len(),
      "observe collection"
    );
    for c in collected {
      match c.finalizer {
        Some(finalizer) => self.finalizers.push(PendingFinalizer::Reference {
          reference: c.reference,
          finalizer,
        }),
        None if c.ownership == ReferenceOwnership::Runtime => {
          let _ = self.refs.delete(&mut self.heap, c.reference);
        }
        None => {}
      }
    }
    for ptr in freed {
      self.finalizers.push(PendingFinalizer::FreeMemory { ptr });
    }
  }

  /// Tears the env down, running outstanding finalizers and releasing all native memory it
  /// allocated.
  pub fn dispose(mut self) {
    debug!(target: "napi_env::env", id = ?self.id, "dispose env");
    self.drain_finalizers();

    self.deferreds.dispose(&mut self.heap);
    for finalizer in self.refs.dispose(&mut self.heap) {
      finalizer.call(&mut self);
    }
    self.drain_finalizers();

    // Runs while the scope chain still exists so handles it creates land in the root scope.
    if let Some(data) = self.instance_data.take() {
      self.release_instance_data(data);
    }
    self.drain_finalizers();

    for handle in self.scopes.dispose() {
      let _ = self.handles.remove(&mut self.heap, handle);
    }
    self.handles.dispose(&mut self.heap);
    self.cb_infos.dispose(&mut self.heap);
    if let Some(exception) = self.try_catch.extract_exception(&mut self.heap) {
      debug!(target: "napi_env::env", ?exception, "dropping pending exception at dispose");
    }

    for ptr in self.interned.dispose() {
      self.memory.free(ptr);
    }
    while let Some(pending) = self.finalizers.pop() {
      if let PendingFinalizer::FreeMemory { ptr } = pending {
        self.memory.free(ptr);
      }
    }
    for ptr in self.error_messages {
      self.memory.free(ptr);
    }
    if let Some((_, root)) = self.module_object.take() {
      self.heap.remove_root(root);
    }
    self.heap.remove_root(self.memory_buffer_root);
    self.memory.free(self.control_block);
  }
}

/// Copies `bytes` into native memory, reusing `existing` if present. Empty data is `NULL`.
fn mirror(
  memory: &mut dyn NativeMemory,
  existing: Option<InternEntry>,
  bytes: &[u8],
) -> Result<u32, VmError> {
  let ptr = match existing {
    Some(entry) => entry.ptr,
    None if bytes.is_empty() => return Ok(0),
    None => memory
      .malloc(bytes.len() as u32)
      .ok_or(VmError::OutOfMemory)?,
  };
  memory.write(ptr, bytes)?;
  Ok(ptr)
}
