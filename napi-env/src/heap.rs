//! The host object runtime.
//!
//! A small non-moving mark/sweep heap standing in for the garbage-collected runtime that owns every
//! managed value. The bridging engine never frees host values itself: it only adds and removes
//! roots ([`Heap::add_root`]) and observes collection through weak ids ([`WeakObject`]).
//!
//! [`WeakObject`]: crate::WeakObject

use core::fmt;

use tracing::debug;

use crate::env::NativeCallback;
use crate::gc::HeapId;
use crate::{GcObject, GcString, RootId, Value, VmError};

/// Heap configuration and memory limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapLimits {
  /// Hard memory limit for live heap allocations, in bytes.
  pub max_bytes: usize,
  /// When an allocation would cause `used_bytes` to exceed this threshold, the heap will trigger a
  /// GC cycle before attempting the allocation.
  pub gc_threshold: usize,
}

impl HeapLimits {
  /// Creates a new set of heap limits.
  pub fn new(max_bytes: usize, gc_threshold: usize) -> Self {
    Self {
      max_bytes,
      gc_threshold,
    }
  }
}

impl Default for HeapLimits {
  fn default() -> Self {
    Self::new(64 * 1024 * 1024, 32 * 1024 * 1024)
  }
}

/// The flavour of a host error object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
  Error,
  TypeError,
  RangeError,
}

impl ErrorKind {
  pub fn name(self) -> &'static str {
    match self {
      ErrorKind::Error => "Error",
      ErrorKind::TypeError => "TypeError",
      ErrorKind::RangeError => "RangeError",
    }
  }
}

/// A promise's settlement state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PromiseState {
  Pending,
  Fulfilled,
  Rejected,
}

/// Element type of a typed array view. Discriminants follow `napi_typedarray_type`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum TypedArrayType {
  Int8 = 0,
  Uint8 = 1,
  Uint8Clamped = 2,
  Int16 = 3,
  Uint16 = 4,
  Int32 = 5,
  Uint32 = 6,
  Float32 = 7,
  Float64 = 8,
}

impl TypedArrayType {
  pub fn from_code(code: i32) -> Option<Self> {
    Some(match code {
      0 => TypedArrayType::Int8,
      1 => TypedArrayType::Uint8,
      2 => TypedArrayType::Uint8Clamped,
      3 => TypedArrayType::Int16,
      4 => TypedArrayType::Uint16,
      5 => TypedArrayType::Int32,
      6 => TypedArrayType::Uint32,
      7 => TypedArrayType::Float32,
      8 => TypedArrayType::Float64,
      _ => return None,
    })
  }

  pub fn element_size(self) -> u32 {
    match self {
      TypedArrayType::Int8 | TypedArrayType::Uint8 | TypedArrayType::Uint8Clamped => 1,
      TypedArrayType::Int16 | TypedArrayType::Uint16 => 2,
      TypedArrayType::Int32 | TypedArrayType::Uint32 | TypedArrayType::Float32 => 4,
      TypedArrayType::Float64 => 8,
    }
  }
}

/// A host function implemented in Rust on the managed side.
///
/// The caller must treat `this` and `args` as rooted for the duration of the call.
pub type HostFn = fn(heap: &mut Heap, this: Value, args: &[Value]) -> Result<Value, VmError>;

/// How a function object is invoked.
#[derive(Clone, Copy)]
pub enum FunctionKind {
  /// Managed-side code; runs directly against the heap.
  Host(HostFn),
  /// Native-side code; must be dispatched through an [`Env`](crate::Env) so it gets a callback
  /// info record and a handle scope.
  Native { callback: NativeCallback, data: u32 },
}

impl fmt::Debug for FunctionKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FunctionKind::Host(_) => f.write_str("Host"),
      FunctionKind::Native { data, .. } => f.debug_struct("Native").field("data", data).finish(),
    }
  }
}

/// Byte storage of an array buffer.
#[derive(Debug)]
pub(crate) enum BufferBacking {
  Owned(Vec<u8>),
  /// A window onto the env's native linear memory, starting at address 0.
  LinearMemory { byte_length: u32 },
}

/// Describes a typed array view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TypedArrayInfo {
  pub kind: TypedArrayType,
  /// Number of elements.
  pub length: u32,
  pub buffer: GcObject,
  pub byte_offset: u32,
  pub byte_length: u32,
}

/// A non-moving mark/sweep GC heap.
///
/// The heap stores objects in a `Vec` of slots. GC ids store the slot `index` and a per-slot
/// `generation`, which makes ids stable across `Vec` reallocations and allows detection of stale
/// ids when slots are reused.
pub struct Heap {
  limits: HeapLimits,

  /// Bytes used by live allocations.
  used_bytes: usize,
  gc_runs: u64,

  // GC-managed allocations.
  slots: Vec<Slot>,
  marks: Vec<u8>,
  free_list: Vec<u32>,

  // Root sets.
  pub(crate) root_stack: Vec<Value>,
  persistent_roots: Vec<Option<Value>>,
  persistent_roots_free: Vec<u32>,
}

impl Heap {
  /// Creates a new heap with the provided memory limits.
  pub fn new(limits: HeapLimits) -> Self {
    debug_assert!(
      limits.gc_threshold <= limits.max_bytes,
      "gc_threshold should be <= max_bytes"
    );

    Self {
      limits,
      used_bytes: 0,
      gc_runs: 0,
      slots: Vec::new(),
      marks: Vec::new(),
      free_list: Vec::new(),
      root_stack: Vec::new(),
      persistent_roots: Vec::new(),
      persistent_roots_free: Vec::new(),
    }
  }

  /// Enters a stack-rooting scope.
  ///
  /// Stack roots pushed via [`RootScope::push_root`] are removed when the returned scope is
  /// dropped.
  pub fn scope(&mut self) -> RootScope<'_> {
    let root_stack_len_at_entry = self.root_stack.len();
    RootScope {
      heap: self,
      root_stack_len_at_entry,
    }
  }

  /// Bytes currently used by live heap allocations.
  pub fn used_bytes(&self) -> usize {
    self.used_bytes
  }

  /// Total number of GC cycles that have run.
  pub fn gc_runs(&self) -> u64 {
    self.gc_runs
  }

  /// Number of live allocations.
  pub fn live_objects(&self) -> usize {
    self.slots.len() - self.free_list.len()
  }

  /// Explicitly runs a GC cycle.
  pub fn collect_garbage(&mut self) {
    self.gc_runs += 1;

    // Mark.
    {
      debug_assert_eq!(self.slots.len(), self.marks.len());

      let slots = &self.slots;
      let marks = &mut self.marks[..];

      let mut tracer = Tracer::new(slots, marks);
      for value in &self.root_stack {
        tracer.trace_value(*value);
      }
      for value in self.persistent_roots.iter().flatten() {
        tracer.trace_value(*value);
      }

      while let Some(id) = tracer.pop_work() {
        let Some(idx) = tracer.validate(id) else {
          continue;
        };
        if tracer.marks[idx] != 0 {
          continue;
        }
        tracer.marks[idx] = 1;

        if let Some(obj) = tracer.slots[idx].value.as_ref() {
          obj.trace(&mut tracer);
        }
      }
    }

    // Sweep.
    let mut freed = 0usize;
    for (idx, slot) in self.slots.iter_mut().enumerate() {
      let marked = self.marks[idx] != 0;
      self.marks[idx] = 0;

      if slot.value.is_none() || marked {
        continue;
      }

      self.used_bytes = self.used_bytes.saturating_sub(slot.bytes);
      slot.value = None;
      slot.bytes = 0;
      slot.generation = slot.generation.wrapping_add(1);
      self.free_list.push(idx as u32);
      freed += 1;
    }

    debug!(
      target: "napi_env::heap",
      gc_runs = self.gc_runs,
      freed,
      used_bytes = self.used_bytes,
      "heap.collect_garbage"
    );
  }

  /// Adds a persistent root, keeping `value` live until the returned [`RootId`] is removed.
  pub fn add_root(&mut self, value: Value) -> RootId {
    debug_assert!(self.is_valid_value(value));

    let idx = match self.persistent_roots_free.pop() {
      Some(idx) => idx as usize,
      None => {
        self.persistent_roots.push(None);
        self.persistent_roots.len() - 1
      }
    };
    debug_assert!(self.persistent_roots[idx].is_none());
    self.persistent_roots[idx] = Some(value);
    RootId(idx as u32)
  }

  /// Returns the current value of a persistent root.
  pub fn get_root(&self, id: RootId) -> Option<Value> {
    self
      .persistent_roots
      .get(id.0 as usize)
      .and_then(|slot| *slot)
  }

  /// Removes a persistent root previously created by [`Heap::add_root`].
  pub fn remove_root(&mut self, id: RootId) {
    let idx = id.0 as usize;
    debug_assert!(idx < self.persistent_roots.len(), "invalid RootId");
    if let Some(slot) = self.persistent_roots.get_mut(idx) {
      if slot.take().is_some() {
        self.persistent_roots_free.push(id.0);
      }
    }
  }

  /// Returns `true` if `obj` currently points to a live object allocation.
  pub fn is_valid_object(&self, obj: GcObject) -> bool {
    matches!(self.get_heap_object(obj.0), Ok(HeapObject::Object(_)))
  }

  pub fn is_valid_string(&self, s: GcString) -> bool {
    matches!(self.get_heap_object(s.0), Ok(HeapObject::String(_)))
  }

  /// Primitives are always valid; heap values must point at a live allocation.
  pub fn is_valid_value(&self, value: Value) -> bool {
    match value {
      Value::Undefined | Value::Null | Value::Bool(_) | Value::Number(_) => true,
      Value::String(s) => self.is_valid_string(s),
      Value::Object(o) => self.is_valid_object(o),
    }
  }

  // Strings.

  pub fn alloc_string(&mut self, s: &str) -> Result<GcString, VmError> {
    let bytes = STRING_HEADER_BYTES + s.len();
    self.ensure_can_allocate(bytes)?;
    let id = self.alloc_unchecked(HeapObject::String(s.into()), bytes);
    Ok(GcString(id))
  }

  pub fn get_string(&self, s: GcString) -> Result<&str, VmError> {
    match self.get_heap_object(s.0)? {
      HeapObject::String(s) => Ok(s),
      _ => Err(VmError::InvalidHandle),
    }
  }

  // Objects.

  pub fn alloc_object(&mut self) -> Result<GcObject, VmError> {
    self.alloc_js_object(ObjectKind::Ordinary, Vec::new(), &[])
  }

  /// Allocates an error object with `message` (and optionally `code`) as own properties.
  pub fn alloc_error(
    &mut self,
    kind: ErrorKind,
    message: Value,
    code: Option<Value>,
  ) -> Result<GcObject, VmError> {
    let mut properties = vec![PropertyEntry::new("message", message)];
    if let Some(code) = code {
      properties.push(PropertyEntry::new("code", code));
    }
    let roots = [message, code.unwrap_or(Value::Undefined)];
    self.alloc_js_object(ObjectKind::Error(kind), properties, &roots)
  }

  /// Allocates an error object, creating the message string first.
  pub fn alloc_error_with_message(
    &mut self,
    kind: ErrorKind,
    message: &str,
  ) -> Result<GcObject, VmError> {
    let mut scope = self.scope();
    let message = scope.heap_mut().alloc_string(message)?;
    let message = scope.push_root(Value::String(message));
    scope.heap_mut().alloc_error(kind, message, None)
  }

  pub fn alloc_function(&mut self, name: &str, kind: FunctionKind) -> Result<GcObject, VmError> {
    let mut scope = self.scope();
    let name = scope.heap_mut().alloc_string(name)?;
    let name = scope.push_root(Value::String(name));
    scope.heap_mut().alloc_js_object(
      ObjectKind::Function(kind),
      vec![PropertyEntry::new("name", name)],
      &[name],
    )
  }

  pub fn alloc_promise(&mut self) -> Result<GcObject, VmError> {
    self.alloc_js_object(
      ObjectKind::Promise {
        state: PromiseState::Pending,
        result: Value::Undefined,
      },
      Vec::new(),
      &[],
    )
  }

  /// Allocates a zero-filled array buffer owned by the heap.
  pub fn alloc_array_buffer(&mut self, byte_length: u32) -> Result<GcObject, VmError> {
    self.alloc_js_object(
      ObjectKind::ArrayBuffer(BufferBacking::Owned(vec![0; byte_length as usize])),
      Vec::new(),
      &[],
    )
  }

  /// Allocates the array buffer object that exposes native linear memory to the host.
  pub fn alloc_linear_memory_buffer(&mut self, byte_length: u32) -> Result<GcObject, VmError> {
    self.alloc_js_object(
      ObjectKind::ArrayBuffer(BufferBacking::LinearMemory { byte_length }),
      Vec::new(),
      &[],
    )
  }

  pub fn alloc_typed_array(
    &mut self,
    kind: TypedArrayType,
    length: u32,
    buffer: GcObject,
    byte_offset: u32,
  ) -> Result<GcObject, VmError> {
    let buffer_len = self.array_buffer_byte_length(buffer)?;
    if byte_offset % kind.element_size() != 0 {
      return Err(VmError::RangeError(
        "start offset of typed array should be a multiple of element size",
      ));
    }
    let byte_length = length
      .checked_mul(kind.element_size())
      .ok_or(VmError::RangeError("invalid typed array length"))?;
    if byte_offset
      .checked_add(byte_length)
      .map_or(true, |end| end > buffer_len)
    {
      return Err(VmError::RangeError("invalid typed array length"));
    }
    self.alloc_js_object(
      ObjectKind::TypedArray(TypedArrayInfo {
        kind,
        length,
        buffer,
        byte_offset,
        byte_length,
      }),
      Vec::new(),
      &[Value::Object(buffer)],
    )
  }

  /// Reads a named property.
  ///
  /// Reading from `undefined` or `null` throws a `TypeError`; other primitives have no properties.
  pub fn get_property(&self, target: Value, key: &str) -> Result<Value, VmError> {
    match target {
      Value::Undefined | Value::Null => Err(VmError::TypeError(
        "Cannot read properties of undefined or null",
      )),
      Value::Object(obj) => {
        let obj = self.get_object(obj)?;
        Ok(
          obj
            .properties
            .iter()
            .find(|p| &*p.key == key)
            .map_or(Value::Undefined, |p| p.value),
        )
      }
      _ => Ok(Value::Undefined),
    }
  }

  /// Writes (or creates) a named own property.
  pub fn set_property(&mut self, target: Value, key: &str, value: Value) -> Result<(), VmError> {
    let obj = match target {
      Value::Object(obj) => obj,
      Value::Undefined | Value::Null => {
        return Err(VmError::TypeError(
          "Cannot set properties of undefined or null",
        ))
      }
      _ => return Ok(()),
    };

    let existing = self
      .get_object(obj)?
      .properties
      .iter()
      .position(|p| &*p.key == key);
    match existing {
      Some(pos) => {
        self.get_object_mut(obj)?.properties[pos].value = value;
      }
      None => {
        let extra = PROPERTY_BYTES + key.len();
        {
          let mut scope = self.scope();
          scope.push_root(target);
          scope.push_root(value);
          scope.heap_mut().ensure_can_allocate(extra)?;
        }
        let idx = self.validate(obj.0).ok_or(VmError::InvalidHandle)?;
        self.get_object_mut(obj)?.properties.push(PropertyEntry::new(key, value));
        self.update_slot_bytes(idx, self.slots[idx].bytes + extra);
      }
    }
    Ok(())
  }

  pub fn is_error(&self, value: Value) -> bool {
    self.object_kind(value).is_some_and(|k| matches!(k, ObjectKind::Error(_)))
  }

  pub fn error_kind(&self, value: Value) -> Option<ErrorKind> {
    match self.object_kind(value)? {
      ObjectKind::Error(kind) => Some(*kind),
      _ => None,
    }
  }

  /// Convenience accessor for an error's `message` property as UTF-8.
  pub fn error_message(&self, value: Value) -> Option<&str> {
    if !self.is_error(value) {
      return None;
    }
    match self.get_property(value, "message").ok()? {
      Value::String(s) => self.get_string(s).ok(),
      _ => None,
    }
  }

  // Functions.

  pub fn is_function(&self, value: Value) -> bool {
    self.object_kind(value).is_some_and(|k| matches!(k, ObjectKind::Function(_)))
  }

  pub fn function_kind(&self, value: Value) -> Result<FunctionKind, VmError> {
    match self.object_kind(value) {
      Some(ObjectKind::Function(kind)) => Ok(*kind),
      _ => Err(VmError::TypeError("value is not a function")),
    }
  }

  // Promises.

  pub fn is_promise(&self, value: Value) -> bool {
    self.object_kind(value).is_some_and(|k| matches!(k, ObjectKind::Promise { .. }))
  }

  pub fn promise_state(&self, promise: GcObject) -> Result<PromiseState, VmError> {
    match &self.get_object(promise)?.kind {
      ObjectKind::Promise { state, .. } => Ok(*state),
      _ => Err(VmError::TypeError("value is not a promise")),
    }
  }

  /// The fulfillment value or rejection reason (`undefined` while pending).
  pub fn promise_result(&self, promise: GcObject) -> Result<Value, VmError> {
    match &self.get_object(promise)?.kind {
      ObjectKind::Promise { result, .. } => Ok(*result),
      _ => Err(VmError::TypeError("value is not a promise")),
    }
  }

  /// Settles a pending promise. Settling twice is a `TypeError` and leaves the first settlement.
  pub fn promise_settle(
    &mut self,
    promise: GcObject,
    new_state: PromiseState,
    value: Value,
  ) -> Result<(), VmError> {
    debug_assert_ne!(new_state, PromiseState::Pending);
    match &mut self.get_object_mut(promise)?.kind {
      ObjectKind::Promise { state, result } => {
        if *state != PromiseState::Pending {
          return Err(VmError::TypeError("promise is already settled"));
        }
        *state = new_state;
        *result = value;
        Ok(())
      }
      _ => Err(VmError::TypeError("value is not a promise")),
    }
  }

  // Buffers and views.

  pub fn is_array_buffer(&self, value: Value) -> bool {
    self.object_kind(value).is_some_and(|k| matches!(k, ObjectKind::ArrayBuffer(_)))
  }

  pub fn is_typed_array(&self, value: Value) -> bool {
    self.object_kind(value).is_some_and(|k| matches!(k, ObjectKind::TypedArray(_)))
  }

  fn array_buffer_backing(&self, buffer: GcObject) -> Result<&BufferBacking, VmError> {
    match &self.get_object(buffer)?.kind {
      ObjectKind::ArrayBuffer(backing) => Ok(backing),
      _ => Err(VmError::TypeError("value is not an ArrayBuffer")),
    }
  }

  pub fn array_buffer_byte_length(&self, buffer: GcObject) -> Result<u32, VmError> {
    Ok(match self.array_buffer_backing(buffer)? {
      BufferBacking::Owned(data) => data.len() as u32,
      BufferBacking::LinearMemory { byte_length } => *byte_length,
    })
  }

  /// Returns `true` if `buffer` is a window onto native linear memory.
  pub fn array_buffer_is_linear_memory(&self, buffer: GcObject) -> Result<bool, VmError> {
    Ok(matches!(
      self.array_buffer_backing(buffer)?,
      BufferBacking::LinearMemory { .. }
    ))
  }

  /// The heap-owned bytes of `buffer`, or `None` if the buffer lives in native linear memory.
  pub fn array_buffer_data(&self, buffer: GcObject) -> Result<Option<&[u8]>, VmError> {
    Ok(match self.array_buffer_backing(buffer)? {
      BufferBacking::Owned(data) => Some(data),
      BufferBacking::LinearMemory { .. } => None,
    })
  }

  pub fn array_buffer_data_mut(&mut self, buffer: GcObject) -> Result<Option<&mut [u8]>, VmError> {
    match &mut self.get_object_mut(buffer)?.kind {
      ObjectKind::ArrayBuffer(BufferBacking::Owned(data)) => Ok(Some(data)),
      ObjectKind::ArrayBuffer(BufferBacking::LinearMemory { .. }) => Ok(None),
      _ => Err(VmError::TypeError("value is not an ArrayBuffer")),
    }
  }

  pub fn typed_array_info(&self, view: GcObject) -> Result<TypedArrayInfo, VmError> {
    match &self.get_object(view)?.kind {
      ObjectKind::TypedArray(info) => Ok(*info),
      _ => Err(VmError::TypeError("value is not a typed array")),
    }
  }

  fn object_kind(&self, value: Value) -> Option<&ObjectKind> {
    let obj = value.as_object()?;
    self.get_object(obj).ok().map(|o| &o.kind)
  }

  fn get_object(&self, obj: GcObject) -> Result<&JsObject, VmError> {
    match self.get_heap_object(obj.0)? {
      HeapObject::Object(o) => Ok(o),
      _ => Err(VmError::InvalidHandle),
    }
  }

  fn get_object_mut(&mut self, obj: GcObject) -> Result<&mut JsObject, VmError> {
    match self.get_heap_object_mut(obj.0)? {
      HeapObject::Object(o) => Ok(o),
      _ => Err(VmError::InvalidHandle),
    }
  }

  fn alloc_js_object(
    &mut self,
    kind: ObjectKind,
    properties: Vec<PropertyEntry>,
    roots: &[Value],
  ) -> Result<GcObject, VmError> {
    let bytes = JsObject::heap_size_bytes(&kind, &properties);
    {
      let mut scope = self.scope();
      for root in roots {
        scope.push_root(*root);
      }
      scope.heap_mut().ensure_can_allocate(bytes)?;
    }
    let id = self.alloc_unchecked(HeapObject::Object(JsObject { kind, properties }), bytes);
    Ok(GcObject(id))
  }

  fn get_heap_object(&self, id: HeapId) -> Result<&HeapObject, VmError> {
    let idx = self.validate(id).ok_or(VmError::InvalidHandle)?;
    self.slots[idx].value.as_ref().ok_or(VmError::InvalidHandle)
  }

  fn get_heap_object_mut(&mut self, id: HeapId) -> Result<&mut HeapObject, VmError> {
    let idx = self.validate(id).ok_or(VmError::InvalidHandle)?;
    self.slots[idx].value.as_mut().ok_or(VmError::InvalidHandle)
  }

  fn validate(&self, id: HeapId) -> Option<usize> {
    let idx = id.index() as usize;
    let slot = self.slots.get(idx)?;
    if slot.generation != id.generation() || slot.value.is_none() {
      return None;
    }
    Some(idx)
  }

  fn ensure_can_allocate(&mut self, new_bytes: usize) -> Result<(), VmError> {
    let after = self.used_bytes.saturating_add(new_bytes);
    if after > self.limits.gc_threshold {
      self.collect_garbage();
    }

    let after = self.used_bytes.saturating_add(new_bytes);
    if after > self.limits.max_bytes {
      return Err(VmError::OutOfMemory);
    }
    Ok(())
  }

  fn update_slot_bytes(&mut self, idx: usize, new_bytes: usize) {
    let slot = &mut self.slots[idx];
    let old_bytes = slot.bytes;

    if new_bytes >= old_bytes {
      self.used_bytes = self.used_bytes.saturating_add(new_bytes - old_bytes);
    } else {
      self.used_bytes = self.used_bytes.saturating_sub(old_bytes - new_bytes);
    }

    slot.bytes = new_bytes;
  }

  fn alloc_unchecked(&mut self, obj: HeapObject, new_bytes: usize) -> HeapId {
    let idx = match self.free_list.pop() {
      Some(idx) => idx as usize,
      None => {
        let idx = self.slots.len();
        self.slots.push(Slot::new());
        self.marks.push(0);
        idx
      }
    };

    let slot = &mut self.slots[idx];
    debug_assert!(slot.value.is_none(), "free list returned an occupied slot");

    slot.value = Some(obj);
    slot.bytes = new_bytes;
    self.used_bytes = self.used_bytes.saturating_add(new_bytes);

    HeapId::from_parts(idx as u32, slot.generation)
  }
}

/// A stack-rooting scope.
///
/// All stack roots pushed via [`RootScope::push_root`] are removed when the scope is dropped. This
/// is only for values held in Rust locals across an allocation; values crossing the native
/// boundary are rooted by the env's tables instead.
pub struct RootScope<'a> {
  heap: &'a mut Heap,
  root_stack_len_at_entry: usize,
}

impl Drop for RootScope<'_> {
  fn drop(&mut self) {
    self.heap.root_stack.truncate(self.root_stack_len_at_entry);
  }
}

impl<'a> RootScope<'a> {
  /// Pushes a stack root and returns the same value.
  pub fn push_root(&mut self, value: Value) -> Value {
    debug_assert!(self.heap.is_valid_value(value));
    self.heap.root_stack.push(value);
    value
  }

  /// Borrows the underlying heap immutably.
  pub fn heap(&self) -> &Heap {
    &*self.heap
  }

  /// Borrows the underlying heap mutably.
  pub fn heap_mut(&mut self) -> &mut Heap {
    &mut *self.heap
  }
}

const STRING_HEADER_BYTES: usize = 16;
const OBJECT_HEADER_BYTES: usize = 48;
const PROPERTY_BYTES: usize = 24;

#[derive(Debug)]
struct Slot {
  generation: u32,
  value: Option<HeapObject>,
  bytes: usize,
}

impl Slot {
  fn new() -> Self {
    Self {
      generation: 0,
      value: None,
      bytes: 0,
    }
  }
}

#[derive(Debug)]
enum HeapObject {
  String(Box<str>),
  Object(JsObject),
}

#[derive(Debug)]
enum ObjectKind {
  Ordinary,
  Error(ErrorKind),
  Function(FunctionKind),
  Promise { state: PromiseState, result: Value },
  ArrayBuffer(BufferBacking),
  TypedArray(TypedArrayInfo),
}

#[derive(Debug)]
struct PropertyEntry {
  key: Box<str>,
  value: Value,
}

impl PropertyEntry {
  fn new(key: &str, value: Value) -> Self {
    Self {
      key: key.into(),
      value,
    }
  }
}

#[derive(Debug)]
struct JsObject {
  kind: ObjectKind,
  properties: Vec<PropertyEntry>,
}

impl JsObject {
  fn heap_size_bytes(kind: &ObjectKind, properties: &[PropertyEntry]) -> usize {
    let payload = match kind {
      ObjectKind::ArrayBuffer(BufferBacking::Owned(data)) => data.len(),
      _ => 0,
    };
    properties.iter().fold(OBJECT_HEADER_BYTES + payload, |acc, p| {
      acc + PROPERTY_BYTES + p.key.len()
    })
  }
}

trait Trace {
  fn trace(&self, tracer: &mut Tracer<'_>);
}

impl Trace for HeapObject {
  fn trace(&self, tracer: &mut Tracer<'_>) {
    match self {
      HeapObject::String(_) => {}
      HeapObject::Object(obj) => obj.trace(tracer),
    }
  }
}

impl Trace for JsObject {
  fn trace(&self, tracer: &mut Tracer<'_>) {
    for prop in &self.properties {
      tracer.trace_value(prop.value);
    }
    match &self.kind {
      ObjectKind::Promise { result, .. } => tracer.trace_value(*result),
      ObjectKind::TypedArray(info) => tracer.trace_value(Value::Object(info.buffer)),
      _ => {}
    }
  }
}

struct Tracer<'a> {
  slots: &'a [Slot],
  marks: &'a mut [u8],
  worklist: Vec<HeapId>,
}

impl<'a> Tracer<'a> {
  fn new(slots: &'a [Slot], marks: &'a mut [u8]) -> Self {
    Self {
      slots,
      marks,
      worklist: Vec::new(),
    }
  }

  fn pop_work(&mut self) -> Option<HeapId> {
    self.worklist.pop()
  }

  fn trace_value(&mut self, value: Value) {
    match value {
      Value::Undefined | Value::Null | Value::Bool(_) | Value::Number(_) => {}
      Value::String(s) => self.trace_heap_id(s.0),
      Value::Object(o) => self.trace_heap_id(o.0),
    }
  }

  fn trace_heap_id(&mut self, id: HeapId) {
    let Some(idx) = self.validate(id) else {
      return;
    };
    if self.marks[idx] != 0 {
      return;
    }
    self.worklist.push(id);
  }

  fn validate(&self, id: HeapId) -> Option<usize> {
    let idx = id.index() as usize;
    let slot = self.slots.get(idx)?;
    if slot.generation != id.generation() {
      debug_assert!(false, "stale handle during GC: {id:?}");
      return None;
    }
    if slot.value.is_none() {
      debug_assert!(false, "handle points at a free slot during GC: {id:?}");
      return None;
    }
    Some(idx)
  }
}
