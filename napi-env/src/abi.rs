//! Boundary entry points.
//!
//! These are the functions native code calls. They follow the Node-API calling convention:
//!
//! - the env comes first (resolve a raw env id with [`EnvRegistry::call`](crate::EnvRegistry::call)),
//! - values, references, scopes, deferreds and callback infos are raw `u32` ids, `0` is `NULL`,
//! - out-parameters come last as `Option<&mut T>`; `None` models a null pointer,
//! - the return value is a [`Status`], also recorded in the env's last-error slot.
//!
//! Entry points that may run host code refuse to start while an exception is pending and report
//! host exceptions as [`Status::PendingException`] with the thrown value in the mailbox.

use crate::callback_info::CallbackInfoId;
use crate::deferred::DeferredId;
use crate::env::NativeCallback;
use crate::finalizer::{FinalizeCallback, Finalizer};
use crate::handle_store::HandleId;
use crate::heap::{ErrorKind, FunctionKind, PromiseState, TypedArrayType};
use crate::reference::{RefId, ReferenceOwnership};
use crate::scope::{ScopeId, ScopeKind};
use crate::status::Status;
use crate::{Env, GcObject, GcString, NapiError, Value};

fn arg<T>(param: Option<T>) -> Result<T, NapiError> {
  param.ok_or(NapiError::Status(Status::InvalidArg))
}

fn value(env: &Env, raw: u32) -> Result<Value, NapiError> {
  let handle = HandleId::from_raw(raw).ok_or(Status::InvalidArg)?;
  env
    .handle_value(handle)
    .map_err(|_| NapiError::Status(Status::InvalidArg))
}

fn object(env: &Env, raw: u32) -> Result<GcObject, NapiError> {
  value(env, raw)?
    .as_object()
    .ok_or(NapiError::Status(Status::ObjectExpected))
}

fn string(env: &Env, raw: u32) -> Result<GcString, NapiError> {
  match value(env, raw)? {
    Value::String(s) => Ok(s),
    _ => Err(Status::StringExpected.into()),
  }
}

fn handle(env: &mut Env, value: Value) -> Result<u32, NapiError> {
  Ok(env.ensure_handle_id(value)?.raw())
}

fn reference(raw: u32) -> Result<RefId, NapiError> {
  Ok(RefId::from_raw(raw).ok_or(Status::InvalidArg)?)
}

// Lifetime.

pub fn napi_open_handle_scope(env: &mut Env, result: Option<&mut u32>) -> Status {
  env.checked(|env| {
    let result = arg(result)?;
    *result = env.open_scope(ScopeKind::Plain)?.raw();
    Ok(())
  })
}

pub fn napi_close_handle_scope(env: &mut Env, scope: u32) -> Status {
  env.checked(|env| {
    let scope = ScopeId::from_raw(scope).ok_or(Status::InvalidArg)?;
    env.close_scope(scope)
  })
}

pub fn napi_open_escapable_handle_scope(env: &mut Env, result: Option<&mut u32>) -> Status {
  env.checked(|env| {
    let result = arg(result)?;
    *result = env.open_scope(ScopeKind::Escapable)?.raw();
    Ok(())
  })
}

pub fn napi_close_escapable_handle_scope(env: &mut Env, scope: u32) -> Status {
  napi_close_handle_scope(env, scope)
}

pub fn napi_escape_handle(
  env: &mut Env,
  scope: u32,
  escapee: u32,
  result: Option<&mut u32>,
) -> Status {
  env.checked(|env| {
    let scope = ScopeId::from_raw(scope).ok_or(Status::InvalidArg)?;
    let escapee = HandleId::from_raw(escapee).ok_or(Status::InvalidArg)?;
    let result = arg(result)?;
    *result = env.escape_handle(scope, escapee)?.raw();
    Ok(())
  })
}

// References.

pub fn napi_create_reference(
  env: &mut Env,
  value: u32,
  initial_refcount: u32,
  result: Option<&mut u32>,
) -> Status {
  env.checked(|env| {
    let obj = object(env, value)?;
    let result = arg(result)?;
    *result = env
      .create_reference(obj, initial_refcount, None, ReferenceOwnership::Userland)?
      .raw();
    Ok(())
  })
}

pub fn napi_delete_reference(env: &mut Env, reference_id: u32) -> Status {
  env.checked(|env| {
    env
      .delete_reference(reference(reference_id)?)
      .map_err(|_| NapiError::Status(Status::InvalidArg))
  })
}

pub fn napi_reference_ref(env: &mut Env, reference_id: u32, result: Option<&mut u32>) -> Status {
  env.checked(|env| {
    let count = env
      .reference_ref(reference(reference_id)?)
      .map_err(|_| NapiError::Status(Status::InvalidArg))?;
    if let Some(result) = result {
      *result = count;
    }
    Ok(())
  })
}

pub fn napi_reference_unref(env: &mut Env, reference_id: u32, result: Option<&mut u32>) -> Status {
  env.checked(|env| {
    let reference = reference(reference_id)?;
    if env.reference_count(reference).is_err() {
      return Err(Status::InvalidArg.into());
    }
    let count = env.reference_unref(reference)?;
    if let Some(result) = result {
      *result = count;
    }
    Ok(())
  })
}

pub fn napi_get_reference_value(
  env: &mut Env,
  reference_id: u32,
  result: Option<&mut u32>,
) -> Status {
  env.checked(|env| {
    let reference = reference(reference_id)?;
    let result = arg(result)?;
    *result = match env
      .reference_value(reference)
      .map_err(|_| NapiError::Status(Status::InvalidArg))?
    {
      Some(obj) => handle(env, Value::Object(obj))?,
      None => 0,
    };
    Ok(())
  })
}

/// Runs `finalize_cb(env, finalize_data, finalize_hint)` once `js_object` has been collected.
///
/// With `result` the caller receives a weak reference it must delete; without it the reference is
/// owned by the runtime.
pub fn napi_add_finalizer(
  env: &mut Env,
  js_object: u32,
  finalize_data: u32,
  finalize_cb: Option<FinalizeCallback>,
  finalize_hint: u32,
  result: Option<&mut u32>,
) -> Status {
  env.checked(|env| {
    let obj = object(env, js_object)?;
    let callback = arg(finalize_cb)?;
    let finalizer = Finalizer::new(callback, finalize_data, finalize_hint);
    let reference = env.add_finalizer(obj, finalizer, result.is_some())?;
    if let Some(result) = result {
      *result = reference.raw();
    }
    Ok(())
  })
}

// Errors.

/// Writes the native address of the env's extended error info record to `result`.
///
/// Does not itself reset the record.
pub fn napi_get_last_error_info(env: &mut Env, result: Option<&mut u32>) -> Status {
  let Some(result) = result else {
    return env.set_last_error(Status::InvalidArg, 0, 0);
  };
  env.last_error_info();
  *result = env.control_block();
  Status::Ok
}

pub fn napi_throw(env: &mut Env, error: u32) -> Status {
  env.preamble(|env| {
    let error = value(env, error)?;
    env.throw(error);
    Ok(())
  })
}

fn throw_new_error(env: &mut Env, kind: ErrorKind, code: Option<&str>, msg: Option<&str>) -> Status {
  env.preamble(|env| {
    let msg = arg(msg)?;
    let heap = env.heap_mut();
    let mut scope = heap.scope();
    let message = scope.heap_mut().alloc_string(msg)?;
    let message = scope.push_root(Value::String(message));
    let code = match code {
      Some(code) => {
        let code = scope.heap_mut().alloc_string(code)?;
        Some(scope.push_root(Value::String(code)))
      }
      None => None,
    };
    let error = Value::Object(scope.heap_mut().alloc_error(kind, message, code)?);
    drop(scope);
    env.throw(error);
    Ok(())
  })
}

pub fn napi_throw_error(env: &mut Env, code: Option<&str>, msg: Option<&str>) -> Status {
  throw_new_error(env, ErrorKind::Error, code, msg)
}

pub fn napi_throw_type_error(env: &mut Env, code: Option<&str>, msg: Option<&str>) -> Status {
  throw_new_error(env, ErrorKind::TypeError, code, msg)
}

pub fn napi_throw_range_error(env: &mut Env, code: Option<&str>, msg: Option<&str>) -> Status {
  throw_new_error(env, ErrorKind::RangeError, code, msg)
}

pub fn napi_is_error(env: &mut Env, value_id: u32, result: Option<&mut bool>) -> Status {
  env.checked(|env| {
    let value = value(env, value_id)?;
    *arg(result)? = env.heap().is_error(value);
    Ok(())
  })
}

fn create_error(
  env: &mut Env,
  kind: ErrorKind,
  code: u32,
  msg: u32,
  result: Option<&mut u32>,
) -> Status {
  env.checked(|env| {
    let message = Value::String(string(env, msg)?);
    let code = match code {
      0 => None,
      code => Some(Value::String(string(env, code)?)),
    };
    let result = arg(result)?;
    let error = env.heap_mut().alloc_error(kind, message, code)?;
    *result = handle(env, Value::Object(error))?;
    Ok(())
  })
}

pub fn napi_create_error(env: &mut Env, code: u32, msg: u32, result: Option<&mut u32>) -> Status {
  create_error(env, ErrorKind::Error, code, msg, result)
}

pub fn napi_create_type_error(
  env: &mut Env,
  code: u32,
  msg: u32,
  result: Option<&mut u32>,
) -> Status {
  create_error(env, ErrorKind::TypeError, code, msg, result)
}

pub fn napi_create_range_error(
  env: &mut Env,
  code: u32,
  msg: u32,
  result: Option<&mut u32>,
) -> Status {
  create_error(env, ErrorKind::RangeError, code, msg, result)
}

pub fn napi_is_exception_pending(env: &mut Env, result: Option<&mut bool>) -> Status {
  env.checked(|env| {
    *arg(result)? = env.is_exception_pending();
    Ok(())
  })
}

/// Takes the pending exception out of the mailbox. Yields `undefined` if nothing is pending.
pub fn napi_get_and_clear_last_exception(env: &mut Env, result: Option<&mut u32>) -> Status {
  env.checked(|env| {
    let result = arg(result)?;
    let exception = env.take_exception().unwrap_or(Value::Undefined);
    *result = handle(env, exception)?;
    Ok(())
  })
}

// Promises.

pub fn napi_create_promise(
  env: &mut Env,
  deferred: Option<&mut u32>,
  promise: Option<&mut u32>,
) -> Status {
  env.checked(|env| {
    let deferred = arg(deferred)?;
    let promise = arg(promise)?;
    let (id, obj) = env.create_deferred()?;
    *promise = handle(env, Value::Object(obj))?;
    *deferred = id.raw();
    Ok(())
  })
}

fn conclude_deferred(env: &mut Env, deferred: u32, settled: u32, state: PromiseState) -> Status {
  env.preamble(|env| {
    let deferred = DeferredId::from_raw(deferred).ok_or(Status::InvalidArg)?;
    let settled = value(env, settled)?;
    env.settle_deferred(deferred, state, settled)
  })
}

pub fn napi_resolve_deferred(env: &mut Env, deferred: u32, resolution: u32) -> Status {
  conclude_deferred(env, deferred, resolution, PromiseState::Fulfilled)
}

pub fn napi_reject_deferred(env: &mut Env, deferred: u32, rejection: u32) -> Status {
  conclude_deferred(env, deferred, rejection, PromiseState::Rejected)
}

pub fn napi_is_promise(env: &mut Env, value_id: u32, result: Option<&mut bool>) -> Status {
  env.checked(|env| {
    let value = value(env, value_id)?;
    *arg(result)? = env.heap().is_promise(value);
    Ok(())
  })
}

// Calls.

/// Reads an in-flight call.
///
/// On input `argc` is the capacity of `argv`; on output it is the real argument count. `argv` is
/// filled with up to `argc` argument handles, padded with `undefined`.
pub fn napi_get_cb_info(
  env: &mut Env,
  cbinfo: u32,
  argc: Option<&mut u32>,
  argv: Option<&mut [u32]>,
  this_arg: Option<&mut u32>,
  data: Option<&mut u32>,
) -> Status {
  env.checked(|env| {
    let info = CallbackInfoId::from_raw(cbinfo).ok_or(Status::InvalidArg)?;
    let (this, args, info_data) = {
      let info = env.callback_info(info)?;
      (info.this, info.args.clone(), info.data)
    };

    if let Some(argv) = argv {
      let argc = argc.as_deref().copied().ok_or(Status::InvalidArg)?;
      let capacity = (argc as usize).min(argv.len());
      for (idx, slot) in argv[..capacity].iter_mut().enumerate() {
        let arg_value = args.get(idx).copied().unwrap_or(Value::Undefined);
        *slot = handle(env, arg_value)?;
      }
    }
    if let Some(argc) = argc {
      *argc = args.len() as u32;
    }
    if let Some(this_arg) = this_arg {
      *this_arg = handle(env, this)?;
    }
    if let Some(data) = data {
      *data = info_data;
    }
    Ok(())
  })
}

/// Yields the new target of a construct call, or `0` for a plain call.
pub fn napi_get_new_target(env: &mut Env, cbinfo: u32, result: Option<&mut u32>) -> Status {
  env.checked(|env| {
    let info = CallbackInfoId::from_raw(cbinfo).ok_or(Status::InvalidArg)?;
    let result = arg(result)?;
    let new_target = env.callback_info(info)?.new_target;
    *result = match new_target {
      Some(new_target) => handle(env, new_target)?,
      None => 0,
    };
    Ok(())
  })
}

pub fn napi_create_function(
  env: &mut Env,
  utf8name: Option<&str>,
  cb: Option<NativeCallback>,
  data: u32,
  result: Option<&mut u32>,
) -> Status {
  env.checked(|env| {
    let result = arg(result)?;
    let callback = arg(cb)?;
    let func = env
      .heap_mut()
      .alloc_function(utf8name.unwrap_or(""), FunctionKind::Native { callback, data })?;
    *result = handle(env, Value::Object(func))?;
    Ok(())
  })
}

fn call_args(env: &Env, argv: &[u32]) -> Result<Vec<Value>, NapiError> {
  argv.iter().map(|raw| value(env, *raw)).collect()
}

pub fn napi_call_function(
  env: &mut Env,
  recv: u32,
  func: u32,
  argv: &[u32],
  result: Option<&mut u32>,
) -> Status {
  env.preamble(|env| {
    let recv = value(env, recv)?;
    let func = value(env, func)?;
    if !env.heap().is_function(func) {
      return Err(Status::FunctionExpected.into());
    }
    let args = call_args(env, argv)?;
    let returned = env.call_function(recv, func, &args)?;
    if let Some(result) = result {
      *result = handle(env, returned)?;
    }
    Ok(())
  })
}

pub fn napi_new_instance(
  env: &mut Env,
  constructor: u32,
  argv: &[u32],
  result: Option<&mut u32>,
) -> Status {
  env.preamble(|env| {
    let constructor = value(env, constructor)?;
    if !env.heap().is_function(constructor) {
      return Err(Status::FunctionExpected.into());
    }
    let result = arg(result)?;
    let args = call_args(env, argv)?;
    let instance = env.construct(constructor, &args)?;
    *result = handle(env, instance)?;
    Ok(())
  })
}

// Instance data.

pub fn napi_set_instance_data(
  env: &mut Env,
  data: u32,
  finalize_cb: Option<FinalizeCallback>,
  finalize_hint: u32,
) -> Status {
  env.checked(|env| {
    env.set_instance_data(data, finalize_cb.map(|cb| (cb, finalize_hint)))?;
    Ok(())
  })
}

pub fn napi_get_instance_data(env: &mut Env, data: Option<&mut u32>) -> Status {
  env.checked(|env| {
    *arg(data)? = env.instance_data();
    Ok(())
  })
}

// Buffers.

/// Creates a heap-owned array buffer. If `data` is requested the buffer is mirrored into native
/// memory and its address written there.
pub fn napi_create_arraybuffer(
  env: &mut Env,
  byte_length: u32,
  data: Option<&mut u32>,
  result: Option<&mut u32>,
) -> Status {
  env.preamble(|env| {
    let result = arg(result)?;
    let buffer = env.heap_mut().alloc_array_buffer(byte_length)?;
    *result = handle(env, Value::Object(buffer))?;
    if let Some(data) = data {
      *data = env.get_array_buffer_pointer(buffer)?;
    }
    Ok(())
  })
}

pub fn napi_get_arraybuffer_info(
  env: &mut Env,
  arraybuffer: u32,
  data: Option<&mut u32>,
  byte_length: Option<&mut u32>,
) -> Status {
  env.checked(|env| {
    let buffer = value(env, arraybuffer)?;
    let Some(buffer) = buffer.as_object().filter(|_| env.heap().is_array_buffer(buffer)) else {
      return Err(Status::InvalidArg.into());
    };
    if let Some(byte_length) = byte_length {
      *byte_length = env.heap().array_buffer_byte_length(buffer)?;
    }
    if let Some(data) = data {
      *data = env.get_array_buffer_pointer(buffer)?;
    }
    Ok(())
  })
}

pub fn napi_create_typedarray(
  env: &mut Env,
  kind: i32,
  length: u32,
  arraybuffer: u32,
  byte_offset: u32,
  result: Option<&mut u32>,
) -> Status {
  env.preamble(|env| {
    let buffer = value(env, arraybuffer)?;
    let result = arg(result)?;
    let kind = TypedArrayType::from_code(kind).ok_or(Status::InvalidArg)?;
    let Some(buffer) = buffer.as_object().filter(|_| env.heap().is_array_buffer(buffer)) else {
      return Err(Status::InvalidArg.into());
    };
    let view = env
      .heap_mut()
      .alloc_typed_array(kind, length, buffer, byte_offset)?;
    *result = handle(env, Value::Object(view))?;
    Ok(())
  })
}

#[allow(clippy::too_many_arguments)]
pub fn napi_get_typedarray_info(
  env: &mut Env,
  typedarray: u32,
  kind: Option<&mut TypedArrayType>,
  length: Option<&mut u32>,
  data: Option<&mut u32>,
  arraybuffer: Option<&mut u32>,
  byte_offset: Option<&mut u32>,
) -> Status {
  env.checked(|env| {
    let view = value(env, typedarray)?;
    let Some(view) = view.as_object().filter(|_| env.heap().is_typed_array(view)) else {
      return Err(Status::InvalidArg.into());
    };
    let info = env.heap().typed_array_info(view)?;
    if let Some(kind) = kind {
      *kind = info.kind;
    }
    if let Some(length) = length {
      *length = info.length;
    }
    if let Some(data) = data {
      *data = env.get_view_pointer(view)?;
    }
    if let Some(arraybuffer) = arraybuffer {
      *arraybuffer = handle(env, Value::Object(info.buffer))?;
    }
    if let Some(byte_offset) = byte_offset {
      *byte_offset = info.byte_offset;
    }
    Ok(())
  })
}

// Values.

fn create_value(env: &mut Env, value: Value, result: Option<&mut u32>) -> Status {
  env.checked(|env| {
    *arg(result)? = handle(env, value)?;
    Ok(())
  })
}

pub fn napi_get_undefined(env: &mut Env, result: Option<&mut u32>) -> Status {
  create_value(env, Value::Undefined, result)
}

pub fn napi_get_null(env: &mut Env, result: Option<&mut u32>) -> Status {
  create_value(env, Value::Null, result)
}

pub fn napi_get_boolean(env: &mut Env, value: bool, result: Option<&mut u32>) -> Status {
  create_value(env, Value::Bool(value), result)
}

pub fn napi_create_double(env: &mut Env, value: f64, result: Option<&mut u32>) -> Status {
  create_value(env, Value::Number(value), result)
}

pub fn napi_create_int32(env: &mut Env, value: i32, result: Option<&mut u32>) -> Status {
  create_value(env, Value::Number(value as f64), result)
}

pub fn napi_create_string_utf8(env: &mut Env, s: Option<&str>, result: Option<&mut u32>) -> Status {
  env.checked(|env| {
    let s = arg(s)?;
    let result = arg(result)?;
    let s = env.heap_mut().alloc_string(s)?;
    *result = handle(env, Value::String(s))?;
    Ok(())
  })
}

pub fn napi_create_object(env: &mut Env, result: Option<&mut u32>) -> Status {
  env.checked(|env| {
    let result = arg(result)?;
    let obj = env.heap_mut().alloc_object()?;
    *result = handle(env, Value::Object(obj))?;
    Ok(())
  })
}

pub fn napi_set_named_property(
  env: &mut Env,
  object_id: u32,
  utf8name: Option<&str>,
  value_id: u32,
) -> Status {
  env.preamble(|env| {
    let obj = object(env, object_id)?;
    let name = arg(utf8name)?;
    let value = value(env, value_id)?;
    env.heap_mut().set_property(Value::Object(obj), name, value)?;
    Ok(())
  })
}

pub fn napi_get_named_property(
  env: &mut Env,
  object_id: u32,
  utf8name: Option<&str>,
  result: Option<&mut u32>,
) -> Status {
  env.preamble(|env| {
    let obj = object(env, object_id)?;
    let name = arg(utf8name)?;
    let result = arg(result)?;
    let value = env.heap().get_property(Value::Object(obj), name)?;
    *result = handle(env, value)?;
    Ok(())
  })
}

pub fn napi_get_value_double(env: &mut Env, value_id: u32, result: Option<&mut f64>) -> Status {
  env.checked(|env| {
    let Value::Number(n) = value(env, value_id)? else {
      return Err(Status::NumberExpected.into());
    };
    *arg(result)? = n;
    Ok(())
  })
}

/// Copies a string into the native buffer at `buf`.
///
/// With `buf == 0` only the UTF-8 byte length is reported. Otherwise at most `bufsize - 1` bytes
/// are copied (never splitting a character), followed by a NUL, and `result` receives the number
/// of bytes copied.
pub fn napi_get_value_string_utf8(
  env: &mut Env,
  value_id: u32,
  buf: u32,
  bufsize: u32,
  result: Option<&mut u32>,
) -> Status {
  env.checked(|env| {
    let s = string(env, value_id)?;
    let s = env.heap().get_string(s)?.to_owned();
    if buf == 0 {
      *arg(result)? = s.len() as u32;
      return Ok(());
    }
    let mut copied = 0;
    if bufsize > 0 {
      copied = (bufsize as usize - 1).min(s.len());
      while !s.is_char_boundary(copied) {
        copied -= 1;
      }
      let memory = env.memory_mut();
      memory.write(buf, &s.as_bytes()[..copied])?;
      memory.write(buf + copied as u32, &[0])?;
    }
    if let Some(result) = result {
      *result = copied as u32;
    }
    Ok(())
  })
}

pub fn napi_strict_equals(env: &mut Env, lhs: u32, rhs: u32, result: Option<&mut bool>) -> Status {
  env.checked(|env| {
    let lhs = value(env, lhs)?;
    let rhs = value(env, rhs)?;
    *arg(result)? = lhs.strict_equals(rhs, env.heap());
    Ok(())
  })
}

// Misc.

pub fn napi_get_version(env: &mut Env, result: Option<&mut u32>) -> Status {
  env.checked(|env| {
    *arg(result)? = env.options().napi_version;
    Ok(())
  })
}

pub fn emnapi_get_module_object(env: &mut Env, result: Option<&mut u32>) -> Status {
  env.checked(|env| {
    let result = arg(result)?;
    let module = env.module_object().ok_or(Status::GenericFailure)?;
    *result = handle(env, module)?;
    Ok(())
  })
}

pub fn emnapi_get_module_property(
  env: &mut Env,
  utf8name: Option<&str>,
  result: Option<&mut u32>,
) -> Status {
  env.preamble(|env| {
    let name = arg(utf8name)?;
    let result = arg(result)?;
    let module = env.module_object().ok_or(Status::GenericFailure)?;
    let value = env.heap().get_property(module, name)?;
    *result = handle(env, value)?;
    Ok(())
  })
}
