use napi_env::abi;
use napi_env::{
  Env, EnvOptions, ErrorKind, ExtendedErrorInfo, LinearMemory, NativeMemory, Status, Value,
  VmError,
};

fn new_env() -> Result<Env, VmError> {
  Env::new(Box::new(LinearMemory::new(64 * 1024)), EnvOptions::default())
}

fn read_c_string(memory: &dyn NativeMemory, ptr: u32) -> String {
  let mut bytes = Vec::new();
  let mut at = ptr;
  loop {
    let byte = memory.read(at, 1).unwrap()[0];
    if byte == 0 {
      break;
    }
    bytes.push(byte);
    at += 1;
  }
  String::from_utf8(bytes).unwrap()
}

#[test]
fn last_error_is_recorded_in_native_memory() -> Result<(), VmError> {
  let mut env = new_env()?;
  assert_eq!(abi::napi_get_undefined(&mut env, None), Status::InvalidArg);

  let mut info_ptr = 0;
  assert_eq!(abi::napi_get_last_error_info(&mut env, Some(&mut info_ptr)), Status::Ok);
  assert_eq!(info_ptr, env.control_block());

  let memory = env.memory();
  let code = memory.read_u32(info_ptr + ExtendedErrorInfo::OFFSET_ERROR_CODE)?;
  assert_eq!(code, Status::InvalidArg.code() as u32);
  let message = memory.read_u32(info_ptr + ExtendedErrorInfo::OFFSET_ERROR_MESSAGE)?;
  assert_ne!(message, 0);
  assert_eq!(read_c_string(memory, message), "Invalid argument");
  Ok(())
}

#[test]
fn message_pointer_is_interned_per_status() -> Result<(), VmError> {
  let mut env = new_env()?;
  assert_eq!(abi::napi_get_boolean(&mut env, true, None), Status::InvalidArg);
  let first = env.last_error_info().error_message;
  assert_eq!(abi::napi_get_null(&mut env, None), Status::InvalidArg);
  let second = env.last_error_info().error_message;
  assert_eq!(first, second);

  let mut scope = 0;
  assert_eq!(abi::napi_close_handle_scope(&mut env, 0), Status::InvalidArg);
  assert_eq!(abi::napi_open_handle_scope(&mut env, Some(&mut scope)), Status::Ok);
  assert_eq!(abi::napi_close_handle_scope(&mut env, scope), Status::Ok);
  assert_eq!(abi::napi_close_handle_scope(&mut env, scope), Status::HandleScopeMismatch);
  let mismatch = env.last_error_info();
  assert_eq!(mismatch.error_code, Status::HandleScopeMismatch);
  assert_ne!(mismatch.error_message, first);
  Ok(())
}

#[test]
fn successful_call_clears_last_error() -> Result<(), VmError> {
  let mut env = new_env()?;
  assert_eq!(abi::napi_get_undefined(&mut env, None), Status::InvalidArg);
  let mut block = 0;
  assert_eq!(abi::napi_get_last_error_info(&mut env, Some(&mut block)), Status::Ok);
  assert_ne!(env.last_error().error_message, 0);

  let mut undefined = 0;
  assert_eq!(abi::napi_get_undefined(&mut env, Some(&mut undefined)), Status::Ok);
  // The whole record is reset in native memory, not just the code.
  let stored = env.last_error();
  assert_eq!(stored.error_code, Status::Ok);
  assert_eq!(stored.error_message, 0);
  assert_eq!(env.memory().read_u32(block)?, 0);

  let info = env.last_error_info();
  assert_eq!(info.error_code, Status::Ok);
  assert_eq!(info.error_message, 0);
  assert_eq!(info.engine_error_code, 0);
  Ok(())
}

#[test]
fn get_last_error_info_requires_result() -> Result<(), VmError> {
  let mut env = new_env()?;
  assert_eq!(abi::napi_get_last_error_info(&mut env, None), Status::InvalidArg);
  assert_eq!(env.last_error().error_code, Status::InvalidArg);
  Ok(())
}

#[test]
fn throw_error_fills_the_mailbox_once() -> Result<(), VmError> {
  let mut env = new_env()?;
  assert_eq!(
    abi::napi_throw_error(&mut env, Some("ERR_X"), Some("boom")),
    Status::Ok
  );
  let mut pending = false;
  assert_eq!(abi::napi_is_exception_pending(&mut env, Some(&mut pending)), Status::Ok);
  assert!(pending);

  // Host-reaching entry points refuse to start.
  assert_eq!(
    abi::napi_throw_error(&mut env, None, Some("second")),
    Status::PendingException
  );
  assert_eq!(env.last_error().error_code, Status::PendingException);

  let mut exception = 0;
  assert_eq!(
    abi::napi_get_and_clear_last_exception(&mut env, Some(&mut exception)),
    Status::Ok
  );
  let mut is_error = false;
  assert_eq!(abi::napi_is_error(&mut env, exception, Some(&mut is_error)), Status::Ok);
  assert!(is_error);

  let mut code = 0;
  assert_eq!(
    abi::napi_get_named_property(&mut env, exception, Some("code"), Some(&mut code)),
    Status::Ok
  );
  let mut message = 0;
  assert_eq!(
    abi::napi_get_named_property(&mut env, exception, Some("message"), Some(&mut message)),
    Status::Ok
  );
  let mut expected = 0;
  assert_eq!(abi::napi_create_string_utf8(&mut env, Some("boom"), Some(&mut expected)), Status::Ok);
  let mut equal = false;
  assert_eq!(abi::napi_strict_equals(&mut env, message, expected, Some(&mut equal)), Status::Ok);
  assert!(equal);
  assert_eq!(abi::napi_create_string_utf8(&mut env, Some("ERR_X"), Some(&mut expected)), Status::Ok);
  assert_eq!(abi::napi_strict_equals(&mut env, code, expected, Some(&mut equal)), Status::Ok);
  assert!(equal);

  assert_eq!(abi::napi_is_exception_pending(&mut env, Some(&mut pending)), Status::Ok);
  assert!(!pending);
  Ok(())
}

#[test]
fn clearing_an_empty_mailbox_yields_undefined() -> Result<(), VmError> {
  let mut env = new_env()?;
  let mut exception = 0;
  assert_eq!(
    abi::napi_get_and_clear_last_exception(&mut env, Some(&mut exception)),
    Status::Ok
  );
  assert_ne!(exception, 0);
  let mut undefined = 0;
  assert_eq!(abi::napi_get_undefined(&mut env, Some(&mut undefined)), Status::Ok);
  let mut equal = false;
  assert_eq!(
    abi::napi_strict_equals(&mut env, exception, undefined, Some(&mut equal)),
    Status::Ok
  );
  assert!(equal);
  Ok(())
}

#[test]
fn try_catch_extraction_is_idempotent() -> Result<(), VmError> {
  let mut env = new_env()?;
  env.throw(Value::Number(3.0));
  assert!(env.is_exception_pending());
  assert_eq!(env.take_exception(), Some(Value::Number(3.0)));
  assert_eq!(env.take_exception(), None);
  assert!(!env.is_exception_pending());
  Ok(())
}

#[test]
fn later_throw_replaces_pending_exception() -> Result<(), VmError> {
  let mut env = new_env()?;
  let s = env.heap_mut().alloc_string("first")?;
  env.throw(Value::String(s));
  env.throw(Value::Bool(true));
  env.collect_garbage();
  assert_eq!(env.take_exception(), Some(Value::Bool(true)));
  Ok(())
}

#[test]
fn pending_exception_survives_collection() -> Result<(), VmError> {
  let mut env = new_env()?;
  let err = env.heap_mut().alloc_error_with_message(ErrorKind::Error, "kept")?;
  env.throw(Value::Object(err));
  env.collect_garbage();
  let taken = env.take_exception().expect("exception stays pending");
  assert_eq!(env.heap().error_message(taken), Some("kept"));
  Ok(())
}

#[test]
fn host_type_error_becomes_pending_exception() -> Result<(), VmError> {
  let mut env = new_env()?;
  let mut undefined = 0;
  assert_eq!(abi::napi_get_undefined(&mut env, Some(&mut undefined)), Status::Ok);
  let mut result = 0;
  // Property reads from a non-object are rejected before reaching the host.
  assert_eq!(
    abi::napi_get_named_property(&mut env, undefined, Some("x"), Some(&mut result)),
    Status::ObjectExpected
  );
  assert!(!env.is_exception_pending());

  let mut buffer = 0;
  assert_eq!(abi::napi_create_arraybuffer(&mut env, 3, None, Some(&mut buffer)), Status::Ok);
  // Out of range view: a RangeError is thrown and captured.
  assert_eq!(
    abi::napi_create_typedarray(&mut env, 1, 4, buffer, 0, Some(&mut result)),
    Status::PendingException
  );
  let exception = env.take_exception().expect("range error pending");
  assert_eq!(env.heap().error_kind(exception), Some(ErrorKind::RangeError));
  Ok(())
}

#[test]
fn create_error_requires_string_message() -> Result<(), VmError> {
  let mut env = new_env()?;
  let mut num = 0;
  assert_eq!(abi::napi_create_int32(&mut env, 5, Some(&mut num)), Status::Ok);
  let mut err = 0;
  assert_eq!(abi::napi_create_error(&mut env, 0, num, Some(&mut err)), Status::StringExpected);

  let mut msg = 0;
  assert_eq!(abi::napi_create_string_utf8(&mut env, Some("bad"), Some(&mut msg)), Status::Ok);
  assert_eq!(abi::napi_create_type_error(&mut env, 0, msg, Some(&mut err)), Status::Ok);
  let mut is_error = false;
  assert_eq!(abi::napi_is_error(&mut env, err, Some(&mut is_error)), Status::Ok);
  assert!(is_error);

  // Creating an error does not throw it.
  assert!(!env.is_exception_pending());
  assert_eq!(abi::napi_throw(&mut env, err), Status::Ok);
  let thrown = env.take_exception().expect("thrown");
  assert_eq!(env.heap().error_kind(thrown), Some(ErrorKind::TypeError));
  assert_eq!(env.heap().error_message(thrown), Some("bad"));
  Ok(())
}
