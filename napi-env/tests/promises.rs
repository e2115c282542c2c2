use napi_env::abi;
use napi_env::{Env, EnvOptions, LinearMemory, PromiseState, Status, Value, VmError};

fn new_env() -> Result<Env, VmError> {
  Env::new(Box::new(LinearMemory::new(64 * 1024)), EnvOptions::default())
}

#[test]
fn deferred_settles_exactly_once() -> Result<(), VmError> {
  let mut env = new_env()?;
  let mut deferred = 0;
  let mut promise = 0;
  assert_eq!(
    abi::napi_create_promise(&mut env, Some(&mut deferred), Some(&mut promise)),
    Status::Ok
  );
  assert_eq!(env.pending_deferreds(), 1);
  let mut is_promise = false;
  assert_eq!(abi::napi_is_promise(&mut env, promise, Some(&mut is_promise)), Status::Ok);
  assert!(is_promise);

  let mut value = 0;
  assert_eq!(abi::napi_create_int32(&mut env, 42, Some(&mut value)), Status::Ok);
  assert_eq!(abi::napi_resolve_deferred(&mut env, deferred, value), Status::Ok);
  assert_eq!(env.pending_deferreds(), 0);

  let mut other = 0;
  assert_eq!(abi::napi_create_int32(&mut env, 7, Some(&mut other)), Status::Ok);
  assert_eq!(
    abi::napi_reject_deferred(&mut env, deferred, other),
    Status::GenericFailure
  );
  assert!(!env.is_exception_pending());

  let obj = match env.handle_value(napi_env::HandleId::from_raw(promise).unwrap())? {
    Value::Object(obj) => obj,
    other => panic!("expected promise object, got {other:?}"),
  };
  assert_eq!(env.heap().promise_state(obj)?, PromiseState::Fulfilled);
  assert_eq!(env.heap().promise_result(obj)?, Value::Number(42.0));
  Ok(())
}

#[test]
fn pending_promise_is_kept_alive_by_its_deferred() -> Result<(), VmError> {
  let mut env = new_env()?;
  let scope = env.open_scope(napi_env::ScopeKind::Plain)?;
  let (deferred, promise) = env.create_deferred()?;
  env.close_scope(scope).unwrap();

  env.collect_garbage();
  assert!(env.heap().is_valid_object(promise));

  let reason = env.heap_mut().alloc_string("nope")?;
  env.settle_deferred(deferred, PromiseState::Rejected, Value::String(reason)).unwrap();
  env.collect_garbage();
  assert!(!env.heap().is_valid_object(promise));
  Ok(())
}

#[test]
fn settling_refuses_while_exception_pending() -> Result<(), VmError> {
  let mut env = new_env()?;
  let mut deferred = 0;
  let mut promise = 0;
  assert_eq!(
    abi::napi_create_promise(&mut env, Some(&mut deferred), Some(&mut promise)),
    Status::Ok
  );
  env.throw(Value::Null);
  assert_eq!(
    abi::napi_resolve_deferred(&mut env, deferred, promise),
    Status::PendingException
  );
  assert_eq!(env.pending_deferreds(), 1);
  env.take_exception();
  assert_eq!(abi::napi_reject_deferred(&mut env, deferred, promise), Status::Ok);
  Ok(())
}

#[test]
fn create_promise_requires_both_outputs() -> Result<(), VmError> {
  let mut env = new_env()?;
  let mut deferred = 0;
  assert_eq!(
    abi::napi_create_promise(&mut env, Some(&mut deferred), None),
    Status::InvalidArg
  );
  assert_eq!(env.pending_deferreds(), 0);
  assert_eq!(abi::napi_resolve_deferred(&mut env, 0, 0), Status::InvalidArg);
  Ok(())
}
