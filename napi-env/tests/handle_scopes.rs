use napi_env::abi;
use napi_env::{Env, EnvOptions, LinearMemory, ScopeKind, Status, Value, VmError};

fn new_env() -> Result<Env, VmError> {
  Env::new(Box::new(LinearMemory::new(64 * 1024)), EnvOptions::default())
}

#[test]
fn nested_scopes_only_invalidate_their_own_handles() -> Result<(), VmError> {
  let mut env = new_env()?;

  let a = env.open_scope(ScopeKind::Plain)?;
  let h1 = env.add_to_current_scope(Value::Number(42.0))?;

  let b = env.open_scope(ScopeKind::Plain)?;
  let s = env.heap_mut().alloc_string("x")?;
  let h2 = env.add_to_current_scope(Value::String(s))?;
  assert_eq!(env.handle_scope(h2)?, b);

  env.close_scope(b).unwrap();
  assert!(matches!(env.handle_value(h2), Err(VmError::InvalidHandle)));
  assert_eq!(env.handle_value(h1)?, Value::Number(42.0));
  assert_eq!(env.current_scope(), Some(a));

  env.close_scope(a).unwrap();
  assert!(matches!(env.handle_value(h1), Err(VmError::InvalidHandle)));
  assert_eq!(env.current_scope(), None);
  assert_eq!(env.handle_count(), 0);
  Ok(())
}

#[test]
fn ensure_handle_id_is_stable_while_scope_is_open() -> Result<(), VmError> {
  let mut env = new_env()?;
  let outer = env.open_scope(ScopeKind::Plain)?;
  let obj = env.heap_mut().alloc_object()?;
  let keep = env.add_to_current_scope(Value::Object(obj))?;

  let inner = env.open_scope(ScopeKind::Plain)?;
  // The live handle from the outer scope is reused, not duplicated.
  assert_eq!(env.ensure_handle_id(Value::Object(obj))?, keep);
  let n1 = env.ensure_handle_id(Value::Number(1.0))?;
  let n2 = env.ensure_handle_id(Value::Number(1.0))?;
  assert_ne!(n1, n2, "primitives always get a new handle");
  env.close_scope(inner).unwrap();

  assert_eq!(env.ensure_handle_id(Value::Object(obj))?, keep);
  env.close_scope(outer).unwrap();
  Ok(())
}

#[test]
fn ensure_handle_id_creates_new_handle_in_current_scope_after_close() -> Result<(), VmError> {
  let mut env = new_env()?;
  let outer = env.open_scope(ScopeKind::Plain)?;

  let inner = env.open_scope(ScopeKind::Plain)?;
  let obj = env.heap_mut().alloc_object()?;
  let first = env.ensure_handle_id(Value::Object(obj))?;
  assert_eq!(env.handle_scope(first)?, inner);
  // Keep the object reachable independently of the handle.
  let root = env.heap_mut().add_root(Value::Object(obj));
  env.close_scope(inner).unwrap();
  assert!(!env.is_live_handle(first));

  let second = env.ensure_handle_id(Value::Object(obj))?;
  assert_ne!(first, second);
  assert_eq!(env.handle_scope(second)?, outer);
  assert_eq!(env.handle_value(second)?, Value::Object(obj));

  env.heap_mut().remove_root(root);
  env.close_scope(outer).unwrap();
  Ok(())
}

#[test]
fn out_of_order_close_relinks_neighbours() -> Result<(), VmError> {
  let mut env = new_env()?;
  let a = env.open_scope(ScopeKind::Plain)?;
  let b = env.open_scope(ScopeKind::Plain)?;
  let c = env.open_scope(ScopeKind::Plain)?;
  let hb = {
    env.close_scope(c).unwrap();
    let h = env.add_to_current_scope(Value::Bool(true))?;
    let c = env.open_scope(ScopeKind::Plain)?;
    // Close the middle scope while its child is still open.
    env.close_scope(b).unwrap();
    assert_eq!(env.scope_parent(c)?, Some(a));
    assert_eq!(env.scope_child(a)?, Some(c));
    assert_eq!(env.current_scope(), Some(c));
    env.close_scope(c).unwrap();
    h
  };
  assert!(!env.is_live_handle(hb));
  assert_eq!(env.current_scope(), Some(a));
  env.close_scope(a).unwrap();
  assert_eq!(env.open_scope_count(), 0);
  Ok(())
}

#[test]
fn root_scope_survives_close() -> Result<(), VmError> {
  let mut env = new_env()?;
  let root = env.open_scope(ScopeKind::Plain)?;
  assert_eq!(root, env.root_scope());
  let h = env.add_to_current_scope(Value::Null)?;
  env.close_scope(root).unwrap();
  assert!(!env.is_live_handle(h));

  let again = env.open_scope(ScopeKind::Plain)?;
  assert_eq!(again, root);
  let child = env.open_scope(ScopeKind::Plain)?;
  assert_eq!(env.scope_parent(child)?, Some(root));
  env.close_scope(child).unwrap();
  env.close_scope(again).unwrap();
  Ok(())
}

#[test]
fn closed_root_cannot_be_closed_again() -> Result<(), VmError> {
  let mut env = new_env()?;
  let root = env.open_scope(ScopeKind::Plain)?;
  let child = env.open_scope(ScopeKind::Plain)?;
  let h = env.add_to_current_scope(Value::Bool(true))?;

  assert_eq!(abi::napi_close_handle_scope(&mut env, root.raw()), Status::Ok);
  assert_eq!(
    abi::napi_close_handle_scope(&mut env, root.raw()),
    Status::HandleScopeMismatch
  );
  assert_eq!(env.open_scope_count(), 1);
  assert_eq!(env.current_scope(), Some(child));

  assert_eq!(abi::napi_close_handle_scope(&mut env, child.raw()), Status::Ok);
  assert!(!env.is_live_handle(h));
  assert_eq!(env.current_scope(), None);
  assert_eq!(env.open_scope_count(), 0);
  assert_eq!(env.handle_count(), 0);
  Ok(())
}

#[test]
fn values_added_with_no_open_scope_go_to_root() -> Result<(), VmError> {
  let mut env = new_env()?;
  assert_eq!(env.current_scope(), None);
  let h = env.add_to_current_scope(Value::Number(1.0))?;
  assert_eq!(env.handle_scope(h)?, env.root_scope());
  assert_eq!(env.scope_handles(env.root_scope())?, &[h]);
  Ok(())
}

#[test]
fn closing_with_nothing_open_is_a_mismatch() -> Result<(), VmError> {
  let mut env = new_env()?;
  let root = env.root_scope();
  assert_eq!(abi::napi_close_handle_scope(&mut env, root.raw()), Status::HandleScopeMismatch);
  assert_eq!(env.last_error().error_code, Status::HandleScopeMismatch);

  let mut scope = 0;
  assert_eq!(abi::napi_open_handle_scope(&mut env, Some(&mut scope)), Status::Ok);
  let mut inner = 0;
  assert_eq!(abi::napi_open_handle_scope(&mut env, Some(&mut inner)), Status::Ok);
  assert_eq!(abi::napi_close_handle_scope(&mut env, inner), Status::Ok);
  // Closing the same scope twice: the id is stale now.
  assert_eq!(abi::napi_close_handle_scope(&mut env, inner), Status::HandleScopeMismatch);
  assert_eq!(abi::napi_close_handle_scope(&mut env, scope), Status::Ok);
  assert_eq!(abi::napi_close_handle_scope(&mut env, 0), Status::InvalidArg);
  assert_eq!(abi::napi_open_handle_scope(&mut env, None), Status::InvalidArg);
  Ok(())
}

#[test]
fn escape_promotes_one_handle_to_the_parent() -> Result<(), VmError> {
  let mut env = new_env()?;
  let mut outer = 0;
  assert_eq!(abi::napi_open_handle_scope(&mut env, Some(&mut outer)), Status::Ok);
  let mut escapable = 0;
  assert_eq!(
    abi::napi_open_escapable_handle_scope(&mut env, Some(&mut escapable)),
    Status::Ok
  );

  let mut obj = 0;
  assert_eq!(abi::napi_create_object(&mut env, Some(&mut obj)), Status::Ok);
  let mut escaped = 0;
  assert_eq!(abi::napi_escape_handle(&mut env, escapable, obj, Some(&mut escaped)), Status::Ok);
  assert_ne!(escaped, obj);

  let mut again = 0;
  assert_eq!(
    abi::napi_escape_handle(&mut env, escapable, obj, Some(&mut again)),
    Status::EscapeCalledTwice
  );

  assert_eq!(abi::napi_close_escapable_handle_scope(&mut env, escapable), Status::Ok);
  let mut is_error = true;
  assert_eq!(abi::napi_is_error(&mut env, escaped, Some(&mut is_error)), Status::Ok);
  assert!(!is_error);
  assert_eq!(abi::napi_is_error(&mut env, obj, Some(&mut is_error)), Status::InvalidArg);

  assert_eq!(abi::napi_close_handle_scope(&mut env, outer), Status::Ok);
  Ok(())
}

#[test]
fn escapable_scope_opened_first_nests_under_root() -> Result<(), VmError> {
  let mut env = new_env()?;
  let escapable = env.open_scope(ScopeKind::Escapable)?;
  assert_ne!(escapable, env.root_scope());
  assert_eq!(env.scope_parent(escapable)?, Some(env.root_scope()));
  assert_eq!(env.open_scope_count(), 2);

  let h = env.add_to_current_scope(Value::Bool(false))?;
  let escaped = env.escape_handle(escapable, h).unwrap();
  assert_eq!(env.handle_scope(escaped)?, env.root_scope());

  env.close_scope(escapable).unwrap();
  assert_eq!(env.handle_value(escaped)?, Value::Bool(false));
  Ok(())
}

#[test]
fn handles_keep_values_alive_across_collection() -> Result<(), VmError> {
  let mut env = new_env()?;
  let scope = env.open_scope(ScopeKind::Plain)?;
  let obj = env.heap_mut().alloc_object()?;
  let h = env.add_to_current_scope(Value::Object(obj))?;

  env.collect_garbage();
  assert!(env.heap().is_valid_object(obj));
  assert_eq!(env.handle_value(h)?, Value::Object(obj));

  env.close_scope(scope).unwrap();
  env.collect_garbage();
  assert!(!env.heap().is_valid_object(obj));
  Ok(())
}
