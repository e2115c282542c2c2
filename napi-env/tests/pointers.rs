use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use napi_env::abi;
use napi_env::{
  Env, EnvOptions, LinearMemory, NativeMemory, ScopeKind, Status, TypedArrayType, Value, VmError,
};

/// Native memory that records which blocks are live.
struct Tracked {
  inner: LinearMemory,
  live: Rc<RefCell<BTreeSet<u32>>>,
}

impl NativeMemory for Tracked {
  fn malloc(&mut self, size: u32) -> Option<u32> {
    let ptr = self.inner.malloc(size)?;
    self.live.borrow_mut().insert(ptr);
    Some(ptr)
  }

  fn free(&mut self, ptr: u32) {
    if ptr != 0 {
      assert!(self.live.borrow_mut().remove(&ptr), "double free of {ptr}");
    }
    self.inner.free(ptr);
  }

  fn size(&self) -> u32 {
    self.inner.size()
  }

  fn read(&self, ptr: u32, len: u32) -> Result<&[u8], VmError> {
    self.inner.read(ptr, len)
  }

  fn write(&mut self, ptr: u32, bytes: &[u8]) -> Result<(), VmError> {
    self.inner.write(ptr, bytes)
  }
}

fn tracked_env() -> Result<(Env, Rc<RefCell<BTreeSet<u32>>>), VmError> {
  let live = Rc::new(RefCell::new(BTreeSet::new()));
  let memory = Tracked {
    inner: LinearMemory::new(64 * 1024),
    live: Rc::clone(&live),
  };
  let env = Env::new(Box::new(memory), EnvOptions::default())?;
  Ok((env, live))
}

#[test]
fn views_onto_linear_memory_resolve_to_their_offset() -> Result<(), VmError> {
  let (mut env, live) = tracked_env()?;
  let before = live.borrow().len();

  let memory = env.memory_buffer();
  let view = env
    .heap_mut()
    .alloc_typed_array(TypedArrayType::Uint32, 4, memory, 64)?;
  assert_eq!(env.get_view_pointer(view)?, 64);
  assert_eq!(env.get_array_buffer_pointer(memory)?, 0);
  assert_eq!(env.interned_count(), 0);
  assert_eq!(live.borrow().len(), before, "nothing is mirrored");

  let view = env.add_to_current_scope(Value::Object(view))?;
  let mut kind = TypedArrayType::Int8;
  let mut length = 0;
  let mut data = 0;
  let mut byte_offset = 0;
  assert_eq!(
    abi::napi_get_typedarray_info(
      &mut env,
      view.raw(),
      Some(&mut kind),
      Some(&mut length),
      Some(&mut data),
      None,
      Some(&mut byte_offset),
    ),
    Status::Ok
  );
  assert_eq!(kind, TypedArrayType::Uint32);
  assert_eq!(length, 4);
  assert_eq!(data, 64);
  assert_eq!(byte_offset, 64);
  Ok(())
}

#[test]
fn interned_pointer_is_stable_and_refreshed() -> Result<(), VmError> {
  let (mut env, _live) = tracked_env()?;
  let buffer = env.heap_mut().alloc_array_buffer(4)?;
  env.add_to_current_scope(Value::Object(buffer))?;

  let first = env.get_array_buffer_pointer(buffer)?;
  assert_ne!(first, 0);
  assert_eq!(env.memory().read(first, 4)?, &[0, 0, 0, 0]);

  if let Some(bytes) = env.heap_mut().array_buffer_data_mut(buffer)? {
    bytes.copy_from_slice(&[1, 2, 3, 4]);
  }
  let second = env.get_array_buffer_pointer(buffer)?;
  assert_eq!(first, second);
  assert_eq!(env.memory().read(second, 4)?, &[1, 2, 3, 4]);
  assert_eq!(env.interned_count(), 1);
  Ok(())
}

#[test]
fn view_pointer_mirrors_only_the_viewed_bytes() -> Result<(), VmError> {
  let (mut env, _live) = tracked_env()?;
  let buffer = env.heap_mut().alloc_array_buffer(8)?;
  env.add_to_current_scope(Value::Object(buffer))?;
  if let Some(bytes) = env.heap_mut().array_buffer_data_mut(buffer)? {
    bytes.copy_from_slice(&[0, 1, 2, 3, 4, 5, 6, 7]);
  }
  let view = env
    .heap_mut()
    .alloc_typed_array(TypedArrayType::Int16, 2, buffer, 2)?;
  env.add_to_current_scope(Value::Object(view))?;

  let ptr = env.get_view_pointer(view)?;
  assert_ne!(ptr, 0);
  assert_eq!(env.memory().read(ptr, 4)?, &[2, 3, 4, 5]);
  assert_eq!(env.get_view_pointer(view)?, ptr);
  Ok(())
}

#[test]
fn empty_buffers_have_a_null_pointer() -> Result<(), VmError> {
  let (mut env, _live) = tracked_env()?;
  let mut buffer = 0;
  let mut data = 1;
  assert_eq!(
    abi::napi_create_arraybuffer(&mut env, 0, Some(&mut data), Some(&mut buffer)),
    Status::Ok
  );
  assert_eq!(data, 0);
  let mut byte_length = 1;
  assert_eq!(
    abi::napi_get_arraybuffer_info(&mut env, buffer, None, Some(&mut byte_length)),
    Status::Ok
  );
  assert_eq!(byte_length, 0);
  assert_eq!(env.interned_count(), 0);
  Ok(())
}

#[test]
fn mirrors_are_freed_after_collection() -> Result<(), VmError> {
  let (mut env, live) = tracked_env()?;
  let scope = env.open_scope(ScopeKind::Plain)?;
  let mut buffer = 0;
  let mut data = 0;
  assert_eq!(
    abi::napi_create_arraybuffer(&mut env, 16, Some(&mut data), Some(&mut buffer)),
    Status::Ok
  );
  assert!(live.borrow().contains(&data));

  env.close_scope(scope).unwrap();
  env.collect_garbage();
  // The free is deferred to the next drain point.
  assert!(live.borrow().contains(&data));
  assert_eq!(env.pending_finalizers(), 1);
  assert_eq!(env.drain_finalizers(), 0);
  assert!(!live.borrow().contains(&data));
  assert_eq!(env.interned_count(), 0);
  Ok(())
}

#[test]
fn arraybuffer_info_rejects_other_values() -> Result<(), VmError> {
  let (mut env, _live) = tracked_env()?;
  let mut obj = 0;
  assert_eq!(abi::napi_create_object(&mut env, Some(&mut obj)), Status::Ok);
  let mut len = 0;
  assert_eq!(
    abi::napi_get_arraybuffer_info(&mut env, obj, None, Some(&mut len)),
    Status::InvalidArg
  );
  assert_eq!(
    abi::napi_get_typedarray_info(&mut env, obj, None, None, None, None, None),
    Status::InvalidArg
  );
  assert_eq!(
    abi::napi_create_typedarray(&mut env, 99, 0, obj, 0, Some(&mut len)),
    Status::InvalidArg
  );
  Ok(())
}

#[test]
fn dispose_releases_all_native_allocations() -> Result<(), VmError> {
  fn noop(_env: &mut Env, _data: u32, _hint: u32) {}

  let (mut env, live) = tracked_env()?;
  let buffer = env.heap_mut().alloc_array_buffer(8)?;
  env.add_to_current_scope(Value::Object(buffer))?;
  env.get_array_buffer_pointer(buffer)?;
  env.set_instance_data(0x10, Some((noop, 0)))?;
  assert_eq!(abi::napi_get_undefined(&mut env, None), Status::InvalidArg);
  let mut info = 0;
  assert_eq!(abi::napi_get_last_error_info(&mut env, Some(&mut info)), Status::Ok);
  assert!(live.borrow().len() >= 4);

  env.dispose();
  assert!(live.borrow().is_empty(), "leaked: {:?}", live.borrow());
  Ok(())
}
