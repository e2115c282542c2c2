use tracing::debug;

use crate::handle_store::HandleId;
use crate::memory::NativeMemory;
use crate::reference::{RefId, ReferenceOwnership};
use crate::registry::{EnvId, EnvRegistry};
use crate::scope::ScopeKind;
use crate::{Env, EnvOptions, NapiError, Value, VmError};

/// A module's init function: `(env, exports) -> exports`. Returning `0` keeps the original exports
/// object.
pub type ModuleInit = fn(env: &mut Env, exports: u32) -> u32;

/// A module that finished initialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegisteredModule {
  pub env: EnvId,
  /// A strong (count 1) reference to the module's exports.
  pub exports: RefId,
}

/// Module initialization failed.
///
/// `env` is still registered. A thrown value lives in that env's heap and stays pending in its
/// exception mailbox until the host takes it or disposes the env.
#[derive(Debug, Clone, thiserror::Error)]
#[error("module initialization failed: {error}")]
pub struct ModuleError {
  pub env: Option<EnvId>,
  #[source]
  pub error: VmError,
}

impl From<VmError> for ModuleError {
  fn from(error: VmError) -> Self {
    Self { env: None, error }
  }
}

/// Creates an env for a native module and runs its init function.
pub fn register_module(
  registry: &mut EnvRegistry,
  memory: Box<dyn NativeMemory>,
  options: EnvOptions,
  init: ModuleInit,
) -> Result<RegisteredModule, ModuleError> {
  let id = registry.create_env(memory, options)?;
  let env = registry.get_mut(id).ok_or(VmError::InvalidHandle)?;

  match init_exports(env, init) {
    Ok(exports) => {
      debug!(target: "napi_env::module", env = ?id, "module registered");
      Ok(RegisteredModule { env: id, exports })
    }
    Err(error) => {
      debug!(target: "napi_env::module", env = ?id, %error, "module init failed");
      Err(ModuleError {
        env: Some(id),
        error,
      })
    }
  }
}

fn init_exports(env: &mut Env, init: ModuleInit) -> Result<RefId, VmError> {
  let scope = env.open_scope(ScopeKind::Plain)?;
  let result = run_init(env, init);
  if let Err(VmError::Throw(value)) = &result {
    // Keep the exception rooted until the host takes it.
    env.throw(*value);
  }
  env.close_scope(scope).map_err(|err| match err {
    NapiError::Vm(err) => err,
    NapiError::Status(_) => VmError::InvalidHandle,
  })?;
  result
}

fn run_init(env: &mut Env, init: ModuleInit) -> Result<RefId, VmError> {
  let exports = env.heap_mut().alloc_object()?;
  let exports_handle = env.add_to_current_scope(Value::Object(exports))?;

  let returned = env.call_into_module(|env| init(env, exports_handle.raw()))?;
  let exports = match HandleId::from_raw(returned) {
    Some(handle) => env.handle_value(handle)?,
    None => Value::Object(exports),
  };
  let obj = exports
    .as_object()
    .ok_or(VmError::TypeError("module exports must be an object"))?;

  env.set_module_object(exports);
  env.create_reference(obj, 1, None, ReferenceOwnership::Userland)
}
