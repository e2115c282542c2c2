use tracing::debug;

use crate::memory::NativeMemory;
use crate::status::Status;
use crate::store::{table_id, Store};
use crate::{Env, EnvOptions, VmError};

table_id!(
  /// Id of an [`Env`] within an [`EnvRegistry`] (`napi_env`).
  EnvId
);

/// Maps env ids to envs.
///
/// A registry is owned by one host thread. Dropping it disposes every env still registered.
#[derive(Debug, Default)]
pub struct EnvRegistry {
  envs: Store<EnvId, Env>,
}

impl EnvRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.envs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.envs.is_empty()
  }

  pub fn create_env(
    &mut self,
    memory: Box<dyn NativeMemory>,
    options: EnvOptions,
  ) -> Result<EnvId, VmError> {
    let env = Env::new(memory, options)?;
    let id = self.envs.insert(env)?;
    self.envs.get_mut(id)?.set_id(id);
    debug!(target: "napi_env::registry", ?id, "register env");
    Ok(id)
  }

  pub fn get(&self, id: EnvId) -> Option<&Env> {
    self.envs.get(id).ok()
  }

  pub fn get_mut(&mut self, id: EnvId) -> Option<&mut Env> {
    self.envs.get_mut(id).ok()
  }

  /// Resolves a raw env id and runs an entry point against it. An unknown id is `invalid_arg`
  /// and touches no env.
  pub fn call(&mut self, raw: u32, f: impl FnOnce(&mut Env) -> Status) -> Status {
    match EnvId::from_raw(raw).and_then(|id| self.envs.get_mut(id).ok()) {
      Some(env) => f(env),
      None => Status::InvalidArg,
    }
  }

  /// Removes the env and tears it down.
  pub fn dispose_env(&mut self, id: EnvId) -> Result<(), VmError> {
    let env = self.envs.remove(id)?;
    env.dispose();
    debug!(target: "napi_env::registry", ?id, "unregister env");
    Ok(())
  }
}

impl Drop for EnvRegistry {
  fn drop(&mut self) {
    for (_, env) in self.envs.drain() {
      env.dispose();
    }
  }
}
