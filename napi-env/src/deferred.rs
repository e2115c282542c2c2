use tracing::trace;

use crate::status::Status;
use crate::store::{table_id, Store};
use crate::{GcObject, Heap, NapiError, PromiseState, RootId, Value, VmError};

table_id!(
  /// The settle capability of a promise created by native code (`napi_deferred`).
  DeferredId
);

#[derive(Debug)]
struct Deferred {
  promise: GcObject,
  root: RootId,
}

#[derive(Debug, Default)]
pub(crate) struct DeferredStore {
  store: Store<DeferredId, Deferred>,
}

impl DeferredStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.store.len()
  }

  /// Allocates a pending promise and the deferred that settles it. The promise stays rooted until
  /// it is settled.
  pub fn create(&mut self, heap: &mut Heap) -> Result<(DeferredId, GcObject), VmError> {
    let promise = heap.alloc_promise()?;
    let root = heap.add_root(Value::Object(promise));
    match self.store.insert(Deferred { promise, root }) {
      Ok(id) => {
        trace!(target: "napi_env::deferred", ?id, "create deferred");
        Ok((id, promise))
      }
      Err(err) => {
        heap.remove_root(root);
        Err(err)
      }
    }
  }

  /// Settles the promise behind `id` and consumes the deferred. Settling a consumed deferred is a
  /// `generic_failure`.
  pub fn settle(
    &mut self,
    heap: &mut Heap,
    id: DeferredId,
    state: PromiseState,
    value: Value,
  ) -> Result<(), NapiError> {
    let deferred = self
      .store
      .remove(id)
      .map_err(|_| NapiError::Status(Status::GenericFailure))?;
    let result = heap.promise_settle(deferred.promise, state, value);
    heap.remove_root(deferred.root);
    trace!(target: "napi_env::deferred", ?id, ?state, "settle deferred");
    Ok(result?)
  }

  pub fn dispose(&mut self, heap: &mut Heap) {
    for (_, deferred) in self.store.drain() {
      heap.remove_root(deferred.root);
    }
  }
}
