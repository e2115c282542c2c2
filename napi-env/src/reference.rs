//! Persistent references.
//!
//! A reference outlives the handle scope it was created in. While its count is positive the target
//! is a persistent heap root; at count zero only a [`WeakObject`] is kept and the target may be
//! collected, which empties the reference and queues its finalizer.

use tracing::trace;

use crate::finalizer::{FinalizeCallback, Finalizer};
use crate::status::Status;
use crate::store::{table_id, Store};
use crate::{GcObject, Heap, NapiError, RootId, Value, VmError, WeakObject};

table_id!(
  /// A persistent reference (`napi_ref`).
  RefId
);

/// Who is responsible for deleting a reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReferenceOwnership {
  /// Created by native code; stays in the table until explicitly deleted.
  Userland,
  /// Created by the engine (e.g. for `napi_add_finalizer`); removed once its finalizer has run.
  Runtime,
}

#[derive(Debug)]
enum Target {
  Strong { obj: GcObject, root: RootId },
  Weak(WeakObject),
  Collected,
}

#[derive(Debug)]
struct Reference {
  target: Target,
  count: u32,
  finalizer: Option<Finalizer>,
  ownership: ReferenceOwnership,
}

/// A reference whose target was found collected by [`RefStore::sweep`].
#[derive(Debug)]
pub(crate) struct Collected {
  pub reference: RefId,
  pub finalizer: Option<Finalizer>,
  pub ownership: ReferenceOwnership,
}

#[derive(Debug, Default)]
pub(crate) struct RefStore {
  store: Store<RefId, Reference>,
}

impl RefStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.store.len()
  }

  /// Creates a reference to `obj`. A finalizer, if given, is called with the new reference's id as
  /// its data.
  pub fn create(
    &mut self,
    heap: &mut Heap,
    obj: GcObject,
    count: u32,
    finalize: Option<(FinalizeCallback, u32)>,
    ownership: ReferenceOwnership,
  ) -> Result<RefId, VmError> {
    if !heap.is_valid_object(obj) {
      return Err(VmError::InvalidHandle);
    }
    let id = self.store.insert(Reference {
      target: Target::Weak(WeakObject::of(obj)),
      count,
      finalizer: None,
      ownership,
    })?;
    let r = self.store.get_mut(id)?;
    if count > 0 {
      r.target = Target::Strong {
        obj,
        root: heap.add_root(Value::Object(obj)),
      };
    }
    if let Some((callback, hint)) = finalize {
      r.finalizer = Some(Finalizer::new(callback, id.raw(), hint));
    }
    trace!(target: "napi_env::reference", ?id, count, ?ownership, "create reference");
    Ok(id)
  }

  /// Increments the count, promoting a weak reference back to a root. Returns the new count.
  ///
  /// A reference whose target has been collected keeps its count.
  pub fn ref_(&mut self, heap: &mut Heap, id: RefId) -> Result<u32, VmError> {
    let r = self.store.get_mut(id)?;
    if let Target::Weak(weak) = r.target {
      r.target = match weak.target(heap) {
        Some(obj) => Target::Strong {
          obj,
          root: heap.add_root(Value::Object(obj)),
        },
        None => Target::Collected,
      };
    }
    if let Target::Collected = r.target {
      // Nothing left to keep alive.
      return Ok(r.count);
    }
    r.count += 1;
    trace!(target: "napi_env::reference", ?id, count = r.count, "ref");
    Ok(r.count)
  }

  /// Decrements the count, demoting to a weak reference at zero. Returns the new count.
  pub fn unref(&mut self, heap: &mut Heap, id: RefId) -> Result<u32, NapiError> {
    let r = self.store.get_mut(id)?;
    if r.count == 0 {
      return Err(Status::GenericFailure.into());
    }
    r.count -= 1;
    if r.count == 0 {
      if let Target::Strong { obj, root } = r.target {
        heap.remove_root(root);
        r.target = Target::Weak(WeakObject::of(obj));
      }
    }
    trace!(target: "napi_env::reference", ?id, count = r.count, "unref");
    Ok(r.count)
  }

  pub fn set_finalizer(&mut self, id: RefId, finalizer: Finalizer) -> Result<(), VmError> {
    self.store.get_mut(id)?.finalizer = Some(finalizer);
    Ok(())
  }

  pub fn count(&self, id: RefId) -> Result<u32, VmError> {
    Ok(self.store.get(id)?.count)
  }

  /// The referenced object, or `None` once it has been collected.
  pub fn get(&self, heap: &Heap, id: RefId) -> Result<Option<GcObject>, VmError> {
    Ok(match self.store.get(id)?.target {
      Target::Strong { obj, .. } => Some(obj),
      Target::Weak(weak) => weak.target(heap),
      Target::Collected => None,
    })
  }

  pub fn ownership(&self, id: RefId) -> Result<ReferenceOwnership, VmError> {
    Ok(self.store.get(id)?.ownership)
  }

  pub fn delete(&mut self, heap: &mut Heap, id: RefId) -> Result<(), VmError> {
    let r = self.store.remove(id)?;
    if let Target::Strong { root, .. } = r.target {
      heap.remove_root(root);
    }
    trace!(target: "napi_env::reference", ?id, "delete reference");
    Ok(())
  }

  /// Empties every weak reference whose target no longer exists and hands back their finalizers.
  /// Each finalizer is returned at most once.
  pub fn sweep(&mut self, heap: &Heap) -> Vec<Collected> {
    let mut collected = Vec::new();
    for (id, r) in self.store.iter_mut() {
      let Target::Weak(weak) = r.target else {
        continue;
      };
      if !weak.is_collected(heap) {
        continue;
      }
      r.target = Target::Collected;
      collected.push(Collected {
        reference: id,
        finalizer: r.finalizer.take(),
        ownership: r.ownership,
      });
    }
    collected
  }

  /// Removes every reference and returns the finalizers that never ran.
  pub fn dispose(&mut self, heap: &mut Heap) -> Vec<Finalizer> {
    let mut finalizers = Vec::new();
    for (_, r) in self.store.drain() {
      if let Target::Strong { root, .. } = r.target {
        heap.remove_root(root);
      }
      finalizers.extend(r.finalizer);
    }
    finalizers
  }
}
