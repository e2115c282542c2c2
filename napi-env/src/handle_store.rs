use ahash::AHashMap;

use crate::scope::ScopeId;
use crate::store::{table_id, Store};
use crate::{GcObject, Heap, RootId, Value, VmError};

table_id!(
  /// A transient handle to a host value (`napi_value`), owned by one handle scope.
  HandleId
);

#[derive(Debug)]
struct HandleEntry {
  value: Value,
  scope: ScopeId,
  root: Option<RootId>,
}

/// The env's handle table plus an object → handle identity index.
#[derive(Debug, Default)]
pub(crate) struct HandleStore {
  store: Store<HandleId, HandleEntry>,
  by_object: AHashMap<GcObject, HandleId>,
}

impl HandleStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.store.len()
  }

  /// Creates a handle for `value` owned by `scope`. Heap values are rooted until the handle is
  /// destroyed.
  pub fn push(&mut self, heap: &mut Heap, value: Value, scope: ScopeId) -> Result<HandleId, VmError> {
    if !heap.is_valid_value(value) {
      return Err(VmError::InvalidHandle);
    }
    let root = match value {
      Value::String(_) | Value::Object(_) => Some(heap.add_root(value)),
      _ => None,
    };
    let id = match self.store.insert(HandleEntry { value, scope, root }) {
      Ok(id) => id,
      Err(err) => {
        if let Some(root) = root {
          heap.remove_root(root);
        }
        return Err(err);
      }
    };
    if let Value::Object(obj) = value {
      self.by_object.insert(obj, id);
    }
    Ok(id)
  }

  pub fn get(&self, id: HandleId) -> Result<Value, VmError> {
    Ok(self.store.get(id)?.value)
  }

  pub fn scope_of(&self, id: HandleId) -> Result<ScopeId, VmError> {
    Ok(self.store.get(id)?.scope)
  }

  pub fn contains(&self, id: HandleId) -> bool {
    self.store.contains(id)
  }

  /// The live handle most recently created for `obj`, if any.
  pub fn lookup_object(&self, obj: GcObject) -> Option<HandleId> {
    let id = *self.by_object.get(&obj)?;
    match self.store.get(id) {
      Ok(entry) if entry.value == Value::Object(obj) => Some(id),
      _ => None,
    }
  }

  pub fn remove(&mut self, heap: &mut Heap, id: HandleId) -> Result<(), VmError> {
    let entry = self.store.remove(id)?;
    if let Some(root) = entry.root {
      heap.remove_root(root);
    }
    if let Value::Object(obj) = entry.value {
      if self.by_object.get(&obj) == Some(&id) {
        self.by_object.remove(&obj);
      }
    }
    Ok(())
  }

  pub fn dispose(&mut self, heap: &mut Heap) {
    for (_, entry) in self.store.drain() {
      if let Some(root) = entry.root {
        heap.remove_root(root);
      }
    }
    self.by_object.clear();
  }
}
