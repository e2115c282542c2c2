use crate::store::{table_id, Store};
use crate::{Heap, RootId, Value, VmError};

table_id!(
  /// An in-flight host → native call (`napi_callback_info`).
  CallbackInfoId
);

/// Arguments of an in-flight native call.
#[derive(Debug)]
pub struct CallbackInfo {
  pub this: Value,
  pub args: Vec<Value>,
  /// The data pointer the function was created with.
  pub data: u32,
  /// `Some` only for construct calls.
  pub new_target: Option<Value>,
}

#[derive(Debug)]
struct Entry {
  info: CallbackInfo,
  roots: Vec<RootId>,
}

#[derive(Debug, Default)]
pub(crate) struct CallbackInfoStore {
  store: Store<CallbackInfoId, Entry>,
}

impl CallbackInfoStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.store.len()
  }

  /// Records a call. The receiver, arguments and new target are rooted until [`Self::remove`].
  pub fn push(&mut self, heap: &mut Heap, info: CallbackInfo) -> Result<CallbackInfoId, VmError> {
    let id = self.store.insert(Entry {
      info,
      roots: Vec::new(),
    })?;
    let entry = self.store.get_mut(id)?;
    let info = &entry.info;
    entry.roots = core::iter::once(info.this)
      .chain(info.args.iter().copied())
      .chain(info.new_target)
      .filter(|v| matches!(v, Value::String(_) | Value::Object(_)))
      .map(|v| heap.add_root(v))
      .collect();
    Ok(id)
  }

  pub fn get(&self, id: CallbackInfoId) -> Result<&CallbackInfo, VmError> {
    Ok(&self.store.get(id)?.info)
  }

  pub fn remove(&mut self, heap: &mut Heap, id: CallbackInfoId) -> Result<CallbackInfo, VmError> {
    let entry = self.store.remove(id)?;
    for root in entry.roots {
      heap.remove_root(root);
    }
    Ok(entry.info)
  }

  pub fn dispose(&mut self, heap: &mut Heap) {
    for (_, entry) in self.store.drain() {
      for root in entry.roots {
        heap.remove_root(root);
      }
    }
  }
}
