use tracing::trace;

use crate::{Heap, RootId, Value};

/// The env's pending-exception mailbox. Holds at most one captured host value, rooted until it is
/// extracted.
#[derive(Debug, Default)]
pub(crate) struct TryCatch {
  caught: Option<(Value, RootId)>,
}

impl TryCatch {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn has_caught(&self) -> bool {
    self.caught.is_some()
  }

  /// Captures `value`, replacing anything captured before.
  pub fn set_error(&mut self, heap: &mut Heap, value: Value) {
    if let Some((_, root)) = self.caught.take() {
      heap.remove_root(root);
    }
    let root = heap.add_root(value);
    trace!(target: "napi_env::try_catch", ?value, "capture exception");
    self.caught = Some((value, root));
  }

  /// Empties the mailbox. The returned value is no longer rooted: the caller must root it (e.g.
  /// by putting it in a handle) before allocating.
  pub fn extract_exception(&mut self, heap: &mut Heap) -> Option<Value> {
    let (value, root) = self.caught.take()?;
    heap.remove_root(root);
    Some(value)
  }
}
