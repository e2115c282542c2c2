//! Native mirrors of heap-owned buffers.
//!
//! Native code can only address its own linear memory. A buffer or view that lives on the host
//! heap is copied into a native allocation the first time its address is requested; the address is
//! cached against the object's weak identity so repeated requests return the same pointer. The
//! allocation is released once the object is collected.

use ahash::AHashMap;
use tracing::trace;

use crate::{Heap, WeakObject};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct InternEntry {
  pub ptr: u32,
  pub len: u32,
}

#[derive(Debug, Default)]
pub(crate) struct PointerInterner {
  buffers: AHashMap<WeakObject, InternEntry>,
  views: AHashMap<WeakObject, InternEntry>,
}

impl PointerInterner {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.buffers.len() + self.views.len()
  }

  pub fn buffer(&self, key: WeakObject) -> Option<InternEntry> {
    self.buffers.get(&key).copied()
  }

  pub fn view(&self, key: WeakObject) -> Option<InternEntry> {
    self.views.get(&key).copied()
  }

  pub fn insert_buffer(&mut self, key: WeakObject, entry: InternEntry) {
    trace!(target: "napi_env::pointer", ?key, ptr = entry.ptr, len = entry.len, "intern buffer");
    self.buffers.insert(key, entry);
  }

  pub fn insert_view(&mut self, key: WeakObject, entry: InternEntry) {
    trace!(target: "napi_env::pointer", ?key, ptr = entry.ptr, len = entry.len, "intern view");
    self.views.insert(key, entry);
  }

  /// Forgets every entry whose object has been collected and returns the native allocations to
  /// release.
  pub fn sweep(&mut self, heap: &Heap) -> Vec<u32> {
    let mut freed = Vec::new();
    for map in [&mut self.buffers, &mut self.views] {
      map.retain(|key, entry| {
        let live = !key.is_collected(heap);
        if !live {
          freed.push(entry.ptr);
        }
        live
      });
    }
    freed
  }

  /// Forgets every entry and returns all native allocations.
  pub fn dispose(&mut self) -> Vec<u32> {
    self
      .buffers
      .drain()
      .chain(self.views.drain())
      .map(|(_, entry)| entry.ptr)
      .collect()
  }
}
