//! Ids for values owned by the host [`Heap`].
//!
//! These never cross the native boundary. Native code sees handle, reference and deferred ids
//! from the env's [`Store`](crate::Store)s, which in turn hold the ids defined here.

use core::fmt;

use crate::Heap;

/// Slot position and generation of a heap allocation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) struct HeapId {
  index: u32,
  generation: u32,
}

impl HeapId {
  pub(crate) fn from_parts(index: u32, generation: u32) -> Self {
    Self { index, generation }
  }

  pub(crate) fn index(self) -> u32 {
    self.index
  }

  pub(crate) fn generation(self) -> u32 {
    self.generation
  }
}

/// A host object: plain objects, errors, functions, promises, array buffers and typed arrays.
///
/// Holding a `GcObject` does not keep the object alive. Anything that must survive a collection is
/// rooted through a handle, a strong reference or [`Heap::add_root`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct GcObject(pub(crate) HeapId);

impl fmt::Debug for GcObject {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "GcObject({}@{})", self.0.index, self.0.generation)
  }
}

/// A host string.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct GcString(pub(crate) HeapId);

impl fmt::Debug for GcString {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "GcString({}@{})", self.0.index, self.0.generation)
  }
}

/// An object observed without being kept alive.
///
/// Used for references whose count dropped to zero and as the key of the pointer-interning maps.
/// Because the heap is non-moving and slot generations are never reused for a live object, two
/// keys compare equal exactly when they name the same allocation, and a key whose object was
/// collected stops resolving.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(transparent)]
pub struct WeakObject(HeapId);

impl WeakObject {
  pub fn of(obj: GcObject) -> Self {
    Self(obj.0)
  }

  /// The object, if it has not been collected.
  pub fn target(self, heap: &Heap) -> Option<GcObject> {
    let obj = GcObject(self.0);
    heap.is_valid_object(obj).then_some(obj)
  }

  pub fn is_collected(self, heap: &Heap) -> bool {
    self.target(heap).is_none()
  }
}

/// A slot in the heap's persistent root table, held by live handles, strong references, deferreds,
/// in-flight calls and the caught exception.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(transparent)]
pub struct RootId(pub(crate) u32);
