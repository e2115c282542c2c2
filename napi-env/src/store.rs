//! Generation-checked id tables.
//!
//! Every table the engine hands ids out of (handles, scopes, references, deferreds, callback
//! infos and the env registry itself) is a [`Store`]. Native code only ever sees the raw `u32`
//! form of these ids, so the encoding is part of the ABI contract:
//!
//! - the low 24 bits select a slot in the store's slot vector,
//! - the high 8 bits are the slot's generation when the id was issued.
//!
//! Generations start at 1 and skip 0 when they wrap, so a live id is never `0` (the ABI `NULL`).
//! Removing an entry bumps the slot's generation, which makes every id previously issued for that
//! slot stale even after the slot is reused.
//!
//! The generation only has 255 usable values. A stale id is rejected for the next 254 reuses of
//! its slot and aliases whatever occupies the slot on the 255th. Handle slots are recycled on every
//! scope cycle, so native code holding a `napi_value` past its scope can eventually read an
//! unrelated value; staleness detection is best effort, not a guarantee.

use core::fmt;
use core::marker::PhantomData;

use crate::VmError;

const INDEX_BITS: u32 = 24;
const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;

/// Maximum number of simultaneously live entries in a single [`Store`].
pub const MAX_STORE_ENTRIES: usize = INDEX_MASK as usize + 1;

/// A raw, packed `{ index: u24, generation: u8 }` table id.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct StoreId(u32);

impl StoreId {
  fn from_parts(index: u32, generation: u8) -> Self {
    debug_assert!(index <= INDEX_MASK);
    debug_assert_ne!(generation, 0);
    Self(index | ((generation as u32) << INDEX_BITS))
  }

  /// Reinterprets a raw ABI value as an id. Returns `None` for `NULL`.
  #[inline]
  pub fn from_raw(raw: u32) -> Option<Self> {
    (raw != 0).then_some(Self(raw))
  }

  /// The raw ABI value of this id.
  #[inline]
  pub fn raw(self) -> u32 {
    self.0
  }

  /// The slot index within the store.
  #[inline]
  pub fn index(self) -> u32 {
    self.0 & INDEX_MASK
  }

  /// The generation of the slot when this id was issued.
  #[inline]
  pub fn generation(self) -> u8 {
    (self.0 >> INDEX_BITS) as u8
  }
}

impl fmt::Debug for StoreId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StoreId")
      .field("index", &self.index())
      .field("generation", &self.generation())
      .finish()
  }
}

/// A typed id backed by a [`StoreId`].
pub trait TableId: Copy {
  fn from_store_id(id: StoreId) -> Self;
  fn store_id(self) -> StoreId;
}

impl TableId for StoreId {
  #[inline]
  fn from_store_id(id: StoreId) -> Self {
    id
  }

  #[inline]
  fn store_id(self) -> StoreId {
    self
  }
}

macro_rules! table_id {
  ($(#[$meta:meta])* $name:ident) => {
    $(#[$meta])*
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
    #[repr(transparent)]
    pub struct $name(pub(crate) $crate::store::StoreId);

    impl $name {
      /// Reinterprets a raw ABI value. Returns `None` for `NULL`.
      #[inline]
      pub fn from_raw(raw: u32) -> Option<Self> {
        $crate::store::StoreId::from_raw(raw).map(Self)
      }

      /// The raw ABI value of this id.
      #[inline]
      pub fn raw(self) -> u32 {
        self.0.raw()
      }
    }

    impl $crate::store::TableId for $name {
      #[inline]
      fn from_store_id(id: $crate::store::StoreId) -> Self {
        Self(id)
      }

      #[inline]
      fn store_id(self) -> $crate::store::StoreId {
        self.0
      }
    }
  };
}

pub(crate) use table_id;

#[derive(Debug)]
struct Slot<T> {
  generation: u8,
  value: Option<T>,
}

/// An id → value table with generation-checked ids.
///
/// Ids are rejected once their entry is removed, until the slot has been reused 255 times (see the
/// module docs).
pub struct Store<I, T> {
  slots: Vec<Slot<T>>,
  free_list: Vec<u32>,
  len: usize,
  _id: PhantomData<I>,
}

impl<I: TableId, T> Default for Store<I, T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<I: TableId, T> Store<I, T> {
  pub fn new() -> Self {
    Self {
      slots: Vec::new(),
      free_list: Vec::new(),
      len: 0,
      _id: PhantomData,
    }
  }

  /// Number of live entries.
  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  /// Inserts `value` and returns a fresh id for it.
  pub fn insert(&mut self, value: T) -> Result<I, VmError> {
    let idx = match self.free_list.pop() {
      Some(idx) => idx as usize,
      None => {
        if self.slots.len() >= MAX_STORE_ENTRIES {
          return Err(VmError::OutOfMemory);
        }
        self.slots.push(Slot {
          generation: 1,
          value: None,
        });
        self.slots.len() - 1
      }
    };

    let slot = &mut self.slots[idx];
    debug_assert!(slot.value.is_none(), "free list returned an occupied slot");
    slot.value = Some(value);
    self.len += 1;
    Ok(I::from_store_id(StoreId::from_parts(idx as u32, slot.generation)))
  }

  fn validate(&self, id: I) -> Option<usize> {
    let id = id.store_id();
    let idx = id.index() as usize;
    let slot = self.slots.get(idx)?;
    if slot.generation != id.generation() || slot.value.is_none() {
      return None;
    }
    Some(idx)
  }

  pub fn contains(&self, id: I) -> bool {
    self.validate(id).is_some()
  }

  pub fn get(&self, id: I) -> Result<&T, VmError> {
    let idx = self.validate(id).ok_or(VmError::InvalidHandle)?;
    self.slots[idx].value.as_ref().ok_or(VmError::InvalidHandle)
  }

  pub fn get_mut(&mut self, id: I) -> Result<&mut T, VmError> {
    let idx = self.validate(id).ok_or(VmError::InvalidHandle)?;
    self.slots[idx].value.as_mut().ok_or(VmError::InvalidHandle)
  }

  /// Removes the entry for `id`, invalidating `id` and every other id issued for its slot.
  pub fn remove(&mut self, id: I) -> Result<T, VmError> {
    let idx = self.validate(id).ok_or(VmError::InvalidHandle)?;
    Ok(self.free_slot(idx))
  }

  fn free_slot(&mut self, idx: usize) -> T {
    let slot = &mut self.slots[idx];
    let value = slot.value.take();
    slot.generation = match slot.generation.wrapping_add(1) {
      0 => 1,
      g => g,
    };
    self.free_list.push(idx as u32);
    self.len -= 1;
    match value {
      Some(value) => value,
      None => unreachable!("free_slot called on an empty slot"),
    }
  }

  /// Removes every entry and returns them in slot order.
  pub fn drain(&mut self) -> Vec<(I, T)> {
    let mut out = Vec::with_capacity(self.len);
    for idx in 0..self.slots.len() {
      if self.slots[idx].value.is_none() {
        continue;
      }
      let id = I::from_store_id(StoreId::from_parts(idx as u32, self.slots[idx].generation));
      let value = self.free_slot(idx);
      out.push((id, value));
    }
    out
  }

  pub fn clear(&mut self) {
    self.drain();
  }

  pub fn iter(&self) -> impl Iterator<Item = (I, &T)> {
    self.slots.iter().enumerate().filter_map(|(idx, slot)| {
      let value = slot.value.as_ref()?;
      Some((
        I::from_store_id(StoreId::from_parts(idx as u32, slot.generation)),
        value,
      ))
    })
  }

  pub fn iter_mut(&mut self) -> impl Iterator<Item = (I, &mut T)> {
    self.slots.iter_mut().enumerate().filter_map(|(idx, slot)| {
      let generation = slot.generation;
      let value = slot.value.as_mut()?;
      Some((
        I::from_store_id(StoreId::from_parts(idx as u32, generation)),
        value,
      ))
    })
  }
}

impl<I, T: fmt::Debug> fmt::Debug for Store<I, T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Store")
      .field("len", &self.len)
      .field("slots", &self.slots.len())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ids_are_never_null() {
    let mut store: Store<StoreId, &str> = Store::new();
    let a = store.insert("a").unwrap();
    let b = store.insert("b").unwrap();
    assert_ne!(a.raw(), 0);
    assert_ne!(b.raw(), 0);
    assert_ne!(a, b);
    assert_eq!(*store.get(a).unwrap(), "a");
    assert_eq!(*store.get(b).unwrap(), "b");
  }

  #[test]
  fn removed_id_goes_stale_when_slot_is_reused() {
    let mut store: Store<StoreId, u32> = Store::new();
    let first = store.insert(1).unwrap();
    assert_eq!(store.remove(first).unwrap(), 1);
    assert!(matches!(store.get(first), Err(VmError::InvalidHandle)));

    let second = store.insert(2).unwrap();
    assert_eq!(first.index(), second.index());
    assert_ne!(first.generation(), second.generation());
    assert!(!store.contains(first));
    assert_eq!(*store.get(second).unwrap(), 2);
  }

  #[test]
  fn generation_skips_zero_on_wrap() {
    let mut store: Store<StoreId, ()> = Store::new();
    let mut last = store.insert(()).unwrap();
    for _ in 0..600 {
      store.remove(last).unwrap();
      last = store.insert(()).unwrap();
      assert_ne!(last.generation(), 0);
      assert_ne!(last.raw(), 0);
    }
    assert_eq!(store.len(), 1);
  }

  #[test]
  fn stale_id_aliases_only_after_a_full_generation_cycle() {
    let mut store: Store<StoreId, u32> = Store::new();
    let stale = store.insert(0).unwrap();
    store.remove(stale).unwrap();
    for n in 1..255 {
      let id = store.insert(n).unwrap();
      assert!(!store.contains(stale), "reuse {n} must not alias");
      store.remove(id).unwrap();
    }
    let wrapped = store.insert(255).unwrap();
    assert_eq!(wrapped, stale);
    assert_eq!(*store.get(stale).unwrap(), 255);
  }

  #[test]
  fn drain_empties_and_invalidates() {
    let mut store: Store<StoreId, u32> = Store::new();
    let ids: Vec<_> = (0..4).map(|v| store.insert(v).unwrap()).collect();
    let drained = store.drain();
    assert_eq!(drained.len(), 4);
    assert!(store.is_empty());
    for id in ids {
      assert!(!store.contains(id));
    }
  }

  #[test]
  fn from_raw_rejects_null() {
    assert!(StoreId::from_raw(0).is_none());
  }
}
