//! Native linear memory.
//!
//! The engine never owns an allocator of its own: it is handed a [`NativeMemory`] when an env is
//! created and uses it for the env control block, instance data records, interned error messages
//! and buffer mirrors. [`LinearMemory`] is a simple implementation for single-module hosts and
//! tests.

use ahash::AHashMap;
use tracing::trace;

use crate::VmError;

/// Native linear memory as seen by the engine. Addresses are 32-bit offsets; `0` is `NULL`.
pub trait NativeMemory {
  /// Allocates `size` bytes. Returns `None` if the allocation cannot be satisfied.
  fn malloc(&mut self, size: u32) -> Option<u32>;

  /// Releases an allocation previously returned by [`NativeMemory::malloc`].
  fn free(&mut self, ptr: u32);

  /// Total addressable size in bytes.
  fn size(&self) -> u32;

  fn read(&self, ptr: u32, len: u32) -> Result<&[u8], VmError>;

  fn write(&mut self, ptr: u32, bytes: &[u8]) -> Result<(), VmError>;

  fn read_u32(&self, ptr: u32) -> Result<u32, VmError> {
    let bytes = self.read(ptr, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
  }

  fn write_u32(&mut self, ptr: u32, value: u32) -> Result<(), VmError> {
    self.write(ptr, &value.to_le_bytes())
  }
}

const ALIGN: u32 = 8;

/// A fixed-size linear memory with a first-fit allocator.
///
/// The first `ALIGN` bytes are reserved so no allocation is ever placed at `NULL`.
#[derive(Debug)]
pub struct LinearMemory {
  bytes: Vec<u8>,
  next: u32,
  live: AHashMap<u32, u32>,
  free_blocks: Vec<(u32, u32)>,
}

impl LinearMemory {
  pub fn new(size: u32) -> Self {
    Self {
      bytes: vec![0; size as usize],
      next: ALIGN,
      live: AHashMap::new(),
      free_blocks: Vec::new(),
    }
  }

  /// Number of allocations that have not been freed.
  pub fn live_allocations(&self) -> usize {
    self.live.len()
  }

  /// Bytes held by allocations that have not been freed (after alignment).
  pub fn allocated_bytes(&self) -> u32 {
    self.live.values().sum()
  }

  /// Returns `true` if `ptr` is the start of a live allocation.
  pub fn is_allocated(&self, ptr: u32) -> bool {
    self.live.contains_key(&ptr)
  }

  fn check_range(&self, ptr: u32, len: u32) -> Result<core::ops::Range<usize>, VmError> {
    let end = ptr
      .checked_add(len)
      .filter(|end| *end as usize <= self.bytes.len())
      .ok_or(VmError::RangeError("memory access out of bounds"))?;
    Ok(ptr as usize..end as usize)
  }
}

impl NativeMemory for LinearMemory {
  fn malloc(&mut self, size: u32) -> Option<u32> {
    let size = size.max(1).checked_next_multiple_of(ALIGN)?;

    let reuse = self
      .free_blocks
      .iter()
      .position(|(_, block_size)| *block_size >= size);
    let ptr = match reuse {
      Some(pos) => {
        let (ptr, block_size) = self.free_blocks.swap_remove(pos);
        if block_size > size {
          self.free_blocks.push((ptr + size, block_size - size));
        }
        ptr
      }
      None => {
        let ptr = self.next;
        let end = ptr.checked_add(size)?;
        if end as usize > self.bytes.len() {
          return None;
        }
        self.next = end;
        ptr
      }
    };

    self.bytes[ptr as usize..(ptr + size) as usize].fill(0);
    self.live.insert(ptr, size);
    trace!(target: "napi_env::memory", ptr, size, "malloc");
    Some(ptr)
  }

  fn free(&mut self, ptr: u32) {
    if ptr == 0 {
      return;
    }
    match self.live.remove(&ptr) {
      Some(size) => {
        trace!(target: "napi_env::memory", ptr, size, "free");
        self.free_blocks.push((ptr, size));
      }
      None => debug_assert!(false, "free of unknown pointer {ptr}"),
    }
  }

  fn size(&self) -> u32 {
    self.bytes.len() as u32
  }

  fn read(&self, ptr: u32, len: u32) -> Result<&[u8], VmError> {
    let range = self.check_range(ptr, len)?;
    Ok(&self.bytes[range])
  }

  fn write(&mut self, ptr: u32, bytes: &[u8]) -> Result<(), VmError> {
    let range = self.check_range(ptr, bytes.len() as u32)?;
    self.bytes[range].copy_from_slice(bytes);
    Ok(())
  }
}
