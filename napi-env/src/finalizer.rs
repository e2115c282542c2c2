//! Pending finalizers.
//!
//! A collection never runs native code directly. Sweeping weak references and pointer-intern
//! entries only queues work here; the queue is run at the next drain point
//! ([`Env::drain_finalizers`](crate::Env::drain_finalizers), env disposal, or right after
//! [`Env::collect_garbage`](crate::Env::collect_garbage) when the env is configured to).

use core::fmt;
use std::collections::VecDeque;

use crate::reference::RefId;
use crate::Env;

/// A native finalize callback: `(env, data, hint)`.
pub type FinalizeCallback = fn(env: &mut Env, data: u32, hint: u32);

/// A finalize callback bound to its arguments.
#[derive(Clone, Copy)]
pub struct Finalizer {
  pub callback: FinalizeCallback,
  pub data: u32,
  pub hint: u32,
}

impl Finalizer {
  pub fn new(callback: FinalizeCallback, data: u32, hint: u32) -> Self {
    Self {
      callback,
      data,
      hint,
    }
  }

  pub(crate) fn call(self, env: &mut Env) {
    (self.callback)(env, self.data, self.hint);
  }
}

impl fmt::Debug for Finalizer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Finalizer")
      .field("data", &self.data)
      .field("hint", &self.hint)
      .finish_non_exhaustive()
  }
}

#[derive(Debug)]
pub(crate) enum PendingFinalizer {
  /// The target of a weak reference was collected.
  Reference {
    reference: RefId,
    finalizer: Finalizer,
  },
  /// An interned buffer or view was collected; its native mirror can be released.
  FreeMemory { ptr: u32 },
}

#[derive(Debug, Default)]
pub(crate) struct FinalizerQueue {
  queue: VecDeque<PendingFinalizer>,
}

impl FinalizerQueue {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.queue.len()
  }

  pub fn push(&mut self, pending: PendingFinalizer) {
    self.queue.push_back(pending);
  }

  pub fn pop(&mut self) -> Option<PendingFinalizer> {
    self.queue.pop_front()
  }

  /// Drops the queued finalizer of `reference`, if any.
  pub fn cancel_reference(&mut self, reference: RefId) {
    self.queue.retain(|pending| {
      !matches!(pending, PendingFinalizer::Reference { reference: r, .. } if *r == reference)
    });
  }
}
