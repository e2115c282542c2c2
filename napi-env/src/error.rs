use crate::status::Status;
use crate::value::Value;

/// Errors produced by the host runtime model.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VmError {
  /// The heap (or native memory) has exceeded its configured limit.
  #[error("out of memory")]
  OutOfMemory,

  /// An id was used after the underlying entry was freed (or the id is otherwise malformed).
  #[error("invalid handle")]
  InvalidHandle,

  /// A host `TypeError` that has not been materialized as an error object yet.
  #[error("type error: {0}")]
  TypeError(&'static str),

  /// A host `RangeError` that has not been materialized as an error object yet.
  #[error("range error: {0}")]
  RangeError(&'static str),

  /// A thrown host value. This is what the pending-exception mailbox captures.
  #[error("uncaught exception")]
  Throw(Value),
}

/// Errors carried through a boundary entry point before they are mapped onto the two error
/// channels (last-error slot and pending-exception mailbox).
#[derive(Debug, Clone, thiserror::Error)]
pub enum NapiError {
  /// An argument or usage error. Reported through the last-error slot only.
  #[error("{0}")]
  Status(Status),

  /// A host-level failure. Reported through the mailbox as `pending_exception`, except for
  /// [`VmError::InvalidHandle`] and [`VmError::OutOfMemory`] which map to a status.
  #[error(transparent)]
  Vm(#[from] VmError),
}

impl From<Status> for NapiError {
  fn from(status: Status) -> Self {
    NapiError::Status(status)
  }
}
