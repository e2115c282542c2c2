use core::fmt;

/// Status code returned by every boundary entry point.
///
/// The discriminants are ABI: native callers compare against the same integer values.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(i32)]
pub enum Status {
  Ok = 0,
  InvalidArg = 1,
  ObjectExpected = 2,
  StringExpected = 3,
  NameExpected = 4,
  FunctionExpected = 5,
  NumberExpected = 6,
  BooleanExpected = 7,
  ArrayExpected = 8,
  GenericFailure = 9,
  PendingException = 10,
  Cancelled = 11,
  EscapeCalledTwice = 12,
  HandleScopeMismatch = 13,
  CallbackScopeMismatch = 14,
  QueueFull = 15,
  Closing = 16,
  BigintExpected = 17,
  DateExpected = 18,
  ArraybufferExpected = 19,
  DetachableArraybufferExpected = 20,
  WouldDeadlock = 21,
  NoExternalBuffersAllowed = 22,
  CannotRunJs = 23,
}

impl Status {
  pub const ALL: [Status; 24] = [
    Status::Ok,
    Status::InvalidArg,
    Status::ObjectExpected,
    Status::StringExpected,
    Status::NameExpected,
    Status::FunctionExpected,
    Status::NumberExpected,
    Status::BooleanExpected,
    Status::ArrayExpected,
    Status::GenericFailure,
    Status::PendingException,
    Status::Cancelled,
    Status::EscapeCalledTwice,
    Status::HandleScopeMismatch,
    Status::CallbackScopeMismatch,
    Status::QueueFull,
    Status::Closing,
    Status::BigintExpected,
    Status::DateExpected,
    Status::ArraybufferExpected,
    Status::DetachableArraybufferExpected,
    Status::WouldDeadlock,
    Status::NoExternalBuffersAllowed,
    Status::CannotRunJs,
  ];

  #[inline]
  pub fn code(self) -> i32 {
    self as i32
  }

  pub fn from_code(code: i32) -> Option<Status> {
    usize::try_from(code)
      .ok()
      .and_then(|idx| Self::ALL.get(idx))
      .copied()
  }

  #[inline]
  pub fn is_ok(self) -> bool {
    self == Status::Ok
  }

  /// The human readable message reported through the extended error info record.
  ///
  /// `Ok` has no message (the record carries a null pointer).
  pub fn message(self) -> Option<&'static str> {
    Some(match self {
      Status::Ok => return None,
      Status::InvalidArg => "Invalid argument",
      Status::ObjectExpected => "An object was expected",
      Status::StringExpected => "A string was expected",
      Status::NameExpected => "A string or symbol was expected",
      Status::FunctionExpected => "A function was expected",
      Status::NumberExpected => "A number was expected",
      Status::BooleanExpected => "A boolean was expected",
      Status::ArrayExpected => "An array was expected",
      Status::GenericFailure => "Unknown failure",
      Status::PendingException => "An exception is pending",
      Status::Cancelled => "The async work item was cancelled",
      Status::EscapeCalledTwice => "napi_escape_handle already called on scope",
      Status::HandleScopeMismatch => "Invalid handle scope usage",
      Status::CallbackScopeMismatch => "Invalid callback scope usage",
      Status::QueueFull => "Thread-safe function queue is full",
      Status::Closing => "Thread-safe function handle is closing",
      Status::BigintExpected => "A bigint was expected",
      Status::DateExpected => "A date was expected",
      Status::ArraybufferExpected => "An arraybuffer was expected",
      Status::DetachableArraybufferExpected => "A detachable arraybuffer was expected",
      Status::WouldDeadlock => "Main thread would deadlock",
      Status::NoExternalBuffersAllowed => "External buffers are not allowed",
      Status::CannotRunJs => "Cannot run JavaScript",
    })
  }
}

impl fmt::Display for Status {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.message() {
      Some(msg) => f.write_str(msg),
      None => f.write_str("ok"),
    }
  }
}

/// The extended error info record, as laid out in native memory.
///
/// Pointers are 32-bit offsets into the env's native memory (`0` is `NULL`).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(C)]
pub struct ExtendedErrorInfo {
  pub error_message: u32,
  pub engine_reserved: u32,
  pub engine_error_code: u32,
  pub error_code: Status,
}

impl ExtendedErrorInfo {
  /// Size of the record in native memory.
  pub const SIZE: u32 = 16;

  pub const OFFSET_ERROR_MESSAGE: u32 = 0;
  pub const OFFSET_ENGINE_RESERVED: u32 = 4;
  pub const OFFSET_ENGINE_ERROR_CODE: u32 = 8;
  pub const OFFSET_ERROR_CODE: u32 = 12;

  pub fn cleared() -> Self {
    Self {
      error_message: 0,
      engine_reserved: 0,
      engine_error_code: 0,
      error_code: Status::Ok,
    }
  }
}
