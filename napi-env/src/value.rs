use crate::{GcObject, GcString, Heap};

/// A host runtime value.
///
/// Heap-allocated values are represented using GC-managed ids (e.g. [`GcString`]); everything a
/// handle, reference or the exception mailbox holds is one of these.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
  Undefined,
  Null,
  Bool(bool),
  /// IEEE-754 double.
  Number(f64),
  String(GcString),
  Object(GcObject),
}

impl Value {
  /// Returns the object id if this is an object value.
  #[inline]
  pub fn as_object(self) -> Option<GcObject> {
    match self {
      Value::Object(obj) => Some(obj),
      _ => None,
    }
  }

  #[inline]
  pub fn is_object(self) -> bool {
    matches!(self, Value::Object(_))
  }

  /// Strict equality (`===`).
  ///
  /// Strings compare by contents, objects by identity, `NaN` is never equal to itself.
  pub fn strict_equals(self, other: Self, heap: &Heap) -> bool {
    match (self, other) {
      (Value::Undefined, Value::Undefined) => true,
      (Value::Null, Value::Null) => true,
      (Value::Bool(a), Value::Bool(b)) => a == b,
      (Value::Number(a), Value::Number(b)) => a == b,
      (Value::String(a), Value::String(b)) => {
        let (Ok(a), Ok(b)) = (heap.get_string(a), heap.get_string(b)) else {
          return false;
        };
        a == b
      }
      (Value::Object(a), Value::Object(b)) => a == b,
      _ => false,
    }
  }
}

impl From<GcString> for Value {
  fn from(value: GcString) -> Self {
    Self::String(value)
  }
}

impl From<GcObject> for Value {
  fn from(value: GcObject) -> Self {
    Self::Object(value)
  }
}

impl From<bool> for Value {
  fn from(value: bool) -> Self {
    Self::Bool(value)
  }
}

impl From<f64> for Value {
  fn from(value: f64) -> Self {
    Self::Number(value)
  }
}
