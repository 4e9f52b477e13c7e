// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use std::ffi::CString;
use std::fmt;

use crate::errors::UsdtError;

/// Maximum number of arguments one probe may declare (native slot limit).
pub const USDT_ARG_MAX: usize = 32;

/// The native type of one probe argument slot.
///
/// This is a closed set: every probe argument is declared as exactly one
/// of these variants, and marshaling is an exhaustive match over them.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ArgumentType {
    /// A signed 64-bit integer slot.
    Integer,

    /// A pointer-to-bytes slot holding a copied, NUL-terminated UTF-8 string.
    String,

    /// A pointer-to-bytes slot holding a compact JSON encoding of the value.
    Json,
}

impl ArgumentType {
    /// Resolves a textual type tag to an [`ArgumentType`].
    ///
    /// Exactly `"integer"`, `"string"`, and `"json"` are recognized.
    /// Anything else, including case variants like `"Integer"`, fails
    /// with [`UsdtError::InvalidArgumentType`].
    pub fn classify(tag: &str) -> Result<Self, UsdtError> {
        return match tag {
            "integer" => Ok(Self::Integer),
            "string" => Ok(Self::String),
            "json" => Ok(Self::Json),
            _ => Err(UsdtError::InvalidArgumentType(tag.to_string())),
        };
    }

    /// Returns the canonical tag for this type: `"integer"`, `"string"`,
    /// or `"json"`.
    pub const fn as_tag(self) -> &'static str {
        return match self {
            Self::Integer => "integer",
            Self::String => "string",
            Self::Json => "json",
        };
    }

    /// Returns the C type of the native slot this argument occupies, as
    /// a tracer would describe it.
    pub const fn native_ctype(self) -> &'static str {
        return match self {
            Self::Integer => "int64_t",
            Self::String | Self::Json => "char *",
        };
    }
}

impl fmt::Display for ArgumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f.write_str(self.as_tag());
    }
}

/// A language-level value passed to [`Probe::fire`](crate::Probe::fire).
///
/// Integers are carried as `i128` so that out-of-range values survive
/// long enough to be rejected by the marshaler's explicit 64-bit range
/// check instead of being silently truncated at the call site.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// A whole number. Must fit a signed 64-bit slot to be marshaled
    /// into an [`ArgumentType::Integer`] argument.
    Integer(i128),

    /// A text value.
    Text(String),

    /// A structured value for [`ArgumentType::Json`] arguments.
    Json(serde_json::Value),
}

impl Value {
    /// Short description of the variant, used in error messages.
    pub const fn kind(&self) -> &'static str {
        return match self {
            Self::Integer(_) => "an integer",
            Self::Text(_) => "a string",
            Self::Json(_) => "a json value",
        };
    }

    fn to_json(&self) -> Result<serde_json::Value, UsdtError> {
        return match self {
            Self::Integer(v) => {
                if let Ok(v64) = i64::try_from(*v) {
                    Ok(serde_json::Value::from(v64))
                } else if let Ok(v64) = u64::try_from(*v) {
                    Ok(serde_json::Value::from(v64))
                } else {
                    // serde_json numbers top out at 64 bits.
                    Err(UsdtError::IntegerOverflow(*v))
                }
            }
            Self::Text(s) => Ok(serde_json::Value::String(s.clone())),
            Self::Json(v) => Ok(v.clone()),
        };
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        return Self::Integer(v as i128);
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        return Self::Integer(v as i128);
    }
}

impl From<i128> for Value {
    fn from(v: i128) -> Self {
        return Self::Integer(v);
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        return Self::Integer(v as i128);
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        return Self::Integer(v as i128);
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        return Self::Text(v.to_string());
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        return Self::Text(v);
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        return Self::Json(serde_json::Value::Bool(v));
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        return Self::Json(v);
    }
}

/// A marshaled argument, ready for the tracer's native argument slot.
///
/// Transient: slots exist only between `fire` and the facility's
/// `trigger` call; nothing is retained afterwards.
#[derive(Clone, Debug, PartialEq)]
pub enum NativeSlot {
    /// A signed 64-bit value.
    Integer(i64),

    /// A copied, NUL-terminated byte buffer.
    Bytes(CString),
}

/// Converts `value` into the native slot representation required by
/// `ty`, or rejects it.
///
/// `index` is the zero-based argument position, used only for error
/// reporting. This is the lazy half of argument validation: it runs only
/// when a probe is actually observed, so its errors are never seen by
/// unobserved `fire` calls.
pub fn marshal(index: usize, value: &Value, ty: ArgumentType) -> Result<NativeSlot, UsdtError> {
    return match ty {
        ArgumentType::Integer => match value {
            Value::Integer(v) => {
                if let Ok(v64) = i64::try_from(*v) {
                    Ok(NativeSlot::Integer(v64))
                } else {
                    Err(UsdtError::IntegerOverflow(*v))
                }
            }
            other => Err(UsdtError::TypeMismatch {
                index,
                expected: ty,
                actual: other.kind(),
            }),
        },
        ArgumentType::String => match value {
            Value::Text(s) => bytes_slot(index, s),
            other => Err(UsdtError::TypeMismatch {
                index,
                expected: ty,
                actual: other.kind(),
            }),
        },
        ArgumentType::Json => {
            // Any value is fair game for a json slot; it is encoded
            // compactly and then treated as a string slot.
            let encoded = serde_json::to_string(&value.to_json()?)?;
            bytes_slot(index, &encoded)
        }
    };
}

fn bytes_slot(index: usize, s: &str) -> Result<NativeSlot, UsdtError> {
    return match CString::new(s) {
        Ok(bytes) => Ok(NativeSlot::Bytes(bytes)),
        Err(_) => Err(UsdtError::TypeMismatch {
            index,
            expected: ArgumentType::String,
            actual: "text containing an interior NUL",
        }),
    };
}
