//! Diagnostic values carried by [`ContextError`](super::ContextError) and their
//! logfmt encoding.

use std::fmt;

/// A single key or value in an error's diagnostic context.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Uint(u64),
    Float(f64),
    Bool(bool),
    /// Pads an odd-length key/value list. Printed as `(MISSING)`.
    Missing,
}

impl Value {
    /// Returns the string payload, if this is a string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write_logfmt(f, s),
            Value::Int(v) => write!(f, "{v}"),
            Value::Uint(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Missing => f.write_str("(MISSING)"),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Str(v.clone())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

macro_rules! impl_from_int {
    ($variant:ident as $target:ty: $($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::$variant(<$target>::from(v))
                }
            }
        )*
    };
}

impl_from_int!(Int as i64: i8, i16, i32, i64);
impl_from_int!(Uint as u64: u8, u16, u32, u64);

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Uint(v as u64)
    }
}

/// Writes `s` as a logfmt value, quoting it when it contains whitespace,
/// `=`, `"` or control characters.
pub(crate) fn write_logfmt(out: &mut impl fmt::Write, s: &str) -> fmt::Result {
    let needs_quotes = s.chars().any(|c| c <= ' ' || c == '=' || c == '"');
    if !needs_quotes {
        return out.write_str(s);
    }
    out.write_char('"')?;
    for c in s.chars() {
        match c {
            '\\' | '"' => {
                out.write_char('\\')?;
                out.write_char(c)?;
            }
            '\n' => out.write_str("\\n")?,
            '\r' => out.write_str("\\r")?,
            '\t' => out.write_str("\\t")?,
            c if c.is_control() => write!(out, "\\u{:04x}", c as u32)?,
            c => out.write_char(c)?,
        }
    }
    out.write_char('"')
}

/// Builds a flat list of alternating keys and values for an error context.
///
/// ```
/// use corekit_core::{kv, errors::Value};
///
/// let pairs = kv!["component", "codec", "status", 404];
/// assert_eq!(pairs[3], Value::Int(404));
/// ```
#[macro_export]
macro_rules! kv {
    () => {
        ::std::vec::Vec::<$crate::errors::Value>::new()
    };
    ($($item:expr),+ $(,)?) => {
        ::std::vec![$($crate::errors::Value::from($item)),+]
    };
}
