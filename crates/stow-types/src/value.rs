use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::guid::Guid;

/// Largest decimal scale (digits after the point).
pub const DECIMAL_MAX_SCALE: u8 = 28;

/// Exclusive upper bound of a decimal mantissa's magnitude (96 bits).
const DECIMAL_MANTISSA_LIMIT: u128 = 1 << 96;

/// A fixed-point decimal: `mantissa / 10^scale`.
///
/// The mantissa carries 96 bits of magnitude and the scale ranges over
/// `0..=28`. Equality is structural, so `1.0` and `1.00` are distinct values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Decimal {
    mantissa: i128,
    scale: u8,
}

impl Decimal {
    /// Build a decimal, checking the mantissa and scale bounds.
    pub fn new(mantissa: i128, scale: u8) -> Result<Self, TypeError> {
        if scale > DECIMAL_MAX_SCALE {
            return Err(TypeError::InvalidDecimal(format!(
                "scale {scale} exceeds {DECIMAL_MAX_SCALE}"
            )));
        }
        if mantissa.unsigned_abs() >= DECIMAL_MANTISSA_LIMIT {
            return Err(TypeError::InvalidDecimal(format!(
                "mantissa {mantissa} exceeds 96 bits"
            )));
        }
        Ok(Self { mantissa, scale })
    }

    pub fn mantissa(&self) -> i128 {
        self.mantissa
    }

    pub fn scale(&self) -> u8 {
        self.scale
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.mantissa.unsigned_abs().to_string();
        let sign = if self.mantissa < 0 { "-" } else { "" };
        let scale = self.scale as usize;
        if scale == 0 {
            return write!(f, "{sign}{digits}");
        }
        let padded = format!("{digits:0>width$}", width = scale + 1);
        let (int, frac) = padded.split_at(padded.len() - scale);
        write!(f, "{sign}{int}.{frac}")
    }
}

impl FromStr for Decimal {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TypeError::InvalidDecimal(s.to_string());
        let (negative, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (int, frac) = body.split_once('.').unwrap_or((body, ""));
        if int.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if !int.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let scale = u8::try_from(frac.len()).map_err(|_| invalid())?;
        let digits = format!("{int}{frac}");
        let magnitude: i128 = digits.parse().map_err(|_| invalid())?;
        Self::new(if negative { -magnitude } else { magnitude }, scale)
    }
}

/// The kinds of value a property can hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Decimal,
    Char,
    String,
    StringArray,
    Bytes,
    DateTime,
    TimeSpan,
    ClassId,
}

impl ValueKind {
    /// Returns `true` for the kinds user property sets may hold.
    ///
    /// `ClassId` is reserved for name-mapping entries.
    pub fn is_user_kind(&self) -> bool {
        !matches!(self, ValueKind::ClassId)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueKind::Bool => "bool",
            ValueKind::I8 => "i8",
            ValueKind::U8 => "u8",
            ValueKind::I16 => "i16",
            ValueKind::U16 => "u16",
            ValueKind::I32 => "i32",
            ValueKind::U32 => "u32",
            ValueKind::I64 => "i64",
            ValueKind::U64 => "u64",
            ValueKind::F32 => "f32",
            ValueKind::F64 => "f64",
            ValueKind::Decimal => "decimal",
            ValueKind::Char => "char",
            ValueKind::String => "string",
            ValueKind::StringArray => "string[]",
            ValueKind::Bytes => "bytes",
            ValueKind::DateTime => "datetime",
            ValueKind::TimeSpan => "timespan",
            ValueKind::ClassId => "clsid",
        };
        f.write_str(s)
    }
}

/// A scalar property value.
///
/// This is a closed set: anything not representable here cannot be stored
/// in a property set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Decimal(Decimal),
    Char(char),
    String(String),
    StringArray(Vec<String>),
    Bytes(Vec<u8>),
    DateTime(DateTime<Utc>),
    TimeSpan(Duration),
    ClassId(Guid),
}

impl PropertyValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            PropertyValue::Bool(_) => ValueKind::Bool,
            PropertyValue::I8(_) => ValueKind::I8,
            PropertyValue::U8(_) => ValueKind::U8,
            PropertyValue::I16(_) => ValueKind::I16,
            PropertyValue::U16(_) => ValueKind::U16,
            PropertyValue::I32(_) => ValueKind::I32,
            PropertyValue::U32(_) => ValueKind::U32,
            PropertyValue::I64(_) => ValueKind::I64,
            PropertyValue::U64(_) => ValueKind::U64,
            PropertyValue::F32(_) => ValueKind::F32,
            PropertyValue::F64(_) => ValueKind::F64,
            PropertyValue::Decimal(_) => ValueKind::Decimal,
            PropertyValue::Char(_) => ValueKind::Char,
            PropertyValue::String(_) => ValueKind::String,
            PropertyValue::StringArray(_) => ValueKind::StringArray,
            PropertyValue::Bytes(_) => ValueKind::Bytes,
            PropertyValue::DateTime(_) => ValueKind::DateTime,
            PropertyValue::TimeSpan(_) => ValueKind::TimeSpan,
            PropertyValue::ClassId(_) => ValueKind::ClassId,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_guid(&self) -> Option<Guid> {
        match self {
            PropertyValue::ClassId(g) => Some(*g),
            _ => None,
        }
    }

    pub fn as_date_time(&self) -> Option<DateTime<Utc>> {
        match self {
            PropertyValue::DateTime(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_time_span(&self) -> Option<Duration> {
        match self {
            PropertyValue::TimeSpan(d) => Some(*d),
            _ => None,
        }
    }

    /// Widen any integer kind to `i64`, if it fits.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            PropertyValue::I8(v) => Some(v.into()),
            PropertyValue::U8(v) => Some(v.into()),
            PropertyValue::I16(v) => Some(v.into()),
            PropertyValue::U16(v) => Some(v.into()),
            PropertyValue::I32(v) => Some(v.into()),
            PropertyValue::U32(v) => Some(v.into()),
            PropertyValue::I64(v) => Some(v),
            PropertyValue::U64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    /// Convert to JSON for display and export.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            PropertyValue::Bool(v) => Value::from(*v),
            PropertyValue::I8(v) => Value::from(*v),
            PropertyValue::U8(v) => Value::from(*v),
            PropertyValue::I16(v) => Value::from(*v),
            PropertyValue::U16(v) => Value::from(*v),
            PropertyValue::I32(v) => Value::from(*v),
            PropertyValue::U32(v) => Value::from(*v),
            PropertyValue::I64(v) => Value::from(*v),
            PropertyValue::U64(v) => Value::from(*v),
            PropertyValue::F32(v) => Value::from(*v),
            PropertyValue::F64(v) => Value::from(*v),
            PropertyValue::Decimal(v) => Value::from(v.to_string()),
            PropertyValue::Char(v) => Value::from(v.to_string()),
            PropertyValue::String(v) => Value::from(v.as_str()),
            PropertyValue::StringArray(v) => Value::from(v.clone()),
            PropertyValue::Bytes(v) => Value::from(v.clone()),
            PropertyValue::DateTime(v) => Value::from(v.to_rfc3339()),
            PropertyValue::TimeSpan(v) => Value::from(v.as_secs_f64()),
            PropertyValue::ClassId(v) => Value::from(v.to_string()),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::String(s) => f.write_str(s),
            PropertyValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            PropertyValue::TimeSpan(d) => write!(f, "{d:?}"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for PropertyValue {
                fn from(v: $ty) -> Self {
                    PropertyValue::$variant(v)
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    Decimal => Decimal,
    char => Char,
    String => String,
    Vec<String> => StringArray,
    Vec<u8> => Bytes,
    DateTime<Utc> => DateTime,
    Duration => TimeSpan,
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_string())
    }
}

impl From<&[u8]> for PropertyValue {
    fn from(v: &[u8]) -> Self {
        PropertyValue::Bytes(v.to_vec())
    }
}

/// Loosely typed input is funnelled through this conversion.
///
/// Integers become `I64` (or `U64` above `i64::MAX`), other numbers `F64`,
/// arrays of strings `StringArray`. Nulls, objects, nested or mixed arrays
/// are rejected.
impl TryFrom<serde_json::Value> for PropertyValue {
    type Error = TypeError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        use serde_json::Value;
        match value {
            Value::Bool(b) => Ok(PropertyValue::Bool(b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(PropertyValue::I64(i))
                } else if let Some(u) = n.as_u64() {
                    Ok(PropertyValue::U64(u))
                } else if let Some(f) = n.as_f64() {
                    Ok(PropertyValue::F64(f))
                } else {
                    Err(TypeError::UnsupportedValue(format!("number {n}")))
                }
            }
            Value::String(s) => Ok(PropertyValue::String(s)),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s),
                    other => Err(TypeError::UnsupportedValue(format!(
                        "array element {other}"
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(PropertyValue::StringArray),
            Value::Null => Err(TypeError::UnsupportedValue("null".into())),
            Value::Object(_) => Err(TypeError::UnsupportedValue("object".into())),
        }
    }
}
