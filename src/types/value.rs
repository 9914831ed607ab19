//! Scalar values flowing through predicates, key images and rows.
//!
//! Values carry a total order so interval endpoints can be compared without
//! consulting the field they belong to. NULL sorts below every other value,
//! matching the way nullable key parts are laid out in an index.
use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::{Date, PrimitiveDateTime};

/// Typed value tagged with explicit type information so scenario files stay
/// unambiguous.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Value {
    /// Null literal.
    Null,
    /// Signed 64-bit integer.
    Int(i64),
    /// Unsigned 64-bit integer.
    UInt(u64),
    /// 64-bit floating point number.
    Real(f64),
    /// UTF-8 string.
    Str(String),
    /// Calendar date, serialized as `YYYY-MM-DD`.
    #[serde(with = "serde_date")]
    Date(Date),
    /// Date and time of day, serialized as `YYYY-MM-DD hh:mm:ss`.
    #[serde(with = "serde_datetime")]
    DateTime(PrimitiveDateTime),
}

/// Result type of an expression, used for comparison compatibility checks.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResultType {
    /// Integer arithmetic.
    Int,
    /// Floating point arithmetic.
    Real,
    /// Character data (temporal literals and NULL included).
    String,
}

/// Returns the type two expressions are compared in.
pub fn item_cmp_type(a: ResultType, b: ResultType) -> ResultType {
    match (a, b) {
        (ResultType::Int, ResultType::Int) => ResultType::Int,
        (ResultType::String, ResultType::String) => ResultType::String,
        _ => ResultType::Real,
    }
}

impl Value {
    /// Returns true for the NULL value.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Result type of this value when used as a comparison operand.
    pub fn result_type(&self) -> ResultType {
        match self {
            Value::Int(_) | Value::UInt(_) => ResultType::Int,
            Value::Real(_) => ResultType::Real,
            Value::Null | Value::Str(_) | Value::Date(_) | Value::DateTime(_) => {
                ResultType::String
            }
        }
    }

    /// Returns the value as a signed integer when it is a negative signed literal.
    pub fn negative_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) if *v < 0 => Some(*v),
            _ => None,
        }
    }

    /// Returns true for a strictly positive numeric value.
    pub fn is_positive(&self) -> bool {
        match self {
            Value::Int(v) => *v > 0,
            Value::UInt(v) => *v > 0,
            Value::Real(v) => *v > 0.0,
            _ => false,
        }
    }

    /// Borrow the string payload.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Text rendering without SQL quoting, used when a value is stored into a
    /// character column.
    pub fn render(&self) -> String {
        match self {
            Value::Null => "NULL".to_owned(),
            Value::Int(v) => v.to_string(),
            Value::UInt(v) => v.to_string(),
            Value::Real(v) => v.to_string(),
            Value::Str(s) => s.clone(),
            Value::Date(d) => serde_date::format(d),
            Value::DateTime(dt) => serde_datetime::format(dt),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::UInt(v) => Some(*v as f64),
            Value::Real(v) => Some(*v),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Int(_) | Value::UInt(_) | Value::Real(_) => 1,
            Value::Date(_) | Value::DateTime(_) => 2,
            Value::Str(_) => 3,
        }
    }

    /// Parses `YYYY-MM-DD` or `YYYY-MM-DD hh:mm:ss`.
    pub fn parse_temporal(text: &str) -> Option<Value> {
        let text = text.trim();
        if let Ok(dt) = PrimitiveDateTime::parse(
            text,
            format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        ) {
            return Some(Value::DateTime(dt));
        }
        Date::parse(text, format_description!("[year]-[month]-[day]"))
            .ok()
            .map(Value::Date)
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        use Value::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Int(a), Int(b)) => a.cmp(b),
            (UInt(a), UInt(b)) => a.cmp(b),
            (Int(a), UInt(b)) => {
                if *a < 0 {
                    Ordering::Less
                } else {
                    (*a as u64).cmp(b)
                }
            }
            (UInt(_), Int(_)) => other.cmp(self).reverse(),
            (Real(a), Real(b)) => a.total_cmp(b),
            (Real(_), Int(_) | UInt(_)) | (Int(_) | UInt(_), Real(_)) => {
                match (self.as_f64(), other.as_f64()) {
                    (Some(a), Some(b)) => a.total_cmp(&b),
                    _ => Ordering::Equal,
                }
            }
            (Str(a), Str(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (DateTime(a), DateTime(b)) => a.cmp(b),
            (Date(a), DateTime(b)) => a.midnight().cmp(b),
            (DateTime(a), Date(b)) => a.cmp(&b.midnight()),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Int(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Real(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "'{s}'"),
            Value::Date(d) => write!(f, "'{}'", serde_date::format(d)),
            Value::DateTime(dt) => write!(f, "'{}'", serde_datetime::format(dt)),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::UInt(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<Date> for Value {
    fn from(value: Date) -> Self {
        Value::Date(value)
    }
}

impl From<PrimitiveDateTime> for Value {
    fn from(value: PrimitiveDateTime) -> Self {
        Value::DateTime(value)
    }
}

mod serde_date {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use time::macros::format_description;
    use time::Date;

    pub fn format(date: &Date) -> String {
        date.format(format_description!("[year]-[month]-[day]"))
            .unwrap_or_else(|_| date.to_string())
    }

    pub fn serialize<S: Serializer>(date: &Date, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(date))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Date, D::Error> {
        let text = String::deserialize(deserializer)?;
        Date::parse(&text, format_description!("[year]-[month]-[day]"))
            .map_err(|err| de::Error::custom(format!("invalid date literal '{text}': {err}")))
    }
}

mod serde_datetime {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use time::macros::format_description;
    use time::PrimitiveDateTime;

    pub fn format(dt: &PrimitiveDateTime) -> String {
        dt.format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .unwrap_or_else(|_| dt.to_string())
    }

    pub fn serialize<S: Serializer>(
        dt: &PrimitiveDateTime,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(dt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<PrimitiveDateTime, D::Error> {
        let text = String::deserialize(deserializer)?;
        PrimitiveDateTime::parse(
            &text,
            format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        )
        .map_err(|err| de::Error::custom(format!("invalid datetime literal '{text}': {err}")))
    }
}
