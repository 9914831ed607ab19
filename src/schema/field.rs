//! Comparable columns and conversion of literals into their key domain.

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, PrimitiveDateTime, Time};

use crate::types::{FieldId, ResultType, Value};

/// Comparison rules for character columns.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collation {
    /// Byte-wise comparison.
    #[default]
    Binary,
    /// Case-folded comparison; key images are stored lowercased.
    CaseInsensitive,
}

/// Storage domain of a column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldType {
    /// Two's complement integer of `bits` width.
    Integer {
        /// Width in bits (8, 16, 24, 32 or 64).
        bits: u8,
        /// Whether negative values are excluded.
        #[serde(default)]
        unsigned: bool,
    },
    /// Double precision float.
    Double,
    /// Single precision float.
    Float,
    /// Variable-length string.
    Varchar {
        /// Maximum length in characters.
        max_len: u32,
        /// Column collation.
        #[serde(default)]
        collation: Collation,
    },
    /// Calendar date.
    Date,
    /// Date and time of day.
    DateTime,
    /// Seconds since the epoch, limited to `0..=i32::MAX`.
    Timestamp,
}

/// Outcome of converting a literal into a column's domain.
///
/// Mirrors the warning levels a column store reports: exact, clamped to the
/// domain boundary, lossy, or impossible to represent.
#[derive(Clone, Debug, PartialEq)]
pub enum StoreOutcome {
    /// Stored without loss.
    Exact(Value),
    /// Outside the domain; the boundary value was stored instead.
    OutOfRange(Value),
    /// Stored with loss of precision or length.
    Truncated(Value),
    /// A date-time lost its time of day when stored into a date column.
    TimeTruncated(Value),
    /// The literal has no representation in this domain.
    Incompatible,
    /// NULL stored into a NOT NULL column.
    NullIntoNotNull,
}

impl StoreOutcome {
    /// Numeric warning level: 0 exact, 1 clamped, 2 lossy, 3 time truncated,
    /// negative for NULL into NOT NULL.
    pub fn code(&self) -> i32 {
        match self {
            StoreOutcome::Exact(_) => 0,
            StoreOutcome::OutOfRange(_) => 1,
            StoreOutcome::Truncated(_) | StoreOutcome::Incompatible => 2,
            StoreOutcome::TimeTruncated(_) => 3,
            StoreOutcome::NullIntoNotNull => -1,
        }
    }

    /// The value that ended up in the column, if any.
    pub fn stored(&self) -> Option<&Value> {
        match self {
            StoreOutcome::Exact(v)
            | StoreOutcome::OutOfRange(v)
            | StoreOutcome::Truncated(v)
            | StoreOutcome::TimeTruncated(v) => Some(v),
            StoreOutcome::Incompatible | StoreOutcome::NullIntoNotNull => None,
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, StoreOutcome::Exact(_))
    }
}

/// Column definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Ordinal within the table.
    pub id: FieldId,
    /// Column name.
    pub name: String,
    /// Storage domain.
    #[serde(rename = "type")]
    pub ty: FieldType,
    /// Whether NULL may be stored.
    #[serde(default)]
    pub nullable: bool,
}

/// Timestamp columns store seconds in this closed range.
pub const TIMESTAMP_MAX: i64 = i32::MAX as i64;

impl Field {
    /// Creates a column definition.
    pub fn new(id: FieldId, name: impl Into<String>, ty: FieldType, nullable: bool) -> Self {
        Self {
            id,
            name: name.into(),
            ty,
            nullable,
        }
    }

    pub fn result_type(&self) -> ResultType {
        match self.ty {
            FieldType::Integer { .. } => ResultType::Int,
            FieldType::Double | FieldType::Float => ResultType::Real,
            FieldType::Varchar { .. }
            | FieldType::Date
            | FieldType::DateTime
            | FieldType::Timestamp => ResultType::String,
        }
    }

    /// Type this column is compared in; temporal columns compare as integers.
    pub fn cmp_type(&self) -> ResultType {
        match self.ty {
            FieldType::Integer { .. } => ResultType::Int,
            FieldType::Double | FieldType::Float => ResultType::Real,
            FieldType::Varchar { .. } => ResultType::String,
            FieldType::Date | FieldType::DateTime | FieldType::Timestamp => ResultType::Int,
        }
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(self.ty, FieldType::Integer { unsigned: true, .. })
    }

    pub fn is_string(&self) -> bool {
        matches!(self.ty, FieldType::Varchar { .. })
    }

    pub fn is_timestamp(&self) -> bool {
        matches!(self.ty, FieldType::Timestamp)
    }

    pub fn is_date(&self) -> bool {
        matches!(self.ty, FieldType::Date)
    }

    pub fn collation(&self) -> Collation {
        match self.ty {
            FieldType::Varchar { collation, .. } => collation,
            _ => Collation::Binary,
        }
    }

    /// Maximum length in characters for string columns.
    pub fn char_length(&self) -> Option<u32> {
        match self.ty {
            FieldType::Varchar { max_len, .. } => Some(max_len),
            _ => None,
        }
    }

    /// Bytes one value occupies inside a key image.
    pub fn pack_length(&self) -> u32 {
        match self.ty {
            FieldType::Integer { bits, .. } => u32::from(bits.div_ceil(8)),
            FieldType::Double => 8,
            FieldType::Float => 4,
            FieldType::Varchar { max_len, .. } => max_len + 2,
            FieldType::Date => 3,
            FieldType::DateTime => 8,
            FieldType::Timestamp => 4,
        }
    }

    /// Converts `value` into this column's domain.
    pub fn store(&self, value: &Value) -> StoreOutcome {
        if value.is_null() {
            return if self.nullable {
                StoreOutcome::Exact(Value::Null)
            } else {
                StoreOutcome::NullIntoNotNull
            };
        }
        match &self.ty {
            FieldType::Integer { bits, unsigned } => store_integer(value, *bits, *unsigned),
            FieldType::Double => store_real(value, f64::MAX),
            FieldType::Float => store_real(value, f64::from(f32::MAX)),
            FieldType::Varchar { max_len, collation } => store_string(value, *max_len, *collation),
            FieldType::Date => store_date(value),
            FieldType::DateTime => store_datetime(value),
            FieldType::Timestamp => store_timestamp(value),
        }
    }

    /// Normalized image of a row value for index ordering. Values that cannot
    /// be stored are kept verbatim.
    pub fn key_image(&self, value: &Value) -> Value {
        self.store(value)
            .stored()
            .cloned()
            .unwrap_or_else(|| value.clone())
    }
}

fn integer_bounds(bits: u8, unsigned: bool) -> (i128, i128) {
    let bits = u32::from(bits.clamp(8, 64));
    if unsigned {
        (0, (1i128 << bits) - 1)
    } else {
        (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
    }
}

fn int_value(v: i128, unsigned: bool) -> Value {
    if unsigned {
        Value::UInt(v as u64)
    } else {
        Value::Int(v as i64)
    }
}

fn store_integer(value: &Value, bits: u8, unsigned: bool) -> StoreOutcome {
    let (lo, hi) = integer_bounds(bits, unsigned);
    let clamp = |v: i128| {
        let clamped = v.clamp(lo, hi);
        if clamped == v {
            StoreOutcome::Exact(int_value(v, unsigned))
        } else {
            StoreOutcome::OutOfRange(int_value(clamped, unsigned))
        }
    };
    match value {
        Value::Int(v) => clamp(i128::from(*v)),
        Value::UInt(v) => clamp(i128::from(*v)),
        Value::Real(f) => store_integer_from_real(*f, lo, hi, unsigned),
        Value::Str(s) => {
            let text = s.trim();
            if let Ok(v) = text.parse::<i128>() {
                clamp(v)
            } else if let Ok(f) = text.parse::<f64>() {
                match store_integer_from_real(f, lo, hi, unsigned) {
                    StoreOutcome::Exact(v) => StoreOutcome::Truncated(v),
                    other => other,
                }
            } else {
                StoreOutcome::Incompatible
            }
        }
        Value::Null | Value::Date(_) | Value::DateTime(_) => StoreOutcome::Incompatible,
    }
}

fn store_integer_from_real(f: f64, lo: i128, hi: i128, unsigned: bool) -> StoreOutcome {
    if f.is_nan() {
        return StoreOutcome::Incompatible;
    }
    let rounded = f.round();
    if rounded < lo as f64 {
        StoreOutcome::OutOfRange(int_value(lo, unsigned))
    } else if rounded > hi as f64 {
        StoreOutcome::OutOfRange(int_value(hi, unsigned))
    } else if rounded != f {
        StoreOutcome::Truncated(int_value(rounded as i128, unsigned))
    } else {
        StoreOutcome::Exact(int_value(rounded as i128, unsigned))
    }
}

fn store_real(value: &Value, max: f64) -> StoreOutcome {
    let f = match value {
        Value::Int(v) => *v as f64,
        Value::UInt(v) => *v as f64,
        Value::Real(v) => *v,
        Value::Str(s) => match s.trim().parse::<f64>() {
            Ok(f) => f,
            Err(_) => return StoreOutcome::Incompatible,
        },
        Value::Null | Value::Date(_) | Value::DateTime(_) => return StoreOutcome::Incompatible,
    };
    if f.is_nan() {
        StoreOutcome::Incompatible
    } else if f > max {
        StoreOutcome::OutOfRange(Value::Real(max))
    } else if f < -max {
        StoreOutcome::OutOfRange(Value::Real(-max))
    } else {
        StoreOutcome::Exact(Value::Real(f))
    }
}

fn store_string(value: &Value, max_len: u32, collation: Collation) -> StoreOutcome {
    let text = value.render();
    let image = |s: String| match collation {
        Collation::Binary => Value::Str(s),
        Collation::CaseInsensitive => Value::Str(s.to_lowercase()),
    };
    if text.chars().count() > max_len as usize {
        let cut: String = text.chars().take(max_len as usize).collect();
        StoreOutcome::Truncated(image(cut))
    } else {
        StoreOutcome::Exact(image(text))
    }
}

fn store_date(value: &Value) -> StoreOutcome {
    match value {
        Value::Date(d) => StoreOutcome::Exact(Value::Date(*d)),
        Value::DateTime(dt) if dt.time() == Time::MIDNIGHT => {
            StoreOutcome::Exact(Value::Date(dt.date()))
        }
        Value::DateTime(dt) => StoreOutcome::TimeTruncated(Value::Date(dt.date())),
        Value::Str(s) => match Value::parse_temporal(s) {
            Some(parsed) => store_date(&parsed),
            None => StoreOutcome::Incompatible,
        },
        _ => StoreOutcome::Incompatible,
    }
}

fn store_datetime(value: &Value) -> StoreOutcome {
    match value {
        Value::Date(d) => StoreOutcome::Exact(Value::DateTime(d.midnight())),
        Value::DateTime(dt) => StoreOutcome::Exact(Value::DateTime(*dt)),
        Value::Str(s) => match Value::parse_temporal(s) {
            Some(parsed) => store_datetime(&parsed),
            None => StoreOutcome::Incompatible,
        },
        _ => StoreOutcome::Incompatible,
    }
}

/// Seconds since the epoch for a temporal literal.
pub fn temporal_seconds(value: &Value) -> Option<i64> {
    match value {
        Value::Date(d) => Some(d.midnight().assume_utc().unix_timestamp()),
        Value::DateTime(dt) => Some(dt.assume_utc().unix_timestamp()),
        Value::Str(s) => Value::parse_temporal(s).and_then(|v| temporal_seconds(&v)),
        _ => None,
    }
}

/// Date-time for a number of seconds since the epoch.
pub fn datetime_from_seconds(secs: i64) -> Option<PrimitiveDateTime> {
    OffsetDateTime::from_unix_timestamp(secs)
        .ok()
        .map(|odt| PrimitiveDateTime::new(odt.date(), odt.time()))
}

fn store_timestamp(value: &Value) -> StoreOutcome {
    let secs = match value {
        Value::Int(v) => *v,
        Value::UInt(v) => i64::try_from(*v).unwrap_or(i64::MAX),
        other => match temporal_seconds(other) {
            Some(secs) => secs,
            None => return StoreOutcome::Incompatible,
        },
    };
    if secs < 0 {
        StoreOutcome::OutOfRange(Value::Int(0))
    } else if secs > TIMESTAMP_MAX {
        StoreOutcome::OutOfRange(Value::Int(TIMESTAMP_MAX))
    } else {
        StoreOutcome::Exact(Value::Int(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    fn field(ty: FieldType, nullable: bool) -> Field {
        Field::new(FieldId(0), "c", ty, nullable)
    }

    #[test]
    fn tinyint_clamps_to_domain() {
        let f = field(
            FieldType::Integer {
                bits: 8,
                unsigned: false,
            },
            false,
        );
        assert_eq!(f.store(&Value::Int(300)), StoreOutcome::OutOfRange(Value::Int(127)));
        assert_eq!(f.store(&Value::Int(-300)), StoreOutcome::OutOfRange(Value::Int(-128)));
        assert_eq!(f.store(&Value::Int(12)), StoreOutcome::Exact(Value::Int(12)));
    }

    #[test]
    fn unsigned_rejects_negative() {
        let f = field(
            FieldType::Integer {
                bits: 32,
                unsigned: true,
            },
            false,
        );
        assert_eq!(f.store(&Value::Int(-1)), StoreOutcome::OutOfRange(Value::UInt(0)));
        assert_eq!(f.store(&Value::UInt(7)), StoreOutcome::Exact(Value::UInt(7)));
    }

    #[test]
    fn fractional_into_integer_truncates() {
        let f = field(
            FieldType::Integer {
                bits: 32,
                unsigned: false,
            },
            true,
        );
        assert_eq!(f.store(&Value::Real(1.5)).code(), 2);
        assert_eq!(f.store(&Value::Real(4.0)), StoreOutcome::Exact(Value::Int(4)));
    }

    #[test]
    fn null_into_not_null() {
        let f = field(FieldType::Double, false);
        assert_eq!(f.store(&Value::Null), StoreOutcome::NullIntoNotNull);
        let g = field(FieldType::Double, true);
        assert_eq!(g.store(&Value::Null), StoreOutcome::Exact(Value::Null));
    }

    #[test]
    fn datetime_into_date_cuts_time() {
        let f = field(FieldType::Date, false);
        let out = f.store(&Value::DateTime(datetime!(2007 - 12 - 10 12:34:55)));
        assert_eq!(out, StoreOutcome::TimeTruncated(Value::Date(date!(2007 - 12 - 10))));
        assert_eq!(out.code(), 3);
        let midnight = f.store(&Value::Str("2007-12-10 00:00:00".into()));
        assert_eq!(midnight, StoreOutcome::Exact(Value::Date(date!(2007 - 12 - 10))));
    }

    #[test]
    fn varchar_truncates_and_folds_case() {
        let f = field(
            FieldType::Varchar {
                max_len: 3,
                collation: Collation::CaseInsensitive,
            },
            false,
        );
        assert_eq!(f.store(&Value::from("AB")), StoreOutcome::Exact(Value::from("ab")));
        assert_eq!(f.store(&Value::from("ABCD")), StoreOutcome::Truncated(Value::from("abc")));
    }

    #[test]
    fn timestamp_reports_epoch_overflow() {
        let f = field(FieldType::Timestamp, false);
        let before = f.store(&Value::DateTime(datetime!(1960 - 01 - 01 0:00)));
        assert_eq!(before, StoreOutcome::OutOfRange(Value::Int(0)));
        let after = f.store(&Value::DateTime(datetime!(2999 - 12 - 31 0:00)));
        assert_eq!(after, StoreOutcome::OutOfRange(Value::Int(TIMESTAMP_MAX)));
        let inside = f.store(&Value::DateTime(datetime!(1970 - 01 - 02 0:00)));
        assert_eq!(inside, StoreOutcome::Exact(Value::Int(86_400)));
    }
}
