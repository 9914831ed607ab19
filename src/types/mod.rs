//! Identifiers, bitsets and the error type shared by every layer.
#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod value;

pub use value::{item_cmp_type, ResultType, Value};

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, RangeError>;

/// Errors surfaced to callers of the optimizer and its iterators.
///
/// Degenerate estimates, impossible predicates and unusable indexes are not
/// errors: they show up as "no plan" or as an empty result instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RangeError {
    /// Caller supplied malformed input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A predicate or query shape names a column the table does not have.
    #[error("unknown field: {0}")]
    UnknownField(String),
    /// Index ordinal out of range for the table.
    #[error("unknown index #{0}")]
    UnknownIndex(u16),
    /// The storage engine failed while serving a scan.
    #[error("storage error: {0}")]
    Storage(String),
    /// Iterator used before `init` or after a failed `init`.
    #[error("iterator not initialized")]
    NotInitialized,
    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
    /// A scenario description was rejected.
    #[error("scenario error: {0}")]
    Scenario(String),
}

/// Column ordinal within a table.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldId(pub u16);

/// Index ordinal within a table, in declaration order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexId(pub u16);

/// Storage-engine row identifier. Ordering follows the engine's row order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowId(pub u64);

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "k{}", self.0)
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maximum number of indexes per table.
pub const MAX_KEY: usize = 64;

/// Maximum number of columns per table.
pub const MAX_FIELDS: usize = 128;

/// Set of index ordinals.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct KeyMap(u64);

impl KeyMap {
    /// Empty set.
    pub const fn new() -> Self {
        Self(0)
    }

    /// Set containing indexes `0..n`.
    pub fn prefix(n: usize) -> Self {
        assert!(n <= MAX_KEY, "too many indexes: {n}");
        if n == MAX_KEY {
            Self(u64::MAX)
        } else {
            Self((1u64 << n) - 1)
        }
    }

    pub fn set(&mut self, idx: usize) {
        assert!(idx < MAX_KEY, "index ordinal {idx} out of range");
        self.0 |= 1 << idx;
    }

    pub fn clear(&mut self, idx: usize) {
        assert!(idx < MAX_KEY, "index ordinal {idx} out of range");
        self.0 &= !(1 << idx);
    }

    pub fn is_set(&self, idx: usize) -> bool {
        idx < MAX_KEY && self.0 & (1 << idx) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn intersect(&mut self, other: KeyMap) {
        self.0 &= other.0;
    }

    pub fn union(&mut self, other: KeyMap) {
        self.0 |= other.0;
    }

    /// Ascending iterator over members.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_KEY).filter(move |idx| self.is_set(*idx))
    }
}

/// Set of column ordinals.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct FieldSet(u128);

impl FieldSet {
    /// Empty set.
    pub const fn new() -> Self {
        Self(0)
    }

    pub fn set(&mut self, field: FieldId) {
        let idx = field.0 as usize;
        assert!(idx < MAX_FIELDS, "field ordinal {idx} out of range");
        self.0 |= 1 << idx;
    }

    pub fn is_set(&self, field: FieldId) -> bool {
        (field.0 as usize) < MAX_FIELDS && self.0 & (1 << field.0) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn union(&self, other: &FieldSet) -> FieldSet {
        FieldSet(self.0 | other.0)
    }

    pub fn intersection(&self, other: &FieldSet) -> FieldSet {
        FieldSet(self.0 & other.0)
    }

    pub fn difference(&self, other: &FieldSet) -> FieldSet {
        FieldSet(self.0 & !other.0)
    }

    pub fn is_subset(&self, other: &FieldSet) -> bool {
        self.0 & !other.0 == 0
    }

    /// Ascending iterator over members.
    pub fn iter(&self) -> impl Iterator<Item = FieldId> + '_ {
        (0..MAX_FIELDS as u16)
            .map(FieldId)
            .filter(move |f| self.is_set(*f))
    }
}

impl FromIterator<FieldId> for FieldSet {
    fn from_iter<I: IntoIterator<Item = FieldId>>(iter: I) -> Self {
        let mut set = FieldSet::new();
        for field in iter {
            set.set(field);
        }
        set
    }
}
