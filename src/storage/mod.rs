//! Storage-engine boundary: cost oracle, key ranges and index access.
//!
//! The optimizer never touches rows directly. It asks a [`Cursor`] for
//! statistics and range estimates while planning, and the materialized
//! iterators use the same cursor to walk index ranges and fetch rows.
#![forbid(unsafe_code)]

mod memory;

pub use memory::{MemoryTable, MemoryTableBuilder};

use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;

use smallvec::SmallVec;

use crate::optimizer::cost::TIME_FOR_COMPARE;
use crate::schema::TableShare;
use crate::types::{IndexId, Result, RowId, Value};

/// Bytes per I/O block assumed by the cost formulas.
pub const IO_SIZE: f64 = 4096.0;

/// Leading key-part values of a composite index.
pub type KeyTuple = SmallVec<[Value; 4]>;

/// Flags describing one key range.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct RangeFlags(u16);

impl RangeFlags {
    /// No lower bound.
    pub const NO_MIN_RANGE: RangeFlags = RangeFlags(1);
    /// No upper bound.
    pub const NO_MAX_RANGE: RangeFlags = RangeFlags(1 << 1);
    /// Lower bound is exclusive.
    pub const NEAR_MIN: RangeFlags = RangeFlags(1 << 2);
    /// Upper bound is exclusive.
    pub const NEAR_MAX: RangeFlags = RangeFlags(1 << 3);
    /// Point lookup on every part of a unique index.
    pub const UNIQUE_RANGE: RangeFlags = RangeFlags(1 << 4);
    /// Lower and upper bounds are the same tuple.
    pub const EQ_RANGE: RangeFlags = RangeFlags(1 << 5);
    /// One of the pinned parts is NULL.
    pub const NULL_RANGE: RangeFlags = RangeFlags(1 << 6);

    pub const fn empty() -> Self {
        RangeFlags(0)
    }

    pub fn contains(&self, other: RangeFlags) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn insert(&mut self, other: RangeFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: RangeFlags) {
        self.0 &= !other.0;
    }

    pub fn bits(&self) -> u16 {
        self.0
    }
}

impl std::ops::BitOr for RangeFlags {
    type Output = RangeFlags;

    fn bitor(self, rhs: RangeFlags) -> RangeFlags {
        RangeFlags(self.0 | rhs.0)
    }
}

/// One contiguous range over a prefix of an index key.
///
/// Bounds compare against the leading `len` parts of an index entry, so a
/// shorter tuple constrains fewer parts.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyRange {
    /// Lower bound.
    pub start: Bound<KeyTuple>,
    /// Upper bound.
    pub end: Bound<KeyTuple>,
    /// Range flags.
    pub flags: RangeFlags,
}

fn cmp_prefix(key: &[Value], bound: &[Value]) -> Ordering {
    let n = bound.len().min(key.len());
    key[..n].cmp(&bound[..n])
}

impl KeyRange {
    /// Range over the whole index.
    pub fn full() -> Self {
        Self {
            start: Bound::Unbounded,
            end: Bound::Unbounded,
            flags: RangeFlags::NO_MIN_RANGE | RangeFlags::NO_MAX_RANGE,
        }
    }

    /// Closed range `[tuple, tuple]`.
    pub fn point(tuple: KeyTuple) -> Self {
        Self {
            start: Bound::Included(tuple.clone()),
            end: Bound::Included(tuple),
            flags: RangeFlags::EQ_RANGE,
        }
    }

    /// True when `key` sorts before the lower bound.
    pub fn is_before_start(&self, key: &[Value]) -> bool {
        match &self.start {
            Bound::Unbounded => false,
            Bound::Included(t) => cmp_prefix(key, t) == Ordering::Less,
            Bound::Excluded(t) => cmp_prefix(key, t) != Ordering::Greater,
        }
    }

    /// True when `key` sorts after the upper bound.
    pub fn is_after_end(&self, key: &[Value]) -> bool {
        match &self.end {
            Bound::Unbounded => false,
            Bound::Included(t) => cmp_prefix(key, t) == Ordering::Greater,
            Bound::Excluded(t) => cmp_prefix(key, t) != Ordering::Less,
        }
    }

    pub fn contains(&self, key: &[Value]) -> bool {
        !self.is_before_start(key) && !self.is_after_end(key)
    }

    /// True when both bounds are the same closed tuple.
    pub fn is_point(&self) -> bool {
        matches!((&self.start, &self.end), (Bound::Included(a), Bound::Included(b)) if a == b)
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tuple = |t: &KeyTuple| {
            t.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",")
        };
        match &self.start {
            Bound::Unbounded => f.write_str("(-inf")?,
            Bound::Included(t) => write!(f, "[{}", tuple(t))?,
            Bound::Excluded(t) => write!(f, "({}", tuple(t))?,
        }
        f.write_str(" .. ")?;
        match &self.end {
            Bound::Unbounded => f.write_str("+inf)"),
            Bound::Included(t) => write!(f, "{}]", tuple(t)),
            Bound::Excluded(t) => write!(f, "{})", tuple(t)),
        }
    }
}

/// Breakdown of an access cost in abstract units.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CostVector {
    /// Number of I/O operations.
    pub io_count: f64,
    /// Cost of one I/O operation.
    pub avg_io_cost: f64,
    /// CPU cost.
    pub cpu_cost: f64,
    /// Memory cost.
    pub mem_cost: f64,
    /// Cost of importing rows into the executor.
    pub import_cost: f64,
}

impl Default for CostVector {
    fn default() -> Self {
        Self {
            io_count: 0.0,
            avg_io_cost: 1.0,
            cpu_cost: 0.0,
            mem_cost: 0.0,
            import_cost: 0.0,
        }
    }
}

impl CostVector {
    pub fn total_cost(&self) -> f64 {
        self.io_count * self.avg_io_cost + self.cpu_cost + self.mem_cost + self.import_cost
    }
}

/// Table-level statistics.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TableStats {
    /// Estimated row count.
    pub records: u64,
    /// Bytes of row data.
    pub data_file_length: u64,
    /// Index block size in bytes.
    pub block_size: u32,
    /// Average row length in bytes.
    pub mean_rec_length: u32,
}

/// Multi-range read request flags.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MrrFlags {
    /// The scan reads only index columns.
    pub index_only: bool,
}

/// Aggregate estimate for a sequence of ranges.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MrrEstimate {
    /// Rows the ranges are expected to return.
    pub rows: u64,
    /// Ranges pulled from the sequence.
    pub n_ranges: u64,
    /// Cost of reading them.
    pub cost: CostVector,
}

/// Index entry: key-part values followed by the row it points to.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexEntry {
    /// Values of every key part, in key order.
    pub key: KeyTuple,
    /// Row the entry belongs to.
    pub rowid: RowId,
}

/// A table row as produced by the iterators.
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    /// Row identifier.
    pub rowid: RowId,
    /// Column values by field ordinal. Index-only reads leave uncovered columns NULL.
    pub values: Vec<Value>,
}

/// Storage-engine handle for one open table.
///
/// The cost methods carry the engine-independent default formulas; engines
/// with better knowledge override them.
pub trait Cursor: Send + Sync {
    /// Static table metadata.
    fn share(&self) -> &TableShare;

    /// Current statistics.
    fn stats(&self) -> TableStats;

    /// Whether rows are stored in primary key order, so primary key scans need
    /// no separate row fetch.
    fn primary_key_is_clustered(&self) -> bool {
        false
    }

    /// Cost of a full table scan.
    fn scan_time(&self) -> f64 {
        self.stats().data_file_length as f64 / IO_SIZE + 2.0
    }

    /// Cost of reading `rows` rows through `ranges` index ranges.
    fn read_time(&self, _index: IndexId, ranges: u64, rows: u64) -> f64 {
        ranges as f64 + rows as f64
    }

    /// Cost of reading `rows` entries from the index without touching rows.
    fn index_only_read_time(&self, index: IndexId, rows: f64) -> f64 {
        let share = self.share();
        let entry = f64::from(share.key_length(index) + crate::schema::REF_LENGTH);
        let keys_per_block = (f64::from(self.stats().block_size) / 2.0 / entry).floor() + 1.0;
        (rows + keys_per_block - 1.0) / keys_per_block
    }

    /// Estimated rows inside one range; `None` when the engine cannot tell.
    fn records_in_range(&self, index: IndexId, range: &KeyRange) -> Option<u64>;

    /// Estimates a whole range sequence, pulling ranges one at a time.
    fn multi_range_read_info_const(
        &self,
        index: IndexId,
        ranges: &mut dyn Iterator<Item = KeyRange>,
        flags: MrrFlags,
    ) -> Option<MrrEstimate> {
        let mut n_ranges = 0u64;
        let mut total_rows = 0u64;
        for range in ranges {
            n_ranges += 1;
            let rows = if range.flags.contains(RangeFlags::UNIQUE_RANGE)
                && !range.flags.contains(RangeFlags::NULL_RANGE)
            {
                1
            } else {
                self.records_in_range(index, &range)?
            };
            total_rows = total_rows.saturating_add(rows);
        }
        let io_count = if flags.index_only && total_rows > 2 {
            self.index_only_read_time(index, total_rows as f64)
        } else {
            self.read_time(index, n_ranges, total_rows)
        };
        Some(MrrEstimate {
            rows: total_rows,
            n_ranges,
            cost: CostVector {
                io_count,
                cpu_cost: total_rows as f64 / TIME_FOR_COMPARE + 0.01,
                ..CostVector::default()
            },
        })
    }

    /// Index entries inside `range`, ascending unless `reverse`.
    fn index_range(&self, index: IndexId, range: &KeyRange, reverse: bool)
        -> Result<Vec<IndexEntry>>;

    /// First entry inside `range`, or the last one when `reverse`.
    fn index_read_first(
        &self,
        index: IndexId,
        range: &KeyRange,
        reverse: bool,
    ) -> Result<Option<IndexEntry>> {
        Ok(self.index_range(index, range, reverse)?.into_iter().next())
    }

    /// Full row for `rowid`.
    fn fetch(&self, rowid: RowId) -> Result<Row>;

    /// All rows in row order.
    fn table_scan(&self) -> Result<Vec<Row>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn tuple(vals: &[i64]) -> KeyTuple {
        vals.iter().copied().map(Value::Int).collect()
    }

    #[test]
    fn prefix_bounds_ignore_trailing_parts() {
        let range = KeyRange {
            start: Bound::Included(tuple(&[5])),
            end: Bound::Included(tuple(&[5])),
            flags: RangeFlags::EQ_RANGE,
        };
        assert!(range.contains(&[Value::Int(5), Value::Int(-100)]));
        assert!(range.contains(&[Value::Int(5), Value::Int(100)]));
        assert!(!range.contains(&[Value::Int(6), Value::Int(0)]));
        assert!(range.is_point());
    }

    #[test]
    fn exclusive_bounds() {
        let range = KeyRange {
            start: Bound::Excluded(tuple(&[10])),
            end: Bound::Excluded(tuple(&[20])),
            flags: RangeFlags::NEAR_MIN | RangeFlags::NEAR_MAX,
        };
        assert!(!range.contains(&[Value::Int(10)]));
        assert!(range.contains(&[Value::Int(11)]));
        assert!(!range.contains(&[Value::Int(20)]));
        assert_eq!(range.to_string(), "(10 .. 20)");
    }

    #[test]
    fn null_sorts_inside_unbounded_ranges_only() {
        let range = KeyRange {
            start: Bound::Excluded(smallvec![Value::Null]),
            end: Bound::Unbounded,
            flags: RangeFlags::NEAR_MIN | RangeFlags::NO_MAX_RANGE,
        };
        assert!(!range.contains(&[Value::Null]));
        assert!(range.contains(&[Value::Int(i64::MIN)]));
        assert!(KeyRange::full().contains(&[Value::Null]));
    }

    #[test]
    fn cost_vector_total() {
        let cost = CostVector {
            io_count: 3.0,
            avg_io_cost: 2.0,
            cpu_cost: 1.5,
            ..CostVector::default()
        };
        assert_eq!(cost.total_cost(), 7.5);
    }

    #[test]
    fn flags_compose() {
        let mut flags = RangeFlags::NEAR_MIN | RangeFlags::NULL_RANGE;
        assert!(flags.contains(RangeFlags::NEAR_MIN));
        assert!(!flags.contains(RangeFlags::NEAR_MAX));
        flags.remove(RangeFlags::NEAR_MIN);
        assert!(!flags.contains(RangeFlags::NEAR_MIN));
        assert!(!flags.contains(RangeFlags::empty()));
    }
}
