#![forbid(unsafe_code)]

//! Executable access methods.
//!
//! Each plan kind materializes into a [`QuickSelect`]: a pull-based row
//! stream over one table. Composite methods own the range scans they read
//! from and merge their rowids; every method reads the table only through
//! [`Cursor`](crate::storage::Cursor).

/// Single index range scans.
pub mod range;

/// Rowid-ordered intersection.
pub mod ror_intersect;

/// Rowid-ordered union.
pub mod ror_union;

/// Sort-union index merge.
pub mod index_merge;

/// Group min/max scans.
pub mod group_min_max;

use std::fmt;

pub use group_min_max::{GroupMinMaxSpec, MinMaxValues, QuickGroupMinMaxSelect};
pub use index_merge::QuickIndexMergeSelect;
pub use range::QuickRangeSelect;
pub use ror_intersect::QuickRorIntersectSelect;
pub use ror_union::QuickRorUnionSelect;

use crate::storage::Row;
use crate::types::Result;

/// Kind of access method behind a [`QuickSelect`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum QuickKind {
    /// Ascending range scan.
    Range,
    /// Descending range scan.
    RangeDesc,
    /// Sort-union of range scans.
    IndexMerge,
    /// Rowid-ordered intersection.
    RorIntersect,
    /// Rowid-ordered union.
    RorUnion,
    /// One probe per group.
    GroupMinMax,
}

impl fmt::Display for QuickKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QuickKind::Range => "range",
            QuickKind::RangeDesc => "range_desc",
            QuickKind::IndexMerge => "index_merge",
            QuickKind::RorIntersect => "ror_intersect",
            QuickKind::RorUnion => "ror_union",
            QuickKind::GroupMinMax => "group_min_max",
        })
    }
}

/// Row stream produced by an access plan.
///
/// `init` must succeed before the first `get_next`; `reset` rewinds the
/// stream to its first row.
pub trait QuickSelect {
    /// Prepares the stream; reading before this fails.
    fn init(&mut self) -> Result<()>;

    /// Rewinds to the first row.
    fn reset(&mut self) -> Result<()>;

    /// Next row, or `None` at the end of the data.
    fn get_next(&mut self) -> Result<Option<Row>>;

    fn kind(&self) -> QuickKind;

    /// Index key parts the stream's lookups use.
    fn used_key_parts(&self) -> usize;

    /// Short description naming the indexes read, such as
    /// `sort_union(a,b)`.
    fn describe(&self) -> String;

    /// MIN/MAX values of the last group returned; only group min/max
    /// streams have them.
    fn min_max_values(&self) -> Option<&MinMaxValues> {
        None
    }
}

/// Drains a stream into a vector.
pub fn collect_rows(quick: &mut dyn QuickSelect) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    while let Some(row) = quick.get_next()? {
        rows.push(row);
    }
    Ok(rows)
}

/// Joins child descriptions as `name(a,b)`.
fn describe_children<'a>(name: &str, children: impl Iterator<Item = String> + 'a) -> String {
    let inner: Vec<String> = children.collect();
    format!("{name}({})", inner.join(","))
}
