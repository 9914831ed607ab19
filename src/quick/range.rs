use std::collections::VecDeque;

use tracing::trace;

use super::{QuickKind, QuickSelect};
use crate::optimizer::range_seq::SelArgRangeSeq;
use crate::optimizer::sel_arg::SelArgRef;
use crate::schema::TableShare;
use crate::storage::{Cursor, IndexEntry, KeyRange, Row};
use crate::types::{IndexId, RangeError, Result, Value};

#[derive(Debug, Default)]
struct ScanState {
    next_range: usize,
    pending: VecDeque<IndexEntry>,
}

/// Reads the entries of one index inside a list of disjoint key ranges.
///
/// Ranges are visited in ascending key order, or descending once
/// [`descending`](Self::descending) is applied. Within one point range the
/// entries come back in rowid order.
pub struct QuickRangeSelect<'a> {
    cursor: &'a dyn Cursor,
    index: IndexId,
    ranges: Vec<KeyRange>,
    retrieve_full_rows: bool,
    descending: bool,
    used_key_parts: usize,
    state: Option<ScanState>,
}

impl<'a> QuickRangeSelect<'a> {
    /// Scan over explicit ranges, which must be disjoint and ascending.
    pub fn new(
        cursor: &'a dyn Cursor,
        index: IndexId,
        ranges: Vec<KeyRange>,
        retrieve_full_rows: bool,
    ) -> Self {
        let used_key_parts = ranges
            .iter()
            .flat_map(|r| [bound_len(&r.start), bound_len(&r.end)])
            .max()
            .unwrap_or(0);
        Self {
            cursor,
            index,
            ranges,
            retrieve_full_rows,
            descending: false,
            used_key_parts,
            state: None,
        }
    }

    /// Scan over the ranges of an interval tree on `index`.
    pub fn from_tree(
        cursor: &'a dyn Cursor,
        index: IndexId,
        tree: &SelArgRef,
        retrieve_full_rows: bool,
    ) -> Self {
        let share = cursor.share();
        let pk_clustered = cursor.primary_key_is_clustered() && share.primary_key.is_some();
        let mut seq = SelArgRangeSeq::new(share, index, tree, pk_clustered);
        let ranges: Vec<KeyRange> = seq.by_ref().collect();
        let mut quick = Self::new(cursor, index, ranges, retrieve_full_rows);
        quick.used_key_parts = seq.max_key_parts();
        quick
    }

    /// Reverses the scan order.
    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    pub fn index(&self) -> IndexId {
        self.index
    }

    pub fn ranges(&self) -> &[KeyRange] {
        &self.ranges
    }

    /// Whether a full key of this index falls inside one of the ranges.
    pub fn row_in_ranges(&self, key: &[Value]) -> bool {
        self.ranges.iter().any(|r| r.contains(key))
    }

    /// Next index entry, without building a row.
    pub(crate) fn next_entry(&mut self) -> Result<Option<IndexEntry>> {
        let state = self.state.as_mut().ok_or(RangeError::NotInitialized)?;
        loop {
            if let Some(entry) = state.pending.pop_front() {
                return Ok(Some(entry));
            }
            if state.next_range >= self.ranges.len() {
                return Ok(None);
            }
            let pos = if self.descending {
                self.ranges.len() - 1 - state.next_range
            } else {
                state.next_range
            };
            state.next_range += 1;
            let entries = self
                .cursor
                .index_range(self.index, &self.ranges[pos], self.descending)?;
            state.pending = entries.into();
        }
    }
}

fn bound_len(bound: &std::ops::Bound<crate::storage::KeyTuple>) -> usize {
    match bound {
        std::ops::Bound::Included(t) | std::ops::Bound::Excluded(t) => t.len(),
        std::ops::Bound::Unbounded => 0,
    }
}

/// Key of `index` computed from a full row.
pub(crate) fn row_key(share: &TableShare, index: IndexId, values: &[Value]) -> Vec<Value> {
    share
        .key(index)
        .parts
        .iter()
        .map(|part| part.image(share.field(part.field), &values[part.field.0 as usize]))
        .collect()
}

/// Row holding only the columns `entry` carries; the rest are NULL.
/// Prefix key parts are left out since they hold a truncated value.
pub(crate) fn index_only_row(share: &TableShare, index: IndexId, entry: &IndexEntry) -> Row {
    let mut values = vec![Value::Null; share.fields.len()];
    for (part, value) in share.key(index).parts.iter().zip(entry.key.iter()) {
        if !part.is_partial() {
            values[part.field.0 as usize] = value.clone();
        }
    }
    Row {
        rowid: entry.rowid,
        values,
    }
}

impl QuickSelect for QuickRangeSelect<'_> {
    fn init(&mut self) -> Result<()> {
        if self.index.0 as usize >= self.cursor.share().keys.len() {
            return Err(RangeError::UnknownIndex(self.index.0));
        }
        self.state = Some(ScanState::default());
        trace!(index = %self.index, ranges = self.ranges.len(), "range scan started");
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        let state = self.state.as_mut().ok_or(RangeError::NotInitialized)?;
        *state = ScanState::default();
        Ok(())
    }

    fn get_next(&mut self) -> Result<Option<Row>> {
        let Some(entry) = self.next_entry()? else {
            return Ok(None);
        };
        if self.retrieve_full_rows {
            self.cursor.fetch(entry.rowid).map(Some)
        } else {
            Ok(Some(index_only_row(self.cursor.share(), self.index, &entry)))
        }
    }

    fn kind(&self) -> QuickKind {
        if self.descending {
            QuickKind::RangeDesc
        } else {
            QuickKind::Range
        }
    }

    fn used_key_parts(&self) -> usize {
        self.used_key_parts
    }

    fn describe(&self) -> String {
        self.cursor.share().key(self.index).name.clone()
    }
}
