//! In-memory table used by tests, benches and the CLI.
//!
//! Every index is a sorted vector of `(key image, rowid)` entries, so range
//! estimates are exact counts. With a clustered primary key, rowids are
//! assigned in primary key order.

use tracing::debug;

use super::{Cursor, IndexEntry, KeyRange, KeyTuple, Row, TableStats};
use crate::schema::TableShare;
use crate::types::{IndexId, KeyMap, RangeError, Result, RowId, Value};

/// Default index block size in bytes.
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

/// Sorted in-memory table implementing [`Cursor`].
#[derive(Debug)]
pub struct MemoryTable {
    share: TableShare,
    rows: Vec<Row>,
    indexes: Vec<Vec<IndexEntry>>,
    clustered_pk: bool,
    block_size: u32,
    unestimable: KeyMap,
}

/// Builder for [`MemoryTable`].
#[derive(Debug)]
pub struct MemoryTableBuilder {
    share: TableShare,
    rows: Vec<Vec<Value>>,
    clustered_pk: bool,
    block_size: u32,
    analyze: bool,
    unestimable: KeyMap,
}

impl MemoryTableBuilder {
    /// Appends one row; values are by field ordinal.
    pub fn row(mut self, values: Vec<Value>) -> Self {
        self.rows.push(values);
        self
    }

    /// Appends many rows.
    pub fn rows<I>(mut self, rows: I) -> Self
    where
        I: IntoIterator<Item = Vec<Value>>,
    {
        self.rows.extend(rows);
        self
    }

    /// Stores rows in primary key order.
    pub fn clustered_primary_key(mut self, clustered: bool) -> Self {
        self.clustered_pk = clustered;
        self
    }

    pub fn block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size.max(64);
        self
    }

    /// Whether to derive missing per-key statistics from the data.
    pub fn analyze(mut self, analyze: bool) -> Self {
        self.analyze = analyze;
        self
    }

    /// Makes `records_in_range` fail for the given index.
    pub fn unestimable(mut self, index: IndexId) -> Self {
        self.unestimable.set(index.0 as usize);
        self
    }

    pub fn build(self) -> Result<MemoryTable> {
        let MemoryTableBuilder {
            mut share,
            rows,
            clustered_pk,
            block_size,
            analyze,
            unestimable,
        } = self;
        share.validate()?;
        let width = share.fields.len();
        if let Some(bad) = rows.iter().position(|r| r.len() != width) {
            return Err(RangeError::InvalidArgument(format!(
                "row {bad} has {} values, table {} has {width} columns",
                rows[bad].len(),
                share.name
            )));
        }

        let mut rows = rows;
        let clustered = clustered_pk && share.primary_key.is_some();
        if let (true, Some(pk)) = (clustered, share.primary_key) {
            rows.sort_by_cached_key(|values| key_of(&share, pk, values));
        }
        let rows: Vec<Row> = rows
            .into_iter()
            .enumerate()
            .map(|(idx, values)| Row {
                rowid: RowId(idx as u64),
                values,
            })
            .collect();

        let mut indexes = Vec::with_capacity(share.keys.len());
        for key in share.key_ids() {
            let mut entries: Vec<IndexEntry> = rows
                .iter()
                .map(|row| IndexEntry {
                    key: key_of(&share, key, &row.values),
                    rowid: row.rowid,
                })
                .collect();
            entries.sort_by(|a, b| a.key.cmp(&b.key).then(a.rowid.cmp(&b.rowid)));
            indexes.push(entries);
        }

        if analyze {
            for (idx, entries) in indexes.iter().enumerate() {
                let key = &mut share.keys[idx];
                if !key.rec_per_key.is_empty() {
                    continue;
                }
                key.rec_per_key = (1..=key.parts.len())
                    .map(|n| {
                        if entries.is_empty() {
                            return 0;
                        }
                        let distinct = entries
                            .windows(2)
                            .filter(|w| w[0].key[..n] != w[1].key[..n])
                            .count()
                            + 1;
                        (entries.len() as u64).div_ceil(distinct as u64)
                    })
                    .collect();
            }
        }
        debug!(
            table = %share.name,
            rows = rows.len(),
            indexes = indexes.len(),
            clustered,
            "memory table built"
        );
        Ok(MemoryTable {
            share,
            rows,
            indexes,
            clustered_pk: clustered,
            block_size,
            unestimable,
        })
    }
}

fn key_of(share: &TableShare, key: IndexId, values: &[Value]) -> KeyTuple {
    share
        .key(key)
        .parts
        .iter()
        .map(|part| part.image(share.field(part.field), &values[part.field.0 as usize]))
        .collect()
}

impl MemoryTable {
    /// Starts building a table with the given definition.
    pub fn builder(share: TableShare) -> MemoryTableBuilder {
        MemoryTableBuilder {
            share,
            rows: Vec::new(),
            clustered_pk: false,
            block_size: DEFAULT_BLOCK_SIZE,
            analyze: true,
            unestimable: KeyMap::new(),
        }
    }

    /// Rows in rowid order.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    fn entries(&self, index: IndexId) -> Result<&[IndexEntry]> {
        self.indexes
            .get(index.0 as usize)
            .map(Vec::as_slice)
            .ok_or(RangeError::UnknownIndex(index.0))
    }

    fn span(entries: &[IndexEntry], range: &KeyRange) -> (usize, usize) {
        let lo = entries.partition_point(|e| range.is_before_start(&e.key));
        let hi = entries.partition_point(|e| !range.is_after_end(&e.key));
        (lo, hi.max(lo))
    }
}

impl Cursor for MemoryTable {
    fn share(&self) -> &TableShare {
        &self.share
    }

    fn stats(&self) -> TableStats {
        let mean_rec_length = self.share.mean_rec_length();
        TableStats {
            records: self.rows.len() as u64,
            data_file_length: self.rows.len() as u64 * u64::from(mean_rec_length),
            block_size: self.block_size,
            mean_rec_length,
        }
    }

    fn primary_key_is_clustered(&self) -> bool {
        self.clustered_pk
    }

    fn records_in_range(&self, index: IndexId, range: &KeyRange) -> Option<u64> {
        if self.unestimable.is_set(index.0 as usize) {
            return None;
        }
        let entries = self.entries(index).ok()?;
        let (lo, hi) = Self::span(entries, range);
        Some((hi - lo) as u64)
    }

    fn index_range(
        &self,
        index: IndexId,
        range: &KeyRange,
        reverse: bool,
    ) -> Result<Vec<IndexEntry>> {
        let entries = self.entries(index)?;
        let (lo, hi) = Self::span(entries, range);
        let mut out = entries[lo..hi].to_vec();
        if reverse {
            out.reverse();
        }
        Ok(out)
    }

    fn index_read_first(
        &self,
        index: IndexId,
        range: &KeyRange,
        reverse: bool,
    ) -> Result<Option<IndexEntry>> {
        let entries = self.entries(index)?;
        let (lo, hi) = Self::span(entries, range);
        let found = if reverse {
            entries[lo..hi].last()
        } else {
            entries[lo..hi].first()
        };
        Ok(found.cloned())
    }

    fn fetch(&self, rowid: RowId) -> Result<Row> {
        self.rows
            .get(rowid.0 as usize)
            .cloned()
            .ok_or_else(|| RangeError::Storage(format!("row {rowid} does not exist")))
    }

    fn table_scan(&self) -> Result<Vec<Row>> {
        Ok(self.rows.clone())
    }
}
