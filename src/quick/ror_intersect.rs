use tracing::trace;

use super::range::{row_key, QuickRangeSelect};
use super::{describe_children, QuickKind, QuickSelect};
use crate::storage::{Cursor, IndexEntry, Row};
use crate::types::{RangeError, Result, RowId, Value};

/// Intersects rowid-ordered scans by advancing each one to the largest
/// rowid seen so far until all of them agree.
///
/// A clustered primary key scan is not merged in. Its ranges filter the
/// rows the other scans agree on.
pub struct QuickRorIntersectSelect<'a> {
    cursor: &'a dyn Cursor,
    scans: Vec<QuickRangeSelect<'a>>,
    cpk_quick: Option<QuickRangeSelect<'a>>,
    retrieve_full_rows: bool,
    /// Entry each scan stopped on for the current rowid.
    current: Vec<Option<IndexEntry>>,
    initialized: bool,
}

impl<'a> QuickRorIntersectSelect<'a> {
    pub fn new(
        cursor: &'a dyn Cursor,
        scans: Vec<QuickRangeSelect<'a>>,
        cpk_quick: Option<QuickRangeSelect<'a>>,
        retrieve_full_rows: bool,
    ) -> Self {
        let current = vec![None; scans.len()];
        Self {
            cursor,
            scans,
            cpk_quick,
            retrieve_full_rows,
            current,
            initialized: false,
        }
    }

    /// Advances scan `idx` to its first rowid not below `target`.
    fn advance(&mut self, idx: usize, target: RowId) -> Result<Option<RowId>> {
        loop {
            let Some(entry) = self.scans[idx].next_entry()? else {
                return Ok(None);
            };
            let rowid = entry.rowid;
            self.current[idx] = Some(entry);
            if rowid >= target {
                return Ok(Some(rowid));
            }
        }
    }

    /// Next rowid every scan returns.
    fn next_common_rowid(&mut self) -> Result<Option<RowId>> {
        let n = self.scans.len();
        let Some(mut candidate) = self.advance(0, RowId(0))? else {
            return Ok(None);
        };
        let mut matched = 1;
        let mut idx = 1 % n;
        while matched < n {
            let Some(rowid) = self.advance(idx, candidate)? else {
                return Ok(None);
            };
            if rowid > candidate {
                candidate = rowid;
                matched = 1;
            } else {
                matched += 1;
            }
            idx = (idx + 1) % n;
        }
        Ok(Some(candidate))
    }

    /// Row assembled from the index columns of every scan.
    fn covered_row(&self, rowid: RowId) -> Row {
        let share = self.cursor.share();
        let mut values = vec![Value::Null; share.fields.len()];
        for (scan, entry) in self.scans.iter().zip(&self.current) {
            let Some(entry) = entry else {
                continue;
            };
            for (part, value) in share.key(scan.index()).parts.iter().zip(entry.key.iter()) {
                if !part.is_partial() {
                    values[part.field.0 as usize] = value.clone();
                }
            }
        }
        Row { rowid, values }
    }
}

impl QuickSelect for QuickRorIntersectSelect<'_> {
    fn init(&mut self) -> Result<()> {
        if self.scans.is_empty() {
            return Err(RangeError::InvalidArgument(
                "intersection needs at least one scan".into(),
            ));
        }
        for scan in &mut self.scans {
            scan.init()?;
        }
        if let Some(cpk) = &mut self.cpk_quick {
            cpk.init()?;
        }
        self.initialized = true;
        trace!(scans = self.scans.len(), cpk = self.cpk_quick.is_some(), "intersection started");
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        if !self.initialized {
            return Err(RangeError::NotInitialized);
        }
        for scan in &mut self.scans {
            scan.reset()?;
        }
        self.current.iter_mut().for_each(|e| *e = None);
        Ok(())
    }

    fn get_next(&mut self) -> Result<Option<Row>> {
        if !self.initialized {
            return Err(RangeError::NotInitialized);
        }
        while let Some(rowid) = self.next_common_rowid()? {
            let mut full = None;
            if let Some(cpk) = &self.cpk_quick {
                let row = self.cursor.fetch(rowid)?;
                let key = row_key(self.cursor.share(), cpk.index(), &row.values);
                if !cpk.row_in_ranges(&key) {
                    continue;
                }
                full = Some(row);
            }
            if !self.retrieve_full_rows {
                return Ok(Some(self.covered_row(rowid)));
            }
            return match full {
                Some(row) => Ok(Some(row)),
                None => self.cursor.fetch(rowid).map(Some),
            };
        }
        Ok(None)
    }

    fn kind(&self) -> QuickKind {
        QuickKind::RorIntersect
    }

    fn used_key_parts(&self) -> usize {
        self.scans
            .iter()
            .map(QuickSelect::used_key_parts)
            .max()
            .unwrap_or(0)
    }

    fn describe(&self) -> String {
        describe_children(
            "intersect",
            self.scans
                .iter()
                .chain(self.cpk_quick.as_ref())
                .map(QuickSelect::describe),
        )
    }
}
