use std::collections::BTreeSet;

use tracing::trace;

use super::range::{row_key, QuickRangeSelect};
use super::{describe_children, QuickKind, QuickSelect};
use crate::storage::{Cursor, Row};
use crate::types::{RangeError, Result, RowId};

enum Phase {
    /// Returning rows for the sorted rowids.
    Merged(std::vec::IntoIter<RowId>),
    /// Returning the clustered primary key scan's rows.
    PrimaryKey,
}

/// Sort-union: collects the rowids of every scan, sorts and deduplicates
/// them, then reads the rows in rowid order.
///
/// Rows a clustered primary key scan also selects are dropped from the
/// other scans and returned by that scan once the sorted rowids run out.
pub struct QuickIndexMergeSelect<'a> {
    cursor: &'a dyn Cursor,
    scans: Vec<QuickRangeSelect<'a>>,
    pk_scan: Option<QuickRangeSelect<'a>>,
    phase: Option<Phase>,
}

impl<'a> QuickIndexMergeSelect<'a> {
    pub fn new(
        cursor: &'a dyn Cursor,
        scans: Vec<QuickRangeSelect<'a>>,
        pk_scan: Option<QuickRangeSelect<'a>>,
    ) -> Self {
        Self {
            cursor,
            scans,
            pk_scan,
            phase: None,
        }
    }

    fn collect_rowids(&mut self) -> Result<Vec<RowId>> {
        let share = self.cursor.share();
        let mut rowids = BTreeSet::new();
        for scan in &mut self.scans {
            scan.reset()?;
            while let Some(entry) = scan.next_entry()? {
                if let Some(pk) = &self.pk_scan {
                    let row = self.cursor.fetch(entry.rowid)?;
                    if pk.row_in_ranges(&row_key(share, pk.index(), &row.values)) {
                        continue;
                    }
                }
                rowids.insert(entry.rowid);
            }
        }
        if let Some(pk) = &mut self.pk_scan {
            pk.reset()?;
        }
        trace!(rows = rowids.len(), "rowids sorted");
        Ok(rowids.into_iter().collect())
    }
}

impl QuickSelect for QuickIndexMergeSelect<'_> {
    fn init(&mut self) -> Result<()> {
        if self.scans.is_empty() && self.pk_scan.is_none() {
            return Err(RangeError::InvalidArgument(
                "index merge needs at least one scan".into(),
            ));
        }
        for scan in self.scans.iter_mut().chain(self.pk_scan.as_mut()) {
            scan.init()?;
        }
        self.reset_unchecked()
    }

    fn reset(&mut self) -> Result<()> {
        if self.phase.is_none() {
            return Err(RangeError::NotInitialized);
        }
        self.reset_unchecked()
    }

    fn get_next(&mut self) -> Result<Option<Row>> {
        let phase = self.phase.as_mut().ok_or(RangeError::NotInitialized)?;
        if let Phase::Merged(rowids) = phase {
            if let Some(rowid) = rowids.next() {
                return self.cursor.fetch(rowid).map(Some);
            }
            *phase = Phase::PrimaryKey;
        }
        let Some(pk) = &mut self.pk_scan else {
            return Ok(None);
        };
        match pk.next_entry()? {
            Some(entry) => self.cursor.fetch(entry.rowid).map(Some),
            None => Ok(None),
        }
    }

    fn kind(&self) -> QuickKind {
        QuickKind::IndexMerge
    }

    fn used_key_parts(&self) -> usize {
        self.scans
            .iter()
            .chain(self.pk_scan.as_ref())
            .map(QuickSelect::used_key_parts)
            .max()
            .unwrap_or(0)
    }

    fn describe(&self) -> String {
        describe_children(
            "sort_union",
            self.scans
                .iter()
                .chain(self.pk_scan.as_ref())
                .map(QuickSelect::describe),
        )
    }
}

impl QuickIndexMergeSelect<'_> {
    fn reset_unchecked(&mut self) -> Result<()> {
        let rowids = self.collect_rowids()?;
        self.phase = Some(Phase::Merged(rowids.into_iter()));
        Ok(())
    }
}
