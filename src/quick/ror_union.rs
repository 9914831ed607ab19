use std::cmp::Reverse;
use std::collections::BinaryHeap;

use tracing::trace;

use super::{describe_children, QuickKind, QuickSelect};
use crate::storage::{Cursor, Row};
use crate::types::{RangeError, Result, RowId};

/// Merges rowid-ordered children through a min-heap on rowid, returning
/// each row once.
pub struct QuickRorUnionSelect<'a> {
    cursor: &'a dyn Cursor,
    children: Vec<Box<dyn QuickSelect + 'a>>,
    queue: BinaryHeap<Reverse<(RowId, usize)>>,
    last_rowid: Option<RowId>,
    initialized: bool,
}

impl<'a> QuickRorUnionSelect<'a> {
    pub fn new(cursor: &'a dyn Cursor, children: Vec<Box<dyn QuickSelect + 'a>>) -> Self {
        Self {
            cursor,
            children,
            queue: BinaryHeap::new(),
            last_rowid: None,
            initialized: false,
        }
    }

    fn push_next(&mut self, child: usize) -> Result<()> {
        if let Some(row) = self.children[child].get_next()? {
            self.queue.push(Reverse((row.rowid, child)));
        }
        Ok(())
    }

    fn fill_queue(&mut self) -> Result<()> {
        self.queue.clear();
        self.last_rowid = None;
        for child in 0..self.children.len() {
            self.push_next(child)?;
        }
        Ok(())
    }
}

impl QuickSelect for QuickRorUnionSelect<'_> {
    fn init(&mut self) -> Result<()> {
        if self.children.is_empty() {
            return Err(RangeError::InvalidArgument(
                "union needs at least one scan".into(),
            ));
        }
        for child in &mut self.children {
            child.init()?;
        }
        self.fill_queue()?;
        self.initialized = true;
        trace!(children = self.children.len(), "union started");
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        if !self.initialized {
            return Err(RangeError::NotInitialized);
        }
        for child in &mut self.children {
            child.reset()?;
        }
        self.fill_queue()
    }

    fn get_next(&mut self) -> Result<Option<Row>> {
        if !self.initialized {
            return Err(RangeError::NotInitialized);
        }
        while let Some(Reverse((rowid, child))) = self.queue.pop() {
            self.push_next(child)?;
            if self.last_rowid == Some(rowid) {
                continue;
            }
            self.last_rowid = Some(rowid);
            return self.cursor.fetch(rowid).map(Some);
        }
        Ok(None)
    }

    fn kind(&self) -> QuickKind {
        QuickKind::RorUnion
    }

    fn used_key_parts(&self) -> usize {
        self.children
            .iter()
            .map(|c| c.used_key_parts())
            .max()
            .unwrap_or(0)
    }

    fn describe(&self) -> String {
        describe_children("union", self.children.iter().map(|c| c.describe()))
    }
}
