use std::ops::Bound;

use tracing::trace;

use super::range::index_only_row;
use super::{QuickKind, QuickSelect};
use crate::optimizer::plan::GroupMinMaxReadPlan;
use crate::optimizer::sel_arg::{Interval, Lower, SelArgRef, Upper};
use crate::storage::{Cursor, IndexEntry, KeyRange, KeyTuple, RangeFlags, Row};
use crate::types::{IndexId, RangeError, Result, Value};

/// What a group min/max scan reads, fixed at planning time.
#[derive(Clone, Debug)]
pub struct GroupMinMaxSpec {
    pub index: IndexId,
    /// Leading key parts forming the group key.
    pub group_prefix_len: usize,
    /// Constants for the parts after the group key.
    pub key_infix: Vec<Value>,
    /// Key part holding the MIN/MAX column.
    pub min_max_arg_part: Option<usize>,
    pub have_min: bool,
    pub have_max: bool,
    /// Groups whose key fails this tree are skipped.
    pub prefix_tree: Option<SelArgRef>,
    /// Intervals the MIN/MAX column must fall into; empty means any value.
    pub min_max_ranges: Vec<Interval>,
    pub used_key_parts: usize,
}

impl GroupMinMaxSpec {
    pub fn from_plan(plan: &GroupMinMaxReadPlan) -> Self {
        Self {
            index: plan.index,
            group_prefix_len: plan.group_prefix_len,
            key_infix: plan.key_infix.clone(),
            min_max_arg_part: plan.min_max_arg_part,
            have_min: plan.have_min,
            have_max: plan.have_max,
            prefix_tree: plan.index_tree.clone(),
            min_max_ranges: plan
                .min_max_tree
                .as_ref()
                .map(|t| t.intervals().cloned().collect())
                .unwrap_or_default(),
            used_key_parts: plan.used_key_parts,
        }
    }
}

/// MIN and MAX of the group last returned.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MinMaxValues {
    pub min: Option<Value>,
    pub max: Option<Value>,
}

/// Returns one row per distinct group prefix, found by seeking past the
/// previous prefix instead of reading the rows in between.
///
/// Each row holds the index columns of the entry carrying the group's MIN
/// (or MAX when only MAX is asked for). Both aggregates are available
/// through [`QuickSelect::min_max_values`].
pub struct QuickGroupMinMaxSelect<'a> {
    cursor: &'a dyn Cursor,
    spec: GroupMinMaxSpec,
    initialized: bool,
    last_prefix: Option<KeyTuple>,
    values: MinMaxValues,
}

impl<'a> QuickGroupMinMaxSelect<'a> {
    pub fn new(cursor: &'a dyn Cursor, spec: GroupMinMaxSpec) -> Self {
        Self {
            cursor,
            spec,
            initialized: false,
            last_prefix: None,
            values: MinMaxValues::default(),
        }
    }

    /// First key of the group after the last one returned.
    fn next_prefix(&mut self) -> Result<Option<KeyTuple>> {
        let range = match &self.last_prefix {
            None => KeyRange::full(),
            Some(prefix) => KeyRange {
                start: Bound::Excluded(prefix.clone()),
                end: Bound::Unbounded,
                flags: RangeFlags::NEAR_MIN | RangeFlags::NO_MAX_RANGE,
            },
        };
        let Some(entry) = self.cursor.index_read_first(self.spec.index, &range, false)? else {
            return Ok(None);
        };
        let prefix: KeyTuple = entry.key[..self.spec.group_prefix_len].iter().cloned().collect();
        self.last_prefix = Some(prefix.clone());
        Ok(Some(prefix))
    }

    /// Entry with the smallest (or, `reverse`, largest) qualifying non-NULL
    /// MIN/MAX value in the group. Falls back to a NULL entry when the
    /// ranges admit NULL and nothing else qualifies.
    fn min_max_entry(&self, search: &KeyTuple, reverse: bool) -> Result<Option<IndexEntry>> {
        let full = [Interval::new(Lower::Unbounded, Upper::Unbounded)];
        let intervals: &[Interval] = if self.spec.min_max_ranges.is_empty() {
            &full
        } else {
            &self.spec.min_max_ranges
        };
        let mut null_entry = None;
        let ordered: Box<dyn Iterator<Item = &Interval>> = if reverse {
            Box::new(intervals.iter().rev())
        } else {
            Box::new(intervals.iter())
        };
        for iv in ordered {
            let range = non_null_range(search, iv);
            if let Some(entry) = self.cursor.index_read_first(self.spec.index, &range, reverse)? {
                return Ok(Some(entry));
            }
            if null_entry.is_none() && iv.lower.admits(&Value::Null) {
                let mut null_key = search.clone();
                null_key.push(Value::Null);
                null_entry =
                    self.cursor
                        .index_read_first(self.spec.index, &KeyRange::point(null_key), false)?;
            }
        }
        Ok(null_entry)
    }

    /// Row for the group with key `search`, or `None` when no entry of the
    /// group qualifies.
    fn group_row(&mut self, search: &KeyTuple) -> Result<Option<Row>> {
        let share = self.cursor.share();
        let Some(part) = self.spec.min_max_arg_part else {
            let entry = self.cursor.index_read_first(
                self.spec.index,
                &KeyRange::point(search.clone()),
                false,
            )?;
            return Ok(entry.map(|e| index_only_row(share, self.spec.index, &e)));
        };

        let min = if self.spec.have_min {
            match self.min_max_entry(search, false)? {
                Some(entry) => Some(entry),
                None => return Ok(None),
            }
        } else {
            None
        };
        let max = if self.spec.have_max {
            match self.min_max_entry(search, true)? {
                Some(entry) => Some(entry),
                None => return Ok(None),
            }
        } else {
            None
        };
        self.values = MinMaxValues {
            min: min.as_ref().map(|e| e.key[part].clone()),
            max: max.as_ref().map(|e| e.key[part].clone()),
        };
        Ok(min
            .or(max)
            .map(|e| index_only_row(share, self.spec.index, &e)))
    }
}

/// Range over the entries of the group `search` whose next key part lies
/// in `iv` and is not NULL.
fn non_null_range(search: &KeyTuple, iv: &Interval) -> KeyRange {
    let with = |v: &Value| {
        let mut t = search.clone();
        t.push(v.clone());
        t
    };
    let mut flags = RangeFlags::empty();
    let start = match &iv.lower {
        Lower::Unbounded | Lower::Included(Value::Null) => {
            flags.insert(RangeFlags::NEAR_MIN);
            Bound::Excluded(with(&Value::Null))
        }
        Lower::Included(v) => Bound::Included(with(v)),
        Lower::Excluded(v) => {
            flags.insert(RangeFlags::NEAR_MIN);
            Bound::Excluded(with(v))
        }
    };
    let end = match &iv.upper {
        Upper::Unbounded => Bound::Included(search.clone()),
        Upper::Included(v) => Bound::Included(with(v)),
        Upper::Excluded(v) => {
            flags.insert(RangeFlags::NEAR_MAX);
            Bound::Excluded(with(v))
        }
    };
    KeyRange { start, end, flags }
}

impl QuickSelect for QuickGroupMinMaxSelect<'_> {
    fn init(&mut self) -> Result<()> {
        let share = self.cursor.share();
        let Some(key) = share.keys.get(self.spec.index.0 as usize) else {
            return Err(RangeError::UnknownIndex(self.spec.index.0));
        };
        if self.spec.group_prefix_len + self.spec.key_infix.len() > key.parts.len() {
            return Err(RangeError::InvalidArgument(format!(
                "group prefix of {} parts and infix of {} exceed index {}",
                self.spec.group_prefix_len,
                self.spec.key_infix.len(),
                key.name
            )));
        }
        self.initialized = true;
        self.reset()
    }

    fn reset(&mut self) -> Result<()> {
        if !self.initialized {
            return Err(RangeError::NotInitialized);
        }
        self.last_prefix = None;
        self.values = MinMaxValues::default();
        Ok(())
    }

    fn get_next(&mut self) -> Result<Option<Row>> {
        if !self.initialized {
            return Err(RangeError::NotInitialized);
        }
        while let Some(prefix) = self.next_prefix()? {
            if let Some(tree) = &self.spec.prefix_tree {
                if !tree.matches(&prefix) {
                    continue;
                }
            }
            let mut search = prefix;
            search.extend(self.spec.key_infix.iter().cloned());
            if let Some(row) = self.group_row(&search)? {
                return Ok(Some(row));
            }
            trace!(group = ?search, "group has no qualifying entry");
        }
        Ok(None)
    }

    fn kind(&self) -> QuickKind {
        QuickKind::GroupMinMax
    }

    fn used_key_parts(&self) -> usize {
        self.spec.used_key_parts
    }

    fn describe(&self) -> String {
        self.cursor.share().key(self.spec.index).name.clone()
    }

    fn min_max_values(&self) -> Option<&MinMaxValues> {
        self.spec.min_max_arg_part.map(|_| &self.values)
    }
}
