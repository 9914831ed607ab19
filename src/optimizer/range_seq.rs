//! Flattening of composite interval trees into key ranges.
//!
//! A [`SelArgRangeSeq`] walks the tree of one index depth first and yields
//! one [`KeyRange`] per leaf. It descends into the next key part only
//! through closed points, so every produced range is a run of pinned parts
//! followed by one interval. Trailing parts that cannot be pinned still
//! tighten the bounds with their extreme endpoints.
//!
//! The walk is pull based: the cost oracle consumes ranges one at a time,
//! and the sequence records what it saw (range count, key parts used,
//! rowid order) for the caller to inspect afterwards.

use std::ops::Bound;

use super::sel_arg::{Interval, Lower, SelArgRef, Upper};
use crate::schema::TableShare;
use crate::storage::{KeyRange, KeyTuple, RangeFlags};
use crate::types::{IndexId, Value};

#[derive(Debug)]
struct Frame {
    intervals: Vec<Interval>,
    pos: usize,
}

impl Frame {
    fn new(arg: &SelArgRef) -> Self {
        Self {
            intervals: arg.intervals().cloned().collect(),
            pos: 0,
        }
    }

    fn current(&self) -> &Interval {
        &self.intervals[self.pos]
    }
}

/// Pull-based range sequence over one index tree.
#[derive(Debug)]
pub struct SelArgRangeSeq<'a> {
    share: &'a TableShare,
    index: IndexId,
    pk_clustered: bool,
    root: Option<SelArgRef>,
    stack: Vec<Frame>,
    started: bool,
    range_count: u64,
    max_key_parts: usize,
    is_ror: bool,
}

impl<'a> SelArgRangeSeq<'a> {
    /// Sequence over `tree`, which must constrain part 0 of `index`.
    pub fn new(share: &'a TableShare, index: IndexId, tree: &SelArgRef, pk_clustered: bool) -> Self {
        let root = (tree.is_key_range() && tree.part() == 0 && tree.elements() > 0)
            .then(|| tree.clone());
        Self {
            share,
            index,
            pk_clustered,
            root,
            stack: Vec::new(),
            started: false,
            range_count: 0,
            max_key_parts: 0,
            is_ror: !share.key(index).no_ror,
        }
    }

    /// Ranges produced so far.
    pub fn range_count(&self) -> u64 {
        self.range_count
    }

    /// Longest key prefix any produced bound used.
    pub fn max_key_parts(&self) -> usize {
        self.max_key_parts
    }

    /// Whether every range seen so far returns rows in rowid order.
    pub fn is_ror(&self) -> bool {
        self.is_ror
    }

    /// Walks forward to the next leaf interval. Returns `false` at the end.
    fn advance(&mut self) -> bool {
        if !self.started {
            self.started = true;
            match &self.root {
                Some(root) => self.stack.push(Frame::new(root)),
                None => return false,
            }
        } else {
            loop {
                let Some(top) = self.stack.last_mut() else {
                    return false;
                };
                top.pos += 1;
                if top.pos < top.intervals.len() {
                    break;
                }
                self.stack.pop();
            }
        }
        while let Some(next) = self.stack.last().and_then(|f| descend_target(f.current(), self.stack.len() - 1)) {
            self.stack.push(Frame::new(&next));
        }
        true
    }

    fn current_range(&mut self) -> KeyRange {
        let depth = self.stack.len() - 1;
        let prefix: KeyTuple = self.stack[..depth]
            .iter()
            .filter_map(|f| f.current().lower.value().cloned())
            .collect();
        let tail = self.stack[depth].current();
        let part = depth as u16;

        let start = match &tail.lower {
            Lower::Unbounded if depth == 0 => Bound::Unbounded,
            Lower::Unbounded => Bound::Included(prefix.clone()),
            Lower::Included(v) => {
                let mut tuple = prefix.clone();
                tuple.push(v.clone());
                if extend_min(&mut tuple, tail.next.as_ref(), part) {
                    Bound::Excluded(tuple)
                } else {
                    Bound::Included(tuple)
                }
            }
            Lower::Excluded(v) => {
                let mut tuple = prefix.clone();
                tuple.push(v.clone());
                Bound::Excluded(tuple)
            }
        };
        let end = match &tail.upper {
            Upper::Unbounded if depth == 0 => Bound::Unbounded,
            Upper::Unbounded => Bound::Included(prefix.clone()),
            Upper::Included(v) => {
                let mut tuple = prefix.clone();
                tuple.push(v.clone());
                if extend_max(&mut tuple, tail.next.as_ref(), part) {
                    Bound::Excluded(tuple)
                } else {
                    Bound::Included(tuple)
                }
            }
            Upper::Excluded(v) => {
                let mut tuple = prefix.clone();
                tuple.push(v.clone());
                Bound::Excluded(tuple)
            }
        };

        let null_point = prefix.iter().any(Value::is_null)
            || (tail.is_point() && tail.lower.value().is_some_and(Value::is_null));
        let mut flags = RangeFlags::empty();
        match &start {
            Bound::Unbounded => flags.insert(RangeFlags::NO_MIN_RANGE),
            Bound::Excluded(_) => flags.insert(RangeFlags::NEAR_MIN),
            Bound::Included(_) => {}
        }
        match &end {
            Bound::Unbounded => flags.insert(RangeFlags::NO_MAX_RANGE),
            Bound::Excluded(_) => flags.insert(RangeFlags::NEAR_MAX),
            Bound::Included(_) => {}
        }
        if null_point {
            flags.insert(RangeFlags::NULL_RANGE);
        }

        let point_len = match (&start, &end) {
            (Bound::Included(a), Bound::Included(b)) if a == b => Some(a.len()),
            _ => None,
        };
        let key = self.share.key(self.index);
        if let Some(len) = point_len {
            flags.insert(RangeFlags::EQ_RANGE);
            if key.unique && len == key.parts.len() {
                flags.insert(RangeFlags::UNIQUE_RANGE);
            }
        }

        let bound_len = |b: &Bound<KeyTuple>| match b {
            Bound::Included(t) | Bound::Excluded(t) => t.len(),
            Bound::Unbounded => 0,
        };
        self.max_key_parts = self.max_key_parts.max(bound_len(&start)).max(bound_len(&end));
        self.range_count += 1;
        if self.range_count > 1 {
            self.is_ror = false;
        }
        if self.is_ror {
            self.is_ror = point_len.is_some_and(|len| {
                is_key_scan_ror(self.share, self.index, len, self.pk_clustered)
            });
        }
        KeyRange { start, end, flags }
    }
}

impl Iterator for SelArgRangeSeq<'_> {
    type Item = KeyRange;

    fn next(&mut self) -> Option<KeyRange> {
        if !self.advance() {
            return None;
        }
        Some(self.current_range())
    }
}

/// The next-part tree to descend into from `iv` at `depth`, if `iv` pins
/// its part to one value.
fn descend_target(iv: &Interval, depth: usize) -> Option<SelArgRef> {
    let next = iv.next.as_ref()?;
    (iv.is_point()
        && next.part() as usize == depth + 1
        && next.is_key_range()
        && next.elements() > 0)
        .then(|| next.clone())
}

/// Appends the lowest endpoints of the following parts. Returns `true` when
/// the appended bound is exclusive.
fn extend_min(tuple: &mut KeyTuple, mut next: Option<&SelArgRef>, mut part: u16) -> bool {
    while let Some(arg) = next.filter(|a| a.part() == part + 1 && a.is_key_range()) {
        let Some(first) = arg.first() else {
            break;
        };
        match &first.lower {
            Lower::Unbounded => break,
            Lower::Included(v) => {
                tuple.push(v.clone());
                next = first.next.as_ref();
                part += 1;
            }
            Lower::Excluded(v) => {
                tuple.push(v.clone());
                return true;
            }
        }
    }
    false
}

/// Appends the highest endpoints of the following parts. Returns `true`
/// when the appended bound is exclusive.
fn extend_max(tuple: &mut KeyTuple, mut next: Option<&SelArgRef>, mut part: u16) -> bool {
    while let Some(arg) = next.filter(|a| a.part() == part + 1 && a.is_key_range()) {
        let Some(last) = arg.last() else {
            break;
        };
        match &last.upper {
            Upper::Unbounded => break,
            Upper::Included(v) => {
                tuple.push(v.clone());
                next = last.next.as_ref();
                part += 1;
            }
            Upper::Excluded(v) => {
                tuple.push(v.clone());
                return true;
            }
        }
    }
    false
}

/// Whether equality on the first `nparts` parts of `index` yields rows in
/// rowid order: the pinned parts must hold whole column values, and the
/// remaining parts must be empty or repeat the leading parts of a clustered
/// primary key.
pub fn is_key_scan_ror(share: &TableShare, index: IndexId, nparts: usize, pk_clustered: bool) -> bool {
    let key = share.key(index);
    let nparts = nparts.min(key.parts.len());
    if key.parts[..nparts].iter().any(|p| p.is_partial()) {
        return false;
    }
    let rest = &key.parts[nparts..];
    if rest.is_empty() {
        return true;
    }
    let Some(pk) = share.primary_key.filter(|_| pk_clustered) else {
        return false;
    };
    let pk_parts = &share.key(pk).parts;
    rest.len() <= pk_parts.len() && rest.iter().zip(pk_parts).all(|(a, b)| a == b)
}
