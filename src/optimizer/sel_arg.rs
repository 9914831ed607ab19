//! Interval trees over the parts of one index.
//!
//! A [`SelArg`] holds the disjoint, ascending intervals constraining one key
//! part. Each interval may carry a subtree for a later key part that applies
//! only while the interval holds, so a composite key is a tree of trees.
//!
//! Trees are persistent: operations return new trees and share untouched
//! subtrees through `Arc`. Mutation goes through `Arc::make_mut`, which
//! clones a node only while it is shared.

use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::types::Value;

/// Shared handle to an interval tree.
pub type SelArgRef = Arc<SelArg>;

/// Intervals allocated during one translation before it is abandoned.
pub const MAX_SEL_ARGS: usize = 16_000;

/// Counts interval allocations for one optimization pass.
#[derive(Debug)]
pub struct SelArgBudget {
    allocated: Cell<usize>,
    limit: usize,
}

impl SelArgBudget {
    pub fn new(limit: usize) -> Self {
        Self {
            allocated: Cell::new(0),
            limit,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(usize::MAX)
    }

    pub(crate) fn charge(&self, n: usize) {
        self.allocated.set(self.allocated.get().saturating_add(n));
    }

    pub fn allocated(&self) -> usize {
        self.allocated.get()
    }

    /// True once more intervals were allocated than the limit allows.
    pub fn exhausted(&self) -> bool {
        self.allocated.get() > self.limit
    }
}

impl Default for SelArgBudget {
    fn default() -> Self {
        Self::new(MAX_SEL_ARGS)
    }
}

/// Lower end of an interval.
#[derive(Clone, Debug)]
pub enum Lower {
    /// No lower bound (NULL included).
    Unbounded,
    /// `>= v`
    Included(Value),
    /// `> v`
    Excluded(Value),
}

/// Upper end of an interval.
#[derive(Clone, Debug)]
pub enum Upper {
    /// No upper bound.
    Unbounded,
    /// `<= v`
    Included(Value),
    /// `< v`
    Excluded(Value),
}

/// Position on the key line. Every value owns three positions: just below,
/// at, and just above it.
#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum Pos<'a> {
    NegInf,
    At(&'a Value, i8),
    PosInf,
}

impl Lower {
    fn pos(&self) -> Pos<'_> {
        match self {
            Lower::Unbounded => Pos::NegInf,
            Lower::Included(v) => Pos::At(v, 0),
            Lower::Excluded(v) => Pos::At(v, 1),
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Lower::Unbounded => None,
            Lower::Included(v) | Lower::Excluded(v) => Some(v),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, Lower::Unbounded)
    }

    pub fn is_exclusive(&self) -> bool {
        matches!(self, Lower::Excluded(_))
    }

    /// Upper bound ending right before this lower bound.
    fn before(&self) -> Option<Upper> {
        match self {
            Lower::Unbounded => None,
            Lower::Included(v) => Some(Upper::Excluded(v.clone())),
            Lower::Excluded(v) => Some(Upper::Included(v.clone())),
        }
    }

    /// Whether `v` lies at or above this bound.
    pub fn admits(&self, v: &Value) -> bool {
        self.pos() <= Pos::At(v, 0)
    }
}

impl Upper {
    fn pos(&self) -> Pos<'_> {
        match self {
            Upper::Unbounded => Pos::PosInf,
            Upper::Included(v) => Pos::At(v, 0),
            Upper::Excluded(v) => Pos::At(v, -1),
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Upper::Unbounded => None,
            Upper::Included(v) | Upper::Excluded(v) => Some(v),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, Upper::Unbounded)
    }

    pub fn is_exclusive(&self) -> bool {
        matches!(self, Upper::Excluded(_))
    }

    /// Lower bound starting right after this upper bound.
    fn after(&self) -> Option<Lower> {
        match self {
            Upper::Unbounded => None,
            Upper::Included(v) => Some(Lower::Excluded(v.clone())),
            Upper::Excluded(v) => Some(Lower::Included(v.clone())),
        }
    }

    /// Whether `v` lies at or below this bound.
    pub fn admits(&self, v: &Value) -> bool {
        Pos::At(v, 0) <= self.pos()
    }
}

impl PartialEq for Lower {
    fn eq(&self, other: &Self) -> bool {
        self.pos() == other.pos()
    }
}

impl Eq for Lower {}

impl PartialOrd for Lower {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Lower {
    fn cmp(&self, other: &Self) -> Ordering {
        self.pos().cmp(&other.pos())
    }
}

impl PartialEq for Upper {
    fn eq(&self, other: &Self) -> bool {
        self.pos() == other.pos()
    }
}

impl Eq for Upper {}

impl PartialOrd for Upper {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Upper {
    fn cmp(&self, other: &Self) -> Ordering {
        self.pos().cmp(&other.pos())
    }
}

fn lower_above_upper(lower: &Lower, upper: &Upper) -> bool {
    lower.pos() > upper.pos()
}

/// One interval on a key part, with the constraint on later parts that
/// applies inside it.
#[derive(Clone, Debug)]
pub struct Interval {
    /// Lower end.
    pub lower: Lower,
    /// Upper end.
    pub upper: Upper,
    /// Tree over a later key part, conditioned on this interval.
    pub next: Option<SelArgRef>,
}

impl Interval {
    pub fn new(lower: Lower, upper: Upper) -> Self {
        Self {
            lower,
            upper,
            next: None,
        }
    }

    /// Closed single-value interval.
    pub fn point(v: Value) -> Self {
        Self::new(Lower::Included(v.clone()), Upper::Included(v))
    }

    pub fn with_next(mut self, next: Option<SelArgRef>) -> Self {
        self.next = next;
        self
    }

    pub fn is_empty(&self) -> bool {
        lower_above_upper(&self.lower, &self.upper)
    }

    /// `[v, v]`
    pub fn is_point(&self) -> bool {
        matches!((&self.lower, &self.upper), (Lower::Included(a), Upper::Included(b)) if a == b)
    }

    /// `(-inf, +inf)`
    pub fn is_full(&self) -> bool {
        self.lower.is_unbounded() && self.upper.is_unbounded()
    }

    pub fn contains(&self, v: &Value) -> bool {
        self.lower.admits(v) && self.upper.admits(v)
    }

    fn overlaps(&self, other: &Interval) -> bool {
        !lower_above_upper(&self.lower, &other.upper)
            && !lower_above_upper(&other.lower, &self.upper)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.lower {
            Lower::Unbounded => f.write_str("(-inf")?,
            Lower::Included(v) => write!(f, "[{v}")?,
            Lower::Excluded(v) => write!(f, "({v}")?,
        }
        f.write_str(", ")?;
        match &self.upper {
            Upper::Unbounded => f.write_str("+inf)"),
            Upper::Included(v) => write!(f, "{v}]"),
            Upper::Excluded(v) => write!(f, "{v})"),
        }
    }
}

/// What a [`SelArg`] says about its key part.
#[derive(Clone, Debug)]
pub enum SelArgKind {
    /// Disjoint intervals keyed by lower bound.
    KeyRange(BTreeMap<Lower, Interval>),
    /// The part is unconstrained now but may be bound during execution; a
    /// later part may still be constrained.
    MaybeKey {
        /// Constraint on a later key part.
        next: Option<SelArgRef>,
    },
    /// No key value can satisfy the condition.
    Impossible,
}

/// Interval tree over one key part of one index.
#[derive(Clone, Debug)]
pub struct SelArg {
    part: u16,
    maybe_flag: bool,
    kind: SelArgKind,
}

impl SelArg {
    /// Tree with a single interval.
    pub fn single(part: u16, lower: Lower, upper: Upper) -> Self {
        Self::from_intervals(part, vec![Interval::new(lower, upper)])
    }

    /// `[v, v]` on `part`.
    pub fn point(part: u16, v: Value) -> Self {
        Self::from_intervals(part, vec![Interval::point(v)])
    }

    /// Builds a tree from intervals; they must be disjoint.
    pub fn from_intervals(part: u16, intervals: Vec<Interval>) -> Self {
        let mut arg = Self {
            part,
            maybe_flag: false,
            kind: SelArgKind::KeyRange(BTreeMap::new()),
        };
        for iv in intervals {
            arg.insert(iv);
        }
        arg
    }

    pub fn maybe_key(part: u16) -> Self {
        Self {
            part,
            maybe_flag: true,
            kind: SelArgKind::MaybeKey { next: None },
        }
    }

    pub fn impossible(part: u16) -> Self {
        Self {
            part,
            maybe_flag: false,
            kind: SelArgKind::Impossible,
        }
    }

    pub fn part(&self) -> u16 {
        self.part
    }

    pub fn kind(&self) -> &SelArgKind {
        &self.kind
    }

    pub fn maybe_flag(&self) -> bool {
        self.maybe_flag
    }

    pub fn set_maybe_flag(&mut self, flag: bool) {
        self.maybe_flag = flag;
    }

    pub fn is_impossible(&self) -> bool {
        matches!(self.kind, SelArgKind::Impossible)
    }

    pub fn is_maybe_key(&self) -> bool {
        matches!(self.kind, SelArgKind::MaybeKey { .. })
    }

    pub fn is_key_range(&self) -> bool {
        matches!(self.kind, SelArgKind::KeyRange(_))
    }

    /// Intervals in ascending order; empty unless this is a key range.
    pub fn intervals(&self) -> impl DoubleEndedIterator<Item = &Interval> + '_ {
        let map = match &self.kind {
            SelArgKind::KeyRange(map) => Some(map),
            _ => None,
        };
        map.into_iter().flat_map(|m| m.values())
    }

    pub fn first(&self) -> Option<&Interval> {
        self.intervals().next()
    }

    pub fn last(&self) -> Option<&Interval> {
        self.intervals().next_back()
    }

    /// Number of intervals on this part.
    pub fn elements(&self) -> usize {
        match &self.kind {
            SelArgKind::KeyRange(map) => map.len(),
            _ => 0,
        }
    }

    /// Inserts a disjoint interval. Panics on overlap: callers must only add
    /// intervals already cut against the tree.
    pub fn insert(&mut self, iv: Interval) {
        let SelArgKind::KeyRange(map) = &mut self.kind else {
            panic!("insert into non-range SelArg on part {}", self.part);
        };
        assert!(!iv.is_empty(), "inserting empty interval {iv}");
        if let Some((_, prev)) = map.range(..=iv.lower.clone()).next_back() {
            assert!(!prev.overlaps(&iv), "interval {iv} overlaps {prev}");
        }
        if let Some((_, succ)) = map.range(iv.lower.clone()..).next() {
            assert!(!succ.overlaps(&iv), "interval {iv} overlaps {succ}");
        }
        map.insert(iv.lower.clone(), iv);
    }

    /// Removes the interval starting at `lower`.
    pub fn tree_delete(&mut self, lower: &Lower) -> Option<Interval> {
        match &mut self.kind {
            SelArgKind::KeyRange(map) => map.remove(lower),
            _ => None,
        }
    }

    /// Interval containing `v`.
    pub fn find(&self, v: &Value) -> Option<&Interval> {
        let SelArgKind::KeyRange(map) = &self.kind else {
            return None;
        };
        map.range(..=Lower::Included(v.clone()))
            .next_back()
            .map(|(_, iv)| iv)
            .filter(|iv| iv.contains(v))
    }

    /// Whether a full index key (values by key part) satisfies this tree.
    pub fn matches(&self, key: &[Value]) -> bool {
        match &self.kind {
            SelArgKind::Impossible => false,
            SelArgKind::MaybeKey { next } => next.as_ref().map_or(true, |n| n.matches(key)),
            SelArgKind::KeyRange(_) => {
                let Some(v) = key.get(self.part as usize) else {
                    return true;
                };
                match self.find(v) {
                    None => false,
                    Some(iv) => iv.next.as_ref().map_or(true, |n| n.matches(key)),
                }
            }
        }
    }

    /// Highest key part constrained anywhere in this tree.
    pub fn max_part(&self) -> u16 {
        let nested = match &self.kind {
            SelArgKind::KeyRange(map) => map
                .values()
                .filter_map(|iv| iv.next.as_ref().map(|n| n.max_part()))
                .max(),
            SelArgKind::MaybeKey { next } => next.as_ref().map(|n| n.max_part()),
            SelArgKind::Impossible => None,
        };
        nested.map_or(self.part, |p| p.max(self.part))
    }
}

impl fmt::Display for SelArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            SelArgKind::Impossible => write!(f, "k{}:IMPOSSIBLE", self.part),
            SelArgKind::MaybeKey { next } => {
                write!(f, "k{}:MAYBE", self.part)?;
                if let Some(n) = next {
                    write!(f, " -> {{{n}}}")?;
                }
                Ok(())
            }
            SelArgKind::KeyRange(map) => {
                let mut first = true;
                for iv in map.values() {
                    if !first {
                        f.write_str(" | ")?;
                    }
                    first = false;
                    write!(f, "k{}:{iv}", self.part)?;
                    if let Some(n) = &iv.next {
                        write!(f, " -> {{{n}}}")?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// Structural equality of two optional trees, with a pointer fast path.
pub fn eq_tree(a: Option<&SelArgRef>, b: Option<&SelArgRef>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            if Arc::ptr_eq(a, b) {
                return true;
            }
            if a.part != b.part {
                return false;
            }
            match (&a.kind, &b.kind) {
                (SelArgKind::Impossible, SelArgKind::Impossible) => true,
                (SelArgKind::MaybeKey { next: x }, SelArgKind::MaybeKey { next: y }) => {
                    eq_tree(x.as_ref(), y.as_ref())
                }
                (SelArgKind::KeyRange(x), SelArgKind::KeyRange(y)) => {
                    x.len() == y.len()
                        && x.values().zip(y.values()).all(|(p, q)| {
                            p.lower == q.lower
                                && p.upper == q.upper
                                && eq_tree(p.next.as_ref(), q.next.as_ref())
                        })
                }
                _ => false,
            }
        }
        _ => false,
    }
}

/// Conjunction of two trees over the same index. `None` means "no
/// constraint" and is the identity.
pub fn key_and(
    budget: &SelArgBudget,
    a: Option<SelArgRef>,
    b: Option<SelArgRef>,
) -> Option<SelArgRef> {
    let (mut a, mut b) = match (a, b) {
        (None, b) => return b,
        (a, None) => return a,
        (Some(a), Some(b)) => (a, b),
    };
    if a.is_impossible() {
        return Some(a);
    }
    if b.is_impossible() {
        return Some(b);
    }

    if a.part != b.part {
        if a.part > b.part {
            std::mem::swap(&mut a, &mut b);
        }
        if a.is_maybe_key() {
            let inner = Arc::make_mut(&mut a);
            let SelArgKind::MaybeKey { next } = &mut inner.kind else {
                unreachable!("checked maybe key");
            };
            let combined = key_and(budget, next.take(), Some(b));
            if let Some(n) = combined.as_ref().filter(|n| n.is_impossible()) {
                return Some(Arc::clone(n));
            }
            *next = combined;
            return Some(a);
        }
        return Some(and_all_keys(budget, a, b));
    }

    if a.is_maybe_key() {
        std::mem::swap(&mut a, &mut b);
    }
    if b.is_maybe_key() {
        let b_next = match &b.kind {
            SelArgKind::MaybeKey { next } => next.clone(),
            _ => None,
        };
        if a.is_maybe_key() {
            let inner = Arc::make_mut(&mut a);
            let SelArgKind::MaybeKey { next } = &mut inner.kind else {
                unreachable!("checked maybe key");
            };
            let combined = key_and(budget, next.take(), b_next);
            if let Some(n) = combined.as_ref().filter(|n| n.is_impossible()) {
                return Some(Arc::clone(n));
            }
            *next = combined;
            return Some(a);
        }
        Arc::make_mut(&mut a).maybe_flag = true;
        return match b_next {
            Some(n) => Some(and_all_keys(budget, a, n)),
            None => Some(a),
        };
    }

    let part = a.part;
    let mut out = BTreeMap::new();
    let xs: Vec<&Interval> = a.intervals().collect();
    let ys: Vec<&Interval> = b.intervals().collect();
    let (mut i, mut j) = (0, 0);
    while i < xs.len() && j < ys.len() {
        let (x, y) = (xs[i], ys[j]);
        if lower_above_upper(&y.lower, &x.upper) {
            i += 1;
            continue;
        }
        if lower_above_upper(&x.lower, &y.upper) {
            j += 1;
            continue;
        }
        let next = key_and(budget, x.next.clone(), y.next.clone());
        if !next.as_ref().is_some_and(|n| n.is_impossible()) {
            let lower = std::cmp::max(&x.lower, &y.lower).clone();
            let upper = std::cmp::min(&x.upper, &y.upper).clone();
            budget.charge(1);
            out.insert(lower.clone(), Interval { lower, upper, next });
        }
        if x.upper < y.upper {
            i += 1;
        } else {
            j += 1;
        }
    }
    if out.is_empty() {
        return Some(Arc::new(SelArg::impossible(part)));
    }
    Some(Arc::new(SelArg {
        part,
        maybe_flag: a.maybe_flag && b.maybe_flag,
        kind: SelArgKind::KeyRange(out),
    }))
}

/// ANDs `b` (a tree over a later part) into every interval of `a`.
fn and_all_keys(budget: &SelArgBudget, mut a: SelArgRef, b: SelArgRef) -> SelArgRef {
    let part = a.part;
    let inner = Arc::make_mut(&mut a);
    inner.maybe_flag |= b.maybe_flag;
    let SelArgKind::KeyRange(map) = &mut inner.kind else {
        return a;
    };
    let mut dropped = Vec::new();
    for (lower, iv) in map.iter_mut() {
        let combined = match iv.next.take() {
            Some(n) => key_and(budget, Some(n), Some(Arc::clone(&b))),
            None => Some(Arc::clone(&b)),
        };
        if combined.as_ref().is_some_and(|n| n.is_impossible()) {
            dropped.push(lower.clone());
        } else {
            iv.next = combined;
        }
    }
    for lower in dropped {
        map.remove(&lower);
    }
    if map.is_empty() {
        return Arc::new(SelArg::impossible(part));
    }
    a
}

struct Piece {
    lower: Lower,
    upper: Upper,
    next: Option<SelArgRef>,
}

/// Disjunction of two trees over the same index. `None` means the result
/// does not constrain the index at all.
pub fn key_or(
    budget: &SelArgBudget,
    a: Option<SelArgRef>,
    b: Option<SelArgRef>,
) -> Option<SelArgRef> {
    let (a, b) = (a?, b?);
    if a.is_impossible() {
        return Some(b);
    }
    if b.is_impossible() {
        return Some(a);
    }
    if a.part != b.part {
        return None;
    }
    // A MAYBE_KEY side admits every key of this part, so the union does too.
    // Its `next` is dropped: rows from the other side need not satisfy it.
    if a.is_maybe_key() || b.is_maybe_key() {
        return Some(Arc::new(SelArg::maybe_key(a.part)));
    }

    let part = a.part;
    let maybe_flag = a.maybe_flag || b.maybe_flag;

    // Cut the key line at every interval start and right after every
    // interval end; each cut starts one elementary segment.
    let mut cuts: Vec<Lower> = a
        .intervals()
        .chain(b.intervals())
        .flat_map(|iv| [Some(iv.lower.clone()), iv.upper.after()])
        .flatten()
        .collect();
    cuts.sort();
    cuts.dedup();

    let xs: Vec<&Interval> = a.intervals().collect();
    let ys: Vec<&Interval> = b.intervals().collect();
    let covering = |list: &[&Interval], at: &Lower| -> Option<usize> {
        let idx = list.partition_point(|iv| iv.lower <= *at);
        idx.checked_sub(1)
            .filter(|&i| !lower_above_upper(at, &list[i].upper))
    };

    let mut pieces: Vec<Piece> = Vec::new();
    for (idx, cut) in cuts.iter().enumerate() {
        let upper = match cuts.get(idx + 1) {
            Some(next_cut) => match next_cut.before() {
                Some(u) => u,
                None => continue,
            },
            None => Upper::Unbounded,
        };
        let in_a = covering(&xs, cut);
        let in_b = covering(&ys, cut);
        let next = match (in_a, in_b) {
            (None, None) => continue,
            (Some(i), None) => xs[i].next.clone(),
            (None, Some(j)) => ys[j].next.clone(),
            (Some(i), Some(j)) => key_or(budget, xs[i].next.clone(), ys[j].next.clone()),
        };
        let upper = match (in_a, in_b) {
            (Some(i), None) => std::cmp::min(upper, xs[i].upper.clone()),
            (None, Some(j)) => std::cmp::min(upper, ys[j].upper.clone()),
            _ => upper,
        };
        if let Some(prev) = pieces.last_mut() {
            let touching = prev.upper.after().is_some_and(|l| l == *cut);
            if touching && eq_tree(prev.next.as_ref(), next.as_ref()) {
                prev.upper = upper;
                continue;
            }
        }
        pieces.push(Piece {
            lower: cut.clone(),
            upper,
            next,
        });
    }

    if pieces.len() == 1 && pieces[0].lower.is_unbounded() && pieces[0].upper.is_unbounded() {
        return maybe_flag.then(|| Arc::new(SelArg::maybe_key(part)));
    }
    budget.charge(pieces.len().saturating_sub(a.elements().max(b.elements())));
    let map = pieces
        .into_iter()
        .map(|p| {
            (
                p.lower.clone(),
                Interval {
                    lower: p.lower,
                    upper: p.upper,
                    next: p.next,
                },
            )
        })
        .collect();
    Some(Arc::new(SelArg {
        part,
        maybe_flag,
        kind: SelArgKind::KeyRange(map),
    }))
}
