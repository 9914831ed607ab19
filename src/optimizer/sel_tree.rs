//! Per-index forests of interval trees and their boolean combination.

use std::fmt;

use super::sel_arg::{key_and, key_or, SelArgBudget, SelArgRef};
use crate::types::KeyMap;

/// What a [`SelTree`] says about the table as a whole.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SelTreeKind {
    /// The condition is never true.
    Impossible,
    /// The condition is always true.
    Always,
    /// The condition depends on values read later; no index can be used yet.
    Maybe,
    /// Per-index trees describe the condition.
    Key,
    /// Per-index trees describe a superset of a condition that also holds
    /// `Maybe` parts.
    KeySmaller,
}

/// Disjuncts of an OR that no single index could represent. Each tree
/// describes one disjunct; the rows of all of them together are a superset
/// of the rows satisfying the OR.
#[derive(Clone, Debug, Default)]
pub struct SelImerge {
    /// One tree per disjunct.
    pub trees: Vec<SelTree>,
}

impl SelImerge {
    fn or_sel_tree(&mut self, tree: SelTree) {
        self.trees.push(tree);
    }

    /// ORs `tree` into the first member it can be unified with, or appends
    /// it. Returns `true` when the merge collapsed and must be discarded.
    pub fn or_sel_tree_with_checks(&mut self, budget: &SelArgBudget, tree: SelTree) -> bool {
        for existing in &mut self.trees {
            if sel_trees_can_be_ored(existing, &tree) {
                let current = std::mem::replace(existing, SelTree::new(SelTreeKind::Key, 0));
                return match tree_or(budget, Some(current), Some(tree)) {
                    Some(t) if !matches!(t.kind, SelTreeKind::Maybe | SelTreeKind::Always) => {
                        *existing = t;
                        false
                    }
                    _ => true,
                };
            }
        }
        self.or_sel_tree(tree);
        false
    }

    /// ORs every member of `other` into this merge.
    pub fn or_sel_imerge_with_checks(&mut self, budget: &SelArgBudget, other: SelImerge) -> bool {
        other
            .trees
            .into_iter()
            .any(|tree| self.or_sel_tree_with_checks(budget, tree))
    }
}

/// One interval tree per index plus index-merge alternatives.
#[derive(Clone, Debug)]
pub struct SelTree {
    /// Overall meaning.
    pub kind: SelTreeKind,
    /// Tree per index ordinal; `None` when the index is unconstrained.
    pub keys: Vec<Option<SelArgRef>>,
    /// Index-merge alternatives, used when `keys` holds nothing.
    pub merges: Vec<SelImerge>,
}

impl SelTree {
    pub fn new(kind: SelTreeKind, n_keys: usize) -> Self {
        Self {
            kind,
            keys: vec![None; n_keys],
            merges: Vec::new(),
        }
    }

    pub fn impossible(n_keys: usize) -> Self {
        Self::new(SelTreeKind::Impossible, n_keys)
    }

    pub fn always(n_keys: usize) -> Self {
        Self::new(SelTreeKind::Always, n_keys)
    }

    pub fn maybe(n_keys: usize) -> Self {
        Self::new(SelTreeKind::Maybe, n_keys)
    }

    /// Indexes with a tree.
    pub fn keys_map(&self) -> KeyMap {
        let mut map = KeyMap::new();
        for (idx, key) in self.keys.iter().enumerate() {
            if key.is_some() {
                map.set(idx);
            }
        }
        map
    }

    pub fn key(&self, idx: usize) -> Option<&SelArgRef> {
        self.keys.get(idx).and_then(Option::as_ref)
    }

    /// True for trees range scans can be built from.
    pub fn is_range_tree(&self) -> bool {
        matches!(self.kind, SelTreeKind::Key | SelTreeKind::KeySmaller)
    }

    fn ensure_len(&mut self, n: usize) {
        if self.keys.len() < n {
            self.keys.resize(n, None);
        }
    }
}

impl fmt::Display for SelTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        for (idx, key) in self.keys.iter().enumerate() {
            if let Some(key) = key {
                write!(f, " k{idx}=[{key}]")?;
            }
        }
        for merge in &self.merges {
            f.write_str(" merge(")?;
            for (i, tree) in merge.trees.iter().enumerate() {
                if i > 0 {
                    f.write_str(" OR ")?;
                }
                write!(f, "{tree}")?;
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}

/// Whether two trees share an index whose roots constrain the same part.
pub fn sel_trees_can_be_ored(a: &SelTree, b: &SelTree) -> bool {
    a.keys
        .iter()
        .zip(&b.keys)
        .any(|pair| matches!(pair, (Some(x), Some(y)) if x.part() == y.part()))
}

/// Drops trees whose root is not on the first key part; such trees cannot
/// drive a range scan on their own. Returns `true` if nothing is left.
pub fn remove_nonrange_trees(tree: &mut SelTree) -> bool {
    let mut empty = true;
    for key in &mut tree.keys {
        match key {
            Some(k) if k.part() != 0 => *key = None,
            Some(_) => empty = false,
            None => {}
        }
    }
    empty
}

/// Conjunction of two forests. `None` is the identity.
pub fn tree_and(
    budget: &SelArgBudget,
    t1: Option<SelTree>,
    t2: Option<SelTree>,
) -> Option<SelTree> {
    let (mut t1, mut t2) = match (t1, t2) {
        (None, t) | (t, None) => return t,
        (Some(a), Some(b)) => (a, b),
    };
    if t1.kind == SelTreeKind::Impossible || t2.kind == SelTreeKind::Always {
        return Some(t1);
    }
    if t2.kind == SelTreeKind::Impossible || t1.kind == SelTreeKind::Always {
        return Some(t2);
    }
    if t1.kind == SelTreeKind::Maybe {
        if t2.kind == SelTreeKind::Key {
            t2.kind = SelTreeKind::KeySmaller;
        }
        return Some(t2);
    }
    if t2.kind == SelTreeKind::Maybe {
        t1.kind = SelTreeKind::KeySmaller;
        return Some(t1);
    }

    let n = t1.keys.len().max(t2.keys.len());
    t1.ensure_len(n);
    t2.ensure_len(n);
    let mut any = false;
    for (k1, k2) in t1.keys.iter_mut().zip(t2.keys.iter_mut()) {
        if k1.is_none() && k2.is_none() {
            continue;
        }
        let combined = key_and(budget, k1.take(), k2.take());
        if combined.as_ref().is_some_and(|k| k.is_impossible()) {
            return Some(SelTree::impossible(n));
        }
        *k1 = combined;
        any = true;
    }
    if any {
        t1.merges.clear();
    } else {
        t1.merges.append(&mut t2.merges);
    }
    Some(t1)
}

/// Disjunction of two forests. `None` means the result cannot restrict any
/// index.
pub fn tree_or(
    budget: &SelArgBudget,
    t1: Option<SelTree>,
    t2: Option<SelTree>,
) -> Option<SelTree> {
    let (mut t1, mut t2) = (t1?, t2?);
    if t1.kind == SelTreeKind::Impossible || t2.kind == SelTreeKind::Always {
        return Some(t2);
    }
    if t2.kind == SelTreeKind::Impossible || t1.kind == SelTreeKind::Always {
        return Some(t1);
    }
    if t1.kind == SelTreeKind::Maybe {
        return Some(t1);
    }
    if t2.kind == SelTreeKind::Maybe {
        return Some(t2);
    }

    let n = t1.keys.len().max(t2.keys.len());
    t1.ensure_len(n);
    t2.ensure_len(n);

    if sel_trees_can_be_ored(&t1, &t2) {
        let mut any = false;
        for (k1, k2) in t1.keys.iter_mut().zip(t2.keys.iter_mut()) {
            *k1 = key_or(budget, k1.take(), k2.take());
            any |= k1.is_some();
        }
        t1.merges.clear();
        return any.then_some(t1);
    }

    match (t1.merges.is_empty(), t2.merges.is_empty()) {
        (true, true) => {
            if remove_nonrange_trees(&mut t1) || remove_nonrange_trees(&mut t2) {
                return Some(SelTree::always(n));
            }
            let kind = t1.kind;
            let mut merge = SelImerge::default();
            merge.or_sel_tree(t1);
            merge.or_sel_tree(t2);
            Some(SelTree {
                kind,
                keys: vec![None; n],
                merges: vec![merge],
            })
        }
        (false, false) => {
            // (a1 AND ... AND aN) OR (b1 AND ... AND bK) keeps only a1 OR b1.
            t1.merges.truncate(1);
            let Some(other) = t2.merges.into_iter().next() else {
                return Some(t1);
            };
            if t1.merges[0].or_sel_imerge_with_checks(budget, other) {
                Some(SelTree::always(n))
            } else {
                Some(t1)
            }
        }
        (t1_plain, _) => {
            if t1_plain {
                std::mem::swap(&mut t1, &mut t2);
            }
            if remove_nonrange_trees(&mut t2) {
                return Some(SelTree::always(n));
            }
            t1.merges
                .retain_mut(|merge| !merge.or_sel_tree_with_checks(budget, t2.clone()));
            if t1.merges.is_empty() {
                Some(SelTree::always(n))
            } else {
                Some(t1)
            }
        }
    }
}
