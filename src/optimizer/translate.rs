//! Translation of predicates into per-index interval trees.
//!
//! Every comparison of an indexed column against a value known at
//! optimization time becomes a one-part interval tree on each key part over
//! that column. Trees for different parts of one index are chained, trees
//! of conjuncts are intersected and trees of disjuncts are united or, when no
//! single index can express the OR, collected as index-merge alternatives.
//!
//! Anything the translator cannot express yields "no tree", which widens the
//! result. Only provably empty conditions produce an impossible tree.

use std::sync::Arc;

use tracing::{debug, trace};

use super::config::OptimizerConfig;
use super::sel_arg::{key_and, Lower, SelArg, SelArgBudget, Upper};
use super::sel_tree::{tree_and, tree_or, SelTree, SelTreeKind};
use crate::query::{CmpOp, Cond, Operand};
use crate::schema::{
    temporal_seconds, Collation, Field, KeyAlgorithm, KeyPart, StoreOutcome, TableShare,
    TIMESTAMP_MAX,
};
use crate::types::{item_cmp_type, FieldId, KeyMap, ResultType, Value};

/// Highest code point; pads the upper end of `LIKE` prefix ranges.
const MAX_SORT_CHAR: char = char::MAX;

/// Predicate shape handed to the leaf builder.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum LeafOp {
    Cmp(CmpOp),
    Like(char),
    IsNull,
    IsNotNull,
}

/// One key part of a usable index.
#[derive(Clone, Debug)]
struct ParamKeyPart {
    index: usize,
    part: u16,
    key_part: KeyPart,
    algorithm: KeyAlgorithm,
}

/// State of one translation: the table, the indexes it may use, the
/// equality classes of the query and the allocation budget.
#[derive(Debug)]
pub struct RangeParam<'a> {
    share: &'a TableShare,
    n_keys: usize,
    key_parts: Vec<ParamKeyPart>,
    eq_classes: Vec<Vec<FieldId>>,
    not_in_threshold: usize,
    budget: SelArgBudget,
}

impl<'a> RangeParam<'a> {
    /// Prepares a translation over the indexes in `keys_to_use`.
    pub fn new(share: &'a TableShare, keys_to_use: KeyMap, config: &OptimizerConfig) -> Self {
        let mut key_parts = Vec::new();
        for id in share.key_ids() {
            if !keys_to_use.is_set(id.0 as usize) {
                continue;
            }
            let key = share.key(id);
            for (part, key_part) in key.parts.iter().enumerate() {
                key_parts.push(ParamKeyPart {
                    index: id.0 as usize,
                    part: part as u16,
                    key_part: key_part.clone(),
                    algorithm: key.algorithm,
                });
            }
        }
        Self {
            share,
            n_keys: share.keys.len(),
            key_parts,
            eq_classes: Vec::new(),
            not_in_threshold: config.not_in_ignore_threshold,
            budget: SelArgBudget::new(config.max_sel_args),
        }
    }

    /// Registers the equality classes found among the top-level conjuncts of
    /// `cond`, so comparisons on one member constrain every member.
    pub fn with_equalities(mut self, cond: &Cond) -> Self {
        let conjuncts: &[Cond] = match cond {
            Cond::And { args } => args,
            other => std::slice::from_ref(other),
        };
        for c in conjuncts {
            if let Cond::MultiEqual { fields, .. } = c {
                if fields.len() > 1 {
                    self.eq_classes.push(fields.clone());
                }
            }
        }
        self
    }

    pub fn share(&self) -> &TableShare {
        self.share
    }

    pub fn budget(&self) -> &SelArgBudget {
        &self.budget
    }

    /// Number of index slots in produced trees.
    pub fn n_keys(&self) -> usize {
        self.n_keys
    }

    /// Builds the tree for `cond`; `None` when no index can be restricted.
    pub fn get_mm_tree(&self, cond: &Cond) -> Option<SelTree> {
        let tree = self.mm_tree(cond);
        if self.budget.exhausted() {
            debug!(
                allocated = self.budget.allocated(),
                "range analysis abandoned: too many intervals"
            );
            return None;
        }
        if let Some(tree) = &tree {
            trace!(%tree, "range tree built");
        }
        tree
    }

    fn mm_tree(&self, cond: &Cond) -> Option<SelTree> {
        match cond {
            Cond::And { args } => {
                let mut tree = None;
                for arg in args {
                    let new_tree = self.mm_tree(arg);
                    if self.budget.exhausted() {
                        return None;
                    }
                    tree = tree_and(&self.budget, tree, new_tree);
                    if tree.as_ref().is_some_and(|t| t.kind == SelTreeKind::Impossible) {
                        break;
                    }
                }
                tree
            }
            Cond::Or { args } => {
                let (first, rest) = args.split_first()?;
                let mut tree = self.mm_tree(first);
                if tree.is_none() {
                    return None;
                }
                for arg in rest {
                    let new_tree = self.mm_tree(arg)?;
                    if self.budget.exhausted() {
                        return None;
                    }
                    tree = tree_or(&self.budget, tree, Some(new_tree));
                    match &tree {
                        None => break,
                        Some(t) if t.kind == SelTreeKind::Always => break,
                        Some(_) => {}
                    }
                }
                tree
            }
            _ if is_constant(cond) => {
                let kind = if cond.eval(self.share, &[]) == Some(true) {
                    SelTreeKind::Always
                } else {
                    SelTreeKind::Impossible
                };
                Some(SelTree::new(kind, self.n_keys))
            }
            Cond::Field { .. } => Some(SelTree::maybe(self.n_keys)),
            Cond::Opaque { .. } | Cond::Const { .. } => None,
            Cond::Cmp {
                cmp,
                left,
                right,
                collation,
            } => {
                let (field, value, cmp) = match (left, right) {
                    (Operand::Field(f), value) => (*f, value, *cmp),
                    (value, Operand::Field(f)) => (*f, value, cmp.reversed()),
                    _ => return None,
                };
                if self.collation_mismatch(field, value, *collation) {
                    return None;
                }
                self.full_func_tree(field, |f| {
                    if cmp == CmpOp::Ne {
                        self.ne_tree(f, value, value)
                    } else {
                        self.get_mm_parts(f, LeafOp::Cmp(cmp), Some(value))
                    }
                })
            }
            Cond::Between {
                expr,
                low,
                high,
                negated,
            } => self.between_tree(expr, low, high, *negated),
            Cond::In {
                field,
                list,
                negated,
            } => self.full_func_tree(*field, |f| self.in_tree(f, list, *negated)),
            Cond::Like {
                field,
                pattern,
                escape,
            } => {
                let pattern = Operand::Const(pattern.clone());
                let op = LeafOp::Like(escape.unwrap_or('\\'));
                self.full_func_tree(*field, |f| self.get_mm_parts(f, op, Some(&pattern)))
            }
            Cond::IsNull { field, negated } => {
                let op = if *negated {
                    LeafOp::IsNotNull
                } else {
                    LeafOp::IsNull
                };
                self.full_func_tree(*field, |f| self.get_mm_parts(f, op, None))
            }
            Cond::MultiEqual { fields, constant } => {
                let value = Operand::Const(constant.clone()?);
                let mut ftree = None;
                for f in fields {
                    let tree = self.get_mm_parts(*f, LeafOp::Cmp(CmpOp::Eq), Some(&value));
                    ftree = tree_and(&self.budget, ftree, tree);
                }
                ftree
            }
        }
    }

    /// An explicit non-binary collation that differs from the column's makes
    /// the index order useless for the comparison.
    fn collation_mismatch(&self, field: FieldId, value: &Operand, forced: Option<Collation>) -> bool {
        let def = self.share.field(field);
        let value_is_string = value
            .as_const()
            .is_some_and(|v| v.result_type() == ResultType::String);
        match forced {
            Some(c) => {
                def.is_string() && value_is_string && c != def.collation() && c != Collation::Binary
            }
            None => false,
        }
    }

    /// Applies `build` to `field` and to every column known equal to it and
    /// intersects the results.
    fn full_func_tree<F>(&self, field: FieldId, build: F) -> Option<SelTree>
    where
        F: Fn(FieldId) -> Option<SelTree>,
    {
        let mut ftree = build(field);
        for other in self.equal_fields(field) {
            let tree = build(other);
            ftree = tree_and(&self.budget, ftree, tree);
        }
        ftree
    }

    fn equal_fields(&self, field: FieldId) -> impl Iterator<Item = FieldId> + '_ {
        self.eq_classes
            .iter()
            .filter(move |class| class.contains(&field))
            .flat_map(|class| class.iter().copied())
            .filter(move |f| *f != field)
    }

    /// `field < lt OR field > gt`
    fn ne_tree(&self, field: FieldId, lt: &Operand, gt: &Operand) -> Option<SelTree> {
        let tree = self.get_mm_parts(field, LeafOp::Cmp(CmpOp::Lt), Some(lt))?;
        tree_or(
            &self.budget,
            Some(tree),
            self.get_mm_parts(field, LeafOp::Cmp(CmpOp::Gt), Some(gt)),
        )
    }

    fn between_tree(
        &self,
        expr: &Operand,
        low: &Operand,
        high: &Operand,
        negated: bool,
    ) -> Option<SelTree> {
        let ftree = match expr {
            Operand::Field(field) => self.full_func_tree(*field, |f| {
                if negated {
                    self.ne_tree(f, low, high)
                } else {
                    let tree = self.get_mm_parts(f, LeafOp::Cmp(CmpOp::Ge), Some(low))?;
                    tree_and(
                        &self.budget,
                        Some(tree),
                        self.get_mm_parts(f, LeafOp::Cmp(CmpOp::Le), Some(high)),
                    )
                }
            }),
            _ => None,
        };

        // A column used as a bound is constrained by the tested value:
        // `c BETWEEN f1 AND f2` implies `f1 <= c AND f2 >= c`.
        let mut tree: Option<SelTree> = None;
        for (is_low, bound) in [(true, low), (false, high)] {
            match bound {
                Operand::Field(field) => {
                    let cmp = match (negated, is_low) {
                        (true, true) => CmpOp::Gt,
                        (true, false) => CmpOp::Lt,
                        (false, true) => CmpOp::Le,
                        (false, false) => CmpOp::Ge,
                    };
                    let tmp = self.full_func_tree(*field, |f| {
                        self.get_mm_parts(f, LeafOp::Cmp(cmp), Some(expr))
                    });
                    tree = if negated {
                        match tree {
                            None => tmp,
                            some => tree_or(&self.budget, some, tmp),
                        }
                    } else {
                        tree_and(&self.budget, tree, tmp)
                    };
                }
                _ if negated => {
                    tree = None;
                    break;
                }
                _ => {}
            }
        }
        tree_and(&self.budget, ftree, tree)
    }

    fn in_tree(&self, field: FieldId, list: &[Operand], negated: bool) -> Option<SelTree> {
        let def = self.share.field(field);
        let compatible = list.iter().all(|item| match item {
            Operand::Const(v) => v.is_null() || v.result_type() == def.result_type(),
            Operand::Deferred => true,
            Operand::Field(_) => false,
        });
        if !compatible {
            return None;
        }
        let eq = LeafOp::Cmp(CmpOp::Eq);
        if !negated {
            let (first, rest) = list.split_first()?;
            let mut tree = self.get_mm_parts(field, eq, Some(first));
            if tree.is_some() {
                for item in rest {
                    tree = tree_or(&self.budget, tree, self.get_mm_parts(field, eq, Some(item)));
                }
            }
            return tree;
        }

        if list.iter().all(|item| matches!(item, Operand::Const(_))) {
            return self.not_in_tree(def, list);
        }
        let (first, rest) = list.split_first()?;
        let mut tree = self.ne_tree(field, first, first);
        if tree.is_some() {
            for item in rest {
                tree = tree_and(&self.budget, tree, self.ne_tree(field, item, item));
            }
        }
        tree
    }

    /// `field NOT IN (c0, ..., cn)` as `(-inf, c0) ∪ (c0, c1) ∪ ... ∪ (cn, +inf)`.
    fn not_in_tree(&self, def: &Field, list: &[Operand]) -> Option<SelTree> {
        if list.len() > self.not_in_threshold {
            debug!(
                members = list.len(),
                threshold = self.not_in_threshold,
                "NOT IN list too long for range analysis"
            );
            return None;
        }
        let mut values: Vec<(Value, Value)> = list
            .iter()
            .filter_map(Operand::as_const)
            .filter(|v| !v.is_null())
            .map(|v| (def.key_image(v), v.clone()))
            .collect();
        values.sort_by(|a, b| a.0.cmp(&b.0));
        values.dedup_by(|a, b| a.0 == b.0);

        let lt = LeafOp::Cmp(CmpOp::Lt);
        let mut iter = values.iter().map(|(_, v)| Operand::Const(v.clone()));
        let mut last = None;
        let mut tree = None;
        for value in iter.by_ref() {
            tree = Some(self.get_mm_parts(def.id, lt, Some(&value))?);
            last = Some(value);
            if tree.as_ref().is_some_and(|t| t.kind != SelTreeKind::Impossible) {
                break;
            }
        }
        let mut tree = tree.filter(|t| t.kind != SelTreeKind::Impossible)?;

        for value in iter {
            let mut gap = self.get_mm_parts(def.id, lt, Some(&value))?;
            for (idx, slot) in gap.keys.iter_mut().enumerate() {
                let prev_upper = tree
                    .key(idx)
                    .and_then(|k| k.last())
                    .and_then(|iv| iv.upper.value().cloned());
                if let (Some(arg), Some(prev)) = (slot.as_mut(), prev_upper) {
                    narrow_lower(Arc::make_mut(arg), Lower::Excluded(prev));
                }
            }
            tree = tree_or(&self.budget, Some(tree), Some(gap))?;
            last = Some(value);
        }

        if tree.kind == SelTreeKind::Impossible {
            return Some(tree);
        }
        let last = last?;
        tree_or(
            &self.budget,
            Some(tree),
            self.get_mm_parts(def.id, LeafOp::Cmp(CmpOp::Gt), Some(&last)),
        )
    }

    /// Builds the tree for one predicate on one column: a leaf on every key
    /// part over `field`, chained per index.
    fn get_mm_parts(&self, field: FieldId, op: LeafOp, value: Option<&Operand>) -> Option<SelTree> {
        if matches!(value, Some(Operand::Field(_))) {
            return None;
        }
        let mut tree: Option<SelTree> = None;
        for kp in self.key_parts.iter().filter(|kp| kp.key_part.field == field) {
            let t = tree.get_or_insert_with(|| SelTree::new(SelTreeKind::Key, self.n_keys));
            let arg = match (op, value) {
                (_, Some(Operand::Deferred)) => SelArg::maybe_key(kp.part),
                (LeafOp::IsNull | LeafOp::IsNotNull, _) => {
                    match self.null_leaf(kp, op == LeafOp::IsNotNull) {
                        Some(arg) => arg,
                        None => continue,
                    }
                }
                (_, Some(Operand::Const(v))) => match self.get_mm_leaf(kp, op, v) {
                    Some(arg) => arg,
                    None => continue,
                },
                _ => continue,
            };
            if arg.is_impossible() {
                return Some(SelTree::impossible(self.n_keys));
            }
            self.budget.charge(arg.elements().max(1));
            let slot = &mut t.keys[kp.index];
            *slot = key_and(&self.budget, slot.take(), Some(Arc::new(arg)));
        }
        tree
    }

    fn null_leaf(&self, kp: &ParamKeyPart, negated: bool) -> Option<SelArg> {
        let field = self.share.field(kp.key_part.field);
        if !field.nullable {
            return (!negated).then(|| SelArg::impossible(kp.part));
        }
        if !negated {
            return Some(SelArg::point(kp.part, Value::Null));
        }
        if kp.algorithm == KeyAlgorithm::Hash {
            return None;
        }
        Some(SelArg::single(
            kp.part,
            Lower::Excluded(Value::Null),
            Upper::Unbounded,
        ))
    }

    /// Interval for `field op value` on one key part.
    fn get_mm_leaf(&self, kp: &ParamKeyPart, op: LeafOp, value: &Value) -> Option<SelArg> {
        let field = self.share.field(kp.key_part.field);
        let part = kp.part;
        let optimize_range = kp.algorithm == KeyAlgorithm::Btree;

        let mut cmp = match op {
            LeafOp::Like(escape) => {
                if !optimize_range {
                    return None;
                }
                if value.is_null() {
                    return Some(SelArg::impossible(part));
                }
                if field.cmp_type() != ResultType::String {
                    return None;
                }
                let (lo, hi) = like_range(field, &kp.key_part, &value.render(), escape)?;
                return Some(SelArg::single(part, Lower::Included(lo), Upper::Included(hi)));
            }
            LeafOp::Cmp(cmp) => cmp,
            LeafOp::IsNull | LeafOp::IsNotNull => return None,
        };
        let is_eq = matches!(cmp, CmpOp::Eq | CmpOp::NullSafeEq);
        if !optimize_range && !is_eq {
            return None;
        }
        if cmp == CmpOp::Ne {
            return None;
        }
        if field.result_type() == ResultType::String
            && value.result_type() != ResultType::String
            && field.cmp_type() != value.result_type()
        {
            return None;
        }

        let (outcome, clamped) = if field.is_timestamp()
            && !value.is_null()
            && value.result_type() == ResultType::String
        {
            let secs = temporal_seconds(value)?;
            let bounded = secs.clamp(0, TIMESTAMP_MAX);
            (StoreOutcome::Exact(Value::Int(bounded)), bounded != secs)
        } else {
            (field.store(value), false)
        };

        let err = outcome.code();
        if err > 0 {
            if field.cmp_type() != value.result_type() {
                if is_eq
                    && value.result_type() == item_cmp_type(field.result_type(), value.result_type())
                {
                    return Some(SelArg::impossible(part));
                }
                // A DATETIME cut to a DATE still bounds a range, closed.
                let date_cut = err == 3
                    && field.is_date()
                    && matches!(cmp, CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge);
                if !date_cut {
                    return None;
                }
            } else if err == 1 && field.result_type() == ResultType::Int {
                if cmp == CmpOp::Lt && value.is_positive() {
                    cmp = CmpOp::Le;
                } else if cmp == CmpOp::Gt && !field.is_unsigned() && value.negative_int().is_some()
                {
                    cmp = CmpOp::Ge;
                }
            } else if err == 1 && is_eq {
                return Some(SelArg::impossible(part));
            }
        } else if err < 0 {
            return Some(SelArg::impossible(part));
        }

        let stored = outcome.stored()?;
        if cmp != CmpOp::NullSafeEq && stored.is_null() {
            return Some(SelArg::impossible(part));
        }

        if field.result_type() == ResultType::Int
            && value.result_type() == ResultType::Int
            && field.is_unsigned()
            && value.negative_int().is_some()
        {
            match cmp {
                CmpOp::Lt | CmpOp::Le => return Some(SelArg::impossible(part)),
                CmpOp::Gt | CmpOp::Ge => return None,
                _ => {}
            }
        }

        let image = kp.key_part.image(field, stored);
        let exact = outcome.is_exact() && !clamped;
        let open = exact && !kp.key_part.is_partial();
        let (lower, upper) = match cmp {
            CmpOp::Lt | CmpOp::Le => {
                let upper = if cmp == CmpOp::Lt && open {
                    Upper::Excluded(image)
                } else {
                    Upper::Included(image)
                };
                let lower = if field.nullable {
                    Lower::Excluded(Value::Null)
                } else {
                    Lower::Unbounded
                };
                (lower, upper)
            }
            CmpOp::Gt | CmpOp::Ge => {
                let lower = if cmp == CmpOp::Gt && open {
                    Lower::Excluded(image)
                } else {
                    Lower::Included(image)
                };
                (lower, Upper::Unbounded)
            }
            CmpOp::Eq | CmpOp::NullSafeEq => (Lower::Included(image.clone()), Upper::Included(image)),
            CmpOp::Ne => return None,
        };
        Some(SelArg::single(part, lower, upper))
    }
}

/// Replaces the lower bound of the only interval of `arg`, unless that would
/// empty it.
fn narrow_lower(arg: &mut SelArg, lower: Lower) {
    let Some(current) = arg.first().map(|iv| iv.lower.clone()) else {
        return;
    };
    if arg.elements() != 1 {
        return;
    }
    let Some(mut iv) = arg.tree_delete(&current) else {
        return;
    };
    let original = iv.lower.clone();
    iv.lower = lower;
    if iv.is_empty() {
        iv.lower = original;
    }
    arg.insert(iv);
}

fn is_constant(cond: &Cond) -> bool {
    match cond {
        Cond::Const { .. } => true,
        Cond::Cmp { left, right, .. } => {
            matches!((left, right), (Operand::Const(_), Operand::Const(_)))
        }
        Cond::Between {
            expr, low, high, ..
        } => [expr, low, high]
            .iter()
            .all(|op| matches!(op, Operand::Const(_))),
        _ => false,
    }
}

/// `[min, max]` key images covering every string matching `pattern`.
///
/// The literal prefix ends at the first unescaped wildcard; the upper end is
/// padded with the highest character to the key part's length. Patterns
/// starting with a wildcard give no range.
fn like_range(field: &Field, key_part: &KeyPart, pattern: &str, escape: char) -> Option<(Value, Value)> {
    let mut prefix = String::new();
    let mut wildcard = false;
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c == escape {
            prefix.push(chars.next().unwrap_or(c));
        } else if c == '%' || c == '_' {
            wildcard = true;
            break;
        } else {
            prefix.push(c);
        }
    }
    if wildcard && prefix.is_empty() {
        return None;
    }
    if field.collation() == Collation::CaseInsensitive {
        prefix = prefix.to_lowercase();
    }
    let len = key_part.prefix_len.or(field.char_length())? as usize;
    let prefix: String = prefix.chars().take(len).collect();
    if !wildcard {
        return Some((Value::Str(prefix.clone()), Value::Str(prefix)));
    }
    let pad = len.saturating_sub(prefix.chars().count());
    let mut max = prefix.clone();
    max.extend(std::iter::repeat(MAX_SORT_CHAR).take(pad));
    Some((Value::Str(prefix), Value::Str(max)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::sel_arg::SelArgRef;
    use crate::schema::{FieldType, KeyInfo};
    use time::macros::{date, datetime};

    fn int(bits: u8, unsigned: bool) -> FieldType {
        FieldType::Integer { bits, unsigned }
    }

    fn share() -> TableShare {
        TableShare::new("t")
            .with_field("a", int(32, false), false)
            .with_field("b", int(32, false), true)
            .with_field("u", int(32, true), false)
            .with_field("tiny", int(8, false), false)
            .with_field(
                "s",
                FieldType::Varchar {
                    max_len: 8,
                    collation: Collation::Binary,
                },
                true,
            )
            .with_field("d", FieldType::Date, false)
            .with_field("ts", FieldType::Timestamp, false)
            .with_field("r", FieldType::Float, false)
            .with_index(KeyInfo::on("a", &[FieldId(0)]))
            .with_index(KeyInfo::on("b", &[FieldId(1)]))
            .with_index(KeyInfo::on("u", &[FieldId(2)]))
            .with_index(KeyInfo::on("tiny", &[FieldId(3)]))
            .with_index(KeyInfo::on("s", &[FieldId(4)]))
            .with_index(KeyInfo::on("d", &[FieldId(5)]))
            .with_index(KeyInfo::on("ts", &[FieldId(6)]))
            .with_index(KeyInfo::on("r", &[FieldId(7)]))
            .with_index(KeyInfo::on("ab", &[FieldId(0), FieldId(1)]))
    }

    fn build(share: &TableShare, cond: &Cond) -> Option<SelTree> {
        let config = OptimizerConfig::default();
        RangeParam::new(share, KeyMap::prefix(share.keys.len()), &config)
            .with_equalities(cond)
            .get_mm_tree(cond)
    }

    fn key(tree: &SelTree, idx: usize) -> SelArgRef {
        tree.key(idx).cloned().expect("key tree")
    }

    fn ranges(tree: &SelTree, idx: usize) -> Vec<String> {
        key(tree, idx).intervals().map(ToString::to_string).collect()
    }

    #[test]
    fn open_range_on_single_column() {
        let t = share();
        let cond = Cond::and(vec![Cond::gt(FieldId(0), 10i64), Cond::lt(FieldId(0), 20i64)]);
        let tree = build(&t, &cond).expect("tree");
        assert_eq!(ranges(&tree, 0), vec!["(10, 20)"]);
        assert_eq!(tree.kind, SelTreeKind::Key);
    }

    #[test]
    fn nullable_less_than_excludes_null() {
        let t = share();
        let tree = build(&t, &Cond::lt(FieldId(1), 5i64)).expect("tree");
        assert_eq!(ranges(&tree, 1), vec!["(NULL, 5)"]);
    }

    #[test]
    fn contradiction_is_impossible() {
        let t = share();
        let cond = Cond::and(vec![Cond::eq(FieldId(0), 5i64), Cond::eq(FieldId(0), 6i64)]);
        assert_eq!(build(&t, &cond).map(|t| t.kind), Some(SelTreeKind::Impossible));
    }

    #[test]
    fn constant_predicates_fold() {
        let t = share();
        let yes = Cond::Const { value: true };
        assert_eq!(build(&t, &yes).map(|t| t.kind), Some(SelTreeKind::Always));
        let no = Cond::Cmp {
            cmp: CmpOp::Lt,
            left: Operand::Const(Value::Int(3)),
            right: Operand::Const(Value::Int(1)),
            collation: None,
        };
        assert_eq!(build(&t, &no).map(|t| t.kind), Some(SelTreeKind::Impossible));
    }

    #[test]
    fn bare_field_is_maybe() {
        let t = share();
        let tree = build(&t, &Cond::Field { field: FieldId(0) }).expect("tree");
        assert_eq!(tree.kind, SelTreeKind::Maybe);
    }

    #[test]
    fn reversed_operands_mirror_operator() {
        let t = share();
        let cond = Cond::Cmp {
            cmp: CmpOp::Lt,
            left: Operand::Const(Value::Int(3)),
            right: Operand::Field(FieldId(0)),
            collation: None,
        };
        let tree = build(&t, &cond).expect("tree");
        assert_eq!(ranges(&tree, 0), vec!["(3, +inf)"]);
    }

    #[test]
    fn field_against_field_gives_no_tree() {
        let t = share();
        let cond = Cond::Cmp {
            cmp: CmpOp::Lt,
            left: Operand::Field(FieldId(0)),
            right: Operand::Field(FieldId(1)),
            collation: None,
        };
        assert!(build(&t, &cond).is_none());
    }

    #[test]
    fn deferred_value_gives_maybe_key() {
        let t = share();
        let cond = Cond::Cmp {
            cmp: CmpOp::Eq,
            left: Operand::Field(FieldId(0)),
            right: Operand::Deferred,
            collation: None,
        };
        let tree = build(&t, &cond).expect("tree");
        assert!(key(&tree, 0).is_maybe_key());
    }

    #[test]
    fn not_equal_is_two_sided() {
        let t = share();
        let tree = build(&t, &Cond::ne(FieldId(0), 5i64)).expect("tree");
        assert_eq!(ranges(&tree, 0), vec!["(-inf, 5)", "(5, +inf)"]);
    }

    #[test]
    fn between_and_not_between() {
        let t = share();
        let tree = build(&t, &Cond::between(FieldId(0), 1i64, 4i64)).expect("tree");
        assert_eq!(ranges(&tree, 0), vec!["[1, 4]"]);
        let tree = build(&t, &Cond::not_between(FieldId(0), 1i64, 4i64)).expect("tree");
        assert_eq!(ranges(&tree, 0), vec!["(-inf, 1)", "(4, +inf)"]);
    }

    #[test]
    fn between_with_column_bounds_constrains_bounds() {
        let t = share();
        let cond = Cond::Between {
            expr: Operand::Const(Value::Int(7)),
            low: Operand::Field(FieldId(0)),
            high: Operand::Field(FieldId(1)),
            negated: false,
        };
        let tree = build(&t, &cond).expect("tree");
        assert_eq!(ranges(&tree, 0), vec!["(-inf, 7]"]);
        assert_eq!(ranges(&tree, 1), vec!["[7, +inf)"]);
    }

    #[test]
    fn in_list_is_union_of_points() {
        let t = share();
        let tree = build(&t, &Cond::in_list(FieldId(0), [7i64, 5, 7])).expect("tree");
        assert_eq!(ranges(&tree, 0), vec!["[5, 5]", "[7, 7]"]);
    }

    #[test]
    fn not_in_builds_gaps() {
        let t = share();
        let tree = build(&t, &Cond::not_in(FieldId(0), [9i64, 3, 3])).expect("tree");
        assert_eq!(ranges(&tree, 0), vec!["(-inf, 3)", "(3, 9)", "(9, +inf)"]);
    }

    #[test]
    fn long_not_in_is_ignored() {
        let t = share();
        let cond = Cond::not_in(FieldId(0), 0..1001i64);
        assert!(build(&t, &cond).is_none());
        let cond = Cond::not_in(FieldId(0), 0..1000i64);
        assert!(build(&t, &cond).is_some());
    }

    #[test]
    fn unsigned_not_in_negatives_gives_no_tree() {
        let t = share();
        assert!(build(&t, &Cond::not_in(FieldId(2), [-1i64, -2])).is_none());
    }

    #[test]
    fn like_prefix_range() {
        let t = share();
        let tree = build(&t, &Cond::like(FieldId(4), "ab%")).expect("tree");
        let arg = key(&tree, 4);
        let iv = arg.first().expect("interval");
        assert_eq!(iv.lower, Lower::Included(Value::from("ab")));
        let max = "ab".to_owned() + &MAX_SORT_CHAR.to_string().repeat(6);
        assert_eq!(iv.upper, Upper::Included(Value::Str(max)));
        assert!(iv.contains(&Value::from("abzzzzzz")));
        assert!(!iv.contains(&Value::from("ac")));
    }

    #[test]
    fn like_edge_cases() {
        let t = share();
        let leading = build(&t, &Cond::like(FieldId(4), "%ab")).expect("tree");
        assert!(leading.keys_map().is_empty());
        let null = Cond::Like {
            field: FieldId(4),
            pattern: Value::Null,
            escape: None,
        };
        assert_eq!(build(&t, &null).map(|t| t.kind), Some(SelTreeKind::Impossible));
        let numeric = build(&t, &Cond::like(FieldId(0), "1%")).expect("tree");
        assert!(numeric.keys_map().is_empty());
        let tree = build(&t, &Cond::like(FieldId(4), "a\\%b")).expect("tree");
        assert_eq!(ranges(&tree, 4), vec!["['a%b', 'a%b']"]);
    }

    #[test]
    fn is_null_rules() {
        let t = share();
        let tree = build(&t, &Cond::is_null(FieldId(1))).expect("tree");
        assert_eq!(ranges(&tree, 1), vec!["[NULL, NULL]"]);
        let tree = build(&t, &Cond::is_not_null(FieldId(1))).expect("tree");
        assert_eq!(ranges(&tree, 1), vec!["(NULL, +inf)"]);
        let tree = build(&t, &Cond::is_null(FieldId(0))).expect("tree");
        assert_eq!(tree.kind, SelTreeKind::Impossible);
        let tree = build(&t, &Cond::is_not_null(FieldId(0))).expect("tree");
        assert!(tree.keys_map().is_empty());
    }

    #[test]
    fn null_literal_rules() {
        let t = share();
        let eq_null = Cond::eq(FieldId(1), Value::Null);
        assert_eq!(build(&t, &eq_null).map(|t| t.kind), Some(SelTreeKind::Impossible));
        let nse = Cond::Cmp {
            cmp: CmpOp::NullSafeEq,
            left: Operand::Field(FieldId(1)),
            right: Operand::Const(Value::Null),
            collation: None,
        };
        let tree = build(&t, &nse).expect("tree");
        assert_eq!(ranges(&tree, 1), vec!["[NULL, NULL]"]);
        let not_null_col = Cond::Cmp {
            cmp: CmpOp::NullSafeEq,
            left: Operand::Field(FieldId(0)),
            right: Operand::Const(Value::Null),
            collation: None,
        };
        assert_eq!(build(&t, &not_null_col).map(|t| t.kind), Some(SelTreeKind::Impossible));
    }

    #[test]
    fn unsigned_against_negative() {
        let t = share();
        assert_eq!(
            build(&t, &Cond::lt(FieldId(2), -5i64)).map(|t| t.kind),
            Some(SelTreeKind::Impossible)
        );
        assert_eq!(
            build(&t, &Cond::le(FieldId(2), -5i64)).map(|t| t.kind),
            Some(SelTreeKind::Impossible)
        );
        let gt = build(&t, &Cond::gt(FieldId(2), -5i64)).expect("tree");
        assert!(gt.keys_map().is_empty());
    }

    #[test]
    fn clamped_integer_weakens_strict_bounds() {
        let t = share();
        let tree = build(&t, &Cond::lt(FieldId(3), 300i64)).expect("tree");
        assert_eq!(ranges(&tree, 3), vec!["(-inf, 127]"]);
        let tree = build(&t, &Cond::gt(FieldId(3), -300i64)).expect("tree");
        assert_eq!(ranges(&tree, 3), vec!["[-128, +inf)"]);
        let tree = build(&t, &Cond::eq(FieldId(3), 300i64)).expect("tree");
        assert_eq!(ranges(&tree, 3), vec!["[127, 127]"]);
    }

    #[test]
    fn fractional_literal_against_integer() {
        let t = share();
        assert_eq!(
            build(&t, &Cond::eq(FieldId(0), 2.5f64)).map(|t| t.kind),
            Some(SelTreeKind::Impossible)
        );
        let lt = build(&t, &Cond::lt(FieldId(0), 2.5f64)).expect("tree");
        assert!(lt.keys_map().is_empty());
    }

    #[test]
    fn out_of_range_real_keeps_closed_bound() {
        let t = share();
        assert_eq!(
            build(&t, &Cond::eq(FieldId(7), 1e300f64)).map(|t| t.kind),
            Some(SelTreeKind::Impossible)
        );
        let tree = build(&t, &Cond::lt(FieldId(7), 1e300f64)).expect("tree");
        assert_eq!(ranges(&tree, 7), vec![format!("(-inf, {}]", f64::from(f32::MAX))]);
    }

    #[test]
    fn string_column_against_number_gives_no_tree() {
        let t = share();
        let tree = build(&t, &Cond::eq(FieldId(4), 5i64)).expect("tree");
        assert!(tree.keys_map().is_empty());
    }

    #[test]
    fn date_column_against_datetime() {
        let t = share();
        let dt = datetime!(2007-12-10 12:34:55);
        let tree = build(&t, &Cond::lt(FieldId(5), dt)).expect("tree");
        assert_eq!(ranges(&tree, 5), vec!["(-inf, '2007-12-10']"]);
        let tree = build(&t, &Cond::gt(FieldId(5), dt)).expect("tree");
        assert_eq!(ranges(&tree, 5), vec!["['2007-12-10', +inf)"]);
        assert_eq!(
            build(&t, &Cond::eq(FieldId(5), dt)).map(|t| t.kind),
            Some(SelTreeKind::Impossible)
        );
        let tree = build(&t, &Cond::lt(FieldId(5), date!(2007 - 12 - 10))).expect("tree");
        assert_eq!(ranges(&tree, 5), vec!["(-inf, '2007-12-10')"]);
    }

    #[test]
    fn timestamp_literals_clamp_to_epoch() {
        let t = share();
        let tree = build(&t, &Cond::lt(FieldId(6), datetime!(2999-01-01 0:00))).expect("tree");
        assert_eq!(ranges(&tree, 6), vec![format!("(-inf, {TIMESTAMP_MAX}]")]);
        let tree = build(&t, &Cond::gt(FieldId(6), datetime!(1960-01-01 0:00))).expect("tree");
        assert_eq!(ranges(&tree, 6), vec!["[0, +inf)"]);
        let tree = build(&t, &Cond::gt(FieldId(6), datetime!(1970-01-02 0:00))).expect("tree");
        assert_eq!(ranges(&tree, 6), vec!["(86400, +inf)"]);
    }

    #[test]
    fn forced_collation_mismatch_gives_no_tree() {
        let t = share();
        let forced = |collation| Cond::Cmp {
            cmp: CmpOp::Eq,
            left: Operand::Field(FieldId(4)),
            right: Operand::Const(Value::from("x")),
            collation: Some(collation),
        };
        assert!(build(&t, &forced(Collation::CaseInsensitive)).is_none());
        assert!(build(&t, &forced(Collation::Binary)).is_some());
    }

    #[test]
    fn composite_index_chains_parts() {
        let t = share();
        let cond = Cond::and(vec![Cond::eq(FieldId(0), 1i64), Cond::gt(FieldId(1), 4i64)]);
        let tree = build(&t, &cond).expect("tree");
        let ab = key(&tree, 8);
        assert_eq!(ab.part(), 0);
        let next = ab.first().and_then(|iv| iv.next.clone()).expect("second part");
        assert_eq!(next.part(), 1);
        assert!(ab.matches(&[Value::Int(1), Value::Int(5)]));
        assert!(!ab.matches(&[Value::Int(1), Value::Int(4)]));
    }

    #[test]
    fn or_across_indexes_builds_merge() {
        let t = share();
        let cond = Cond::or(vec![Cond::eq(FieldId(0), 5i64), Cond::eq(FieldId(1), 7i64)]);
        let tree = build(&t, &cond).expect("tree");
        assert!(tree.keys_map().is_empty());
        assert_eq!(tree.merges.len(), 1);
        assert_eq!(tree.merges[0].trees.len(), 2);
    }

    #[test]
    fn or_with_unindexed_disjunct_gives_no_tree() {
        let t = share();
        let cond = Cond::or(vec![
            Cond::eq(FieldId(0), 5i64),
            Cond::Opaque {
                fields: vec![FieldId(0)],
            },
        ]);
        assert!(build(&t, &cond).is_none());
    }

    #[test]
    fn equality_class_propagates() {
        let t = share();
        let cond = Cond::and(vec![
            Cond::MultiEqual {
                fields: vec![FieldId(0), FieldId(1)],
                constant: None,
            },
            Cond::gt(FieldId(1), 5i64),
        ]);
        let tree = build(&t, &cond).expect("tree");
        assert_eq!(ranges(&tree, 0), vec!["(5, +inf)"]);
        assert_eq!(ranges(&tree, 1), vec!["(5, +inf)"]);
    }

    #[test]
    fn equality_class_with_constant() {
        let t = share();
        let cond = Cond::MultiEqual {
            fields: vec![FieldId(0), FieldId(1)],
            constant: Some(Value::Int(3)),
        };
        let tree = build(&t, &cond).expect("tree");
        assert_eq!(ranges(&tree, 0), vec!["[3, 3]"]);
        assert_eq!(ranges(&tree, 1), vec!["[3, 3]"]);
    }

    #[test]
    fn budget_abandons_translation() {
        let t = share();
        let config = OptimizerConfig::default().with_max_sel_args(4);
        let cond = Cond::in_list(FieldId(0), 0..50i64);
        let tree = RangeParam::new(&t, KeyMap::prefix(t.keys.len()), &config).get_mm_tree(&cond);
        assert!(tree.is_none());
    }

    #[test]
    fn prefix_segment_keeps_bounds_closed() {
        let t = TableShare::new("p")
            .with_field(
                "s",
                FieldType::Varchar {
                    max_len: 20,
                    collation: Collation::Binary,
                },
                false,
            )
            .with_index(KeyInfo::new("s3", vec![KeyPart::prefix(FieldId(0), 3)]));
        let tree = build(&t, &Cond::lt(FieldId(0), "abcdef")).expect("tree");
        assert_eq!(ranges(&tree, 0), vec!["(-inf, 'abc']"]);
        let tree = build(&t, &Cond::gt(FieldId(0), "abcdef")).expect("tree");
        assert_eq!(ranges(&tree, 0), vec!["['abc', +inf)"]);
    }

    #[test]
    fn hash_index_only_takes_equalities() {
        let t = TableShare::new("h")
            .with_field("a", int(32, false), false)
            .with_index(KeyInfo::on("a", &[FieldId(0)]).algorithm(KeyAlgorithm::Hash));
        let tree = build(&t, &Cond::eq(FieldId(0), 1i64)).expect("tree");
        assert!(tree.key(0).is_some());
        let tree = build(&t, &Cond::gt(FieldId(0), 1i64)).expect("tree");
        assert!(tree.key(0).is_none());
    }
}
