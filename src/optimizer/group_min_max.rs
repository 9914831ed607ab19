//! Group min/max plans.
//!
//! `SELECT g, MIN(c) ... GROUP BY g` (and `SELECT DISTINCT g ...`) can be
//! answered by jumping from one distinct group prefix of an index to the
//! next and reading a single key per group, instead of scanning every row.
//! The index must start with the group columns, optionally followed by
//! columns pinned to constants (the key infix), then the MIN/MAX column.
//! Nothing after that may be read by the query.

use tracing::trace;

use super::context::PlanContext;
use super::cost::TIME_FOR_COMPARE;
use super::plan::GroupMinMaxReadPlan;
use super::range_plan::check_quick_select;
use super::sel_arg::{eq_tree, SelArgKind, SelArgRef};
use super::sel_tree::SelTree;
use crate::query::{AggFunc, Cond, Operand, QueryShape, SelectItem, StatementKind};
use crate::schema::{Collation, KeyInfo, TableShare, REF_LENGTH};
use crate::types::{FieldId, IndexId, ResultType, Value};

/// Aggregates of the select list, when they are all MIN/MAX over one column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct MinMaxAggregates {
    have_min: bool,
    have_max: bool,
    arg: Option<FieldId>,
}

fn min_max_aggregates(query: &QueryShape) -> Option<MinMaxAggregates> {
    let mut found = MinMaxAggregates::default();
    for agg in query.aggregates() {
        match agg.func {
            AggFunc::Min => found.have_min = true,
            AggFunc::Max => found.have_max = true,
            _ => return None,
        }
        let arg = agg.arg?;
        match found.arg {
            None => found.arg = Some(arg),
            Some(prev) if prev == arg => {}
            Some(_) => return None,
        }
    }
    Some(found)
}

/// Where the walk down an index tree towards one key part ended.
enum PartTree<'a> {
    Found(&'a SelArgRef),
    Missing,
    /// Intervals above the part disagree on what constrains it.
    Divergent,
}

/// Subtree constraining key part `part`, following the subtrees that every
/// interval of an earlier part shares.
fn part_tree(root: &SelArgRef, part: usize) -> PartTree<'_> {
    let mut node = root;
    loop {
        if node.part() as usize == part {
            return PartTree::Found(node);
        }
        if node.part() as usize > part {
            return PartTree::Missing;
        }
        let next = match node.kind() {
            SelArgKind::KeyRange(_) => {
                let mut nexts = node.intervals().map(|iv| iv.next.as_ref());
                let first = nexts.next().flatten();
                if nexts.any(|n| !eq_tree(n, first)) {
                    return PartTree::Divergent;
                }
                first
            }
            SelArgKind::MaybeKey { next } => next.as_ref(),
            SelArgKind::Impossible => None,
        };
        match next {
            Some(n) => node = n,
            None => return PartTree::Missing,
        }
    }
}

/// Constants pinning the key parts from `first_non_group` up to the MIN/MAX
/// part (or to the end of the key when there is none).
///
/// Returns the constants and the first part after them. `None` rejects the
/// index: a part the infix must cover is not a single equality.
fn constant_key_infix(
    index_tree: Option<&SelArgRef>,
    first_non_group: usize,
    min_max_part: Option<usize>,
    n_parts: usize,
) -> Option<(Vec<Value>, usize)> {
    let end = min_max_part.unwrap_or(n_parts);
    let mut infix = Vec::new();
    for part in first_non_group..end {
        let found = match index_tree.map(|t| part_tree(t, part)) {
            Some(PartTree::Found(range)) => range,
            Some(PartTree::Divergent) => return None,
            Some(PartTree::Missing) | None => {
                if min_max_part.is_some() {
                    return None;
                }
                return Some((infix, part));
            }
        };
        if found.elements() != 1 {
            return None;
        }
        let iv = found.first()?;
        if !iv.is_point() {
            return None;
        }
        infix.push(iv.lower.value()?.clone());
    }
    Some((infix, end))
}

/// Whether every predicate on the MIN/MAX column compares it with a
/// constant through `=`, `<>`, `<`, `<=`, `>`, `>=`, BETWEEN or IS [NOT]
/// NULL.
pub fn check_group_min_max_predicates(share: &TableShare, cond: &Cond, arg: FieldId) -> bool {
    match cond {
        Cond::And { args } | Cond::Or { args } => args
            .iter()
            .all(|c| check_group_min_max_predicates(share, c, arg)),
        Cond::Const { .. } => true,
        Cond::Cmp {
            left,
            right,
            collation,
            ..
        } => {
            let value = match (left, right) {
                (Operand::Field(f), other) | (other, Operand::Field(f)) if *f == arg => other,
                _ => return true,
            };
            match value {
                Operand::Const(v) => comparable_with_index(share, arg, v, *collation),
                _ => false,
            }
        }
        Cond::Between {
            expr, low, high, ..
        } => {
            let refers = |op: &Operand| op.as_field() == Some(arg);
            if refers(low) || refers(high) {
                return false;
            }
            if !refers(expr) {
                return true;
            }
            match (low, high) {
                (Operand::Const(lo), Operand::Const(hi)) => {
                    comparable_with_index(share, arg, lo, None)
                        && comparable_with_index(share, arg, hi, None)
                }
                _ => false,
            }
        }
        Cond::IsNull { .. } => true,
        Cond::Field { field } | Cond::In { field, .. } | Cond::Like { field, .. } => {
            *field != arg
        }
        Cond::MultiEqual { fields, .. } | Cond::Opaque { fields } => !fields.contains(&arg),
    }
}

/// A comparison whose result the index order agrees with.
fn comparable_with_index(
    share: &TableShare,
    field: FieldId,
    value: &Value,
    forced: Option<Collation>,
) -> bool {
    let def = share.field(field);
    if def.result_type() != ResultType::String || value.is_null() {
        return true;
    }
    if value.result_type() == ResultType::String {
        forced.map_or(true, |c| c == def.collation())
    } else {
        def.cmp_type() == value.result_type()
    }
}

/// Number of leading key parts matching the GROUP BY list, in order.
fn group_by_prefix(key: &KeyInfo, group: &[FieldId]) -> Option<usize> {
    let mut parts = 0;
    for (field, part) in group.iter().zip(&key.parts) {
        if *field != part.field {
            return None;
        }
        parts += 1;
    }
    Some(parts)
}

/// Number of leading key parts the DISTINCT columns cover. The columns
/// may come in any order but must form a key prefix.
fn distinct_prefix(key: &KeyInfo, select: &[FieldId]) -> Option<usize> {
    let mut used = vec![false; key.parts.len()];
    let mut max_part = 0;
    for field in select {
        let nr = key.part_of(*field)?;
        if used[nr] {
            continue;
        }
        if nr >= select.len() {
            return None;
        }
        used[nr] = true;
        max_part = max_part.max(nr + 1);
    }
    used[..max_part].iter().all(|u| *u).then_some(max_part)
}

/// Rows read and cost of visiting every group through `index`.
///
/// Groups are assumed to hold `rec_per_key` rows each. When groups are
/// larger than a block each one costs a block read (two when both MIN and
/// MAX are read); smaller groups end up reading every block. A key infix
/// splits groups into subgroups that may straddle block boundaries.
#[allow(clippy::too_many_arguments)]
pub fn cost_group_min_max(
    ctx: &PlanContext<'_>,
    index: IndexId,
    used_key_parts: usize,
    group_key_parts: usize,
    quick_prefix_records: Option<u64>,
    have_min: bool,
    have_max: bool,
) -> (f64, u64) {
    let share = ctx.share();
    let info = share.key(index);
    let table_records = ctx.stats.records;
    let entry = u64::from(share.key_length(index) + REF_LENGTH);
    let keys_per_block = u64::from(ctx.stats.block_size) / 2 / entry + 1;
    let num_blocks = table_records / keys_per_block + 1;

    let mut keys_per_group = info.records_per_key(group_key_parts);
    if keys_per_group == 0 {
        // No statistics: assume ten groups.
        keys_per_group = table_records / 10 + 1;
    }
    let mut num_groups = table_records / keys_per_group + 1;

    if let Some(prefix_records) = quick_prefix_records {
        if table_records > 0 {
            let selectivity = prefix_records as f64 / table_records as f64;
            num_groups = ((num_groups as f64 * selectivity).round() as u64).max(1);
        }
    }

    let io_cost = if used_key_parts > group_key_parts {
        let keys_per_subgroup = info.records_per_key(used_key_parts);
        let p_overlap = if keys_per_subgroup >= keys_per_block {
            1.0
        } else {
            let blocks_per_group = num_blocks as f64 / num_groups as f64;
            (blocks_per_group * (keys_per_subgroup as f64 - 1.0) / keys_per_group as f64).min(1.0)
        };
        (num_groups as f64 * (1.0 + p_overlap)).min(num_blocks as f64)
    } else if keys_per_group > keys_per_block {
        if have_min && have_max {
            (num_groups + 1) as f64
        } else {
            num_groups as f64
        }
    } else {
        num_blocks as f64
    };

    let cpu_cost = num_groups as f64 / TIME_FOR_COMPARE;
    (io_cost + cpu_cost, num_groups)
}

/// Cheapest group min/max plan, if the query has the shape for one.
pub fn get_best_group_min_max(
    ctx: &PlanContext<'_>,
    tree: Option<&SelTree>,
) -> Option<GroupMinMaxReadPlan> {
    let query = ctx.query;
    let share = ctx.share();
    if query.statement != StatementKind::Select
        || query.join_tables != 1
        || (query.group_by.is_empty() && !query.distinct)
        || query.with_rollup
        || share.keys.is_empty()
    {
        return None;
    }

    let aggs = min_max_aggregates(query)?;
    let select_fields: Vec<FieldId> = if query.distinct {
        query
            .select
            .iter()
            .map(|item| match item {
                SelectItem::Field(f) => Some(*f),
                _ => None,
            })
            .collect::<Option<_>>()?
    } else {
        Vec::new()
    };
    let group_fields: Vec<FieldId> = query
        .group_by
        .iter()
        .map(|item| match item {
            SelectItem::Field(f) => Some(*f),
            _ => None,
        })
        .collect::<Option<_>>()?;

    let mut best: Option<GroupMinMaxReadPlan> = None;
    for index in share.key_ids() {
        if !ctx.is_covering(index) {
            continue;
        }
        let info = share.key(index);
        let n_parts = info.parts.len();
        let group_key_parts = if !group_fields.is_empty() {
            group_by_prefix(info, &group_fields)
        } else {
            distinct_prefix(info, &select_fields)
        };
        let Some(group_key_parts) = group_key_parts else {
            continue;
        };

        let min_max_part = match aggs.arg {
            Some(arg) => match info.part_of(arg) {
                Some(part) if part >= group_key_parts => Some(part),
                _ => continue,
            },
            None => None,
        };

        let index_tree = tree.and_then(|t| t.key(index.0 as usize));
        let mut key_infix = Vec::new();
        let mut first_non_infix = min_max_part;
        if group_key_parts < n_parts && min_max_part.map_or(true, |mm| mm > group_key_parts) {
            if tree.is_some() {
                let Some((infix, next)) =
                    constant_key_infix(index_tree, group_key_parts, min_max_part, n_parts)
                else {
                    continue;
                };
                key_infix = infix;
                first_non_infix = Some(next);
            } else if min_max_part.is_some() {
                // A gap before the MIN/MAX column with nothing to fill it.
                continue;
            } else if let Some(cond) = ctx.cond {
                let referenced = cond.fields();
                if info.parts[group_key_parts..]
                    .iter()
                    .any(|p| referenced.is_set(p.field))
                {
                    continue;
                }
            }
        }

        if let Some(first) = first_non_infix {
            let skip = usize::from(min_max_part.is_some());
            if info.parts[(first + skip).min(n_parts)..]
                .iter()
                .any(|p| ctx.needed_fields.is_set(p.field))
            {
                continue;
            }
        }

        // Every group must share one MIN/MAX range.
        let min_max_tree = match (index_tree, min_max_part) {
            (Some(root), Some(part)) => match part_tree(root, part) {
                PartTree::Found(t) if t.is_key_range() => Some(t.clone()),
                PartTree::Divergent => continue,
                _ => None,
            },
            _ => None,
        };

        let used_key_parts = group_key_parts + key_infix.len();
        let quick_prefix_records = index_tree
            .and_then(|key| check_quick_select(ctx, index, key, true))
            .map(|est| est.records);
        let (read_cost, records) = cost_group_min_max(
            ctx,
            index,
            used_key_parts,
            group_key_parts,
            quick_prefix_records,
            aggs.have_min,
            aggs.have_max,
        );
        trace!(index = %info.name, records, read_cost, "group min/max candidate");

        let best_cost = best.as_ref().map_or(f64::MAX, |b| b.read_cost);
        if read_cost < best_cost - f64::EPSILON * read_cost {
            best = Some(GroupMinMaxReadPlan {
                index,
                have_min: aggs.have_min,
                have_max: aggs.have_max,
                min_max_arg: aggs.arg,
                min_max_arg_part: min_max_part,
                group_prefix_len: group_key_parts,
                used_key_parts,
                key_infix,
                index_tree: index_tree.cloned(),
                min_max_tree,
                records,
                read_cost,
                quick_prefix_records,
            });
        }
    }

    let plan = best?;
    if let (Some(cond), Some(arg)) = (ctx.cond, aggs.arg) {
        if !check_group_min_max_predicates(share, cond, arg) {
            trace!("min/max argument used outside a constant range predicate");
            return None;
        }
    }
    if tree.is_some() && plan.quick_prefix_records == Some(0) {
        return None;
    }
    trace!(
        index = %share.key(plan.index).name,
        records = plan.records,
        cost = plan.read_cost,
        "group min/max found"
    );
    Some(plan)
}
