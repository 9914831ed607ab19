//! Plans for disjunctions no single index can answer.
//!
//! Each disjunct of an index-merge list is scanned on its own best index.
//! The rowids are then either sorted and deduplicated (sort-union) or, when
//! every disjunct comes back in rowid order, merged through a priority
//! queue (ROR-union). Both fetch the surviving rows in rowid order.

use tracing::trace;

use super::context::PlanContext;
use super::cost::{
    compare_cost, rowid_queue_cost, rowid_unique_cost, sweep_cost, TIME_FOR_COMPARE_ROWID,
};
use super::plan::{IndexMergeReadPlan, RangeReadPlan, RorUnionReadPlan, TableReadPlan};
use super::range_plan::{get_key_scans_params, KeyScans};
use super::ror::get_best_ror_intersect;
use super::sel_tree::SelImerge;

/// Cheapest sort-union or ROR-union plan for `imerge` costing less than
/// `read_time`.
pub fn get_best_disjunct_quick(
    ctx: &PlanContext<'_>,
    imerge: &SelImerge,
    mut read_time: f64,
) -> Option<TableReadPlan> {
    let mut children: Vec<(RangeReadPlan, KeyScans)> = Vec::with_capacity(imerge.trees.len());
    let mut imerge_cost = 0.0;
    let mut cpk_scan_records = 0u64;
    let mut non_cpk_scan_records = 0u64;
    let mut has_cpk_scan = false;
    let mut all_scans_ror_able = true;
    let mut all_scans_rors = true;

    for tree in &imerge.trees {
        let mut scans = get_key_scans_params(ctx, tree, true, read_time);
        let Some(best) = scans.best.take() else {
            trace!("index merge disjunct too expensive");
            return None;
        };
        imerge_cost += best.read_cost;
        all_scans_ror_able &= scans.n_ror_scans() > 0;
        all_scans_rors &= best.is_ror;
        if ctx.is_clustered_pk(best.index) {
            has_cpk_scan = true;
            cpk_scan_records += best.records;
        } else {
            non_cpk_scan_records += best.records;
        }
        children.push((best, scans));
    }

    let total_records = non_cpk_scan_records + cpk_scan_records;
    if imerge_cost > read_time || (total_records >= ctx.stats.records && read_time != f64::MAX) {
        trace!(imerge_cost, total_records, "index merge cannot beat the limit");
        return None;
    }

    let ror_union_allowed = ctx.config.enable_ror_union && ctx.allows_merged_scans();
    let mut imerge_plan = None;
    if (!all_scans_rors || !ror_union_allowed) && ctx.config.enable_index_merge {
        if has_cpk_scan {
            imerge_cost += non_cpk_scan_records as f64 / TIME_FOR_COMPARE_ROWID;
        }
        imerge_cost += sweep_cost(ctx.cursor, non_cpk_scan_records, ctx.interrupted);
        if imerge_cost <= read_time {
            imerge_cost += rowid_unique_cost(non_cpk_scan_records, ctx.config.sort_buffer_size);
            if imerge_cost < read_time {
                trace!(records = total_records, cost = imerge_cost, "sort union found");
                imerge_plan = Some(TableReadPlan::IndexMerge(IndexMergeReadPlan {
                    scans: children.iter().map(|(plan, _)| plan.clone()).collect(),
                    records: total_records.min(ctx.stats.records),
                    read_cost: imerge_cost,
                }));
                read_time = imerge_cost;
            }
        }
    }
    if !all_scans_ror_able || !ror_union_allowed {
        return imerge_plan;
    }

    ror_union(ctx, children, read_time).or(imerge_plan)
}

/// ROR-union over the disjuncts, each read by its best ROR intersection or
/// its own rowid-ordered range scan.
fn ror_union(
    ctx: &PlanContext<'_>,
    children: Vec<(RangeReadPlan, KeyScans)>,
    read_time: f64,
) -> Option<TableReadPlan> {
    let n_scans = children.len();
    let table_records = ctx.stats.records as f64;
    let mut index_costs = 0.0;
    let mut total_records = 0u64;
    let mut intersect_part = 1.0;
    let mut plans = Vec::with_capacity(n_scans);

    for (child, scans) in children {
        let cost = if child.is_ror {
            ctx.cursor.read_time(child.index, 1, child.records) + compare_cost(child.records as f64)
        } else {
            read_time
        };
        let plan = match get_best_ror_intersect(ctx, &scans, cost).plan {
            Some(intersect) if ctx.config.enable_ror_intersect => {
                index_costs += intersect.index_scan_costs;
                TableReadPlan::RorIntersect(intersect)
            }
            _ if child.is_ror => {
                index_costs += child.read_cost;
                TableReadPlan::Range(child)
            }
            _ => return None,
        };
        total_records += plan.records();
        if table_records > 0.0 {
            intersect_part *= plan.records() as f64 / table_records;
        }
        plans.push(plan);
    }

    // Rows matching several disjuncts are counted once, assuming the
    // disjuncts are independent.
    let overlap = (intersect_part * table_records) as u64;
    let total_records = total_records.saturating_sub(overlap);
    let total_cost = index_costs
        + rowid_queue_cost(total_records as f64, n_scans)
        + sweep_cost(ctx.cursor, total_records, ctx.interrupted);
    if total_cost < read_time {
        trace!(records = total_records, cost = total_cost, "ror union found");
        return Some(TableReadPlan::RorUnion(RorUnionReadPlan {
            scans: plans,
            records: total_records,
            read_cost: total_cost,
        }));
    }
    None
}
