//! Rowid-ordered intersection plans.
//!
//! Index scans that return rowids in ascending order can be intersected by
//! a merge join on rowid, without sorting. The intersection is built
//! greedily: scans are ordered by how much index data they read, and each
//! one is added while it still narrows the estimated result. The cheapest
//! prefix seen along the way wins.
//!
//! A clustered primary key scan is never read on its own inside an
//! intersection. Its ranges filter the rowids produced by the other scans.

use std::cmp::Ordering;

use tracing::trace;

use super::context::PlanContext;
use super::cost::{rowid_queue_cost, sweep_cost, TIME_FOR_COMPARE_ROWID};
use super::plan::{RorIntersectReadPlan, RorScanInfo};
use super::range_plan::{KeyScans, ScanEstimate};
use super::sel_arg::{Lower, SelArgRef};
use crate::schema::REF_LENGTH;
use crate::storage::{KeyRange, KeyTuple};
use crate::types::FieldSet;

/// Describes one rowid-ordered scan for intersection planning.
pub fn make_ror_scan(ctx: &PlanContext<'_>, estimate: &ScanEstimate) -> RorScanInfo {
    let share = ctx.share();
    let index = estimate.index;
    let covered_fields = share.key_fields(index).intersection(&ctx.needed_fields);
    RorScanInfo {
        index,
        key: estimate.key.clone(),
        records: estimate.records,
        key_rec_length: share.key_length(index) + REF_LENGTH,
        index_read_cost: ctx
            .cursor
            .index_only_read_time(index, estimate.records as f64),
        covered_fields,
        key_components: share.key(index).parts.len(),
    }
}

/// Scans reading less index data come first.
fn cmp_ror_scan_info(a: &RorScanInfo, b: &RorScanInfo) -> Ordering {
    let va = a.records as f64 * f64::from(a.key_rec_length);
    let vb = b.records as f64 * f64::from(b.key_rec_length);
    va.partial_cmp(&vb).unwrap_or(Ordering::Equal)
}

/// Running state of a greedy intersection.
#[derive(Clone, Debug)]
struct RorIntersectInfo {
    covered_fields: FieldSet,
    /// Estimated rows matching every scan added so far.
    out_rows: f64,
    is_covering: bool,
    /// Index entries read by the added scans.
    index_records: u64,
    index_scan_costs: f64,
    total_cost: f64,
}

impl RorIntersectInfo {
    fn new(ctx: &PlanContext<'_>) -> Self {
        Self {
            covered_fields: FieldSet::new(),
            out_rows: ctx.stats.records as f64,
            is_covering: false,
            index_records: 0,
            index_scan_costs: 0.0,
            total_cost: 0.0,
        }
    }
}

/// Point tuple of the leading parts of `key` up to, not including, `upto`.
fn leading_tuple(key: &SelArgRef, upto: u16) -> KeyTuple {
    let mut tuple = KeyTuple::new();
    let mut cur = Some(key);
    while let Some(arg) = cur.filter(|a| a.part() < upto && a.part() as usize == tuple.len()) {
        let Some(first) = arg.first() else {
            break;
        };
        match &first.lower {
            Lower::Included(v) | Lower::Excluded(v) => tuple.push(v.clone()),
            Lower::Unbounded => break,
        }
        cur = first.next.as_ref();
    }
    tuple
}

/// Fraction of the rows left by the intersection so far that `scan` keeps.
///
/// Key parts whose columns earlier scans already pin contribute nothing.
/// For every run of uncovered parts the ratio of row counts before and
/// after the run is taken from the oracle, so the estimate is conditional
/// on what the intersection already guarantees. Returns 1.0 when the scan
/// does not narrow the result or the oracle cannot tell.
fn ror_scan_selectivity(ctx: &PlanContext<'_>, info: &RorIntersectInfo, scan: &RorScanInfo) -> f64 {
    let share = ctx.share();
    let key = share.key(scan.index);
    let covered = |part: u16| {
        key.parts
            .get(part as usize)
            .is_some_and(|p| info.covered_fields.is_set(p.field))
    };

    let mut selectivity = 1.0;
    let mut prev_records = ctx.stats.records as f64;
    let mut prev_covered = covered(0);
    let mut cur = Some(&scan.key);
    while let Some(arg) = cur {
        let cur_covered = covered(arg.part());
        if cur_covered != prev_covered {
            let tuple = leading_tuple(&scan.key, arg.part());
            let Some(records) = ctx
                .cursor
                .records_in_range(scan.index, &KeyRange::point(tuple))
            else {
                return 1.0;
            };
            if cur_covered {
                if prev_records <= 0.0 {
                    return 1.0;
                }
                selectivity *= records as f64 / prev_records;
            } else {
                prev_records = records as f64;
            }
        }
        prev_covered = cur_covered;
        cur = arg.first().and_then(|iv| iv.next.as_ref());
    }
    if !prev_covered {
        if prev_records <= 0.0 {
            return 1.0;
        }
        selectivity *= scan.records as f64 / prev_records;
    }
    selectivity
}

/// Adds `scan` to the intersection when it narrows the result, updating the
/// running cost. A clustered primary key scan only filters: it costs one
/// rowid comparison per entry read by the other scans.
fn ror_intersect_add(
    ctx: &PlanContext<'_>,
    info: &mut RorIntersectInfo,
    scan: &RorScanInfo,
    is_cpk_scan: bool,
) -> bool {
    let selectivity = ror_scan_selectivity(ctx, info, scan);
    if selectivity == 1.0 {
        return false;
    }
    info.out_rows *= selectivity;
    if is_cpk_scan {
        info.index_scan_costs += info.index_records as f64 / TIME_FOR_COMPARE_ROWID;
    } else {
        info.index_records += scan.records;
        info.index_scan_costs += scan.index_read_cost;
        info.covered_fields = info.covered_fields.union(&scan.covered_fields);
        if !info.is_covering && ctx.needed_fields.is_subset(&info.covered_fields) {
            info.is_covering = true;
        }
    }
    info.total_cost = info.index_scan_costs;
    if !info.is_covering {
        info.total_cost += sweep_cost(ctx.cursor, info.out_rows.round() as u64, ctx.interrupted);
    }
    true
}

/// Outcome of the greedy intersection search.
#[derive(Debug, Default)]
pub struct RorIntersectSearch {
    pub plan: Option<RorIntersectReadPlan>,
    /// Every non-primary scan together covers the needed columns, so a
    /// covering intersection may exist.
    pub can_build_covering: bool,
    /// Non-primary ROR scans, for the covering search.
    pub scans: Vec<RorScanInfo>,
}

/// Greedy search for the cheapest intersection cheaper than `read_time`.
pub fn get_best_ror_intersect(
    ctx: &PlanContext<'_>,
    key_scans: &KeyScans,
    read_time: f64,
) -> RorIntersectSearch {
    let mut search = RorIntersectSearch::default();
    if key_scans.n_ror_scans() < 2 || ctx.stats.records == 0 {
        return search;
    }

    let mut cpk_scan = None;
    for estimate in key_scans.ror_scans() {
        let scan = make_ror_scan(ctx, estimate);
        if ctx.is_clustered_pk(scan.index) {
            cpk_scan = Some(scan);
        } else {
            search.scans.push(scan);
        }
    }
    search.scans.sort_by(cmp_ror_scan_info);

    let mut intersect = RorIntersectInfo::new(ctx);
    let mut best = intersect.clone();
    let mut chosen = Vec::new();
    let mut best_num = 0;
    let mut min_cost = f64::MAX;
    for scan in &search.scans {
        if intersect.is_covering {
            break;
        }
        if !ror_intersect_add(ctx, &mut intersect, scan, false) {
            continue;
        }
        chosen.push(scan.clone());
        if intersect.total_cost < min_cost {
            best = intersect.clone();
            best_num = chosen.len();
            min_cost = intersect.total_cost;
        }
    }
    if best_num == 0 {
        return search;
    }
    search.can_build_covering = intersect.is_covering;
    chosen.truncate(best_num);

    let mut cpk_used = None;
    if let Some(cpk) = cpk_scan.filter(|_| !best.is_covering) {
        let mut with_cpk = best.clone();
        if ror_intersect_add(ctx, &mut with_cpk, &cpk, true) && with_cpk.total_cost < min_cost {
            min_cost = with_cpk.total_cost;
            best = with_cpk;
            cpk_used = Some(cpk);
        }
    }

    if min_cost < read_time && (cpk_used.is_some() || best_num > 1) {
        let records = (best.out_rows.round() as u64).max(1);
        trace!(
            scans = chosen.len(),
            cpk = cpk_used.is_some(),
            records,
            cost = best.total_cost,
            covering = best.is_covering,
            "ror intersection found"
        );
        search.plan = Some(RorIntersectReadPlan {
            scans: chosen,
            cpk_scan: cpk_used,
            is_covering: best.is_covering,
            records,
            read_cost: best.total_cost,
            index_scan_costs: best.index_scan_costs,
        });
    }
    search
}

/// Needed columns `scan` adds, and the position of its first key part that
/// adds nothing.
fn covering_rank(ctx: &PlanContext<'_>, scan: &RorScanInfo, covered: &FieldSet) -> (usize, usize) {
    let fresh = scan.covered_fields.difference(covered);
    let first_uncovered = ctx
        .share()
        .key(scan.index)
        .parts
        .iter()
        .position(|p| !fresh.is_set(p.field))
        .unwrap_or(scan.key_components);
    (fresh.len(), first_uncovered)
}

/// Greedy search for an intersection that reads only index data: repeatedly
/// take the scan adding the most uncovered columns, preferring shorter keys,
/// until every needed column is covered.
pub fn get_best_covering_ror_intersect(
    ctx: &PlanContext<'_>,
    scans: &[RorScanInfo],
    read_time: f64,
) -> Option<RorIntersectReadPlan> {
    let mut remaining: Vec<RorScanInfo> = scans.to_vec();
    let mut chosen: Vec<RorScanInfo> = Vec::new();
    let mut covered = FieldSet::new();
    let mut total_cost = 0.0;
    let mut records = 0u64;
    let mut all_covered = false;

    while !remaining.is_empty() && !all_covered {
        remaining.sort_by(|a, b| {
            let (a_fresh, a_first) = covering_rank(ctx, a, &covered);
            let (b_fresh, b_first) = covering_rank(ctx, b, &covered);
            b_fresh
                .cmp(&a_fresh)
                .then(a.key_components.cmp(&b.key_components))
                .then(a_first.cmp(&b_first))
        });
        let scan = remaining.remove(0);
        total_cost += scan.index_read_cost;
        records += scan.records;
        if total_cost > read_time {
            return None;
        }
        covered = covered.union(&scan.covered_fields);
        all_covered = ctx.needed_fields.is_subset(&covered);
        chosen.push(scan);
    }
    if !all_covered || chosen.len() == 1 {
        return None;
    }

    total_cost += rowid_queue_cost(records as f64, chosen.len());
    if total_cost > read_time {
        return None;
    }
    trace!(scans = chosen.len(), records, cost = total_cost, "covering ror intersection found");
    Some(RorIntersectReadPlan {
        scans: chosen,
        cpk_scan: None,
        is_covering: true,
        records,
        read_cost: total_cost,
        index_scan_costs: total_cost,
    })
}
