//! Single-index range plans.

use tracing::trace;

use super::context::PlanContext;
use super::plan::RangeReadPlan;
use super::range_seq::SelArgRangeSeq;
use super::sel_arg::{SelArgKind, SelArgRef};
use super::sel_tree::SelTree;
use crate::schema::KeyAlgorithm;
use crate::storage::MrrFlags;
use crate::types::IndexId;

/// Oracle estimate for scanning one index over one interval tree.
#[derive(Clone, Debug)]
pub struct ScanEstimate {
    pub index: IndexId,
    pub key: SelArgRef,
    pub records: u64,
    pub cost: f64,
    pub is_ror: bool,
    pub index_only: bool,
    pub n_ranges: u64,
    pub used_key_parts: usize,
}

impl ScanEstimate {
    fn into_plan(self) -> RangeReadPlan {
        RangeReadPlan {
            index: self.index,
            key: self.key,
            records: self.records,
            read_cost: self.cost,
            is_ror: self.is_ror,
            index_only: self.index_only,
            n_ranges: self.n_ranges,
            used_key_parts: self.used_key_parts,
        }
    }
}

/// Result of estimating every index of a tree.
#[derive(Clone, Debug, Default)]
pub struct KeyScans {
    /// Cheapest scan under the cost limit.
    pub best: Option<RangeReadPlan>,
    /// Every index the oracle could estimate, in index order.
    pub estimates: Vec<ScanEstimate>,
}

impl KeyScans {
    /// Estimates that return rows in rowid order.
    pub fn ror_scans(&self) -> impl Iterator<Item = &ScanEstimate> {
        self.estimates.iter().filter(|e| e.is_ror)
    }

    pub fn n_ror_scans(&self) -> usize {
        self.ror_scans().count()
    }
}

/// Asks the oracle for the rows and cost of scanning `index` over `key`.
/// `None` when the tree cannot drive a scan or the oracle cannot estimate
/// one of its ranges.
pub fn check_quick_select(
    ctx: &PlanContext<'_>,
    index: IndexId,
    key: &SelArgRef,
    index_only: bool,
) -> Option<ScanEstimate> {
    let share = ctx.share();
    let info = share.key(index);
    match key.kind() {
        SelArgKind::Impossible => {
            return Some(ScanEstimate {
                index,
                key: key.clone(),
                records: 0,
                cost: 0.0,
                is_ror: !info.no_ror,
                index_only: false,
                n_ranges: 0,
                used_key_parts: 0,
            })
        }
        SelArgKind::KeyRange(_) if key.part() == 0 => {}
        _ => return None,
    }

    let clustered = ctx.is_clustered_pk(index);
    let flags = MrrFlags {
        index_only: index_only && !clustered,
    };
    let mut seq = SelArgRangeSeq::new(share, index, key, ctx.pk_clustered);
    let estimate = ctx
        .cursor
        .multi_range_read_info_const(index, &mut seq, flags)?;

    let is_ror = if info.algorithm != KeyAlgorithm::Btree {
        false
    } else {
        clustered || seq.is_ror()
    };
    trace!(
        index = %info.name,
        rows = estimate.rows,
        cost = estimate.cost.total_cost(),
        ranges = estimate.n_ranges,
        is_ror,
        "range scan estimated"
    );
    Some(ScanEstimate {
        index,
        key: key.clone(),
        records: estimate.rows,
        cost: estimate.cost.total_cost(),
        is_ror,
        index_only: flags.index_only,
        n_ranges: seq.range_count(),
        used_key_parts: seq.max_key_parts(),
    })
}

/// Estimates a scan on every index of `tree` and keeps the cheapest one
/// costing less than `read_time`. With `index_read_must_be_used` every
/// scan is costed as an index-only read, which is how merged scans consume
/// their inputs.
pub fn get_key_scans_params(
    ctx: &PlanContext<'_>,
    tree: &SelTree,
    index_read_must_be_used: bool,
    mut read_time: f64,
) -> KeyScans {
    let mut scans = KeyScans::default();
    let mut best: Option<ScanEstimate> = None;
    for (idx, key) in tree.keys.iter().enumerate() {
        let Some(key) = key else {
            continue;
        };
        let index = IndexId(idx as u16);
        let read_index_only = index_read_must_be_used || ctx.is_covering(index);
        let Some(estimate) = check_quick_select(ctx, index, key, read_index_only) else {
            continue;
        };
        if read_time > estimate.cost {
            read_time = estimate.cost;
            best = Some(estimate.clone());
        }
        scans.estimates.push(estimate);
    }
    scans.best = best.map(ScanEstimate::into_plan);
    scans
}
