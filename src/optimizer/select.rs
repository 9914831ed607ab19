//! Picks the cheapest way to read one table.
//!
//! The full table scan sets the cost to beat. A plan replaces the current
//! best only when strictly cheaper, so group min/max, which runs first,
//! wins ties and otherwise the first plan found does.

use tracing::{debug, trace};

use super::config::OptimizerConfig;
use super::context::PlanContext;
use super::cost::TIME_FOR_COMPARE;
use super::group_min_max::get_best_group_min_max;
use super::index_merge::get_best_disjunct_quick;
use super::plan::TableReadPlan;
use super::range_plan::get_key_scans_params;
use super::ror::{get_best_covering_ror_intersect, get_best_ror_intersect};
use super::sel_tree::{SelTree, SelTreeKind};
use super::translate::RangeParam;
use crate::query::{Cond, QueryShape};
use crate::quick::QuickSelect;
use crate::schema::TableShare;
use crate::storage::Cursor;
use crate::types::{IndexId, KeyMap, Result};

/// Tables with at most this many rows are scanned without planning.
const TINY_TABLE_ROWS: u64 = 2;

/// How the table will be read.
#[derive(Clone, Debug)]
pub enum Access {
    /// The condition can never hold; the table contributes no rows.
    Impossible,
    /// Read every row and filter.
    TableScan,
    /// Use the plan of one strategy.
    Plan(TableReadPlan),
}

/// A plan a strategy offered during selection.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    pub kind: &'static str,
    pub records: u64,
    pub read_cost: f64,
}

/// Outcome of optimizing access to one table.
#[derive(Clone, Debug)]
pub struct AccessPlan {
    pub access: Access,
    /// Estimated rows the access returns before filtering.
    pub records: u64,
    /// Estimated cost of the chosen access.
    pub read_cost: f64,
    /// Cost of reading without a strategy plan: the full table scan, a
    /// cheaper covering index scan, or the scan bound raised by LIMIT.
    pub table_scan_cost: f64,
    /// Plans the strategies offered, in the order they were found.
    pub candidates: Vec<Candidate>,
}

impl AccessPlan {
    fn table_scan(records: u64, cost: f64) -> Self {
        Self {
            access: Access::TableScan,
            records,
            read_cost: cost,
            table_scan_cost: cost,
            candidates: Vec::new(),
        }
    }

    /// The chosen strategy plan, if any.
    pub fn plan(&self) -> Option<&TableReadPlan> {
        match &self.access {
            Access::Plan(plan) => Some(plan),
            _ => None,
        }
    }

    pub fn is_impossible(&self) -> bool {
        matches!(self.access, Access::Impossible)
    }

    /// Short name of the chosen access.
    pub fn kind(&self) -> &'static str {
        match &self.access {
            Access::Impossible => "impossible",
            Access::TableScan => "table_scan",
            Access::Plan(plan) => plan.kind(),
        }
    }

    /// Builds and initializes the iterator of the chosen plan. `None` when
    /// the table is read by a full scan or contributes no rows.
    pub fn make_quick<'a>(
        &self,
        cursor: &'a dyn Cursor,
    ) -> Result<Option<Box<dyn QuickSelect + 'a>>> {
        let Access::Plan(plan) = &self.access else {
            return Ok(None);
        };
        let mut quick = plan.make_quick(cursor, true)?;
        quick.init()?;
        debug!(quick = %quick.describe(), kind = %quick.kind(), "access method materialized");
        Ok(Some(quick))
    }
}

/// Index whose entries are the shortest, among `keys`.
fn find_shortest_key(share: &TableShare, keys: &KeyMap) -> Option<IndexId> {
    keys.iter()
        .map(|idx| IndexId(idx as u16))
        .min_by_key(|&id| share.key_length(id))
}

/// Full scan cost for `records` rows, as the baseline to beat.
fn table_scan_cost(cursor: &dyn Cursor, records: u64) -> f64 {
    let compare = records as f64 / TIME_FOR_COMPARE + 1.0;
    cursor.scan_time() + compare + 1.1
}

/// Optimizes access to the table behind `cursor` for `cond`.
pub fn optimize_access(
    cursor: &dyn Cursor,
    config: &OptimizerConfig,
    query: &QueryShape,
    cond: Option<&Cond>,
) -> AccessPlan {
    let ctx = PlanContext::new(cursor, config, query, cond);
    test_quick_select(&ctx)
}

/// Runs translation and every applicable strategy, returning the cheapest
/// access.
pub fn test_quick_select(ctx: &PlanContext<'_>) -> AccessPlan {
    let share = ctx.share();
    let records = ctx.stats.records;
    let baseline = table_scan_cost(ctx.cursor, records);
    let mut read_time = baseline;
    let compare = records as f64 / TIME_FOR_COMPARE + 1.0;

    match ctx.query.limit {
        Some(limit) if limit < records => read_time = records as f64 + compare + 1.0,
        _ if records <= TINY_TABLE_ROWS && !ctx.config.force_quick => {
            debug!(table = %share.name, records, "tiny table scanned without planning");
            return AccessPlan::table_scan(records, baseline);
        }
        _ => {}
    }
    if share.keys.is_empty() {
        return AccessPlan::table_scan(records, baseline);
    }

    if let Some(key) = find_shortest_key(share, &ctx.covering_keys) {
        let key_read_time = ctx.cursor.index_only_read_time(key, records as f64)
            + records as f64 / TIME_FOR_COMPARE;
        trace!(index = %share.key(key).name, cost = key_read_time, "covering index scan");
        if key_read_time < read_time {
            read_time = key_read_time;
        }
    }

    let mut tree = None;
    if let Some(cond) = ctx.cond {
        let param = RangeParam::new(share, KeyMap::prefix(share.keys.len()), ctx.config)
            .with_equalities(cond);
        tree = param.get_mm_tree(cond);
    }
    if let Some(t) = &tree {
        match t.kind {
            SelTreeKind::Impossible => {
                debug!(table = %share.name, "condition is impossible");
                return AccessPlan {
                    access: Access::Impossible,
                    records: 0,
                    read_cost: 0.0,
                    table_scan_cost: read_time,
                    candidates: Vec::new(),
                };
            }
            SelTreeKind::Always | SelTreeKind::Maybe => tree = None,
            SelTreeKind::Key | SelTreeKind::KeySmaller => {}
        }
    }

    let mut selector = Selector {
        best: None,
        best_read_time: read_time,
        candidates: Vec::new(),
    };
    if ctx.config.enable_group_min_max {
        if let Some(plan) = get_best_group_min_max(ctx, tree.as_ref()) {
            selector.offer(TableReadPlan::GroupMinMax(plan));
        }
    }
    if let Some(tree) = &tree {
        choose_for_tree(ctx, tree, &mut selector);
    }

    let Selector {
        best, candidates, ..
    } = selector;
    match best {
        Some(plan) => {
            debug!(table = %share.name, plan = %plan, "access plan chosen");
            AccessPlan {
                records: plan.records().min(records),
                read_cost: plan.read_cost(),
                access: Access::Plan(plan),
                table_scan_cost: read_time,
                candidates,
            }
        }
        None => {
            debug!(table = %share.name, cost = read_time, "full table scan chosen");
            let mut plan = AccessPlan::table_scan(records, read_time);
            plan.candidates = candidates;
            plan
        }
    }
}

/// Best plan seen so far and the cost a new plan has to beat.
struct Selector {
    best: Option<TableReadPlan>,
    best_read_time: f64,
    candidates: Vec<Candidate>,
}

impl Selector {
    fn offer(&mut self, plan: TableReadPlan) {
        trace!(plan = %plan, "candidate plan");
        self.candidates.push(Candidate {
            kind: plan.kind(),
            records: plan.records(),
            read_cost: plan.read_cost(),
        });
        if plan.read_cost() < self.best_read_time {
            self.best_read_time = plan.read_cost();
            self.best = Some(plan);
        }
    }
}

fn choose_for_tree(ctx: &PlanContext<'_>, tree: &SelTree, selector: &mut Selector) {
    if tree.merges.is_empty() {
        let mut key_scans = get_key_scans_params(ctx, tree, false, selector.best_read_time);
        if let Some(range) = key_scans.best.take() {
            selector.offer(TableReadPlan::Range(range));
        }
        if !ctx.allows_merged_scans() || !ctx.config.enable_ror_intersect {
            return;
        }
        let search = get_best_ror_intersect(ctx, &key_scans, selector.best_read_time);
        let Some(plan) = search.plan else {
            return;
        };
        let is_covering = plan.is_covering;
        selector.offer(TableReadPlan::RorIntersect(plan));
        if !is_covering && search.can_build_covering {
            if let Some(covering) =
                get_best_covering_ror_intersect(ctx, &search.scans, selector.best_read_time)
            {
                selector.offer(TableReadPlan::RorIntersect(covering));
            }
        }
        return;
    }

    let read_time = selector.best_read_time;
    let mut best_conj: Option<TableReadPlan> = None;
    for imerge in &tree.merges {
        let Some(plan) = get_best_disjunct_quick(ctx, imerge, read_time) else {
            continue;
        };
        if best_conj
            .as_ref()
            .map_or(true, |best| plan.read_cost() < best.read_cost())
        {
            best_conj = Some(plan);
        }
    }
    if let Some(plan) = best_conj {
        selector.offer(plan);
    }
}
