//! Candidate access plans and their materialization.
//!
//! Every strategy produces a [`TableReadPlan`]. Plans are plain data: the
//! selector compares them by `read_cost` and turns the winner into an
//! iterator through [`TableReadPlan::make_quick`].

use std::fmt;

use super::sel_arg::SelArgRef;
use crate::quick::{
    GroupMinMaxSpec, QuickGroupMinMaxSelect, QuickIndexMergeSelect, QuickRangeSelect,
    QuickRorIntersectSelect, QuickRorUnionSelect, QuickSelect,
};
use crate::storage::Cursor;
use crate::types::{FieldId, FieldSet, IndexId, Result, Value};

/// Scan of one index over the ranges of its interval tree.
#[derive(Clone, Debug)]
pub struct RangeReadPlan {
    pub index: IndexId,
    /// Interval tree the ranges come from.
    pub key: SelArgRef,
    pub records: u64,
    pub read_cost: f64,
    /// Rows come back in rowid order.
    pub is_ror: bool,
    /// The index alone supplies every needed column.
    pub index_only: bool,
    pub n_ranges: u64,
    /// Longest key prefix any range bound uses.
    pub used_key_parts: usize,
}

/// One rowid-ordered scan considered for an intersection.
#[derive(Clone, Debug)]
pub struct RorScanInfo {
    pub index: IndexId,
    pub key: SelArgRef,
    pub records: u64,
    /// Key length plus rowid length.
    pub key_rec_length: u32,
    /// Cost of reading the scan's index entries without rows.
    pub index_read_cost: f64,
    /// Needed columns the index holds.
    pub covered_fields: FieldSet,
    /// Number of key parts.
    pub key_components: usize,
}

/// Intersection of rowid-ordered scans.
#[derive(Clone, Debug)]
pub struct RorIntersectReadPlan {
    pub scans: Vec<RorScanInfo>,
    /// Clustered primary key scan applied as a row filter.
    pub cpk_scan: Option<RorScanInfo>,
    /// The scans together supply every needed column.
    pub is_covering: bool,
    pub records: u64,
    pub read_cost: f64,
    /// Cost of the index reads alone.
    pub index_scan_costs: f64,
}

/// Union of rowid-ordered scans merged through a priority queue.
#[derive(Clone, Debug)]
pub struct RorUnionReadPlan {
    /// Range or intersection plans, one per disjunct.
    pub scans: Vec<TableReadPlan>,
    pub records: u64,
    pub read_cost: f64,
}

/// Union of arbitrary range scans deduplicated by sorting rowids.
#[derive(Clone, Debug)]
pub struct IndexMergeReadPlan {
    pub scans: Vec<RangeReadPlan>,
    pub records: u64,
    pub read_cost: f64,
}

/// One index probe per group to compute MIN/MAX or DISTINCT.
#[derive(Clone, Debug)]
pub struct GroupMinMaxReadPlan {
    pub index: IndexId,
    pub have_min: bool,
    pub have_max: bool,
    /// Column MIN/MAX is computed over.
    pub min_max_arg: Option<FieldId>,
    /// Key part of `min_max_arg`.
    pub min_max_arg_part: Option<usize>,
    /// Leading key parts that form the group key.
    pub group_prefix_len: usize,
    /// Key parts the group key and the key infix take.
    pub used_key_parts: usize,
    /// Constants the parts between the group key and `min_max_arg` are
    /// pinned to.
    pub key_infix: Vec<Value>,
    /// Tree over the group key restricting which groups are visited.
    pub index_tree: Option<SelArgRef>,
    /// Tree over the MIN/MAX part restricting the aggregated values.
    pub min_max_tree: Option<SelArgRef>,
    pub records: u64,
    pub read_cost: f64,
    /// Rows the group key ranges select, when `index_tree` is set.
    pub quick_prefix_records: Option<u64>,
}

/// Access plan produced by one strategy.
#[derive(Clone, Debug)]
pub enum TableReadPlan {
    /// Single index range scan.
    Range(RangeReadPlan),
    /// Rowid-ordered intersection.
    RorIntersect(RorIntersectReadPlan),
    /// Rowid-ordered union.
    RorUnion(RorUnionReadPlan),
    /// Sort-union index merge.
    IndexMerge(IndexMergeReadPlan),
    /// Group min/max scan.
    GroupMinMax(GroupMinMaxReadPlan),
}

impl TableReadPlan {
    pub fn records(&self) -> u64 {
        match self {
            TableReadPlan::Range(p) => p.records,
            TableReadPlan::RorIntersect(p) => p.records,
            TableReadPlan::RorUnion(p) => p.records,
            TableReadPlan::IndexMerge(p) => p.records,
            TableReadPlan::GroupMinMax(p) => p.records,
        }
    }

    pub fn read_cost(&self) -> f64 {
        match self {
            TableReadPlan::Range(p) => p.read_cost,
            TableReadPlan::RorIntersect(p) => p.read_cost,
            TableReadPlan::RorUnion(p) => p.read_cost,
            TableReadPlan::IndexMerge(p) => p.read_cost,
            TableReadPlan::GroupMinMax(p) => p.read_cost,
        }
    }

    /// Short strategy name used in logs and explain output.
    pub fn kind(&self) -> &'static str {
        match self {
            TableReadPlan::Range(_) => "range",
            TableReadPlan::RorIntersect(_) => "ror_intersect",
            TableReadPlan::RorUnion(_) => "ror_union",
            TableReadPlan::IndexMerge(_) => "index_merge",
            TableReadPlan::GroupMinMax(_) => "group_min_max",
        }
    }

    /// Builds the iterator for this plan. With `retrieve_full_rows` unset
    /// the iterator may return rows holding only index columns.
    pub fn make_quick<'a>(
        &self,
        cursor: &'a dyn Cursor,
        retrieve_full_rows: bool,
    ) -> Result<Box<dyn QuickSelect + 'a>> {
        match self {
            TableReadPlan::Range(p) => Ok(Box::new(range_quick(
                cursor,
                p,
                retrieve_full_rows && !p.index_only,
            ))),
            TableReadPlan::RorIntersect(p) => {
                let scans = p
                    .scans
                    .iter()
                    .map(|s| ror_scan_quick(cursor, s))
                    .collect();
                let cpk = p.cpk_scan.as_ref().map(|s| ror_scan_quick(cursor, s));
                Ok(Box::new(QuickRorIntersectSelect::new(
                    cursor,
                    scans,
                    cpk,
                    retrieve_full_rows && !p.is_covering,
                )))
            }
            TableReadPlan::RorUnion(p) => {
                let children = p
                    .scans
                    .iter()
                    .map(|s| s.make_quick(cursor, false))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Box::new(QuickRorUnionSelect::new(cursor, children)))
            }
            TableReadPlan::IndexMerge(p) => {
                let share = cursor.share();
                let clustered = cursor.primary_key_is_clustered();
                let mut scans = Vec::with_capacity(p.scans.len());
                let mut pk_scan = None;
                for scan in &p.scans {
                    let quick = range_quick(cursor, scan, false);
                    if clustered && share.primary_key == Some(scan.index) {
                        pk_scan = Some(quick);
                    } else {
                        scans.push(quick);
                    }
                }
                Ok(Box::new(QuickIndexMergeSelect::new(cursor, scans, pk_scan)))
            }
            TableReadPlan::GroupMinMax(p) => Ok(Box::new(QuickGroupMinMaxSelect::new(
                cursor,
                GroupMinMaxSpec::from_plan(p),
            ))),
        }
    }
}

fn range_quick<'a>(
    cursor: &'a dyn Cursor,
    plan: &RangeReadPlan,
    retrieve_full_rows: bool,
) -> QuickRangeSelect<'a> {
    QuickRangeSelect::from_tree(cursor, plan.index, &plan.key, retrieve_full_rows)
}

fn ror_scan_quick<'a>(cursor: &'a dyn Cursor, scan: &RorScanInfo) -> QuickRangeSelect<'a> {
    QuickRangeSelect::from_tree(cursor, scan.index, &scan.key, false)
}

impl fmt::Display for TableReadPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rows={} cost={:.2}",
            self.kind(),
            self.records(),
            self.read_cost()
        )
    }
}
