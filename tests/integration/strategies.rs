//! Strategy selection and the iterators it materializes, driven through
//! the public optimizer entry point.

use std::collections::BTreeSet;

use rangeopt::optimizer::{optimize_access, AccessPlan, OptimizerConfig, TableReadPlan};
use rangeopt::query::{Cond, QueryShape, StatementKind};
use rangeopt::quick::{collect_rows, QuickKind, QuickSelect};
use rangeopt::schema::{FieldType, KeyInfo, TableShare};
use rangeopt::storage::{Cursor, MemoryTable};
use rangeopt::types::{FieldId, RowId, Value};

const ID: FieldId = FieldId(0);
const A: FieldId = FieldId(1);
const B: FieldId = FieldId(2);

fn int() -> FieldType {
    FieldType::Integer {
        bits: 32,
        unsigned: false,
    }
}

/// 10000 rows of `(id, a = i % 100, b = i / 100, pad)`.
fn table(clustered: bool) -> MemoryTable {
    let share = TableShare::new("t")
        .with_field("id", int(), false)
        .with_field("a", int(), false)
        .with_field("b", int(), false)
        .with_field("pad", FieldType::Double, false)
        .with_primary_key(KeyInfo::on("PRIMARY", &[ID]))
        .with_index(KeyInfo::on("a", &[A]))
        .with_index(KeyInfo::on("b", &[B]));
    MemoryTable::builder(share)
        .rows((0..10_000i64).map(|i| {
            vec![
                Value::Int(i),
                Value::Int(i % 100),
                Value::Int(i / 100),
                Value::Real(i as f64),
            ]
        }))
        .clustered_primary_key(clustered)
        .build()
        .expect("table")
}

fn plan(t: &MemoryTable, config: &OptimizerConfig, query: &QueryShape, cond: &Cond) -> AccessPlan {
    let plan = optimize_access(t, config, query, Some(cond));
    assert!(plan.read_cost <= plan.table_scan_cost, "{plan:?}");
    for candidate in &plan.candidates {
        assert!(plan.read_cost <= candidate.read_cost, "{candidate:?} beats the chosen plan");
    }
    plan
}

/// Rowids the access returns, before any filtering.
fn fetch(t: &MemoryTable, access: &AccessPlan) -> Vec<RowId> {
    let rows = match access.make_quick(t).expect("materialize") {
        Some(mut quick) => collect_rows(quick.as_mut()).expect("rows"),
        None if access.is_impossible() => Vec::new(),
        None => t.table_scan().expect("scan"),
    };
    rows.into_iter().map(|r| r.rowid).collect()
}

fn matching(t: &MemoryTable, cond: &Cond) -> BTreeSet<RowId> {
    t.rows()
        .iter()
        .filter(|row| cond.eval(t.share(), &row.values) == Some(true))
        .map(|row| row.rowid)
        .collect()
}

fn assert_superset(t: &MemoryTable, access: &AccessPlan, cond: &Cond) {
    let got: BTreeSet<RowId> = fetch(t, access).into_iter().collect();
    let missing: Vec<_> = matching(t, cond).difference(&got).copied().collect();
    assert!(missing.is_empty(), "{} misses {missing:?}", access.kind());
}

fn both_equalities() -> Cond {
    Cond::and(vec![Cond::eq(A, 3i64), Cond::eq(B, 4i64)])
}

fn either_equality() -> Cond {
    Cond::or(vec![Cond::eq(A, 3i64), Cond::eq(B, 4i64)])
}

#[test]
fn independent_equalities_intersect_by_rowid() {
    let t = table(false);
    let cond = both_equalities();
    let access = plan(&t, &OptimizerConfig::default(), &QueryShape::default(), &cond);
    let Some(TableReadPlan::RorIntersect(intersect)) = access.plan() else {
        panic!("expected an intersection, got {}", access.kind());
    };
    assert_eq!(intersect.scans.len(), 2);
    assert!(intersect.cpk_scan.is_none());
    assert!(!intersect.is_covering);
    assert_eq!(access.records, 1);

    let mut quick = access.make_quick(&t).expect("materialize").expect("plan");
    assert_eq!(quick.kind(), QuickKind::RorIntersect);
    let described = quick.describe();
    assert!(described == "intersect(a,b)" || described == "intersect(b,a)", "{described}");
    let rows = collect_rows(quick.as_mut()).expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].rowid, RowId(403));
    assert_eq!(rows[0].values[3], Value::Real(403.0));

    quick.reset().expect("reset");
    assert_eq!(collect_rows(quick.as_mut()).expect("rows").len(), 1);
}

#[test]
fn covering_intersection_skips_the_row_fetch() {
    let t = table(false);
    let cond = both_equalities();
    let query = QueryShape::select(&[A, B]);
    let access = plan(&t, &OptimizerConfig::default(), &query, &cond);
    let Some(TableReadPlan::RorIntersect(intersect)) = access.plan() else {
        panic!("expected an intersection, got {}", access.kind());
    };
    assert!(intersect.is_covering);

    let mut quick = access.make_quick(&t).expect("materialize").expect("plan");
    let rows = collect_rows(quick.as_mut()).expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].values,
        vec![Value::Null, Value::Int(3), Value::Int(4), Value::Null]
    );
}

#[test]
fn clustered_primary_key_ranges_filter_intersections() {
    let t = table(true);
    let cond = Cond::and(vec![Cond::eq(A, 3i64), Cond::lt(ID, 5000i64)]);
    let access = plan(&t, &OptimizerConfig::default(), &QueryShape::default(), &cond);
    assert_ne!(access.kind(), "table_scan");
    assert_superset(&t, &access, &cond);
    if let Some(TableReadPlan::RorIntersect(intersect)) = access.plan() {
        assert!(intersect.cpk_scan.is_some());
        assert_eq!(fetch(&t, &access).len(), 50);
    }
}

#[test]
fn intersections_can_be_disabled() {
    let t = table(false);
    let cond = both_equalities();
    let config = OptimizerConfig::default().with_ror_intersect(false);
    let access = plan(&t, &config, &QueryShape::default(), &cond);
    assert_eq!(access.kind(), "range");
    assert!(access.candidates.iter().all(|c| c.kind == "range"));
    assert_superset(&t, &access, &cond);
}

#[test]
fn deleting_statements_avoid_merged_scans() {
    let t = table(false);
    let delete = QueryShape::default().with_statement(StatementKind::Delete);

    let access = plan(&t, &OptimizerConfig::default(), &delete, &both_equalities());
    assert_eq!(access.kind(), "range");
    assert!(access.candidates.iter().all(|c| c.kind != "ror_intersect"));

    let access = plan(&t, &OptimizerConfig::default(), &delete, &either_equality());
    assert_eq!(access.kind(), "index_merge");
    assert_superset(&t, &access, &either_equality());
}

#[test]
fn rowid_ordered_union_merges_sorted_streams() {
    let t = table(false);
    let cond = either_equality();
    let access = plan(&t, &OptimizerConfig::default(), &QueryShape::default(), &cond);
    let Some(TableReadPlan::RorUnion(union)) = access.plan() else {
        panic!("expected a union, got {}", access.kind());
    };
    assert_eq!(union.scans.len(), 2);

    let mut quick = access.make_quick(&t).expect("materialize").expect("plan");
    assert_eq!(quick.kind(), QuickKind::RorUnion);
    assert_eq!(quick.describe(), "union(a,b)");
    let ids: Vec<RowId> = collect_rows(quick.as_mut())
        .expect("rows")
        .into_iter()
        .map(|r| r.rowid)
        .collect();
    let expected: Vec<RowId> = matching(&t, &cond).into_iter().collect();
    assert_eq!(ids.len(), 199);
    assert_eq!(ids, expected);
}

#[test]
fn sort_union_when_rowid_order_is_unavailable() {
    let t = table(false);
    let cond = Cond::or(vec![
        Cond::eq(A, 3i64),
        Cond::and(vec![Cond::ge(B, 10i64), Cond::le(B, 11i64)]),
    ]);
    let access = plan(&t, &OptimizerConfig::default(), &QueryShape::default(), &cond);
    let Some(TableReadPlan::IndexMerge(merge)) = access.plan() else {
        panic!("expected a sort union, got {}", access.kind());
    };
    assert_eq!(merge.scans.len(), 2);
    assert!(!merge.scans[1].is_ror);

    let mut quick = access.make_quick(&t).expect("materialize").expect("plan");
    assert_eq!(quick.kind(), QuickKind::IndexMerge);
    let ids: Vec<RowId> = collect_rows(quick.as_mut())
        .expect("rows")
        .into_iter()
        .map(|r| r.rowid)
        .collect();
    let expected: Vec<RowId> = matching(&t, &cond).into_iter().collect();
    assert_eq!(ids, expected);
}

#[test]
fn union_gates() {
    let t = table(false);
    let cond = either_equality();

    let sort_only = OptimizerConfig::default().with_ror_union(false);
    let access = plan(&t, &sort_only, &QueryShape::default(), &cond);
    assert_eq!(access.kind(), "index_merge");

    let ror_only = OptimizerConfig::default().with_index_merge(false);
    let access = plan(&t, &ror_only, &QueryShape::default(), &cond);
    assert_eq!(access.kind(), "ror_union");

    let neither = OptimizerConfig::default()
        .with_index_merge(false)
        .with_ror_union(false);
    let access = plan(&t, &neither, &QueryShape::default(), &cond);
    assert_eq!(access.kind(), "table_scan");
    assert!(access.candidates.is_empty());
    assert_superset(&t, &access, &cond);
}

#[test]
fn impossible_condition_reads_nothing() {
    let t = table(false);
    let cond = Cond::and(vec![Cond::eq(A, 3i64), Cond::eq(A, 4i64)]);
    let access = plan(&t, &OptimizerConfig::default(), &QueryShape::default(), &cond);
    assert!(access.is_impossible());
    assert_eq!(access.records, 0);
    assert!(access.make_quick(&t).expect("materialize").is_none());
    assert!(fetch(&t, &access).is_empty());
}

#[test]
fn descending_and_point_ranges_stay_sound() {
    let t = table(false);
    for cond in [
        Cond::in_list(A, [1i64, 50, 99]),
        Cond::between(B, 20i64, 22i64),
        Cond::and(vec![Cond::ge(A, 90i64), Cond::lt(B, 3i64)]),
        Cond::or(vec![Cond::lt(A, 2i64), Cond::gt(B, 97i64)]),
        Cond::ne(B, 50i64),
    ] {
        let access = plan(&t, &OptimizerConfig::default(), &QueryShape::default(), &cond);
        assert_superset(&t, &access, &cond);
    }
}
