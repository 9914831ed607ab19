//! End-to-end optimization of the canonical single-table queries: the
//! trees the translator builds, the plan the selector keeps and the rows
//! the materialized iterator returns.

use std::collections::BTreeSet;

use rangeopt::optimizer::{
    optimize_access, Access, OptimizerConfig, RangeParam, SelTree, TableReadPlan,
};
use rangeopt::query::{Aggregate, Cond, QueryShape, SelectItem};
use rangeopt::quick::{collect_rows, QuickRangeSelect, QuickSelect};
use rangeopt::schema::{FieldType, KeyInfo, TableShare};
use rangeopt::storage::{Cursor, MemoryTable, Row};
use rangeopt::types::{FieldId, IndexId, KeyMap, RowId, Value};

const A: FieldId = FieldId(0);
const B: FieldId = FieldId(1);

fn int() -> FieldType {
    FieldType::Integer {
        bits: 32,
        unsigned: false,
    }
}

/// `n` rows of `(a, b, c)` with separate indexes on `a` and `b`.
fn two_index_table(n: i64, a: fn(i64) -> i64, b: fn(i64) -> i64) -> MemoryTable {
    let share = TableShare::new("t")
        .with_field("a", int(), false)
        .with_field("b", int(), false)
        .with_field("c", int(), false)
        .with_index(KeyInfo::on("a", &[A]))
        .with_index(KeyInfo::on("b", &[B]));
    MemoryTable::builder(share)
        .rows((0..n).map(|i| vec![Value::Int(a(i)), Value::Int(b(i)), Value::Int(i)]))
        .build()
        .expect("table")
}

fn translate(table: &MemoryTable, cond: &Cond) -> Option<SelTree> {
    let share = table.share();
    let config = OptimizerConfig::default();
    RangeParam::new(share, KeyMap::prefix(share.keys.len()), &config)
        .with_equalities(cond)
        .get_mm_tree(cond)
}

fn run(table: &MemoryTable, config: &OptimizerConfig, query: &QueryShape, cond: &Cond) -> Vec<Row> {
    let plan = optimize_access(table, config, query, Some(cond));
    let mut quick = plan
        .make_quick(table)
        .expect("materialize")
        .expect("strategy plan");
    collect_rows(quick.as_mut()).expect("rows")
}

fn matching(table: &MemoryTable, cond: &Cond) -> BTreeSet<RowId> {
    table
        .rows()
        .iter()
        .filter(|row| cond.eval(table.share(), &row.values) == Some(true))
        .map(|row| row.rowid)
        .collect()
}

#[test]
fn open_interval_becomes_a_range_scan() {
    let t = two_index_table(1000, |i| i, |i| i % 7);
    let cond = Cond::and(vec![Cond::gt(A, 10i64), Cond::lt(A, 20i64)]);

    let tree = translate(&t, &cond).expect("tree");
    let key = tree.key(0).expect("tree on a");
    let intervals: Vec<String> = key.intervals().map(ToString::to_string).collect();
    assert_eq!(intervals, vec!["(10, 20)"]);

    let range = QuickRangeSelect::from_tree(&t, IndexId(0), key, true);
    assert_eq!(range.ranges().len(), 1);
    let oracle = t
        .records_in_range(IndexId(0), &range.ranges()[0])
        .expect("estimate");

    let plan = optimize_access(&t, &OptimizerConfig::default(), &QueryShape::default(), Some(&cond));
    let Some(TableReadPlan::Range(range_plan)) = plan.plan() else {
        panic!("expected a range plan, got {}", plan.kind());
    };
    assert_eq!(range_plan.index, IndexId(0));
    assert_eq!(range_plan.records, oracle);
    assert_eq!(plan.records, 9);
    assert!(plan.records <= t.stats().records);

    let rows = run(&t, &OptimizerConfig::default(), &QueryShape::default(), &cond);
    let values: Vec<&Value> = rows.iter().map(|r| &r.values[0]).collect();
    let expected: Vec<Value> = (11..20i64).map(Value::Int).collect();
    assert_eq!(values, expected.iter().collect::<Vec<_>>());
}

#[test]
fn disjunction_on_one_column_unifies() {
    let t = two_index_table(1000, |i| i % 100, |i| i % 7);
    let cond = Cond::or(vec![Cond::eq(A, 5i64), Cond::eq(A, 7i64)]);

    let tree = translate(&t, &cond).expect("tree");
    assert!(tree.merges.is_empty());
    let key = tree.key(0).expect("tree on a");
    assert_eq!(key.elements(), 2);
    assert!(key.intervals().all(|iv| iv.is_point()));
    let points: Vec<String> = key.intervals().map(ToString::to_string).collect();
    assert_eq!(points, vec!["[5, 5]", "[7, 7]"]);

    let plan = optimize_access(&t, &OptimizerConfig::default(), &QueryShape::default(), Some(&cond));
    assert_eq!(plan.kind(), "range");
    assert_eq!(plan.records, 20);
    let rows = run(&t, &OptimizerConfig::default(), &QueryShape::default(), &cond);
    let got: BTreeSet<RowId> = rows.iter().map(|r| r.rowid).collect();
    assert_eq!(got, matching(&t, &cond));
}

#[test]
fn disjunction_across_indexes_merges() {
    let t = two_index_table(1000, |i| i % 100, |i| i % 97);
    let cond = Cond::or(vec![Cond::eq(A, 5i64), Cond::eq(B, 7i64)]);

    let tree = translate(&t, &cond).expect("tree");
    assert!(tree.keys_map().is_empty());
    assert_eq!(tree.merges.len(), 1);
    let disjuncts = &tree.merges[0].trees;
    assert_eq!(disjuncts.len(), 2);
    assert!(disjuncts[0].key(0).is_some() && disjuncts[0].key(1).is_none());
    assert!(disjuncts[1].key(1).is_some() && disjuncts[1].key(0).is_none());

    let plan = optimize_access(&t, &OptimizerConfig::default(), &QueryShape::default(), Some(&cond));
    assert!(
        matches!(plan.kind(), "index_merge" | "ror_union"),
        "unexpected {}",
        plan.kind()
    );
    assert!(plan.read_cost < plan.table_scan_cost);

    let sort_union = OptimizerConfig::default().with_ror_union(false);
    let plan = optimize_access(&t, &sort_union, &QueryShape::default(), Some(&cond));
    let Some(TableReadPlan::IndexMerge(merge)) = plan.plan() else {
        panic!("expected a sort-union plan, got {}", plan.kind());
    };
    assert_eq!(merge.scans.len(), 2);
    let scans_cost: f64 = merge.scans.iter().map(|s| s.read_cost).sum();
    assert!(merge.read_cost > scans_cost);
    assert!(merge.read_cost < plan.table_scan_cost);
    assert_eq!(merge.records, merge.scans.iter().map(|s| s.records).sum::<u64>());

    for config in [OptimizerConfig::default(), sort_union] {
        let rows = run(&t, &config, &QueryShape::default(), &cond);
        let got: Vec<RowId> = rows.iter().map(|r| r.rowid).collect();
        let expected: Vec<RowId> = matching(&t, &cond).into_iter().collect();
        assert_eq!(got, expected, "rows come back once each in rowid order");
    }
}

#[test]
fn group_by_prefix_with_min_reads_one_entry_per_group() {
    let share = TableShare::new("t")
        .with_field("a", int(), false)
        .with_field("c", int(), false)
        .with_index(KeyInfo::on("ac", &[A, FieldId(1)]));
    let t = MemoryTable::builder(share)
        .rows((0..1000i64).map(|i| vec![Value::Int(i % 10), Value::Int(i)]))
        .build()
        .expect("table");
    let query = QueryShape::default()
        .with_select(vec![
            SelectItem::Field(A),
            SelectItem::Aggregate(Aggregate::min(FieldId(1))),
        ])
        .with_group_by(&[A]);

    let plan = optimize_access(&t, &OptimizerConfig::default(), &query, None);
    let Some(TableReadPlan::GroupMinMax(group)) = plan.plan() else {
        panic!("expected a group min/max plan, got {}", plan.kind());
    };
    assert_eq!(group.group_prefix_len, 1);
    assert_eq!(group.min_max_arg_part, Some(1));
    assert_eq!(group.min_max_arg, Some(FieldId(1)));
    assert!(group.have_min && !group.have_max);
    assert!((10..=11).contains(&group.records), "records {}", group.records);

    let mut quick = plan.make_quick(&t).expect("materialize").expect("plan");
    let mut mins = Vec::new();
    while let Some(row) = quick.get_next().expect("row") {
        let min = quick.min_max_values().and_then(|v| v.min.clone());
        mins.push((row.values[0].clone(), min));
    }
    let expected: Vec<(Value, Option<Value>)> = (0..10i64)
        .map(|k| (Value::Int(k), Some(Value::Int(k))))
        .collect();
    assert_eq!(mins, expected);
}

#[test]
fn long_not_in_list_is_left_to_filtering() {
    let t = two_index_table(5000, |i| i, |i| i % 7);
    let cond = Cond::not_in(A, 1..=1001i64);

    let tree = translate(&t, &cond);
    assert!(tree.map_or(true, |t| t.key(0).is_none()));

    let plan = optimize_access(&t, &OptimizerConfig::default(), &QueryShape::default(), Some(&cond));
    assert!(matches!(plan.access, Access::TableScan));
    assert!(plan.candidates.is_empty());

    let short = Cond::not_in(A, 1..=999i64);
    let tree = translate(&t, &short).expect("tree");
    assert_eq!(tree.key(0).expect("tree on a").elements(), 1000);
}
