//! Every translated tree must select at least the rows the predicate
//! accepts. Each case builds the trees for one predicate, scans every index
//! tree (or every index-merge disjunct) over a table of mixed column types
//! and compares against row-by-row evaluation.

use std::collections::BTreeSet;

use rangeopt::optimizer::{OptimizerConfig, RangeParam, SelTree, SelTreeKind};
use rangeopt::query::{CmpOp, Cond, Operand};
use rangeopt::quick::{collect_rows, QuickRangeSelect, QuickSelect};
use rangeopt::schema::{Collation, FieldType, KeyInfo, TableShare};
use rangeopt::storage::{Cursor, MemoryTable};
use rangeopt::types::{FieldId, IndexId, KeyMap, RowId, Value};
use time::macros::{date, datetime};
use time::Duration;

const ROWS: i64 = 400;

const ID: FieldId = FieldId(0);
const A: FieldId = FieldId(1);
const U: FieldId = FieldId(2);
const TINY: FieldId = FieldId(3);
const S: FieldId = FieldId(4);
const CI: FieldId = FieldId(5);
const D: FieldId = FieldId(6);
const TS: FieldId = FieldId(7);
const R: FieldId = FieldId(8);

fn int(bits: u8, unsigned: bool) -> FieldType {
    FieldType::Integer { bits, unsigned }
}

fn varchar(collation: Collation) -> FieldType {
    FieldType::Varchar {
        max_len: 8,
        collation,
    }
}

fn table() -> MemoryTable {
    let share = TableShare::new("mixed")
        .with_field("id", int(32, false), false)
        .with_field("a", int(32, false), true)
        .with_field("u", int(32, true), false)
        .with_field("tiny", int(8, false), false)
        .with_field("s", varchar(Collation::Binary), true)
        .with_field("ci", varchar(Collation::CaseInsensitive), false)
        .with_field("d", FieldType::Date, false)
        .with_field("ts", FieldType::Timestamp, false)
        .with_field("r", FieldType::Double, false)
        .with_primary_key(KeyInfo::on("PRIMARY", &[ID]).unique())
        .with_index(KeyInfo::on("a", &[A]))
        .with_index(KeyInfo::on("u", &[U]))
        .with_index(KeyInfo::on("tiny", &[TINY]))
        .with_index(KeyInfo::on("s", &[S]))
        .with_index(KeyInfo::on("ci", &[CI]))
        .with_index(KeyInfo::on("d", &[D]))
        .with_index(KeyInfo::on("ts", &[TS]))
        .with_index(KeyInfo::on("r", &[R]))
        .with_index(KeyInfo::on("a_u", &[A, U]));
    let rows = (0..ROWS).map(|i| {
        let a = if i % 13 == 0 {
            Value::Null
        } else {
            Value::Int(i % 41 - 20)
        };
        let s = if i % 17 == 0 {
            Value::Null
        } else {
            Value::Str(format!("k{:03}", i % 100))
        };
        let ci = if i % 2 == 0 {
            format!("Ab{}", i % 5)
        } else {
            format!("aB{}", i % 5)
        };
        vec![
            Value::Int(i),
            a,
            Value::UInt((i % 50) as u64),
            Value::Int(i % 256 - 128),
            s,
            Value::Str(ci),
            Value::Date(date!(2007 - 12 - 01) + Duration::days(i % 20)),
            Value::DateTime(datetime!(2007-12-10 0:00) + Duration::hours(i)),
            Value::Real(i as f64 / 4.0),
        ]
    });
    MemoryTable::builder(share)
        .rows(rows)
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

fn matching(table: &MemoryTable, cond: &Cond) -> BTreeSet<RowId> {
    let share = table.share();
    table
        .rows()
        .iter()
        .filter(|row| cond.eval(share, &row.values) == Some(true))
        .map(|row| row.rowid)
        .collect()
}

fn scan(table: &MemoryTable, tree: &SelTree, idx: usize) -> BTreeSet<RowId> {
    let key = tree.key(idx).expect("index tree");
    let mut quick = QuickRangeSelect::from_tree(table, IndexId(idx as u16), key, false);
    quick.init().expect("init");
    collect_rows(&mut quick)
        .expect("scan")
        .into_iter()
        .map(|row| row.rowid)
        .collect()
}

/// Translates `cond` and checks every index tree and every index-merge
/// list against brute-force evaluation. Returns the tree for shape checks.
fn assert_sound(table: &MemoryTable, cond: &Cond) -> Option<SelTree> {
    let expected = matching(table, cond);
    let tree = translate(table, cond);
    let Some(t) = &tree else {
        return tree;
    };
    if t.kind == SelTreeKind::Impossible {
        assert!(expected.is_empty(), "impossible tree for {cond:?} but {expected:?} match");
        return tree;
    }
    for idx in t.keys_map().iter() {
        let got = scan(table, t, idx);
        let missing: Vec<_> = expected.difference(&got).collect();
        assert!(missing.is_empty(), "index {idx} misses {missing:?} for {cond:?}");
    }
    for merge in &t.merges {
        let mut got = BTreeSet::new();
        for disjunct in &merge.trees {
            let idx = disjunct
                .keys_map()
                .iter()
                .next()
                .expect("every disjunct restricts an index");
            got.extend(scan(table, disjunct, idx));
        }
        let missing: Vec<_> = expected.difference(&got).collect();
        assert!(missing.is_empty(), "index merge misses {missing:?} for {cond:?}");
    }
    tree
}

fn index_of(table: &MemoryTable, name: &str) -> usize {
    table
        .share()
        .keys
        .iter()
        .position(|k| k.name == name)
        .expect("index")
}

fn restricts(tree: &Option<SelTree>, table: &MemoryTable, name: &str) -> bool {
    tree.as_ref()
        .is_some_and(|t| t.key(index_of(table, name)).is_some())
}

#[test]
fn comparisons_on_nullable_integer() {
    let t = table();
    for cmp in [
        Cond::lt(A, 0i64),
        Cond::le(A, -20i64),
        Cond::gt(A, 19i64),
        Cond::ge(A, 5i64),
        Cond::eq(A, 7i64),
        Cond::ne(A, 0i64),
        Cond::between(A, -3i64, 3i64),
        Cond::not_between(A, -15i64, 15i64),
    ] {
        let tree = assert_sound(&t, &cmp);
        assert!(restricts(&tree, &t, "a"), "{cmp:?}");
        assert!(restricts(&tree, &t, "a_u"), "{cmp:?}");
    }
}

#[test]
fn in_and_not_in_lists() {
    let t = table();
    assert_sound(&t, &Cond::in_list(A, [-20i64, 0, 3, 99]));
    let tree = assert_sound(&t, &Cond::not_in(A, [0i64, 5, 5, -7]));
    assert!(restricts(&tree, &t, "a"));
    let tree = assert_sound(&t, &Cond::not_in(U, [-1i64, -2]));
    assert!(!restricts(&tree, &t, "u"));
    let long = Cond::not_in(A, 0..2000i64);
    let tree = assert_sound(&t, &long);
    assert!(!restricts(&tree, &t, "a"));
}

#[test]
fn unsigned_column_against_negative_literals() {
    let t = table();
    let tree = assert_sound(&t, &Cond::lt(U, -1i64));
    assert_eq!(tree.map(|t| t.kind), Some(SelTreeKind::Impossible));
    assert_sound(&t, &Cond::gt(U, -1i64));
    assert_sound(&t, &Cond::ge(U, 48i64));
    assert_sound(&t, &Cond::eq(U, 10u64));
}

#[test]
fn literals_outside_the_column_range() {
    let t = table();
    for cond in [
        Cond::lt(TINY, 300i64),
        Cond::le(TINY, -300i64),
        Cond::gt(TINY, -200i64),
        Cond::ge(TINY, 127i64),
        Cond::eq(TINY, 1000i64),
        Cond::lt(A, 2.5f64),
        Cond::gt(A, -2.5f64),
        Cond::eq(A, 2.5f64),
    ] {
        assert_sound(&t, &cond);
    }
}

#[test]
fn like_prefixes() {
    let t = table();
    let tree = assert_sound(&t, &Cond::like(S, "k01%"));
    assert!(restricts(&tree, &t, "s"));
    assert_sound(&t, &Cond::like(S, "k0_5"));
    assert_sound(&t, &Cond::like(S, "k099"));
    let tree = assert_sound(&t, &Cond::like(S, "%9"));
    assert!(!restricts(&tree, &t, "s"));
    let tree = assert_sound(&t, &Cond::like(CI, "AB%"));
    assert!(restricts(&tree, &t, "ci"));
}

#[test]
fn case_insensitive_collation() {
    let t = table();
    for cond in [
        Cond::eq(CI, "AB3"),
        Cond::eq(CI, "ab3"),
        Cond::lt(CI, "aB2"),
        Cond::ge(CI, "AB4"),
        Cond::in_list(CI, ["ab0", "AB1"]),
    ] {
        let tree = assert_sound(&t, &cond);
        assert!(restricts(&tree, &t, "ci"), "{cond:?}");
    }
}

#[test]
fn string_bounds_and_nulls() {
    let t = table();
    assert_sound(&t, &Cond::lt(S, "k010"));
    assert_sound(&t, &Cond::between(S, "k020", "k029"));
    assert_sound(&t, &Cond::is_null(S));
    assert_sound(&t, &Cond::is_not_null(S));
    assert_sound(&t, &Cond::is_null(A));
    let tree = assert_sound(&t, &Cond::eq(S, Value::Null));
    assert_eq!(tree.map(|t| t.kind), Some(SelTreeKind::Impossible));
    let null_safe = Cond::Cmp {
        cmp: CmpOp::NullSafeEq,
        left: Operand::Field(A),
        right: Operand::Const(Value::Null),
        collation: None,
    };
    let tree = assert_sound(&t, &null_safe);
    assert!(restricts(&tree, &t, "a"));
}

#[test]
fn date_column_against_datetime_literals() {
    let t = table();
    let noon = datetime!(2007-12-10 12:34:55);
    for cond in [
        Cond::lt(D, noon),
        Cond::le(D, noon),
        Cond::gt(D, noon),
        Cond::ge(D, noon),
        Cond::eq(D, noon),
        Cond::eq(D, datetime!(2007-12-10 0:00)),
        Cond::lt(D, date!(2007 - 12 - 10)),
        Cond::between(D, date!(2007 - 12 - 03), date!(2007 - 12 - 05)),
    ] {
        assert_sound(&t, &cond);
    }
}

#[test]
fn timestamp_column() {
    let t = table();
    for cond in [
        Cond::lt(TS, datetime!(2007-12-11 0:00)),
        Cond::gt(TS, datetime!(2007-12-20 5:30)),
        Cond::ge(TS, datetime!(1960-01-01 0:00)),
        Cond::lt(TS, datetime!(2999-01-01 0:00)),
        Cond::eq(TS, datetime!(2007-12-12 7:00)),
    ] {
        let tree = assert_sound(&t, &cond);
        assert!(tree.is_some(), "{cond:?}");
    }
}

#[test]
fn real_column() {
    let t = table();
    assert_sound(&t, &Cond::lt(R, 10i64));
    assert_sound(&t, &Cond::between(R, 2.25f64, 7.75f64));
    assert_sound(&t, &Cond::eq(R, 12.5f64));
    assert_sound(&t, &Cond::gt(R, 1e300f64));
}

#[test]
fn conjunctions_and_composite_keys() {
    let t = table();
    let cond = Cond::and(vec![Cond::eq(A, 3i64), Cond::between(U, 10i64, 30i64)]);
    let tree = assert_sound(&t, &cond);
    assert!(restricts(&tree, &t, "a_u"));
    let cond = Cond::and(vec![Cond::gt(A, 10i64), Cond::lt(A, 5i64)]);
    let tree = assert_sound(&t, &cond);
    assert_eq!(tree.map(|t| t.kind), Some(SelTreeKind::Impossible));
    let cond = Cond::and(vec![
        Cond::in_list(A, [1i64, 2, 3]),
        Cond::ge(U, 20i64),
        Cond::like(S, "k0%"),
    ]);
    assert_sound(&t, &cond);
}

#[test]
fn disjunctions() {
    let t = table();
    let same_index = Cond::or(vec![Cond::lt(A, -10i64), Cond::gt(A, 10i64)]);
    let tree = assert_sound(&t, &same_index);
    assert!(restricts(&tree, &t, "a"));

    let across = Cond::or(vec![Cond::eq(A, 5i64), Cond::lt(U, 3i64)]);
    let tree = assert_sound(&t, &across).expect("tree");
    assert!(tree.keys_map().is_empty());
    assert_eq!(tree.merges.len(), 1);

    let nested = Cond::and(vec![
        Cond::or(vec![Cond::eq(A, 5i64), Cond::eq(U, 7i64)]),
        Cond::or(vec![Cond::like(S, "k05%"), Cond::ge(R, 90i64)]),
    ]);
    assert_sound(&t, &nested);

    let unindexed = Cond::or(vec![Cond::eq(A, 5i64), Cond::Opaque { fields: vec![ID] }]);
    assert!(assert_sound(&t, &unindexed).is_none());
}

#[test]
fn equality_classes_spread_constants() {
    let t = table();
    let cond = Cond::and(vec![
        Cond::MultiEqual {
            fields: vec![A, U],
            constant: Some(Value::Int(5)),
        },
        Cond::lt(TINY, 0i64),
    ]);
    let tree = assert_sound(&t, &cond);
    assert!(restricts(&tree, &t, "a"));
    assert!(restricts(&tree, &t, "u"));
}
