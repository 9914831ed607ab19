//! Human-readable description of a chosen access plan.

use std::fmt::Write as _;
use std::hash::Hasher;

use serde_json::{Map, Value as JsonValue};
use xxhash_rust::xxh64::Xxh64;

use super::plan::{RangeReadPlan, RorScanInfo, TableReadPlan};
use super::range_seq::SelArgRangeSeq;
use super::sel_arg::SelArgRef;
use super::select::{Access, AccessPlan};
use crate::storage::Cursor;
use crate::types::IndexId;

/// Explain tree for one table access plus a deterministic hash of it.
#[derive(Clone, Debug)]
pub struct PlanExplain {
    /// Root node of the explain tree.
    pub root: ExplainNode,
    /// Hash of the plan's shape, stable across runs.
    pub plan_hash: u64,
}

/// Explain node representing an access method with optional metadata.
#[derive(Clone, Debug)]
pub struct ExplainNode {
    /// Access method name.
    pub op: String,
    /// Properties describing the method.
    pub props: Vec<ExplainProp>,
    /// Child access methods.
    pub inputs: Vec<ExplainNode>,
}

impl ExplainNode {
    /// Creates a node with the given name.
    pub fn new(op: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            props: Vec::new(),
            inputs: Vec::new(),
        }
    }

    fn prop(mut self, key: &str, value: impl ToString) -> Self {
        self.props.push(ExplainProp::plain(key, value.to_string()));
        self
    }

    fn literal(mut self, key: &str, value: impl ToString) -> Self {
        self.props.push(ExplainProp::literal(key, value.to_string()));
        self
    }

    /// Value of the first property named `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.props
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.value.as_str())
    }
}

/// Single property associated with an [`ExplainNode`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExplainProp {
    /// Property key.
    pub key: String,
    /// Property value serialized for display.
    pub value: String,
    /// Whether this property contains literal data that may be redacted.
    pub redactable: bool,
}

impl ExplainProp {
    fn plain(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            redactable: false,
        }
    }

    fn literal(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            redactable: true,
        }
    }

    fn shown(&self, redact: bool) -> &str {
        if redact && self.redactable {
            "?"
        } else {
            &self.value
        }
    }
}

fn cost(value: f64) -> String {
    format!("{value:.2}")
}

/// Builds the explain tree of `plan` for the table behind `cursor`.
pub fn explain_access(cursor: &dyn Cursor, plan: &AccessPlan) -> PlanExplain {
    let share = cursor.share();
    let mut root = ExplainNode::new(plan.kind())
        .prop("table", &share.name)
        .prop("rows", plan.records)
        .prop("cost", cost(plan.read_cost))
        .prop("scan_cost", cost(plan.table_scan_cost));
    if let Access::Plan(read_plan) = &plan.access {
        root.inputs.push(explain_plan(cursor, read_plan));
    }
    let plan_hash = compute_plan_hash(&root);
    PlanExplain { root, plan_hash }
}

fn explain_plan(cursor: &dyn Cursor, plan: &TableReadPlan) -> ExplainNode {
    let share = cursor.share();
    match plan {
        TableReadPlan::Range(p) => explain_range(cursor, p),
        TableReadPlan::RorIntersect(p) => {
            let mut node = ExplainNode::new("intersect")
                .prop("rows", p.records)
                .prop("cost", cost(p.read_cost))
                .prop("covering", p.is_covering);
            node.inputs = p.scans.iter().map(|s| explain_ror_scan(cursor, s)).collect();
            if let Some(cpk) = &p.cpk_scan {
                node.inputs
                    .push(explain_ror_scan(cursor, cpk).prop("filter", "clustered_pk"));
            }
            node
        }
        TableReadPlan::RorUnion(p) => {
            let mut node = ExplainNode::new("union")
                .prop("rows", p.records)
                .prop("cost", cost(p.read_cost));
            node.inputs = p.scans.iter().map(|s| explain_plan(cursor, s)).collect();
            node
        }
        TableReadPlan::IndexMerge(p) => {
            let mut node = ExplainNode::new("sort_union")
                .prop("rows", p.records)
                .prop("cost", cost(p.read_cost));
            node.inputs = p.scans.iter().map(|s| explain_range(cursor, s)).collect();
            node
        }
        TableReadPlan::GroupMinMax(p) => {
            let mut node = ExplainNode::new("group_min_max")
                .prop("index", &share.key(p.index).name)
                .prop("group_prefix_len", p.group_prefix_len)
                .prop("used_key_parts", p.used_key_parts)
                .prop("rows", p.records)
                .prop("cost", cost(p.read_cost));
            if let Some(arg) = p.min_max_arg {
                let funcs = match (p.have_min, p.have_max) {
                    (true, true) => "min,max",
                    (true, false) => "min",
                    _ => "max",
                };
                node = node
                    .prop("aggregate", funcs)
                    .prop("argument", &share.field(arg).name);
            }
            if !p.key_infix.is_empty() {
                let infix: Vec<String> = p.key_infix.iter().map(ToString::to_string).collect();
                node = node.literal("key_infix", infix.join(","));
            }
            if let Some(tree) = &p.index_tree {
                node = node.literal("prefix_ranges", ranges(cursor, p.index, tree));
            }
            node
        }
    }
}

fn explain_range(cursor: &dyn Cursor, plan: &RangeReadPlan) -> ExplainNode {
    ExplainNode::new("range")
        .prop("index", &cursor.share().key(plan.index).name)
        .literal("ranges", ranges(cursor, plan.index, &plan.key))
        .prop("rows", plan.records)
        .prop("cost", cost(plan.read_cost))
        .prop("index_only", plan.index_only)
        .prop("ror", plan.is_ror)
}

fn explain_ror_scan(cursor: &dyn Cursor, scan: &RorScanInfo) -> ExplainNode {
    ExplainNode::new("range")
        .prop("index", &cursor.share().key(scan.index).name)
        .literal("ranges", ranges(cursor, scan.index, &scan.key))
        .prop("rows", scan.records)
}

fn ranges(cursor: &dyn Cursor, index: IndexId, key: &SelArgRef) -> String {
    let share = cursor.share();
    let pk_clustered = cursor.primary_key_is_clustered() && share.primary_key.is_some();
    let seq = SelArgRangeSeq::new(share, index, key, pk_clustered);
    let parts: Vec<String> = seq.map(|r| r.to_string()).collect();
    parts.join(" OR ")
}

fn compute_plan_hash(node: &ExplainNode) -> u64 {
    let mut hasher = Xxh64::new(0);
    hash_node(node, &mut hasher);
    hasher.finish()
}

fn hash_node(node: &ExplainNode, hasher: &mut Xxh64) {
    hasher.write(node.op.as_bytes());
    for prop in &node.props {
        hasher.write(prop.key.as_bytes());
        hasher.write(prop.value.as_bytes());
    }
    hasher.write_usize(node.inputs.len());
    for input in &node.inputs {
        hash_node(input, hasher);
    }
}

impl PlanExplain {
    /// Indented text, one node per line. Literal values are replaced by
    /// `?` when `redact` is set.
    pub fn to_text(&self, redact: bool) -> String {
        let mut out = String::new();
        render_text(&self.root, 0, redact, &mut out);
        let _ = writeln!(out, "plan_hash: {:016x}", self.plan_hash);
        out
    }

    /// JSON object with the tree under `plan` and the hash as hex.
    pub fn to_json(&self, redact: bool) -> JsonValue {
        let mut root = Map::new();
        root.insert("plan".into(), node_to_json(&self.root, redact));
        root.insert(
            "plan_hash".into(),
            JsonValue::String(format!("{:016x}", self.plan_hash)),
        );
        JsonValue::Object(root)
    }
}

fn render_text(node: &ExplainNode, depth: usize, redact: bool, out: &mut String) {
    let props: Vec<String> = node
        .props
        .iter()
        .map(|p| format!("{}={}", p.key, p.shown(redact)))
        .collect();
    let _ = writeln!(out, "{:indent$}{} [{}]", "", node.op, props.join(", "), indent = depth * 2);
    for input in &node.inputs {
        render_text(input, depth + 1, redact, out);
    }
}

fn node_to_json(node: &ExplainNode, redact: bool) -> JsonValue {
    let mut map = Map::new();
    map.insert("op".into(), JsonValue::String(node.op.clone()));
    if !node.props.is_empty() {
        let mut props = Map::new();
        for prop in &node.props {
            props.insert(prop.key.clone(), JsonValue::String(prop.shown(redact).to_owned()));
        }
        map.insert("props".into(), JsonValue::Object(props));
    }
    let inputs = node
        .inputs
        .iter()
        .map(|input| node_to_json(input, redact))
        .collect::<Vec<_>>();
    map.insert("inputs".into(), JsonValue::Array(inputs));
    JsonValue::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::config::OptimizerConfig;
    use crate::optimizer::select::optimize_access;
    use crate::query::{Cond, QueryShape};
    use crate::schema::{FieldType, KeyInfo, TableShare};
    use crate::storage::MemoryTable;
    use crate::types::{FieldId, Value};

    fn table() -> MemoryTable {
        let int = FieldType::Integer {
            bits: 32,
            unsigned: false,
        };
        let share = TableShare::new("t")
            .with_field("a", int.clone(), false)
            .with_field("b", int, false)
            .with_index(KeyInfo::on("a", &[FieldId(0)]));
        MemoryTable::builder(share)
            .rows((0..1000i64).map(|i| vec![Value::Int(i), Value::Int(i % 3)]))
            .build()
            .expect("table")
    }

    fn explain(cond: &Cond) -> PlanExplain {
        let t = table();
        let plan = optimize_access(&t, &OptimizerConfig::default(), &QueryShape::default(), Some(cond));
        explain_access(&t, &plan)
    }

    #[test]
    fn range_plan_lists_ranges() {
        let explain = explain(&Cond::and(vec![
            Cond::gt(FieldId(0), 10i64),
            Cond::lt(FieldId(0), 20i64),
        ]));
        assert_eq!(explain.root.op, "range");
        let range = &explain.root.inputs[0];
        assert_eq!(range.get("index"), Some("a"));
        assert_eq!(range.get("ranges"), Some("(10 .. 20)"));
        assert_eq!(range.get("rows"), Some("9"));

        let text = explain.to_text(true);
        assert!(text.contains("ranges=?"), "{text}");
        assert!(text.starts_with("range [table=t"), "{text}");
    }

    #[test]
    fn hash_tracks_the_plan_shape() {
        let narrow = explain(&Cond::eq(FieldId(0), 5i64));
        let again = explain(&Cond::eq(FieldId(0), 5i64));
        let other = explain(&Cond::eq(FieldId(0), 6i64));
        assert_eq!(narrow.plan_hash, again.plan_hash);
        assert_ne!(narrow.plan_hash, other.plan_hash);
    }

    #[test]
    fn json_nests_inputs() {
        let json = explain(&Cond::eq(FieldId(0), 5i64)).to_json(false);
        assert_eq!(json["plan"]["op"], "range");
        assert_eq!(json["plan"]["inputs"][0]["props"]["ranges"], "[5 .. 5]");
        assert!(json["plan_hash"].as_str().is_some());
    }

    #[test]
    fn table_scan_has_no_inputs() {
        let explain = explain(&Cond::ge(FieldId(1), 0i64));
        assert_eq!(explain.root.op, "table_scan");
        assert!(explain.root.inputs.is_empty());
    }
}
