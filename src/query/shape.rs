//! Query context the access-path choice depends on.

use serde::{Deserialize, Serialize};

use crate::query::Cond;
use crate::schema::TableShare;
use crate::types::{FieldId, FieldSet};

/// Statement the table is read for.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    /// Plain read.
    #[default]
    Select,
    /// Rows are updated while scanning.
    Update,
    /// Rows are deleted while scanning; forbids concurrent merged scans.
    Delete,
}

/// Aggregate function.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFunc {
    /// `MIN`
    Min,
    /// `MAX`
    Max,
    /// `COUNT`
    Count,
    /// `SUM`
    Sum,
    /// `AVG`
    Avg,
}

/// One aggregate call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    /// Function.
    pub func: AggFunc,
    /// Column argument; `None` for `*` or a non-column expression.
    #[serde(default)]
    pub arg: Option<FieldId>,
    /// Columns referenced by a non-column argument.
    #[serde(default)]
    pub expr_fields: Vec<FieldId>,
}

impl Aggregate {
    pub fn min(field: FieldId) -> Self {
        Self {
            func: AggFunc::Min,
            arg: Some(field),
            expr_fields: Vec::new(),
        }
    }

    pub fn max(field: FieldId) -> Self {
        Self {
            func: AggFunc::Max,
            arg: Some(field),
            expr_fields: Vec::new(),
        }
    }

    pub fn count_star() -> Self {
        Self {
            func: AggFunc::Count,
            arg: None,
            expr_fields: Vec::new(),
        }
    }
}

/// One item of the select list or the GROUP BY list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectItem {
    /// Plain column.
    Field(FieldId),
    /// Aggregate call.
    Aggregate(Aggregate),
    /// Any other expression, with the columns it reads.
    Expr(Vec<FieldId>),
    /// `*`
    AllFields,
}

/// Shape of the query reading one table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryShape {
    /// Number of tables in the join; 1 for single-table queries.
    pub join_tables: u32,
    /// Select list.
    pub select: Vec<SelectItem>,
    /// GROUP BY items.
    pub group_by: Vec<SelectItem>,
    /// `SELECT DISTINCT`.
    pub distinct: bool,
    /// `GROUP BY ... WITH ROLLUP`.
    pub with_rollup: bool,
    /// Statement kind.
    pub statement: StatementKind,
    /// Row limit, when the consumer stops early.
    pub limit: Option<u64>,
    /// Columns the executor needs; derived from the query when absent.
    pub read_fields: Option<Vec<FieldId>>,
}

impl Default for QueryShape {
    fn default() -> Self {
        Self {
            join_tables: 1,
            select: vec![SelectItem::AllFields],
            group_by: Vec::new(),
            distinct: false,
            with_rollup: false,
            statement: StatementKind::Select,
            limit: None,
            read_fields: None,
        }
    }
}

impl QueryShape {
    /// `SELECT <fields> FROM t` over one table.
    pub fn select(fields: &[FieldId]) -> Self {
        Self {
            select: fields.iter().copied().map(SelectItem::Field).collect(),
            ..Self::default()
        }
    }

    pub fn with_select(mut self, items: Vec<SelectItem>) -> Self {
        self.select = items;
        self
    }

    pub fn with_group_by(mut self, fields: &[FieldId]) -> Self {
        self.group_by = fields.iter().copied().map(SelectItem::Field).collect();
        self
    }

    pub fn with_distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn with_statement(mut self, statement: StatementKind) -> Self {
        self.statement = statement;
        self
    }

    pub fn with_join_tables(mut self, tables: u32) -> Self {
        self.join_tables = tables.max(1);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Aggregates of the select list.
    pub fn aggregates(&self) -> impl Iterator<Item = &Aggregate> {
        self.select.iter().filter_map(|item| match item {
            SelectItem::Aggregate(agg) => Some(agg),
            _ => None,
        })
    }

    /// Columns the query reads from this table.
    pub fn read_set(&self, share: &TableShare, cond: Option<&Cond>) -> FieldSet {
        if let Some(fields) = &self.read_fields {
            return fields.iter().copied().collect();
        }
        let mut set = cond.map(Cond::fields).unwrap_or_default();
        for item in self.select.iter().chain(&self.group_by) {
            match item {
                SelectItem::Field(f) => set.set(*f),
                SelectItem::Aggregate(agg) => {
                    if let Some(f) = agg.arg {
                        set.set(f);
                    }
                    for f in &agg.expr_fields {
                        set.set(*f);
                    }
                }
                SelectItem::Expr(fields) => {
                    for f in fields {
                        set.set(*f);
                    }
                }
                SelectItem::AllFields => {
                    for f in &share.fields {
                        set.set(f.id);
                    }
                }
            }
        }
        set
    }
}
