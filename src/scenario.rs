//! JSON scenario files: a table, its rows, a predicate and a query shape.
//!
//! Rows are listed literally, generated per column, or both (literal rows
//! first).
//!
//! ```json
//! {
//!   "table": {"name": "t", "fields": [...], "keys": [...]},
//!   "generate": {"count": 1000, "columns": [{"kind": "sequence"}, {"kind": "modulo", "modulus": 10}]},
//!   "predicate": {"op": "cmp", "cmp": "gt", "left": {"field": 1}, "right": {"const": {"t": "Int", "v": 5}}}
//! }
//! ```

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::query::{Cond, QueryShape};
use crate::schema::TableShare;
use crate::storage::MemoryTable;
use crate::types::{RangeError, Result, Value};

/// How one column of generated row `i` is filled.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnGen {
    /// `i`.
    Sequence,
    /// `i % modulus`.
    Modulo {
        /// Divisor; must be positive.
        modulus: i64,
    },
    /// `i / divisor`.
    Divide {
        /// Divisor; must be positive.
        divisor: i64,
    },
    /// The same value in every row.
    Constant {
        /// Value stored.
        value: Value,
    },
    /// NULL in every `every`-th row (starting with row 0), otherwise `inner`.
    Nullable {
        /// Period of NULLs; must be positive.
        every: i64,
        /// Generator for the other rows.
        inner: Box<ColumnGen>,
    },
}

impl ColumnGen {
    fn validate(&self) -> Result<()> {
        match self {
            ColumnGen::Modulo { modulus: n }
            | ColumnGen::Divide { divisor: n }
            | ColumnGen::Nullable { every: n, .. }
                if *n <= 0 =>
            {
                Err(RangeError::Scenario(format!("generator period {n} must be positive")))
            }
            ColumnGen::Nullable { inner, .. } => inner.validate(),
            _ => Ok(()),
        }
    }

    fn value(&self, i: i64) -> Value {
        match self {
            ColumnGen::Sequence => Value::Int(i),
            ColumnGen::Modulo { modulus } => Value::Int(i % modulus),
            ColumnGen::Divide { divisor } => Value::Int(i / divisor),
            ColumnGen::Constant { value } => value.clone(),
            ColumnGen::Nullable { every, inner } => {
                if i % every == 0 {
                    Value::Null
                } else {
                    inner.value(i)
                }
            }
        }
    }
}

/// Generated rows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RowGenerator {
    /// Number of rows.
    pub count: u64,
    /// One generator per column.
    pub columns: Vec<ColumnGen>,
}

/// A table with data and the query to optimize against it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Table definition.
    pub table: TableShare,
    /// Literal rows, one value per column.
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
    /// Generated rows appended after the literal ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate: Option<RowGenerator>,
    /// Store rows in primary key order.
    #[serde(default)]
    pub clustered_primary_key: bool,
    /// Condition on the table; absent means every row qualifies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<Cond>,
    /// Query shape.
    #[serde(default)]
    pub query: QueryShape,
}

impl Scenario {
    /// Parses a scenario from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| RangeError::Scenario(e.to_string()))
    }

    /// All rows: literal rows followed by generated ones.
    pub fn all_rows(&self) -> Result<Vec<Vec<Value>>> {
        let mut rows = self.rows.clone();
        if let Some(generator) = &self.generate {
            if generator.columns.len() != self.table.fields.len() {
                return Err(RangeError::Scenario(format!(
                    "generator has {} columns, table {} has {}",
                    generator.columns.len(),
                    self.table.name,
                    self.table.fields.len()
                )));
            }
            for column in &generator.columns {
                column.validate()?;
            }
            let count = i64::try_from(generator.count)
                .map_err(|_| RangeError::Scenario("row count too large".into()))?;
            rows.reserve(generator.count as usize);
            for i in 0..count {
                rows.push(generator.columns.iter().map(|c| c.value(i)).collect());
            }
        }
        Ok(rows)
    }

    /// Builds the in-memory table holding the scenario's rows.
    pub fn build_table(&self) -> Result<MemoryTable> {
        let rows = self.all_rows()?;
        debug!(table = %self.table.name, rows = rows.len(), "scenario loaded");
        MemoryTable::builder(self.table.clone())
            .rows(rows)
            .clustered_primary_key(self.clustered_primary_key)
            .build()
    }
}
