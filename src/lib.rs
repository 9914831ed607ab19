//! Range and index access optimizer for relational tables.
//!
//! Given a predicate over one table and the table's indexes, the optimizer
//! builds interval trees for every index, costs the access methods those
//! trees allow (range scans, rowid-ordered intersections and unions, index
//! merge, group min/max) and materializes the cheapest one as a row
//! iterator.
//!
//! ```no_run
//! use rangeopt::optimizer::{optimize_access, OptimizerConfig};
//! use rangeopt::query::{Cond, QueryShape};
//! use rangeopt::schema::{FieldType, KeyInfo, TableShare};
//! use rangeopt::storage::MemoryTable;
//! use rangeopt::types::{FieldId, Value};
//!
//! let share = TableShare::new("t")
//!     .with_field("a", FieldType::Integer { bits: 32, unsigned: false }, false)
//!     .with_index(KeyInfo::on("a", &[FieldId(0)]));
//! let table = MemoryTable::builder(share)
//!     .rows((0..1000i64).map(|i| vec![Value::Int(i)]))
//!     .build()?;
//! let cond = Cond::and(vec![Cond::gt(FieldId(0), 10i64), Cond::lt(FieldId(0), 20i64)]);
//! let plan = optimize_access(&table, &OptimizerConfig::default(), &QueryShape::default(), Some(&cond));
//! if let Some(mut quick) = plan.make_quick(&table)? {
//!     while let Some(row) = quick.get_next()? {
//!         println!("{:?}", row.values);
//!     }
//! }
//! # Ok::<(), rangeopt::types::RangeError>(())
//! ```

#![warn(missing_docs)]

pub mod optimizer;
pub mod query;
pub mod quick;
pub mod scenario;
pub mod schema;
pub mod storage;
pub mod types;
