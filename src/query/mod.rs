#![forbid(unsafe_code)]

//! Predicates and query shape consumed by the optimizer.
//!
//! Parsing, constant folding and expression evaluation live elsewhere; this
//! module only carries the already-resolved predicate tree for one table and
//! the parts of the query (grouping, aggregates, statement kind) that decide
//! which access methods are legal.

/// Predicate trees and operators.
pub mod cond;

/// Grouping, aggregates and statement context.
pub mod shape;

pub use cond::{like_match, CmpOp, Cond, Operand};
pub use shape::{AggFunc, Aggregate, QueryShape, SelectItem, StatementKind};
