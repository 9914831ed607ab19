#![forbid(unsafe_code)]

//! Range and index access optimizer.
//!
//! Optimizing access to one table runs in stages:
//!
//! 1. The predicate is translated into per-index interval trees
//!    ([`translate`], [`sel_arg`], [`sel_tree`]). Disjunctions no single
//!    index can answer become index-merge lists.
//! 2. Each strategy generator costs the plans it can build from those trees
//!    through the storage engine's estimates ([`range_plan`], [`ror`],
//!    [`index_merge`], [`group_min_max`]).
//! 3. The selector keeps the cheapest plan that beats a full table scan
//!    ([`select`]) and materializes it as a [`QuickSelect`] iterator.
//!
//! Every failure on the way (an estimate the engine cannot give, too many
//! intervals, an unsupported predicate) only removes candidates. The plan
//! that comes out always returns a superset of the matching rows.
//!
//! [`QuickSelect`]: crate::quick::QuickSelect

/// Optimizer tunables.
pub mod config;

/// Per-call planning state.
pub mod context;

/// Cost constants and formulas.
pub mod cost;

/// Interval trees over the parts of one index.
pub mod sel_arg;

/// Per-index forests and index-merge lists.
pub mod sel_tree;

/// Predicate to interval tree translation.
pub mod translate;

/// Key ranges produced from interval trees.
pub mod range_seq;

/// Candidate plans and their materialization.
pub mod plan;

/// Single-index range plans.
pub mod range_plan;

/// Rowid-ordered intersections.
pub mod ror;

/// Sort-union and rowid-ordered union plans.
pub mod index_merge;

/// Group min/max plans.
pub mod group_min_max;

/// Plan selection.
pub mod select;

/// Explain output.
pub mod explain;

pub use config::OptimizerConfig;
pub use context::PlanContext;
pub use explain::{explain_access, ExplainNode, ExplainProp, PlanExplain};
pub use plan::TableReadPlan;
pub use select::{optimize_access, test_quick_select, Access, AccessPlan, Candidate};
pub use sel_arg::{SelArg, SelArgRef};
pub use sel_tree::{SelTree, SelTreeKind};
pub use translate::RangeParam;
