//! Per-call planning state shared by the strategy generators.

use super::config::OptimizerConfig;
use crate::query::{Cond, QueryShape, StatementKind};
use crate::schema::{KeyAlgorithm, TableShare};
use crate::storage::{Cursor, TableStats};
use crate::types::{FieldSet, IndexId, KeyMap};

/// Everything the generators need to know about the table and the query.
///
/// Built once per optimization call; every field is read-only afterwards.
pub struct PlanContext<'a> {
    /// Storage handle and cost oracle.
    pub cursor: &'a dyn Cursor,
    /// Optimizer tunables.
    pub config: &'a OptimizerConfig,
    /// Query shape.
    pub query: &'a QueryShape,
    /// Predicate on this table, if any.
    pub cond: Option<&'a Cond>,
    /// Columns the executor reads.
    pub needed_fields: FieldSet,
    /// Indexes that hold every needed column.
    pub covering_keys: KeyMap,
    /// Table statistics at planning time.
    pub stats: TableStats,
    /// Rows are stored in primary key order.
    pub pk_clustered: bool,
    /// A rowid-ordered sweep shares the disk with other tables.
    pub interrupted: bool,
}

impl<'a> PlanContext<'a> {
    pub fn new(
        cursor: &'a dyn Cursor,
        config: &'a OptimizerConfig,
        query: &'a QueryShape,
        cond: Option<&'a Cond>,
    ) -> Self {
        let share = cursor.share();
        let needed_fields = query.read_set(share, cond);
        let mut covering_keys = KeyMap::new();
        for id in share.key_ids() {
            if share.key(id).algorithm == KeyAlgorithm::Btree
                && needed_fields.is_subset(&share.key_fields(id))
            {
                covering_keys.set(id.0 as usize);
            }
        }
        Self {
            cursor,
            config,
            query,
            cond,
            needed_fields,
            covering_keys,
            stats: cursor.stats(),
            pk_clustered: cursor.primary_key_is_clustered() && share.primary_key.is_some(),
            interrupted: query.join_tables == 1,
        }
    }

    pub fn share(&self) -> &'a TableShare {
        self.cursor.share()
    }

    /// Row count used by the formulas, never zero.
    pub fn records(&self) -> u64 {
        self.stats.records.max(1)
    }

    /// True for the clustered primary key.
    pub fn is_clustered_pk(&self, index: IndexId) -> bool {
        self.pk_clustered && self.share().primary_key == Some(index)
    }

    /// Merged scans keep several cursors open on the table, which a
    /// deleting statement cannot tolerate.
    pub fn allows_merged_scans(&self) -> bool {
        self.query.statement != StatementKind::Delete
    }

    pub fn is_covering(&self, index: IndexId) -> bool {
        self.covering_keys.is_set(index.0 as usize)
    }
}

impl std::fmt::Debug for PlanContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanContext")
            .field("table", &self.share().name)
            .field("records", &self.stats.records)
            .field("needed_fields", &self.needed_fields)
            .field("covering_keys", &self.covering_keys)
            .field("pk_clustered", &self.pk_clustered)
            .finish()
    }
}
