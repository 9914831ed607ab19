use serde::{Deserialize, Serialize};

use super::sel_arg::MAX_SEL_ARGS;
use crate::types::{RangeError, Result};

/// Number of `NOT IN` members above which no tree is built.
pub const NOT_IN_IGNORE_THRESHOLD: usize = 1000;

/// Default size of the deduplication buffer used by index merge.
pub const DEFAULT_SORT_BUFFER_SIZE: u64 = 2 * 1024 * 1024;

/// Tunables for one optimizer instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Intervals a translation may allocate before it is abandoned.
    pub max_sel_args: usize,
    /// `NOT IN` lists longer than this are left to row filtering.
    pub not_in_ignore_threshold: usize,
    /// Consider index merge (sort-union) plans.
    pub enable_index_merge: bool,
    /// Consider rowid-ordered intersections.
    pub enable_ror_intersect: bool,
    /// Consider rowid-ordered unions.
    pub enable_ror_union: bool,
    /// Consider group min/max scans.
    pub enable_group_min_max: bool,
    /// Bytes available to the index merge deduplication buffer.
    pub sort_buffer_size: u64,
    /// Plan tiny tables too instead of scanning them outright.
    pub force_quick: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_sel_args: MAX_SEL_ARGS,
            not_in_ignore_threshold: NOT_IN_IGNORE_THRESHOLD,
            enable_index_merge: true,
            enable_ror_intersect: true,
            enable_ror_union: true,
            enable_group_min_max: true,
            sort_buffer_size: DEFAULT_SORT_BUFFER_SIZE,
            force_quick: false,
        }
    }
}

impl OptimizerConfig {
    /// Parses a TOML document; missing keys keep their defaults.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: OptimizerConfig =
            toml::from_str(text).map_err(|e| RangeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_sel_args == 0 {
            return Err(RangeError::Config("max_sel_args must be positive".into()));
        }
        if self.sort_buffer_size < 1024 {
            return Err(RangeError::Config(format!(
                "sort_buffer_size {} is below the 1024 byte minimum",
                self.sort_buffer_size
            )));
        }
        Ok(())
    }

    pub fn with_max_sel_args(mut self, limit: usize) -> Self {
        self.max_sel_args = limit;
        self
    }

    pub fn with_not_in_ignore_threshold(mut self, threshold: usize) -> Self {
        self.not_in_ignore_threshold = threshold;
        self
    }

    pub fn with_index_merge(mut self, enabled: bool) -> Self {
        self.enable_index_merge = enabled;
        self
    }

    pub fn with_ror_intersect(mut self, enabled: bool) -> Self {
        self.enable_ror_intersect = enabled;
        self
    }

    pub fn with_ror_union(mut self, enabled: bool) -> Self {
        self.enable_ror_union = enabled;
        self
    }

    pub fn with_group_min_max(mut self, enabled: bool) -> Self {
        self.enable_group_min_max = enabled;
        self
    }

    pub fn with_sort_buffer_size(mut self, bytes: u64) -> Self {
        self.sort_buffer_size = bytes;
        self
    }

    pub fn with_force_quick(mut self, force: bool) -> Self {
        self.force_quick = force;
        self
    }
}
