//! Cost constants and the shared cost formulas.
//!
//! All costs are in abstract units where one random row read costs about
//! 1.0. The engine supplies scan and read times through
//! [`Cursor`](crate::storage::Cursor); the formulas here cover what the
//! optimizer itself does: comparing keys, comparing rowids, sorting rowids
//! and sweeping the table in rowid order.

use crate::schema::REF_LENGTH;
use crate::storage::{Cursor, IO_SIZE};

/// Rows compared per cost unit when evaluating a condition.
pub const TIME_FOR_COMPARE: f64 = 5.0;

/// Rowids compared per cost unit.
pub const TIME_FOR_COMPARE_ROWID: f64 = TIME_FOR_COMPARE * 2.0;

/// Fixed part of one disk seek.
pub const DISK_SEEK_BASE_COST: f64 = 0.9;

/// Part of one disk seek proportional to the distance travelled.
pub const DISK_SEEK_PROP_COST: f64 = 0.1 / BLOCKS_IN_AVG_SEEK;

const BLOCKS_IN_AVG_SEEK: f64 = 128.0;

/// Overhead of one tree node in the deduplication buffer.
const TREE_ELEMENT_OVERHEAD: u64 = 24;

/// Sorted runs merged per pass.
const MERGEBUFF: u64 = 7;
const MERGEBUFF2: u64 = 15;

/// Cost of checking a condition against `rows` rows.
pub fn compare_cost(rows: f64) -> f64 {
    rows / TIME_FOR_COMPARE
}

/// Cost of fetching `nrows` rows in rowid order.
///
/// With a clustered primary key the rows come from a primary key read.
/// Otherwise the rows are assumed to be spread evenly over the data file
/// and each touched block costs one seek. A sweep that can run
/// uninterrupted pays for seek distance; one interleaved with other tables
/// pays full seeks.
pub fn sweep_cost(cursor: &dyn Cursor, nrows: u64, interrupted: bool) -> f64 {
    let share = cursor.share();
    if cursor.primary_key_is_clustered() {
        if let Some(pk) = share.primary_key {
            return cursor.read_time(pk, nrows, nrows);
        }
    }
    let stats = cursor.stats();
    let n_blocks = (stats.data_file_length as f64 / IO_SIZE).ceil();
    if n_blocks < 1.0 {
        return 0.0;
    }
    let busy_blocks = (n_blocks * (1.0 - (1.0 - 1.0 / n_blocks).powf(nrows as f64))).max(1.0);
    let avg_io_cost = if interrupted {
        1.0
    } else {
        DISK_SEEK_BASE_COST + DISK_SEEK_PROP_COST * n_blocks / busy_blocks
    };
    busy_blocks * avg_io_cost
}

/// `log2(n!)` by Stirling's approximation.
pub fn log2_n_fact(n: f64) -> f64 {
    if n <= 1.0 {
        return 0.0;
    }
    let ln = (2.0 * std::f64::consts::PI * n).ln() / 2.0 + n * (n / std::f64::consts::E).ln();
    ln / std::f64::consts::LN_2
}

/// Cost of merging sorted runs of the given lengths down to one run.
fn merge_buffers_cost(mut buffers: Vec<u64>, elem_size: u64) -> f64 {
    let merge_cost = |total: u64, n: usize| {
        2.0 * total as f64 * elem_size as f64 / IO_SIZE
            + total as f64 * (n as f64).log2() / TIME_FOR_COMPARE_ROWID
    };
    let mut cost = 0.0;
    while buffers.len() as u64 > MERGEBUFF2 {
        let mut merged = Vec::with_capacity(buffers.len() / MERGEBUFF as usize + 1);
        for group in buffers.chunks(MERGEBUFF as usize) {
            let total: u64 = group.iter().sum();
            cost += merge_cost(total, group.len());
            merged.push(total);
        }
        buffers = merged;
    }
    let total: u64 = buffers.iter().sum();
    cost + merge_cost(total, buffers.len())
}

/// Cost of deduplicating `nkeys` keys of `key_size` bytes with a sort
/// buffer of `max_in_memory` bytes: building in-memory trees, spilling them
/// to disk and merging the runs back.
pub fn unique_cost(nkeys: u64, key_size: u32, max_in_memory: u64) -> f64 {
    if nkeys == 0 {
        return 0.0;
    }
    let key_size = u64::from(key_size.max(1));
    let max_elems = (max_in_memory / (TREE_ELEMENT_OVERHEAD + key_size)).max(1);
    let n_full_trees = nkeys / max_elems;
    let last_tree_elems = nkeys % max_elems;

    let mut result = 2.0 * log2_n_fact(last_tree_elems as f64 + 1.0);
    if n_full_trees > 0 {
        result += n_full_trees as f64 * log2_n_fact(max_elems as f64 + 1.0);
    }
    result /= TIME_FOR_COMPARE_ROWID;

    if n_full_trees == 0 {
        return result;
    }

    // Trees that did not fit are written out and merged.
    result += DISK_SEEK_BASE_COST
        * n_full_trees as f64
        * (key_size as f64 * max_elems as f64 / IO_SIZE).ceil();
    result += DISK_SEEK_BASE_COST * (key_size as f64 * last_tree_elems as f64 / IO_SIZE).ceil();

    let mut runs = vec![max_elems; n_full_trees as usize];
    if last_tree_elems > 0 {
        runs.push(last_tree_elems);
    }
    result += merge_buffers_cost(runs, key_size);
    result + (key_size as f64 * nkeys as f64 / IO_SIZE).ceil()
}

/// Cost of sorting and deduplicating `nrows` rowids.
pub fn rowid_unique_cost(nrows: u64, sort_buffer_size: u64) -> f64 {
    unique_cost(nrows, REF_LENGTH, sort_buffer_size)
}

/// Cost of merging `nrows` rowids out of `n_scans` rowid-ordered streams
/// through a priority queue.
pub fn rowid_queue_cost(nrows: f64, n_scans: usize) -> f64 {
    nrows * (n_scans.max(1) as f64).log2() / TIME_FOR_COMPARE_ROWID
}
