//! probe-pidmap - Sparse integer map and rate accumulator
//!
//! [`SparseIntMap`] is the pid-keyed handle cache backing the process
//! table's sub-process registry. [`StatisticsAccumulator`] turns
//! successive cumulative counter readings (disk bytes, cpu jiffies,
//! operation counts) into a per-second rate.

mod sparse_map;
mod stats;

pub use sparse_map::SparseIntMap;
pub use stats::StatisticsAccumulator;

use thiserror::Error;

/// Error types surfaced by the map and accumulator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A `map`/`find` visitor mutated the map it was visiting.
    #[error("invariant violated: map was mutated during traversal")]
    Invariant,
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
