//! probe-table - thread-safe process table snapshot and system info (C4/C5)
//!
//! [`ProcessTable`] owns the current [`probe_platform::ProcessRow`] vector,
//! folds deltas against the previous snapshot via `probe_pidmap`'s
//! [`StatisticsAccumulator`](probe_pidmap::StatisticsAccumulator), aggregates
//! descendant resource usage into parents, and serves pattern-based process
//! discovery and a side cache of spawned sub-process handles.

mod cache;
mod table;
mod types;

pub use cache::SubProcess;
pub use probe_platform::{CollectOptions, ProcessRow, SystemSample};
pub use table::ProcessTable;
pub use types::{ServiceBinding, ServiceProcessInfo, SortKey, TableState};

use thiserror::Error;

/// Error types surfaced by the process table.
#[derive(Error, Debug)]
pub enum Error {
    /// The OS adapter could not produce a snapshot this cycle.
    #[error("process table data unavailable: {0}")]
    Unavailable(String),
    /// A sub-process cache traversal detected concurrent mutation.
    #[error(transparent)]
    Invariant(#[from] probe_pidmap::Error),
}

impl From<probe_platform::Error> for Error {
    fn from(e: probe_platform::Error) -> Self {
        Error::Unavailable(e.to_string())
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
