//! probe-platform - OS adapter and shared process/system snapshot types (C3)
//!
//! Every OS-specific parsing concern lives behind the single
//! [`OsAdapter::collect`] operation. Higher layers (the process table, the
//! protocol probes) only see [`ProcessRow`] and [`SystemSample`], never raw
//! `/proc` or `sysctl` data.

pub mod capability;

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "macos")]
pub mod darwin;

#[cfg(any(target_os = "freebsd", target_os = "openbsd", target_os = "netbsd"))]
pub mod bsd;

#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd"
)))]
pub mod stub;

use thiserror::Error;

/// Error types surfaced by an [`OsAdapter`].
#[derive(Error, Debug)]
pub enum Error {
    /// The host platform has no way to report this data (e.g. a stub
    /// adapter, or a counter the running kernel doesn't expose).
    #[error("platform data unavailable: {0}")]
    Unavailable(String),
    /// Reading or parsing a kernel interface failed unexpectedly.
    #[error("platform I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Controls how much an [`OsAdapter::collect`] call gathers.
///
/// Cheap fields are always collected; expensive or rarely-needed ones are
/// opt-in so a fast poll cycle doesn't pay for work nothing uses.
#[derive(Debug, Clone, Default)]
pub struct CollectOptions {
    /// Populate [`ProcessRow::cmdline`]. Requires an extra read per process.
    pub collect_cmdlines: bool,
}

/// Cumulative I/O counters for one direction (read or write).
#[derive(Debug, Clone, Copy, Default)]
pub struct IoCounters {
    pub bytes: i64,
    pub bytes_physical: i64,
    pub operations: i64,
}

/// Open file descriptor accounting for one process.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileDescriptorUsage {
    pub open: i64,
    pub soft_limit: i64,
    pub hard_limit: i64,
}

/// One process as seen by a single collection cycle.
///
/// `cpu_usage_*`, `memory_usage_total`, `children_total`,
/// `threads_children` and `filedescriptors_usage_total` are derived fields
/// the process table fills in during aggregation; an adapter always leaves
/// them at their [`Default`] sentinel.
#[derive(Debug, Clone)]
pub struct ProcessRow {
    pub pid: i32,
    pub ppid: i32,
    pub zombie: bool,
    pub uid: Option<u32>,
    pub euid: Option<u32>,
    pub gid: Option<u32>,
    /// Cumulative CPU time consumed by this process, in jiffies-equivalent
    /// tenths of a second. Monotonic for the lifetime of a pid.
    pub cpu_time: u64,
    pub memory_rss_bytes: u64,
    pub threads_self: u32,
    /// Seconds since this process started.
    pub uptime_secs: u64,
    /// Empty unless `CollectOptions::collect_cmdlines` was set.
    pub cmdline: String,
    /// `None` when the platform has no per-process I/O accounting at all;
    /// `-1` fields within `Some` mean the family exists but this counter
    /// doesn't.
    pub read: Option<IoCounters>,
    pub write: Option<IoCounters>,
    pub fd: Option<FileDescriptorUsage>,

    pub cpu_usage_self: f64,
    pub cpu_usage_children: f64,
    pub memory_usage_total: u64,
    pub children_total: u32,
    pub threads_children: u32,
    pub filedescriptors_usage_total: i64,
}

impl Default for ProcessRow {
    fn default() -> Self {
        Self {
            pid: 0,
            ppid: 0,
            zombie: false,
            uid: None,
            euid: None,
            gid: None,
            cpu_time: 0,
            memory_rss_bytes: 0,
            threads_self: 0,
            uptime_secs: 0,
            cmdline: String::new(),
            read: None,
            write: None,
            fd: None,
            cpu_usage_self: -1.0,
            cpu_usage_children: -1.0,
            memory_usage_total: 0,
            children_total: 0,
            threads_children: 0,
            filedescriptors_usage_total: -1,
        }
    }
}

/// System-wide totals gathered alongside the process rows.
///
/// A percentage field is `-1.0` and the matching `capability::*` bit is
/// unset when the running kernel doesn't expose that counter family.
#[derive(Debug, Clone)]
pub struct SystemSample {
    pub cpu_count: u32,
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,

    pub memory_total_bytes: u64,
    pub memory_used_bytes: u64,
    pub swap_total_bytes: u64,
    pub swap_used_bytes: u64,

    pub cpu_user_percent: f64,
    pub cpu_nice_percent: f64,
    pub cpu_system_percent: f64,
    pub cpu_iowait_percent: f64,
    pub cpu_hardirq_percent: f64,
    pub cpu_softirq_percent: f64,
    pub cpu_steal_percent: f64,
    pub cpu_guest_percent: f64,
    pub cpu_guest_nice_percent: f64,

    pub fd_allocated: i64,
    pub fd_unused: i64,
    pub fd_max: i64,

    /// Bitfield of `capability::*` flags naming which fields above this
    /// cycle's kernel actually populated.
    pub capability: u32,
}

impl Default for SystemSample {
    fn default() -> Self {
        Self {
            cpu_count: 0,
            load1: -1.0,
            load5: -1.0,
            load15: -1.0,
            memory_total_bytes: 0,
            memory_used_bytes: 0,
            swap_total_bytes: 0,
            swap_used_bytes: 0,
            cpu_user_percent: -1.0,
            cpu_nice_percent: -1.0,
            cpu_system_percent: -1.0,
            cpu_iowait_percent: -1.0,
            cpu_hardirq_percent: -1.0,
            cpu_softirq_percent: -1.0,
            cpu_steal_percent: -1.0,
            cpu_guest_percent: -1.0,
            cpu_guest_nice_percent: -1.0,
            fd_allocated: -1,
            fd_unused: -1,
            fd_max: -1,
            capability: 0,
        }
    }
}

/// One full collection cycle.
#[derive(Debug, Clone)]
pub struct Collected {
    pub rows: Vec<ProcessRow>,
    pub system: SystemSample,
    pub self_pid: i32,
    /// Wall-clock time of this cycle, in tenths of a second since the
    /// epoch, matching the unit `ProcessRow::uptime_secs` is derived
    /// against.
    pub now_tenths: u64,
}

/// The single seam every OS-specific backend implements.
pub trait OsAdapter: Send + Sync {
    fn collect(&self, options: &CollectOptions) -> Result<Collected>;
}

#[cfg(target_os = "linux")]
pub type PlatformAdapter = linux::LinuxAdapter;
#[cfg(target_os = "macos")]
pub type PlatformAdapter = darwin::DarwinAdapter;
#[cfg(any(target_os = "freebsd", target_os = "openbsd", target_os = "netbsd"))]
pub type PlatformAdapter = bsd::BsdAdapter;
#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd"
)))]
pub type PlatformAdapter = stub::StubAdapter;

/// Construct the adapter for the host this binary was built for.
pub fn new_adapter() -> PlatformAdapter {
    PlatformAdapter::new()
}
