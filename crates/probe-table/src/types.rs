//! Small value types shared by the table's public contract.

use std::path::PathBuf;

use regex::Regex;

/// Lifecycle of the table's collection engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    Uninitialized,
    Running,
    Disabled,
}

/// Ordering for [`crate::ProcessTable::sort`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    PidAsc,
    CpuDesc,
    MemDesc,
    DiskRateDesc,
}

/// How a declared service locates its live process, tried in this order.
#[derive(Debug, Clone, Default)]
pub struct ServiceBinding {
    pub last_pid: Option<i32>,
    pub match_pattern: Option<Regex>,
    pub pidfile: Option<PathBuf>,
}

/// A service's view of its bound process, refreshed by
/// [`crate::ProcessTable::update_service_process`].
#[derive(Debug, Clone, Default)]
pub struct ServiceProcessInfo {
    pub pid: Option<i32>,
    pub ppid: Option<i32>,
    pub uptime_secs: u64,
    pub cpu_usage_percent: f64,
    pub memory_usage_bytes: u64,
    pub memory_percent: f64,
    pub total_memory_percent: f64,
    pub children_total: u32,
    pub threads_total: u32,
    pub disk_read_bytes_per_sec: f64,
    pub disk_write_bytes_per_sec: f64,
}
