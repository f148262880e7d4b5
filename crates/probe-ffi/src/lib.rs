//! probe-ffi - C ABI interface for the probe library
//!
//! Exposes the process table (C4), system info (C5) and protocol probes
//! (C7) to Go via CGO. All types are repr(C) for C ABI compatibility.

use libc::{c_char, c_int};
use std::ffi::CStr;
use std::ptr;
use std::sync::OnceLock;
use std::time::Duration;

use probe_table::{ProcessTable, SortKey};

type Table = ProcessTable<probe_platform::PlatformAdapter>;

static TABLE: OnceLock<Table> = OnceLock::new();

// ============================================================================
// ERROR CODES
// ============================================================================

pub const PROBE_OK: c_int = 0;
pub const PROBE_ERR_NOT_SUPPORTED: c_int = 1;
pub const PROBE_ERR_NOT_FOUND: c_int = 3;
pub const PROBE_ERR_INVALID_PARAM: c_int = 4;
pub const PROBE_ERR_IO: c_int = 5;
pub const PROBE_ERR_PROTOCOL: c_int = 6;
pub const PROBE_ERR_INTERNAL: c_int = 99;

// ============================================================================
// C-COMPATIBLE TYPES
// ============================================================================

/// Result type for FFI calls.
#[repr(C)]
pub struct ProbeResult {
    pub success: bool,
    pub error_code: c_int,
    /// Error message (NULL if success). Caller must NOT free this.
    pub error_message: *const c_char,
}

impl ProbeResult {
    fn ok() -> Self {
        Self { success: true, error_code: PROBE_OK, error_message: ptr::null() }
    }

    fn err(code: c_int, message: *const c_char) -> Self {
        Self { success: false, error_code: code, error_message: message }
    }

    fn from_table_error(e: probe_table::Error) -> Self {
        match e {
            probe_table::Error::Unavailable(_) => {
                Self::err(PROBE_ERR_NOT_SUPPORTED, c"process table data unavailable".as_ptr())
            }
            probe_table::Error::Invariant(_) => {
                Self::err(PROBE_ERR_INTERNAL, c"sub-process cache invariant violated".as_ptr())
            }
        }
    }

    fn from_net_error(e: probe_net::Error) -> Self {
        match e {
            probe_net::Error::Io(_) => Self::err(PROBE_ERR_IO, c"network I/O error".as_ptr()),
            probe_net::Error::Protocol(_) => {
                Self::err(PROBE_ERR_PROTOCOL, c"protocol error".as_ptr())
            }
        }
    }
}

/// One process row as seen by the most recent snapshot.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ProcessRow {
    pub pid: i32,
    pub ppid: i32,
    pub zombie: bool,
    /// `u32::MAX` means "not available", matching the sentinel the
    /// platform adapter itself uses for an unreadable credential.
    pub uid: u32,
    pub euid: u32,
    pub gid: u32,
    pub cpu_usage_self_percent: f64,
    pub cpu_usage_children_percent: f64,
    pub memory_rss_bytes: u64,
    pub memory_usage_total_bytes: u64,
    pub threads_self: u32,
    pub threads_children: u32,
    pub children_total: u32,
    pub uptime_secs: u64,
}

impl From<&probe_table::ProcessRow> for ProcessRow {
    fn from(r: &probe_table::ProcessRow) -> Self {
        Self {
            pid: r.pid,
            ppid: r.ppid,
            zombie: r.zombie,
            uid: r.uid.unwrap_or(u32::MAX),
            euid: r.euid.unwrap_or(u32::MAX),
            gid: r.gid.unwrap_or(u32::MAX),
            cpu_usage_self_percent: r.cpu_usage_self,
            cpu_usage_children_percent: r.cpu_usage_children,
            memory_rss_bytes: r.memory_rss_bytes,
            memory_usage_total_bytes: r.memory_usage_total,
            threads_self: r.threads_self,
            threads_children: r.threads_children,
            children_total: r.children_total,
            uptime_secs: r.uptime_secs,
        }
    }
}

/// Growable list of [`ProcessRow`] handed back across the FFI boundary.
#[repr(C)]
pub struct ProcessRowList {
    pub items: *mut ProcessRow,
    pub count: usize,
    pub capacity: usize,
}

/// System-wide totals for the most recent snapshot.
#[repr(C)]
pub struct SystemInfo {
    pub cpu_count: u32,
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
    pub memory_total_bytes: u64,
    pub memory_used_bytes: u64,
    pub swap_total_bytes: u64,
    pub swap_used_bytes: u64,
    pub cpu_user_percent: f64,
    pub cpu_system_percent: f64,
    pub cpu_iowait_percent: f64,
    pub fd_allocated: i64,
    pub fd_max: i64,
}

impl From<probe_platform::SystemSample> for SystemInfo {
    fn from(s: probe_platform::SystemSample) -> Self {
        Self {
            cpu_count: s.cpu_count,
            load1: s.load1,
            load5: s.load5,
            load15: s.load15,
            memory_total_bytes: s.memory_total_bytes,
            memory_used_bytes: s.memory_used_bytes,
            swap_total_bytes: s.swap_total_bytes,
            swap_used_bytes: s.swap_used_bytes,
            cpu_user_percent: s.cpu_user_percent,
            cpu_system_percent: s.cpu_system_percent,
            cpu_iowait_percent: s.cpu_iowait_percent,
            fd_allocated: s.fd_allocated,
            fd_max: s.fd_max,
        }
    }
}

// ============================================================================
// LIFECYCLE
// ============================================================================

/// Initialize the process table. Must be called once at startup.
#[unsafe(no_mangle)]
pub extern "C" fn probe_init() -> ProbeResult {
    if TABLE.get().is_some() {
        return ProbeResult::ok();
    }
    let adapter = probe_platform::new_adapter();
    match Table::new(adapter, probe_platform::CollectOptions { collect_cmdlines: true }) {
        Ok(table) => {
            let _ = TABLE.set(table);
            log::info!("probe-ffi: process table initialized");
            ProbeResult::ok()
        }
        Err(e) => {
            log::warn!("probe-ffi: initial collection failed: {e}");
            ProbeResult::from_table_error(e)
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn probe_shutdown() {
    // Nothing to clean up; TABLE lives for the process lifetime.
}

fn table() -> Result<&'static Table, ProbeResult> {
    TABLE.get().ok_or_else(|| ProbeResult::err(PROBE_ERR_INTERNAL, c"not initialized".as_ptr()))
}

// ============================================================================
// PROCESS TABLE (C4)
// ============================================================================

/// Run one collection cycle, replacing the table's snapshot.
#[unsafe(no_mangle)]
pub extern "C" fn probe_table_update() -> ProbeResult {
    let table = match table() {
        Ok(t) => t,
        Err(r) => return r,
    };
    match table.update() {
        Ok(()) => ProbeResult::ok(),
        Err(e) => {
            log::warn!("probe-ffi: table update failed: {e}");
            ProbeResult::from_table_error(e)
        }
    }
}

/// List every process in the current snapshot, sorted by pid.
///
/// # Safety
/// `out` must be a valid pointer. Caller must call
/// `probe_free_process_row_list` when done.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn probe_table_list_processes(out: *mut ProcessRowList) -> ProbeResult {
    if out.is_null() {
        return ProbeResult::err(PROBE_ERR_INVALID_PARAM, c"null pointer".as_ptr());
    }
    let table = match table() {
        Ok(t) => t,
        Err(r) => return r,
    };

    let mut rows = Vec::new();
    table.map(|r| rows.push(ProcessRow::from(r)));
    rows.sort_by_key(|r| r.pid);

    let count = rows.len();
    let capacity = rows.capacity();
    let ptr = rows.as_mut_ptr();
    std::mem::forget(rows);

    unsafe {
        (*out).items = ptr;
        (*out).count = count;
        (*out).capacity = capacity;
    }
    ProbeResult::ok()
}

/// Free a list returned by `probe_table_list_processes`.
///
/// # Safety
/// The list must have been allocated by `probe_table_list_processes`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn probe_free_process_row_list(list: *mut ProcessRowList) {
    if list.is_null() {
        return;
    }
    unsafe {
        let list = &mut *list;
        if !list.items.is_null() {
            drop(Vec::from_raw_parts(list.items, list.count, list.capacity));
            list.items = ptr::null_mut();
            list.count = 0;
            list.capacity = 0;
        }
    }
}

/// Find the pid of the process whose command line matches `pattern`, per
/// the same disambiguation rule `ProcessTable::find_matching` applies.
///
/// # Safety
/// `pattern` must be a null-terminated C string. `out_pid` must be valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn probe_table_find_matching(
    pattern: *const c_char,
    out_pid: *mut i32,
) -> ProbeResult {
    if pattern.is_null() || out_pid.is_null() {
        return ProbeResult::err(PROBE_ERR_INVALID_PARAM, c"null pointer".as_ptr());
    }
    let table = match table() {
        Ok(t) => t,
        Err(r) => return r,
    };
    let pattern_str = unsafe { CStr::from_ptr(pattern) }.to_string_lossy();
    let regex = match regex::Regex::new(&pattern_str) {
        Ok(r) => r,
        Err(_) => return ProbeResult::err(PROBE_ERR_INVALID_PARAM, c"invalid pattern".as_ptr()),
    };
    match table.find_matching(&regex) {
        Some(pid) => {
            unsafe { *out_pid = pid };
            ProbeResult::ok()
        }
        None => ProbeResult::err(PROBE_ERR_NOT_FOUND, c"no process matched".as_ptr()),
    }
}

/// Re-sort the table's internal snapshot. Ordering is only observable
/// through a subsequent `probe_table_list_processes` call.
#[unsafe(no_mangle)]
pub extern "C" fn probe_table_sort_by_cpu() -> ProbeResult {
    let table = match table() {
        Ok(t) => t,
        Err(r) => return r,
    };
    table.sort(SortKey::CpuDesc, |_| {});
    ProbeResult::ok()
}

// ============================================================================
// SYSTEM INFO (C5)
// ============================================================================

/// # Safety
/// `out` must be a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn probe_system_info(out: *mut SystemInfo) -> ProbeResult {
    if out.is_null() {
        return ProbeResult::err(PROBE_ERR_INVALID_PARAM, c"null pointer".as_ptr());
    }
    let table = match table() {
        Ok(t) => t,
        Err(r) => return r,
    };
    unsafe { *out = SystemInfo::from(table.system()) };
    ProbeResult::ok()
}

// ============================================================================
// PROTOCOL PROBES (C7)
// ============================================================================

fn cstr_to_string(s: *const c_char) -> Option<String> {
    if s.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(s) }.to_string_lossy().into_owned())
}

/// Open a TCP connection to `host:port` and run the generic send/expect
/// probe against it.
///
/// # Safety
/// `host` must be a null-terminated C string; `send` and `expect` may be
/// null to skip that half of the check.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn probe_net_generic_check(
    host: *const c_char,
    port: u16,
    send: *const c_char,
    expect: *const c_char,
    timeout_ms: u64,
) -> ProbeResult {
    let Some(host) = cstr_to_string(host) else {
        return ProbeResult::err(PROBE_ERR_INVALID_PARAM, c"null host".as_ptr());
    };
    let send = cstr_to_string(send);
    let expect_pattern = match cstr_to_string(expect) {
        Some(p) => match regex::bytes::Regex::new(&p) {
            Ok(re) => Some(re),
            Err(_) => {
                return ProbeResult::err(PROBE_ERR_INVALID_PARAM, c"invalid pattern".as_ptr());
            }
        },
        None => None,
    };

    let mut socket = match probe_net::Socket::open_tcp(
        (host.as_str(), port),
        Duration::from_millis(timeout_ms),
    ) {
        Ok(s) => s,
        Err(e) => return ProbeResult::from_net_error(e),
    };
    let _ = socket.set_timeout(Some(Duration::from_millis(timeout_ms)));

    match probe_net::probes::generic::probe(
        &mut socket,
        send.as_deref(),
        expect_pattern.as_ref(),
        &probe_net::probes::generic::ProbeConfig::default(),
    ) {
        Ok(()) => ProbeResult::ok(),
        Err(e) => ProbeResult::from_net_error(e),
    }
}

/// Connect to `host:port`, send `GET path HTTP/1.1` and require a 2xx or
/// 3xx status.
///
/// # Safety
/// `host` and `path` must be null-terminated C strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn probe_net_http_check(
    host: *const c_char,
    port: u16,
    path: *const c_char,
    timeout_ms: u64,
) -> ProbeResult {
    let (Some(host), Some(path)) = (cstr_to_string(host), cstr_to_string(path)) else {
        return ProbeResult::err(PROBE_ERR_INVALID_PARAM, c"null pointer".as_ptr());
    };

    let mut socket = match probe_net::Socket::open_tcp(
        (host.as_str(), port),
        Duration::from_millis(timeout_ms),
    ) {
        Ok(s) => s,
        Err(e) => return ProbeResult::from_net_error(e),
    };
    let _ = socket.set_timeout(Some(Duration::from_millis(timeout_ms)));

    let request = probe_net::probes::http::HttpRequest {
        path,
        host,
        ..Default::default()
    };
    let check = probe_net::probes::http::HttpCheck::default();
    match probe_net::probes::http::probe(&mut socket, &request, &check) {
        Ok(_) => ProbeResult::ok(),
        Err(e) => ProbeResult::from_net_error(e),
    }
}

/// # Safety
/// `host` must be a null-terminated C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn probe_net_mongodb_ping(
    host: *const c_char,
    port: u16,
    timeout_ms: u64,
) -> ProbeResult {
    let Some(host) = cstr_to_string(host) else {
        return ProbeResult::err(PROBE_ERR_INVALID_PARAM, c"null host".as_ptr());
    };
    let mut socket = match probe_net::Socket::open_tcp(
        (host.as_str(), port),
        Duration::from_millis(timeout_ms),
    ) {
        Ok(s) => s,
        Err(e) => return ProbeResult::from_net_error(e),
    };
    let _ = socket.set_timeout(Some(Duration::from_millis(timeout_ms)));
    match probe_net::probes::mongodb::ping(&mut socket) {
        Ok(()) => ProbeResult::ok(),
        Err(e) => ProbeResult::from_net_error(e),
    }
}

/// # Safety
/// `host` must be a null-terminated C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn probe_net_mqtt_ping(
    host: *const c_char,
    port: u16,
    incarnation: u64,
    timeout_ms: u64,
) -> ProbeResult {
    let Some(host) = cstr_to_string(host) else {
        return ProbeResult::err(PROBE_ERR_INVALID_PARAM, c"null host".as_ptr());
    };
    let mut socket = match probe_net::Socket::open_tcp(
        (host.as_str(), port),
        Duration::from_millis(timeout_ms),
    ) {
        Ok(s) => s,
        Err(e) => return ProbeResult::from_net_error(e),
    };
    let _ = socket.set_timeout(Some(Duration::from_millis(timeout_ms)));
    match probe_net::probes::mqtt::ping(&mut socket, incarnation) {
        Ok(()) => ProbeResult::ok(),
        Err(e) => ProbeResult::from_net_error(e),
    }
}
