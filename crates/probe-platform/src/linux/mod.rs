//! Linux [`OsAdapter`](crate::OsAdapter), backed entirely by `/proc`.

mod process;
mod system;

use crate::{CollectOptions, Collected, Error, OsAdapter, ProcessRow, Result, SystemSample};
use parking_lot::Mutex;
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};
use system::CpuJiffies;

pub struct LinuxAdapter {
    has_io_statistics: bool,
    clock_ticks_per_sec: u64,
    page_size_bytes: u64,
    cpu_count: u32,
    boot_time_secs: u64,
    /// Assembled once here, never recomputed per cycle: which of
    /// `SystemSample`'s fields this host can actually populate.
    capability: u32,
    cpu_history: Mutex<Option<CpuJiffies>>,
}

impl LinuxAdapter {
    pub fn new() -> Self {
        let has_io_statistics = fs::metadata("/proc/self/io").is_ok();
        let clock_ticks_per_sec = sysconf(libc::_SC_CLK_TCK).unwrap_or(100) as u64;
        let page_size_bytes = sysconf(libc::_SC_PAGESIZE).unwrap_or(4096) as u64;
        let cpu_count = sysconf(libc::_SC_NPROCESSORS_ONLN).unwrap_or(1).max(1) as u32;
        let boot_time_secs = read_boot_time().unwrap_or(0);

        let mut capability = crate::capability::FD_PROCESS;
        if system::read_file_nr().is_ok() {
            capability |= crate::capability::FD_SYSTEM;
        }
        if has_io_statistics {
            capability |= crate::capability::IO_PROCESS;
        }

        Self {
            has_io_statistics,
            clock_ticks_per_sec,
            page_size_bytes,
            cpu_count,
            boot_time_secs,
            capability,
            cpu_history: Mutex::new(None),
        }
    }
}

impl Default for LinuxAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn sysconf(name: libc::c_int) -> Option<i64> {
    let v = unsafe { libc::sysconf(name) };
    if v < 0 {
        None
    } else {
        Some(v)
    }
}

fn read_boot_time() -> std::io::Result<u64> {
    let raw = fs::read_to_string("/proc/uptime")?;
    let uptime_secs: f64 = raw
        .split_whitespace()
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "bad uptime"))?;
    let now_secs = now_tenths() / 10;
    Ok(now_secs.saturating_sub(uptime_secs as u64))
}

fn now_tenths() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64 / 100)
        .unwrap_or(0)
}

impl OsAdapter for LinuxAdapter {
    fn collect(&self, options: &CollectOptions) -> Result<Collected> {
        let pids = process::list_pids().map_err(Error::Io)?;
        let mut rows: Vec<ProcessRow> = Vec::with_capacity(pids.len());
        let now = now_tenths();
        let now_secs = now / 10;
        for pid in pids {
            if let Some(row) = process::collect_row(
                pid,
                self.clock_ticks_per_sec,
                self.page_size_bytes,
                self.boot_time_secs,
                now_secs,
                self.has_io_statistics,
                options.collect_cmdlines,
            ) {
                rows.push(row);
            }
        }

        let mut sample = SystemSample {
            cpu_count: self.cpu_count,
            capability: self.capability,
            ..SystemSample::default()
        };

        if let Ok((l1, l5, l15)) = system::read_loadavg() {
            sample.load1 = l1;
            sample.load5 = l5;
            sample.load15 = l15;
        }
        if let Ok((total, used, swap_total, swap_used)) = system::read_meminfo() {
            sample.memory_total_bytes = total;
            sample.memory_used_bytes = used;
            sample.swap_total_bytes = swap_total;
            sample.swap_used_bytes = swap_used;
        }
        if let Ok((allocated, unused, max)) = system::read_file_nr() {
            sample.fd_allocated = allocated;
            sample.fd_unused = unused;
            sample.fd_max = max;
        }

        if let Ok(current) = system::read_cpu_jiffies() {
            let prev = self.cpu_history.lock().replace(current);
            system::apply_cpu_usage(&mut sample, prev, current);
        }

        Ok(Collected {
            rows,
            system: sample,
            self_pid: std::process::id() as i32,
            now_tenths: now,
        })
    }
}
