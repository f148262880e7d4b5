//! FreeBSD/OpenBSD/NetBSD [`OsAdapter`](crate::OsAdapter).
//!
//! Covers system-wide load, memory and cpu count via `sysctl`; per-process
//! enumeration needs `kvm(3)` against `/dev/kmem`, which requires running
//! with elevated group membership and a libkvm binding outside this
//! workspace's dependency set, so `collect` reports system totals with an
//! empty process list, matching the Darwin adapter's scope.

use crate::{CollectOptions, Collected, OsAdapter, Result, SystemSample};
use std::ffi::CString;
use std::mem;
use std::ptr;
use std::time::{SystemTime, UNIX_EPOCH};

fn sysctlbyname_u64(name: &str) -> Option<u64> {
    let cname = CString::new(name).ok()?;
    let mut value: u64 = 0;
    let mut size = mem::size_of::<u64>();
    let rv = unsafe {
        libc::sysctlbyname(
            cname.as_ptr(),
            &mut value as *mut _ as *mut libc::c_void,
            &mut size,
            ptr::null_mut(),
            0,
        )
    };
    if rv == 0 {
        Some(value)
    } else {
        None
    }
}

pub struct BsdAdapter {
    cpu_count: u32,
}

impl BsdAdapter {
    pub fn new() -> Self {
        Self {
            cpu_count: sysctlbyname_u64("hw.ncpu").unwrap_or(1).max(1) as u32,
        }
    }
}

impl Default for BsdAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl OsAdapter for BsdAdapter {
    fn collect(&self, _options: &CollectOptions) -> Result<Collected> {
        let mut sample = SystemSample {
            cpu_count: self.cpu_count,
            ..SystemSample::default()
        };

        let mut loadavg = [0f64; 3];
        if unsafe { libc::getloadavg(loadavg.as_mut_ptr(), 3) } == 3 {
            sample.load1 = loadavg[0];
            sample.load5 = loadavg[1];
            sample.load15 = loadavg[2];
        }
        if let Some(total) = sysctlbyname_u64("hw.physmem") {
            sample.memory_total_bytes = total;
        }

        let now_tenths = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64 / 100)
            .unwrap_or(0);

        Ok(Collected {
            rows: Vec::new(),
            system: sample,
            self_pid: std::process::id() as i32,
            now_tenths,
        })
    }
}
