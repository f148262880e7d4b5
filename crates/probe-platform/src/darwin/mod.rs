//! macOS [`OsAdapter`](crate::OsAdapter).
//!
//! System-wide totals (load, memory, cpu) come from `sysctl` and the Mach
//! host statistics APIs. Per-process enumeration on macOS requires either
//! `libproc`/`proc_pidinfo` (needs the `libproc` crate, outside this
//! workspace's dependency set) or hand-rolled `kinfo_proc` struct layouts
//! that drift across Darwin releases; neither is attempted here, so
//! `collect` reports system totals with an empty process list rather than
//! guessing at unstable kernel struct offsets.

use crate::{capability, CollectOptions, Collected, OsAdapter, Result, SystemSample};
use mach2::kern_return::KERN_SUCCESS;
use mach2::mach_port::mach_port_deallocate;
use mach2::message::mach_msg_type_number_t;
use mach2::traps::{mach_host_self, mach_task_self};
use mach2::vm_types::integer_t;
use parking_lot::Mutex;
use std::ffi::CString;
use std::mem;
use std::ptr;
use std::time::{SystemTime, UNIX_EPOCH};

const HOST_VM_INFO: libc::c_int = 2;
const HOST_CPU_LOAD_INFO: libc::c_int = 3;
const CPU_STATE_MAX: usize = 4;
const CPU_STATE_USER: usize = 0;
const CPU_STATE_SYSTEM: usize = 1;
const CPU_STATE_IDLE: usize = 2;
const CPU_STATE_NICE: usize = 3;

#[repr(C)]
#[derive(Default)]
struct VmStatistics {
    free_count: integer_t,
    active_count: integer_t,
    inactive_count: integer_t,
    wire_count: integer_t,
    zero_fill_count: integer_t,
    reactivations: integer_t,
    pageins: integer_t,
    pageouts: integer_t,
    faults: integer_t,
    cow_faults: integer_t,
    lookups: integer_t,
    hits: integer_t,
}

#[repr(C)]
#[derive(Default)]
struct HostCpuLoadInfo {
    cpu_ticks: [libc::c_uint; CPU_STATE_MAX],
}

extern "C" {
    fn host_statistics(
        host_priv: u32,
        flavor: libc::c_int,
        host_info_out: *mut libc::c_void,
        host_info_outCnt: *mut mach_msg_type_number_t,
    ) -> libc::c_int;
}

#[derive(Debug, Clone, Copy, Default)]
struct CpuTicks {
    user: u64,
    nice: u64,
    system: u64,
    idle: u64,
}

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

fn read_vm_statistics() -> Option<VmStatistics> {
    let mut stats = VmStatistics::default();
    let mut count = (mem::size_of::<VmStatistics>() / mem::size_of::<integer_t>())
        as mach_msg_type_number_t;
    let host = unsafe { mach_host_self() };
    let rv = unsafe {
        host_statistics(
            host,
            HOST_VM_INFO,
            &mut stats as *mut _ as *mut libc::c_void,
            &mut count,
        )
    };
    unsafe {
        mach_port_deallocate(mach_task_self(), host);
    }
    if rv == KERN_SUCCESS { Some(stats) } else { None }
}

/// `current < previous` means the counter regressed (a reset across sleep,
/// or an inconsistent read) rather than that usage was negative; report 0
/// instead of underflowing the subtraction.
fn usage_percent(previous: u64, current: u64, total_delta: f64) -> f64 {
    if current < previous || total_delta <= 0.0 {
        return 0.0;
    }
    (current - previous) as f64 / total_delta * 100.0
}

fn read_cpu_ticks() -> Option<CpuTicks> {
    let mut info = HostCpuLoadInfo::default();
    let mut count = (mem::size_of::<HostCpuLoadInfo>() / mem::size_of::<integer_t>())
        as mach_msg_type_number_t;
    let host = unsafe { mach_host_self() };
    let rv = unsafe {
        host_statistics(
            host,
            HOST_CPU_LOAD_INFO,
            &mut info as *mut _ as *mut libc::c_void,
            &mut count,
        )
    };
    unsafe {
        mach_port_deallocate(mach_task_self(), host);
    }
    if rv != KERN_SUCCESS {
        return None;
    }
    Some(CpuTicks {
        user: info.cpu_ticks[CPU_STATE_USER] as u64,
        system: info.cpu_ticks[CPU_STATE_SYSTEM] as u64,
        idle: info.cpu_ticks[CPU_STATE_IDLE] as u64,
        nice: info.cpu_ticks[CPU_STATE_NICE] as u64,
    })
}

pub struct DarwinAdapter {
    page_size_bytes: u64,
    cpu_count: u32,
    cpu_history: Mutex<Option<CpuTicks>>,
}

impl DarwinAdapter {
    pub fn new() -> Self {
        Self {
            page_size_bytes: sysctlbyname_u64("hw.pagesize").unwrap_or(4096),
            cpu_count: sysctlbyname_u64("hw.logicalcpu").unwrap_or(1).max(1) as u32,
            cpu_history: Mutex::new(None),
        }
    }
}

impl Default for DarwinAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl OsAdapter for DarwinAdapter {
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

        if let Some(total) = sysctlbyname_u64("hw.memsize") {
            sample.memory_total_bytes = total;
        }
        if let Some(vm) = read_vm_statistics() {
            sample.memory_used_bytes =
                (vm.wire_count as u64 + vm.active_count as u64) * self.page_size_bytes;
        }

        if let Some(current) = read_cpu_ticks() {
            let prev = self.cpu_history.lock().replace(current);
            sample.capability |= capability::CPU_USER | capability::CPU_NICE | capability::CPU_SYSTEM;
            if let Some(prev) = prev {
                let delta = (current.user + current.nice + current.system + current.idle) as f64
                    - (prev.user + prev.nice + prev.system + prev.idle) as f64;
                if delta > 0.0 {
                    sample.cpu_user_percent = usage_percent(prev.user, current.user, delta);
                    sample.cpu_nice_percent = usage_percent(prev.nice, current.nice, delta);
                    sample.cpu_system_percent = usage_percent(prev.system, current.system, delta);
                }
            }
        }

        if let Some(allocated) = sysctlbyname_u64("kern.num_files") {
            sample.fd_allocated = allocated as i64;
            sample.capability |= capability::FD_SYSTEM;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_reports_system_totals() {
        let adapter = DarwinAdapter::new();
        let collected = adapter.collect(&CollectOptions::default()).unwrap();
        assert!(collected.system.cpu_count >= 1);
        assert!(collected.system.memory_total_bytes > 0);
    }

    #[test]
    fn usage_percent_clamps_backwards_counter_to_zero() {
        assert_eq!(usage_percent(100, 50, 10.0), 0.0);
    }
}
