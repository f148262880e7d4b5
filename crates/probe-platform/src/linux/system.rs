//! System-wide `/proc` parsing: load, memory, swap, file descriptors and
//! the historical `/proc/stat` cpu-line field-count progression.

use crate::{capability, SystemSample};
use std::fs;
use std::io;

/// Raw cumulative jiffie counters read from the `cpu` line of
/// `/proc/stat`, plus the capability bits this kernel's field count
/// unlocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuJiffies {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub hardirq: u64,
    pub softirq: u64,
    pub steal: u64,
    pub guest: u64,
    pub guest_nice: u64,
    pub capability: u32,
}

pub fn read_cpu_jiffies() -> io::Result<CpuJiffies> {
    let raw = fs::read_to_string("/proc/stat")?;
    let line = raw
        .lines()
        .find(|l| l.starts_with("cpu "))
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no cpu line"))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|f| f.parse().ok())
        .collect();

    let mut j = CpuJiffies::default();
    let n = fields.len();
    if n < 4 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "short cpu line"));
    }
    j.user = fields[0];
    j.nice = fields[1];
    j.system = fields[2];
    j.idle = fields[3];
    j.capability = capability::CPU_USER | capability::CPU_NICE | capability::CPU_SYSTEM;

    // Historical field-count progression: each kernel generation appends
    // one more counter to the line rather than replacing any.
    if n >= 5 {
        j.iowait = fields[4];
        j.capability |= capability::CPU_IOWAIT;
    }
    if n >= 7 {
        j.hardirq = fields[5];
        j.softirq = fields[6];
        j.capability |= capability::CPU_HARDIRQ | capability::CPU_SOFTIRQ;
    }
    if n >= 8 {
        j.steal = fields[7];
        j.capability |= capability::CPU_STEAL;
    }
    if n >= 9 {
        j.guest = fields[8];
        j.capability |= capability::CPU_GUEST;
    }
    if n >= 10 {
        j.guest_nice = fields[9];
        j.capability |= capability::CPU_GUEST_NICE;
    }
    Ok(j)
}

fn usage_percent(previous: u64, current: u64, total_delta: f64) -> f64 {
    if current < previous || total_delta <= 0.0 {
        return 0.0;
    }
    (current - previous) as f64 / total_delta * 100.0
}

/// Fill in `sample`'s cpu percentage fields from a previous and current
/// jiffie snapshot. `prev` being `None` means this is the first cycle;
/// percentages stay at the `-1.0` "not yet available" default.
pub fn apply_cpu_usage(sample: &mut SystemSample, prev: Option<CpuJiffies>, current: CpuJiffies) {
    sample.capability |= current.capability;
    let Some(prev) = prev else {
        return;
    };

    let prev_total = prev.user as f64
        + prev.nice as f64
        + prev.system as f64
        + prev.idle as f64
        + prev.iowait as f64
        + prev.hardirq as f64
        + prev.softirq as f64
        + prev.steal as f64;
    let cur_total = current.user as f64
        + current.nice as f64
        + current.system as f64
        + current.idle as f64
        + current.iowait as f64
        + current.hardirq as f64
        + current.softirq as f64
        + current.steal as f64;
    let delta = cur_total - prev_total;

    // Guest time is already folded into user/nice upstream; subtract it so
    // the two don't double-count.
    sample.cpu_user_percent = usage_percent(
        prev.user.saturating_sub(prev.guest),
        current.user.saturating_sub(current.guest),
        delta,
    );
    sample.cpu_nice_percent = usage_percent(
        prev.nice.saturating_sub(prev.guest_nice),
        current.nice.saturating_sub(current.guest_nice),
        delta,
    );
    sample.cpu_system_percent = usage_percent(prev.system, current.system, delta);
    if current.capability & capability::CPU_IOWAIT != 0 {
        sample.cpu_iowait_percent = usage_percent(prev.iowait, current.iowait, delta);
    }
    if current.capability & capability::CPU_HARDIRQ != 0 {
        sample.cpu_hardirq_percent = usage_percent(prev.hardirq, current.hardirq, delta);
        sample.cpu_softirq_percent = usage_percent(prev.softirq, current.softirq, delta);
    }
    if current.capability & capability::CPU_STEAL != 0 {
        sample.cpu_steal_percent = usage_percent(prev.steal, current.steal, delta);
    }
    if current.capability & capability::CPU_GUEST != 0 {
        sample.cpu_guest_percent = usage_percent(prev.guest, current.guest, delta);
    }
    if current.capability & capability::CPU_GUEST_NICE != 0 {
        sample.cpu_guest_nice_percent = usage_percent(prev.guest_nice, current.guest_nice, delta);
    }
}

pub fn read_loadavg() -> io::Result<(f64, f64, f64)> {
    let raw = fs::read_to_string("/proc/loadavg")?;
    let mut it = raw.split_whitespace();
    let parse = |s: Option<&str>| -> io::Result<f64> {
        s.and_then(|s| s.parse().ok())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "bad loadavg"))
    };
    Ok((parse(it.next())?, parse(it.next())?, parse(it.next())?))
}

pub fn read_meminfo() -> io::Result<(u64, u64, u64, u64)> {
    let raw = fs::read_to_string("/proc/meminfo")?;
    let mut total_kb = 0u64;
    let mut available_kb: Option<u64> = None;
    let mut free_kb = 0u64;
    let mut buffers_kb = 0u64;
    let mut cached_kb = 0u64;
    let mut swap_total_kb = 0u64;
    let mut swap_free_kb = 0u64;

    for line in raw.lines() {
        let mut parts = line.split_whitespace();
        let key = parts.next().unwrap_or("");
        let value: u64 = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
        match key {
            "MemTotal:" => total_kb = value,
            "MemAvailable:" => available_kb = Some(value),
            "MemFree:" => free_kb = value,
            "Buffers:" => buffers_kb = value,
            "Cached:" => cached_kb = value,
            "SwapTotal:" => swap_total_kb = value,
            "SwapFree:" => swap_free_kb = value,
            _ => {}
        }
    }

    let used_kb = match available_kb {
        Some(avail) => total_kb.saturating_sub(avail),
        None => total_kb.saturating_sub(free_kb + buffers_kb + cached_kb),
    };
    Ok((
        total_kb * 1024,
        used_kb * 1024,
        swap_total_kb * 1024,
        swap_total_kb.saturating_sub(swap_free_kb) * 1024,
    ))
}

pub fn read_file_nr() -> io::Result<(i64, i64, i64)> {
    let raw = fs::read_to_string("/proc/sys/fs/file-nr")?;
    let mut it = raw.split_whitespace();
    let parse = |s: Option<&str>| -> io::Result<i64> {
        s.and_then(|s| s.parse().ok())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "bad file-nr"))
    };
    let allocated = parse(it.next())?;
    let unused = parse(it.next())?;
    let max = parse(it.next())?;
    Ok((allocated, unused, max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_live_cpu_jiffies() {
        let j = read_cpu_jiffies().unwrap();
        assert!(j.capability & capability::CPU_USER != 0);
    }

    #[test]
    fn usage_percent_clamps_backwards_counter_to_zero() {
        assert_eq!(usage_percent(100, 50, 10.0), 0.0);
    }

    #[test]
    fn first_cycle_leaves_percentages_unavailable() {
        let mut sample = SystemSample::default();
        let current = read_cpu_jiffies().unwrap();
        apply_cpu_usage(&mut sample, None, current);
        assert_eq!(sample.cpu_user_percent, -1.0);
    }

    #[test]
    fn reads_live_loadavg_and_meminfo() {
        let (l1, _, _) = read_loadavg().unwrap();
        assert!(l1 >= 0.0);
        let (total, used, _, _) = read_meminfo().unwrap();
        assert!(total > 0);
        assert!(used <= total);
    }
}
