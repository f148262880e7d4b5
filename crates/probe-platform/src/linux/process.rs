//! Per-pid `/proc` parsing.

use crate::{FileDescriptorUsage, IoCounters, ProcessRow};
use std::fs;
use std::io;

/// Fields pulled out of `/proc/<pid>/stat`, in the field order the kernel
/// writes them after the closing `)` of the (possibly multi-word) comm
/// field.
struct StatFields {
    state: char,
    ppid: i32,
    utime: u64,
    stime: u64,
    threads: u32,
    starttime: u64,
    rss_pages: i64,
}

fn parse_stat(pid: i32) -> io::Result<StatFields> {
    let raw = fs::read_to_string(format!("/proc/{pid}/stat"))?;
    let after_comm = raw
        .rfind(')')
        .map(|i| &raw[i + 1..])
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed stat line"))?;
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    // Fields after the comm, 1-indexed in `proc(5)`: 3=state 4=ppid
    // 14=utime 15=stime 20=num_threads 22=starttime 24=rss. `cutime`/
    // `cstime` (16/17, already-reaped children's CPU time) are deliberately
    // not read: probe-table aggregates live children's own cpu_usage_self
    // separately, and folding cutime/cstime in here would double-count an
    // exited child's CPU time as a spike in its parent's self usage.
    // `fields[0]` here is proc(5) field 3.
    let get = |idx: usize| -> io::Result<&str> {
        fields
            .get(idx)
            .copied()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "short stat line"))
    };
    let parse = |s: &str| -> io::Result<u64> {
        s.parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad stat field"))
    };
    Ok(StatFields {
        state: get(0)?.chars().next().unwrap_or('?'),
        ppid: get(1)?
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad ppid"))?,
        utime: parse(get(11)?)?,
        stime: parse(get(12)?)?,
        threads: parse(get(17)?)? as u32,
        starttime: parse(get(19)?)?,
        rss_pages: parse(get(21)?)? as i64,
    })
}

fn parse_uid_gid(pid: i32) -> io::Result<(u32, u32, u32)> {
    let raw = fs::read_to_string(format!("/proc/{pid}/status"))?;
    let uid_line = raw
        .lines()
        .find(|l| l.starts_with("Uid:"))
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no Uid line"))?;
    let mut uid_fields = uid_line.split_whitespace().skip(1);
    let uid: u32 = uid_fields
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "bad uid"))?;
    let euid: u32 = uid_fields
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "bad euid"))?;

    let gid_line = raw
        .lines()
        .find(|l| l.starts_with("Gid:"))
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no Gid line"))?;
    let gid: u32 = gid_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "bad gid"))?;

    Ok((uid, euid, gid))
}

/// `0xFFFFFFFF` is the kernel's "no mapping in this namespace" sentinel.
fn credential(raw: u32) -> Option<u32> {
    if raw == u32::MAX {
        None
    } else {
        Some(raw)
    }
}

fn parse_io(pid: i32) -> io::Result<(IoCounters, IoCounters)> {
    let raw = fs::read_to_string(format!("/proc/{pid}/io"))?;
    let field = |name: &str| -> io::Result<i64> {
        raw.lines()
            .find(|l| l.starts_with(name))
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidData, format!("missing {name}"))
            })
    };
    let read = IoCounters {
        bytes: field("rchar:")?,
        operations: field("syscr:")?,
        bytes_physical: field("read_bytes:")?,
    };
    let write = IoCounters {
        bytes: field("wchar:")?,
        operations: field("syscw:")?,
        bytes_physical: field("write_bytes:")?,
    };
    Ok((read, write))
}

fn parse_cmdline(pid: i32) -> String {
    match fs::read(format!("/proc/{pid}/cmdline")) {
        Ok(bytes) if !bytes.is_empty() => bytes
            .split(|&b| b == 0)
            .filter(|s| !s.is_empty())
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect::<Vec<_>>()
            .join(" "),
        _ => parse_comm(pid).unwrap_or_default(),
    }
}

fn parse_comm(pid: i32) -> io::Result<String> {
    let raw = fs::read_to_string(format!("/proc/{pid}/stat"))?;
    let start = raw
        .find('(')
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no comm"))?;
    let end = raw
        .rfind(')')
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no comm"))?;
    Ok(raw[start + 1..end].to_string())
}

fn count_fds(pid: i32) -> io::Result<i64> {
    let mut count: i64 = 0;
    for entry in fs::read_dir(format!("/proc/{pid}/fd"))? {
        entry?;
        count += 1;
    }
    Ok(count)
}

fn fd_limits(pid: i32) -> Option<(i64, i64)> {
    let raw = fs::read_to_string(format!("/proc/{pid}/limits")).ok()?;
    for line in raw.lines() {
        if line.starts_with("Max open files") {
            let mut it = line.split_whitespace();
            // "Max open files <soft> <hard> files"
            let soft = it.clone().nth(3)?;
            let hard = it.nth(4)?;
            let parse_limit = |s: &str| -> i64 {
                if s == "unlimited" {
                    -1
                } else {
                    s.parse().unwrap_or(-1)
                }
            };
            return Some((parse_limit(soft), parse_limit(hard)));
        }
    }
    None
}

pub fn list_pids() -> io::Result<Vec<i32>> {
    let mut pids = Vec::new();
    for entry in fs::read_dir("/proc")? {
        let entry = entry?;
        if let Ok(pid) = entry.file_name().to_string_lossy().parse::<i32>() {
            pids.push(pid);
        }
    }
    Ok(pids)
}

/// Collect one row for `pid`. Returns `None` if the process exited between
/// listing and reading (normal, not an error).
pub fn collect_row(
    pid: i32,
    clock_ticks_per_sec: u64,
    page_size_bytes: u64,
    boot_time_secs: u64,
    now_secs: u64,
    has_io_statistics: bool,
    collect_cmdlines: bool,
) -> Option<ProcessRow> {
    let stat = parse_stat(pid).ok()?;
    let (uid, euid, gid) = parse_uid_gid(pid).unwrap_or((u32::MAX, u32::MAX, u32::MAX));

    let mut row = ProcessRow {
        pid,
        ppid: stat.ppid,
        zombie: stat.state == 'Z',
        uid: credential(uid),
        euid: credential(euid),
        gid: credential(gid),
        cpu_time: ticks_to_tenths(stat.utime + stat.stime, clock_ticks_per_sec),
        memory_rss_bytes: (stat.rss_pages.max(0) as u64) * page_size_bytes,
        threads_self: stat.threads,
        uptime_secs: uptime_from_starttime(stat.starttime, clock_ticks_per_sec, boot_time_secs, now_secs),
        cmdline: String::new(),
        read: None,
        write: None,
        fd: None,
        ..ProcessRow::default()
    };

    if collect_cmdlines {
        row.cmdline = parse_cmdline(pid);
    }

    if has_io_statistics {
        if let Ok((read, write)) = parse_io(pid) {
            row.read = Some(read);
            row.write = Some(write);
        }
    }

    if let Ok(open) = count_fds(pid) {
        let (soft, hard) = fd_limits(pid).unwrap_or((-1, -1));
        row.fd = Some(FileDescriptorUsage {
            open,
            soft_limit: soft,
            hard_limit: hard,
        });
    }

    Some(row)
}

fn ticks_to_tenths(ticks: u64, clock_ticks_per_sec: u64) -> u64 {
    if clock_ticks_per_sec == 0 {
        return 0;
    }
    ticks * 10 / clock_ticks_per_sec
}

/// `starttime` from `/proc/<pid>/stat` is in clock ticks since boot; convert
/// to an absolute uptime in seconds given the system boot time. Takes an
/// already-parsed `starttime` rather than re-reading `/proc/<pid>/stat`,
/// since [`collect_row`] has just read the same file for the same pid.
fn uptime_from_starttime(starttime: u64, clock_ticks_per_sec: u64, boot_time_secs: u64, now_secs: u64) -> u64 {
    if clock_ticks_per_sec == 0 {
        return 0;
    }
    let started_at = boot_time_secs + starttime / clock_ticks_per_sec;
    now_secs.saturating_sub(started_at)
}
