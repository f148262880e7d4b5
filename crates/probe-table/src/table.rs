//! The process table itself (C4) plus the system info it carries (C5).

use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Duration;

use nix::sys::signal::kill;
use nix::unistd::Pid;
use parking_lot::RwLock;
use probe_pidmap::StatisticsAccumulator;
use probe_platform::{CollectOptions, Collected, OsAdapter, ProcessRow, SystemSample};
use regex::Regex;

use crate::cache::{SubProcess, SubProcessCache};
use crate::types::{ServiceBinding, ServiceProcessInfo, SortKey, TableState};
use crate::{Error, Result};

struct Inner {
    rows: Vec<ProcessRow>,
    system: SystemSample,
    self_pid: i32,
    prev_system_time: u64,
    state: TableState,
    cache: SubProcessCache,
    /// Per-pid cumulative-to-rate converters (C2) for disk read/write
    /// bytes, keyed the same as `rows`. Entries for pids no longer present
    /// are dropped each cycle.
    disk_read_accum: HashMap<i32, StatisticsAccumulator>,
    disk_write_accum: HashMap<i32, StatisticsAccumulator>,
    /// This cycle's computed (read, write) bytes/sec per pid.
    disk_rates: HashMap<i32, (f64, f64)>,
}

/// Thread-safe snapshot of every process on the host, refreshed by
/// [`ProcessTable::update`] under a single exclusive lock that also guards
/// the sub-process cache.
pub struct ProcessTable<A: OsAdapter> {
    inner: RwLock<Inner>,
    adapter: A,
    options: CollectOptions,
}

impl<A: OsAdapter> ProcessTable<A> {
    /// Construct the table, running one collection cycle. Fails if that
    /// first collect fails.
    pub fn new(adapter: A, options: CollectOptions) -> Result<Self> {
        let collected = adapter.collect(&options)?;
        let mut rows = collected.rows;
        rows.sort_by_key(|r| r.pid);
        seed_self_totals(&mut rows);
        aggregate_children(&mut rows);

        let mut disk_read_accum = HashMap::new();
        let mut disk_write_accum = HashMap::new();
        let disk_rates = update_disk_accumulators(
            &rows,
            collected.now_tenths,
            &mut disk_read_accum,
            &mut disk_write_accum,
        );

        Ok(Self {
            inner: RwLock::new(Inner {
                rows,
                system: collected.system,
                self_pid: collected.self_pid,
                prev_system_time: collected.now_tenths,
                state: TableState::Running,
                cache: SubProcessCache::new(),
                disk_read_accum,
                disk_write_accum,
                disk_rates,
            }),
            adapter,
            options,
        })
    }

    /// Replace the snapshot with a freshly collected one. The heavy
    /// collection work happens before the lock is taken; only the
    /// aggregation and swap run under it.
    pub fn update(&self) -> Result<()> {
        let collected = self.adapter.collect(&self.options);
        let mut inner = self.inner.write();

        let collected = match collected {
            Ok(c) => c,
            Err(e) => {
                inner.rows.clear();
                inner.state = TableState::Disabled;
                return Err(Error::from(e));
            }
        };

        for row in inner.rows.iter_mut() {
            row.cmdline.clear();
            row.cmdline.shrink_to_fit();
        }
        let prev_rows = std::mem::take(&mut inner.rows);
        let prev_system_time = inner.prev_system_time;
        let prev_index: HashMap<i32, usize> =
            prev_rows.iter().enumerate().map(|(i, r)| (r.pid, i)).collect();

        let Collected {
            mut rows,
            system,
            self_pid,
            now_tenths,
        } = collected;
        rows.sort_by_key(|r| r.pid);

        let delta_time = now_tenths.saturating_sub(prev_system_time);
        let cpu_ceiling = 100.0 * system.cpu_count.max(1) as f64;

        seed_self_totals(&mut rows);
        for row in &mut rows {
            if row.zombie {
                continue;
            }
            if let Some(&pi) = prev_index.get(&row.pid) {
                let prev = &prev_rows[pi];
                if delta_time > 0 && row.cpu_time >= prev.cpu_time {
                    let pct = 100.0 * (row.cpu_time - prev.cpu_time) as f64 / delta_time as f64;
                    row.cpu_usage_self = pct.clamp(0.0, cpu_ceiling);
                }
            }
        }

        aggregate_children(&mut rows);

        let inner_ref = &mut *inner;
        let disk_rates = update_disk_accumulators(
            &rows,
            now_tenths,
            &mut inner_ref.disk_read_accum,
            &mut inner_ref.disk_write_accum,
        );
        inner.disk_rates = disk_rates;
        inner.rows = rows;
        inner.system = system;
        inner.self_pid = self_pid;
        inner.prev_system_time = now_tenths;
        inner.state = TableState::Running;
        Ok(())
    }

    pub fn state(&self) -> TableState {
        self.inner.read().state
    }

    pub fn system(&self) -> SystemSample {
        self.inner.read().system.clone()
    }

    /// Seconds since `pid` started, if it is present in the current
    /// snapshot.
    pub fn uptime(&self, pid: i32) -> Option<Duration> {
        let inner = self.inner.read();
        inner
            .rows
            .iter()
            .find(|r| r.pid == pid)
            .map(|r| Duration::from_secs(r.uptime_secs))
    }

    /// Visit every row in the current snapshot under the read lock. The
    /// visitor must not call back into the table.
    pub fn map<F: FnMut(&ProcessRow)>(&self, mut visitor: F) {
        let inner = self.inner.read();
        for row in &inner.rows {
            visitor(row);
        }
    }

    /// Permute the snapshot in place by `by`, then visit it under the same
    /// exclusive lock.
    pub fn sort<F: FnMut(&ProcessRow)>(&self, by: SortKey, mut visitor: F) {
        let mut inner = self.inner.write();
        match by {
            SortKey::PidAsc => inner.rows.sort_by_key(|r| r.pid),
            SortKey::CpuDesc => inner.rows.sort_by(|a, b| {
                total_cpu(b)
                    .partial_cmp(&total_cpu(a))
                    .unwrap_or(Ordering::Equal)
            }),
            SortKey::MemDesc => inner
                .rows
                .sort_by_key(|r| std::cmp::Reverse(r.memory_usage_total)),
            SortKey::DiskRateDesc => {
                let rates = inner.disk_rates.clone();
                inner.rows.sort_by(|a, b| {
                    disk_rate(&rates, b.pid)
                        .partial_cmp(&disk_rate(&rates, a.pid))
                        .unwrap_or(Ordering::Equal)
                });
            }
        }
        for row in &inner.rows {
            visitor(row);
        }
    }

    /// The pid best matching `pattern` per the §4.4.2 disambiguation rule,
    /// or `None` if no row qualifies.
    pub fn find_matching(&self, pattern: &Regex) -> Option<i32> {
        let inner = self.inner.read();
        let index: HashMap<i32, usize> =
            inner.rows.iter().enumerate().map(|(i, r)| (r.pid, i)).collect();

        let matches = |row: &ProcessRow| !row.cmdline.is_empty() && pattern.is_match(&row.cmdline);

        let mut best: Option<&ProcessRow> = None;
        for row in &inner.rows {
            if row.pid == inner.self_pid || !matches(row) {
                continue;
            }
            let parent_also_matches = index
                .get(&row.ppid)
                .map(|&pi| matches(&inner.rows[pi]))
                .unwrap_or(false);
            if parent_also_matches {
                continue;
            }
            best = match best {
                None => Some(row),
                Some(b) if row.uptime_secs > b.uptime_secs => Some(row),
                Some(b) if row.uptime_secs == b.uptime_secs && row.pid < b.pid => Some(row),
                Some(b) => Some(b),
            };
        }
        best.map(|r| r.pid)
    }

    pub fn set_sub_process(&self, pid: i32, handle: SubProcess) -> Option<SubProcess> {
        self.inner.write().cache.set(pid, handle)
    }

    pub fn remove_sub_process(&self, pid: i32) -> Option<SubProcess> {
        self.inner.write().cache.remove(pid)
    }

    pub fn with_sub_process<R>(&self, pid: i32, f: impl FnOnce(Option<&SubProcess>) -> R) -> R {
        f(self.inner.read().cache.get(pid))
    }

    pub fn find_sub_process_by_name(&self, name: &str) -> Result<Option<i32>> {
        let inner = self.inner.read();
        Ok(inner.cache.find_by_name(name)?.map(|h| h.pid()))
    }

    /// Resolve a declared service's live pid per the §4.4.4 precedence.
    pub fn find_service_process(&self, binding: &ServiceBinding) -> Option<i32> {
        if let Some(pid) = binding.last_pid {
            if process_exists(pid) {
                return Some(pid);
            }
        }
        if let Some(pattern) = &binding.match_pattern {
            if self.state() == TableState::Disabled {
                return binding.last_pid;
            }
            return self.find_matching(pattern);
        }
        if let Some(path) = &binding.pidfile {
            let pid = std::fs::read_to_string(path)
                .ok()
                .and_then(|s| s.trim().parse::<i32>().ok())?;
            return process_exists(pid).then_some(pid);
        }
        None
    }

    /// Copy the matched row's metrics into `info`, clamping combined CPU
    /// and memory percentages to 100.
    pub fn update_service_process(
        &self,
        pid: Option<i32>,
        info: &mut ServiceProcessInfo,
    ) -> Result<()> {
        let Some(pid) = pid else {
            *info = ServiceProcessInfo::default();
            return Err(Error::Unavailable("service has no bound pid".to_string()));
        };

        let inner = self.inner.read();
        let Some(row) = inner.rows.iter().find(|r| r.pid == pid) else {
            *info = ServiceProcessInfo::default();
            return Err(Error::Unavailable(format!(
                "pid {pid} not present in the current snapshot"
            )));
        };

        info.pid = Some(row.pid);
        info.ppid = Some(row.ppid);
        info.uptime_secs = row.uptime_secs;
        info.cpu_usage_percent = total_cpu(row).clamp(0.0, 100.0);
        info.memory_usage_bytes = row.memory_usage_total;
        let total_ram = inner.system.memory_total_bytes;
        info.memory_percent = percent_of(row.memory_rss_bytes, total_ram);
        info.total_memory_percent = percent_of(row.memory_usage_total, total_ram);
        info.children_total = row.children_total;
        info.threads_total = row.threads_self + row.threads_children;
        let (read_rate, write_rate) = inner.disk_rates.get(&pid).copied().unwrap_or((0.0, 0.0));
        info.disk_read_bytes_per_sec = read_rate;
        info.disk_write_bytes_per_sec = write_rate;
        Ok(())
    }
}

fn total_cpu(row: &ProcessRow) -> f64 {
    row.cpu_usage_self.max(0.0) + row.cpu_usage_children.max(0.0)
}

/// Combined read+write bytes/sec for `pid`, or 0 if C2 has no sample yet.
fn disk_rate(rates: &HashMap<i32, (f64, f64)>, pid: i32) -> f64 {
    rates.get(&pid).map(|(r, w)| r + w).unwrap_or(0.0)
}

fn percent_of(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (part as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
    }
}

/// Feed this cycle's cumulative disk byte counters through per-pid C2
/// accumulators, dropping entries for pids no longer present, and return
/// the resulting (read, write) bytes/sec for every row. `now_tenths` is
/// converted to milliseconds since [`StatisticsAccumulator`] reports its
/// rate per 1000 time units.
fn update_disk_accumulators(
    rows: &[ProcessRow],
    now_tenths: u64,
    read_accum: &mut HashMap<i32, StatisticsAccumulator>,
    write_accum: &mut HashMap<i32, StatisticsAccumulator>,
) -> HashMap<i32, (f64, f64)> {
    let live: HashMap<i32, ()> = rows.iter().map(|r| (r.pid, ())).collect();
    read_accum.retain(|pid, _| live.contains_key(pid));
    write_accum.retain(|pid, _| live.contains_key(pid));

    let now_ms = now_tenths.saturating_mul(100);
    let mut rates = HashMap::with_capacity(rows.len());
    for row in rows {
        let read_bytes = row.read.map(|c| c.bytes.max(0) as u64).unwrap_or(0);
        let write_bytes = row.write.map(|c| c.bytes.max(0) as u64).unwrap_or(0);
        let r = read_accum.entry(row.pid).or_default();
        r.update(now_ms, read_bytes);
        let w = write_accum.entry(row.pid).or_default();
        w.update(now_ms, write_bytes);
        rates.insert(row.pid, (r.per_second(), w.per_second()));
    }
    rates
}

fn process_exists(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}

/// Seed each row's own totals (`memory_usage_total` from RSS,
/// `filedescriptors_usage_total` from the platform's open-fd count when
/// available) before [`aggregate_children`] folds descendants in. Zombies
/// never carry real resource usage and are always reported as all-zero.
/// Applied identically on the first collect cycle and every subsequent one.
fn seed_self_totals(rows: &mut [ProcessRow]) {
    for row in rows {
        if row.zombie {
            row.cpu_usage_self = 0.0;
            row.memory_usage_total = 0;
            row.filedescriptors_usage_total = 0;
        } else {
            row.memory_usage_total = row.memory_rss_bytes;
            row.filedescriptors_usage_total = row.fd.map_or(-1, |f| f.open);
        }
    }
}

/// Walk the pid-ascending row vector from the back so every descendant
/// finishes aggregating before its parent. Self-parent cycles and
/// `ppid <= 1` roots are skipped.
///
/// Relies on pids correlating with creation order, as process pids
/// generally do; under pid reuse/wraparound a child can land at a lower
/// index than its parent, and its subtree is folded into the parent one
/// cycle late rather than not at all.
fn aggregate_children(rows: &mut [ProcessRow]) {
    let index: HashMap<i32, usize> = rows.iter().enumerate().map(|(i, r)| (r.pid, i)).collect();

    for i in (0..rows.len()).rev() {
        let (pid, ppid) = (rows[i].pid, rows[i].ppid);
        if ppid <= 1 || ppid == pid {
            continue;
        }
        let Some(&parent_idx) = index.get(&ppid) else {
            continue;
        };
        if parent_idx == i {
            continue;
        }
        let child_row = &rows[i];
        let (children_total, threads_self, threads_children, cpu_usage_self, cpu_usage_children, memory_usage_total, filedescriptors_usage_total) = (
            child_row.children_total,
            child_row.threads_self,
            child_row.threads_children,
            child_row.cpu_usage_self,
            child_row.cpu_usage_children,
            child_row.memory_usage_total,
            child_row.filedescriptors_usage_total,
        );
        let parent = &mut rows[parent_idx];
        parent.children_total += 1 + children_total;
        parent.threads_children += threads_self + threads_children;
        parent.cpu_usage_children += cpu_usage_self.max(0.0) + cpu_usage_children.max(0.0);
        parent.memory_usage_total += memory_usage_total;
        if parent.filedescriptors_usage_total >= 0 && filedescriptors_usage_total >= 0 {
            parent.filedescriptors_usage_total += filedescriptors_usage_total;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use probe_platform::{
        CollectOptions as Opts, Collected as Coll, Error as PErr, FileDescriptorUsage,
    };

    struct FakeAdapter {
        cycles: std::sync::Mutex<Vec<Coll>>,
    }

    impl FakeAdapter {
        fn new(cycles: Vec<Coll>) -> Self {
            Self {
                cycles: std::sync::Mutex::new(cycles),
            }
        }
    }

    impl OsAdapter for FakeAdapter {
        fn collect(&self, _options: &Opts) -> probe_platform::Result<Coll> {
            let mut cycles = self.cycles.lock().unwrap();
            if cycles.is_empty() {
                Err(PErr::Unavailable("no more fixtures".to_string()))
            } else {
                Ok(cycles.remove(0))
            }
        }
    }

    fn row(pid: i32, ppid: i32, cmdline: &str, uptime_secs: u64) -> ProcessRow {
        ProcessRow {
            pid,
            ppid,
            cmdline: cmdline.to_string(),
            uptime_secs,
            ..ProcessRow::default()
        }
    }

    fn cycle(rows: Vec<ProcessRow>, now_tenths: u64) -> Coll {
        Coll {
            rows,
            system: SystemSample::default(),
            self_pid: -1,
            now_tenths,
        }
    }

    #[test]
    fn pattern_matches_oldest_non_wrapper() {
        let rows = vec![
            row(10, 1, "sh -c app", 100),
            row(11, 10, "app --run", 90),
            row(12, 1, "app --run", 120),
        ];
        let table = ProcessTable::new(FakeAdapter::new(vec![cycle(rows, 0)]), Opts::default())
            .unwrap();
        let pattern = Regex::new("app --run").unwrap();
        assert_eq!(table.find_matching(&pattern), Some(12));
    }

    #[test]
    fn pattern_prefers_non_wrapper_child_when_parent_matches() {
        let rows = vec![row(10, 1, "sh -c app", 100), row(11, 10, "app --run", 90)];
        let table = ProcessTable::new(FakeAdapter::new(vec![cycle(rows, 0)]), Opts::default())
            .unwrap();
        let pattern = Regex::new("app --run").unwrap();
        assert_eq!(table.find_matching(&pattern), None);

        let pattern_both = Regex::new("sh -c app|app --run").unwrap();
        assert_eq!(table.find_matching(&pattern_both), Some(11));
    }

    #[test]
    fn self_parent_cycle_does_not_infinite_loop() {
        let rows = vec![row(5, 5, "weird", 10)];
        let table = ProcessTable::new(FakeAdapter::new(vec![cycle(rows, 0)]), Opts::default())
            .unwrap();
        table.map(|r| assert_eq!(r.children_total, 0));
    }

    #[test]
    fn orphan_parent_does_not_crash_aggregation() {
        let rows = vec![row(5, 999, "child", 10)];
        let table = ProcessTable::new(FakeAdapter::new(vec![cycle(rows, 0)]), Opts::default())
            .unwrap();
        table.map(|r| assert_eq!(r.children_total, 0));
    }

    #[test]
    fn children_aggregate_into_parent() {
        let rows = vec![row(1, 0, "init", 1000), row(2, 1, "child", 10)];
        // ppid == 1 is itself a root and is skipped per the aggregation rule.
        let table = ProcessTable::new(FakeAdapter::new(vec![cycle(rows, 0)]), Opts::default())
            .unwrap();
        table.map(|r| assert_eq!(r.children_total, 0));
    }

    #[test]
    fn real_parent_edge_aggregates() {
        let mut parent = row(100, 50, "parent", 1000);
        parent.memory_rss_bytes = 1000;
        let mut child = row(101, 100, "child", 10);
        child.memory_rss_bytes = 500;
        let table = ProcessTable::new(
            FakeAdapter::new(vec![cycle(vec![parent, child], 0)]),
            Opts::default(),
        )
        .unwrap();
        let mut parent_children_total = 0;
        let mut parent_mem_total = 0;
        table.map(|r| {
            if r.pid == 100 {
                parent_children_total = r.children_total;
                parent_mem_total = r.memory_usage_total;
            }
        });
        assert_eq!(parent_children_total, 1);
        assert_eq!(parent_mem_total, 1500);
    }

    #[test]
    fn open_fd_counts_aggregate_into_parent() {
        let mut parent = row(100, 50, "parent", 1000);
        parent.fd = Some(FileDescriptorUsage {
            open: 7,
            soft_limit: 1024,
            hard_limit: 4096,
        });
        let mut child = row(101, 100, "child", 10);
        child.fd = Some(FileDescriptorUsage {
            open: 3,
            soft_limit: 1024,
            hard_limit: 4096,
        });
        let table = ProcessTable::new(
            FakeAdapter::new(vec![cycle(vec![parent, child], 0)]),
            Opts::default(),
        )
        .unwrap();
        let mut parent_fd_total = -1;
        table.map(|r| {
            if r.pid == 100 {
                parent_fd_total = r.filedescriptors_usage_total;
            }
        });
        assert_eq!(parent_fd_total, 10);
    }

    #[test]
    fn update_failure_disables_the_table() {
        let rows = vec![row(1, 0, "init", 1)];
        let table = ProcessTable::new(FakeAdapter::new(vec![cycle(rows, 0)]), Opts::default())
            .unwrap();
        assert_eq!(table.update().is_err(), true);
        assert_eq!(table.state(), TableState::Disabled);
    }

    #[test]
    fn disk_rate_tracks_cumulative_deltas_across_updates() {
        let mut first = row(1, 0, "init", 1);
        first.read = Some(probe_platform::IoCounters {
            bytes: 1_000,
            ..Default::default()
        });
        let mut second = row(1, 0, "init", 2);
        second.read = Some(probe_platform::IoCounters {
            bytes: 6_000,
            ..Default::default()
        });

        let table = ProcessTable::new(
            FakeAdapter::new(vec![cycle(vec![first], 0), cycle(vec![second], 10)]),
            Opts::default(),
        )
        .unwrap();
        table.update().unwrap();

        let mut info = ServiceProcessInfo::default();
        table.update_service_process(Some(1), &mut info).unwrap();
        // delta 5000 bytes over 1 second (10 tenths -> 1000ms) == 5000 B/s.
        assert_eq!(info.disk_read_bytes_per_sec, 5_000.0);
        assert_eq!(info.disk_write_bytes_per_sec, 0.0);
    }

    #[test]
    fn disk_rate_accumulator_drops_pids_no_longer_present() {
        let mut gone = row(1, 0, "init", 1);
        gone.read = Some(probe_platform::IoCounters {
            bytes: 1_000,
            ..Default::default()
        });
        let survivor = row(2, 0, "keep", 1);

        let table = ProcessTable::new(
            FakeAdapter::new(vec![
                cycle(vec![gone], 0),
                cycle(vec![survivor.clone()], 10),
            ]),
            Opts::default(),
        )
        .unwrap();
        table.update().unwrap();

        let mut info = ServiceProcessInfo::default();
        assert!(table.update_service_process(Some(1), &mut info).is_err());
    }

    #[test]
    fn service_binding_falls_back_through_precedence() {
        let rows = vec![row(1, 0, "init", 1)];
        let table = ProcessTable::new(FakeAdapter::new(vec![cycle(rows, 0)]), Opts::default())
            .unwrap();
        let binding = ServiceBinding::default();
        assert_eq!(table.find_service_process(&binding), None);
    }
}
