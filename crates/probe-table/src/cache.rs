//! Sub-process handle cache (C4.4.3), backed by [`probe_pidmap::SparseIntMap`].

use probe_pidmap::SparseIntMap;
use std::process::{Child, ExitStatus};

/// A process this monitor spawned directly (a program, an event script).
/// Lifecycle is independent of snapshot cycles; the table only tracks it
/// until the caller removes it.
pub struct SubProcess {
    pid: i32,
    service_name: String,
    child: Option<Child>,
    detached: bool,
    exit_status: Option<ExitStatus>,
}

impl SubProcess {
    pub fn new(pid: i32, service_name: impl Into<String>, child: Child) -> Self {
        Self {
            pid,
            service_name: service_name.into(),
            child: Some(child),
            detached: false,
            exit_status: None,
        }
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn detached(&self) -> bool {
        self.detached
    }

    pub fn detach(&mut self) {
        self.detached = true;
    }

    /// Non-blocking check: records and returns the exit status once the
    /// child has exited.
    pub fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        if let Some(status) = self.exit_status {
            return Ok(Some(status));
        }
        if let Some(child) = self.child.as_mut() {
            if let Some(status) = child.try_wait()? {
                self.exit_status = Some(status);
                return Ok(Some(status));
            }
        }
        Ok(None)
    }
}

pub(crate) struct SubProcessCache {
    map: SparseIntMap<SubProcess>,
}

impl SubProcessCache {
    pub fn new() -> Self {
        Self {
            map: SparseIntMap::new(127),
        }
    }

    /// Replace the handle for `pid`, returning the previous one so the
    /// caller can detach or wait on it. Ownership makes the "same handle"
    /// aliasing case the donor's pointer-identity check once guarded
    /// against structurally impossible here: a caller can only ever pass
    /// an owned `SubProcess` it got by constructing one fresh or by
    /// `remove`-ing the map's own copy first, and either way there is no
    /// entry left at `pid` for it to collide with.
    pub fn set(&mut self, pid: i32, handle: SubProcess) -> Option<SubProcess> {
        self.map.put(pid, handle)
    }

    pub fn get(&self, pid: i32) -> Option<&SubProcess> {
        self.map.get(pid)
    }

    pub fn get_mut(&mut self, pid: i32) -> Option<&mut SubProcess> {
        self.map.get_mut(pid)
    }

    pub fn remove(&mut self, pid: i32) -> Option<SubProcess> {
        self.map.remove(pid)
    }

    pub fn find_by_name(&self, name: &str) -> probe_pidmap::Result<Option<&SubProcess>> {
        self.map.find(|h| h.service_name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn spawn_sleeper() -> Child {
        Command::new("sleep")
            .arg("0.2")
            .spawn()
            .expect("spawn sleep")
    }

    #[test]
    fn set_then_get_round_trips() {
        let child = spawn_sleeper();
        let pid = child.id() as i32;
        let mut cache = SubProcessCache::new();
        assert!(cache.set(pid, SubProcess::new(pid, "sleeper", child)).is_none());
        assert_eq!(cache.get(pid).unwrap().pid(), pid);
    }

    #[test]
    fn find_by_name_locates_registered_handle() {
        let child = spawn_sleeper();
        let pid = child.id() as i32;
        let mut cache = SubProcessCache::new();
        cache.set(pid, SubProcess::new(pid, "sleeper", child));
        let found = cache.find_by_name("sleeper").unwrap();
        assert_eq!(found.unwrap().pid(), pid);
        assert!(cache.find_by_name("missing").unwrap().is_none());
    }

    #[test]
    fn set_with_a_distinct_handle_at_the_same_pid_replaces_and_returns_the_old_one() {
        let first_child = spawn_sleeper();
        let pid = first_child.id() as i32;
        let mut cache = SubProcessCache::new();
        cache.set(pid, SubProcess::new(pid, "first", first_child));

        let second_child = spawn_sleeper();
        let replaced = cache.set(pid, SubProcess::new(pid, "second", second_child));
        assert_eq!(replaced.unwrap().service_name(), "first");
        assert_eq!(cache.get(pid).unwrap().service_name(), "second");
    }

    #[test]
    fn remove_then_set_restores_the_same_handle_with_no_previous_to_return() {
        let child = spawn_sleeper();
        let pid = child.id() as i32;
        let mut cache = SubProcessCache::new();
        cache.set(pid, SubProcess::new(pid, "sleeper", child));
        let handle = cache.remove(pid).unwrap();
        assert!(cache.set(pid, handle).is_none());
        assert_eq!(cache.get(pid).unwrap().service_name(), "sleeper");
    }

    #[test]
    fn remove_transfers_ownership_out() {
        let child = spawn_sleeper();
        let pid = child.id() as i32;
        let mut cache = SubProcessCache::new();
        cache.set(pid, SubProcess::new(pid, "sleeper", child));
        let removed = cache.remove(pid);
        assert!(removed.is_some());
        assert!(cache.get(pid).is_none());
    }
}
