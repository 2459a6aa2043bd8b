//! Global process table
//!
//! A bounded arena mapping pids to threads. Slots are handed out
//! first-free and stay occupied after a process exits, so a late `Join`
//! resolves to the finished thread instead of a dangling pid.

use spin::Mutex;

use super::{Pid, MAX_PROCESSES};
use crate::sched::Tid;

pub struct ProcessTable {
    slots: Mutex<[Option<Tid>; MAX_PROCESSES]>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new([None; MAX_PROCESSES]),
        }
    }

    /// Register a thread in the first free slot. `None` when the table is
    /// full.
    pub fn add(&self, tid: Tid) -> Option<Pid> {
        let mut slots = self.slots.lock();
        let free = slots.iter().position(|slot| slot.is_none())?;
        slots[free] = Some(tid);
        Some(Pid(free))
    }

    /// Look a pid up, tolerating out-of-range values from user code.
    pub fn get(&self, pid: i32) -> Option<Tid> {
        if pid < 0 || pid as usize >= MAX_PROCESSES {
            return None;
        }
        self.slots.lock()[pid as usize]
    }

    /// Reverse lookup. Linear: the table is small and this path is cold.
    pub fn pid_of(&self, tid: Tid) -> Option<Pid> {
        self.slots
            .lock()
            .iter()
            .position(|&slot| slot == Some(tid))
            .map(Pid)
    }

    pub fn remove(&self, pid: Pid) {
        self.slots.lock()[pid.0] = None;
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_first_free() {
        let table = ProcessTable::new();
        assert_eq!(table.add(Tid(10)), Some(Pid(0)));
        assert_eq!(table.add(Tid(11)), Some(Pid(1)));
        table.remove(Pid(0));
        assert_eq!(table.add(Tid(12)), Some(Pid(0)));
    }

    #[test]
    fn lookup_and_reverse_lookup() {
        let table = ProcessTable::new();
        let pid = table.add(Tid(3)).unwrap();
        assert_eq!(table.get(pid.0 as i32), Some(Tid(3)));
        assert_eq!(table.pid_of(Tid(3)), Some(pid));
        assert_eq!(table.pid_of(Tid(99)), None);
    }

    #[test]
    fn bad_pids_resolve_to_none() {
        let table = ProcessTable::new();
        assert_eq!(table.get(-1), None);
        assert_eq!(table.get(MAX_PROCESSES as i32), None);
        assert_eq!(table.get(0), None);
    }

    #[test]
    fn fills_up() {
        let table = ProcessTable::new();
        for i in 0..MAX_PROCESSES {
            assert!(table.add(Tid(i)).is_some());
        }
        assert_eq!(table.add(Tid(9999)), None);
    }
}
