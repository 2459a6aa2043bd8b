//! Core map and the resident-page FIFO
//!
//! The reverse mapping from physical frame to (owning address space,
//! virtual page), plus the FIFO of resident frames that doubles as the
//! eviction queue. Both live under one mutex so their agreement — a frame
//! is in the FIFO exactly when it has an owner — cannot tear.

use std::collections::VecDeque;

use spin::Mutex;

use crate::process::Pid;

/// Reverse-map entry for one frame. The owner is a pid, not a pointer:
/// address spaces live in an arena keyed by pid, which breaks the cycle a
/// back-reference would create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreMapEntry {
    pub owner: Option<Pid>,
    pub vpn: usize,
}

struct Inner {
    entries: Vec<CoreMapEntry>,
    loaded: VecDeque<usize>,
}

pub struct CoreMap {
    inner: Mutex<Inner>,
}

impl CoreMap {
    pub fn new(frames: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: vec![CoreMapEntry { owner: None, vpn: 0 }; frames],
                loaded: VecDeque::new(),
            }),
        }
    }

    /// Record `frame` as backing `vpn` of `owner` and append it to the
    /// eviction FIFO.
    pub fn assign(&self, frame: usize, owner: Pid, vpn: usize) {
        let mut inner = self.inner.lock();
        let entry = &mut inner.entries[frame];
        assert!(entry.owner.is_none(), "frame {} already owned", frame);
        *entry = CoreMapEntry {
            owner: Some(owner),
            vpn,
        };
        inner.loaded.push_back(frame);
    }

    /// Forget a frame's owner and drop it from the FIFO if still queued.
    pub fn clear(&self, frame: usize) {
        let mut inner = self.inner.lock();
        inner.entries[frame] = CoreMapEntry { owner: None, vpn: 0 };
        inner.loaded.retain(|&f| f != frame);
    }

    pub fn owner_of(&self, frame: usize) -> Option<(Pid, usize)> {
        let inner = self.inner.lock();
        inner.entries[frame].owner.map(|pid| (pid, inner.entries[frame].vpn))
    }

    /// Pop the oldest resident frame — the eviction victim. Its core-map
    /// entry is left in place for the caller to resolve the owner.
    pub fn pop_oldest(&self) -> Option<usize> {
        self.inner.lock().loaded.pop_front()
    }

    /// Snapshot for invariant checking.
    pub fn snapshot(&self) -> (Vec<CoreMapEntry>, Vec<usize>) {
        let inner = self.inner.lock();
        (inner.entries.clone(), inner.loaded.iter().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_then_pop_in_fifo_order() {
        let map = CoreMap::new(4);
        map.assign(2, Pid(1), 0);
        map.assign(0, Pid(1), 1);
        map.assign(3, Pid(2), 0);
        assert_eq!(map.pop_oldest(), Some(2));
        assert_eq!(map.pop_oldest(), Some(0));
        assert_eq!(map.pop_oldest(), Some(3));
        assert_eq!(map.pop_oldest(), None);
    }

    #[test]
    fn clear_removes_from_fifo() {
        let map = CoreMap::new(2);
        map.assign(0, Pid(1), 5);
        map.assign(1, Pid(1), 6);
        map.clear(0);
        assert_eq!(map.owner_of(0), None);
        assert_eq!(map.pop_oldest(), Some(1));
        assert_eq!(map.pop_oldest(), None);
    }

    #[test]
    #[should_panic(expected = "already owned")]
    fn double_assign_is_an_invariant_violation() {
        let map = CoreMap::new(1);
        map.assign(0, Pid(1), 0);
        map.assign(0, Pid(2), 0);
    }
}
