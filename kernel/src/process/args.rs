//! Per-process argument store
//!
//! `Exec` tokenizes the caller's argument string and deposits it here; the
//! child reads it back through `GetNArgs`/`GetArgN`. Freed when the process
//! finishes.

use std::collections::BTreeMap;

use spin::Mutex;

use super::Pid;

/// Tokenize an argument string the way the exec path always has: split on
/// single spaces. Consecutive spaces yield empty tokens and the empty
/// string yields one empty token; quoting is not interpreted.
pub fn tokenize(argv: &str) -> Vec<String> {
    argv.split(' ').map(str::to_owned).collect()
}

pub struct ArgTable {
    inner: Mutex<BTreeMap<Pid, Vec<String>>>,
}

impl ArgTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn set(&self, pid: Pid, args: Vec<String>) {
        self.inner.lock().insert(pid, args);
    }

    pub fn count(&self, pid: Pid) -> usize {
        self.inner.lock().get(&pid).map_or(0, Vec::len)
    }

    pub fn get(&self, pid: Pid, index: usize) -> Option<String> {
        self.inner.lock().get(&pid)?.get(index).cloned()
    }

    pub fn remove(&self, pid: Pid) {
        self.inner.lock().remove(&pid);
    }
}

impl Default for ArgTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_single_spaces() {
        assert_eq!(tokenize("cat t"), vec!["cat", "t"]);
        assert_eq!(tokenize("cp a b"), vec!["cp", "a", "b"]);
    }

    #[test]
    fn consecutive_spaces_keep_empty_tokens() {
        assert_eq!(tokenize("a  b"), vec!["a", "", "b"]);
    }

    #[test]
    fn empty_string_is_one_empty_token() {
        assert_eq!(tokenize(""), vec![""]);
    }

    #[test]
    fn store_round_trip() {
        let table = ArgTable::new();
        table.set(Pid(3), tokenize("sh -c ls"));
        assert_eq!(table.count(Pid(3)), 3);
        assert_eq!(table.get(Pid(3), 1).as_deref(), Some("-c"));
        assert_eq!(table.get(Pid(3), 9), None);
        table.remove(Pid(3));
        assert_eq!(table.count(Pid(3)), 0);
    }
}
