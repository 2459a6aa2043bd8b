//! Condition variables

use std::collections::VecDeque;
use std::sync::Arc;

use spin::Mutex;

use super::{Lock, Semaphore};
use crate::bootstrap::Kernel;

/// Mesa-style condition variable. There is no value field: each waiter
/// brings its own zero-valued semaphore, queued FIFO. A signalled waiter is
/// merely made runnable — it must re-check its predicate under the lock.
pub struct Condition {
    name: &'static str,
    waiters: Mutex<VecDeque<Arc<Semaphore>>>,
}

impl Condition {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Release `lock`, sleep until signalled, re-acquire `lock`.
    pub fn wait(&self, kernel: &Kernel, lock: &Lock) {
        let sem = Arc::new(Semaphore::new("condition waiter", 0));
        self.waiters.lock().push_back(Arc::clone(&sem));

        lock.release(kernel);
        sem.p(kernel);
        lock.acquire(kernel);
    }

    /// Wake the longest-waiting thread, if any.
    pub fn signal(&self, kernel: &Kernel) {
        let head = self.waiters.lock().pop_front();
        if let Some(sem) = head {
            sem.v(kernel);
        }
    }

    /// Wake every waiter, in arrival order.
    pub fn broadcast(&self, kernel: &Kernel) {
        let drained: Vec<_> = self.waiters.lock().drain(..).collect();
        for sem in drained {
            sem.v(kernel);
        }
    }
}
