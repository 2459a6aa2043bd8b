//! Counting semaphore

use std::collections::VecDeque;

use spin::Mutex;

use crate::bootstrap::Kernel;
use crate::interrupt::IntStatus;
use crate::sched::{scheduler, Tid};

struct SemInner {
    value: usize,
    waiters: VecDeque<Tid>,
}

/// Counting semaphore with a FIFO waiter queue.
pub struct Semaphore {
    name: &'static str,
    inner: Mutex<SemInner>,
}

impl Semaphore {
    pub fn new(name: &'static str, initial: usize) -> Self {
        Self {
            name,
            inner: Mutex::new(SemInner {
                value: initial,
                waiters: VecDeque::new(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Current value, for inspection at quiescent points.
    pub fn value(&self) -> usize {
        self.inner.lock().value
    }

    /// Wait until the value is positive, then take one unit.
    ///
    /// A woken waiter loops back to re-check: `v` hands the value over but
    /// another `p` may be scheduled first and consume it.
    pub fn p(&self, kernel: &Kernel) {
        let old = kernel.interrupt.set_level(kernel, IntStatus::Off);

        loop {
            let mut inner = self.inner.lock();
            if inner.value == 0 {
                inner.waiters.push_back(kernel.scheduler.current());
                drop(inner);
                scheduler::sleep(kernel);
            } else {
                inner.value -= 1;
                break;
            }
        }

        kernel.interrupt.set_level(kernel, old);
    }

    /// Add one unit, making the head waiter runnable if there is one.
    pub fn v(&self, kernel: &Kernel) {
        let old = kernel.interrupt.set_level(kernel, IntStatus::Off);

        {
            let mut inner = self.inner.lock();
            if let Some(waiter) = inner.waiters.pop_front() {
                scheduler::ready_to_run(kernel, waiter);
            }
            inner.value += 1;
        }

        kernel.interrupt.set_level(kernel, old);
    }
}
