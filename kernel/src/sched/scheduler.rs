//! Core scheduler implementation
//!
//! All entry points assume interrupts are disabled; they inspect and mutate
//! the ready queue, then hand the CPU over through the thread parkers.

use log::{trace, warn};
use spin::Mutex;

use super::queue::ReadyQueue;
use super::thread::ThreadState;
use super::Tid;
use crate::bootstrap::Kernel;
use crate::mm::addrspace;
use crate::stats::Statistics;

/// Scheduler state: the running thread and the ready queue.
pub struct Scheduler {
    current: Mutex<Tid>,
    ready: Mutex<ReadyQueue>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(Tid(0)),
            ready: Mutex::new(ReadyQueue::new()),
        }
    }

    /// The thread holding the CPU.
    pub fn current(&self) -> Tid {
        *self.current.lock()
    }

    pub(crate) fn set_current(&self, tid: Tid) {
        *self.current.lock() = tid;
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Mark a thread runnable and queue it at its current priority.
pub fn ready_to_run(kernel: &Kernel, tid: Tid) {
    debug_assert!(
        !kernel.interrupt.is_enabled(),
        "ready_to_run requires interrupts disabled"
    );
    let tcb = kernel.threads.get(tid);
    tcb.set_state(ThreadState::Ready);
    kernel.scheduler.ready.lock().enqueue(tid, tcb.priority());
}

/// Pop the best runnable thread, if any.
pub fn find_next_to_run(kernel: &Kernel) -> Option<Tid> {
    kernel.scheduler.ready.lock().dequeue()
}

/// Requeue a ready thread after its priority changed: remove it from the
/// level it was queued at and append it under the new one. Threads that are
/// running or blocked are left alone — their new priority takes effect when
/// they next become ready.
pub fn move_thread(kernel: &Kernel, tid: Tid, old_priority: usize, new_priority: usize) {
    let mut ready = kernel.scheduler.ready.lock();
    if ready.remove(tid, old_priority) {
        trace!(
            "moved thread {:?} from priority {} to {}",
            tid,
            old_priority,
            new_priority
        );
        ready.enqueue(tid, new_priority);
    }
}

/// Block the current thread. The caller has already queued it on whatever
/// waiter list it is sleeping on; interrupts must be off. If nothing is
/// runnable, simulated time idles forward; if nothing is pending either,
/// the machine is quiescent and halts.
pub fn sleep(kernel: &Kernel) {
    debug_assert!(
        !kernel.interrupt.is_enabled(),
        "sleep requires interrupts disabled"
    );
    let current = kernel.scheduler.current();
    let tcb = kernel.threads.get(current);
    tcb.set_state(ThreadState::Blocked);
    trace!("thread '{}' sleeping", tcb.name());

    loop {
        if kernel.interrupt.is_halted() {
            park_forever(kernel, current);
        }
        if let Some(next) = find_next_to_run(kernel) {
            switch_to(kernel, next);
            return;
        }
        if !kernel.interrupt.idle(kernel) {
            quiesce(kernel);
            park_forever(kernel, current);
        }
    }
}

/// Give up the CPU but stay runnable.
pub(crate) fn yield_now(kernel: &Kernel) {
    debug_assert!(
        !kernel.interrupt.is_enabled(),
        "yield requires interrupts disabled"
    );
    let current = kernel.scheduler.current();
    ready_to_run(kernel, current);
    let next = find_next_to_run(kernel).expect("ready queue empty after self-enqueue");
    switch_to(kernel, next);
}

/// The current thread is done: dispatch a successor or wind the machine
/// down, then return so the host thread can exit.
pub(crate) fn relinquish(kernel: &Kernel) {
    loop {
        if kernel.interrupt.is_halted() {
            return;
        }
        if let Some(next) = find_next_to_run(kernel) {
            dispatch(kernel, next);
            return;
        }
        if !kernel.interrupt.idle(kernel) {
            quiesce(kernel);
            return;
        }
    }
}

fn switch_to(kernel: &Kernel, next: Tid) {
    let current = kernel.scheduler.current();
    if next == current {
        kernel.threads.get(current).set_state(ThreadState::Running);
        return;
    }
    dispatch(kernel, next);
    kernel.threads.get(current).park();
    // Rescheduled; interrupts are still off, exactly as when we left.
}

/// Hand the CPU to `next`: save the outgoing machine context, install the
/// incoming one, and wake its host thread. The caller must not touch kernel
/// state afterwards (it either parks or exits).
fn dispatch(kernel: &Kernel, next: Tid) {
    let current = kernel.scheduler.current();
    debug_assert_ne!(current, next, "dispatching the running thread");
    Statistics::bump(&kernel.stats.context_switches);

    let old_tcb = kernel.threads.get(current);
    let new_tcb = kernel.threads.get(next);
    trace!("context switch '{}' -> '{}'", old_tcb.name(), new_tcb.name());

    *old_tcb.user_registers.lock() = kernel.machine.snapshot_registers();
    if let Some(pid) = old_tcb.space() {
        addrspace::save_state(kernel, pid);
    }

    kernel.machine.load_registers(&new_tcb.user_registers.lock());
    match new_tcb.space() {
        Some(pid) => addrspace::restore_state(kernel, pid),
        None => kernel.machine.set_active_space(None),
    }

    new_tcb.set_state(ThreadState::Running);
    kernel.scheduler.set_current(next);
    new_tcb.unpark();
}

/// Nothing to run and nothing pending: end the simulation.
fn quiesce(kernel: &Kernel) {
    let current = kernel.scheduler.current();
    if kernel.threads.any_blocked(current) {
        warn!("no runnable threads and no pending interrupts; possible deadlock");
    } else {
        trace!("all threads finished; machine idle");
    }
    kernel.interrupt.halt(kernel);
}

fn park_forever(kernel: &Kernel, tid: Tid) -> ! {
    let tcb = kernel.threads.get(tid);
    loop {
        tcb.park();
    }
}
