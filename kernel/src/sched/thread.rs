//! Thread control blocks and the kernel-thread lifecycle
//!
//! Every kernel thread runs on a dedicated host thread, but the parker
//! handoff guarantees exactly one of them executes at a time: the simulated
//! CPU is a token passed from the outgoing thread to its successor. The
//! parker is this port's stand-in for the machine-level stack switch.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex as StdMutex};

use core::sync::atomic::{AtomicUsize, Ordering};

use log::debug;
use spin::Mutex;

use super::{scheduler, Tid, NUM_PRIORITIES};
use crate::bootstrap::Kernel;
use crate::fs::File;
use crate::interrupt::IntStatus;
use crate::machine::cpu::UserProgram;
use crate::machine::NUM_TOTAL_REGS;
use crate::mm::addrspace;
use crate::process::Pid;
use crate::sync::Semaphore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready,
    Running,
    Blocked,
    Finished,
}

/// One-permit parker: `unpark` grants the permit, `park` consumes it,
/// blocking until granted. Grants may arrive before the park.
struct Parker {
    permit: StdMutex<bool>,
    condvar: Condvar,
}

impl Parker {
    fn new() -> Self {
        Self {
            permit: StdMutex::new(false),
            condvar: Condvar::new(),
        }
    }

    fn park(&self) {
        let mut permit = self.permit.lock().expect("parker poisoned");
        while !*permit {
            permit = self.condvar.wait(permit).expect("parker poisoned");
        }
        *permit = false;
    }

    fn unpark(&self) {
        *self.permit.lock().expect("parker poisoned") = true;
        self.condvar.notify_one();
    }
}

/// Thread control block.
pub struct Thread {
    tid: Tid,
    name: String,
    priority: AtomicUsize,
    initial_priority: usize,
    state: Mutex<ThreadState>,
    parker: Parker,
    /// User-mode register file, saved across context switches.
    pub user_registers: Mutex<[i32; NUM_TOTAL_REGS]>,
    /// Owned address space, present only for user-program threads.
    space: Mutex<Option<Pid>>,
    /// Per-thread descriptor table. Descriptors 0 and 1 are the console and
    /// never appear here.
    pub files: Mutex<BTreeMap<i32, Box<dyn File>>>,
    exit_status: Mutex<Option<i32>>,
    /// V'd exactly once, when the thread finishes.
    pub join_sem: Semaphore,
    /// Attached instruction stream while running a user program.
    pub cpu: Mutex<Option<Box<dyn UserProgram>>>,
}

impl Thread {
    fn new(tid: Tid, name: &str, priority: usize) -> Self {
        assert!(priority < NUM_PRIORITIES, "priority out of range");
        Self {
            tid,
            name: name.to_owned(),
            priority: AtomicUsize::new(priority),
            initial_priority: priority,
            state: Mutex::new(ThreadState::Ready),
            parker: Parker::new(),
            user_registers: Mutex::new([0; NUM_TOTAL_REGS]),
            space: Mutex::new(None),
            files: Mutex::new(BTreeMap::new()),
            exit_status: Mutex::new(None),
            join_sem: Semaphore::new("thread join", 0),
            cpu: Mutex::new(None),
        }
    }

    pub fn tid(&self) -> Tid {
        self.tid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> usize {
        self.priority.load(Ordering::SeqCst)
    }

    /// Set the current priority (priority donation and its undo).
    pub fn set_priority(&self, priority: usize) {
        assert!(priority < NUM_PRIORITIES, "priority out of range");
        self.priority.store(priority, Ordering::SeqCst);
    }

    pub fn initial_priority(&self) -> usize {
        self.initial_priority
    }

    pub fn state(&self) -> ThreadState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: ThreadState) {
        *self.state.lock() = state;
    }

    pub fn is_finished(&self) -> bool {
        self.state() == ThreadState::Finished
    }

    pub(crate) fn park(&self) {
        self.parker.park();
    }

    pub(crate) fn unpark(&self) {
        self.parker.unpark();
    }

    pub fn space(&self) -> Option<Pid> {
        *self.space.lock()
    }

    pub(crate) fn set_space(&self, pid: Pid) {
        let previous = self.space.lock().replace(pid);
        assert!(previous.is_none(), "thread already owns an address space");
    }

    pub(crate) fn take_space(&self) -> Option<Pid> {
        self.space.lock().take()
    }

    pub fn exit_status(&self) -> Option<i32> {
        *self.exit_status.lock()
    }

    pub fn set_exit_status(&self, status: i32) {
        *self.exit_status.lock() = Some(status);
    }

    /// Install an open file under the smallest unused descriptor >= 2.
    pub fn add_file(&self, file: Box<dyn File>) -> i32 {
        let mut files = self.files.lock();
        let mut fd = 2;
        while files.contains_key(&fd) {
            fd += 1;
        }
        files.insert(fd, file);
        fd
    }

    /// Drop a descriptor, closing the file. Returns false if it was absent.
    pub fn remove_file(&self, fd: i32) -> bool {
        self.files.lock().remove(&fd).is_some()
    }
}

/// Arena of every thread created since boot. Control blocks are never
/// removed: a finished thread keeps its exit status so a late `Join`
/// observes it instead of a dangling id.
pub struct ThreadTable {
    threads: Mutex<Vec<Arc<Thread>>>,
}

impl ThreadTable {
    pub fn new() -> Self {
        Self {
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn create(&self, name: &str, priority: usize) -> Tid {
        let mut threads = self.threads.lock();
        let tid = Tid(threads.len());
        threads.push(Arc::new(Thread::new(tid, name, priority)));
        tid
    }

    pub fn get(&self, tid: Tid) -> Arc<Thread> {
        Arc::clone(
            self.threads
                .lock()
                .get(tid.0)
                .expect("thread id out of range"),
        )
    }

    /// True when some thread other than `except` is neither finished nor
    /// ready — used to tell a deadlock from a clean shutdown.
    pub(crate) fn any_blocked(&self, except: Tid) -> bool {
        self.threads.lock().iter().any(|t| {
            t.tid() != except && matches!(t.state(), ThreadState::Blocked | ThreadState::Running)
        })
    }
}

impl Default for ThreadTable {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Create a kernel thread and make it runnable. The body starts the first
/// time the scheduler picks the thread.
pub fn fork(
    kernel: &Arc<Kernel>,
    name: &str,
    priority: usize,
    body: impl FnOnce(&Kernel) + Send + 'static,
) -> Tid {
    let tid = kernel.threads.create(name, priority);
    fork_prepared(kernel, tid, Box::new(body));
    tid
}

/// Start a thread whose control block (and attached state) was prepared by
/// the caller — `Exec` attaches the instruction stream before this.
pub(crate) fn fork_prepared(
    kernel: &Arc<Kernel>,
    tid: Tid,
    body: Box<dyn FnOnce(&Kernel) + Send + 'static>,
) {
    let host = Arc::clone(kernel);
    let name = kernel.threads.get(tid).name().to_owned();
    std::thread::Builder::new()
        .name(name)
        .spawn(move || thread_main(host, tid, body, false))
        .expect("host thread spawn failed");

    let old = kernel.interrupt.set_level(kernel, IntStatus::Off);
    scheduler::ready_to_run(kernel, tid);
    kernel.interrupt.set_level(kernel, old);
}

/// Start the boot thread: it owns the CPU immediately instead of waiting to
/// be scheduled.
pub(crate) fn spawn_initial(
    kernel: &Arc<Kernel>,
    tid: Tid,
    body: Box<dyn FnOnce(&Kernel) + Send + 'static>,
) {
    let host = Arc::clone(kernel);
    let name = kernel.threads.get(tid).name().to_owned();
    kernel.threads.get(tid).set_state(ThreadState::Running);
    kernel.scheduler.set_current(tid);
    std::thread::Builder::new()
        .name(name)
        .spawn(move || thread_main(host, tid, body, true))
        .expect("host thread spawn failed");
}

fn thread_main(
    kernel: Arc<Kernel>,
    tid: Tid,
    body: Box<dyn FnOnce(&Kernel) + Send + 'static>,
    initial: bool,
) {
    if !initial {
        // Wait for the first dispatch, then run with interrupts on, the way
        // freshly forked threads start.
        kernel.threads.get(tid).park();
        kernel.interrupt.set_level(&kernel, IntStatus::On);
    }

    let result = catch_unwind(AssertUnwindSafe(|| {
        body(&kernel);
        finish(&kernel);
    }));
    if let Err(payload) = result {
        kernel.fail_run(payload);
    }
}

/// Await another thread's completion and return its exit status.
pub fn join(kernel: &Kernel, tid: Tid) -> i32 {
    let tcb = kernel.threads.get(tid);
    tcb.join_sem.p(kernel);
    tcb.exit_status().unwrap_or(0)
}

/// Tear the current thread down: wake its joiner, release the address
/// space, swap file, descriptors and argv, then give the CPU away for good.
pub(crate) fn finish(kernel: &Kernel) {
    kernel.interrupt.set_level(kernel, IntStatus::Off);
    let tcb = kernel.current_thread();
    debug!("thread '{}' finishing", tcb.name());

    tcb.join_sem.v(kernel);

    if let Some(pid) = tcb.take_space() {
        addrspace::destroy(kernel, pid);
        kernel.args.remove(pid);
    }
    tcb.files.lock().clear();
    tcb.cpu.lock().take();
    tcb.set_state(ThreadState::Finished);

    scheduler::relinquish(kernel);
    // The host thread unwinds from here; the control block stays behind.
}

/// Cooperatively give up the CPU.
pub fn yield_now(kernel: &Kernel) {
    let old = kernel.interrupt.set_level(kernel, IntStatus::Off);
    scheduler::yield_now(kernel);
    kernel.interrupt.set_level(kernel, old);
}

#[cfg(test)]
mod tests {
    use super::Parker;
    use std::sync::Arc;

    #[test]
    fn parker_grant_before_park_does_not_block() {
        let parker = Parker::new();
        parker.unpark();
        // The permit was banked; this returns immediately.
        parker.park();
    }

    #[test]
    fn parker_hands_off_between_host_threads() {
        let parker = Arc::new(Parker::new());
        let remote = Arc::clone(&parker);
        let handle = std::thread::spawn(move || {
            remote.park();
            true
        });
        parker.unpark();
        assert!(handle.join().expect("parked thread panicked"));
    }

    #[test]
    fn parker_permit_is_consumed() {
        let parker = Arc::new(Parker::new());
        parker.unpark();
        parker.park();
        // A second park must wait for a fresh grant.
        let remote = Arc::clone(&parker);
        let handle = std::thread::spawn(move || remote.park());
        parker.unpark();
        handle.join().expect("parked thread panicked");
    }
}
