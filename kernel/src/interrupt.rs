//! Interrupt controller and simulated clock
//!
//! On this uniprocessor, disabling interrupts is the atomicity primitive:
//! while they are off no timer can preempt the running thread, so any
//! read-modify-write of kernel state bracketed by `set_level` is atomic.
//! Critical sections always restore the *previous* level rather than
//! re-enabling, because some paths (a `v` from inside an interrupt handler,
//! for one) run with interrupts already off.
//!
//! The controller also owns simulated time: a tick counter and a queue of
//! pending device interrupts. Time advances when user instructions retire,
//! when interrupts are re-enabled (one system tick), and when the machine is
//! idle with device work outstanding.

use std::collections::BinaryHeap;

use core::cmp::Ordering as CmpOrdering;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::{debug, info};
use spin::Mutex;

use crate::bootstrap::Kernel;
use crate::sched::scheduler;
use crate::stats::Statistics;

/// Simulated time consumed by re-enabling interrupts in kernel mode.
pub const SYSTEM_TICK: u64 = 10;

/// Interrupt-enable level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntStatus {
    Off,
    On,
}

type Handler = Box<dyn FnOnce(&Kernel) + Send>;

struct Pending {
    when: u64,
    seq: u64,
    handler: Option<Handler>,
}

// BinaryHeap is a max-heap; order pending interrupts so the earliest due
// (FIFO among equals) surfaces first.
impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.when == other.when && self.seq == other.seq
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (self.when, self.seq).cmp(&(other.when, other.seq)).reverse()
    }
}

pub struct Interrupt {
    enabled: AtomicBool,
    ticks: AtomicU64,
    seq: AtomicU64,
    pending: Mutex<BinaryHeap<Pending>>,
    yield_pending: AtomicBool,
    in_handler: AtomicBool,
    halted: AtomicBool,
}

impl Interrupt {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            ticks: AtomicU64::new(0),
            seq: AtomicU64::new(0),
            pending: Mutex::new(BinaryHeap::new()),
            yield_pending: AtomicBool::new(false),
            in_handler: AtomicBool::new(false),
            halted: AtomicBool::new(false),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn level(&self) -> IntStatus {
        if self.is_enabled() {
            IntStatus::On
        } else {
            IntStatus::Off
        }
    }

    /// Current simulated time in ticks.
    pub fn now(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Change the interrupt level, returning the previous one. Re-enabling
    /// advances simulated time by one system tick, which is when pending
    /// device interrupts (and a requested preemption) take effect.
    pub fn set_level(&self, kernel: &Kernel, level: IntStatus) -> IntStatus {
        let enable = matches!(level, IntStatus::On);
        let was = self.enabled.swap(enable, Ordering::SeqCst);
        let old = if was { IntStatus::On } else { IntStatus::Off };

        if enable && !was && !self.in_handler.load(Ordering::SeqCst) {
            Statistics::add(&kernel.stats.system_ticks, SYSTEM_TICK);
            self.one_tick(kernel, SYSTEM_TICK);
        }
        old
    }

    /// Queue a device interrupt `delay` ticks from now. A zero delay is
    /// rounded up: a handler never runs inside the call that scheduled it.
    pub fn schedule(&self, delay: u64, handler: Handler) {
        let when = self.now() + delay.max(1);
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().push(Pending {
            when,
            seq,
            handler: Some(handler),
        });
    }

    /// Advance simulated time and fire whatever came due. Honors a pending
    /// preemption request afterwards, when interrupts are enabled.
    pub fn one_tick(&self, kernel: &Kernel, ticks: u64) {
        self.ticks.fetch_add(ticks, Ordering::SeqCst);
        self.check_due(kernel);

        if self.is_enabled()
            && !self.in_handler.load(Ordering::SeqCst)
            && self.yield_pending.swap(false, Ordering::SeqCst)
        {
            let old = self.set_level(kernel, IntStatus::Off);
            scheduler::yield_now(kernel);
            self.set_level(kernel, old);
        }
    }

    /// Run every pending handler whose time has come. Handlers run with
    /// interrupts forced off.
    fn check_due(&self, kernel: &Kernel) {
        let now = self.now();
        let due: Vec<Handler> = {
            let mut pending = self.pending.lock();
            let mut due = Vec::new();
            while pending.peek().is_some_and(|p| p.when <= now) {
                let mut entry = pending.pop().expect("peeked entry vanished");
                due.push(entry.handler.take().expect("pending interrupt re-fired"));
            }
            due
        };

        if due.is_empty() {
            return;
        }

        let was_enabled = self.enabled.swap(false, Ordering::SeqCst);
        self.in_handler.store(true, Ordering::SeqCst);
        for handler in due {
            handler(kernel);
        }
        self.in_handler.store(false, Ordering::SeqCst);
        self.enabled.store(was_enabled, Ordering::SeqCst);
    }

    /// Nothing is runnable: jump the clock to the next pending interrupt and
    /// fire it. Returns false when the queue is empty — the machine is
    /// quiescent and the simulation should end.
    pub fn idle(&self, kernel: &Kernel) -> bool {
        let next_due = self.pending.lock().peek().map(|p| p.when);
        let Some(when) = next_due else {
            return false;
        };

        let now = self.now();
        if when > now {
            Statistics::add(&kernel.stats.idle_ticks, when - now);
            self.ticks.store(when, Ordering::SeqCst);
        }
        self.check_due(kernel);
        // There is no running thread to preempt while idle.
        self.yield_pending.store(false, Ordering::SeqCst);
        true
    }

    /// Ask the running thread to yield once interrupts come back on.
    pub fn request_yield(&self) {
        self.yield_pending.store(true, Ordering::SeqCst);
    }

    /// Stop the simulation. Idempotent; the first call logs the final
    /// statistics and releases `Kernel::run`.
    pub fn halt(&self, kernel: &Kernel) {
        if !self.halted.swap(true, Ordering::SeqCst) {
            info!("machine halting at tick {}", self.now());
            kernel.stats.log_summary();
            kernel.finish_run();
        } else {
            debug!("halt requested again; already halting");
        }
    }

    /// Stop without statistics or run-state side effects; the panic path
    /// uses this before publishing the failure itself.
    pub(crate) fn mark_halted(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}
