//! Mutex with priority inheritance

use spin::Mutex;

use super::Semaphore;
use crate::bootstrap::Kernel;
use crate::sched::{scheduler, Tid};

/// Mutual exclusion lock. An acquirer that finds the lock held by a
/// lower-priority thread donates its priority to the holder until release,
/// so a middle-priority thread cannot starve the holder (priority
/// inversion). Donation is a single hop: holders that are themselves
/// blocked on other locks are not walked.
pub struct Lock {
    name: &'static str,
    /// The lock proper.
    sem: Semaphore,
    /// Serializes the donation step without keeping interrupts off across
    /// the blocking `p` on `sem`.
    aux: Semaphore,
    owner: Mutex<Option<Tid>>,
}

impl Lock {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            sem: Semaphore::new("lock semaphore", 1),
            aux: Semaphore::new("lock aux semaphore", 1),
            owner: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_held_by_current_thread(&self, kernel: &Kernel) -> bool {
        *self.owner.lock() == Some(kernel.scheduler.current())
    }

    pub fn acquire(&self, kernel: &Kernel) {
        assert!(
            !self.is_held_by_current_thread(kernel),
            "lock '{}' re-acquired by its owner",
            self.name
        );

        self.aux.p(kernel);

        if let Some(owner) = *self.owner.lock() {
            let owner_tcb = kernel.threads.get(owner);
            let caller_priority = kernel.current_thread().priority();
            let owner_priority = owner_tcb.priority();
            if owner_priority > caller_priority {
                owner_tcb.set_priority(caller_priority);
                scheduler::move_thread(kernel, owner, owner_priority, caller_priority);
            }
        }

        self.aux.v(kernel);

        self.sem.p(kernel);
        *self.owner.lock() = Some(kernel.scheduler.current());
    }

    pub fn release(&self, kernel: &Kernel) {
        assert!(
            self.is_held_by_current_thread(kernel),
            "lock '{}' released by a non-owner",
            self.name
        );

        // Undo any donation received while holding the lock.
        let tcb = kernel.current_thread();
        let current_priority = tcb.priority();
        if current_priority != tcb.initial_priority() {
            tcb.set_priority(tcb.initial_priority());
            scheduler::move_thread(
                kernel,
                tcb.tid(),
                current_priority,
                tcb.initial_priority(),
            );
        }

        *self.owner.lock() = None;
        self.sem.v(kernel);
    }
}
