//! Rendezvous port

use spin::Mutex;

use super::{Condition, Lock};
use crate::bootstrap::Kernel;

struct Slot {
    message: i32,
    empty: bool,
}

/// Unbuffered single-slot channel: `send` and `receive` meet at the slot.
/// Both sides loop on their condition, Mesa style, so spurious wakeups and
/// overtaking peers are harmless.
pub struct Port {
    lock: Lock,
    sender_ready: Condition,
    receiver_ready: Condition,
    slot: Mutex<Slot>,
}

impl Port {
    pub fn new() -> Self {
        Self {
            lock: Lock::new("port lock"),
            sender_ready: Condition::new("port sender ready"),
            receiver_ready: Condition::new("port receiver ready"),
            slot: Mutex::new(Slot {
                message: 0,
                empty: true,
            }),
        }
    }

    pub fn send(&self, kernel: &Kernel, message: i32) {
        self.lock.acquire(kernel);

        while !self.slot.lock().empty {
            self.sender_ready.wait(kernel, &self.lock);
        }
        {
            let mut slot = self.slot.lock();
            slot.message = message;
            slot.empty = false;
        }
        self.receiver_ready.signal(kernel);

        self.lock.release(kernel);
    }

    pub fn receive(&self, kernel: &Kernel) -> i32 {
        self.lock.acquire(kernel);

        while self.slot.lock().empty {
            self.receiver_ready.wait(kernel, &self.lock);
        }
        let message = {
            let mut slot = self.slot.lock();
            slot.empty = true;
            slot.message
        };
        self.sender_ready.signal(kernel);

        self.lock.release(kernel);
        message
    }
}

impl Default for Port {
    fn default() -> Self {
        Self::new()
    }
}
