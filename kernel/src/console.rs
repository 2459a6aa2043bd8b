//! Synchronized console
//!
//! Turns the interrupt-driven console device into blocking, one-at-a-time
//! `get_char`/`put_char`. A lock per direction serializes callers; a
//! zero-valued semaphore per direction is V'd by the device's completion
//! interrupts and P'd by the blocked caller.

use std::io::{Read, Write};
use std::sync::Arc;

use crate::bootstrap::Kernel;
use crate::machine::console::Console;
use crate::stats::Statistics;
use crate::sync::{Lock, Semaphore};

pub struct SynchConsole {
    device: Arc<Console>,
    read_lock: Lock,
    write_lock: Lock,
    read_sem: Arc<Semaphore>,
    write_sem: Arc<Semaphore>,
}

impl SynchConsole {
    pub fn new(source: Box<dyn Read + Send>, sink: Box<dyn Write + Send>) -> Self {
        let read_sem = Arc::new(Semaphore::new("console read avail", 0));
        let write_sem = Arc::new(Semaphore::new("console write done", 0));

        let on_read = Arc::clone(&read_sem);
        let on_write = Arc::clone(&write_sem);
        let device = Console::new(
            source,
            sink,
            Box::new(move |kernel| on_read.v(kernel)),
            Box::new(move |kernel| on_write.v(kernel)),
        );

        Self {
            device,
            read_lock: Lock::new("console read lock"),
            write_lock: Lock::new("console write lock"),
            read_sem,
            write_sem,
        }
    }

    pub(crate) fn start(&self, kernel: &Kernel) {
        self.device.start(kernel);
    }

    /// Block until the next input character. `None` once input is
    /// exhausted, so readers can tell end of input from quiet spells.
    pub fn get_char(&self, kernel: &Kernel) -> Option<u8> {
        self.read_lock.acquire(kernel);
        let ch = if self.device.at_eof() {
            None
        } else {
            self.read_sem.p(kernel);
            self.device.get_char()
        };
        self.read_lock.release(kernel);

        if ch.is_some() {
            Statistics::bump(&kernel.stats.console_chars_read);
        }
        ch
    }

    /// Block until the device has accepted and transmitted `ch`.
    pub fn put_char(&self, kernel: &Kernel, ch: u8) {
        self.write_lock.acquire(kernel);
        self.device.put_char(kernel, ch);
        self.write_sem.p(kernel);
        self.write_lock.release(kernel);

        Statistics::bump(&kernel.stats.console_chars_written);
    }
}
