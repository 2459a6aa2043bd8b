//! Kernel performance counters
//!
//! Plain atomic counters bumped from hot paths and summarized once when the
//! machine halts.

use core::sync::atomic::{AtomicU64, Ordering};

use log::info;

/// System-wide counters. All increments are `Relaxed`: the simulator is
/// effectively single-threaded and the numbers are diagnostic only.
#[derive(Default)]
pub struct Statistics {
    pub user_ticks: AtomicU64,
    pub system_ticks: AtomicU64,
    pub idle_ticks: AtomicU64,
    pub context_switches: AtomicU64,
    pub syscalls: AtomicU64,
    pub page_faults: AtomicU64,
    pub pages_loaded: AtomicU64,
    pub pages_swapped_in: AtomicU64,
    pub pages_swapped_out: AtomicU64,
    pub console_chars_read: AtomicU64,
    pub console_chars_written: AtomicU64,
}

impl Statistics {
    pub const fn new() -> Self {
        Self {
            user_ticks: AtomicU64::new(0),
            system_ticks: AtomicU64::new(0),
            idle_ticks: AtomicU64::new(0),
            context_switches: AtomicU64::new(0),
            syscalls: AtomicU64::new(0),
            page_faults: AtomicU64::new(0),
            pages_loaded: AtomicU64::new(0),
            pages_swapped_in: AtomicU64::new(0),
            pages_swapped_out: AtomicU64::new(0),
            console_chars_read: AtomicU64::new(0),
            console_chars_written: AtomicU64::new(0),
        }
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Log the final tally. Called once from the halt path.
    pub fn log_summary(&self) {
        info!(
            "ticks: user {}, system {}, idle {}",
            Self::get(&self.user_ticks),
            Self::get(&self.system_ticks),
            Self::get(&self.idle_ticks),
        );
        info!(
            "switches {}, syscalls {}, page faults {}",
            Self::get(&self.context_switches),
            Self::get(&self.syscalls),
            Self::get(&self.page_faults),
        );
        info!(
            "pages loaded {}, swapped in {}, swapped out {}",
            Self::get(&self.pages_loaded),
            Self::get(&self.pages_swapped_in),
            Self::get(&self.pages_swapped_out),
        );
        info!(
            "console: {} chars read, {} chars written",
            Self::get(&self.console_chars_read),
            Self::get(&self.console_chars_written),
        );
    }
}
