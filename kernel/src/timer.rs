//! Preemption timer device
//!
//! Rearms itself every `TIMER_TICKS` of simulated time and requests a yield,
//! giving equal-priority threads round-robin slices. Off by default; the
//! kernel is otherwise fully cooperative.

use log::trace;

use crate::bootstrap::Kernel;

/// Ticks between timer interrupts.
pub const TIMER_TICKS: u64 = 100;

/// Arm the timer chain. Called once at kernel start when configured.
pub fn start(kernel: &Kernel) {
    kernel.interrupt.schedule(TIMER_TICKS, Box::new(tick));
}

fn tick(kernel: &Kernel) {
    if kernel.interrupt.is_halted() {
        return;
    }
    trace!("timer interrupt at tick {}", kernel.interrupt.now());
    kernel.interrupt.request_yield();
    kernel.interrupt.schedule(TIMER_TICKS, Box::new(tick));
}
