//! Thread synchronization primitives
//!
//! Semaphores, priority-inheriting locks, condition variables and
//! rendezvous ports. All of them derive atomicity from the interrupt-disable
//! primitive: while interrupts are off no context switch can occur, so the
//! running thread owns every check-then-act sequence it performs. Because
//! some operations are reached with interrupts already disabled (`v` from an
//! interrupt handler, for one), every critical section restores the previous
//! level instead of blindly re-enabling.

mod condition;
mod lock;
mod port;
mod semaphore;

pub use condition::Condition;
pub use lock::Lock;
pub use port::Port;
pub use semaphore::Semaphore;
