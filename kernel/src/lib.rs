//! OspreyOS kernel
//!
//! The user-program execution layer of an instructional operating system
//! running on a simulated machine: a cooperative thread kernel with
//! semaphores, priority-inheriting locks, condition variables and
//! rendezvous ports; per-process address spaces with demand paging and
//! swap; and the system-call layer user programs trap into.
//!
//! The simulator is an ordinary host process. Build a [`Kernel`] with
//! [`KernelBuilder`], then hand [`Kernel::run`] a boot closure:
//!
//! ```no_run
//! use osprey_kernel::{process::creation, sched::thread, KernelBuilder};
//!
//! let kernel = KernelBuilder::new().filesystem_root("osprey-fs").build();
//! kernel.run(|k| {
//!     if let Ok(pid) = creation::exec(&k.arc(), "shell", "shell") {
//!         let tid = k.processes.get(pid.0 as i32).expect("just created");
//!         thread::join(k, tid);
//!     }
//!     k.interrupt.halt(k);
//! });
//! ```

pub mod bootstrap;
pub mod console;
pub mod error;
pub mod fs;
pub mod interrupt;
pub mod logger;
pub mod machine;
pub mod mm;
pub mod noff;
pub mod process;
pub mod sched;
pub mod stats;
pub mod sync;
pub mod syscall;
pub mod timer;
pub mod userland;
pub mod utils;

pub use bootstrap::{BootOptions, Kernel, KernelBuilder};
pub use error::{FsError, KernelError, KernelResult};
pub use mm::MemoryMode;
