//! Process creation
//!
//! The kernel side of `Exec`, also used to start the first program at boot.
//! `exec` validates the request, allocates the pid and argument vector and
//! forks the child; the child itself runs `prepare_process`, which builds
//! the address space and drops into user mode.

use std::sync::Arc;

use log::{debug, error, warn};

use super::args;
use super::Pid;
use crate::bootstrap::Kernel;
use crate::error::{FsError, KernelError, KernelResult};
use crate::machine;
use crate::mm::addrspace::{self, AddrSpace};
use crate::sched::{thread, DEFAULT_PRIORITY};

/// Launch `name` as a new process with the given argument string.
///
/// Fails (surfaced to user code as -1) when the executable cannot be
/// opened, no simulated instruction stream is registered for it, or the
/// process table is full. The child finishes with status -1 if its image
/// later turns out to be unloadable.
pub fn exec(kernel: &Arc<Kernel>, name: &str, argv: &str) -> KernelResult<Pid> {
    // Probe the executable now so the failure lands in the caller.
    let probe = kernel
        .fs
        .open(name)
        .ok_or(KernelError::FsError(FsError::NotFound))?;
    drop(probe);

    let program = kernel.instantiate_program(name).ok_or_else(|| {
        warn!("no instruction stream registered for executable {:?}", name);
        KernelError::InvalidExecutable {
            reason: "no registered instruction stream",
        }
    })?;

    let tid = kernel.threads.create(name, DEFAULT_PRIORITY);
    let pid = kernel
        .processes
        .add(tid)
        .ok_or(KernelError::ResourceExhausted {
            resource: "process table",
        })?;

    kernel.args.set(pid, args::tokenize(argv));
    *kernel.threads.get(tid).cpu.lock() = Some(program);

    debug!("exec {:?} as pid {} (args {:?})", name, pid, argv);
    let filename = name.to_owned();
    thread::fork_prepared(
        kernel,
        tid,
        Box::new(move |k| prepare_process(k, &filename)),
    );
    Ok(pid)
}

/// Entry point of every user-program thread: open the image, build and
/// attach the address space, set up registers and run until the program
/// exits or the machine halts.
pub fn prepare_process(kernel: &Kernel, filename: &str) {
    let tcb = kernel.current_thread();
    let pid = kernel
        .processes
        .pid_of(tcb.tid())
        .expect("user thread missing from the process table");

    let Some(executable) = kernel.fs.open(filename) else {
        error!("pid {}: executable {:?} disappeared before load", pid, filename);
        tcb.set_exit_status(-1);
        return;
    };

    let space = match AddrSpace::new(kernel, pid, executable) {
        Ok(space) => space,
        Err(e) => {
            error!("pid {}: cannot build address space: {}", pid, e);
            tcb.set_exit_status(-1);
            return;
        }
    };

    kernel.spaces.lock().insert(pid, space);
    tcb.set_space(pid);

    {
        let spaces = kernel.spaces.lock();
        let space = spaces.get(pid).expect("freshly inserted space vanished");
        space.init_registers(kernel);
    }
    addrspace::restore_state(kernel, pid);

    machine::run(kernel);
}
