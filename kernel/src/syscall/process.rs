//! Process system calls

use log::{debug, warn};

use super::{usermem, Control};
use crate::bootstrap::Kernel;
use crate::process::creation;
use crate::sched::thread;

/// `Exit(status)`: record the status and finish the current thread.
pub(super) fn sc_exit(kernel: &Kernel) -> Control {
    let status = kernel.machine.read_register(4);
    let tcb = kernel.current_thread();
    debug!("thread '{}' exiting with status {}", tcb.name(), status);
    tcb.set_exit_status(status);
    Control::Exit
}

/// `Exec(name*, args*) -> pid`: launch a program, -1 on failure.
pub(super) fn sc_exec(kernel: &Kernel) {
    let name_va = kernel.machine.read_register(4) as u32 as usize;
    let argv_va = kernel.machine.read_register(5) as u32 as usize;
    let name = usermem::read_str_from_user(kernel, name_va);
    let argv = usermem::read_str_from_user(kernel, argv_va);

    match creation::exec(&kernel.arc(), &name, &argv) {
        Ok(pid) => kernel.machine.write_register(2, pid.0 as i32),
        Err(e) => {
            warn!("exec {:?} failed: {}", name, e);
            kernel.machine.write_register(2, -1);
        }
    }
}

/// `Join(pid) -> status`: await a child's exit, -1 for an unknown pid.
pub(super) fn sc_join(kernel: &Kernel) {
    let pid = kernel.machine.read_register(4);
    match kernel.processes.get(pid) {
        Some(tid) => {
            let status = thread::join(kernel, tid);
            kernel.machine.write_register(2, status);
        }
        None => {
            warn!("join on unknown pid {}", pid);
            kernel.machine.write_register(2, -1);
        }
    }
}

/// `GetNArgs(out*)`: store the caller's argument count.
pub(super) fn sc_get_n_args(kernel: &Kernel) {
    let out_va = kernel.machine.read_register(4) as u32 as usize;
    let tid = kernel.scheduler.current();
    let count = kernel
        .processes
        .pid_of(tid)
        .map_or(0, |pid| kernel.args.count(pid));
    usermem::write_word_to_user(kernel, out_va, count as i32);
}

/// `GetArgN(i, out*, outLen*)`: copy the i-th argument and its length.
/// Register 2 reports 0, or -1 for an out-of-range index.
pub(super) fn sc_get_arg_n(kernel: &Kernel) {
    let index = kernel.machine.read_register(4);
    let out_va = kernel.machine.read_register(5) as u32 as usize;
    let len_va = kernel.machine.read_register(6) as u32 as usize;

    let tid = kernel.scheduler.current();
    let arg = if index >= 0 {
        kernel
            .processes
            .pid_of(tid)
            .and_then(|pid| kernel.args.get(pid, index as usize))
    } else {
        None
    };

    match arg {
        Some(arg) => {
            usermem::write_str_to_user(kernel, &arg, out_va);
            usermem::write_word_to_user(kernel, len_va, arg.len() as i32);
            kernel.machine.write_register(2, 0);
        }
        None => {
            warn!("argument {} out of range", index);
            kernel.machine.write_register(2, -1);
        }
    }
}
