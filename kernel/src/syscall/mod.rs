//! System call and exception dispatch
//!
//! Entry point from user mode. A syscall carries its code in register 2 and
//! arguments in registers 4 through 7; the result, when there is one, goes
//! back in register 2. After a syscall the program-counter triad advances;
//! after a page fault it must not — the simulator re-executes the faulting
//! instruction.

pub mod files;
pub mod process;
pub mod usermem;

use log::debug;

use crate::bootstrap::Kernel;
use crate::machine::translate::Exception;
use crate::machine::{NEXT_PC_REG, PC_REG, PREV_PC_REG};
use crate::mm::page_fault;
use crate::stats::Statistics;

// Syscall numbers, fixed by the user-side headers.
pub const SC_HALT: i32 = 0;
pub const SC_EXIT: i32 = 1;
pub const SC_EXEC: i32 = 2;
pub const SC_JOIN: i32 = 3;
pub const SC_CREATE: i32 = 4;
pub const SC_OPEN: i32 = 5;
pub const SC_READ: i32 = 6;
pub const SC_WRITE: i32 = 7;
pub const SC_CLOSE: i32 = 8;
pub const SC_GET_ARG_N: i32 = 9;
pub const SC_GET_N_ARGS: i32 = 10;

/// Reserved file descriptors.
pub const CONSOLE_INPUT: i32 = 0;
pub const CONSOLE_OUTPUT: i32 = 1;

/// What the machine loop should do after a trap is serviced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Resume the interrupted instruction stream.
    Continue,
    /// The current thread is done executing user code.
    Exit,
}

/// Entry point into the kernel for every user-mode trap.
pub fn exception_handler(kernel: &Kernel, which: Exception) -> Control {
    match which {
        Exception::Syscall => {
            Statistics::bump(&kernel.stats.syscalls);
            let code = kernel.machine.read_register(2);
            let control = dispatch_syscall(kernel, code);
            increment_program_counter(kernel);
            control
        }
        Exception::PageFault { bad_vaddr } => {
            page_fault::handle(kernel, bad_vaddr);
            Control::Continue
        }
        Exception::ReadOnly { bad_vaddr } => {
            panic!("user program wrote to read-only address {:#x}", bad_vaddr)
        }
        other => panic!("unexpected user-mode exception: {:?}", other),
    }
}

fn dispatch_syscall(kernel: &Kernel, code: i32) -> Control {
    match code {
        SC_HALT => {
            debug!("shutdown initiated by user program");
            kernel.interrupt.halt(kernel);
            Control::Exit
        }
        SC_EXIT => process::sc_exit(kernel),
        SC_EXEC => {
            process::sc_exec(kernel);
            Control::Continue
        }
        SC_JOIN => {
            process::sc_join(kernel);
            Control::Continue
        }
        SC_CREATE => {
            files::sc_create(kernel);
            Control::Continue
        }
        SC_OPEN => {
            files::sc_open(kernel);
            Control::Continue
        }
        SC_READ => {
            files::sc_read(kernel);
            Control::Continue
        }
        SC_WRITE => {
            files::sc_write(kernel);
            Control::Continue
        }
        SC_CLOSE => {
            files::sc_close(kernel);
            Control::Continue
        }
        SC_GET_ARG_N => {
            process::sc_get_arg_n(kernel);
            Control::Continue
        }
        SC_GET_N_ARGS => {
            process::sc_get_n_args(kernel);
            Control::Continue
        }
        unknown => panic!("unexpected syscall {} from user mode", unknown),
    }
}

/// Advance the program-counter triad past the syscall instruction.
fn increment_program_counter(kernel: &Kernel) {
    let machine = &kernel.machine;
    let pc = machine.read_register(PC_REG);
    machine.write_register(PREV_PC_REG, pc);
    let next = machine.read_register(NEXT_PC_REG);
    machine.write_register(PC_REG, next);
    machine.write_register(NEXT_PC_REG, next + 4);
}
