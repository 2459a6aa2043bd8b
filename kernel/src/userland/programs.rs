//! The bundled user programs
//!
//! Straight ports of the user-side test suite: each is a small state
//! machine whose phases mirror the instructions of the original C program.
//! Phases that issue a syscall leave the trap registers loaded and return
//! `Syscall`; the following phase reads the result from register 2. Memory
//! operations propagate faults without advancing, so a re-step after the
//! fault is serviced lands on the same access.

use super::{emit_syscall, scratch_base, syscall_result, UserCopy};
use crate::machine::cpu::{UserContext, UserProgram};
use crate::machine::translate::Exception;
use crate::syscall::{
    CONSOLE_INPUT, CONSOLE_OUTPUT, SC_CLOSE, SC_CREATE, SC_EXEC, SC_EXIT, SC_GET_ARG_N,
    SC_GET_N_ARGS, SC_HALT, SC_JOIN, SC_OPEN, SC_READ, SC_WRITE,
};

// Scratch layout, relative to the per-program scratch base.
const NAME_A: usize = 0; // first string buffer (64 bytes)
const NAME_B: usize = 64; // second string buffer (64 bytes)
const DATA: usize = 128; // data buffer (64 bytes)
const CH: usize = 192; // single-character I/O slot
const LEN: usize = 196; // argument-length word
const NARGS: usize = 200; // argument-count word
const PROMPT: usize = 224; // shell prompt bytes
const LINE: usize = 256; // shell line buffer (64 bytes)

/// Longest line the shell accepts; longer input overwrites the last cell,
/// matching the fixed buffer of the original.
const LINE_MAX: usize = 58;

const DONE: usize = usize::MAX;

const PANGRAM: &[u8] = b"the quick brown fox jumps over the lazy dog";

pub(super) fn file_test() -> Box<dyn UserProgram> {
    Box::new(FileTest {
        phase: 0,
        base: 0,
        fd: 0,
        copy: None,
    })
}

pub(super) fn cat() -> Box<dyn UserProgram> {
    Box::new(Cat {
        phase: 0,
        base: 0,
        fd: 0,
    })
}

pub(super) fn cp() -> Box<dyn UserProgram> {
    Box::new(Cp {
        phase: 0,
        base: 0,
        src: 0,
        dst: 0,
    })
}

pub(super) fn shell() -> Box<dyn UserProgram> {
    Box::new(Shell {
        phase: 0,
        base: 0,
        line_len: 0,
        filename: Vec::new(),
        in_filename: true,
        detached: false,
        copy: None,
    })
}

/// Create a file, write a known sentence, read it back a byte at a time and
/// echo it to the console.
struct FileTest {
    phase: usize,
    base: usize,
    fd: i32,
    copy: Option<UserCopy>,
}

impl UserProgram for FileTest {
    fn step(&mut self, ctx: &mut UserContext<'_>) -> Option<Exception> {
        let b = self.base as i32;
        match self.phase {
            0 => {
                self.base = scratch_base(ctx);
                self.copy = Some(UserCopy::to_user_str(self.base + NAME_A, "testfile"));
                self.phase = 1;
                None
            }
            1 => {
                if let Err(e) = self.copy.as_mut().expect("copy in flight").step(ctx) {
                    return Some(e);
                }
                self.phase = 2;
                emit_syscall(ctx, SC_CREATE, [b + NAME_A as i32, 0, 0, 0])
            }
            2 => {
                self.phase = 3;
                emit_syscall(ctx, SC_OPEN, [b + NAME_A as i32, 0, 0, 0])
            }
            3 => {
                self.fd = syscall_result(ctx);
                self.copy = Some(UserCopy::to_user(self.base + DATA, PANGRAM));
                self.phase = 4;
                None
            }
            4 => {
                if let Err(e) = self.copy.as_mut().expect("copy in flight").step(ctx) {
                    return Some(e);
                }
                self.phase = 5;
                emit_syscall(
                    ctx,
                    SC_WRITE,
                    [b + DATA as i32, PANGRAM.len() as i32, self.fd, 0],
                )
            }
            5 => {
                self.phase = 6;
                emit_syscall(ctx, SC_CLOSE, [self.fd, 0, 0, 0])
            }
            6 => {
                self.phase = 7;
                emit_syscall(ctx, SC_OPEN, [b + NAME_A as i32, 0, 0, 0])
            }
            7 => {
                self.fd = syscall_result(ctx);
                self.phase = 8;
                emit_syscall(ctx, SC_READ, [b + CH as i32, 1, self.fd, 0])
            }
            8 => {
                if syscall_result(ctx) > 0 {
                    self.phase = 9;
                    emit_syscall(ctx, SC_WRITE, [b + CH as i32, 1, CONSOLE_OUTPUT, 0])
                } else {
                    self.copy = Some(UserCopy::to_user(self.base + DATA, b"\n"));
                    self.phase = 10;
                    None
                }
            }
            9 => {
                self.phase = 8;
                emit_syscall(ctx, SC_READ, [b + CH as i32, 1, self.fd, 0])
            }
            10 => {
                if let Err(e) = self.copy.as_mut().expect("copy in flight").step(ctx) {
                    return Some(e);
                }
                self.phase = 11;
                emit_syscall(ctx, SC_WRITE, [b + DATA as i32, 1, CONSOLE_OUTPUT, 0])
            }
            11 => {
                self.phase = 12;
                emit_syscall(ctx, SC_CLOSE, [self.fd, 0, 0, 0])
            }
            12 => {
                self.phase = DONE;
                emit_syscall(ctx, SC_EXIT, [0, 0, 0, 0])
            }
            _ => unreachable!("program resumed after exit"),
        }
    }
}

/// Echo the file named by the first argument to the console.
struct Cat {
    phase: usize,
    base: usize,
    fd: i32,
}

impl UserProgram for Cat {
    fn step(&mut self, ctx: &mut UserContext<'_>) -> Option<Exception> {
        let b = self.base as i32;
        match self.phase {
            0 => {
                self.base = scratch_base(ctx);
                self.phase = 1;
                emit_syscall(
                    ctx,
                    SC_GET_N_ARGS,
                    [self.base as i32 + NARGS as i32, 0, 0, 0],
                )
            }
            1 => {
                let argc = match ctx.read_mem(self.base + NARGS, 4) {
                    Ok(v) => v,
                    Err(e) => return Some(e),
                };
                if argc > 1 {
                    self.phase = 2;
                    emit_syscall(
                        ctx,
                        SC_GET_ARG_N,
                        [1, b + NAME_A as i32, b + LEN as i32, 0],
                    )
                } else {
                    self.phase = DONE;
                    emit_syscall(ctx, SC_EXIT, [0, 0, 0, 0])
                }
            }
            2 => {
                self.phase = 3;
                emit_syscall(ctx, SC_OPEN, [b + NAME_A as i32, 0, 0, 0])
            }
            3 => {
                self.fd = syscall_result(ctx);
                if self.fd == -1 {
                    self.phase = DONE;
                    emit_syscall(ctx, SC_EXIT, [0, 0, 0, 0])
                } else {
                    self.phase = 4;
                    emit_syscall(ctx, SC_READ, [b + CH as i32, 1, self.fd, 0])
                }
            }
            4 => {
                if syscall_result(ctx) > 0 {
                    self.phase = 5;
                    emit_syscall(ctx, SC_WRITE, [b + CH as i32, 1, CONSOLE_OUTPUT, 0])
                } else {
                    self.phase = 6;
                    emit_syscall(ctx, SC_CLOSE, [self.fd, 0, 0, 0])
                }
            }
            5 => {
                self.phase = 4;
                emit_syscall(ctx, SC_READ, [b + CH as i32, 1, self.fd, 0])
            }
            6 => {
                self.phase = DONE;
                emit_syscall(ctx, SC_EXIT, [0, 0, 0, 0])
            }
            _ => unreachable!("program resumed after exit"),
        }
    }
}

/// Copy the file named by the first argument to the second, creating the
/// target if needed.
struct Cp {
    phase: usize,
    base: usize,
    src: i32,
    dst: i32,
}

impl UserProgram for Cp {
    fn step(&mut self, ctx: &mut UserContext<'_>) -> Option<Exception> {
        let b = self.base as i32;
        match self.phase {
            0 => {
                self.base = scratch_base(ctx);
                self.phase = 1;
                emit_syscall(
                    ctx,
                    SC_GET_N_ARGS,
                    [self.base as i32 + NARGS as i32, 0, 0, 0],
                )
            }
            1 => {
                let argc = match ctx.read_mem(self.base + NARGS, 4) {
                    Ok(v) => v,
                    Err(e) => return Some(e),
                };
                if argc > 2 {
                    self.phase = 2;
                    emit_syscall(
                        ctx,
                        SC_GET_ARG_N,
                        [1, b + NAME_A as i32, b + LEN as i32, 0],
                    )
                } else {
                    self.phase = DONE;
                    emit_syscall(ctx, SC_EXIT, [0, 0, 0, 0])
                }
            }
            2 => {
                self.phase = 3;
                emit_syscall(
                    ctx,
                    SC_GET_ARG_N,
                    [2, b + NAME_B as i32, b + LEN as i32, 0],
                )
            }
            3 => {
                self.phase = 4;
                emit_syscall(ctx, SC_OPEN, [b + NAME_A as i32, 0, 0, 0])
            }
            4 => {
                self.src = syscall_result(ctx);
                if self.src == -1 {
                    self.phase = DONE;
                    emit_syscall(ctx, SC_EXIT, [-1, 0, 0, 0])
                } else {
                    self.phase = 5;
                    emit_syscall(ctx, SC_OPEN, [b + NAME_B as i32, 0, 0, 0])
                }
            }
            5 => {
                self.dst = syscall_result(ctx);
                if self.dst < 0 {
                    self.phase = 6;
                    emit_syscall(ctx, SC_CREATE, [b + NAME_B as i32, 0, 0, 0])
                } else {
                    self.phase = 8;
                    emit_syscall(ctx, SC_READ, [b + CH as i32, 1, self.src, 0])
                }
            }
            6 => {
                self.phase = 7;
                emit_syscall(ctx, SC_OPEN, [b + NAME_B as i32, 0, 0, 0])
            }
            7 => {
                self.dst = syscall_result(ctx);
                self.phase = 8;
                emit_syscall(ctx, SC_READ, [b + CH as i32, 1, self.src, 0])
            }
            8 => {
                if syscall_result(ctx) > 0 {
                    self.phase = 9;
                    emit_syscall(ctx, SC_WRITE, [b + CH as i32, 1, self.dst, 0])
                } else {
                    self.phase = 10;
                    emit_syscall(ctx, SC_CLOSE, [self.src, 0, 0, 0])
                }
            }
            9 => {
                self.phase = 8;
                emit_syscall(ctx, SC_READ, [b + CH as i32, 1, self.src, 0])
            }
            10 => {
                self.phase = 11;
                emit_syscall(ctx, SC_CLOSE, [self.dst, 0, 0, 0])
            }
            11 => {
                self.phase = DONE;
                emit_syscall(ctx, SC_EXIT, [0, 0, 0, 0])
            }
            _ => unreachable!("program resumed after exit"),
        }
    }
}

/// Command shell: print `--`, read a line, run the named program with the
/// whole line as its arguments, and wait unless the command starts with
/// `&`. Halts the machine at end of input.
struct Shell {
    phase: usize,
    base: usize,
    line_len: usize,
    filename: Vec<u8>,
    in_filename: bool,
    detached: bool,
    copy: Option<UserCopy>,
}

impl UserProgram for Shell {
    fn step(&mut self, ctx: &mut UserContext<'_>) -> Option<Exception> {
        let b = self.base as i32;
        match self.phase {
            0 => {
                self.base = scratch_base(ctx);
                self.copy = Some(UserCopy::to_user(self.base + PROMPT, b"--"));
                self.phase = 1;
                None
            }
            1 => {
                if let Err(e) = self.copy.as_mut().expect("copy in flight").step(ctx) {
                    return Some(e);
                }
                self.phase = 2;
                None
            }
            2 => {
                // Top of the command loop.
                self.line_len = 0;
                self.filename.clear();
                self.in_filename = true;
                self.detached = false;
                self.phase = 3;
                emit_syscall(ctx, SC_WRITE, [b + PROMPT as i32, 2, CONSOLE_OUTPUT, 0])
            }
            3 => {
                self.phase = 4;
                emit_syscall(
                    ctx,
                    SC_READ,
                    [b + (LINE + self.line_len) as i32, 1, CONSOLE_INPUT, 0],
                )
            }
            4 => {
                if syscall_result(ctx) == 0 {
                    // End of input: nothing more will ever arrive.
                    self.phase = DONE;
                    return emit_syscall(ctx, SC_HALT, [0, 0, 0, 0]);
                }
                let ch = match ctx.read_mem(self.base + LINE + self.line_len, 1) {
                    Ok(v) => v as u8,
                    Err(e) => return Some(e),
                };
                if ch == b'\n' {
                    if self.line_len == 0 {
                        self.phase = 2;
                        return None;
                    }
                    if let Err(e) = ctx.write_mem(self.base + LINE + self.line_len, 1, 0) {
                        return Some(e);
                    }
                    self.detached =
                        self.filename.first() == Some(&b'&') && self.filename.len() > 1;
                    let name = String::from_utf8_lossy(&self.filename).into_owned();
                    self.copy = Some(UserCopy::to_user_str(self.base + NAME_A, &name));
                    self.phase = 5;
                    None
                } else {
                    if self.in_filename && ch == b' ' {
                        self.in_filename = false;
                    } else if self.in_filename {
                        self.filename.push(ch);
                    }
                    if self.line_len < LINE_MAX {
                        self.line_len += 1;
                    }
                    self.phase = 4;
                    emit_syscall(
                        ctx,
                        SC_READ,
                        [b + (LINE + self.line_len) as i32, 1, CONSOLE_INPUT, 0],
                    )
                }
            }
            5 => {
                if let Err(e) = self.copy.as_mut().expect("copy in flight").step(ctx) {
                    return Some(e);
                }
                let skip = usize::from(self.detached);
                self.phase = 6;
                emit_syscall(
                    ctx,
                    SC_EXEC,
                    [
                        b + (NAME_A + skip) as i32,
                        b + (LINE + skip) as i32,
                        0,
                        0,
                    ],
                )
            }
            6 => {
                if self.detached {
                    self.phase = 2;
                    None
                } else {
                    let pid = syscall_result(ctx);
                    self.phase = 7;
                    emit_syscall(ctx, SC_JOIN, [pid, 0, 0, 0])
                }
            }
            7 => {
                self.phase = 2;
                None
            }
            _ => unreachable!("program resumed after halt"),
        }
    }
}
