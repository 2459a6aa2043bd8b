//! Scripted instruction streams for tests
//!
//! Two generic programs driven by op lists: one exercising translated
//! memory (paging tests), one exercising the syscall surface (error-path
//! tests). Both exit with status 0 on success and 1 on the first
//! expectation that fails, so a kernel-side `join` can assert the outcome.

use log::warn;

use super::{emit_syscall, scratch_base, syscall_result, UserCopy};
use crate::machine::cpu::{UserContext, UserProgram};
use crate::machine::translate::Exception;
use crate::syscall::SC_EXIT;

/// One translated memory access.
#[derive(Debug, Clone, Copy)]
pub enum MemOp {
    /// Load `size` bytes at `va` and compare against `expect`.
    ReadExpect { va: usize, size: usize, expect: i32 },
    /// Store the low `size` bytes of `value` at `va`.
    Write { va: usize, size: usize, value: i32 },
}

/// Runs a list of memory accesses, one per instruction step, then exits.
/// Faults are propagated and the same access retried, so every op works on
/// non-resident pages.
pub struct MemoryScript {
    ops: Vec<MemOp>,
    index: usize,
    failed: bool,
    exited: bool,
}

impl MemoryScript {
    pub fn new(ops: Vec<MemOp>) -> Self {
        Self {
            ops,
            index: 0,
            failed: false,
            exited: false,
        }
    }
}

impl UserProgram for MemoryScript {
    fn step(&mut self, ctx: &mut UserContext<'_>) -> Option<Exception> {
        if let Some(&op) = self.ops.get(self.index) {
            match op {
                MemOp::ReadExpect { va, size, expect } => {
                    let value = match ctx.read_mem(va, size) {
                        Ok(v) => v,
                        Err(e) => return Some(e),
                    };
                    if value != expect {
                        warn!(
                            "memory script: read {:#x} -> {:#x}, expected {:#x}",
                            va, value, expect
                        );
                        self.failed = true;
                    }
                }
                MemOp::Write { va, size, value } => {
                    if let Err(e) = ctx.write_mem(va, size, value) {
                        return Some(e);
                    }
                }
            }
            self.index += 1;
            None
        } else if !self.exited {
            self.exited = true;
            emit_syscall(ctx, SC_EXIT, [i32::from(self.failed), 0, 0, 0])
        } else {
            unreachable!("program resumed after exit")
        }
    }
}

/// Argument of a scripted syscall.
#[derive(Debug, Clone, Copy)]
pub enum Arg {
    /// A literal value.
    Imm(i32),
    /// An address `offset` bytes into the program's stack scratch area.
    Base(usize),
}

/// One step of a syscall script.
#[derive(Debug, Clone)]
pub enum ScriptOp {
    /// Copy `text` (NUL-terminated) to scratch `offset`.
    PokeStr { offset: usize, text: &'static str },
    /// Issue a syscall; when `expect` is set, compare register 2 afterwards.
    Syscall {
        code: i32,
        args: [Arg; 4],
        expect: Option<i32>,
    },
}

/// Runs a list of [`ScriptOp`]s, then exits 0 or 1.
pub struct SyscallScript {
    ops: Vec<ScriptOp>,
    index: usize,
    base: Option<usize>,
    copy: Option<UserCopy>,
    issued: bool,
    failed: bool,
    exited: bool,
}

impl SyscallScript {
    pub fn new(ops: Vec<ScriptOp>) -> Self {
        Self {
            ops,
            index: 0,
            base: None,
            copy: None,
            issued: false,
            failed: false,
            exited: false,
        }
    }

    fn resolve(&self, arg: Arg) -> i32 {
        match arg {
            Arg::Imm(value) => value,
            Arg::Base(offset) => (self.base.expect("script base unset") + offset) as i32,
        }
    }
}

impl UserProgram for SyscallScript {
    fn step(&mut self, ctx: &mut UserContext<'_>) -> Option<Exception> {
        let base = *self.base.get_or_insert_with(|| scratch_base(ctx));

        if let Some(copy) = self.copy.as_mut() {
            if let Err(e) = copy.step(ctx) {
                return Some(e);
            }
            self.copy = None;
            self.index += 1;
            return None;
        }

        let Some(op) = self.ops.get(self.index).cloned() else {
            if self.exited {
                unreachable!("program resumed after exit");
            }
            self.exited = true;
            return emit_syscall(ctx, SC_EXIT, [i32::from(self.failed), 0, 0, 0]);
        };

        match op {
            ScriptOp::PokeStr { offset, text } => {
                self.copy = Some(UserCopy::to_user_str(base + offset, text));
                None
            }
            ScriptOp::Syscall { code, args, expect } => {
                if self.issued {
                    if let Some(expected) = expect {
                        let got = syscall_result(ctx);
                        if got != expected {
                            warn!(
                                "syscall script: code {} returned {}, expected {}",
                                code, got, expected
                            );
                            self.failed = true;
                        }
                    }
                    self.issued = false;
                    self.index += 1;
                    None
                } else {
                    self.issued = true;
                    let resolved = [
                        self.resolve(args[0]),
                        self.resolve(args[1]),
                        self.resolve(args[2]),
                        self.resolve(args[3]),
                    ];
                    emit_syscall(ctx, code, resolved)
                }
            }
        }
    }
}
