//! Simulated user programs
//!
//! The machine's instruction interpreter is external, so an executable's
//! behavior is supplied as a [`UserProgram`] stream registered under the
//! image's name. The built-ins here are the bundled user suite — the file
//! round-trip test, `cat`, `cp` and the shell — each performing real
//! syscalls through registers and translated memory, page faults included.
//! Tests register additional streams per kernel.

pub mod programs;
pub mod script;

use std::collections::BTreeMap;

use lazy_static::lazy_static;

use crate::fs::FileSystem;
use crate::machine::cpu::{UserContext, UserProgram};
use crate::machine::translate::Exception;
use crate::machine::STACK_REG;
use crate::noff;

lazy_static! {
    static ref BUILTINS: BTreeMap<&'static str, fn() -> Box<dyn UserProgram>> = {
        let mut map: BTreeMap<&'static str, fn() -> Box<dyn UserProgram>> = BTreeMap::new();
        map.insert("file-test", programs::file_test);
        map.insert("cat", programs::cat);
        map.insert("cp", programs::cp);
        map.insert("shell", programs::shell);
        map
    };
}

/// Instantiate a built-in program by executable name.
pub fn builtin(name: &str) -> Option<Box<dyn UserProgram>> {
    BUILTINS.get(name).map(|factory| factory())
}

pub fn builtin_names() -> impl Iterator<Item = &'static str> {
    BUILTINS.keys().copied()
}

/// Write a NOFF image for `name` into the simulated file system. The code
/// bytes are what demand loading will read back; for built-ins they are
/// filler, since the instruction stream lives kernel-side.
pub fn install_image(fs: &dyn FileSystem, name: &str, code: &[u8]) -> bool {
    let image = noff::build_image(code, &[]);
    if !fs.create(name, 0) {
        return false;
    }
    match fs.open(name) {
        Some(mut file) => file.write_at(&image, 0) == image.len(),
        None => false,
    }
}

/// Deterministic filler for stub code segments.
pub fn stub_code(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

// ---------------------------------------------------------------------------
// Building blocks shared by the program implementations
// ---------------------------------------------------------------------------

/// Bytes of stack scratch each program claims below its stack pointer for
/// strings and small buffers.
pub(crate) const SCRATCH_BYTES: usize = 512;

pub(crate) fn scratch_base(ctx: &UserContext<'_>) -> usize {
    ctx.read_reg(STACK_REG) as u32 as usize - SCRATCH_BYTES
}

/// Load the syscall code and arguments into the trap registers. The caller
/// returns the produced trap from its `step`.
pub(crate) fn emit_syscall(
    ctx: &mut UserContext<'_>,
    code: i32,
    args: [i32; 4],
) -> Option<Exception> {
    ctx.write_reg(2, code);
    for (i, &arg) in args.iter().enumerate() {
        ctx.write_reg(4 + i, arg);
    }
    Some(Exception::Syscall)
}

/// Result of the syscall that just returned, from register 2.
pub(crate) fn syscall_result(ctx: &UserContext<'_>) -> i32 {
    ctx.read_reg(2)
}

/// Resumable byte copy into user memory. A faulting store is returned to
/// the kernel and the copy picks up where it left off when re-stepped.
pub(crate) struct UserCopy {
    va: usize,
    bytes: Vec<u8>,
    pos: usize,
}

impl UserCopy {
    pub(crate) fn to_user(va: usize, bytes: &[u8]) -> Self {
        Self {
            va,
            bytes: bytes.to_vec(),
            pos: 0,
        }
    }

    /// Copy with a terminating NUL appended.
    pub(crate) fn to_user_str(va: usize, s: &str) -> Self {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        Self { va, bytes, pos: 0 }
    }

    pub(crate) fn step(&mut self, ctx: &mut UserContext<'_>) -> Result<(), Exception> {
        while self.pos < self.bytes.len() {
            ctx.write_mem(self.va + self.pos, 1, self.bytes[self.pos] as i32)?;
            self.pos += 1;
        }
        Ok(())
    }
}
