//! Process and system-call tests
//!
//! End-to-end runs of the bundled user programs — the file round-trip
//! test, `cat`, `cp` and the shell — plus the error paths of the syscall
//! surface.

mod common;

use std::sync::Arc;

use osprey_kernel::machine::console::CapturedOutput;
use osprey_kernel::machine::cpu::UserProgram;
use osprey_kernel::process::creation;
use osprey_kernel::sched::thread;
use osprey_kernel::syscall::{
    CONSOLE_INPUT, CONSOLE_OUTPUT, SC_CLOSE, SC_GET_ARG_N, SC_JOIN, SC_OPEN, SC_READ, SC_WRITE,
};
use osprey_kernel::userland::script::{Arg, ScriptOp, SyscallScript};
use osprey_kernel::userland::{self, stub_code};
use osprey_kernel::{FsError, Kernel, KernelBuilder, KernelError};

const PANGRAM: &[u8] = b"the quick brown fox jumps over the lazy dog";

fn captured_kernel(tag: &str, input: &[u8]) -> (Arc<Kernel>, CapturedOutput) {
    common::init_logging();
    let output = CapturedOutput::new();
    let kernel = KernelBuilder::new()
        .filesystem_root(common::scratch_root(tag))
        .console(
            Box::new(std::io::Cursor::new(input.to_vec())),
            output.sink(),
        )
        .build();
    (kernel, output)
}

fn install(kernel: &Kernel, names: &[&str]) {
    for name in names {
        assert!(
            userland::install_image(kernel.fs.as_ref(), name, &stub_code(512)),
            "install image {:?}",
            name
        );
    }
}

fn exec_and_join(kernel: &Arc<Kernel>, program: &'static str, args: &'static str) -> i32 {
    let status = Arc::new(spin::Mutex::new(i32::MIN));
    let result = Arc::clone(&status);
    kernel.run(move |k| {
        let pid = creation::exec(&k.arc(), program, args).expect("exec");
        let tid = k.processes.get(pid.0 as i32).expect("pid registered");
        *result.lock() = thread::join(k, tid);
    });
    let status = *status.lock();
    status
}

/// S1: create a file, write a sentence, read it back byte by byte onto the
/// console.
#[test]
fn file_round_trip_echoes_to_console() {
    let (kernel, output) = captured_kernel("file", b"");
    install(&kernel, &["file-test"]);

    assert_eq!(exec_and_join(&kernel, "file-test", "file-test"), 0);

    let mut expected = PANGRAM.to_vec();
    expected.push(b'\n');
    assert_eq!(output.contents(), expected);
    // The file itself holds exactly the written bytes.
    assert_eq!(common::get_file(&kernel, "testfile").as_deref(), Some(PANGRAM));
}

/// S2: `cat t` prints the file.
#[test]
fn cat_prints_its_argument() {
    let (kernel, output) = captured_kernel("cat", b"");
    install(&kernel, &["cat"]);
    common::put_file(&kernel, "t", b"hello\n");

    assert_eq!(exec_and_join(&kernel, "cat", "cat t"), 0);
    assert_eq!(output.as_string(), "hello\n");
}

/// `cat` with no argument exits quietly.
#[test]
fn cat_without_arguments_prints_nothing() {
    let (kernel, output) = captured_kernel("cat0", b"");
    install(&kernel, &["cat"]);

    assert_eq!(exec_and_join(&kernel, "cat", "cat"), 0);
    assert_eq!(output.as_string(), "");
}

/// S3: `cp a b` copies byte for byte, creating the target.
#[test]
fn cp_copies_byte_for_byte() {
    let (kernel, _output) = captured_kernel("cp", b"");
    install(&kernel, &["cp"]);
    let payload: Vec<u8> = (0u32..600).map(|i| (i % 251) as u8).collect();
    common::put_file(&kernel, "a", &payload);

    assert_eq!(exec_and_join(&kernel, "cp", "cp a b"), 0);
    assert_eq!(common::get_file(&kernel, "b"), Some(payload));
}

/// S4: the shell prints its prompt, dispatches `cat t`, reprints the
/// prompt and halts at end of input.
#[test]
fn shell_dispatches_a_command() {
    let (kernel, output) = captured_kernel("shell", b"cat t\n");
    install(&kernel, &["shell", "cat"]);
    common::put_file(&kernel, "t", b"hello\n");

    kernel.run(move |k| {
        let pid = creation::exec(&k.arc(), "shell", "shell").expect("exec shell");
        let tid = k.processes.get(pid.0 as i32).expect("pid registered");
        // The shell halts the machine at end of input; this join never
        // completes and the run ends at the halt.
        thread::join(k, tid);
    });

    assert_eq!(output.as_string(), "--hello\n--");
}

/// Exec failures surface as errors, not dead kernels.
#[test]
fn exec_rejects_missing_and_unrunnable_images() {
    common::init_logging();
    let kernel = KernelBuilder::new()
        .filesystem_root(common::scratch_root("badexec"))
        .build();
    // A file with no registered instruction stream.
    common::put_file(&kernel, "mystery", b"not really code");

    kernel.run(move |k| {
        let missing = creation::exec(&k.arc(), "no-such-program", "x").unwrap_err();
        assert!(matches!(missing, KernelError::FsError(FsError::NotFound)));

        let unrunnable = creation::exec(&k.arc(), "mystery", "mystery").unwrap_err();
        assert!(matches!(unrunnable, KernelError::InvalidExecutable { .. }));
    });
}

/// Every user-level error path reports -1 in register 2 and nothing dies:
/// opening a missing file, unknown descriptors, wrong-direction console
/// I/O, joining an unknown pid, and an out-of-range argument index.
#[test]
fn syscall_error_paths_return_minus_one() {
    let (kernel, _output) = captured_kernel("errands", b"");
    install(&kernel, &["errands"]);

    let ops = vec![
        ScriptOp::PokeStr {
            offset: 0,
            text: "absent",
        },
        ScriptOp::Syscall {
            code: SC_OPEN,
            args: [Arg::Base(0), Arg::Imm(0), Arg::Imm(0), Arg::Imm(0)],
            expect: Some(-1),
        },
        ScriptOp::Syscall {
            code: SC_READ,
            args: [Arg::Base(64), Arg::Imm(4), Arg::Imm(9), Arg::Imm(0)],
            expect: Some(-1),
        },
        ScriptOp::Syscall {
            code: SC_READ,
            args: [
                Arg::Base(64),
                Arg::Imm(1),
                Arg::Imm(CONSOLE_OUTPUT),
                Arg::Imm(0),
            ],
            expect: Some(-1),
        },
        ScriptOp::Syscall {
            code: SC_WRITE,
            args: [
                Arg::Base(64),
                Arg::Imm(1),
                Arg::Imm(CONSOLE_INPUT),
                Arg::Imm(0),
            ],
            expect: Some(-1),
        },
        ScriptOp::Syscall {
            code: SC_JOIN,
            args: [Arg::Imm(99), Arg::Imm(0), Arg::Imm(0), Arg::Imm(0)],
            expect: Some(-1),
        },
        ScriptOp::Syscall {
            code: SC_CLOSE,
            args: [Arg::Imm(5), Arg::Imm(0), Arg::Imm(0), Arg::Imm(0)],
            expect: Some(-1),
        },
        ScriptOp::Syscall {
            code: SC_GET_ARG_N,
            args: [Arg::Imm(7), Arg::Base(64), Arg::Base(128), Arg::Imm(0)],
            expect: Some(-1),
        },
    ];
    kernel.register_program("errands", move || {
        Box::new(SyscallScript::new(ops.clone())) as Box<dyn UserProgram>
    });

    assert_eq!(exec_and_join(&kernel, "errands", "errands"), 0);
}

/// Console input is consumed exactly once and in order.
#[test]
fn console_read_returns_input_then_eof() {
    let (kernel, output) = captured_kernel("console", b"ab");
    install(&kernel, &["pump"]);

    // Read three characters one at a time, echoing each; the third read
    // hits end of input and must report zero without echoing anything.
    let ops = vec![
        ScriptOp::Syscall {
            code: SC_READ,
            args: [
                Arg::Base(0),
                Arg::Imm(1),
                Arg::Imm(CONSOLE_INPUT),
                Arg::Imm(0),
            ],
            expect: Some(1),
        },
        ScriptOp::Syscall {
            code: SC_WRITE,
            args: [
                Arg::Base(0),
                Arg::Imm(1),
                Arg::Imm(CONSOLE_OUTPUT),
                Arg::Imm(0),
            ],
            expect: Some(1),
        },
        ScriptOp::Syscall {
            code: SC_READ,
            args: [
                Arg::Base(0),
                Arg::Imm(1),
                Arg::Imm(CONSOLE_INPUT),
                Arg::Imm(0),
            ],
            expect: Some(1),
        },
        ScriptOp::Syscall {
            code: SC_WRITE,
            args: [
                Arg::Base(0),
                Arg::Imm(1),
                Arg::Imm(CONSOLE_OUTPUT),
                Arg::Imm(0),
            ],
            expect: Some(1),
        },
        ScriptOp::Syscall {
            code: SC_READ,
            args: [
                Arg::Base(0),
                Arg::Imm(1),
                Arg::Imm(CONSOLE_INPUT),
                Arg::Imm(0),
            ],
            expect: Some(0),
        },
    ];
    kernel.register_program("pump", move || {
        Box::new(SyscallScript::new(ops.clone())) as Box<dyn UserProgram>
    });

    assert_eq!(exec_and_join(&kernel, "pump", "pump"), 0);
    assert_eq!(output.as_string(), "ab");
}
