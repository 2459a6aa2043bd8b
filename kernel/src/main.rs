//! Simulator launcher
//!
//! Boots a kernel on the host, optionally installs the bundled program
//! images, runs one program and waits for it to finish. The simulated
//! console is wired to stdin/stdout; kernel diagnostics go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use log::{error, info, LevelFilter};

use osprey_kernel::process::creation;
use osprey_kernel::sched::thread;
use osprey_kernel::{logger, userland, KernelBuilder, MemoryMode};

#[derive(Parser)]
#[command(name = "osprey", about = "Instructional OS kernel on a simulated machine")]
struct Cli {
    /// Program to execute (its image must exist in the filesystem root)
    #[arg(short = 'x', long = "execute")]
    execute: Option<String>,

    /// Argument string handed to the program; defaults to the program name
    #[arg(short = 'a', long = "args")]
    args: Option<String>,

    /// Physical frames in the simulated machine
    #[arg(short = 'm', long, default_value_t = osprey_kernel::machine::DEFAULT_PHYS_FRAMES)]
    frames: usize,

    /// How user memory is materialized
    #[arg(long, value_enum, default_value = "paged")]
    mode: Mode,

    /// Translate through a software-loaded TLB
    #[arg(long)]
    tlb: bool,

    /// Arm the preemption timer
    #[arg(long)]
    timer: bool,

    /// Directory backing the simulated file system
    #[arg(long, default_value = "osprey-fs")]
    fs_root: PathBuf,

    /// Install NOFF images for the bundled programs before running
    #[arg(long)]
    install_demos: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Preload,
    Demand,
    Paged,
}

impl From<Mode> for MemoryMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Preload => MemoryMode::Preload,
            Mode::Demand => MemoryMode::Demand,
            Mode::Paged => MemoryMode::Paged,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    logger::init(match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    });

    let kernel = KernelBuilder::new()
        .physical_frames(cli.frames)
        .memory_mode(cli.mode.into())
        .use_tlb(cli.tlb)
        .timer(cli.timer)
        .filesystem_root(cli.fs_root)
        .console(Box::new(std::io::stdin()), Box::new(std::io::stdout()))
        .build();

    if cli.install_demos {
        for name in userland::builtin_names() {
            if userland::install_image(kernel.fs.as_ref(), name, &userland::stub_code(512)) {
                info!("installed demo image {:?}", name);
            } else {
                error!("could not install demo image {:?}", name);
            }
        }
    }

    let Some(program) = cli.execute else {
        eprintln!("nothing to run; pass --execute <program> (try --install-demos --execute shell)");
        return ExitCode::FAILURE;
    };
    let argline = cli.args.unwrap_or_else(|| program.clone());

    kernel.run(move |k| {
        match creation::exec(&k.arc(), &program, &argline) {
            Ok(pid) => {
                let tid = k.processes.get(pid.0 as i32).expect("pid just allocated");
                let status = thread::join(k, tid);
                info!("program {:?} exited with status {}", program, status);
            }
            Err(e) => error!("cannot start {:?}: {}", program, e),
        }
        k.interrupt.halt(k);
    });

    ExitCode::SUCCESS
}
