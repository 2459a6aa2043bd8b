//! Kernel assembly and run control
//!
//! Every subsystem singleton of the source design lives here as a field of
//! [`Kernel`], passed by reference to every operation instead of reached
//! through globals. [`KernelBuilder`] wires a kernel up from boot options;
//! [`Kernel::run`] starts the boot thread and blocks the caller until the
//! machine halts.

use std::any::Any;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex as StdMutex, Weak};

use spin::Mutex;

use crate::console::SynchConsole;
use crate::fs::{FileSystem, HostFileSystem};
use crate::interrupt::Interrupt;
use crate::machine::cpu::UserProgram;
use crate::machine::{Machine, DEFAULT_PHYS_FRAMES};
use crate::mm::{CoreMap, FrameAllocator, MemoryMode, SpaceTable};
use crate::process::{ArgTable, ProcessTable};
use crate::sched::{thread, Scheduler, Thread, ThreadTable, DEFAULT_PRIORITY};
use crate::stats::Statistics;
use crate::timer;
use crate::userland;
use crate::utils::XorShift64;

/// Machine and memory configuration fixed at boot.
#[derive(Debug, Clone)]
pub struct BootOptions {
    pub physical_frames: usize,
    pub memory_mode: MemoryMode,
    pub use_tlb: bool,
    /// Arm the preemption timer. Off by default: the kernel is cooperative.
    pub timer: bool,
}

impl Default for BootOptions {
    fn default() -> Self {
        Self {
            physical_frames: DEFAULT_PHYS_FRAMES,
            memory_mode: MemoryMode::default(),
            use_tlb: false,
            timer: false,
        }
    }
}

type ProgramFactory = Box<dyn Fn() -> Box<dyn UserProgram> + Send + Sync>;

struct RunState {
    finished: bool,
    panic: Option<Box<dyn Any + Send>>,
}

/// The kernel context: one simulated machine and everything that manages it.
pub struct Kernel {
    pub interrupt: Interrupt,
    pub scheduler: Scheduler,
    pub threads: ThreadTable,
    pub machine: Machine,
    pub frames: FrameAllocator,
    pub core_map: CoreMap,
    pub spaces: Mutex<SpaceTable>,
    pub processes: ProcessTable,
    pub args: ArgTable,
    pub fs: Box<dyn FileSystem>,
    pub console: SynchConsole,
    pub stats: Statistics,
    pub options: BootOptions,
    /// Victim selection for TLB replacement.
    pub(crate) rng: Mutex<XorShift64>,
    /// Instruction streams registered for this kernel, consulted before the
    /// built-in table.
    programs: Mutex<BTreeMap<String, ProgramFactory>>,
    run_state: (StdMutex<RunState>, Condvar),
    self_ref: Weak<Kernel>,
}

impl Kernel {
    /// The owning `Arc`, for paths that spawn host threads.
    pub fn arc(&self) -> Arc<Kernel> {
        self.self_ref.upgrade().expect("kernel dropped while running")
    }

    /// Control block of the thread holding the CPU.
    pub fn current_thread(&self) -> Arc<Thread> {
        self.threads.get(self.scheduler.current())
    }

    /// Attach an instruction stream to an executable name, overriding any
    /// built-in of the same name.
    pub fn register_program(
        &self,
        name: &str,
        factory: impl Fn() -> Box<dyn UserProgram> + Send + Sync + 'static,
    ) {
        self.programs
            .lock()
            .insert(name.to_owned(), Box::new(factory));
    }

    pub(crate) fn instantiate_program(&self, name: &str) -> Option<Box<dyn UserProgram>> {
        if let Some(factory) = self.programs.lock().get(name) {
            return Some(factory());
        }
        userland::builtin(name)
    }

    /// Boot the kernel: arm the devices, run `boot` as the first thread and
    /// block until the machine halts — by an explicit `Halt`, or by
    /// quiescence once nothing is runnable or pending. A panic on any
    /// kernel thread is re-raised here. Call once.
    pub fn run(self: &Arc<Self>, boot: impl FnOnce(&Kernel) + Send + 'static) {
        self.console.start(self);
        if self.options.timer {
            timer::start(self);
        }

        let tid = self.threads.create("main", DEFAULT_PRIORITY);
        thread::spawn_initial(self, tid, Box::new(boot));

        let (lock, condvar) = &self.run_state;
        let mut state = lock.lock().expect("run state poisoned");
        while !state.finished {
            state = condvar.wait(state).expect("run state poisoned");
        }
        if let Some(payload) = state.panic.take() {
            drop(state);
            std::panic::resume_unwind(payload);
        }
    }

    /// Release `run`. Called from the halt path.
    pub(crate) fn finish_run(&self) {
        let (lock, condvar) = &self.run_state;
        let mut state = lock.lock().expect("run state poisoned");
        state.finished = true;
        condvar.notify_all();
    }

    /// A kernel thread panicked: stop the machine and hand the payload to
    /// `run` so the caller sees the original panic.
    pub(crate) fn fail_run(&self, payload: Box<dyn Any + Send>) {
        self.interrupt.mark_halted();
        let (lock, condvar) = &self.run_state;
        let mut state = lock.lock().expect("run state poisoned");
        if state.panic.is_none() {
            state.panic = Some(payload);
        }
        state.finished = true;
        condvar.notify_all();
    }
}

/// Step-by-step construction of a [`Kernel`].
pub struct KernelBuilder {
    options: BootOptions,
    fs: Option<Box<dyn FileSystem>>,
    fs_root: Option<PathBuf>,
    console_source: Option<Box<dyn Read + Send>>,
    console_sink: Option<Box<dyn Write + Send>>,
}

impl KernelBuilder {
    pub fn new() -> Self {
        Self {
            options: BootOptions::default(),
            fs: None,
            fs_root: None,
            console_source: None,
            console_sink: None,
        }
    }

    pub fn physical_frames(mut self, frames: usize) -> Self {
        assert!(frames > 0, "the machine needs at least one frame");
        self.options.physical_frames = frames;
        self
    }

    pub fn memory_mode(mut self, mode: MemoryMode) -> Self {
        self.options.memory_mode = mode;
        self
    }

    pub fn use_tlb(mut self, use_tlb: bool) -> Self {
        self.options.use_tlb = use_tlb;
        self
    }

    pub fn timer(mut self, timer: bool) -> Self {
        self.options.timer = timer;
        self
    }

    /// Use a specific file system implementation.
    pub fn filesystem(mut self, fs: Box<dyn FileSystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    /// Root a host-backed file system at `root`.
    pub fn filesystem_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.fs_root = Some(root.into());
        self
    }

    /// Wire the console to the given byte source and sink.
    pub fn console(
        mut self,
        source: Box<dyn Read + Send>,
        sink: Box<dyn Write + Send>,
    ) -> Self {
        self.console_source = Some(source);
        self.console_sink = Some(sink);
        self
    }

    pub fn build(self) -> Arc<Kernel> {
        let options = self.options;
        let frames = options.physical_frames;

        let fs: Box<dyn FileSystem> = match (self.fs, self.fs_root) {
            (Some(fs), _) => fs,
            (None, root) => {
                let root = root.unwrap_or_else(|| PathBuf::from("osprey-fs"));
                Box::new(HostFileSystem::new(root).expect("cannot create the filesystem root"))
            }
        };
        let source = self
            .console_source
            .unwrap_or_else(|| Box::new(std::io::empty()));
        let sink = self.console_sink.unwrap_or_else(|| Box::new(std::io::sink()));

        Arc::new_cyclic(|weak| Kernel {
            interrupt: Interrupt::new(),
            scheduler: Scheduler::new(),
            threads: ThreadTable::new(),
            machine: Machine::new(frames, options.use_tlb),
            frames: FrameAllocator::new(frames),
            core_map: CoreMap::new(frames),
            spaces: Mutex::new(SpaceTable::new()),
            processes: ProcessTable::new(),
            args: ArgTable::new(),
            fs,
            console: SynchConsole::new(source, sink),
            stats: Statistics::new(),
            options,
            rng: Mutex::new(XorShift64::new(0x05e1_ec7)),
            programs: Mutex::new(BTreeMap::new()),
            run_state: (
                StdMutex::new(RunState {
                    finished: false,
                    panic: None,
                }),
                Condvar::new(),
            ),
            self_ref: weak.clone(),
        })
    }
}

impl Default for KernelBuilder {
    fn default() -> Self {
        Self::new()
    }
}
