//! The simulated machine: physical memory, registers and the optional TLB
//!
//! One instance exists per kernel. User programs see it only through the
//! [`cpu::UserContext`] surface; the kernel additionally reaches physical
//! memory directly when loading and evicting pages.

pub mod console;
pub mod cpu;
pub mod translate;

use log::{debug, trace};
use spin::Mutex;

use crate::bootstrap::Kernel;
use crate::process::Pid;
use crate::stats::Statistics;
use crate::syscall::{self, Control};
use crate::utils::XorShift64;
use translate::{EntryFlags, TranslationEntry};

/// Bytes per page and per frame.
pub const PAGE_SIZE: usize = 128;
/// Default size of the physical frame pool.
pub const DEFAULT_PHYS_FRAMES: usize = 32;
/// Entries in the software-loaded TLB.
pub const TLB_SIZE: usize = 4;
/// Bytes of user stack appended to every address space.
pub const USER_STACK_SIZE: usize = 1024;

/// Simulated time consumed by one user instruction.
pub const USER_TICK: u64 = 1;

// Register file layout: 32 general-purpose registers followed by the
// special registers the kernel touches during trap handling.
pub const STACK_REG: usize = 29;
pub const RET_ADDR_REG: usize = 31;
pub const HI_REG: usize = 32;
pub const LO_REG: usize = 33;
pub const PC_REG: usize = 34;
pub const NEXT_PC_REG: usize = 35;
pub const PREV_PC_REG: usize = 36;
pub const LOAD_REG: usize = 37;
pub const LOAD_VALUE_REG: usize = 38;
pub const BAD_VADDR_REG: usize = 39;
pub const NUM_TOTAL_REGS: usize = 40;

pub struct Machine {
    num_frames: usize,
    memory: Mutex<Vec<u8>>,
    registers: Mutex<[i32; NUM_TOTAL_REGS]>,
    tlb: Option<Mutex<[TranslationEntry; TLB_SIZE]>>,
    active_space: Mutex<Option<Pid>>,
}

impl Machine {
    pub fn new(num_frames: usize, use_tlb: bool) -> Self {
        Self {
            num_frames,
            memory: Mutex::new(vec![0; num_frames * PAGE_SIZE]),
            registers: Mutex::new([0; NUM_TOTAL_REGS]),
            tlb: use_tlb.then(|| Mutex::new([TranslationEntry::INVALID; TLB_SIZE])),
            active_space: Mutex::new(None),
        }
    }

    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    pub fn has_tlb(&self) -> bool {
        self.tlb.is_some()
    }

    // ------------------------------------------------------------------
    // Registers
    // ------------------------------------------------------------------

    pub fn read_register(&self, reg: usize) -> i32 {
        assert!(reg < NUM_TOTAL_REGS, "register index out of range");
        self.registers.lock()[reg]
    }

    pub fn write_register(&self, reg: usize, value: i32) {
        assert!(reg < NUM_TOTAL_REGS, "register index out of range");
        self.registers.lock()[reg] = value;
    }

    pub(crate) fn snapshot_registers(&self) -> [i32; NUM_TOTAL_REGS] {
        *self.registers.lock()
    }

    pub(crate) fn load_registers(&self, saved: &[i32; NUM_TOTAL_REGS]) {
        *self.registers.lock() = *saved;
    }

    // ------------------------------------------------------------------
    // Physical memory (kernel-side, untranslated)
    // ------------------------------------------------------------------

    pub(crate) fn read_phys(&self, paddr: usize, buf: &mut [u8]) {
        let memory = self.memory.lock();
        buf.copy_from_slice(&memory[paddr..paddr + buf.len()]);
    }

    pub(crate) fn write_phys(&self, paddr: usize, bytes: &[u8]) {
        let mut memory = self.memory.lock();
        memory[paddr..paddr + bytes.len()].copy_from_slice(bytes);
    }

    /// Zero a frame before it is handed to a new page.
    pub(crate) fn zero_frame(&self, frame: usize) {
        let mut memory = self.memory.lock();
        memory[frame * PAGE_SIZE..(frame + 1) * PAGE_SIZE].fill(0);
    }

    // ------------------------------------------------------------------
    // Active translation state
    // ------------------------------------------------------------------

    pub(crate) fn set_active_space(&self, pid: Option<Pid>) {
        *self.active_space.lock() = pid;
    }

    pub(crate) fn active_space(&self) -> Option<Pid> {
        *self.active_space.lock()
    }

    /// Install a translation, preferring an invalid slot and falling back to
    /// a uniformly random victim.
    pub(crate) fn tlb_install(&self, entry: TranslationEntry, rng: &mut XorShift64) {
        let tlb = self.tlb.as_ref().expect("TLB install without a TLB");
        let mut tlb = tlb.lock();
        let slot = tlb
            .iter()
            .position(|e| !e.is_valid())
            .unwrap_or_else(|| rng.below(TLB_SIZE));
        trace!("tlb[{}] <- vpn {} -> frame {:?}", slot, entry.vpn, entry.ppn);
        tlb[slot] = entry;
    }

    /// Drop every cached translation. Runs on each context switch.
    pub(crate) fn tlb_invalidate_all(&self) {
        if let Some(tlb) = &self.tlb {
            for entry in tlb.lock().iter_mut() {
                entry.flags.remove(EntryFlags::VALID);
            }
        }
    }

    /// Drop any cached translation for a frame being evicted.
    pub(crate) fn tlb_invalidate_frame(&self, frame: usize) {
        if let Some(tlb) = &self.tlb {
            for entry in tlb.lock().iter_mut() {
                if entry.is_valid() && entry.ppn == Some(frame) {
                    entry.flags.remove(EntryFlags::VALID);
                }
            }
        }
    }

    /// Valid, dirty TLB entries, for write-back into the owning page table.
    pub(crate) fn tlb_dirty_entries(&self) -> Vec<TranslationEntry> {
        match &self.tlb {
            Some(tlb) => tlb
                .lock()
                .iter()
                .filter(|e| e.is_valid() && e.flags.contains(EntryFlags::DIRTY))
                .copied()
                .collect(),
            None => Vec::new(),
        }
    }
}

/// Enter user mode on the current thread: step its instruction stream,
/// dispatching every trap to the exception handler, until the program exits
/// or the machine halts. Simulated time advances one tick per step, which is
/// where timer preemption takes effect.
pub fn run(kernel: &Kernel) {
    let name = kernel.current_thread().name().to_owned();
    debug!("entering user mode on thread '{}'", name);

    loop {
        if kernel.interrupt.is_halted() {
            return;
        }

        let trap = {
            let tcb = kernel.current_thread();
            let mut cpu = tcb.cpu.lock();
            let program = cpu
                .as_mut()
                .expect("thread entered user mode without an instruction stream");
            let mut ctx = cpu::UserContext::new(kernel);
            program.step(&mut ctx)
        };

        if let Some(exception) = trap {
            match syscall::exception_handler(kernel, exception) {
                Control::Continue => {}
                Control::Exit => return,
            }
        }

        if kernel.interrupt.is_halted() {
            return;
        }

        Statistics::bump(&kernel.stats.user_ticks);
        kernel.interrupt.one_tick(kernel, USER_TICK);
    }
}
