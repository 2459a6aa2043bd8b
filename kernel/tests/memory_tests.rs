//! Address-space and demand-paging tests
//!
//! User programs here are scripted memory walkers: each step performs one
//! translated access, so page faults, eviction and TLB refills happen
//! exactly as they would under decoded instructions.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use osprey_kernel::machine::cpu::UserProgram;
use osprey_kernel::machine::PAGE_SIZE;
use osprey_kernel::mm;
use osprey_kernel::process::creation;
use osprey_kernel::sched::thread;
use osprey_kernel::stats::Statistics;
use osprey_kernel::userland::script::{MemOp, MemoryScript};
use osprey_kernel::userland::{self, stub_code};
use osprey_kernel::{Kernel, KernelBuilder, MemoryMode};

/// 1 KiB of code plus the user stack: a 16-page address space.
const CODE_BYTES: usize = 1024;

fn register_walker(kernel: &Kernel, name: &str, ops: Vec<MemOp>) {
    kernel.register_program(name, move || {
        Box::new(MemoryScript::new(ops.clone())) as Box<dyn UserProgram>
    });
}

/// Read the first byte of every page (code pages expect their image bytes,
/// stack pages expect zero), then re-touch page 0.
fn walk_ops(code: &[u8], pages: usize) -> Vec<MemOp> {
    let code_pages = code.len() / PAGE_SIZE;
    let mut ops = Vec::new();
    for vpn in 0..pages {
        let va = vpn * PAGE_SIZE;
        let expect = if vpn < code_pages { code[va] as i32 } else { 0 };
        ops.push(MemOp::ReadExpect { va, size: 1, expect });
    }
    ops.push(MemOp::ReadExpect {
        va: 0,
        size: 1,
        expect: code[0] as i32,
    });
    ops
}

fn run_to_completion(kernel: &Arc<Kernel>, program: &'static str) -> i32 {
    let status = Arc::new(spin::Mutex::new(0));
    let result = Arc::clone(&status);
    kernel.run(move |k| {
        let pid = creation::exec(&k.arc(), program, program).expect("exec");
        let tid = k.processes.get(pid.0 as i32).expect("pid registered");
        *result.lock() = thread::join(k, tid);
        mm::validate(k).expect("memory invariants after teardown");
    });
    let status = *status.lock();
    status
}

/// Sixteen pages squeezed through four frames: every page's contents must
/// still read back as loaded, page 0 included after its round trip through
/// the swap file.
#[test]
fn demand_paging_preserves_page_contents() {
    common::init_logging();
    let kernel = KernelBuilder::new()
        .physical_frames(4)
        .memory_mode(MemoryMode::Paged)
        .filesystem_root(common::scratch_root("paged"))
        .build();

    let code = stub_code(CODE_BYTES);
    assert!(userland::install_image(kernel.fs.as_ref(), "walker", &code));
    register_walker(&kernel, "walker", walk_ops(&code, 16));

    assert_eq!(run_to_completion(&kernel, "walker"), 0);

    assert!(Statistics::get(&kernel.stats.page_faults) >= 16);
    assert!(Statistics::get(&kernel.stats.pages_swapped_out) > 0);
    assert!(Statistics::get(&kernel.stats.pages_swapped_in) > 0);
}

/// Writes survive eviction: dirty stack pages go out to the swap file and
/// come back intact.
#[test]
fn swap_round_trip_preserves_writes() {
    common::init_logging();
    let kernel = KernelBuilder::new()
        .physical_frames(4)
        .memory_mode(MemoryMode::Paged)
        .filesystem_root(common::scratch_root("swaprt"))
        .build();

    let code = stub_code(CODE_BYTES);
    assert!(userland::install_image(kernel.fs.as_ref(), "writer", &code));

    let mut ops = Vec::new();
    // Dirty four stack pages.
    for vpn in 8..12 {
        ops.push(MemOp::Write {
            va: vpn * PAGE_SIZE,
            size: 4,
            value: 0x5eed_0000 + vpn as i32,
        });
    }
    // Flush them out by walking every code page.
    for vpn in 0..8 {
        ops.push(MemOp::ReadExpect {
            va: vpn * PAGE_SIZE,
            size: 1,
            expect: code[vpn * PAGE_SIZE] as i32,
        });
    }
    // The markers must come back from the swap file.
    for vpn in 8..12 {
        ops.push(MemOp::ReadExpect {
            va: vpn * PAGE_SIZE,
            size: 4,
            expect: 0x5eed_0000 + vpn as i32,
        });
    }
    register_walker(&kernel, "writer", ops);

    assert_eq!(run_to_completion(&kernel, "writer"), 0);
    assert!(Statistics::get(&kernel.stats.pages_swapped_out) >= 4);
}

/// Preloaded spaces never fault.
#[test]
fn preload_mode_faults_nothing() {
    common::init_logging();
    let kernel = KernelBuilder::new()
        .physical_frames(32)
        .memory_mode(MemoryMode::Preload)
        .filesystem_root(common::scratch_root("preload"))
        .build();

    let code = stub_code(CODE_BYTES);
    assert!(userland::install_image(kernel.fs.as_ref(), "flat", &code));
    register_walker(&kernel, "flat", walk_ops(&code, 16));

    assert_eq!(run_to_completion(&kernel, "flat"), 0);
    assert_eq!(Statistics::get(&kernel.stats.page_faults), 0);
    assert_eq!(Statistics::get(&kernel.stats.pages_swapped_out), 0);
}

/// A preload build with too few frames cannot construct the address space;
/// the child reports a -1 exit instead of taking the kernel down.
#[test]
fn preload_exhaustion_fails_the_process() {
    common::init_logging();
    let kernel = KernelBuilder::new()
        .physical_frames(4)
        .memory_mode(MemoryMode::Preload)
        .filesystem_root(common::scratch_root("exhaust"))
        .build();

    let code = stub_code(CODE_BYTES);
    assert!(userland::install_image(kernel.fs.as_ref(), "huge", &code));
    register_walker(&kernel, "huge", walk_ops(&code, 16));

    assert_eq!(run_to_completion(&kernel, "huge"), -1);
}

/// Two processes sharing four frames through the TLB, preempted by the
/// timer: stale translations surviving a context switch would hand one
/// process the other's pages.
#[test]
fn tlb_stays_coherent_across_context_switches() {
    common::init_logging();
    let kernel = KernelBuilder::new()
        .physical_frames(4)
        .memory_mode(MemoryMode::Paged)
        .use_tlb(true)
        .timer(true)
        .filesystem_root(common::scratch_root("tlb"))
        .build();

    let code_a = stub_code(CODE_BYTES);
    let code_b: Vec<u8> = (0..CODE_BYTES).map(|i| (i * 13 + 5) as u8).collect();
    assert!(userland::install_image(kernel.fs.as_ref(), "tlb-a", &code_a));
    assert!(userland::install_image(kernel.fs.as_ref(), "tlb-b", &code_b));

    let passes_over = |code: &[u8]| -> Vec<MemOp> {
        let mut ops = Vec::new();
        for _ in 0..20 {
            for vpn in 0..8 {
                let va = vpn * PAGE_SIZE;
                ops.push(MemOp::ReadExpect {
                    va,
                    size: 1,
                    expect: code[va] as i32,
                });
            }
        }
        ops
    };
    register_walker(&kernel, "tlb-a", passes_over(&code_a));
    register_walker(&kernel, "tlb-b", passes_over(&code_b));

    kernel.run(move |k| {
        let pid_a = creation::exec(&k.arc(), "tlb-a", "tlb-a").expect("exec a");
        let pid_b = creation::exec(&k.arc(), "tlb-b", "tlb-b").expect("exec b");
        let tid_a = k.processes.get(pid_a.0 as i32).expect("pid a");
        let tid_b = k.processes.get(pid_b.0 as i32).expect("pid b");
        assert_eq!(thread::join(k, tid_a), 0, "process a read foreign pages");
        assert_eq!(thread::join(k, tid_b), 0, "process b read foreign pages");
        mm::validate(k).expect("memory invariants");
        // The timer chain keeps interrupts pending, so quiescence never
        // triggers; stop explicitly.
        k.interrupt.halt(k);
    });
}

/// A validator thread interleaved with two paging processes: the allocator
/// bitmap, core map, resident FIFO and page tables must agree at every
/// preemption point.
#[test]
fn invariants_hold_under_paging_load() {
    common::init_logging();
    let kernel = KernelBuilder::new()
        .physical_frames(4)
        .memory_mode(MemoryMode::Paged)
        .timer(true)
        .filesystem_root(common::scratch_root("invariant"))
        .build();

    let code = stub_code(CODE_BYTES);
    assert!(userland::install_image(kernel.fs.as_ref(), "churn-a", &code));
    assert!(userland::install_image(kernel.fs.as_ref(), "churn-b", &code));

    let churn = |code: &[u8]| -> Vec<MemOp> {
        let mut ops = Vec::new();
        for _ in 0..15 {
            for vpn in 0..16 {
                let va = vpn * PAGE_SIZE;
                let expect = if vpn < 8 { code[va] as i32 } else { 0 };
                ops.push(MemOp::ReadExpect { va, size: 1, expect });
            }
        }
        ops
    };
    register_walker(&kernel, "churn-a", churn(&code));
    register_walker(&kernel, "churn-b", churn(&code));

    kernel.run(move |k| {
        let stop = Arc::new(AtomicBool::new(false));

        let pid_a = creation::exec(&k.arc(), "churn-a", "churn-a").expect("exec a");
        let pid_b = creation::exec(&k.arc(), "churn-b", "churn-b").expect("exec b");

        let stop_flag = Arc::clone(&stop);
        let checker = thread::fork(&k.arc(), "checker", 4, move |k| {
            while !stop_flag.load(Ordering::SeqCst) {
                mm::validate(k).expect("memory invariants while paging");
                thread::yield_now(k);
            }
        });

        let tid_a = k.processes.get(pid_a.0 as i32).expect("pid a");
        let tid_b = k.processes.get(pid_b.0 as i32).expect("pid b");
        assert_eq!(thread::join(k, tid_a), 0);
        assert_eq!(thread::join(k, tid_b), 0);

        stop.store(true, Ordering::SeqCst);
        thread::join(k, checker);
        k.interrupt.halt(k);
    });
}
