//! Page-fault service
//!
//! Entered from the exception dispatcher. Makes the faulting page resident
//! and, on TLB builds, installs the fresh translation. The program counter
//! is never advanced on this path: the simulator re-executes the faulting
//! instruction against the updated translation state.

use log::trace;

use crate::bootstrap::Kernel;
use crate::machine::PAGE_SIZE;
use crate::mm::addrspace;
use crate::stats::Statistics;

/// Resolve a fault at `bad_vaddr` for the current thread.
pub fn handle(kernel: &Kernel, bad_vaddr: usize) {
    Statistics::bump(&kernel.stats.page_faults);

    let tcb = kernel.current_thread();
    let pid = tcb
        .space()
        .expect("page fault on a thread with no address space");
    let vpn = bad_vaddr / PAGE_SIZE;
    trace!(
        "page fault: pid {}, vaddr {:#x} (vpn {})",
        pid,
        bad_vaddr,
        vpn
    );

    let entry = addrspace::get_page(kernel, pid, vpn);
    debug_assert!(entry.is_valid(), "fault service left the page non-resident");

    if kernel.machine.has_tlb() {
        let mut rng = kernel.rng.lock();
        kernel.machine.tlb_install(entry, &mut rng);
    }
}
