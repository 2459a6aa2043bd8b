//! Memory management: frames, core map, address spaces, fault handling

pub mod addrspace;
pub mod core_map;
pub mod frame_allocator;
pub mod page_fault;

pub use addrspace::{AddrSpace, SpaceTable};
pub use core_map::{CoreMap, CoreMapEntry};
pub use frame_allocator::FrameAllocator;

use std::collections::{BTreeMap, BTreeSet};

use crate::bootstrap::Kernel;
use crate::error::{KernelError, KernelResult};
use crate::process::Pid;

/// How user memory is materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryMode {
    /// Every page is allocated and filled when the space is built.
    Preload,
    /// Pages load from the executable on first fault; no eviction.
    Demand,
    /// Demand loading plus eviction to a per-process swap file.
    #[default]
    Paged,
}

/// Residency of one virtual page, tracked by the shadow table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    NotInMemory,
    InMemory,
    SwappedOut,
}

/// Cross-check the memory structures against each other: every valid
/// page-table entry owns exactly one frame; the core map, the allocator
/// bitmap and the resident-page FIFO all agree on which frames those are.
/// Call at quiescent points only.
pub fn validate(kernel: &Kernel) -> KernelResult<()> {
    let spaces = kernel.spaces.lock();

    let mut owned: BTreeMap<usize, (Pid, usize)> = BTreeMap::new();
    for (pid, space) in spaces.iter() {
        for (vpn, entry) in space.page_table().iter().enumerate() {
            if entry.is_valid() {
                let frame = entry.ppn.ok_or(KernelError::InvalidState {
                    expected: "valid entry backed by a frame",
                    actual: "valid entry with no frame",
                })?;
                if frame >= kernel.machine.num_frames() {
                    return Err(KernelError::InvalidState {
                        expected: "frame within the physical pool",
                        actual: "frame number out of range",
                    });
                }
                if owned.insert(frame, (pid, vpn)).is_some() {
                    return Err(KernelError::InvalidState {
                        expected: "one page per frame",
                        actual: "two page tables share a frame",
                    });
                }
            } else if entry.ppn.is_some() {
                return Err(KernelError::InvalidState {
                    expected: "invalid entries hold no frame",
                    actual: "invalid entry with a stale frame",
                });
            }
        }
    }

    let (entries, loaded) = kernel.core_map.snapshot();
    for (&frame, &(pid, vpn)) in &owned {
        let entry = entries[frame];
        if entry.owner != Some(pid) || entry.vpn != vpn {
            return Err(KernelError::InvalidState {
                expected: "core map mirrors the page tables",
                actual: "core map disagrees with a page table",
            });
        }
        if !kernel.frames.is_allocated(frame) {
            return Err(KernelError::InvalidState {
                expected: "owned frames marked in the allocator",
                actual: "owned frame with a clear allocator bit",
            });
        }
    }
    for (frame, entry) in entries.iter().enumerate() {
        if entry.owner.is_some() && !owned.contains_key(&frame) {
            return Err(KernelError::InvalidState {
                expected: "core map entries backed by page tables",
                actual: "core map entry with no page-table entry",
            });
        }
    }
    for frame in 0..kernel.machine.num_frames() {
        if kernel.frames.is_allocated(frame) != owned.contains_key(&frame) {
            return Err(KernelError::InvalidState {
                expected: "allocator bitmap matches the set of mapped frames",
                actual: "allocator bitmap out of sync",
            });
        }
    }

    let loaded_set: BTreeSet<usize> = loaded.iter().copied().collect();
    if loaded_set.len() != loaded.len() {
        return Err(KernelError::InvalidState {
            expected: "each resident frame queued once",
            actual: "duplicate frame in the resident FIFO",
        });
    }
    let owned_set: BTreeSet<usize> = owned.keys().copied().collect();
    if loaded_set != owned_set {
        return Err(KernelError::InvalidState {
            expected: "resident FIFO matches the set of owned frames",
            actual: "resident FIFO out of sync",
        });
    }

    Ok(())
}
