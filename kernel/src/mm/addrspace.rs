//! Address spaces and the demand-paging engine
//!
//! An address space is a page table sized from its NOFF image plus stack,
//! an optional shadow table tracking where each page currently lives, the
//! open executable (pages are loaded from it on demand) and, under full
//! paging, a per-process swap file. Spaces live in an arena keyed by pid;
//! the core map refers to them by pid, so eviction can reach the owner of
//! any resident frame without back-pointers.

use std::collections::BTreeMap;

use log::{debug, trace};

use super::{MemoryMode, PageState};
use crate::bootstrap::Kernel;
use crate::error::{FsError, KernelError, KernelResult};
use crate::fs::File;
use crate::machine::translate::{EntryFlags, TranslationEntry};
use crate::machine::{
    Machine, NEXT_PC_REG, NUM_TOTAL_REGS, PAGE_SIZE, PC_REG, STACK_REG, USER_STACK_SIZE,
};
use crate::noff::{NoffHeader, Segment};
use crate::process::Pid;
use crate::stats::Statistics;
use crate::utils::div_round_up;

/// Arena of live address spaces, keyed by pid.
pub struct SpaceTable {
    map: BTreeMap<Pid, AddrSpace>,
}

impl SpaceTable {
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, pid: Pid, space: AddrSpace) {
        let previous = self.map.insert(pid, space);
        assert!(previous.is_none(), "pid {} already has an address space", pid);
    }

    pub fn get(&self, pid: Pid) -> Option<&AddrSpace> {
        self.map.get(&pid)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut AddrSpace> {
        self.map.get_mut(&pid)
    }

    pub fn remove(&mut self, pid: Pid) -> Option<AddrSpace> {
        self.map.remove(&pid)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Pid, &AddrSpace)> {
        self.map.iter().map(|(&pid, space)| (pid, space))
    }
}

impl Default for SpaceTable {
    fn default() -> Self {
        Self::new()
    }
}

/// One user program's memory.
pub struct AddrSpace {
    pid: Pid,
    num_pages: usize,
    page_table: Vec<TranslationEntry>,
    /// Where each page lives; absent when everything is preloaded.
    shadow: Option<Vec<PageState>>,
    noff: NoffHeader,
    executable: Box<dyn File>,
    swap: Option<Box<dyn File>>,
    swap_name: Option<String>,
}

impl AddrSpace {
    /// Build an address space for `pid` from an open NOFF image.
    ///
    /// Preloading acquires and fills every frame up front; the demand modes
    /// start with nothing resident. Under full paging the backing store
    /// `SWAP.<pid>` is created here, sized to cover the whole space.
    pub fn new(kernel: &Kernel, pid: Pid, mut executable: Box<dyn File>) -> KernelResult<Self> {
        let noff = NoffHeader::read_from(&mut *executable)?;
        let size = noff.image_size() + USER_STACK_SIZE;
        let num_pages = div_round_up(size, PAGE_SIZE);
        debug!(
            "initializing address space for pid {}: {} pages ({} bytes)",
            pid,
            num_pages,
            num_pages * PAGE_SIZE
        );

        let mode = kernel.options.memory_mode;
        let mut space = Self {
            pid,
            num_pages,
            page_table: (0..num_pages).map(TranslationEntry::absent).collect(),
            shadow: match mode {
                MemoryMode::Preload => None,
                MemoryMode::Demand | MemoryMode::Paged => {
                    Some(vec![PageState::NotInMemory; num_pages])
                }
            },
            noff,
            executable,
            swap: None,
            swap_name: None,
        };

        if mode == MemoryMode::Preload {
            space.preload(kernel)?;
        }

        if mode == MemoryMode::Paged {
            let swap_name = format!("SWAP.{}", pid);
            if !kernel.fs.create(&swap_name, num_pages * PAGE_SIZE) {
                return Err(KernelError::FsError(FsError::CreateFailed));
            }
            let swap = kernel
                .fs
                .open(&swap_name)
                .ok_or(KernelError::FsError(FsError::IoError))?;
            space.swap = Some(swap);
            space.swap_name = Some(swap_name);
        }

        Ok(space)
    }

    /// Acquire, zero and fill every frame at construction time.
    fn preload(&mut self, kernel: &Kernel) -> KernelResult<()> {
        let mut acquired = Vec::with_capacity(self.num_pages);
        for _ in 0..self.num_pages {
            match kernel.frames.allocate() {
                Some(frame) => acquired.push(frame),
                None => {
                    for frame in acquired {
                        kernel.frames.clear(frame);
                    }
                    return Err(KernelError::OutOfMemory {
                        requested: self.num_pages,
                        available: kernel.frames.free_count(),
                    });
                }
            }
        }

        for (vpn, &frame) in acquired.iter().enumerate() {
            kernel.machine.zero_frame(frame);
            kernel.core_map.assign(frame, self.pid, vpn);
            self.page_table[vpn] = TranslationEntry {
                vpn,
                ppn: Some(frame),
                flags: EntryFlags::VALID,
            };
        }

        for vpn in 0..self.num_pages {
            let code = self.noff.code;
            let init_data = self.noff.init_data;
            self.copy_segment_page(&kernel.machine, vpn, code);
            self.copy_segment_page(&kernel.machine, vpn, init_data);
        }
        Ok(())
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn num_pages(&self) -> usize {
        self.num_pages
    }

    pub fn page_table(&self) -> &[TranslationEntry] {
        &self.page_table
    }

    pub(crate) fn page_table_mut(&mut self) -> &mut [TranslationEntry] {
        &mut self.page_table
    }

    fn page_state(&self, vpn: usize) -> Option<PageState> {
        self.shadow.as_ref().map(|shadow| shadow[vpn])
    }

    fn set_page_state(&mut self, vpn: usize, state: PageState) {
        if let Some(shadow) = self.shadow.as_mut() {
            shadow[vpn] = state;
        }
    }

    /// Kernel-side translation of a mapped virtual address. Returns `None`
    /// for pages that are not resident; user-mode accesses instead go
    /// through the machine and fault.
    pub fn translate(&self, vaddr: usize) -> Option<usize> {
        let entry = self.page_table.get(vaddr / PAGE_SIZE)?;
        if !entry.is_valid() {
            return None;
        }
        Some(entry.ppn? * PAGE_SIZE + vaddr % PAGE_SIZE)
    }

    /// Copy into a resident page the slice of `segment` that overlaps it.
    /// The clip matters: a page can straddle the end of one segment and the
    /// start of the next, and bytes no segment covers must stay zero.
    fn copy_segment_page(&mut self, machine: &Machine, vpn: usize, segment: Segment) {
        if segment.size == 0 {
            return;
        }
        let page = vpn * PAGE_SIZE..(vpn + 1) * PAGE_SIZE;
        let seg = segment.va_range();
        let start = page.start.max(seg.start);
        let end = page.end.min(seg.end);
        if start >= end {
            return;
        }

        let paddr = self
            .translate(start)
            .expect("loading a segment into a non-resident page");
        let file_offset = segment.in_file_addr as usize + (start - seg.start);
        let mut buf = vec![0u8; end - start];
        let n = self.executable.read_at(&mut buf, file_offset);
        machine.write_phys(paddr, &buf[..n]);
    }

    /// Set up the register file for a fresh program: execution starts at
    /// virtual address 0, stack pointer just below the top of the space.
    pub fn init_registers(&self, kernel: &Kernel) {
        for reg in 0..NUM_TOTAL_REGS {
            kernel.machine.write_register(reg, 0);
        }
        kernel.machine.write_register(PC_REG, 0);
        kernel.machine.write_register(NEXT_PC_REG, 4);
        let stack_top = (self.num_pages * PAGE_SIZE - 16) as i32;
        kernel.machine.write_register(STACK_REG, stack_top);
        trace!("stack register for pid {} set to {}", self.pid, stack_top);
    }
}

// ---------------------------------------------------------------------------
// Paging engine
// ---------------------------------------------------------------------------

/// Make `vpn` resident and return its page-table entry. Dispatches on the
/// shadow state: a never-loaded page comes from the executable, a swapped
/// page from the backing store, a resident page is returned as is.
pub fn get_page(kernel: &Kernel, pid: Pid, vpn: usize) -> TranslationEntry {
    let mut spaces = kernel.spaces.lock();

    let state = {
        let space = spaces.get(pid).expect("page lookup for a dead space");
        assert!(
            vpn < space.num_pages(),
            "virtual page {} out of range for pid {}",
            vpn,
            pid
        );
        space.page_state(vpn)
    };

    match state {
        None | Some(PageState::InMemory) => {}
        Some(PageState::NotInMemory) => load_page(kernel, &mut spaces, pid, vpn),
        Some(PageState::SwappedOut) => swap_in(kernel, &mut spaces, pid, vpn),
    }

    spaces
        .get(pid)
        .expect("space vanished during paging")
        .page_table()[vpn]
}

/// Find a frame, evicting under full paging when the pool is dry.
fn acquire_frame(kernel: &Kernel, spaces: &mut SpaceTable) -> usize {
    if let Some(frame) = kernel.frames.allocate() {
        return frame;
    }
    match kernel.options.memory_mode {
        MemoryMode::Paged => {
            let frame = make_room(kernel, spaces);
            kernel.frames.mark(frame);
            frame
        }
        _ => panic!("out of physical frames and nothing is evictable"),
    }
}

/// First touch of a page: zero a frame and read in whatever slices of the
/// code and initialized-data segments cover it.
fn load_page(kernel: &Kernel, spaces: &mut SpaceTable, pid: Pid, vpn: usize) {
    let frame = acquire_frame(kernel, spaces);
    kernel.machine.zero_frame(frame);
    kernel.core_map.assign(frame, pid, vpn);

    let space = spaces.get_mut(pid).expect("loading a page for a dead space");
    trace!("pid {}: loading vpn {} into frame {}", pid, vpn, frame);
    space.page_table[vpn] = TranslationEntry {
        vpn,
        ppn: Some(frame),
        flags: EntryFlags::VALID,
    };
    let code = space.noff.code;
    let init_data = space.noff.init_data;
    space.copy_segment_page(&kernel.machine, vpn, code);
    space.copy_segment_page(&kernel.machine, vpn, init_data);
    space.set_page_state(vpn, PageState::InMemory);

    Statistics::bump(&kernel.stats.pages_loaded);
}

/// Bring a swapped-out page back from the backing store.
fn swap_in(kernel: &Kernel, spaces: &mut SpaceTable, pid: Pid, vpn: usize) {
    let frame = acquire_frame(kernel, spaces);
    kernel.core_map.assign(frame, pid, vpn);

    let space = spaces.get_mut(pid).expect("swapping in for a dead space");
    trace!("pid {}: swapping vpn {} into frame {}", pid, vpn, frame);
    let mut buf = [0u8; PAGE_SIZE];
    let swap = space.swap.as_mut().expect("swap-in without a swap file");
    let n = swap.read_at(&mut buf, vpn * PAGE_SIZE);
    assert_eq!(n, PAGE_SIZE, "short read from the swap file");
    kernel.machine.write_phys(frame * PAGE_SIZE, &buf);

    space.page_table[vpn] = TranslationEntry {
        vpn,
        ppn: Some(frame),
        flags: EntryFlags::VALID,
    };
    space.set_page_state(vpn, PageState::InMemory);

    Statistics::bump(&kernel.stats.pages_swapped_in);
}

/// Write a resident page to the backing store and release its frame. The
/// write-back completes before the frame can be reused, and any cached
/// translation of the frame is dropped.
fn swap_out(kernel: &Kernel, space: &mut AddrSpace, vpn: usize) {
    let entry = &mut space.page_table[vpn];
    let frame = entry.ppn.expect("swapping out a non-resident page");
    trace!(
        "pid {}: swapping vpn {} out of frame {}",
        space.pid,
        vpn,
        frame
    );

    let mut buf = [0u8; PAGE_SIZE];
    kernel.machine.read_phys(frame * PAGE_SIZE, &mut buf);
    let swap = space.swap.as_mut().expect("swap-out without a swap file");
    let n = swap.write_at(&buf, vpn * PAGE_SIZE);
    assert_eq!(n, PAGE_SIZE, "short write to the swap file");

    kernel.frames.clear(frame);
    let entry = &mut space.page_table[vpn];
    entry.ppn = None;
    entry
        .flags
        .remove(EntryFlags::VALID | EntryFlags::USE | EntryFlags::DIRTY);
    kernel.core_map.clear(frame);
    kernel.machine.tlb_invalidate_frame(frame);
    space.set_page_state(vpn, PageState::SwappedOut);

    Statistics::bump(&kernel.stats.pages_swapped_out);
}

/// Evict the oldest resident page, whoever owns it, and return the freed
/// frame. The returned frame is unowned and its allocator bit is clear.
fn make_room(kernel: &Kernel, spaces: &mut SpaceTable) -> usize {
    let victim = kernel
        .core_map
        .pop_oldest()
        .expect("nothing resident to evict");
    let (owner, vpn) = kernel
        .core_map
        .owner_of(victim)
        .expect("eviction victim has no owner");
    let space = spaces
        .get_mut(owner)
        .expect("core map names a space that no longer exists");
    swap_out(kernel, space, vpn);
    victim
}

/// Tear a space down: free every resident frame, clear its core-map
/// entries, and delete the swap file. No frame is released while the core
/// map still points at this space.
pub fn destroy(kernel: &Kernel, pid: Pid) {
    let space = {
        let mut spaces = kernel.spaces.lock();
        spaces.remove(pid)
    };
    let Some(space) = space else {
        return;
    };

    for entry in space.page_table.iter() {
        if entry.is_valid() {
            let frame = entry.ppn.expect("valid entry without a frame");
            trace!("pid {}: releasing frame {} (vpn {})", pid, frame, entry.vpn);
            kernel.core_map.clear(frame);
            kernel.frames.clear(frame);
            kernel.machine.tlb_invalidate_frame(frame);
        }
    }

    if let Some(name) = &space.swap_name {
        kernel.fs.remove(name);
    }
    if kernel.machine.active_space() == Some(pid) {
        kernel.machine.set_active_space(None);
    }
    debug!("destroyed address space of pid {}", pid);
}

/// Context-switch hook for the outgoing space: translations only persist
/// in page tables, so dirty TLB entries are written back before another
/// process can clobber the TLB.
pub fn save_state(kernel: &Kernel, pid: Pid) {
    let dirty = kernel.machine.tlb_dirty_entries();
    if dirty.is_empty() {
        return;
    }
    let mut spaces = kernel.spaces.lock();
    let Some(space) = spaces.get_mut(pid) else {
        return;
    };
    for entry in dirty {
        if entry.vpn < space.num_pages {
            space.page_table[entry.vpn] = entry;
        }
    }
}

/// Context-switch hook for the incoming space: no stale translation may
/// survive into the next process, so the TLB is flushed wholesale; without
/// a TLB the space's page table simply becomes the machine's active one.
pub fn restore_state(kernel: &Kernel, pid: Pid) {
    kernel.machine.tlb_invalidate_all();
    kernel.machine.set_active_space(Some(pid));
}
