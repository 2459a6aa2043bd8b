//! Virtual-to-physical translation
//!
//! The machine translates every user memory access through either the
//! software-loaded TLB (when configured) or the active address space's page
//! table. A failed translation raises an [`Exception`]; the faulting address
//! lands in `BadVAddrReg` and the access is expected to be retried after the
//! kernel services the fault.

use bitflags::bitflags;

use super::{Machine, BAD_VADDR_REG, PAGE_SIZE};
use crate::bootstrap::Kernel;

bitflags! {
    /// State bits of a translation entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u8 {
        /// The entry maps a resident frame.
        const VALID = 1 << 0;
        /// The page has been referenced since the entry was installed.
        const USE = 1 << 1;
        /// The page has been written since the entry was installed.
        const DIRTY = 1 << 2;
        /// Writes through this entry raise a read-only fault.
        const READ_ONLY = 1 << 3;
    }
}

/// One page-table or TLB entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationEntry {
    /// Virtual page number.
    pub vpn: usize,
    /// Resident frame, present only while the entry is valid.
    pub ppn: Option<usize>,
    pub flags: EntryFlags,
}

impl TranslationEntry {
    pub const INVALID: TranslationEntry = TranslationEntry {
        vpn: 0,
        ppn: None,
        flags: EntryFlags::empty(),
    };

    /// A not-yet-resident entry for the given virtual page.
    pub const fn absent(vpn: usize) -> Self {
        Self {
            vpn,
            ppn: None,
            flags: EntryFlags::empty(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.flags.contains(EntryFlags::VALID)
    }
}

/// Faults and traps delivered to the exception handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    /// A program executed a system call.
    Syscall,
    /// No valid translation for a virtual address.
    PageFault { bad_vaddr: usize },
    /// Write attempted through a read-only translation.
    ReadOnly { bad_vaddr: usize },
    /// Unaligned or out-of-range address.
    AddressError { bad_vaddr: usize },
    /// Integer overflow in user code.
    Overflow,
    /// Undecodable instruction.
    IllegalInstruction,
}

impl Machine {
    /// Translate a virtual address, updating use/dirty bits on success.
    ///
    /// Only 1-, 2- and 4-byte naturally aligned accesses are defined.
    fn translate(
        &self,
        kernel: &Kernel,
        vaddr: usize,
        size: usize,
        writing: bool,
    ) -> Result<usize, Exception> {
        if !matches!(size, 1 | 2 | 4) || vaddr % size != 0 {
            return Err(Exception::AddressError { bad_vaddr: vaddr });
        }

        let vpn = vaddr / PAGE_SIZE;
        let offset = vaddr % PAGE_SIZE;

        let ppn = match &self.tlb {
            Some(tlb) => {
                let mut tlb = tlb.lock();
                let entry = tlb
                    .iter_mut()
                    .find(|e| e.is_valid() && e.vpn == vpn)
                    .ok_or(Exception::PageFault { bad_vaddr: vaddr })?;
                if writing && entry.flags.contains(EntryFlags::READ_ONLY) {
                    return Err(Exception::ReadOnly { bad_vaddr: vaddr });
                }
                entry.flags.insert(EntryFlags::USE);
                if writing {
                    entry.flags.insert(EntryFlags::DIRTY);
                }
                entry.ppn.expect("valid TLB entry without a frame")
            }
            None => {
                let pid = self
                    .active_space
                    .lock()
                    .expect("user memory access with no active address space");
                let mut spaces = kernel.spaces.lock();
                let space = spaces
                    .get_mut(pid)
                    .expect("active address space missing from the space table");
                if vpn >= space.num_pages() {
                    return Err(Exception::AddressError { bad_vaddr: vaddr });
                }
                let entry = &mut space.page_table_mut()[vpn];
                if !entry.is_valid() {
                    return Err(Exception::PageFault { bad_vaddr: vaddr });
                }
                if writing && entry.flags.contains(EntryFlags::READ_ONLY) {
                    return Err(Exception::ReadOnly { bad_vaddr: vaddr });
                }
                entry.flags.insert(EntryFlags::USE);
                if writing {
                    entry.flags.insert(EntryFlags::DIRTY);
                }
                entry.ppn.expect("valid page-table entry without a frame")
            }
        };

        Ok(ppn * PAGE_SIZE + offset)
    }

    /// Read `size` bytes at `vaddr` (little-endian, zero-extended).
    pub fn read_mem(
        &self,
        kernel: &Kernel,
        vaddr: usize,
        size: usize,
    ) -> Result<i32, Exception> {
        let paddr = self.translate(kernel, vaddr, size, false).map_err(|e| {
            self.write_register(BAD_VADDR_REG, vaddr as i32);
            e
        })?;
        let memory = self.memory.lock();
        let value = match size {
            1 => memory[paddr] as i32,
            2 => u16::from_le_bytes([memory[paddr], memory[paddr + 1]]) as i32,
            _ => i32::from_le_bytes([
                memory[paddr],
                memory[paddr + 1],
                memory[paddr + 2],
                memory[paddr + 3],
            ]),
        };
        Ok(value)
    }

    /// Write the low `size` bytes of `value` at `vaddr` (little-endian).
    pub fn write_mem(
        &self,
        kernel: &Kernel,
        vaddr: usize,
        size: usize,
        value: i32,
    ) -> Result<(), Exception> {
        let paddr = self.translate(kernel, vaddr, size, true).map_err(|e| {
            self.write_register(BAD_VADDR_REG, vaddr as i32);
            e
        })?;
        let bytes = value.to_le_bytes();
        let mut memory = self.memory.lock();
        memory[paddr..paddr + size].copy_from_slice(&bytes[..size]);
        Ok(())
    }
}
