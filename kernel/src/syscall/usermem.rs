//! Kernel-side access to user memory
//!
//! Every cross-boundary byte goes through the machine's translated
//! accessors. A page fault along the way is serviced in place and the
//! access retried once; a second fault, or any other failure, means the
//! user handed us an address the kernel cannot honor, which is fatal.

use crate::bootstrap::Kernel;
use crate::machine::translate::Exception;
use crate::mm::page_fault;

/// Upper bound on NUL-terminated strings copied in from user space.
pub const USER_STRING_MAX: usize = 256;

fn read_user(kernel: &Kernel, vaddr: usize, size: usize) -> i32 {
    match kernel.machine.read_mem(kernel, vaddr, size) {
        Ok(value) => value,
        Err(Exception::PageFault { bad_vaddr }) => {
            page_fault::handle(kernel, bad_vaddr);
            kernel
                .machine
                .read_mem(kernel, vaddr, size)
                .unwrap_or_else(|e| {
                    panic!("user read at {:#x} failed after fault service: {:?}", vaddr, e)
                })
        }
        Err(e) => panic!("user read at {:#x} failed: {:?}", vaddr, e),
    }
}

fn write_user(kernel: &Kernel, vaddr: usize, size: usize, value: i32) {
    match kernel.machine.write_mem(kernel, vaddr, size, value) {
        Ok(()) => {}
        Err(Exception::PageFault { bad_vaddr }) => {
            page_fault::handle(kernel, bad_vaddr);
            kernel
                .machine
                .write_mem(kernel, vaddr, size, value)
                .unwrap_or_else(|e| {
                    panic!(
                        "user write at {:#x} failed after fault service: {:?}",
                        vaddr, e
                    )
                })
        }
        Err(e) => panic!("user write at {:#x} failed: {:?}", vaddr, e),
    }
}

/// Copy a NUL-terminated string out of user space.
pub fn read_str_from_user(kernel: &Kernel, vaddr: usize) -> String {
    let mut bytes = Vec::new();
    loop {
        let byte = read_user(kernel, vaddr + bytes.len(), 1) as u8;
        if byte == 0 {
            break;
        }
        bytes.push(byte);
        assert!(
            bytes.len() < USER_STRING_MAX,
            "user string exceeds the kernel buffer"
        );
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Copy exactly `count` bytes out of user space.
pub fn read_buf_from_user(kernel: &Kernel, vaddr: usize, count: usize) -> Vec<u8> {
    (0..count)
        .map(|i| read_user(kernel, vaddr + i, 1) as u8)
        .collect()
}

/// Copy a string into user space, including the terminating NUL.
pub fn write_str_to_user(kernel: &Kernel, s: &str, vaddr: usize) {
    for (i, &byte) in s.as_bytes().iter().enumerate() {
        write_user(kernel, vaddr + i, 1, byte as i32);
    }
    write_user(kernel, vaddr + s.len(), 1, 0);
}

/// Copy exactly `buf.len()` bytes into user space, no terminator.
pub fn write_buf_to_user(kernel: &Kernel, buf: &[u8], vaddr: usize) {
    for (i, &byte) in buf.iter().enumerate() {
        write_user(kernel, vaddr + i, 1, byte as i32);
    }
}

/// Store a 32-bit value into user space.
pub fn write_word_to_user(kernel: &Kernel, vaddr: usize, value: i32) {
    write_user(kernel, vaddr, 4, value);
}
