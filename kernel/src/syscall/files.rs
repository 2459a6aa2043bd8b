//! File and console system calls

use log::{debug, warn};

use super::{usermem, CONSOLE_INPUT, CONSOLE_OUTPUT};
use crate::bootstrap::Kernel;

/// `Create(name*)`: make an empty file. Register 2 reports 0 or -1.
pub(super) fn sc_create(kernel: &Kernel) {
    let name_va = kernel.machine.read_register(4) as u32 as usize;
    let name = usermem::read_str_from_user(kernel, name_va);

    if kernel.fs.create(&name, 0) {
        debug!("created file {:?}", name);
        kernel.machine.write_register(2, 0);
    } else {
        warn!("could not create file {:?}", name);
        kernel.machine.write_register(2, -1);
    }
}

/// `Open(name*) -> fd`: allocate a per-thread descriptor, -1 on failure.
pub(super) fn sc_open(kernel: &Kernel) {
    let name_va = kernel.machine.read_register(4) as u32 as usize;
    let name = usermem::read_str_from_user(kernel, name_va);

    match kernel.fs.open(&name) {
        Some(file) => {
            let fd = kernel.current_thread().add_file(file);
            debug!("opened file {:?} as descriptor {}", name, fd);
            kernel.machine.write_register(2, fd);
        }
        None => {
            warn!("could not open file {:?}", name);
            kernel.machine.write_register(2, -1);
        }
    }
}

/// `Close(fd)`: drop the descriptor, closing the file.
pub(super) fn sc_close(kernel: &Kernel) {
    let fd = kernel.machine.read_register(4);
    if kernel.current_thread().remove_file(fd) {
        kernel.machine.write_register(2, 0);
    } else {
        warn!("close of unknown descriptor {}", fd);
        kernel.machine.write_register(2, -1);
    }
}

/// `Read(buf*, size, fd) -> count`: from the console or an open file, then
/// copy back into the caller's buffer. Reading the output descriptor is an
/// error.
pub(super) fn sc_read(kernel: &Kernel) {
    let buf_va = kernel.machine.read_register(4) as u32 as usize;
    let size = kernel.machine.read_register(5);
    let fd = kernel.machine.read_register(6);

    if size < 0 {
        kernel.machine.write_register(2, -1);
        return;
    }
    let size = size as usize;

    let count = match fd {
        CONSOLE_OUTPUT => -1,
        CONSOLE_INPUT => {
            let mut data = Vec::with_capacity(size);
            while data.len() < size {
                match kernel.console.get_char(kernel) {
                    Some(ch) => data.push(ch),
                    None => break,
                }
            }
            usermem::write_buf_to_user(kernel, &data, buf_va);
            data.len() as i32
        }
        _ => {
            let tcb = kernel.current_thread();
            let mut data = vec![0u8; size];
            let read = {
                let mut files = tcb.files.lock();
                files.get_mut(&fd).map(|file| file.read(&mut data))
            };
            match read {
                Some(n) => {
                    usermem::write_buf_to_user(kernel, &data[..n], buf_va);
                    n as i32
                }
                None => {
                    warn!("read from unknown descriptor {}", fd);
                    -1
                }
            }
        }
    };

    kernel.machine.write_register(2, count);
}

/// `Write(buf*, size, fd) -> count`: to the console or an open file.
/// Writing the input descriptor consumes nothing and reports -1.
pub(super) fn sc_write(kernel: &Kernel) {
    let buf_va = kernel.machine.read_register(4) as u32 as usize;
    let size = kernel.machine.read_register(5);
    let fd = kernel.machine.read_register(6);

    if size < 0 {
        kernel.machine.write_register(2, -1);
        return;
    }
    let data = usermem::read_buf_from_user(kernel, buf_va, size as usize);

    let count = match fd {
        CONSOLE_INPUT => {
            debug!("write to the console input descriptor ignored");
            -1
        }
        CONSOLE_OUTPUT => {
            for &byte in &data {
                kernel.console.put_char(kernel, byte);
            }
            data.len() as i32
        }
        _ => {
            let tcb = kernel.current_thread();
            let written = {
                let mut files = tcb.files.lock();
                files.get_mut(&fd).map(|file| file.write(&data))
            };
            match written {
                Some(n) => n as i32,
                None => {
                    warn!("write to unknown descriptor {}", fd);
                    -1
                }
            }
        }
    };

    kernel.machine.write_register(2, count);
}
