//! Host-backed file system
//!
//! Each simulated file is a host file directly under the configured root
//! directory. Names are flat: anything that looks like a path is rejected
//! so user programs cannot reach outside the root.

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use log::{debug, warn};

use super::{File, FileSystem};

pub struct HostFileSystem {
    root: PathBuf,
}

impl HostFileSystem {
    /// Root the file system at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn resolve(&self, name: &str) -> Option<PathBuf> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
            warn!("rejecting file name {:?}", name);
            return None;
        }
        Some(self.root.join(name))
    }
}

impl FileSystem for HostFileSystem {
    fn create(&self, name: &str, initial_size: usize) -> bool {
        let Some(path) = self.resolve(name) else {
            return false;
        };
        let created = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .and_then(|f| f.set_len(initial_size as u64));
        match created {
            Ok(()) => {
                debug!("created file {:?} ({} bytes)", name, initial_size);
                true
            }
            Err(e) => {
                warn!("create {:?} failed: {}", name, e);
                false
            }
        }
    }

    fn open(&self, name: &str) -> Option<Box<dyn File>> {
        let path = self.resolve(name)?;
        match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => Some(Box::new(HostFile { file })),
            Err(_) => None,
        }
    }

    fn remove(&self, name: &str) -> bool {
        let Some(path) = self.resolve(name) else {
            return false;
        };
        fs::remove_file(path).is_ok()
    }
}

struct HostFile {
    file: fs::File,
}

impl File for HostFile {
    fn read_at(&mut self, buf: &mut [u8], offset: usize) -> usize {
        if self.file.seek(SeekFrom::Start(offset as u64)).is_err() {
            return 0;
        }
        read_full(&mut self.file, buf)
    }

    fn write_at(&mut self, buf: &[u8], offset: usize) -> usize {
        if self.file.seek(SeekFrom::Start(offset as u64)).is_err() {
            return 0;
        }
        match self.file.write_all(buf) {
            Ok(()) => buf.len(),
            Err(_) => 0,
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        read_full(&mut self.file, buf)
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        match self.file.write_all(buf) {
            Ok(()) => buf.len(),
            Err(_) => 0,
        }
    }

    fn length(&self) -> usize {
        self.file.metadata().map(|m| m.len() as usize).unwrap_or(0)
    }
}

/// Read until `buf` is full or the file ends.
fn read_full(file: &mut fs::File, buf: &mut [u8]) -> usize {
    let mut total = 0;
    while total < buf.len() {
        match file.read(&mut buf[total..]) {
            Ok(0) | Err(_) => break,
            Ok(n) => total += n,
        }
    }
    total
}
