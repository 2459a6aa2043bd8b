//! Shared helpers for the integration suites

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use osprey_kernel::{Kernel, KernelBuilder};

static NEXT_SCRATCH: AtomicUsize = AtomicUsize::new(0);

/// Fresh directory for one test's simulated file system, unique across
/// concurrently running tests.
pub fn scratch_root(tag: &str) -> PathBuf {
    let n = NEXT_SCRATCH.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("osprey-{}-{}-{}", tag, std::process::id(), n))
}

pub fn init_logging() {
    osprey_kernel::logger::init(log::LevelFilter::Warn);
}

/// A kernel with default options and a private scratch file system; enough
/// for the thread and synchronization tests.
pub fn plain_kernel(tag: &str) -> Arc<Kernel> {
    init_logging();
    KernelBuilder::new()
        .filesystem_root(scratch_root(tag))
        .build()
}

/// Write `contents` into the simulated file system as `name`.
pub fn put_file(kernel: &Kernel, name: &str, contents: &[u8]) {
    assert!(kernel.fs.create(name, 0), "create {:?}", name);
    let mut file = kernel.fs.open(name).expect("open just-created file");
    assert_eq!(file.write_at(contents, 0), contents.len());
}

/// Read a whole file back out of the simulated file system.
pub fn get_file(kernel: &Kernel, name: &str) -> Option<Vec<u8>> {
    let mut file = kernel.fs.open(name)?;
    let mut contents = vec![0u8; file.length()];
    let n = file.read_at(&mut contents, 0);
    contents.truncate(n);
    Some(contents)
}
