//! Error types for the OspreyOS kernel
//!
//! Recoverable failures travel as [`KernelError`] values; violated kernel
//! invariants are asserted, never returned.

use core::fmt;

/// Main kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// No physical frame could satisfy an allocation
    OutOfMemory {
        requested: usize,
        available: usize,
    },
    /// An executable image failed validation
    InvalidExecutable {
        reason: &'static str,
    },
    /// Process lookup failed
    ProcessNotFound {
        pid: i32,
    },
    /// A subsystem was observed in a state it must not be in
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
    /// A bounded kernel table is full
    ResourceExhausted {
        resource: &'static str,
    },
    /// Filesystem-related errors
    FsError(FsError),
    /// A caller-supplied value was rejected
    InvalidArgument {
        name: &'static str,
    },
}

/// Filesystem-specific errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// File not found
    NotFound,
    /// Invalid file name
    InvalidPath,
    /// File descriptor not present in the caller's table
    BadFileDescriptor,
    /// I/O error during operation
    IoError,
    /// Creation failed
    CreateFailed,
}

/// Result type alias for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory {
                requested,
                available,
            } => write!(
                f,
                "out of memory: requested {} frames, {} available",
                requested, available
            ),
            Self::InvalidExecutable { reason } => {
                write!(f, "invalid executable: {}", reason)
            }
            Self::ProcessNotFound { pid } => write!(f, "process {} not found", pid),
            Self::InvalidState { expected, actual } => {
                write!(f, "invalid state: expected {}, got {}", expected, actual)
            }
            Self::ResourceExhausted { resource } => {
                write!(f, "resource exhausted: {}", resource)
            }
            Self::FsError(e) => write!(f, "filesystem error: {:?}", e),
            Self::InvalidArgument { name } => write!(f, "invalid argument: {}", name),
        }
    }
}

impl From<FsError> for KernelError {
    fn from(err: FsError) -> Self {
        Self::FsError(err)
    }
}
