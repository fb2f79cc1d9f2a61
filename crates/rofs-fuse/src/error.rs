//! Error types for the ROFS daemon.

use thiserror::Error;

/// Errors surfaced by the mount session and the read path.
#[derive(Debug, Error)]
pub enum RofsError {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A pipe pair could not be created or tuned at startup.
    #[error("pipe pool setup failed: {0}")]
    PipeSetup(std::io::Error),

    /// All pipe slots are in use.
    #[error("pipe pool exhausted ({size} slots in use)")]
    PoolExhausted {
        /// Total slots in the pool.
        size: usize,
    },

    /// Too many response buffers are in flight.
    #[error("in-flight buffer cap reached ({max} buffers)")]
    TooManyInFlight {
        /// Configured cap.
        max: usize,
    },

    /// A splice transfer through a pipe slot failed.
    #[error("splice transfer failed: {0}")]
    Splice(std::io::Error),

    /// Unknown inode referenced by a kernel request.
    #[error("inode not found: {ino}")]
    NotFound {
        /// Requested inode.
        ino: u64,
    },

    /// Invalid argument from the caller.
    #[error("invalid argument: {msg}")]
    InvalidArgument {
        /// Detail.
        msg: String,
    },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RofsError>;

impl RofsError {
    /// Map an error to the errno reported to the kernel.
    pub fn to_errno(&self) -> i32 {
        use libc::*;
        match self {
            RofsError::Io(e) => e.raw_os_error().unwrap_or(EIO),
            RofsError::PipeSetup(_) => EIO,
            RofsError::PoolExhausted { .. } => EAGAIN,
            RofsError::TooManyInFlight { .. } => EAGAIN,
            RofsError::Splice(e) => e.raw_os_error().unwrap_or(EIO),
            RofsError::NotFound { .. } => ENOENT,
            RofsError::InvalidArgument { .. } => EINVAL,
        }
    }
}
