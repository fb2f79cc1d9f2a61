//! Pre-allocated pool of kernel pipe pairs for splice transfers.
//!
//! The pool is created once at startup and never resized. Each slot is a
//! pipe pair with both ends non-blocking and close-on-exec, its kernel
//! buffer grown so a full FUSE read (plus header slack) fits in one
//! splice. Creation or tuning failure is fatal: the read path assumes
//! pipes are available.

use crate::error::{Result, RofsError};
use parking_lot::{Condvar, Mutex};
use std::ops::Deref;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use tracing::{debug, info};

/// Number of pipe pairs created at startup.
pub const DEFAULT_POOL_SIZE: usize = 10;

/// Tuned pipe buffer capacity: a 64 KiB read plus header slack.
pub const DEFAULT_PIPE_CAPACITY: usize = 16384 * 4 + 4096;

/// One kernel pipe pair.
#[derive(Debug)]
pub struct PipeSlot {
    read_fd: RawFd,
    write_fd: RawFd,
    capacity: usize,
}

impl PipeSlot {
    fn new(capacity: usize) -> std::io::Result<Self> {
        let mut fds = [0 as libc::c_int; 2];
        let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
        // F_SETPIPE_SZ rounds up and reports the size actually granted.
        let granted = unsafe { libc::fcntl(fds[0], libc::F_SETPIPE_SZ, capacity as libc::c_int) };
        if granted < 0 {
            let err = std::io::Error::last_os_error();
            unsafe {
                libc::close(fds[0]);
                libc::close(fds[1]);
            }
            return Err(err);
        }
        Ok(PipeSlot {
            read_fd: fds[0],
            write_fd: fds[1],
            capacity: granted as usize,
        })
    }

    /// Read end of the pipe.
    pub fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    /// Write end of the pipe.
    pub fn write_fd(&self) -> RawFd {
        self.write_fd
    }

    /// Kernel buffer capacity granted for this pipe.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Drop for PipeSlot {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

/// Fixed-cardinality pool of pipe slots with acquire/release discipline.
///
/// At most one in-flight transfer uses a slot at any time; the guard
/// returns its slot on every exit path.
pub struct PipePool {
    slots: Mutex<Vec<PipeSlot>>,
    available: Condvar,
    size: usize,
}

impl PipePool {
    /// Create `pool_size` pipe pairs, each tuned to at least `capacity`
    /// bytes. Any failure here is fatal to startup.
    pub fn new(pool_size: usize, capacity: usize) -> Result<Arc<Self>> {
        let mut slots = Vec::with_capacity(pool_size);
        for i in 0..pool_size {
            let slot = PipeSlot::new(capacity).map_err(RofsError::PipeSetup)?;
            debug!(
                "pipe_pool: slot {} created (capacity {} bytes)",
                i,
                slot.capacity()
            );
            slots.push(slot);
        }
        info!("pipe_pool: {} slots ready", pool_size);
        Ok(Arc::new(PipePool {
            slots: Mutex::new(slots),
            available: Condvar::new(),
            size: pool_size,
        }))
    }

    /// Block until a slot is free and return it.
    pub fn acquire(self: &Arc<Self>) -> PipeGuard {
        let mut slots = self.slots.lock();
        loop {
            if let Some(slot) = slots.pop() {
                return PipeGuard {
                    slot: Some(slot),
                    pool: Arc::clone(self),
                };
            }
            self.available.wait(&mut slots);
        }
    }

    /// Non-blocking acquire; fails with `PoolExhausted` when every slot
    /// is in use.
    pub fn try_acquire(self: &Arc<Self>) -> Result<PipeGuard> {
        let mut slots = self.slots.lock();
        match slots.pop() {
            Some(slot) => Ok(PipeGuard {
                slot: Some(slot),
                pool: Arc::clone(self),
            }),
            None => Err(RofsError::PoolExhausted { size: self.size }),
        }
    }

    /// Total number of slots in the pool.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of slots currently free.
    pub fn available(&self) -> usize {
        self.slots.lock().len()
    }

    fn release(&self, slot: PipeSlot) {
        let mut slots = self.slots.lock();
        slots.push(slot);
        self.available.notify_one();
    }
}

/// Scoped ownership of one pipe slot; returns it to the pool on drop.
pub struct PipeGuard {
    slot: Option<PipeSlot>,
    pool: Arc<PipePool>,
}

impl Deref for PipeGuard {
    type Target = PipeSlot;

    fn deref(&self) -> &PipeSlot {
        self.slot.as_ref().unwrap()
    }
}

impl Drop for PipeGuard {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.release(slot);
        }
    }
}
