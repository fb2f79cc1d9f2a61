//! Glue between read replies and the FUSE transport.
//!
//! The fuser reply API consumes byte slices, so descriptor replies are
//! realized here: file bytes move into a pooled pipe via splice (kernel
//! mediated, no user-space copy) and the pipe is drained into a response
//! buffer at the reply boundary. EAGAIN from the non-blocking pipe is
//! retried a bounded number of times.

use crate::buffer::BufferAllocator;
use crate::error::{Result, RofsError};
use crate::pipe_pool::PipePool;
use crate::responder::{ReadReply, ResponsePayload};
use std::os::unix::io::RawFd;
use std::sync::Arc;
use tracing::{trace, warn};

const EAGAIN_RETRIES: usize = 3;

/// Turn any reply into payload bytes. Buffer replies pass through;
/// descriptor replies are realized through a pipe slot.
pub fn realize(
    reply: ReadReply,
    pool: &Arc<PipePool>,
    allocator: &BufferAllocator,
) -> Result<ResponsePayload> {
    match reply {
        ReadReply::Buffer(payload) => Ok(payload),
        ReadReply::Descriptor { fd, offset, len } => {
            splice_to_buffer(pool, allocator, fd, offset, len)
        }
    }
}

/// Splice `len` bytes of `fd` at `offset` through a pooled pipe into a
/// fresh response buffer. The pipe slot is held for the whole transfer
/// and returned on every exit path.
pub fn splice_to_buffer(
    pool: &Arc<PipePool>,
    allocator: &BufferAllocator,
    fd: RawFd,
    offset: u64,
    len: usize,
) -> Result<ResponsePayload> {
    let (mut buf, token) = allocator.allocate(len)?;
    if len == 0 {
        return Ok(ResponsePayload::new(buf, token));
    }

    let guard = pool.acquire();
    let mut off = offset as libc::loff_t;
    let mut filled = 0usize;
    while filled < len {
        // The pipe buffer bounds each round; larger reads drain in chunks.
        let want = (len - filled).min(guard.capacity());
        let moved = splice_once(fd, &mut off, guard.write_fd(), want)?;
        if moved == 0 {
            warn!("splice hit EOF after {} of {} bytes", filled, len);
            break;
        }
        drain_pipe(guard.read_fd(), &mut buf.payload_mut()[filled..filled + moved])?;
        filled += moved;
    }
    buf.truncate_payload(filled);
    trace!("splice: {} bytes at offset {}", filled, offset);
    Ok(ResponsePayload::new(buf, token))
}

fn splice_once(fd: RawFd, off: &mut libc::loff_t, pipe_w: RawFd, want: usize) -> Result<usize> {
    let mut attempts = 0;
    loop {
        let n = unsafe {
            libc::splice(
                fd,
                off as *mut libc::loff_t,
                pipe_w,
                std::ptr::null_mut(),
                want,
                libc::SPLICE_F_MOVE,
            )
        };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINTR) => continue,
            Some(libc::EAGAIN) if attempts < EAGAIN_RETRIES => {
                attempts += 1;
                continue;
            }
            _ => return Err(RofsError::Splice(err)),
        }
    }
}

fn drain_pipe(pipe_r: RawFd, dst: &mut [u8]) -> Result<()> {
    let mut done = 0usize;
    let mut attempts = 0;
    while done < dst.len() {
        let n = unsafe {
            libc::read(
                pipe_r,
                dst[done..].as_mut_ptr() as *mut libc::c_void,
                dst.len() - done,
            )
        };
        if n > 0 {
            done += n as usize;
            attempts = 0;
            continue;
        }
        if n == 0 {
            return Err(RofsError::Splice(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "pipe write end closed mid-transfer",
            )));
        }
        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINTR) => continue,
            Some(libc::EAGAIN) if attempts < EAGAIN_RETRIES => {
                attempts += 1;
                continue;
            }
            _ => return Err(RofsError::Splice(err)),
        }
    }
    Ok(())
}
