//! Page-aligned response buffers with explicit retention.
//!
//! Each read served from a buffer gets a fresh anonymous mapping sized
//! `header_size + round_up(len, page)`. The kernel or transport may still
//! reference the region after the allocating call returns, so allocation
//! hands back a reference-counted retention token alongside the buffer;
//! the region is unmapped only when both have been dropped. The token is
//! released exactly once, on every exit path, via `release` or `Drop`.

use crate::error::{Result, RofsError};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Platform page size.
pub fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// Round `len` up to the next page boundary.
pub fn round_up_to_page(len: usize, page: usize) -> usize {
    len.div_ceil(page) * page
}

struct RawRegion {
    ptr: NonNull<u8>,
    total: usize,
    in_flight: Arc<AtomicUsize>,
}

// The region is a plain byte range owned by this process; access is
// coordinated by ResponseBuffer (sole writer) and RetentionToken
// (lifetime only, never dereferenced).
unsafe impl Send for RawRegion {}
unsafe impl Sync for RawRegion {}

impl Drop for RawRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.total);
        }
        self.in_flight.fetch_sub(1, Ordering::Release);
    }
}

/// Keeps a response region alive until the transfer is confirmed
/// complete. Dropping the token without calling `release` is equivalent,
/// which covers failure paths.
pub struct RetentionToken {
    region: Option<Arc<RawRegion>>,
}

impl RetentionToken {
    /// Release the retained region. Consumes the token, so release
    /// happens exactly once.
    pub fn release(mut self) {
        self.region.take();
    }
}

impl Drop for RetentionToken {
    fn drop(&mut self) {
        self.region.take();
    }
}

/// A page-aligned response region: reserved header prefix, then the
/// payload sub-region starting exactly at `header_size`.
pub struct ResponseBuffer {
    region: Arc<RawRegion>,
    header_size: usize,
    payload_len: usize,
}

impl ResponseBuffer {
    /// Total mapped size.
    pub fn total_size(&self) -> usize {
        self.region.total
    }

    /// Length of the payload sub-region.
    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// Address of the payload sub-region.
    pub fn payload_ptr(&self) -> *mut u8 {
        unsafe { self.region.ptr.as_ptr().add(self.header_size) }
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.payload_ptr(), self.payload_len) }
    }

    /// Mutable payload bytes. The buffer is the region's sole writer;
    /// the retention token never dereferences it.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.payload_ptr(), self.payload_len) }
    }

    /// Reserved header prefix.
    pub fn header_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.region.ptr.as_ptr(), self.header_size) }
    }

    /// Offset of the payload within the region.
    pub fn header_size(&self) -> usize {
        self.header_size
    }

    /// Shrink the payload after a short transfer. Never grows it.
    pub fn truncate_payload(&mut self, len: usize) {
        if len < self.payload_len {
            self.payload_len = len;
        }
    }
}

/// Configuration for the allocator.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Reserved header prefix. One page by default so the payload
    /// sub-region lands on a page boundary, which the overlay mapping
    /// requires.
    pub header_size: usize,
    /// Cap on concurrently live regions; allocation fails once reached.
    pub max_in_flight: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        BufferConfig {
            header_size: page_size(),
            max_in_flight: 128,
        }
    }
}

/// Produces page-aligned response buffers with a reserved header prefix.
pub struct BufferAllocator {
    config: BufferConfig,
    page: usize,
    in_flight: Arc<AtomicUsize>,
}

impl BufferAllocator {
    /// Build an allocator from config.
    pub fn new(config: BufferConfig) -> Self {
        BufferAllocator {
            config,
            page: page_size(),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Allocate a zeroed region of `header_size + round_up(len, page)`
    /// bytes and return it with its retention token.
    pub fn allocate(&self, len: usize) -> Result<(ResponseBuffer, RetentionToken)> {
        let live = self.in_flight.fetch_add(1, Ordering::AcqRel);
        if live >= self.config.max_in_flight {
            self.in_flight.fetch_sub(1, Ordering::Release);
            return Err(RofsError::TooManyInFlight {
                max: self.config.max_in_flight,
            });
        }

        let total = (self.config.header_size + round_up_to_page(len, self.page)).max(self.page);
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                total,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            self.in_flight.fetch_sub(1, Ordering::Release);
            return Err(std::io::Error::last_os_error().into());
        }
        debug!("buffer: mapped {} bytes for payload of {}", total, len);

        let ptr = match NonNull::new(ptr as *mut u8) {
            Some(p) => p,
            None => {
                self.in_flight.fetch_sub(1, Ordering::Release);
                return Err(std::io::Error::other("mmap returned null").into());
            }
        };
        let region = Arc::new(RawRegion {
            ptr,
            total,
            in_flight: Arc::clone(&self.in_flight),
        });
        let token = RetentionToken {
            region: Some(Arc::clone(&region)),
        };
        Ok((
            ResponseBuffer {
                region,
                header_size: self.config.header_size,
                payload_len: len,
            },
            token,
        ))
    }

    /// Regions currently live.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Configured header size.
    pub fn header_size(&self) -> usize {
        self.config.header_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizing_formula() {
        let alloc = BufferAllocator::new(BufferConfig::default());
        let page = page_size();
        for len in [1usize, 100, page - 1, page, page + 1, 3 * page + 17] {
            let (buf, _token) = alloc.allocate(len).unwrap();
            let expected = page + len.div_ceil(page) * page;
            assert_eq!(buf.total_size(), expected, "len={}", len);
            assert_eq!(buf.payload_len(), len);
            assert_eq!(buf.header_size(), page);
        }
    }

    #[test]
    fn test_payload_starts_at_header_boundary() {
        let alloc = BufferAllocator::new(BufferConfig::default());
        let (mut buf, _token) = alloc.allocate(10).unwrap();
        let base = buf.header_mut().as_ptr() as usize;
        assert_eq!(buf.payload_ptr() as usize, base + page_size());
    }

    #[test]
    fn test_region_is_page_aligned() {
        let alloc = BufferAllocator::new(BufferConfig::default());
        let (mut buf, _token) = alloc.allocate(4096).unwrap();
        let page = page_size();
        assert_eq!(buf.header_mut().as_ptr() as usize % page, 0);
        assert_eq!(buf.payload_ptr() as usize % page, 0);
    }

    #[test]
    fn test_allocation_is_zeroed() {
        let alloc = BufferAllocator::new(BufferConfig::default());
        let (buf, _token) = alloc.allocate(8192).unwrap();
        assert!(buf.payload().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_payload_writes_visible() {
        let alloc = BufferAllocator::new(BufferConfig::default());
        let (mut buf, _token) = alloc.allocate(64).unwrap();
        buf.payload_mut()[0] = 0xAB;
        buf.payload_mut()[63] = 0xCD;
        assert_eq!(buf.payload()[0], 0xAB);
        assert_eq!(buf.payload()[63], 0xCD);
    }

    #[test]
    fn test_token_keeps_region_alive_past_buffer() {
        let alloc = BufferAllocator::new(BufferConfig::default());
        let (buf, token) = alloc.allocate(16).unwrap();
        drop(buf);
        assert_eq!(alloc.in_flight(), 1);
        token.release();
        assert_eq!(alloc.in_flight(), 0);
    }

    #[test]
    fn test_token_drop_releases() {
        let alloc = BufferAllocator::new(BufferConfig::default());
        let (buf, token) = alloc.allocate(16).unwrap();
        drop(token);
        assert_eq!(alloc.in_flight(), 1);
        drop(buf);
        assert_eq!(alloc.in_flight(), 0);
    }

    #[test]
    fn test_in_flight_cap() {
        let alloc = BufferAllocator::new(BufferConfig {
            header_size: page_size(),
            max_in_flight: 2,
        });
        let a = alloc.allocate(1).unwrap();
        let b = alloc.allocate(1).unwrap();
        let result = alloc.allocate(1);
        assert!(matches!(result, Err(RofsError::TooManyInFlight { max: 2 })));
        drop(a);
        assert!(alloc.allocate(1).is_ok());
        drop(b);
    }

    #[test]
    fn test_zero_length_payload() {
        let alloc = BufferAllocator::new(BufferConfig::default());
        let (buf, _token) = alloc.allocate(0).unwrap();
        assert_eq!(buf.payload_len(), 0);
        assert!(buf.payload().is_empty());
        assert_eq!(buf.total_size(), page_size());
    }

    #[test]
    fn test_round_up_to_page() {
        assert_eq!(round_up_to_page(0, 4096), 0);
        assert_eq!(round_up_to_page(1, 4096), 4096);
        assert_eq!(round_up_to_page(4096, 4096), 4096);
        assert_eq!(round_up_to_page(4097, 4096), 8192);
    }
}
