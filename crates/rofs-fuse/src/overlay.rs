//! Fixed-mapping overlay: back a response buffer's payload region with
//! file pages in place.
//!
//! The buffer reserves the address range (anonymous mapping); the overlay
//! asks the kernel to replace that exact range with read-only, private
//! file-backed pages. On success the payload bytes equal the file bytes
//! with no copy; the region's eventual munmap reclaims both mappings.

use crate::backing::BackingFile;
use crate::buffer::{page_size, round_up_to_page, ResponseBuffer};
use thiserror::Error;
use tracing::trace;

/// Reasons a fixed mapping cannot be established.
#[derive(Debug, Error)]
pub enum MapError {
    /// The destination address is not on a page boundary.
    #[error("destination address {addr:#x} is not page-aligned")]
    MisalignedAddress {
        /// Rejected address.
        addr: usize,
    },

    /// The file offset is not on a page boundary, which mmap requires.
    #[error("file offset {offset} is not page-aligned")]
    UnalignedOffset {
        /// Rejected offset.
        offset: u64,
    },

    /// The mapping would not fit inside the payload region.
    #[error("mapping of {len} bytes exceeds payload capacity {capacity}")]
    LengthOverflow {
        /// Requested length.
        len: usize,
        /// Bytes available after the header.
        capacity: usize,
    },

    /// The platform rejected the exact-address request.
    #[error("fixed mapping rejected: {0}")]
    Rejected(std::io::Error),
}

/// Map file bytes `[offset, offset + len)` read-only onto the buffer's
/// payload region at its exact address.
pub fn map_file_onto(
    buf: &mut ResponseBuffer,
    file: &BackingFile,
    offset: u64,
    len: usize,
) -> Result<(), MapError> {
    if len == 0 {
        return Ok(());
    }

    let page = page_size();
    let addr = buf.payload_ptr() as usize;
    if addr % page != 0 {
        return Err(MapError::MisalignedAddress { addr });
    }
    if offset % page as u64 != 0 {
        return Err(MapError::UnalignedOffset { offset });
    }

    let map_len = round_up_to_page(len, page);
    let capacity = buf.total_size() - buf.header_size();
    if map_len > capacity {
        return Err(MapError::LengthOverflow {
            len: map_len,
            capacity,
        });
    }

    let ptr = unsafe {
        libc::mmap(
            addr as *mut libc::c_void,
            map_len,
            libc::PROT_READ,
            libc::MAP_PRIVATE | libc::MAP_FIXED,
            file.as_raw_fd(),
            offset as libc::off_t,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(MapError::Rejected(std::io::Error::last_os_error()));
    }
    trace!(
        "overlay: mapped {} bytes of {} at {:#x} (offset {})",
        map_len,
        file.path().display(),
        addr,
        offset
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferAllocator, BufferConfig};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn backing_with(content: &[u8]) -> (NamedTempFile, BackingFile) {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(content).unwrap();
        tmp.flush().unwrap();
        let backing = BackingFile::open(tmp.path()).unwrap();
        (tmp, backing)
    }

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_overlay_equals_file_bytes_at_zero() {
        let content = patterned(3 * page_size());
        let (_tmp, backing) = backing_with(&content);
        let alloc = BufferAllocator::new(BufferConfig::default());
        let (mut buf, _token) = alloc.allocate(4096).unwrap();

        map_file_onto(&mut buf, &backing, 0, 4096).unwrap();
        assert_eq!(buf.payload(), &content[..4096]);
    }

    #[test]
    fn test_overlay_at_page_aligned_offset() {
        let page = page_size();
        let content = patterned(4 * page);
        let (_tmp, backing) = backing_with(&content);
        let alloc = BufferAllocator::new(BufferConfig::default());
        let (mut buf, _token) = alloc.allocate(page).unwrap();

        map_file_onto(&mut buf, &backing, 2 * page as u64, page).unwrap();
        assert_eq!(buf.payload(), &content[2 * page..3 * page]);
    }

    #[test]
    fn test_overlay_partial_last_page() {
        let page = page_size();
        let content = patterned(page + 100);
        let (_tmp, backing) = backing_with(&content);
        let alloc = BufferAllocator::new(BufferConfig::default());
        let (mut buf, _token) = alloc.allocate(100).unwrap();

        map_file_onto(&mut buf, &backing, page as u64, 100).unwrap();
        assert_eq!(buf.payload(), &content[page..page + 100]);
    }

    #[test]
    fn test_unaligned_offset_rejected() {
        let content = patterned(2 * page_size());
        let (_tmp, backing) = backing_with(&content);
        let alloc = BufferAllocator::new(BufferConfig::default());
        let (mut buf, _token) = alloc.allocate(64).unwrap();

        let result = map_file_onto(&mut buf, &backing, 1000, 64);
        assert!(matches!(result, Err(MapError::UnalignedOffset { offset: 1000 })));
    }

    #[test]
    fn test_misaligned_destination_rejected() {
        let content = patterned(2 * page_size());
        let (_tmp, backing) = backing_with(&content);
        // A non-page header size leaves the payload misaligned.
        let alloc = BufferAllocator::new(BufferConfig {
            header_size: 16,
            max_in_flight: 8,
        });
        let (mut buf, _token) = alloc.allocate(64).unwrap();

        let result = map_file_onto(&mut buf, &backing, 0, 64);
        assert!(matches!(result, Err(MapError::MisalignedAddress { .. })));
    }

    #[test]
    fn test_zero_length_is_noop() {
        let content = patterned(page_size());
        let (_tmp, backing) = backing_with(&content);
        let alloc = BufferAllocator::new(BufferConfig::default());
        let (mut buf, _token) = alloc.allocate(0).unwrap();

        map_file_onto(&mut buf, &backing, 0, 0).unwrap();
        assert!(buf.payload().is_empty());
    }

    #[test]
    fn test_repeated_overlay_idempotent() {
        let content = patterned(2 * page_size());
        let (_tmp, backing) = backing_with(&content);
        let alloc = BufferAllocator::new(BufferConfig::default());

        let mut first = Vec::new();
        for round in 0..3 {
            let (mut buf, _token) = alloc.allocate(512).unwrap();
            map_file_onto(&mut buf, &backing, 0, 512).unwrap();
            if round == 0 {
                first = buf.payload().to_vec();
            } else {
                assert_eq!(buf.payload(), &first[..]);
            }
        }
    }
}
