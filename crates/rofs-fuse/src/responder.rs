//! The read-serving state machine.
//!
//! One interface, two named strategies selected by configuration:
//! descriptor pass-through hands the transport a (fd, offset, length)
//! reference and reads no bytes; overlay mapping backs a fresh response
//! buffer with file pages in place, falling back to a plain positioned
//! read when the fixed mapping cannot be established so the request
//! always makes forward progress.

use crate::backing::BackingFile;
use crate::buffer::{BufferAllocator, BufferConfig, ResponseBuffer, RetentionToken};
use crate::error::Result;
use crate::overlay::map_file_onto;
use std::os::unix::io::RawFd;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Which read-serving strategy a deployment runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStrategy {
    /// Hand the transport the backing descriptor plus offset/length.
    DescriptorPassthrough,
    /// Overlay a fixed file mapping onto the response buffer.
    OverlayMap,
}

impl FromStr for ReadStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s {
            "passthrough" => Ok(ReadStrategy::DescriptorPassthrough),
            "overlay" => Ok(ReadStrategy::OverlayMap),
            other => Err(format!(
                "unknown strategy '{}', expected 'passthrough' or 'overlay'",
                other
            )),
        }
    }
}

/// A buffered response: payload bytes plus the retention token that keeps
/// the region alive until the transfer completes.
pub struct ResponsePayload {
    buffer: ResponseBuffer,
    token: RetentionToken,
}

impl ResponsePayload {
    pub(crate) fn new(buffer: ResponseBuffer, token: RetentionToken) -> Self {
        ResponsePayload { buffer, token }
    }

    /// The served bytes.
    pub fn payload(&self) -> &[u8] {
        self.buffer.payload()
    }

    /// Confirm the transfer is complete and release the retention token.
    pub fn complete(self) {
        self.token.release();
    }
}

/// What a read produces; the transport branches on the tag.
pub enum ReadReply {
    /// Bytes already resident in a response buffer.
    Buffer(ResponsePayload),
    /// A descriptor-relative transfer deferred to the transport.
    Descriptor {
        /// Backing file descriptor.
        fd: RawFd,
        /// Byte offset of the transfer.
        offset: u64,
        /// Length after EOF clamping.
        len: usize,
    },
}

/// Serves read requests against the backing file.
pub struct ReadResponder {
    backing: Arc<BackingFile>,
    allocator: BufferAllocator,
    strategy: ReadStrategy,
}

impl ReadResponder {
    /// Build a responder over an open backing file.
    pub fn new(backing: Arc<BackingFile>, strategy: ReadStrategy, buffers: BufferConfig) -> Self {
        ReadResponder {
            backing,
            allocator: BufferAllocator::new(buffers),
            strategy,
        }
    }

    /// Active strategy.
    pub fn strategy(&self) -> ReadStrategy {
        self.strategy
    }

    /// The file being served.
    pub fn backing(&self) -> &Arc<BackingFile> {
        &self.backing
    }

    /// Allocator backing the buffered strategy and the splice drain.
    pub fn allocator(&self) -> &BufferAllocator {
        &self.allocator
    }

    /// Serve a read of `len` bytes at `offset`. Requests crossing EOF
    /// clamp to the remaining bytes; at or past EOF the reply is empty.
    pub fn respond(&self, offset: u64, len: usize) -> Result<ReadReply> {
        let len = self.backing.clamped_len(offset, len);
        match self.strategy {
            ReadStrategy::DescriptorPassthrough => Ok(ReadReply::Descriptor {
                fd: self.backing.as_raw_fd(),
                offset,
                len,
            }),
            ReadStrategy::OverlayMap => {
                let (buf, token) = self.allocator.allocate(len)?;
                let payload = self.overlay_or_read(buf, offset, len)?;
                Ok(ReadReply::Buffer(ResponsePayload {
                    buffer: payload,
                    token,
                }))
            }
        }
    }

    fn overlay_or_read(
        &self,
        mut buf: ResponseBuffer,
        offset: u64,
        len: usize,
    ) -> Result<ResponseBuffer> {
        match map_file_onto(&mut buf, &self.backing, offset, len) {
            Ok(()) => Ok(buf),
            Err(e) => {
                debug!("overlay unavailable ({}), falling back to pread", e);
                let n = self.backing.read_at(&mut buf.payload_mut()[..len], offset)?;
                if n < len {
                    // Length was clamped against the size captured at
                    // mount, so a short pread means the file shrank.
                    warn!("short fallback read: {} of {} bytes at {}", n, len, offset);
                    buf.truncate_payload(n);
                }
                Ok(buf)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::page_size;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 239) as u8).collect()
    }

    fn responder_with(
        content: &[u8],
        strategy: ReadStrategy,
    ) -> (NamedTempFile, ReadResponder, Vec<u8>) {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(content).unwrap();
        tmp.flush().unwrap();
        let backing = Arc::new(BackingFile::open(tmp.path()).unwrap());
        let responder = ReadResponder::new(backing, strategy, BufferConfig::default());
        (tmp, responder, content.to_vec())
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!(
            "passthrough".parse::<ReadStrategy>().unwrap(),
            ReadStrategy::DescriptorPassthrough
        );
        assert_eq!(
            "overlay".parse::<ReadStrategy>().unwrap(),
            ReadStrategy::OverlayMap
        );
        assert!("mmap".parse::<ReadStrategy>().is_err());
    }

    #[test]
    fn test_passthrough_carries_descriptor_without_reading() {
        let content = patterned(10_000);
        let (_tmp, responder, _) =
            responder_with(&content, ReadStrategy::DescriptorPassthrough);

        match responder.respond(100, 4096).unwrap() {
            ReadReply::Descriptor { fd, offset, len } => {
                assert_eq!(fd, responder.backing().as_raw_fd());
                assert_eq!(offset, 100);
                assert_eq!(len, 4096);
            }
            ReadReply::Buffer(_) => panic!("expected descriptor reply"),
        }
        assert_eq!(responder.allocator().in_flight(), 0);
    }

    #[test]
    fn test_passthrough_clamps_at_eof() {
        let content = patterned(10_000);
        let (_tmp, responder, _) =
            responder_with(&content, ReadStrategy::DescriptorPassthrough);

        match responder.respond(9000, 4096).unwrap() {
            ReadReply::Descriptor { len, .. } => assert_eq!(len, 1000),
            ReadReply::Buffer(_) => panic!("expected descriptor reply"),
        }
    }

    #[test]
    fn test_overlay_matches_oracle_aligned() {
        let content = patterned(10_000);
        let (_tmp, responder, oracle) = responder_with(&content, ReadStrategy::OverlayMap);

        match responder.respond(0, 4096).unwrap() {
            ReadReply::Buffer(p) => assert_eq!(p.payload(), &oracle[..4096]),
            ReadReply::Descriptor { .. } => panic!("expected buffer reply"),
        }
    }

    #[test]
    fn test_overlay_falls_back_on_unaligned_offset() {
        let content = patterned(10_000);
        let (_tmp, responder, oracle) = responder_with(&content, ReadStrategy::OverlayMap);

        // 9000 is not page-aligned, so this exercises the pread fallback.
        match responder.respond(9000, 500).unwrap() {
            ReadReply::Buffer(p) => assert_eq!(p.payload(), &oracle[9000..9500]),
            ReadReply::Descriptor { .. } => panic!("expected buffer reply"),
        }
    }

    #[test]
    fn test_overlay_short_read_crossing_eof() {
        let content = patterned(10_000);
        let (_tmp, responder, oracle) = responder_with(&content, ReadStrategy::OverlayMap);

        match responder.respond(9000, 4096).unwrap() {
            ReadReply::Buffer(p) => {
                assert_eq!(p.payload().len(), 1000);
                assert_eq!(p.payload(), &oracle[9000..]);
            }
            ReadReply::Descriptor { .. } => panic!("expected buffer reply"),
        }
    }

    #[test]
    fn test_read_at_eof_is_empty() {
        let content = patterned(10_000);
        let (_tmp, responder, _) = responder_with(&content, ReadStrategy::OverlayMap);

        match responder.respond(10_000, 4096).unwrap() {
            ReadReply::Buffer(p) => assert!(p.payload().is_empty()),
            ReadReply::Descriptor { .. } => panic!("expected buffer reply"),
        }
    }

    #[test]
    fn test_repeated_reads_identical() {
        let content = patterned(3 * page_size());
        let (_tmp, responder, _) = responder_with(&content, ReadStrategy::OverlayMap);

        let first = match responder.respond(page_size() as u64, 1024).unwrap() {
            ReadReply::Buffer(p) => p.payload().to_vec(),
            ReadReply::Descriptor { .. } => panic!("expected buffer reply"),
        };
        for _ in 0..4 {
            match responder.respond(page_size() as u64, 1024).unwrap() {
                ReadReply::Buffer(p) => assert_eq!(p.payload(), &first[..]),
                ReadReply::Descriptor { .. } => panic!("expected buffer reply"),
            }
        }
    }

    #[test]
    fn test_complete_releases_retention() {
        let content = patterned(8192);
        let (_tmp, responder, _) = responder_with(&content, ReadStrategy::OverlayMap);

        let reply = responder.respond(0, 1024).unwrap();
        assert_eq!(responder.allocator().in_flight(), 1);
        match reply {
            ReadReply::Buffer(p) => p.complete(),
            ReadReply::Descriptor { .. } => panic!("expected buffer reply"),
        }
        assert_eq!(responder.allocator().in_flight(), 0);
    }
}
