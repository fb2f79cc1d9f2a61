//! The exposed backing file.
//!
//! One file is opened read-only at mount time; its size is captured once
//! and stays fixed for the lifetime of the mount. Positioned reads share
//! no cursor, so the descriptor is safe for concurrent access.

use crate::error::Result;
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use tracing::info;

/// The single file exposed by the mount.
#[derive(Debug)]
pub struct BackingFile {
    file: File,
    path: PathBuf,
    size: u64,
}

impl BackingFile {
    /// Open the file read-only and capture its size.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        info!("opened backing file {} ({} bytes)", path.display(), size);
        Ok(BackingFile {
            file,
            path: path.to_path_buf(),
            size,
        })
    }

    /// Size in bytes, captured at mount time.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Path the file was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Base name used as the single directory entry.
    pub fn base_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    /// Raw descriptor for splice and mmap calls.
    pub fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    /// Clamp a request length against EOF. A request at or past EOF
    /// clamps to zero; one crossing EOF clamps to the remaining bytes.
    pub fn clamped_len(&self, offset: u64, len: usize) -> usize {
        if offset >= self.size {
            return 0;
        }
        let remaining = self.size - offset;
        len.min(remaining as usize)
    }

    /// Plain positioned read. Used as the overlay fallback and as the
    /// oracle in tests.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let mut done = 0;
        while done < buf.len() {
            match self.file.read_at(&mut buf[done..], offset + done as u64) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(done)
    }
}
