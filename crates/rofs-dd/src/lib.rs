#![warn(missing_docs)]

//! Plain buffered block copy. No zero-copy logic: bytes move through a
//! fixed transfer buffer, and the output is synced to stable storage on
//! completion.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use tracing::info;

/// Fixed transfer buffer size.
pub const BLOCK_SIZE: usize = 4096;

/// Copy all bytes from `input` to `output` (appending), sync the output,
/// and return the number of bytes copied. The output file must already
/// exist.
pub fn copy_blocks(input: &Path, output: &Path) -> std::io::Result<u64> {
    let mut src = File::open(input)?;
    let mut dst = OpenOptions::new().append(true).open(output)?;

    let mut buf = [0u8; BLOCK_SIZE];
    let mut copied: u64 = 0;
    loop {
        let n = match src.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        dst.write_all(&buf[..n])?;
        copied += n as u64;
    }
    dst.sync_all()?;
    info!("copied {} bytes from {} to {}", copied, input.display(), output.display());
    Ok(copied)
}
