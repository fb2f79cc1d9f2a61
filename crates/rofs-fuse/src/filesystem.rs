//! The single-file namespace.
//!
//! Implements `fuser::Filesystem` over the minimal node graph: one
//! synthetic root directory (inode 1) containing exactly one file node
//! (inode 2) backed by the open file. Lookup under the root is
//! unconditional: any requested name resolves to the file node. This is
//! a documented limitation, not a general namespace.

use std::ffi::OsStr;
use std::os::raw::c_int;
use std::sync::Arc;
use std::time::SystemTime;

use fuser::{
    FileType, Filesystem, KernelConfig, ReplyAttr, ReplyData, ReplyDirectory, ReplyEntry,
    ReplyOpen, Request,
};
use tracing::debug;

use crate::backing::BackingFile;
use crate::config::RofsConfig;
use crate::error::RofsError;
use crate::pipe_pool::PipePool;
use crate::responder::ReadResponder;
use crate::transport;

/// Root directory inode.
pub const ROOT_INO: u64 = 1;

/// The single file node. Stable and non-zero: protocol clients expect
/// unique inode numbers even in a one-file mount.
pub const FILE_INO: u64 = 2;

/// The minimal node graph served by the mount.
pub struct SingleFileTree {
    backing: Arc<BackingFile>,
    responder: ReadResponder,
    pipes: Arc<PipePool>,
    config: RofsConfig,
    mounted_at: SystemTime,
}

impl SingleFileTree {
    /// Build the tree over an open backing file and a ready pipe pool.
    pub fn new(backing: Arc<BackingFile>, pipes: Arc<PipePool>, config: RofsConfig) -> Self {
        let responder = ReadResponder::new(
            Arc::clone(&backing),
            config.strategy,
            config.buffers.clone(),
        );
        SingleFileTree {
            backing,
            responder,
            pipes,
            config,
            mounted_at: SystemTime::now(),
        }
    }

    /// The responder serving the read path.
    pub fn responder(&self) -> &ReadResponder {
        &self.responder
    }

    /// Resolve a name under `parent`. Any name under the root resolves
    /// to the single file node; nothing resolves anywhere else.
    pub fn resolve(&self, parent: u64, _name: &OsStr) -> Option<fuser::FileAttr> {
        if parent == ROOT_INO {
            Some(self.file_attr())
        } else {
            None
        }
    }

    /// The complete root listing: `.`, `..`, and the single file entry
    /// named after the backing file's base name.
    pub fn dir_entries(&self) -> Vec<(u64, FileType, String)> {
        vec![
            (ROOT_INO, FileType::Directory, ".".to_string()),
            (ROOT_INO, FileType::Directory, "..".to_string()),
            (
                FILE_INO,
                FileType::RegularFile,
                self.backing.base_name(),
            ),
        ]
    }

    fn root_attr(&self) -> fuser::FileAttr {
        fuser::FileAttr {
            ino: ROOT_INO,
            size: 4096,
            blocks: 1,
            atime: self.mounted_at,
            mtime: self.mounted_at,
            ctime: self.mounted_at,
            crtime: self.mounted_at,
            kind: FileType::Directory,
            perm: 0o755,
            nlink: 2,
            uid: self.config.uid,
            gid: self.config.gid,
            rdev: 0,
            blksize: 4096,
            flags: 0,
        }
    }

    fn file_attr(&self) -> fuser::FileAttr {
        let size = self.backing.size();
        fuser::FileAttr {
            ino: FILE_INO,
            size,
            blocks: size.div_ceil(512),
            atime: self.mounted_at,
            mtime: self.mounted_at,
            ctime: self.mounted_at,
            crtime: self.mounted_at,
            kind: FileType::RegularFile,
            perm: 0o444,
            nlink: 1,
            uid: self.config.uid,
            gid: self.config.gid,
            rdev: 0,
            blksize: 4096,
            flags: 0,
        }
    }
}

impl Filesystem for SingleFileTree {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        debug!(
            "rofs init: serving {} ({} bytes) via {:?}",
            self.backing.path().display(),
            self.backing.size(),
            self.responder.strategy()
        );
        Ok(())
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        debug!("lookup parent={} name={}", parent, name.to_string_lossy());
        match self.resolve(parent, name) {
            Some(attr) => reply.entry(&self.config.entry_timeout, &attr, 0),
            None => reply.error(RofsError::NotFound { ino: parent }.to_errno()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        debug!("getattr ino={}", ino);
        match ino {
            ROOT_INO => reply.attr(&self.config.attr_timeout, &self.root_attr()),
            FILE_INO => reply.attr(&self.config.attr_timeout, &self.file_attr()),
            _ => reply.error(RofsError::NotFound { ino }.to_errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!("open ino={} flags={:#o}", ino, flags);
        if ino != FILE_INO {
            reply.error(if ino == ROOT_INO {
                libc::EISDIR
            } else {
                libc::ENOENT
            });
            return;
        }
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            reply.error(libc::EROFS);
            return;
        }
        reply.opened(FILE_INO, 0);
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        debug!("read ino={} offset={} size={}", ino, offset, size);
        if ino != FILE_INO {
            reply.error(RofsError::NotFound { ino }.to_errno());
            return;
        }
        if offset < 0 {
            let err = RofsError::InvalidArgument {
                msg: format!("negative read offset {}", offset),
            };
            reply.error(err.to_errno());
            return;
        }

        match self
            .responder
            .respond(offset as u64, size as usize)
            .and_then(|r| transport::realize(r, &self.pipes, self.responder.allocator()))
        {
            Ok(payload) => {
                reply.data(payload.payload());
                // The reply call hands the bytes to the kernel
                // synchronously, so the transfer is complete here.
                payload.complete();
            }
            Err(e) => {
                debug!("read failed: {}", e);
                reply.error(e.to_errno());
            }
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!("readdir ino={} offset={}", ino, offset);
        if ino != ROOT_INO {
            reply.error(libc::ENOTDIR);
            return;
        }

        for (i, (ino, kind, name)) in self
            .dir_entries()
            .iter()
            .enumerate()
            .skip(offset as usize)
        {
            if reply.add(*ino, (i + 1) as i64, *kind, name) {
                break;
            }
        }
        reply.ok();
    }
}
