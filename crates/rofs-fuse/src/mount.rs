//! Mount point validation and option handling.
//!
//! The mount is always read-only; options only control sharing and
//! unmount behavior.

use std::path::Path;
use thiserror::Error;

/// Mount options for the ROFS session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOptions {
    /// Allow other users to access the mount.
    pub allow_other: bool,
    /// Allow root to access the mount.
    pub allow_root: bool,
    /// Unmount automatically when the daemon exits.
    pub auto_unmount: bool,
}

impl Default for MountOptions {
    fn default() -> Self {
        MountOptions {
            allow_other: false,
            allow_root: false,
            auto_unmount: true,
        }
    }
}

/// Errors from mount preparation.
#[derive(Debug, Error)]
pub enum MountError {
    /// The mount point does not exist.
    #[error("path not found: {0}")]
    PathNotFound(String),

    /// The mount point is not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Unrecognized option string.
    #[error("invalid option: {0}")]
    InvalidOption(String),
}

/// Validate a mount point path.
pub fn validate_mountpoint(path: &Path) -> Result<(), MountError> {
    if !path.exists() {
        return Err(MountError::PathNotFound(path.display().to_string()));
    }
    if !path.is_dir() {
        return Err(MountError::NotADirectory(path.display().to_string()));
    }
    Ok(())
}

/// Parse mount options from a comma-separated string.
///
/// Valid options: allow_other, allow_root, auto_unmount.
pub fn parse_mount_options(opts_str: &str) -> Result<MountOptions, MountError> {
    let mut options = MountOptions::default();
    for opt in opts_str.split(',') {
        match opt.trim() {
            "allow_other" => options.allow_other = true,
            "allow_root" => options.allow_root = true,
            "auto_unmount" => options.auto_unmount = true,
            "" => {}
            other => return Err(MountError::InvalidOption(other.to_string())),
        }
    }
    Ok(options)
}

/// Convert options to the fuser mount option list. The filesystem name
/// and read-only flag are fixed.
pub fn options_to_fuser(opts: &MountOptions) -> Vec<fuser::MountOption> {
    let mut fuser_opts = vec![
        fuser::MountOption::FSName("rofs".to_string()),
        fuser::MountOption::RO,
    ];
    if opts.allow_other {
        fuser_opts.push(fuser::MountOption::AllowOther);
    }
    if opts.allow_root {
        fuser_opts.push(fuser::MountOption::AllowRoot);
    }
    if opts.auto_unmount {
        fuser_opts.push(fuser::MountOption::AutoUnmount);
    }
    fuser_opts
}
