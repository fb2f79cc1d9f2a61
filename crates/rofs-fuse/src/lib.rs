#![warn(missing_docs)]

//! ROFS FUSE daemon: exposes a single backing file through a read-only
//! mount, serving reads with zero-copy strategies (descriptor
//! pass-through or fixed-mapping overlay).

pub mod backing;
pub mod buffer;
pub mod config;
pub mod error;
pub mod filesystem;
pub mod mount;
pub mod overlay;
pub mod pipe_pool;
pub mod responder;
pub mod transport;

pub use error::{Result, RofsError};
