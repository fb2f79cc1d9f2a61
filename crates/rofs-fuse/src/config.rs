//! Daemon configuration.

use crate::buffer::BufferConfig;
use crate::pipe_pool::{DEFAULT_PIPE_CAPACITY, DEFAULT_POOL_SIZE};
use crate::responder::ReadStrategy;
use std::time::Duration;

/// Configuration for a ROFS mount session.
#[derive(Debug, Clone)]
pub struct RofsConfig {
    /// Which read-serving strategy this deployment runs.
    pub strategy: ReadStrategy,
    /// Number of pipe pairs created at startup.
    pub pool_size: usize,
    /// Requested pipe buffer capacity in bytes.
    pub pipe_capacity: usize,
    /// Response buffer settings.
    pub buffers: BufferConfig,
    /// Attribute cache timeout handed to the kernel.
    pub attr_timeout: Duration,
    /// Entry cache timeout handed to the kernel.
    pub entry_timeout: Duration,
    /// Owner uid reported for every node.
    pub uid: u32,
    /// Owner gid reported for every node.
    pub gid: u32,
}

impl Default for RofsConfig {
    fn default() -> Self {
        RofsConfig {
            strategy: ReadStrategy::OverlayMap,
            pool_size: DEFAULT_POOL_SIZE,
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
            buffers: BufferConfig::default(),
            attr_timeout: Duration::from_secs(1),
            entry_timeout: Duration::from_secs(1),
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RofsConfig::default();
        assert_eq!(config.strategy, ReadStrategy::OverlayMap);
        assert_eq!(config.pool_size, 10);
        assert_eq!(config.pipe_capacity, 16384 * 4 + 4096);
        assert_eq!(config.attr_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_default_owner_is_current_user() {
        let config = RofsConfig::default();
        assert_eq!(config.uid, unsafe { libc::getuid() });
        assert_eq!(config.gid, unsafe { libc::getgid() });
    }
}
