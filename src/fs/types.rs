//! Mount-time configuration.

/// Construction-time knob set for [`super::Ext4FileSystem::mount_with_cache`].
///
/// Plain data with [`Default`], not a builder: there's exactly one axis of
/// policy configuration right now (cache sizing), so a struct literal reads
/// clearer than a fluent builder would.
#[derive(Debug, Clone, Copy)]
pub struct FsConfig {
    /// Block cache size, in blocks.
    pub bcache_size: u32,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self { bcache_size: 256 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cache_size_is_256_blocks() {
        let config = FsConfig::default();
        assert_eq!(config.bcache_size, 256);
    }
}
