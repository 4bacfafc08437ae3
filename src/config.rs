//! Tunable constants. Tests shrink these to exercise multi-window
//! behaviour without allocating megabytes of fixtures.

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Bytes per block on every slave.
    pub block_size: usize,
    /// Largest value stored inline in the CVT rather than on disk.
    pub max_inline_value: usize,
    /// Maximum number of blocks pinned at once while streaming a value.
    pub obj_io_max_buffer_blocks: u32,
    /// Largest on-disk object size, in blocks.
    pub max_ondisk_blocks: u32,
    /// Version id quota (the original's "beta" cap of 900).
    pub max_versions: u32,
    /// Size of the accumulation buffer for a range query reply.
    pub range_response_buffer_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            block_size: 4096,
            max_inline_value: 512,
            obj_io_max_buffer_blocks: 10,
            max_ondisk_blocks: 100,
            max_versions: 900,
            range_response_buffer_bytes: 1024 * 1024,
        }
    }
}
