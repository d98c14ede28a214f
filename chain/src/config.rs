/// Upper bound on blocks held in pending storage.
pub const MAX_PENDING_BLOCKS: usize = 4_096;

/// Maximum accepted length of a header's extra data.
pub const MAX_EXTRA_DATA_LEN: usize = 32;

/// How far into the future (seconds) a header timestamp may be.
pub const MAX_FUTURE_DRIFT_SECS: u64 = 15;

#[derive(Clone, Debug)]
pub struct ChainConfig {
    pub max_pending_blocks: usize,
    pub max_extra_data_len: usize,
    pub max_future_drift_secs: u64,
}

pub const DEFAULT_CONFIG: ChainConfig = ChainConfig {
    max_pending_blocks: MAX_PENDING_BLOCKS,
    max_extra_data_len: MAX_EXTRA_DATA_LEN,
    max_future_drift_secs: MAX_FUTURE_DRIFT_SECS,
};

impl Default for ChainConfig {
    fn default() -> Self {
        DEFAULT_CONFIG
    }
}
