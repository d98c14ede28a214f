//! Sync configuration and protocol constants.
use std::collections::BTreeSet;
use std::fmt::Display;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

/// Interval between status requests to every active peer (in seconds).
pub const STATUS_INTERVAL_SECS: u64 = 2;

/// Interval between status lines when status reporting is enabled (in seconds).
pub const SHOW_STATUS_INTERVAL_SECS: u64 = 10;

/// Network status is replaced at most once per window (in milliseconds).
pub const NETWORK_STATUS_WINDOW_MS: u64 = 1_000;

/// Hashes of recently imported blocks kept for deduplication.
pub const IMPORTED_HASHES_CAPACITY: usize = 4_096;

/// Batches starting further than this above the local best go to pending storage.
pub const MAX_STORAGE_DIFF: u64 = 100;

/// Outstanding header batches starting further than this below the local
/// best are expired. Must exceed [`MAX_STORAGE_DIFF`].
pub const MAX_BLOCK_DIFF: u64 = 200;

/// Import batches allowed to wait behind the running one.
pub const IMPORT_QUEUE_CAPACITY: usize = 100;

pub const SYNC_WORKERS: usize = 3;
pub const SYNC_QUEUE_CAPACITY: usize = 1_024;

/// How long a header request may go unanswered before the peer is asked again.
pub const HEADER_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Header batch sizes, picked per peer so concurrent responses rarely share a size.
pub const REQUEST_SIZES: [u32; 4] = [24, 28, 32, 36];

/// Most headers or bodies returned for a single request.
pub const MAX_HEADERS_SERVED: u32 = 64;
pub const MAX_BODIES_SERVED: usize = 64;

/// Graceful, then forced, executor shutdown wait (in seconds).
pub const SHUTDOWN_GRACE_SECS: u64 = 60;

pub const API_VERSION: u8 = 1;

/// Statistic categories printed with the status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsType {
    Requests,
    Seeds,
    Leeches,
    Responses,
    SystemInfo,
}

impl FromStr for StatsType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "requests" => Ok(StatsType::Requests),
            "seeds" => Ok(StatsType::Seeds),
            "leeches" => Ok(StatsType::Leeches),
            "responses" => Ok(StatsType::Responses),
            "systeminfo" => Ok(StatsType::SystemInfo),
            other => Err(anyhow!("unknown statistics type {other:?}")),
        }
    }
}

impl Display for StatsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StatsType::Requests => "requests",
            StatsType::Seeds => "seeds",
            StatsType::Leeches => "leeches",
            StatsType::Responses => "responses",
            StatsType::SystemInfo => "systeminfo",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub show_status: bool,
    pub show_statistics: BTreeSet<StatsType>,
    /// Bounds every per-peer statistics table.
    pub max_active_peers: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            show_status: false,
            show_statistics: BTreeSet::new(),
            max_active_peers: 128,
        }
    }
}

impl SyncConfig {
    pub fn shows(&self, stats: StatsType) -> bool {
        self.show_statistics.contains(&stats)
    }
}
