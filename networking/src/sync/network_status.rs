use std::time::{Duration, Instant};

use containers::{B256, U256};

use super::config::NETWORK_STATUS_WINDOW_MS;

/// Best chain head claimed by any peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkStatus {
    pub display_id: String,
    pub total_difficulty: U256,
    pub best_number: u64,
    pub best_hash: B256,
    pub api_version: u8,
    pub peer_count: u16,
    pub pending_tx_count: u32,
    pub latency: u32,
}

/// Holds the recorded [`NetworkStatus`] and rate-limits its replacement.
#[derive(Debug)]
pub struct NetworkStatusTracker {
    status: NetworkStatus,
    last_update: Option<Instant>,
    window: Duration,
}

impl Default for NetworkStatusTracker {
    fn default() -> Self {
        Self::new(Duration::from_millis(NETWORK_STATUS_WINDOW_MS))
    }
}

impl NetworkStatusTracker {
    pub fn new(window: Duration) -> Self {
        Self { status: NetworkStatus::default(), last_update: None, window }
    }

    pub fn status(&self) -> &NetworkStatus {
        &self.status
    }

    /// Offer a peer's claim. Returns true if it replaced the recorded status.
    ///
    /// Offers inside the window of the previous accepted offer are ignored.
    /// An accepted offer opens a new window even when its total difficulty is
    /// not higher than the recorded one.
    pub fn offer(&mut self, now: Instant, candidate: NetworkStatus) -> bool {
        if let Some(last) = self.last_update {
            if now.saturating_duration_since(last) <= self.window {
                return false;
            }
        }
        self.last_update = Some(now);

        if candidate.total_difficulty > self.status.total_difficulty {
            self.status = candidate;
            return true;
        }
        false
    }
}
