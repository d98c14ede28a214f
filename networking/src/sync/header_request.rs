use std::time::{Duration, Instant};

use containers::{BlockHeader, PeerId};

use super::config::{HEADER_REQUEST_TIMEOUT_SECS, MAX_BLOCK_DIFF};
use crate::lru_cache::RecencyCache;

struct Outstanding {
    headers: Vec<BlockHeader>,
    stored_at: Instant,
}

/// Correlates body responses with the header batch that asked for them and
/// decides which peers may be sent a new header request.
///
/// Bodies carry no request id, so a response is matched by peer and by
/// count. That is only sound while each peer has at most one request in
/// flight, which [`HeaderRequestManager::is_eligible`] enforces: a peer is
/// not asked for headers while a header request to it is unanswered or
/// while it holds a recent, unexpired outstanding batch.
pub struct HeaderRequestManager {
    outstanding: RecencyCache<PeerId, Outstanding>,
    header_requests: RecencyCache<PeerId, Instant>,
    max_block_diff: u64,
    request_timeout: Duration,
}

impl HeaderRequestManager {
    pub fn new(capacity: usize) -> Self {
        Self {
            outstanding: RecencyCache::new(capacity),
            header_requests: RecencyCache::new(capacity),
            max_block_diff: MAX_BLOCK_DIFF,
            request_timeout: Duration::from_secs(HEADER_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Record the batch whose bodies are being requested, replacing any
    /// previous batch for the peer.
    pub fn store_headers(&mut self, peer_id: PeerId, headers: Vec<BlockHeader>) {
        if headers.is_empty() {
            return;
        }
        self.outstanding.put(peer_id, Outstanding { headers, stored_at: Instant::now() });
    }

    /// Take the outstanding batch for `peer_id` if it has exactly `count`
    /// headers and has not fallen too far behind `local_best`.
    pub fn match_headers(&mut self, peer_id: PeerId, count: usize, local_best: u64) -> Option<Vec<BlockHeader>> {
        let (expired, size) = {
            let entry = self.outstanding.peek(&peer_id)?;
            (self.is_expired(&entry.headers, local_best), entry.headers.len())
        };
        if expired {
            self.outstanding.remove(&peer_id);
            return None;
        }
        if size != count {
            return None;
        }
        self.outstanding.remove(&peer_id).map(|entry| entry.headers)
    }

    /// Forget the outstanding batch for a peer, e.g. when its body request
    /// could not be sent.
    pub fn clear(&mut self, peer_id: &PeerId) {
        self.outstanding.remove(peer_id);
    }

    pub fn has_outstanding(&self, peer_id: &PeerId, local_best: u64) -> bool {
        self.outstanding
            .peek(peer_id)
            .is_some_and(|entry| !self.is_expired(&entry.headers, local_best))
    }

    /// Evict batches that can no longer be matched. Returns how many were dropped.
    pub fn prune(&mut self, local_best: u64) -> usize {
        let before = self.outstanding.len();
        let max_block_diff = self.max_block_diff;
        self.outstanding
            .retain(|_, entry| !expired(&entry.headers, local_best, max_block_diff));
        before - self.outstanding.len()
    }

    pub fn on_header_request_sent(&mut self, peer_id: PeerId, now: Instant) {
        self.header_requests.put(peer_id, now);
    }

    pub fn on_headers_received(&mut self, peer_id: &PeerId) {
        self.header_requests.remove(peer_id);
    }

    /// A peer may be asked for headers once its previous header request was
    /// answered or timed out, and it has no outstanding body request younger
    /// than the same timeout. A newer batch supersedes an older one.
    pub fn is_eligible(&self, peer_id: &PeerId, now: Instant, local_best: u64) -> bool {
        let awaiting_headers = self
            .header_requests
            .peek(peer_id)
            .is_some_and(|sent| now.saturating_duration_since(*sent) < self.request_timeout);
        let awaiting_bodies = self.outstanding.peek(peer_id).is_some_and(|entry| {
            now.saturating_duration_since(entry.stored_at) < self.request_timeout
                && !self.is_expired(&entry.headers, local_best)
        });
        !awaiting_headers && !awaiting_bodies
    }

    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }

    fn is_expired(&self, headers: &[BlockHeader], local_best: u64) -> bool {
        expired(headers, local_best, self.max_block_diff)
    }
}

fn expired(headers: &[BlockHeader], local_best: u64, max_block_diff: u64) -> bool {
    headers
        .first()
        .is_none_or(|first| first.number.saturating_add(max_block_diff) < local_best)
}
