use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chain::{Chain, HeaderError, HeaderValidator};
use containers::{B256, Block, BlockHeader, PeerId, PeerStatus};
use metrics::Metrics;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{Instrument, Level, debug, enabled, info, info_span, trace, warn};

use super::config::{
    IMPORT_QUEUE_CAPACITY, IMPORTED_HASHES_CAPACITY, MAX_STORAGE_DIFF, REQUEST_SIZES, SHOW_STATUS_INTERVAL_SECS,
    SHUTDOWN_GRACE_SECS, STATUS_INTERVAL_SECS, SYNC_QUEUE_CAPACITY, SYNC_WORKERS, StatsType, SyncConfig,
};
use super::header_request::HeaderRequestManager;
use super::import::{ImportSummary, import_blocks};
use super::messages::{ReqBlocksBodies, ReqBlocksHeaders, ReqStatus};
use super::network_status::{NetworkStatus, NetworkStatusTracker};
use super::stats::{BlockOutcome, RequestType, SyncStats};
use crate::executor::WorkerPool;
use crate::lru_cache::RecencyCache;
use crate::p2p::{Network, WireMessage};
use crate::types::{ChainInfo, PeerInfo};

/// Why a header batch was dropped as a whole.
#[derive(Debug, Error)]
pub enum HeaderBatchRejection {
    #[error("header {number} failed validation: {source}")]
    Invalid { number: u64, source: HeaderError },
    #[error("header {number} does not extend the previous header")]
    Discontinuous { number: u64 },
}

impl HeaderBatchRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            HeaderBatchRejection::Invalid { .. } => "invalid",
            HeaderBatchRejection::Discontinuous { .. } => "discontinuous",
        }
    }
}

/// Where an assembled batch goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchRoute {
    Import,
    Pending,
}

/// Batches starting more than [`MAX_STORAGE_DIFF`] above the local best are
/// parked in pending storage.
pub fn classify(first_number: u64, local_best: u64) -> BatchRoute {
    if first_number > local_best.saturating_add(MAX_STORAGE_DIFF) {
        BatchRoute::Pending
    } else {
        BatchRoute::Import
    }
}

/// Drives block download from peers into the chain.
///
/// Header requests and block imports share the single-worker import pool,
/// so the node never asks for more than it is able to import. Body requests
/// run on a small separate pool.
pub struct SyncService<N: Network> {
    chain: Arc<dyn Chain>,
    network: N,
    validator: Arc<dyn HeaderValidator>,
    config: SyncConfig,
    network_status: Mutex<NetworkStatusTracker>,
    imported: Mutex<RecencyCache<B256, ()>>,
    requests: Mutex<HeaderRequestManager>,
    stats: SyncStats,
    sync_pool: WorkerPool,
    import_pool: WorkerPool,
    metrics: Option<Arc<Metrics>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    header_request_queued: AtomicBool,
    stopped: AtomicBool,
    shutdown_grace: Duration,
}

impl<N: Network> SyncService<N> {
    /// Must be called from within a tokio runtime.
    pub fn new(
        chain: Arc<dyn Chain>,
        network: N,
        validator: Arc<dyn HeaderValidator>,
        config: SyncConfig,
        metrics: Option<Arc<Metrics>>,
    ) -> Arc<Self> {
        let peers = config.max_active_peers;
        Arc::new(Self {
            chain,
            network,
            validator,
            network_status: Mutex::new(NetworkStatusTracker::default()),
            imported: Mutex::new(RecencyCache::new(IMPORTED_HASHES_CAPACITY)),
            requests: Mutex::new(HeaderRequestManager::new(peers)),
            stats: SyncStats::new(peers),
            sync_pool: WorkerPool::new("sync-ib", SYNC_WORKERS, SYNC_QUEUE_CAPACITY),
            import_pool: WorkerPool::new("sync-import", 1, IMPORT_QUEUE_CAPACITY),
            metrics,
            tasks: Mutex::new(Vec::new()),
            header_request_queued: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            shutdown_grace: Duration::from_secs(SHUTDOWN_GRACE_SECS),
            config,
        })
    }

    pub fn chain(&self) -> &Arc<dyn Chain> {
        &self.chain
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    pub fn network_status(&self) -> NetworkStatus {
        self.network_status.lock().status().clone()
    }

    pub fn is_imported(&self, hash: &B256) -> bool {
        self.imported.lock().contains(hash)
    }

    pub fn has_outstanding(&self, peer_id: &PeerId) -> bool {
        self.requests.lock().has_outstanding(peer_id, self.chain.best_block_number())
    }

    pub fn store_outstanding(&self, peer_id: PeerId, headers: Vec<BlockHeader>) {
        self.requests.lock().store_headers(peer_id, headers);
    }

    /// Spawn the periodic status request and, when enabled, status report tasks.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();

        let this = Arc::clone(self);
        tasks.push(tokio::spawn(
            async move {
                let mut ticker = interval(Duration::from_secs(STATUS_INTERVAL_SECS));
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    this.get_status().await;
                }
            }
            .instrument(info_span!("sync-gs")),
        ));

        if self.config.show_status {
            let this = Arc::clone(self);
            tasks.push(tokio::spawn(
                async move {
                    let mut ticker = interval(Duration::from_secs(SHOW_STATUS_INTERVAL_SECS));
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    ticker.tick().await;
                    loop {
                        ticker.tick().await;
                        info!("{}", this.status_line());
                        for dump in this.statistics() {
                            info!("{dump}");
                        }
                    }
                }
                .instrument(info_span!("sync-ss")),
            ));
        }
    }

    /// Ask every active peer for its chain head.
    pub async fn get_status(&self) {
        let msg = match ReqStatus.to_msg() {
            Ok(msg) => msg,
            Err(err) => {
                warn!(%err, "failed to encode status request");
                return;
            }
        };
        let now = Instant::now();
        for peer in self.network.active_peers() {
            self.stats.record_request(&peer.display_id, RequestType::Status, now);
            self.network.send(peer.peer_id, &peer.display_id, msg.clone()).await;
        }
    }

    /// Ingest a peer's status claim.
    pub fn update_network_status(self: &Arc<Self>, display_id: &str, status: &PeerStatus) {
        if status.total_difficulty > self.chain.total_difficulty() {
            self.request_headers();
        }

        let candidate = NetworkStatus {
            display_id: display_id.to_string(),
            total_difficulty: status.total_difficulty,
            best_number: status.best_number,
            best_hash: status.best_hash,
            api_version: status.api_version,
            peer_count: status.peer_count,
            pending_tx_count: status.pending_tx_count,
            latency: status.latency,
        };
        if self.network_status.lock().offer(Instant::now(), candidate) {
            debug!(peer = %display_id, best = status.best_number, td = %status.total_difficulty, "network status updated");
            if let Some(metrics) = &self.metrics {
                metrics.set_network_best_block(status.best_number);
            }
        }
    }

    /// Queue a header request cycle behind pending imports. At most one
    /// cycle waits in the queue at a time.
    pub fn request_headers(self: &Arc<Self>) {
        if self.header_request_queued.swap(true, Ordering::AcqRel) {
            return;
        }
        let this = Arc::clone(self);
        let queued = self.import_pool.try_submit(async move {
            this.header_request_queued.store(false, Ordering::Release);
            this.send_headers_requests().await;
        });
        if let Err(err) = queued {
            self.header_request_queued.store(false, Ordering::Release);
            trace!(%err, "header request cycle not queued");
        }
    }

    /// Send a header request to every peer that is ahead of us and has
    /// nothing in flight.
    pub async fn send_headers_requests(&self) {
        let local_best = self.chain.best_block_number();
        let local_td = self.chain.total_difficulty();
        let from = local_best.saturating_add(1);
        let now = Instant::now();

        let peers: Vec<PeerInfo> = {
            let mut requests = self.requests.lock();
            let mut eligible = Vec::new();
            for peer in self.network.active_peers() {
                if peer.chain.total_difficulty > local_td && requests.is_eligible(&peer.peer_id, now, local_best) {
                    requests.on_header_request_sent(peer.peer_id, now);
                    eligible.push(peer);
                }
            }
            eligible
        };

        for (index, peer) in peers.iter().enumerate() {
            let take = REQUEST_SIZES[index % REQUEST_SIZES.len()];
            let msg = match (ReqBlocksHeaders { from, take }).to_msg() {
                Ok(msg) => msg,
                Err(err) => {
                    warn!(%err, "failed to encode header request");
                    return;
                }
            };
            trace!(peer = %peer.display_id, from, take, "requesting headers");
            self.stats.record_request(&peer.display_id, RequestType::Headers, now);
            if !self.network.send(peer.peer_id, &peer.display_id, msg).await {
                self.requests.lock().on_headers_received(&peer.peer_id);
            }
        }
    }

    /// Validate a header batch and request the bodies of the headers not imported yet.
    pub fn validate_and_add_headers(self: &Arc<Self>, peer_id: PeerId, display_id: &str, headers: Vec<BlockHeader>) {
        self.requests.lock().on_headers_received(&peer_id);
        self.stats.record_response(display_id, RequestType::Headers, Instant::now());
        if headers.is_empty() {
            return;
        }

        let fresh = match self.filter_headers(&headers) {
            Ok(fresh) => fresh,
            Err(rejection) => {
                debug!(peer = %display_id, num_headers = headers.len(), %rejection, "dropping header batch");
                if let Some(metrics) = &self.metrics {
                    metrics.inc_rejected_header_batch(rejection.reason());
                }
                self.network.err_check(peer_id, display_id);
                return;
            }
        };
        if fresh.is_empty() {
            trace!(peer = %display_id, "all headers already imported");
            return;
        }

        // The batch is outstanding from here on, so no header request
        // cycle can reach this peer before the body request goes out.
        let hashes: Vec<B256> = fresh.iter().map(BlockHeader::hash).collect();
        self.requests.lock().store_headers(peer_id, fresh);

        let this = Arc::clone(self);
        let display_id = display_id.to_string();
        let queued = self.sync_pool.try_submit(async move {
            this.send_bodies_request(peer_id, &display_id, hashes).await;
        });
        if let Err(err) = queued {
            debug!(%err, "body request not queued");
            self.requests.lock().clear(&peer_id);
        }
    }

    /// Reject the batch if any header is invalid or breaks the chain, then
    /// drop headers that were already imported.
    pub fn filter_headers(&self, headers: &[BlockHeader]) -> Result<Vec<BlockHeader>, HeaderBatchRejection> {
        let mut prev: Option<(u64, B256)> = None;
        let mut fresh = Vec::with_capacity(headers.len());

        for header in headers {
            self.validator
                .validate(header)
                .map_err(|source| HeaderBatchRejection::Invalid { number: header.number, source })?;

            if let Some((prev_number, prev_hash)) = prev {
                if prev_number.checked_add(1) != Some(header.number) || header.parent_hash != prev_hash {
                    return Err(HeaderBatchRejection::Discontinuous { number: header.number });
                }
            }

            let hash = header.hash();
            prev = Some((header.number, hash));
            if !self.imported.lock().contains(&hash) {
                fresh.push(header.clone());
            }
        }

        Ok(fresh)
    }

    /// Remember the batch, then ask the same peer for its bodies in order.
    pub async fn request_bodies(&self, peer_id: PeerId, display_id: &str, headers: Vec<BlockHeader>) {
        let hashes: Vec<B256> = headers.iter().map(BlockHeader::hash).collect();
        self.requests.lock().store_headers(peer_id, headers);
        self.send_bodies_request(peer_id, display_id, hashes).await;
    }

    /// Send the body request for the batch already stored for `peer_id`,
    /// forgetting the batch if the request is dropped.
    async fn send_bodies_request(&self, peer_id: PeerId, display_id: &str, hashes: Vec<B256>) {
        let msg = match (ReqBlocksBodies { hashes }).to_msg() {
            Ok(msg) => msg,
            Err(err) => {
                warn!(%err, "failed to encode body request");
                self.requests.lock().clear(&peer_id);
                return;
            }
        };

        self.stats.record_request(display_id, RequestType::Bodies, Instant::now());
        if !self.network.send(peer_id, display_id, msg).await {
            self.requests.lock().clear(&peer_id);
        }
    }

    /// Pair bodies with the outstanding headers of the same peer and route the
    /// resulting blocks.
    pub async fn validate_and_add_blocks(self: &Arc<Self>, peer_id: PeerId, display_id: &str, bodies: Vec<Vec<u8>>) {
        self.stats.record_response(display_id, RequestType::Bodies, Instant::now());
        if bodies.is_empty() {
            return;
        }

        let local_best = self.chain.best_block_number();
        let matched = self.requests.lock().match_headers(peer_id, bodies.len(), local_best);
        let Some(headers) = matched else {
            debug!(peer = %display_id, num_bodies = bodies.len(), "unmatched bodies response");
            self.network.err_check(peer_id, display_id);
            return;
        };

        let blocks: Vec<Block> = headers
            .into_iter()
            .zip(bodies.iter())
            .map_while(|(header, body)| Block::from_unsafe_parts(header, body))
            .collect();
        let Some(first) = blocks.first().map(Block::number) else {
            return;
        };

        match classify(first, local_best) {
            BatchRoute::Pending => {
                let stored = self.chain.store_pending_block_range(&blocks);
                debug!(peer = %display_id, first, local_best, stored, "stored far-future blocks");
                self.stats.record_blocks(display_id, BlockOutcome::Stored, stored as u64);
            }
            BatchRoute::Import => {
                let this = Arc::clone(self);
                let display_id = display_id.to_string();
                let queued = self
                    .import_pool
                    .submit(async move {
                        this.import_batch(&display_id, blocks);
                    })
                    .await;
                if let Err(err) = queued {
                    debug!(%err, "import batch not queued");
                }
            }
        }
    }

    /// Runs on the import pool.
    pub fn import_batch(self: &Arc<Self>, display_id: &str, blocks: Vec<Block>) -> ImportSummary {
        let started = Instant::now();
        let summary = import_blocks(
            self.chain.as_ref(),
            &self.imported,
            self.metrics.as_deref(),
            display_id,
            &blocks,
        );
        let elapsed = started.elapsed();

        self.stats.add_imported(summary.imported);
        self.stats.record_blocks(display_id, BlockOutcome::Imported, summary.imported);
        self.stats.record_blocks(display_id, BlockOutcome::Stored, summary.stored);
        self.stats.record_blocks(display_id, BlockOutcome::Ignored, summary.ignored);

        let best = self.chain.best_header();
        let total_difficulty = self.chain.total_difficulty();
        let pruned = self.requests.lock().prune(best.number);
        if let Some(metrics) = &self.metrics {
            metrics.observe_import_batch_time(elapsed.as_secs_f64());
            metrics.set_local_best_block(best.number);
        }
        self.network.update_chain_info(ChainInfo {
            best_number: best.number,
            best_hash: best.hash(),
            total_difficulty,
        });

        debug!(
            peer = %display_id,
            imported = summary.imported,
            stored = summary.stored,
            ignored = summary.ignored,
            pruned,
            best = best.number,
            took_ms = elapsed.as_millis() as u64,
            "import batch done"
        );

        if summary.imported > 0 && self.network_status.lock().status().total_difficulty > total_difficulty {
            self.request_headers();
        }
        summary
    }

    pub fn status_line(&self) -> String {
        let local = self.chain.best_header();
        let local_td = self.chain.total_difficulty();
        let network = self.network_status();
        format!(
            "sync-status avg-import={:.2} b/s td={}/{} b-num={}/{} b-hash={}/{}",
            self.stats.avg_import_rate(Instant::now()),
            local_td,
            network.total_difficulty,
            local.number,
            network.best_number,
            local.hash(),
            network.best_hash,
        )
    }

    /// Dumps for the configured statistic categories.
    pub fn statistics(&self) -> Vec<String> {
        self.config
            .show_statistics
            .iter()
            .map(|stats| match stats {
                StatsType::Requests => self.stats.dump_requests(),
                StatsType::Seeds => self.stats.dump_seeds(),
                StatsType::Leeches => self.stats.dump_leeches(),
                StatsType::Responses => self.stats.dump_responses(),
                StatsType::SystemInfo => self.stats.dump_system_info(),
            })
            .collect()
    }

    /// Stop the periodic tasks and drain both worker pools. Only the first call has any effect.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        if enabled!(Level::DEBUG) {
            debug!("{}", self.status_line());
            for dump in self.statistics() {
                debug!("{dump}");
            }
        }

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.import_pool.shutdown(self.shutdown_grace).await;
        self.sync_pool.shutdown(self.shutdown_grace).await;
        info!("sync service stopped");
    }
}
