pub mod server;

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    // Network
    peers: IntGauge,
    dropped_messages: IntCounterVec,
    peer_bans: IntCounter,
    // Sync
    imported_blocks: IntCounterVec,
    rejected_header_batches: IntCounterVec,
    local_best_block: IntGauge,
    network_best_block: IntGauge,
    import_batch_time: Histogram,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let peers = IntGauge::with_opts(Opts::new("p2p_peers_connected", "Number of active peers"))?;
        registry.register(Box::new(peers.clone()))?;

        let dropped_messages = IntCounterVec::new(
            Opts::new("p2p_dropped_messages_total", "Messages dropped because a queue was full"),
            &["queue"],
        )?;
        registry.register(Box::new(dropped_messages.clone()))?;

        let peer_bans = IntCounter::with_opts(Opts::new("p2p_peer_bans_total", "Peers banned for protocol errors"))?;
        registry.register(Box::new(peer_bans.clone()))?;

        let imported_blocks = IntCounterVec::new(
            Opts::new("sync_imported_blocks_total", "Blocks handed to the chain, by import result"),
            &["result"],
        )?;
        registry.register(Box::new(imported_blocks.clone()))?;

        let rejected_header_batches = IntCounterVec::new(
            Opts::new("sync_rejected_header_batches_total", "Header batches discarded, by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(rejected_header_batches.clone()))?;

        let local_best_block = IntGauge::with_opts(Opts::new("sync_local_best_block", "Local best block number"))?;
        registry.register(Box::new(local_best_block.clone()))?;

        let network_best_block =
            IntGauge::with_opts(Opts::new("sync_network_best_block", "Best block number claimed by the network"))?;
        registry.register(Box::new(network_best_block.clone()))?;

        let import_batch_time = Histogram::with_opts(
            HistogramOpts::new("sync_import_batch_time_seconds", "Time taken to import one block batch")
                .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(import_batch_time.clone()))?;

        Ok(Self {
            registry,
            peers,
            dropped_messages,
            peer_bans,
            imported_blocks,
            rejected_header_batches,
            local_best_block,
            network_best_block,
            import_batch_time,
        })
    }

    pub fn gather(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::<u8>::new();
        if let Err(err) = TextEncoder::new().encode(&metric_families, &mut buffer) {
            tracing::warn!(%err, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    // Network
    pub fn set_peers(&self, v: i64) {
        self.peers.set(v);
    }

    pub fn inc_dropped_message(&self, queue: &str) {
        self.dropped_messages.with_label_values(&[queue]).inc();
    }

    pub fn inc_peer_bans(&self) {
        self.peer_bans.inc();
    }

    // Sync
    pub fn inc_imported_blocks(&self, result: &str) {
        self.imported_blocks.with_label_values(&[result]).inc();
    }

    pub fn inc_rejected_header_batch(&self, reason: &str) {
        self.rejected_header_batches.with_label_values(&[reason]).inc();
    }

    pub fn set_local_best_block(&self, v: u64) {
        self.local_best_block.set(i64::try_from(v).unwrap_or(i64::MAX));
    }

    pub fn set_network_best_block(&self, v: u64) {
        self.network_best_block.set(i64::try_from(v).unwrap_or(i64::MAX));
    }

    pub fn observe_import_batch_time(&self, duration: f64) {
        self.import_batch_time.observe(duration);
    }
}

pub type SharedMetrics = Arc<Metrics>;
