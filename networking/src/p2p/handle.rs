use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use containers::{NodeId, PeerId};
use metrics::Metrics;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tracing::{debug, info, trace, warn};

use super::codec::encode_frame;
use super::config::{ERROR_COUNTER_CAPACITY, P2pConfig};
use super::handshake::Disconnect;
use super::message::{Dest, Msg, MsgOut, WireMessage};
use super::node_table::{Node, NodeTable};
use crate::lru_cache::RecencyCache;
use crate::types::{ChainInfo, PeerInfo};

/// Transport capabilities the sync engine depends on.
#[async_trait]
pub trait Network: Clone + Send + Sync + 'static {
    /// Queue `msg` for `peer_id`. Returns false when the message was dropped.
    async fn send(&self, peer_id: PeerId, display_id: &str, msg: Msg) -> bool;

    fn active_peers(&self) -> Vec<PeerInfo>;

    fn active_count(&self) -> usize;

    fn avg_latency(&self) -> u32;

    /// Record a protocol error, banning the peer once it exceeds the tolerance.
    fn err_check(&self, peer_id: PeerId, display_id: &str);

    fn update_peer_chain(&self, peer_id: PeerId, chain: ChainInfo);

    /// Publish the local chain head.
    fn update_chain_info(&self, chain: ChainInfo);
}

/// State shared by the transport tasks and every handle.
pub(crate) struct Shared {
    pub config: P2pConfig,
    pub local_id: NodeId,
    pub nodes: Mutex<NodeTable>,
    pub errors: Mutex<RecencyCache<PeerId, u32>>,
    pub send_tx: mpsc::Sender<MsgOut>,
    pub local_chain: RwLock<ChainInfo>,
    pub running: AtomicBool,
    pub metrics: Option<Arc<Metrics>>,
}

impl Shared {
    pub fn new(
        config: P2pConfig,
        local_id: NodeId,
        send_tx: mpsc::Sender<MsgOut>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        let nodes = NodeTable::new(
            local_id,
            config.listen_socket(),
            config.max_active_nodes,
            config.max_temp_nodes,
        );
        Self {
            local_id,
            nodes: Mutex::new(nodes),
            errors: Mutex::new(RecencyCache::new(ERROR_COUNTER_CAPACITY)),
            send_tx,
            local_chain: RwLock::new(ChainInfo::default()),
            running: AtomicBool::new(false),
            metrics,
            config,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Remove a peer from the active set and close its connection.
    pub fn drop_active(&self, peer_id: &PeerId, reason: &str) -> bool {
        let (node, active) = {
            let mut nodes = self.nodes.lock();
            (nodes.drop_active(peer_id), nodes.active_count())
        };
        let Some(node) = node else {
            return false;
        };
        info!(peer = %node.display_id, addr = %node.addr, reason, "dropping peer");
        node.close();
        if let Some(metrics) = &self.metrics {
            metrics.set_peers(active as i64);
        }
        true
    }

    /// Like [`Shared::drop_active`], but tells the peer first.
    pub fn disconnect(&self, peer_id: &PeerId, reason: &str) -> bool {
        if let Some(node) = self.nodes.lock().get_active(peer_id) {
            notify_disconnect(node);
        }
        self.drop_active(peer_id, reason)
    }

    pub fn inc_dropped(&self, queue: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_dropped_message(queue);
        }
    }
}

/// Queue a disconnect notice on the connection. The writer flushes it
/// before closing.
pub(crate) fn notify_disconnect(node: &Node) {
    match Disconnect.to_msg().and_then(|msg| encode_frame(&msg)) {
        Ok(frame) => {
            if !node.enqueue(frame) {
                trace!(peer = %node.display_id, "write queue full, disconnect notice dropped");
            }
        }
        Err(err) => warn!(%err, "failed to encode disconnect"),
    }
}

/// Cheap, cloneable access to a running transport.
#[derive(Clone)]
pub struct P2pHandle {
    pub(crate) shared: Arc<Shared>,
}

impl P2pHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn local_id(&self) -> NodeId {
        self.shared.local_id
    }

    /// Enqueue for the send worker, waiting at most the configured offer timeout.
    pub async fn enqueue(&self, out: MsgOut) -> bool {
        let timeout = Duration::from_millis(self.shared.config.offer_timeout_ms);
        match self.shared.send_tx.send_timeout(out, timeout).await {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(out)) => {
                warn!(
                    peer = %out.display_id,
                    msg = %out.msg.header,
                    "send queue full, dropping message"
                );
                self.shared.inc_dropped("send");
                false
            }
            Err(SendTimeoutError::Closed(out)) => {
                debug!(peer = %out.display_id, "send queue closed, dropping message");
                false
            }
        }
    }

    pub async fn broadcast(&self, msg: Msg) -> bool {
        self.enqueue(MsgOut { dest: Dest::Active, display_id: "all".to_string(), msg })
            .await
    }

    pub async fn send_outbound(&self, msg: Msg) -> bool {
        self.enqueue(MsgOut { dest: Dest::Outbound, display_id: "outbound".to_string(), msg })
            .await
    }

    pub fn error_count(&self, peer_id: &PeerId) -> u32 {
        self.shared.errors.lock().peek(peer_id).copied().unwrap_or_default()
    }

    pub fn is_banned(&self, peer_id: &PeerId) -> bool {
        self.shared.nodes.lock().is_banned(peer_id)
    }

    pub fn is_active(&self, peer_id: &PeerId) -> bool {
        self.shared.nodes.lock().is_active(peer_id)
    }

    pub fn drop_active(&self, peer_id: &PeerId, reason: &str) -> bool {
        self.shared.drop_active(peer_id, reason)
    }

    /// Register an already connected peer.
    pub fn add_active(&self, node: Node) -> bool {
        self.shared.nodes.lock().add_active(node).is_ok()
    }

    pub fn local_chain(&self) -> ChainInfo {
        self.shared.local_chain.read().clone()
    }

    pub fn dump(&self) -> String {
        let local = self.local_chain();
        self.shared.nodes.lock().dump(&local)
    }
}

#[async_trait]
impl Network for P2pHandle {
    async fn send(&self, peer_id: PeerId, display_id: &str, msg: Msg) -> bool {
        self.enqueue(MsgOut { dest: Dest::Peer(peer_id), display_id: display_id.to_string(), msg })
            .await
    }

    fn active_peers(&self) -> Vec<PeerInfo> {
        self.shared.nodes.lock().active_peers()
    }

    fn active_count(&self) -> usize {
        self.shared.nodes.lock().active_count()
    }

    fn avg_latency(&self) -> u32 {
        self.shared.nodes.lock().avg_latency()
    }

    fn err_check(&self, peer_id: PeerId, display_id: &str) {
        let tolerance = self.shared.config.error_tolerance;
        let exceeded = {
            let mut errors = self.shared.errors.lock();
            let count = errors.get(&peer_id).copied().unwrap_or_default() + 1;
            if count > tolerance {
                errors.put(peer_id, 0);
                true
            } else {
                errors.put(peer_id, count);
                false
            }
        };
        if !exceeded {
            return;
        }

        warn!(peer = %display_id, tolerance, "banning peer after repeated protocol errors");
        self.shared.nodes.lock().ban(peer_id);
        self.shared.disconnect(&peer_id, "banned");
        if let Some(metrics) = &self.shared.metrics {
            metrics.inc_peer_bans();
        }
    }

    fn update_peer_chain(&self, peer_id: PeerId, chain: ChainInfo) {
        self.shared.nodes.lock().update_chain(&peer_id, chain);
    }

    fn update_chain_info(&self, chain: ChainInfo) {
        *self.shared.local_chain.write() = chain;
    }
}
