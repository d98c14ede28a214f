mod network_status_tests;
mod service_tests;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chain::{ChainConfig, HeaderError, HeaderValidator, MemoryChain};
use containers::{BlockHeader, NodeId, PeerId, U256};
use parking_lot::Mutex;

use crate::p2p::{Msg, MsgHeader, Network};
use crate::sync::{SyncConfig, SyncService};
use crate::types::{ChainInfo, Direction, PeerInfo};

#[derive(Default)]
struct MockState {
    peers: Vec<PeerInfo>,
    sent: Vec<(PeerId, Msg)>,
    err_checks: Vec<PeerId>,
    peer_chains: Vec<(PeerId, ChainInfo)>,
    chain_info: Option<ChainInfo>,
    reject_sends: bool,
}

/// Records everything the sync service asks of the transport.
#[derive(Clone, Default)]
pub(super) struct MockNetwork {
    state: Arc<Mutex<MockState>>,
}

impl MockNetwork {
    pub fn with_peers(peers: Vec<PeerInfo>) -> Self {
        let network = Self::default();
        network.state.lock().peers = peers;
        network
    }

    pub fn sent(&self) -> Vec<(PeerId, Msg)> {
        self.state.lock().sent.clone()
    }

    pub fn sent_with(&self, header: MsgHeader) -> Vec<(PeerId, Msg)> {
        self.sent().into_iter().filter(|(_, msg)| msg.header == header).collect()
    }

    pub fn err_checks(&self) -> Vec<PeerId> {
        self.state.lock().err_checks.clone()
    }

    pub fn peer_chains(&self) -> Vec<(PeerId, ChainInfo)> {
        self.state.lock().peer_chains.clone()
    }

    pub fn chain_info(&self) -> Option<ChainInfo> {
        self.state.lock().chain_info.clone()
    }

    pub fn reject_sends(&self) {
        self.state.lock().reject_sends = true;
    }
}

#[async_trait]
impl Network for MockNetwork {
    async fn send(&self, peer_id: PeerId, _display_id: &str, msg: Msg) -> bool {
        let mut state = self.state.lock();
        if state.reject_sends {
            return false;
        }
        state.sent.push((peer_id, msg));
        true
    }

    fn active_peers(&self) -> Vec<PeerInfo> {
        self.state.lock().peers.clone()
    }

    fn active_count(&self) -> usize {
        self.state.lock().peers.len()
    }

    fn avg_latency(&self) -> u32 {
        7
    }

    fn err_check(&self, peer_id: PeerId, _display_id: &str) {
        self.state.lock().err_checks.push(peer_id);
    }

    fn update_peer_chain(&self, peer_id: PeerId, chain: ChainInfo) {
        self.state.lock().peer_chains.push((peer_id, chain));
    }

    fn update_chain_info(&self, chain: ChainInfo) {
        self.state.lock().chain_info = Some(chain);
    }
}

/// Accepts everything except the listed block numbers.
#[derive(Default)]
pub(super) struct StubValidator {
    reject: HashSet<u64>,
}

impl StubValidator {
    pub fn rejecting(numbers: &[u64]) -> Self {
        Self { reject: numbers.iter().copied().collect() }
    }
}

impl HeaderValidator for StubValidator {
    fn validate(&self, header: &BlockHeader) -> Result<(), HeaderError> {
        if self.reject.contains(&header.number) {
            return Err(HeaderError::BadSignature);
        }
        Ok(())
    }
}

pub(super) fn peer(n: u8, total_difficulty: u64) -> PeerInfo {
    let node_id = NodeId([n; 32]);
    PeerInfo {
        peer_id: node_id.peer_id(),
        node_id,
        display_id: node_id.display_id(),
        addr: format!("10.0.0.{n}:30303").parse().unwrap(),
        direction: Direction::Outbound,
        chain: ChainInfo { total_difficulty: U256::from(total_difficulty), ..ChainInfo::default() },
        latency: 0,
    }
}

pub(super) fn memory_chain() -> Arc<MemoryChain> {
    Arc::new(MemoryChain::new(ChainConfig::default()))
}

pub(super) fn sync_service(
    chain: Arc<MemoryChain>,
    network: MockNetwork,
    validator: StubValidator,
) -> Arc<SyncService<MockNetwork>> {
    SyncService::new(chain, network, Arc::new(validator), SyncConfig::default(), None)
}

/// Let the worker pools run queued jobs.
pub(super) async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
}
