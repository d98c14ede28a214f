//! Handlers for the sync routes.
//!
//! Request handlers answer from the local chain. Response handlers decode
//! and hand the payload to the [`SyncService`]; a payload that fails to
//! decode counts as a protocol error for the sending peer.
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use containers::{PeerId, PeerStatus};
use tracing::{debug, warn};

use super::config::{API_VERSION, MAX_BODIES_SERVED, MAX_HEADERS_SERVED};
use super::messages::{
    ReqBlocksBodies, ReqBlocksHeaders, ReqStatus, ResBlocksBodies, ResBlocksHeaders, ResStatus,
};
use super::service::SyncService;
use super::stats::RequestType;
use crate::p2p::{Handler, MsgHeader, Network, WireMessage};
use crate::types::ChainInfo;

/// Every sync handler, ready for [`crate::p2p::P2pService::register`].
pub fn handlers<N: Network>(service: &Arc<SyncService<N>>) -> Vec<Arc<dyn Handler>> {
    vec![
        Arc::new(ReqStatusHandler { service: Arc::clone(service) }),
        Arc::new(ResStatusHandler { service: Arc::clone(service) }),
        Arc::new(ReqBlocksHeadersHandler { service: Arc::clone(service) }),
        Arc::new(ResBlocksHeadersHandler { service: Arc::clone(service) }),
        Arc::new(ReqBlocksBodiesHandler { service: Arc::clone(service) }),
        Arc::new(ResBlocksBodiesHandler { service: Arc::clone(service) }),
    ]
}

fn decode<M: WireMessage, N: Network>(
    service: &SyncService<N>,
    peer_id: PeerId,
    display_id: &str,
    body: &[u8],
) -> Option<M> {
    match M::from_body(body) {
        Ok(msg) => Some(msg),
        Err(err) => {
            debug!(peer = %display_id, msg = %M::HEADER, %err, "undecodable message");
            service.network().err_check(peer_id, display_id);
            None
        }
    }
}

async fn reply<M: WireMessage, N: Network>(service: &SyncService<N>, peer_id: PeerId, display_id: &str, msg: M) {
    match msg.to_msg() {
        Ok(msg) => {
            service.network().send(peer_id, display_id, msg).await;
        }
        Err(err) => warn!(peer = %display_id, reply = %M::HEADER, %err, "failed to encode reply"),
    }
}

/// Local chain head as reported to peers.
pub fn local_status<N: Network>(service: &SyncService<N>) -> PeerStatus {
    let chain = service.chain();
    let best = chain.best_header();
    let network = service.network();
    PeerStatus {
        best_number: best.number,
        best_hash: best.hash(),
        total_difficulty: chain.total_difficulty(),
        genesis_hash: chain.genesis_hash(),
        api_version: API_VERSION,
        peer_count: u16::try_from(network.active_count()).unwrap_or(u16::MAX),
        pending_tx_count: 0,
        latency: network.avg_latency(),
    }
}

struct ReqStatusHandler<N: Network> {
    service: Arc<SyncService<N>>,
}

#[async_trait]
impl<N: Network> Handler for ReqStatusHandler<N> {
    fn header(&self) -> MsgHeader {
        ReqStatus::HEADER
    }

    async fn receive(&self, peer_id: PeerId, display_id: &str, _body: &[u8]) {
        let status = local_status(&self.service);
        reply(&self.service, peer_id, display_id, ResStatus(status)).await;
    }
}

struct ResStatusHandler<N: Network> {
    service: Arc<SyncService<N>>,
}

#[async_trait]
impl<N: Network> Handler for ResStatusHandler<N> {
    fn header(&self) -> MsgHeader {
        ResStatus::HEADER
    }

    async fn receive(&self, peer_id: PeerId, display_id: &str, body: &[u8]) {
        let Some(ResStatus(status)) = decode::<ResStatus, N>(&self.service, peer_id, display_id, body) else {
            return;
        };
        self.service.stats().record_response(display_id, RequestType::Status, Instant::now());

        if status.genesis_hash != self.service.chain().genesis_hash() {
            debug!(peer = %display_id, genesis = %status.genesis_hash, "peer is on a different genesis");
            self.service.network().err_check(peer_id, display_id);
            return;
        }

        self.service.network().update_peer_chain(
            peer_id,
            ChainInfo {
                best_number: status.best_number,
                best_hash: status.best_hash,
                total_difficulty: status.total_difficulty,
            },
        );
        self.service.update_network_status(display_id, &status);
    }
}

struct ReqBlocksHeadersHandler<N: Network> {
    service: Arc<SyncService<N>>,
}

#[async_trait]
impl<N: Network> Handler for ReqBlocksHeadersHandler<N> {
    fn header(&self) -> MsgHeader {
        ReqBlocksHeaders::HEADER
    }

    async fn receive(&self, peer_id: PeerId, display_id: &str, body: &[u8]) {
        let Some(request) = decode::<ReqBlocksHeaders, N>(&self.service, peer_id, display_id, body) else {
            return;
        };
        let take = request.take.min(MAX_HEADERS_SERVED);
        let chain = self.service.chain();
        let headers: Vec<_> = (request.from..request.from.saturating_add(u64::from(take)))
            .map_while(|number| chain.block_by_number(number))
            .map(|block| block.header)
            .collect();

        debug!(peer = %display_id, from = request.from, take, served = headers.len(), "serving headers");
        reply(&self.service, peer_id, display_id, ResBlocksHeaders { headers }).await;
    }
}

struct ResBlocksHeadersHandler<N: Network> {
    service: Arc<SyncService<N>>,
}

#[async_trait]
impl<N: Network> Handler for ResBlocksHeadersHandler<N> {
    fn header(&self) -> MsgHeader {
        ResBlocksHeaders::HEADER
    }

    async fn receive(&self, peer_id: PeerId, display_id: &str, body: &[u8]) {
        if let Some(response) = decode::<ResBlocksHeaders, N>(&self.service, peer_id, display_id, body) {
            self.service.validate_and_add_headers(peer_id, display_id, response.headers);
        }
    }
}

struct ReqBlocksBodiesHandler<N: Network> {
    service: Arc<SyncService<N>>,
}

#[async_trait]
impl<N: Network> Handler for ReqBlocksBodiesHandler<N> {
    fn header(&self) -> MsgHeader {
        ReqBlocksBodies::HEADER
    }

    async fn receive(&self, peer_id: PeerId, display_id: &str, body: &[u8]) {
        let Some(request) = decode::<ReqBlocksBodies, N>(&self.service, peer_id, display_id, body) else {
            return;
        };
        let chain = self.service.chain();
        let bodies: Vec<Vec<u8>> = request
            .hashes
            .iter()
            .take(MAX_BODIES_SERVED)
            .map_while(|hash| chain.block_by_hash(hash)?.body.encode().ok())
            .collect();

        self.service.stats().record_served(display_id, bodies.len() as u64);
        reply(&self.service, peer_id, display_id, ResBlocksBodies { bodies }).await;
    }
}

struct ResBlocksBodiesHandler<N: Network> {
    service: Arc<SyncService<N>>,
}

#[async_trait]
impl<N: Network> Handler for ResBlocksBodiesHandler<N> {
    fn header(&self) -> MsgHeader {
        ResBlocksBodies::HEADER
    }

    async fn receive(&self, peer_id: PeerId, display_id: &str, body: &[u8]) {
        if let Some(response) = decode::<ResBlocksBodies, N>(&self.service, peer_id, display_id, body) {
            self.service.validate_and_add_blocks(peer_id, display_id, response.bodies).await;
        }
    }
}
