use chain::Chain;
use chain::dev::DevChain;
use containers::{Block, BlockHeader, PeerId, PeerStatus, U256};
use pretty_assertions::assert_eq;
use rstest::rstest;

use super::{MockNetwork, StubValidator, memory_chain, peer, settle, sync_service};
use crate::p2p::WireMessage;
use crate::sync::messages::{ReqBlocksBodies, ReqBlocksHeaders};
use crate::sync::{BatchRoute, HeaderBatchRejection, classify};

const DISPLAY: &str = "peer01";

fn dev_blocks(count: usize) -> Vec<Block> {
    DevChain::new().unwrap().blocks(count)
}

fn headers_of(blocks: &[Block]) -> Vec<BlockHeader> {
    blocks.iter().map(|block| block.header.clone()).collect()
}

fn bodies_of(blocks: &[Block]) -> Vec<Vec<u8>> {
    blocks.iter().map(|block| block.body.encode().unwrap()).collect()
}

fn ahead(td: u64) -> PeerStatus {
    PeerStatus { total_difficulty: U256::from(td), best_number: td - 1, ..PeerStatus::default() }
}

#[tokio::test]
async fn test_gap_in_numbers_discards_batch() {
    let network = MockNetwork::default();
    let service = sync_service(memory_chain(), network.clone(), StubValidator::default());
    let blocks = dev_blocks(3);
    let batch = vec![blocks[0].header.clone(), blocks[2].header.clone()];

    assert!(matches!(
        service.filter_headers(&batch),
        Err(HeaderBatchRejection::Discontinuous { number: 3 })
    ));

    service.validate_and_add_headers(PeerId(1), DISPLAY, batch);
    settle().await;

    assert!(network.sent_with(ReqBlocksBodies::HEADER).is_empty());
    assert!(!service.has_outstanding(&PeerId(1)));
    assert_eq!(network.err_checks(), vec![PeerId(1)]);
    service.shutdown().await;
}

#[tokio::test]
async fn test_parent_mismatch_discards_batch() {
    let network = MockNetwork::default();
    let service = sync_service(memory_chain(), network.clone(), StubValidator::default());

    let mut dev = DevChain::new().unwrap();
    let first = dev.blocks(1);
    let mut fork = dev.clone();
    fork.set_difficulty(3);
    let side = fork.blocks(1);
    let main = dev.blocks(2);
    // Numbers are contiguous but block 3 does not extend the side block 2.
    let batch = vec![first[0].header.clone(), side[0].header.clone(), main[1].header.clone()];

    assert!(matches!(
        service.filter_headers(&batch),
        Err(HeaderBatchRejection::Discontinuous { number: 3 })
    ));
    service.validate_and_add_headers(PeerId(1), DISPLAY, batch);
    settle().await;

    assert!(network.sent().is_empty());
    assert_eq!(network.err_checks().len(), 1);
    service.shutdown().await;
}

#[tokio::test]
async fn test_invalid_header_discards_whole_batch() {
    let network = MockNetwork::default();
    let service = sync_service(memory_chain(), network.clone(), StubValidator::rejecting(&[3]));
    let blocks = dev_blocks(3);

    assert!(matches!(
        service.filter_headers(&headers_of(&blocks)),
        Err(HeaderBatchRejection::Invalid { number: 3, .. })
    ));

    service.validate_and_add_headers(PeerId(1), DISPLAY, headers_of(&blocks));
    settle().await;

    assert!(network.sent_with(ReqBlocksBodies::HEADER).is_empty());
    assert!(!service.has_outstanding(&PeerId(1)));
    service.shutdown().await;
}

#[tokio::test]
async fn test_imported_header_is_filtered_out() {
    let network = MockNetwork::default();
    let chain = memory_chain();
    let service = sync_service(chain.clone(), network.clone(), StubValidator::default());
    let blocks = dev_blocks(3);

    service.import_batch(DISPLAY, blocks[..1].to_vec());
    assert!(service.is_imported(&blocks[0].hash()));

    service.validate_and_add_headers(PeerId(1), DISPLAY, headers_of(&blocks));
    settle().await;

    let sent = network.sent_with(ReqBlocksBodies::HEADER);
    assert_eq!(sent.len(), 1);
    let request = ReqBlocksBodies::from_body(&sent[0].1.body).unwrap();
    assert_eq!(request.hashes, vec![blocks[1].hash(), blocks[2].hash()]);
    assert!(service.has_outstanding(&PeerId(1)));
    assert!(network.err_checks().is_empty());
    service.shutdown().await;
}

#[tokio::test]
async fn test_fully_imported_batch_requests_nothing() {
    let network = MockNetwork::default();
    let service = sync_service(memory_chain(), network.clone(), StubValidator::default());
    let blocks = dev_blocks(2);
    service.import_batch(DISPLAY, blocks.clone());

    service.validate_and_add_headers(PeerId(1), DISPLAY, headers_of(&blocks));
    settle().await;

    assert!(network.sent().is_empty());
    service.shutdown().await;
}

#[rstest]
#[case::far_ahead(150, 0, BatchRoute::Pending)]
#[case::near(50, 0, BatchRoute::Import)]
#[case::at_horizon(100, 0, BatchRoute::Import)]
#[case::past_horizon(101, 0, BatchRoute::Pending)]
#[case::behind(5, 40, BatchRoute::Import)]
fn test_classify(#[case] first: u64, #[case] local_best: u64, #[case] route: BatchRoute) {
    assert_eq!(classify(first, local_best), route);
}

#[tokio::test]
async fn test_far_future_batch_goes_to_pending_storage() {
    let network = MockNetwork::default();
    let chain = memory_chain();
    let service = sync_service(chain.clone(), network.clone(), StubValidator::default());
    let blocks = dev_blocks(152);
    let far = &blocks[149..];
    assert_eq!(far[0].number(), 150);

    service.store_outstanding(PeerId(1), headers_of(far));
    service.validate_and_add_blocks(PeerId(1), DISPLAY, bodies_of(far)).await;
    settle().await;

    assert_eq!(chain.pending_count(), 3);
    assert_eq!(chain.best_block_number(), 0);
    assert_eq!(service.stats().blocks(DISPLAY).unwrap().stored, 3);
    assert_eq!(network.chain_info(), None);
    service.shutdown().await;
}

#[tokio::test]
async fn test_near_batch_is_imported() {
    let network = MockNetwork::default();
    let chain = memory_chain();
    let service = sync_service(chain.clone(), network.clone(), StubValidator::default());
    let blocks = dev_blocks(3);

    service.store_outstanding(PeerId(1), headers_of(&blocks));
    service.validate_and_add_blocks(PeerId(1), DISPLAY, bodies_of(&blocks)).await;
    settle().await;

    assert_eq!(chain.best_block_number(), 3);
    assert!(service.is_imported(&blocks[2].hash()));
    assert_eq!(service.stats().total_imported(), 3);
    assert_eq!(network.chain_info().map(|info| info.best_number), Some(3));
    assert!(!service.has_outstanding(&PeerId(1)));
    service.shutdown().await;
}

#[tokio::test]
async fn test_unmatched_bodies_are_discarded() {
    let network = MockNetwork::default();
    let chain = memory_chain();
    let service = sync_service(chain.clone(), network.clone(), StubValidator::default());
    let blocks = dev_blocks(3);

    service.store_outstanding(PeerId(1), headers_of(&blocks));
    // Wrong count, then wrong peer.
    service.validate_and_add_blocks(PeerId(1), DISPLAY, bodies_of(&blocks[..2])).await;
    service.validate_and_add_blocks(PeerId(2), "peer02", bodies_of(&blocks)).await;
    settle().await;

    assert_eq!(chain.best_block_number(), 0);
    assert_eq!(network.err_checks(), vec![PeerId(1), PeerId(2)]);
    assert!(service.has_outstanding(&PeerId(1)));
    service.shutdown().await;
}

#[tokio::test]
async fn test_assembly_stops_at_first_bad_body() {
    let network = MockNetwork::default();
    let chain = memory_chain();
    let service = sync_service(chain.clone(), network.clone(), StubValidator::default());
    let blocks = dev_blocks(3);

    let mut bodies = bodies_of(&blocks);
    bodies[1] = vec![0xde, 0xad];
    service.store_outstanding(PeerId(1), headers_of(&blocks));
    service.validate_and_add_blocks(PeerId(1), DISPLAY, bodies).await;
    settle().await;

    assert_eq!(chain.best_block_number(), 1);
    assert!(!service.is_imported(&blocks[2].hash()));
    service.shutdown().await;
}

#[tokio::test]
async fn test_empty_bodies_are_ignored() {
    let network = MockNetwork::default();
    let service = sync_service(memory_chain(), network.clone(), StubValidator::default());
    service.store_outstanding(PeerId(1), headers_of(&dev_blocks(2)));

    service.validate_and_add_blocks(PeerId(1), DISPLAY, Vec::new()).await;

    assert!(network.err_checks().is_empty());
    assert!(service.has_outstanding(&PeerId(1)));
    service.shutdown().await;
}

#[tokio::test]
async fn test_import_continues_past_failures() {
    let network = MockNetwork::default();
    let chain = memory_chain();
    let service = sync_service(chain.clone(), network, StubValidator::default());
    let blocks = dev_blocks(3);

    // Block 3 arrives before its parent and waits in pending storage.
    let summary = service.import_batch(DISPLAY, vec![blocks[0].clone(), blocks[2].clone(), blocks[0].clone()]);
    assert_eq!(summary.imported, 1);
    assert_eq!(summary.stored, 1);
    assert_eq!(summary.ignored, 1);

    let summary = service.import_batch(DISPLAY, vec![blocks[1].clone()]);
    assert_eq!(summary.imported, 1);
    assert_eq!(chain.best_block_number(), 3);
    service.shutdown().await;
}

#[tokio::test]
async fn test_heavier_peer_triggers_header_request() {
    let network = MockNetwork::with_peers(vec![peer(1, 100), peer(2, 0)]);
    let service = sync_service(memory_chain(), network.clone(), StubValidator::default());

    service.update_network_status("010101", &ahead(100));
    settle().await;

    let sent = network.sent_with(ReqBlocksHeaders::HEADER);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, peer(1, 100).peer_id);
    let request = ReqBlocksHeaders::from_body(&sent[0].1.body).unwrap();
    assert_eq!(request, ReqBlocksHeaders { from: 1, take: 24 });
    assert_eq!(service.network_status().total_difficulty, U256::from(100));

    // The peer has a request in flight and is not asked again.
    service.update_network_status("010101", &ahead(100));
    settle().await;
    assert_eq!(network.sent_with(ReqBlocksHeaders::HEADER).len(), 1);
    service.shutdown().await;
}

#[tokio::test]
async fn test_answered_peer_is_not_asked_again_while_bodies_are_pending() {
    let target = peer(1, 100);
    let network = MockNetwork::with_peers(vec![target.clone()]);
    let service = sync_service(memory_chain(), network.clone(), StubValidator::default());

    service.send_headers_requests().await;
    service.validate_and_add_headers(target.peer_id, &target.display_id, headers_of(&dev_blocks(3)));
    // Runs before the body request job gets a chance to.
    service.send_headers_requests().await;
    settle().await;

    assert_eq!(network.sent_with(ReqBlocksHeaders::HEADER).len(), 1);
    assert_eq!(network.sent_with(ReqBlocksBodies::HEADER).len(), 1);
    assert!(service.has_outstanding(&target.peer_id));
    service.shutdown().await;
}

#[tokio::test]
async fn test_lighter_peer_triggers_nothing() {
    let network = MockNetwork::with_peers(vec![peer(1, 100)]);
    let service = sync_service(memory_chain(), network.clone(), StubValidator::default());

    // Local genesis carries a total difficulty of one.
    service.update_network_status("010101", &PeerStatus { total_difficulty: U256::from(1), ..PeerStatus::default() });
    settle().await;

    assert!(network.sent().is_empty());
    service.shutdown().await;
}

#[tokio::test]
async fn test_network_status_coalesces_bursts() {
    let network = MockNetwork::default();
    let service = sync_service(memory_chain(), network, StubValidator::default());

    service.update_network_status("010101", &ahead(10));
    service.update_network_status("020202", &ahead(20));

    let status = service.network_status();
    assert_eq!(status.display_id, "010101");
    assert_eq!(status.total_difficulty, U256::from(10));
    service.shutdown().await;
}

#[tokio::test]
async fn test_request_sizes_vary_between_peers() {
    let network = MockNetwork::with_peers(vec![peer(1, 50), peer(2, 50), peer(3, 50)]);
    let service = sync_service(memory_chain(), network.clone(), StubValidator::default());

    service.send_headers_requests().await;

    let takes: Vec<u32> = network
        .sent_with(ReqBlocksHeaders::HEADER)
        .iter()
        .map(|(_, msg)| ReqBlocksHeaders::from_body(&msg.body).unwrap().take)
        .collect();
    assert_eq!(takes, vec![24, 28, 32]);
    assert_eq!(service.stats().requests(&peer(2, 50).display_id).unwrap().headers, 1);
    service.shutdown().await;
}

#[tokio::test]
async fn test_dropped_body_request_clears_outstanding() {
    let network = MockNetwork::default();
    network.reject_sends();
    let service = sync_service(memory_chain(), network, StubValidator::default());

    service.request_bodies(PeerId(1), DISPLAY, headers_of(&dev_blocks(2))).await;

    assert!(!service.has_outstanding(&PeerId(1)));
    service.shutdown().await;
}

#[tokio::test]
async fn test_status_line_format() {
    let chain = memory_chain();
    let service = sync_service(chain.clone(), MockNetwork::default(), StubValidator::default());
    let genesis = chain.best_header().hash();

    let line = service.status_line();
    assert!(line.starts_with("sync-status avg-import=0.00 b/s td=1/0 b-num=0/0 b-hash="));
    assert!(line.contains(&genesis.to_string()));
    service.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let network = MockNetwork::with_peers(vec![peer(1, 100)]);
    let service = sync_service(memory_chain(), network.clone(), StubValidator::default());
    service.start();

    service.shutdown().await;
    service.shutdown().await;

    // Nothing runs after shutdown.
    service.request_headers();
    settle().await;
    assert!(network.sent_with(ReqBlocksHeaders::HEADER).is_empty());
}

#[tokio::test]
async fn test_get_status_asks_every_peer() {
    let network = MockNetwork::with_peers(vec![peer(1, 0), peer(2, 0)]);
    let service = sync_service(memory_chain(), network.clone(), StubValidator::default());

    service.get_status().await;

    assert_eq!(network.sent().len(), 2);
    assert_eq!(service.stats().requests(&peer(1, 0).display_id).unwrap().status, 1);
    service.shutdown().await;
}
