//! Two transports talking over loopback TCP.
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chain::dev::DevChain;
use chain::{BlockHeaderValidator, Chain, MemoryChain};
use containers::{NodeId, PeerId};
use networking::p2p::{Ctrl, Handler, MsgHeader, Network, P2pConfig, P2pService, Ver, WireMessage};
use networking::sync::{SyncConfig, SyncService, handlers};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Ping {
    n: u32,
}

impl WireMessage for Ping {
    const HEADER: MsgHeader = MsgHeader::new(Ver::V1, Ctrl::SYNC, 42);
}

/// Holds every message until the gate opens.
struct GatedHandler {
    open: watch::Receiver<bool>,
    seen: mpsc::UnboundedSender<u32>,
}

#[async_trait]
impl Handler for GatedHandler {
    fn header(&self) -> MsgHeader {
        Ping::HEADER
    }

    async fn receive(&self, _peer_id: PeerId, _display_id: &str, body: &[u8]) {
        let mut open = self.open.clone();
        let _ = open.wait_for(|open| *open).await;
        if let Ok(ping) = Ping::from_body(body) {
            let _ = self.seen.send(ping.n);
        }
    }
}

struct PingHandler {
    node: &'static str,
    seen: mpsc::UnboundedSender<(&'static str, String, Ping)>,
}

#[async_trait]
impl Handler for PingHandler {
    fn header(&self) -> MsgHeader {
        Ping::HEADER
    }

    async fn receive(&self, _peer_id: PeerId, display_id: &str, body: &[u8]) {
        if let Ok(ping) = Ping::from_body(body) {
            let _ = self.seen.send((self.node, display_id.to_string(), ping));
        }
    }
}

fn config(node_id: NodeId, boot_nodes: Vec<String>) -> P2pConfig {
    P2pConfig {
        listen_address: "127.0.0.1".parse().unwrap(),
        port: 0,
        node_id: Some(node_id.to_string()),
        boot_nodes,
        seeds_only: true,
        ..P2pConfig::default()
    }
}

fn boot_node(node_id: NodeId, service: &P2pService) -> String {
    format!("p2p://{}@{}", node_id, service.local_addr().unwrap())
}

async fn wait_for(what: &str, timeout: Duration, mut done: impl FnMut() -> bool) {
    let polled = async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    };
    tokio::time::timeout(timeout, polled)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

async fn within<T>(timeout: Duration, fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(timeout, fut).await.expect("timed out")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_message_reaches_registered_handler() {
    let id_a = NodeId([0xa1; 32]);
    let id_b = NodeId([0xb2; 32]);
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

    let mut a = P2pService::new(config(id_a, Vec::new()), None).unwrap();
    a.register(vec![Arc::new(PingHandler { node: "a", seen: seen_tx.clone() })]).unwrap();
    a.run().await.unwrap();

    let mut b = P2pService::new(config(id_b, vec![boot_node(id_a, &a)]), None).unwrap();
    b.register(vec![Arc::new(PingHandler { node: "b", seen: seen_tx })]).unwrap();
    b.run().await.unwrap();

    let handle_a = a.handle();
    let handle_b = b.handle();
    wait_for("peers to connect", Duration::from_secs(10), || {
        handle_a.active_count() == 1 && handle_b.active_count() == 1
    })
    .await;

    let peer_a = handle_b.active_peers().remove(0);
    assert_eq!(peer_a.node_id, id_a);
    assert!(handle_b.send(peer_a.peer_id, &peer_a.display_id, Ping { n: 7 }.to_msg().unwrap()).await);

    let (node, from, ping) = within(Duration::from_secs(5), seen_rx.recv()).await.unwrap();
    assert_eq!(node, "a");
    assert_eq!(from, id_b.display_id());
    assert_eq!(ping, Ping { n: 7 });

    b.shutdown();
    wait_for("peer to disconnect", Duration::from_secs(10), || handle_a.active_count() == 0).await;
    a.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_outbound_send_skips_inbound_peers() {
    let id_a = NodeId([0xa1; 32]);
    let id_b = NodeId([0xb4; 32]);
    let id_c = NodeId([0xc5; 32]);
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

    let mut c = P2pService::new(config(id_c, Vec::new()), None).unwrap();
    c.register(vec![Arc::new(PingHandler { node: "c", seen: seen_tx.clone() })]).unwrap();
    c.run().await.unwrap();

    // a dials c, b dials a: c is outbound for a, b is inbound.
    let mut a = P2pService::new(config(id_a, vec![boot_node(id_c, &c)]), None).unwrap();
    a.run().await.unwrap();

    let mut b = P2pService::new(config(id_b, vec![boot_node(id_a, &a)]), None).unwrap();
    b.register(vec![Arc::new(PingHandler { node: "b", seen: seen_tx })]).unwrap();
    b.run().await.unwrap();

    let handle_a = a.handle();
    wait_for("peers to connect", Duration::from_secs(10), || handle_a.active_count() == 2).await;

    assert!(handle_a.send_outbound(Ping { n: 1 }.to_msg().unwrap()).await);
    let (node, _, ping) = within(Duration::from_secs(5), seen_rx.recv()).await.unwrap();
    assert_eq!((node, ping), ("c", Ping { n: 1 }));

    assert!(handle_a.broadcast(Ping { n: 2 }.to_msg().unwrap()).await);
    let mut received = Vec::new();
    for _ in 0..2 {
        let (node, from, ping) = within(Duration::from_secs(5), seen_rx.recv()).await.unwrap();
        assert_eq!(from, id_a.display_id());
        received.push((node, ping.n));
    }
    received.sort_unstable();
    assert_eq!(received, vec![("b", 2), ("c", 2)]);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(seen_rx.try_recv().is_err());

    b.shutdown();
    a.shutdown();
    c.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_full_receive_queue_drops_and_keeps_reading() {
    let id_a = NodeId([0xa1; 32]);
    let id_b = NodeId([0xb5; 32]);
    let metrics = Arc::new(metrics::Metrics::new().unwrap());
    let (open_tx, open_rx) = watch::channel(false);
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

    let config_a = P2pConfig {
        receive_queue_capacity: 1,
        receive_workers: Some(1),
        offer_timeout_ms: 20,
        ..config(id_a, Vec::new())
    };
    let mut a = P2pService::new(config_a, Some(Arc::clone(&metrics))).unwrap();
    a.register(vec![Arc::new(GatedHandler { open: open_rx, seen: seen_tx })]).unwrap();
    a.run().await.unwrap();

    let mut b = P2pService::new(config(id_b, vec![boot_node(id_a, &a)]), None).unwrap();
    b.run().await.unwrap();

    let handle_a = a.handle();
    let handle_b = b.handle();
    wait_for("peers to connect", Duration::from_secs(10), || {
        handle_a.active_count() == 1 && handle_b.active_count() == 1
    })
    .await;
    let peer_a = handle_b.active_peers().remove(0);

    // One message blocks the worker, one fills the queue, the rest are dropped.
    for n in 0..10 {
        assert!(handle_b.send(peer_a.peer_id, &peer_a.display_id, Ping { n }.to_msg().unwrap()).await);
    }
    wait_for("receive queue drops", Duration::from_secs(10), || {
        metrics.gather().contains("p2p_dropped_messages_total{queue=\"receive\"}")
    })
    .await;

    open_tx.send_replace(true);
    assert!(handle_b.send(peer_a.peer_id, &peer_a.display_id, Ping { n: 99 }.to_msg().unwrap()).await);

    let mut delivered = Vec::new();
    while delivered.last() != Some(&99) {
        delivered.push(within(Duration::from_secs(5), seen_rx.recv()).await.unwrap());
    }
    assert!(delivered.len() < 11);
    assert_eq!(handle_a.active_count(), 1);

    b.shutdown();
    a.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_node_syncs_dev_chain_from_peer() {
    let id_a = NodeId([0xa1; 32]);
    let id_b = NodeId([0xb3; 32]);

    let chain_a = Arc::new(MemoryChain::default());
    for block in DevChain::new().unwrap().blocks(50) {
        assert!(chain_a.try_to_connect(&block).is_imported());
    }
    let chain_b = Arc::new(MemoryChain::default());

    let mut a = P2pService::new(config(id_a, Vec::new()), None).unwrap();
    let sync_a = SyncService::new(
        chain_a.clone(),
        a.handle(),
        Arc::new(BlockHeaderValidator::default()),
        SyncConfig::default(),
        None,
    );
    a.register(handlers(&sync_a)).unwrap();
    a.run().await.unwrap();
    sync_a.start();

    let mut b = P2pService::new(config(id_b, vec![boot_node(id_a, &a)]), None).unwrap();
    let sync_b = SyncService::new(
        chain_b.clone(),
        b.handle(),
        Arc::new(BlockHeaderValidator::default()),
        SyncConfig::default(),
        None,
    );
    b.register(handlers(&sync_b)).unwrap();
    b.run().await.unwrap();
    sync_b.start();

    wait_for("chain to sync", Duration::from_secs(30), || chain_b.best_block_number() == 50).await;
    assert_eq!(chain_b.best_header().hash(), chain_a.best_header().hash());
    assert_eq!(chain_b.total_difficulty(), chain_a.total_difficulty());
    assert_eq!(b.handle().local_chain().best_number, 50);

    sync_b.shutdown().await;
    sync_a.shutdown().await;
    b.shutdown();
    a.shutdown();
}
