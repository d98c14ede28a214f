use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write as _;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use containers::{NodeId, PeerId};
use rand::seq::IteratorRandom;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::lru_cache::RecencyCache;

use super::config::{BANNED_CAPACITY, BootNode};
use super::handshake::NodeAddr;
use crate::types::{ChainInfo, Direction, PeerInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NodeRejection {
    #[error("connection to self")]
    SelfConnection,
    #[error("peer is banned")]
    Banned,
    #[error("peer is already active")]
    AlreadyActive,
    #[error("active node table is full")]
    TableFull,
}

/// A peer that completed the handshake.
#[derive(Debug)]
pub struct Node {
    pub node_id: NodeId,
    pub peer_id: PeerId,
    pub display_id: String,
    pub addr: SocketAddr,
    /// Port the peer listens on, as announced in its handshake.
    pub listen_port: u16,
    pub direction: Direction,
    pub revision: String,
    pub chain: ChainInfo,
    pub latency: u32,
    pub last_seen: Instant,
    writer: mpsc::Sender<Vec<u8>>,
    reader: Option<AbortHandle>,
}

impl Node {
    pub fn new(
        node_id: NodeId,
        addr: SocketAddr,
        listen_port: u16,
        direction: Direction,
        revision: String,
        writer: mpsc::Sender<Vec<u8>>,
    ) -> Self {
        Self {
            peer_id: node_id.peer_id(),
            display_id: node_id.display_id(),
            node_id,
            addr,
            listen_port,
            direction,
            revision,
            chain: ChainInfo::default(),
            latency: 0,
            last_seen: Instant::now(),
            writer,
            reader: None,
        }
    }

    pub fn set_reader(&mut self, reader: AbortHandle) {
        self.reader = Some(reader);
    }

    /// Queue an encoded frame on this peer's connection without waiting.
    pub fn enqueue(&self, frame: Vec<u8>) -> bool {
        self.writer.try_send(frame).is_ok()
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr.ip(), self.listen_port)
    }

    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            peer_id: self.peer_id,
            node_id: self.node_id,
            display_id: self.display_id.clone(),
            addr: self.addr,
            direction: self.direction,
            chain: self.chain.clone(),
            latency: self.latency,
        }
    }

    /// Stop reading before the writer is dropped, which closes the socket.
    pub fn close(self) {
        if let Some(reader) = self.reader {
            reader.abort();
        }
        drop(self.writer);
    }
}

/// Candidate peer waiting to be dialed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempNode {
    pub node_id: NodeId,
    pub addr: SocketAddr,
    pub seed: bool,
}

pub struct NodeTable {
    local_id: NodeId,
    local_addr: SocketAddr,
    max_active: usize,
    max_temp: usize,
    boot_nodes: Vec<BootNode>,
    seed_ips: HashSet<IpAddr>,
    temp: VecDeque<TempNode>,
    active: HashMap<PeerId, Node>,
    banned: RecencyCache<PeerId, ()>,
}

impl NodeTable {
    pub fn new(local_id: NodeId, local_addr: SocketAddr, max_active: usize, max_temp: usize) -> Self {
        Self {
            local_id,
            local_addr,
            max_active,
            max_temp,
            boot_nodes: Vec::new(),
            seed_ips: HashSet::new(),
            temp: VecDeque::new(),
            active: HashMap::new(),
            banned: RecencyCache::new(BANNED_CAPACITY),
        }
    }

    pub fn set_local_addr(&mut self, addr: SocketAddr) {
        self.local_addr = addr;
    }

    pub fn add_boot_nodes(&mut self, nodes: &[BootNode]) {
        for node in nodes {
            self.seed_ips.insert(node.addr.ip());
            self.boot_nodes.push(*node);
        }
        self.refill_from_boot_nodes();
    }

    /// Queue every boot node that is neither active nor already waiting.
    pub fn refill_from_boot_nodes(&mut self) {
        let nodes = self.boot_nodes.clone();
        for node in nodes {
            self.add_temp(TempNode { node_id: node.node_id, addr: node.addr, seed: true });
        }
    }

    pub fn is_seed(&self, ip: &IpAddr) -> bool {
        self.seed_ips.contains(ip)
    }

    pub fn add_temp(&mut self, node: TempNode) -> bool {
        let peer_id = node.node_id.peer_id();
        if node.node_id == self.local_id
            || node.addr == self.local_addr
            || self.active.contains_key(&peer_id)
            || self.banned.contains(&peer_id)
            || self.temp.len() >= self.max_temp
            || self.temp.iter().any(|t| t.node_id == node.node_id)
        {
            return false;
        }
        self.temp.push_back(node);
        true
    }

    pub fn take_temp(&mut self) -> Option<TempNode> {
        self.temp.pop_front()
    }

    pub fn temp_count(&self) -> usize {
        self.temp.len()
    }

    /// Check whether a peer may become active.
    pub fn validate_node(&self, node_id: &NodeId, addr: &SocketAddr) -> Result<(), NodeRejection> {
        let peer_id = node_id.peer_id();
        if *node_id == self.local_id || *addr == self.local_addr {
            return Err(NodeRejection::SelfConnection);
        }
        if self.banned.contains(&peer_id) {
            return Err(NodeRejection::Banned);
        }
        if self.active.contains_key(&peer_id) {
            return Err(NodeRejection::AlreadyActive);
        }
        if self.active.len() >= self.max_active {
            return Err(NodeRejection::TableFull);
        }
        Ok(())
    }

    pub fn add_active(&mut self, node: Node) -> Result<PeerId, NodeRejection> {
        self.validate_node(&node.node_id, &node.listen_addr())?;
        let peer_id = node.peer_id;
        self.active.insert(peer_id, node);
        Ok(peer_id)
    }

    pub fn get_active(&self, peer_id: &PeerId) -> Option<&Node> {
        self.active.get(peer_id)
    }

    pub fn get_active_mut(&mut self, peer_id: &PeerId) -> Option<&mut Node> {
        self.active.get_mut(peer_id)
    }

    /// Remove a peer from the active set; the caller closes the returned node.
    pub fn drop_active(&mut self, peer_id: &PeerId) -> Option<Node> {
        self.active.remove(peer_id)
    }

    pub fn ban(&mut self, peer_id: PeerId) {
        self.banned.put(peer_id, ());
    }

    pub fn is_banned(&self, peer_id: &PeerId) -> bool {
        self.banned.contains(peer_id)
    }

    pub fn is_active(&self, peer_id: &PeerId) -> bool {
        self.active.contains_key(peer_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_full(&self) -> bool {
        self.active.len() >= self.max_active
    }

    pub fn touch(&mut self, peer_id: &PeerId, now: Instant) {
        if let Some(node) = self.active.get_mut(peer_id) {
            node.last_seen = now;
        }
    }

    pub fn update_chain(&mut self, peer_id: &PeerId, chain: ChainInfo) {
        if let Some(node) = self.active.get_mut(peer_id) {
            node.chain = chain;
        }
    }

    pub fn active_nodes(&self) -> impl Iterator<Item = &Node> {
        self.active.values()
    }

    pub fn active_peers(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<PeerInfo> = self.active.values().map(Node::info).collect();
        peers.sort_by_key(|peer| peer.peer_id);
        peers
    }

    pub fn random_active(&self) -> Option<PeerId> {
        self.active.keys().copied().choose(&mut rand::thread_rng())
    }

    /// Mean latency over peers with a measured value.
    pub fn avg_latency(&self) -> u32 {
        let measured: Vec<u64> = self
            .active
            .values()
            .filter(|node| node.latency > 0)
            .map(|node| u64::from(node.latency))
            .collect();
        if measured.is_empty() {
            return 0;
        }
        (measured.iter().sum::<u64>() / measured.len() as u64) as u32
    }

    /// Addresses to share with `requester` during discovery.
    pub fn shareable_nodes(&self, requester: &PeerId) -> Vec<NodeAddr> {
        self.active
            .values()
            .filter(|node| node.peer_id != *requester)
            .map(|node| NodeAddr { node_id: node.node_id, addr: node.listen_addr() })
            .collect()
    }

    /// Remove peers not heard from within `timeout`.
    pub fn drop_stale(&mut self, now: Instant, timeout: Duration) -> Vec<Node> {
        let stale: Vec<PeerId> = self
            .active
            .values()
            .filter(|node| now.saturating_duration_since(node.last_seen) > timeout)
            .map(|node| node.peer_id)
            .collect();
        stale.iter().filter_map(|peer_id| self.active.remove(peer_id)).collect()
    }

    /// Forget every peer. Returns the active nodes so the caller can close them.
    pub fn shutdown(&mut self) -> Vec<Node> {
        self.temp.clear();
        self.active.drain().map(|(_, node)| node).collect()
    }

    pub fn dump(&self, local: &ChainInfo) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "\n{:=^94}\n self best={} td={} active={} temp={} banned={}",
            " p2p-status ",
            local.best_number,
            local.total_difficulty,
            self.active.len(),
            self.temp.len(),
            self.banned.len(),
        );
        let _ = writeln!(
            out,
            " {:<8} {:>10} {:>20} {:>8} {:<9} {:<22} {:<5}",
            "id", "best", "td", "latency", "direction", "address", "seed"
        );
        for peer in self.active_peers() {
            let _ = writeln!(
                out,
                " {:<8} {:>10} {:>20} {:>8} {:<9} {:<22} {:<5}",
                peer.display_id,
                peer.chain.best_number,
                peer.chain.total_difficulty.to_string(),
                peer.latency,
                peer.direction.to_string(),
                peer.addr.to_string(),
                self.is_seed(&peer.addr.ip()),
            );
        }
        out
    }
}
