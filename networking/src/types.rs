use std::fmt::Display;
use std::net::SocketAddr;

use containers::{B256, NodeId, PeerId, U256};
use serde::{Deserialize, Serialize};

/// Which side opened the connection.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

/// Chain head as last reported by a peer, or as held locally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInfo {
    pub best_number: u64,
    pub best_hash: B256,
    pub total_difficulty: U256,
}

/// Snapshot of an active peer, handed out by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub peer_id: PeerId,
    pub node_id: NodeId,
    pub display_id: String,
    pub addr: SocketAddr,
    pub direction: Direction,
    pub chain: ChainInfo,
    pub latency: u32,
}
