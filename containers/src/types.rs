use std::fmt;
use std::str::FromStr;

use alloy_primitives::keccak256;
use hex::FromHex;
use rand::RngCore;
use serde::{Deserialize, Serialize};

pub use alloy_primitives::{B256, U256};

/// Length of the short, human readable form of a node id.
pub const DISPLAY_ID_LEN: usize = 6;

/// Full 32-byte identity a node announces during the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        NodeId(bytes)
    }

    /// Numeric identifier used to key every per-peer table.
    pub fn peer_id(&self) -> PeerId {
        let digest = keccak256(self.0);
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        PeerId(u64::from_be_bytes(prefix))
    }

    /// Short form used in logs and statistics.
    pub fn display_id(&self) -> String {
        hex::encode(self.0)[..DISPLAY_ID_LEN].to_string()
    }
}

impl FromStr for NodeId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes: [u8; 32] = <[u8; 32]>::from_hex(s)?;
        Ok(NodeId(bytes))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Opaque, comparable identifier of a connected peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
