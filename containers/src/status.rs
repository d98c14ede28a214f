use serde::{Deserialize, Serialize};

use crate::{B256, U256};

/// Chain head a peer reports in answer to a status request.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PeerStatus {
    pub best_number: u64,
    pub best_hash: B256,
    pub total_difficulty: U256,
    pub genesis_hash: B256,
    pub api_version: u8,
    pub peer_count: u16,
    pub pending_tx_count: u32,
    pub latency: u32,
}
