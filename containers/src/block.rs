use alloy_primitives::keccak256;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{B256, U256};

/// Header of a block as exchanged between peers.
///
/// `hash()` commits to every field, signature included. `mine_hash()` leaves
/// the signature out and is the message the block producer signs.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub number: u64,
    pub parent_hash: B256,
    pub timestamp: u64,
    pub difficulty: U256,
    pub tx_root: B256,
    pub extra_data: Vec<u8>,
    pub signing_public_key: Vec<u8>,
    pub signature: Vec<u8>,
}

impl BlockHeader {
    pub fn hash(&self) -> B256 {
        keccak256(self.encode_for_hash(true))
    }

    pub fn mine_hash(&self) -> B256 {
        keccak256(self.encode_for_hash(false))
    }

    fn encode_for_hash(&self, with_signature: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(160 + self.extra_data.len());
        out.extend_from_slice(&self.number.to_be_bytes());
        out.extend_from_slice(self.parent_hash.as_slice());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.difficulty.to_be_bytes::<32>());
        out.extend_from_slice(self.tx_root.as_slice());
        push_with_len(&mut out, &self.extra_data);
        push_with_len(&mut out, &self.signing_public_key);
        if with_signature {
            push_with_len(&mut out, &self.signature);
        }
        out
    }
}

fn push_with_len(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

/// Transactions carried by a block, opaque to the sync layer.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockBody {
    pub transactions: Vec<Vec<u8>>,
}

impl BlockBody {
    pub fn new(transactions: Vec<Vec<u8>>) -> Self {
        Self { transactions }
    }

    /// Commitment to the ordered transaction list stored in the header.
    pub fn tx_root(&self) -> B256 {
        let mut hasher = Sha256::new();
        for tx in &self.transactions {
            hasher.update(Sha256::digest(tx));
        }
        B256::from(<[u8; 32]>::from(hasher.finalize()))
    }

    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(raw)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub body: BlockBody,
}

impl Block {
    pub fn new(header: BlockHeader, body: BlockBody) -> Self {
        Self { header, body }
    }

    /// Combine a header with a raw body received from a peer.
    ///
    /// Returns `None` when the body does not decode or its transaction root
    /// does not match the header.
    pub fn from_unsafe_parts(header: BlockHeader, raw_body: &[u8]) -> Option<Self> {
        let body = BlockBody::decode(raw_body).ok()?;
        if body.tx_root() != header.tx_root {
            return None;
        }
        Some(Self { header, body })
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn hash(&self) -> B256 {
        self.header.hash()
    }

    pub fn parent_hash(&self) -> B256 {
        self.header.parent_hash
    }
}
