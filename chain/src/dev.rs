//! Deterministic development chain.
//!
//! Every node started with the same seed produces byte-identical blocks,
//! which lets local nodes and tests sync against each other without a
//! real block producer.

use containers::{Block, BlockBody, BlockHeader, B256, U256};
use k256::ecdsa::{signature::Signer, Signature, SigningKey};

pub const DEV_SEED: [u8; 32] = [7u8; 32];

/// Seconds between consecutive dev blocks.
const BLOCK_INTERVAL_SECS: u64 = 10;
const GENESIS_TIMESTAMP: u64 = 1_600_000_000;

pub fn genesis() -> Block {
    let body = BlockBody::default();
    let header = BlockHeader {
        number: 0,
        parent_hash: B256::ZERO,
        timestamp: GENESIS_TIMESTAMP,
        difficulty: U256::from(1u64),
        tx_root: body.tx_root(),
        ..Default::default()
    };
    Block::new(header, body)
}

/// Producer of signed blocks on top of a local tip.
#[derive(Clone)]
pub struct DevChain {
    key: SigningKey,
    tip: BlockHeader,
    difficulty: U256,
}

impl DevChain {
    pub fn new() -> Result<Self, k256::ecdsa::Error> {
        Self::with_seed(DEV_SEED)
    }

    pub fn with_seed(seed: [u8; 32]) -> Result<Self, k256::ecdsa::Error> {
        Ok(Self {
            key: SigningKey::from_slice(&seed)?,
            tip: genesis().header,
            difficulty: U256::from(1u64),
        })
    }

    /// Difficulty assigned to blocks produced from now on.
    pub fn set_difficulty(&mut self, difficulty: u64) {
        self.difficulty = U256::from(difficulty);
    }

    pub fn tip(&self) -> &BlockHeader {
        &self.tip
    }

    pub fn next_block(&mut self, transactions: Vec<Vec<u8>>) -> Block {
        let body = BlockBody::new(transactions);
        let mut header = BlockHeader {
            number: self.tip.number + 1,
            parent_hash: self.tip.hash(),
            timestamp: self.tip.timestamp + BLOCK_INTERVAL_SECS,
            difficulty: self.difficulty,
            tx_root: body.tx_root(),
            extra_data: b"dev".to_vec(),
            signing_public_key: self.key.verifying_key().to_sec1_bytes().to_vec(),
            signature: Vec::new(),
        };
        let signature: Signature = self.key.sign(header.mine_hash().as_slice());
        header.signature = signature.to_bytes().to_vec();

        self.tip = header.clone();
        Block::new(header, body)
    }

    /// Produce `count` blocks, each carrying one transaction that names its number.
    pub fn blocks(&mut self, count: usize) -> Vec<Block> {
        (0..count)
            .map(|_| {
                let tx = format!("dev-tx-{}", self.tip.number + 1).into_bytes();
                self.next_block(vec![tx])
            })
            .collect()
    }
}
