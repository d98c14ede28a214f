//! Capabilities the sync engine consumes from the rest of the node.
//!
//! The sync layer never owns block storage or consensus rules. It talks to
//! them through the narrow [`Chain`] and [`HeaderValidator`] traits, injected
//! at construction time.

pub mod config;
pub mod dev;
pub mod memory;
pub mod validation;

use containers::{B256, Block, BlockHeader, U256};

pub use config::ChainConfig;
pub use memory::MemoryChain;
pub use validation::{BlockHeaderValidator, HeaderError, HeaderRule, HeaderValidator};

/// Outcome of handing a single block to the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportResult {
    /// Connected and became the new best block.
    ImportedBest,
    /// Connected on a side chain.
    ImportedNotBest,
    /// Already part of the chain.
    AlreadyKnown,
    /// Parent unknown; kept in pending storage until the parent arrives.
    StoredForLater,
    /// Parent unknown and pending storage is full.
    NoParent,
    /// Rejected by the chain.
    Invalid,
}

impl ImportResult {
    pub fn is_imported(&self) -> bool {
        matches!(self, ImportResult::ImportedBest | ImportResult::ImportedNotBest)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImportResult::ImportedBest => "imported_best",
            ImportResult::ImportedNotBest => "imported_not_best",
            ImportResult::AlreadyKnown => "already_known",
            ImportResult::StoredForLater => "stored",
            ImportResult::NoParent => "no_parent",
            ImportResult::Invalid => "invalid",
        }
    }
}

/// Chain access required by the sync engine.
pub trait Chain: Send + Sync {
    fn genesis_hash(&self) -> B256;

    fn best_header(&self) -> BlockHeader;

    /// Total difficulty of the current best block.
    fn total_difficulty(&self) -> U256;

    fn total_difficulty_for_hash(&self, hash: &B256) -> Option<U256>;

    /// Block on the canonical chain at `number`.
    fn block_by_number(&self, number: u64) -> Option<Block>;

    fn block_by_hash(&self, hash: &B256) -> Option<Block>;

    fn try_to_connect(&self, block: &Block) -> ImportResult;

    /// Keep blocks far ahead of the local head for later import.
    ///
    /// Returns how many blocks were stored.
    fn store_pending_block_range(&self, blocks: &[Block]) -> usize;

    fn best_block_number(&self) -> u64 {
        self.best_header().number
    }
}
