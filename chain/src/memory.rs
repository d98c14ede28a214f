use std::collections::HashMap;

use containers::{Block, BlockHeader, B256, U256};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::{config::ChainConfig, dev, Chain, ImportResult};

/// In-memory block store with total-difficulty fork choice.
pub struct MemoryChain {
    inner: RwLock<Inner>,
    config: ChainConfig,
}

struct Inner {
    genesis: B256,
    best: B256,
    blocks: HashMap<B256, Block>,
    total_difficulty: HashMap<B256, U256>,
    /// Index `n` holds the hash of the canonical block at height `n`.
    canonical: Vec<B256>,
    /// Blocks waiting for their parent, keyed by parent hash.
    pending: HashMap<B256, Vec<Block>>,
    pending_count: usize,
}

impl MemoryChain {
    pub fn new(config: ChainConfig) -> Self {
        Self::with_genesis(dev::genesis(), config)
    }

    pub fn with_genesis(genesis: Block, config: ChainConfig) -> Self {
        let hash = genesis.hash();
        let mut inner = Inner {
            genesis: hash,
            best: hash,
            blocks: HashMap::new(),
            total_difficulty: HashMap::new(),
            canonical: vec![hash],
            pending: HashMap::new(),
            pending_count: 0,
        };
        inner.total_difficulty.insert(hash, genesis.header.difficulty);
        inner.blocks.insert(hash, genesis);
        Self { inner: RwLock::new(inner), config }
    }

    pub fn block_count(&self) -> usize {
        self.inner.read().blocks.len()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.read().pending_count
    }

    fn store_pending(&self, inner: &mut Inner, block: &Block) -> bool {
        if inner.pending_count >= self.config.max_pending_blocks {
            return false;
        }
        let siblings = inner.pending.entry(block.parent_hash()).or_default();
        let hash = block.hash();
        if siblings.iter().any(|b| b.hash() == hash) {
            return true;
        }
        siblings.push(block.clone());
        inner.pending_count += 1;
        true
    }
}

impl Inner {
    fn best_header(&self) -> BlockHeader {
        self.blocks
            .get(&self.best)
            .map(|b| b.header.clone())
            .unwrap_or_default()
    }

    fn best_td(&self) -> U256 {
        self.total_difficulty.get(&self.best).copied().unwrap_or_default()
    }

    /// Connect a block whose parent is known. Returns `None` if the parent is missing.
    fn connect(&mut self, block: &Block) -> Option<ImportResult> {
        let parent_td = *self.total_difficulty.get(&block.parent_hash())?;
        let parent_number = self.blocks.get(&block.parent_hash())?.number();
        if block.number() != parent_number + 1 {
            return Some(ImportResult::Invalid);
        }

        let hash = block.hash();
        let td = parent_td + block.header.difficulty;
        self.blocks.insert(hash, block.clone());
        self.total_difficulty.insert(hash, td);

        if td > self.best_td() {
            self.set_best(hash, block.number());
            Some(ImportResult::ImportedBest)
        } else {
            Some(ImportResult::ImportedNotBest)
        }
    }

    fn set_best(&mut self, hash: B256, number: u64) {
        self.canonical.resize(number as usize + 1, B256::ZERO);
        let mut cursor = hash;
        let mut height = number as usize;
        loop {
            if self.canonical[height] == cursor {
                break;
            }
            self.canonical[height] = cursor;
            if height == 0 {
                break;
            }
            cursor = match self.blocks.get(&cursor) {
                Some(block) => block.parent_hash(),
                None => break,
            };
            height -= 1;
        }
        self.best = hash;
    }

    /// Connect every pending descendant of `parent`.
    fn drain_pending(&mut self, parent: B256) -> usize {
        let mut connected = 0;
        let mut queue = vec![parent];
        while let Some(hash) = queue.pop() {
            let Some(children) = self.pending.remove(&hash) else {
                continue;
            };
            self.pending_count = self.pending_count.saturating_sub(children.len());
            for child in children {
                if self.blocks.contains_key(&child.hash()) {
                    continue;
                }
                if let Some(result) = self.connect(&child) {
                    if result.is_imported() {
                        connected += 1;
                        queue.push(child.hash());
                    }
                }
            }
        }
        connected
    }
}

impl Default for MemoryChain {
    fn default() -> Self {
        Self::new(ChainConfig::default())
    }
}

impl Chain for MemoryChain {
    fn genesis_hash(&self) -> B256 {
        self.inner.read().genesis
    }

    fn best_header(&self) -> BlockHeader {
        self.inner.read().best_header()
    }

    fn total_difficulty(&self) -> U256 {
        self.inner.read().best_td()
    }

    fn total_difficulty_for_hash(&self, hash: &B256) -> Option<U256> {
        self.inner.read().total_difficulty.get(hash).copied()
    }

    fn block_by_number(&self, number: u64) -> Option<Block> {
        let inner = self.inner.read();
        let hash = inner.canonical.get(number as usize)?;
        inner.blocks.get(hash).cloned()
    }

    fn block_by_hash(&self, hash: &B256) -> Option<Block> {
        self.inner.read().blocks.get(hash).cloned()
    }

    fn try_to_connect(&self, block: &Block) -> ImportResult {
        let mut inner = self.inner.write();
        if inner.blocks.contains_key(&block.hash()) {
            return ImportResult::AlreadyKnown;
        }

        let Some(result) = inner.connect(block) else {
            return if self.store_pending(&mut inner, block) {
                ImportResult::StoredForLater
            } else {
                ImportResult::NoParent
            };
        };

        if result.is_imported() {
            let drained = inner.drain_pending(block.hash());
            if drained > 0 {
                let best = inner.best_header();
                info!(drained, best = best.number, "connected pending blocks");
            }
        }
        result
    }

    fn store_pending_block_range(&self, blocks: &[Block]) -> usize {
        let mut inner = self.inner.write();
        let mut stored = 0;
        for block in blocks {
            if inner.blocks.contains_key(&block.hash()) {
                continue;
            }
            if inner.total_difficulty.contains_key(&block.parent_hash()) {
                if inner.connect(block).is_some_and(|r| r.is_imported()) {
                    inner.drain_pending(block.hash());
                }
                continue;
            }
            if !self.store_pending(&mut inner, block) {
                break;
            }
            stored += 1;
        }
        debug!(stored, first = blocks.first().map(Block::number), "stored pending range");
        stored
    }
}
