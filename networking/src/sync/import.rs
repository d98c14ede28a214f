use chain::{Chain, ImportResult};
use containers::{B256, Block};
use metrics::Metrics;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::lru_cache::RecencyCache;

/// Per-batch import outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: u64,
    pub stored: u64,
    pub ignored: u64,
    /// Highest block number that became the new best.
    pub best: Option<u64>,
}

/// Hand each block to the chain in order.
///
/// A failing block is counted and the rest of the batch is still offered;
/// the chain decides what a missing parent means.
pub fn import_blocks(
    chain: &dyn Chain,
    imported: &Mutex<RecencyCache<B256, ()>>,
    metrics: Option<&Metrics>,
    display_id: &str,
    blocks: &[Block],
) -> ImportSummary {
    let mut summary = ImportSummary::default();

    for block in blocks {
        let hash = block.hash();
        if imported.lock().contains(&hash) {
            trace!(peer = %display_id, number = block.number(), "block already imported");
            summary.ignored += 1;
            continue;
        }

        let result = chain.try_to_connect(block);
        if let Some(metrics) = metrics {
            metrics.inc_imported_blocks(result.as_str());
        }

        match result {
            ImportResult::ImportedBest | ImportResult::ImportedNotBest => {
                imported.lock().put(hash, ());
                summary.imported += 1;
                if result == ImportResult::ImportedBest {
                    summary.best = Some(block.number());
                }
            }
            ImportResult::AlreadyKnown => {
                imported.lock().put(hash, ());
                summary.ignored += 1;
            }
            ImportResult::StoredForLater => summary.stored += 1,
            ImportResult::NoParent => {
                debug!(peer = %display_id, number = block.number(), %hash, "no parent and pending storage is full");
                summary.ignored += 1;
            }
            ImportResult::Invalid => {
                warn!(peer = %display_id, number = block.number(), %hash, "chain rejected block");
                summary.ignored += 1;
            }
        }
    }

    summary
}
