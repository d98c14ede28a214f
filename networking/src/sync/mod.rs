/// Block synchronisation over the p2p transport.
///
/// This module downloads blocks from peers that claim a heavier chain and
/// feeds them, in order, into the local chain. It includes:
///
/// - **Network Status**: the heaviest head claimed by any peer, replaced at
///   most once per second
/// - **Header Request Manager**: pairs body responses with the header batch
///   that asked for them and keeps one request in flight per peer
/// - **Import**: hands assembled blocks to the chain, one batch at a time
/// - **Sync Service**: decides what to request, validates what arrives and
///   routes assembled blocks to import or pending storage
/// - **Stats**: per-peer request, block and response-time counters
///
/// ## Flow
///
/// 1. Every peer is asked for its status every two seconds
/// 2. A peer ahead of the local total difficulty triggers a header request
///    cycle on the import worker
/// 3. Returned headers are validated as a batch; already imported headers
///    are filtered out and bodies are requested for the rest
/// 4. Bodies are paired with the outstanding headers of the same peer
/// 5. Batches close to the local head are imported; batches far ahead are
///    parked in pending storage
pub mod config;
pub mod handlers;
pub mod header_request;
pub mod import;
pub mod messages;
pub mod network_status;
pub mod service;
pub mod stats;

pub use config::*;
pub use handlers::handlers;
pub use header_request::HeaderRequestManager;
pub use import::{ImportSummary, import_blocks};
pub use network_status::{NetworkStatus, NetworkStatusTracker};
pub use service::{BatchRoute, HeaderBatchRejection, SyncService, classify};
pub use stats::{BlockOutcome, RequestType, SyncStats};

#[cfg(test)]
mod tests;
