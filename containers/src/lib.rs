pub mod block;
pub mod status;
pub mod types;

pub use block::{Block, BlockBody, BlockHeader};
pub use status::PeerStatus;
pub use types::{B256, NodeId, PeerId, U256};
