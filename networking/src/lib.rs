pub mod error;
pub mod executor;
pub mod lru_cache;
pub mod p2p;
pub mod sync;
pub mod types;

pub use error::WireError;
pub use executor::{SubmitError, WorkerPool};
pub use lru_cache::RecencyCache;
