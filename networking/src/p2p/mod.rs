/// Peer-to-peer transport.
///
/// Peers connect over plain TCP and exchange length-prefixed, snappy
/// compressed frames. The transport runs:
///
/// - **Listener**: accepts inbound connections and answers handshakes
/// - **Send worker**: one task draining the bounded outbound queue into
///   per-connection write queues
/// - **Receive workers**: a fixed pool dispatching inbound messages to
///   registered [`Handler`]s
/// - **Periodic tasks**: status report, stale peer sweep, discovery and
///   outbound connection attempts
///
/// Every queue is bounded. A full queue drops the message with a warning
/// rather than blocking the producer.
pub mod codec;
pub mod config;
mod connection;
pub mod handle;
pub mod handshake;
pub mod message;
pub mod node_table;
pub mod service;

pub use config::{BootNode, P2pConfig};
pub use handle::{Network, P2pHandle};
pub use handshake::Handshake;
pub use message::{Ctrl, Dest, Handler, Msg, MsgHeader, Ver, WireMessage};
pub use node_table::{Node, NodeRejection, NodeTable, TempNode};
pub use service::P2pService;

#[cfg(test)]
mod tests;
