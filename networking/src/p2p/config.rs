//! Transport configuration and protocol constants.
use std::fs::File;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::thread;

use anyhow::{Context, Result, anyhow};
use containers::NodeId;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Largest accepted frame body, compressed or not.
pub const MAX_FRAME_BODY: usize = 2 * 1024 * 1024;

/// Frames queued per connection before further writes to it are dropped.
pub const CONNECTION_WRITE_QUEUE: usize = 1024;

/// Upper bound on receive workers regardless of available parallelism.
pub const MAX_RECEIVE_WORKERS: usize = 32;

/// Capacity of the per-peer protocol error counter.
pub const ERROR_COUNTER_CAPACITY: usize = 128;
/// Bans beyond this evict the least recently banned peer.
pub const BANNED_CAPACITY: usize = 1024;

pub const STATUS_INTERVAL_SECS: u64 = 10;
pub const STALE_SWEEP_INTERVAL_SECS: u64 = 5;
/// Active peers silent for this long are dropped.
pub const STALE_TIMEOUT_SECS: u64 = 30;
pub const DISCOVERY_DELAY_SECS: u64 = 5;
pub const DISCOVERY_INTERVAL_SECS: u64 = 1;
pub const CONNECT_INTERVAL_SECS: u64 = 1;
/// Dials started per connect tick.
pub const MAX_DIALS_PER_TICK: usize = 8;
pub const DIAL_TIMEOUT_SECS: u64 = 5;
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 5;

pub const BOOT_NODE_SCHEME: &str = "p2p://";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct P2pConfig {
    pub listen_address: IpAddr,
    pub port: u16,
    pub chain_id: u32,
    /// Hex node id; a random one is generated when absent.
    pub node_id: Option<String>,
    pub revision: String,
    /// `p2p://<node-id-hex>@<ip>:<port>` entries, or paths to YAML lists of them.
    pub boot_nodes: Vec<String>,
    pub max_active_nodes: usize,
    pub max_temp_nodes: usize,
    pub seeds_only: bool,
    pub error_tolerance: u32,
    pub send_queue_capacity: usize,
    pub receive_queue_capacity: usize,
    pub offer_timeout_ms: u64,
    /// Defaults to twice the available parallelism, capped at [`MAX_RECEIVE_WORKERS`].
    pub receive_workers: Option<usize>,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            listen_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 30303,
            chain_id: 256,
            node_id: None,
            revision: concat!("sync-node/", env!("CARGO_PKG_VERSION")).to_string(),
            boot_nodes: Vec::new(),
            max_active_nodes: 128,
            max_temp_nodes: 128,
            seeds_only: false,
            error_tolerance: 50,
            send_queue_capacity: 10_000,
            receive_queue_capacity: 50_000,
            offer_timeout_ms: 100,
            receive_workers: None,
        }
    }
}

impl P2pConfig {
    pub fn node_id(&self) -> Result<NodeId> {
        match &self.node_id {
            Some(hex) => hex
                .parse()
                .map_err(|err| anyhow!("invalid node id {hex:?}: {err}")),
            None => Ok(NodeId::random()),
        }
    }

    pub fn receive_workers(&self) -> usize {
        self.receive_workers.unwrap_or_else(|| {
            let parallelism = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
            (parallelism * 2).min(MAX_RECEIVE_WORKERS)
        })
    }

    pub fn listen_socket(&self) -> SocketAddr {
        SocketAddr::new(self.listen_address, self.port)
    }

    pub fn boot_nodes(&self) -> Vec<BootNode> {
        self.boot_nodes
            .iter()
            .flat_map(|arg| parse_boot_node_argument(arg))
            .collect()
    }
}

/// A seed peer given on the command line or in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BootNode {
    pub node_id: NodeId,
    pub addr: SocketAddr,
}

impl FromStr for BootNode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix(BOOT_NODE_SCHEME)
            .ok_or_else(|| anyhow!("missing {BOOT_NODE_SCHEME} scheme"))?;
        let (id, addr) = rest.split_once('@').ok_or_else(|| anyhow!("missing '@'"))?;
        let node_id = id.parse().context("invalid node id")?;
        let addr = addr.parse().context("invalid socket address")?;
        Ok(BootNode { node_id, addr })
    }
}

fn parse_boot_node_argument(arg: &str) -> Vec<BootNode> {
    if arg.starts_with(BOOT_NODE_SCHEME) {
        return match arg.parse() {
            Ok(node) => vec![node],
            Err(err) => {
                warn!("boot node {arg:?} is not valid: {err:#}");
                Vec::new()
            }
        };
    }

    let Some(file) = File::open(arg).ok() else {
        warn!("value {arg:?} provided as boot node is neither a p2p:// address nor a readable file");
        return Vec::new();
    };

    let entries: Vec<String> = match serde_yaml::from_reader(file) {
        Ok(value) => value,
        Err(err) => {
            warn!("failed to read boot nodes from {arg:?}: {err:?}");
            return Vec::new();
        }
    };

    if entries.is_empty() {
        warn!("provided file with boot nodes {arg:?} is empty");
    }

    entries
        .iter()
        .filter_map(|entry| match entry.parse() {
            Ok(node) => Some(node),
            Err(err) => {
                warn!("boot node {entry:?} in {arg:?} is not valid: {err:#}");
                None
            }
        })
        .collect()
}
