mod config;

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chain::dev::DevChain;
use chain::{BlockHeaderValidator, Chain, ChainConfig, MemoryChain};
use clap::Parser;
use metrics::Metrics;
use metrics::server::run_metrics_server;
use networking::p2p::P2pService;
use networking::sync::{self, StatsType, SyncService};
use tokio::task;
use tracing::{error, info, warn};

use crate::config::NodeConfig;

#[derive(Parser, Debug)]
struct Args {
    /// YAML configuration file. Flags override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    address: Option<IpAddr>,

    #[arg(short, long)]
    port: Option<u16>,

    /// `p2p://<node-id>@<ip>:<port>` or a YAML file listing them.
    #[arg(short, long)]
    bootnodes: Vec<String>,

    #[arg(long)]
    node_id: Option<String>,

    #[arg(long)]
    chain_id: Option<u32>,

    /// Only connect to boot nodes.
    #[arg(long)]
    seeds_only: bool,

    #[arg(long)]
    max_active_peers: Option<usize>,

    #[arg(long)]
    error_tolerance: Option<u32>,

    #[arg(long)]
    show_status: bool,

    /// requests, seeds, leeches, responses or systeminfo.
    #[arg(long, value_delimiter = ',')]
    show_statistics: Vec<StatsType>,

    #[arg(long)]
    metrics: bool,

    #[arg(long)]
    metrics_address: Option<IpAddr>,

    #[arg(long)]
    metrics_port: Option<u16>,

    /// Seed the local chain with this many deterministic dev blocks.
    #[arg(long, default_value_t = 0)]
    dev_blocks: usize,
}

impl Args {
    fn node_config(&self) -> Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load(path)?,
            None => NodeConfig::default(),
        };

        if let Some(address) = self.address {
            config.p2p.listen_address = address;
        }
        if let Some(port) = self.port {
            config.p2p.port = port;
        }
        config.p2p.boot_nodes.extend(self.bootnodes.iter().cloned());
        if let Some(node_id) = &self.node_id {
            config.p2p.node_id = Some(node_id.clone());
        }
        if let Some(chain_id) = self.chain_id {
            config.p2p.chain_id = chain_id;
        }
        config.p2p.seeds_only |= self.seeds_only;
        if let Some(max) = self.max_active_peers {
            config.p2p.max_active_nodes = max;
            config.sync.max_active_peers = max;
        }
        if let Some(tolerance) = self.error_tolerance {
            config.p2p.error_tolerance = tolerance;
        }

        config.sync.show_status |= self.show_status;
        config.sync.show_statistics.extend(self.show_statistics.iter().copied());

        config.metrics.enabled |= self.metrics;
        if let Some(address) = self.metrics_address {
            config.metrics.metrics_address = address;
        }
        if let Some(port) = self.metrics_port {
            config.metrics.metrics_port = port;
        }

        Ok(config)
    }
}

fn dev_chain(blocks: usize) -> Result<MemoryChain> {
    let chain = MemoryChain::new(ChainConfig::default());
    if blocks > 0 {
        let mut dev = DevChain::new().context("invalid dev signing key")?;
        for block in dev.blocks(blocks) {
            chain.try_to_connect(&block);
        }
        info!(best = chain.best_block_number(), "seeded dev chain");
    }
    Ok(chain)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = args.node_config()?;

    let metrics = Arc::new(Metrics::new().context("failed to register metrics")?);
    if config.metrics.enabled {
        let metrics_config = config.metrics.clone();
        let metrics = Arc::clone(&metrics);
        task::spawn(async move {
            if let Err(err) = run_metrics_server(metrics_config, metrics).await {
                error!("metrics server exited with error: {err:#}");
            }
        });
    }

    let chain = Arc::new(dev_chain(args.dev_blocks)?);
    let mut p2p = P2pService::new(config.p2p.clone(), Some(Arc::clone(&metrics)))?;
    let sync = SyncService::new(
        chain,
        p2p.handle(),
        Arc::new(BlockHeaderValidator::default()),
        config.sync.clone(),
        Some(Arc::clone(&metrics)),
    );

    p2p.register(sync::handlers(&sync))?;
    p2p.run().await?;
    sync.start();
    info!(
        node_id = %p2p.handle().local_id(),
        listen = ?p2p.local_addr(),
        "node started"
    );

    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {err}");
    }

    info!("shutting down");
    sync.shutdown().await;
    p2p.shutdown();
    Ok(())
}
