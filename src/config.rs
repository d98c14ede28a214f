use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use metrics::server::MetricsServerConfig;
use networking::p2p::P2pConfig;
use networking::sync::SyncConfig;
use serde::Deserialize;

/// Everything the node reads from its YAML configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub p2p: P2pConfig,
    pub sync: SyncConfig,
    pub metrics: MetricsServerConfig,
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("cannot open config file {}", path.display()))?;
        serde_yaml::from_reader(file).with_context(|| format!("invalid config file {}", path.display()))
    }
}
