use crate::Metrics;
use anyhow::{Error as AnyhowError, Result};
use axum::{Router, routing::get, extract::State};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tracing::info;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MetricsServerConfig {
    pub enabled: bool,
    pub metrics_address: IpAddr,
    pub metrics_port: u16,
}

impl Default for MetricsServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            metrics_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            metrics_port: 9464,
        }
    }
}

impl From<&MetricsServerConfig> for SocketAddr {
    fn from(config: &MetricsServerConfig) -> Self {
        SocketAddr::from((config.metrics_address, config.metrics_port))
    }
}

async fn prometheus_metrics_handler(State(metrics): State<Arc<Metrics>>) -> String {
    metrics.gather()
}

pub async fn run_metrics_server(config: MetricsServerConfig, metrics: Arc<Metrics>) -> Result<()> {
    let addr = SocketAddr::from(&config);

    let router = Router::new()
        .route("/metrics", get(prometheus_metrics_handler))
        .with_state(metrics);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "metrics server listening");

    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>()).await
        .map_err(AnyhowError::new)?;

    Ok(())
}
