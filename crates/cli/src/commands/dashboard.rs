use std::collections::BTreeMap;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;
use yard_ops::Tunnel;

use crate::config::{Cluster, Config};

pub const IGW_PORT: u16 = 80;
pub const DEFAULT_LOCAL_PORT: u16 = 50500;

/// Selects the Backyards ingress gateway pods.
pub fn igw_labels() -> BTreeMap<String, String> {
    [("app.kubernetes.io/component", "ingressgateway"), ("app.kubernetes.io/instance", "backyards")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// A running tunnel to the ingress gateway; `local_port` 0 picks a free one.
pub async fn igw_tunnel(config: &Config, cluster: &Cluster, local_port: u16) -> Result<Tunnel> {
    let tunnel = cluster
        .tunnels()
        .create(&igw_labels(), &config.namespace, local_port, IGW_PORT)
        .await
        .context("could not create port forwarder")?;
    tunnel.run().await.context("could not run port forwarder")?;
    Ok(tunnel)
}

#[derive(Args, Debug, Clone)]
pub struct DashboardArgs {
    /// The local port on which to serve requests (0 picks a random port)
    #[arg(short = 'p', long, default_value_t = DEFAULT_LOCAL_PORT)]
    pub port: u16,
}

pub async fn run(config: &Config, args: &DashboardArgs) -> Result<()> {
    let cluster = config.cluster().await?;
    open(config, &cluster, args.port, "").await
}

/// Serves the UI until Ctrl-C or until the tunnel dies.
pub async fn open(config: &Config, cluster: &Cluster, port: u16, query: &str) -> Result<()> {
    let tunnel = igw_tunnel(config, cluster, port).await?;
    info!("Backyards UI is available at {}", tunnel.url(&format!("/{}", query)));

    let stop = tunnel.stop_token();
    let signals = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, closing the dashboard tunnel");
            stop.cancel();
        }
    });
    let result = tunnel.wait_for_stop().await;
    signals.abort();
    result.context("port forward ended with an error")
}
