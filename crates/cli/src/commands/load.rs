use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tokio::task::JoinHandle;
use tracing::info;
use yard_graphql::{GenerateLoadRequest, GraphqlClient, TrafficPolicyClient};
use yard_install::DEMO_NAMESPACE;

use super::dashboard::igw_tunnel;
use crate::config::{Cluster, Config};

const DEMO_SERVICE: &str = "frontpage";
const DEMO_PORT: u16 = 8080;

#[derive(Args, Debug, Clone)]
pub struct LoadArgs {
    /// Number of requests per second
    #[arg(long = "rps", default_value_t = 10)]
    pub frequency: u32,
    /// Duration in seconds
    #[arg(long, default_value_t = 30)]
    pub duration: u32,
    /// Namespace of the demo application
    #[arg(long, default_value = DEMO_NAMESPACE)]
    pub demo_namespace: String,
}

impl Default for LoadArgs {
    fn default() -> Self { Self { frequency: 10, duration: 30, demo_namespace: DEMO_NAMESPACE.to_string() } }
}

impl LoadArgs {
    pub fn request(&self) -> GenerateLoadRequest {
        GenerateLoadRequest {
            namespace: self.demo_namespace.clone(),
            service: DEMO_SERVICE.to_string(),
            port: DEMO_PORT,
            endpoint: "/".to_string(),
            method: "GET".to_string(),
            body: None,
            headers: BTreeMap::new(),
            frequency: self.frequency,
            duration: self.duration,
        }
    }
}

pub type LoadHandle = JoinHandle<Result<BTreeMap<String, u64>>>;

/// Starts load generation in the background. The tunnel lives as long as
/// the returned task.
pub async fn spawn_load(config: &Config, cluster: &Cluster, args: LoadArgs) -> Result<LoadHandle> {
    let tunnel = igw_tunnel(config, cluster, 0).await?;
    // the mutation returns only once the load is over
    let client = GraphqlClient::with_timeout(tunnel.url("/api/graphql"), Duration::from_secs(u64::from(args.duration) + 30))?;
    let req = args.request();
    info!(rps = args.frequency, duration = args.duration, "sending load to demo application");

    Ok(tokio::spawn(async move {
        let result = client.generate_load(&req).await;
        tunnel.stop();
        info!("loader stopped");
        let counts = result.context("error during load generation")?;
        for (code, count) in &counts {
            info!(response_code = %code, request_count = count, "load result");
        }
        Ok(counts)
    }))
}

pub async fn run(config: &Config, cluster: &Cluster, args: LoadArgs) -> Result<()> {
    let counts = spawn_load(config, cluster, args).await?.await.context("load task failed")??;
    config.print(&counts, |c| c.iter().map(|(code, n)| format!("{}\t{}", code, n)).collect::<Vec<_>>().join("\n"))
}
