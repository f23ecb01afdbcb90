use anyhow::Result;
use clap::Args;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::dashboard::igw_tunnel;
use crate::config::Config;

const UNAVAILABLE: &str = "unavailable";

#[derive(Args, Debug, Clone)]
pub struct VersionArgs {
    /// Print the version number(s) only, with no additional output
    #[arg(long)]
    pub short: bool,
    /// Print the client version only
    #[arg(long)]
    pub client: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub client_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

#[derive(Deserialize)]
struct BuildInfo {
    #[serde(default)]
    version: String,
}

pub fn render(info: &VersionInfo, short: bool) -> String {
    let mut lines = vec![if short { info.client_version.clone() } else { format!("Client version: {}", info.client_version) }];
    if let Some(api) = &info.api_version {
        lines.push(if short { api.clone() } else { format!("API version: {}", api) });
    }
    lines.join("\n")
}

/// Any failure on the way reads as "unavailable".
async fn api_version(config: &Config) -> String {
    let fetch = async {
        let cluster = config.cluster().await?;
        let tunnel = igw_tunnel(config, &cluster, 0).await?;
        let info: BuildInfo = reqwest::get(tunnel.url("/version")).await?.error_for_status()?.json().await?;
        tunnel.stop();
        anyhow::Ok(info.version)
    };
    match fetch.await {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "could not fetch API version");
            UNAVAILABLE.to_string()
        }
    }
}

pub async fn run(config: &Config, args: &VersionArgs) -> Result<()> {
    let api_version = if args.client { None } else { Some(api_version(config).await) };
    let info = VersionInfo { client_version: env!("CARGO_PKG_VERSION").to_string(), api_version };
    config.print(&info, |i| render(i, args.short))
}
