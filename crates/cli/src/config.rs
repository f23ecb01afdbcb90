use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::ValueEnum;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use yard_core::{GroupVersionKind, ResourceObject};
use yard_install::{Installer, InstallOptions};
use yard_kubehub::{ClientConfig, KubeStore, ObjectStore};
use yard_ops::{KubeForwarder, TunnelManager};

static NAMESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9-]+$").expect("valid regex"));

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum Output {
    #[default]
    Table,
    Yaml,
    Json,
}

/// Used as a clap value parser for `--namespace`.
pub fn parse_namespace(s: &str) -> Result<String, String> {
    if NAMESPACE_RE.is_match(s) { Ok(s.to_string()) } else { Err(format!("invalid namespace '{}': only letters, digits and '-' are allowed", s)) }
}

/// Settings shared by every command, resolved once from the global flags.
#[derive(Debug, Clone)]
pub struct Config {
    pub namespace: String,
    pub kubeconfig: Option<PathBuf>,
    pub context: Option<String>,
    pub output: Output,
    pub charts_dir: PathBuf,
}

impl Config {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig { kubeconfig: self.kubeconfig.clone(), context: self.context.clone() }
    }

    /// Install options with the global namespace applied.
    pub fn install_options(&self) -> InstallOptions {
        InstallOptions { namespace: self.namespace.clone(), ..Default::default() }
    }

    pub async fn cluster(&self) -> Result<Cluster> {
        let client = self.client_config().connect().await?;
        Ok(Cluster { store: Arc::new(KubeStore::new(client.clone())), client })
    }

    /// Prints a serializable result in the selected format; `table` uses the
    /// given row renderer.
    pub fn print<T: Serialize>(&self, value: &T, table: impl FnOnce(&T) -> String) -> Result<()> {
        let text = match self.output {
            Output::Table => table(value),
            Output::Json => serde_json::to_string_pretty(value)?,
            Output::Yaml => serde_yaml::to_string(value)?,
        };
        println!("{}", text.trim_end());
        Ok(())
    }
}

/// A connected cluster: the object store plus the raw client the port
/// forwarder needs.
pub struct Cluster {
    pub client: kube::Client,
    pub store: Arc<KubeStore>,
}

impl Cluster {
    pub fn store(&self) -> Arc<dyn ObjectStore> { self.store.clone() }

    pub fn tunnels(&self) -> TunnelManager {
        TunnelManager::new(self.store(), Arc::new(KubeForwarder::new(self.client.clone())))
    }

    pub fn installer(&self, config: &Config) -> Installer { Installer::new(self.store(), &config.charts_dir) }

    /// Fails with the store's error when the service does not exist.
    pub async fn service(&self, namespace: &str, name: &str) -> Result<ResourceObject> {
        let gvk = GroupVersionKind::gvk("", "v1", "Service");
        self.store
            .get(&ResourceObject::stub(&gvk, Some(namespace), name))
            .await
            .with_context(|| format!("could not get service {}/{}", namespace, name))
    }
}
