use anyhow::{Context, Result};
use clap::Args;
use tracing::info;
use yard_install::{Component, InstallOptions, DEFAULT_RELEASE_NAME, ISTIO_NAMESPACE};

use super::{dashboard, install_component, load, uninstall_component};
use crate::config::Config;

#[derive(Args, Debug, Clone)]
pub struct InstallArgs {
    /// Name of the release
    #[arg(long, default_value = DEFAULT_RELEASE_NAME)]
    pub release_name: String,
    /// Namespace of Istio sidecar injector
    #[arg(long, default_value = ISTIO_NAMESPACE)]
    pub istio_namespace: String,
    /// Install Istio mesh as well
    #[arg(long)]
    pub install_istio: bool,
    /// Install Canary feature as well
    #[arg(long)]
    pub install_canary: bool,
    /// Install demo application as well
    #[arg(long)]
    pub install_demoapp: bool,
    /// Install cert-manager as well
    #[arg(long)]
    pub install_cert_manager: bool,
    /// Install every component at once
    #[arg(short = 'a', long)]
    pub install_everything: bool,
    /// Disable dependency on cert-manager and on its resources
    #[arg(long)]
    pub disable_cert_manager: bool,
    /// Disable deploying the auditsink service and sending audit logs over http
    #[arg(long = "disable-auditsink")]
    pub disable_audit_sink: bool,
    /// Send load to the demo application and open the dashboard
    #[arg(long)]
    pub run_demo: bool,
    /// Dump resources to stdout instead of applying them
    #[arg(short = 'd', long)]
    pub dump_resources: bool,
}

impl InstallArgs {
    fn options(&self, config: &Config) -> InstallOptions {
        InstallOptions {
            release_name: self.release_name.clone(),
            istio_namespace: self.istio_namespace.clone(),
            disable_cert_manager: self.disable_cert_manager,
            disable_audit_sink: self.disable_audit_sink,
            ..config.install_options()
        }
    }

    /// Components installed before Backyards itself, in order.
    pub fn subcomponents(&self) -> Vec<Component> {
        let all = self.install_everything;
        let mut out = Vec::new();
        if self.install_istio || all { out.push(Component::Mesh); }
        if !self.disable_cert_manager && (self.install_cert_manager || all) { out.push(Component::CertManager); }
        if self.install_canary || all { out.push(Component::Canary); }
        if self.install_demoapp || all { out.push(Component::DemoApp); }
        out
    }

    pub fn runs_demo(&self) -> bool { self.run_demo && (self.install_everything || self.install_demoapp) }
}

pub async fn run_install(config: &Config, args: &InstallArgs) -> Result<()> {
    let cluster = config.cluster().await?;
    let installer = cluster.installer(config);
    let opts = args.options(config);

    for component in args.subcomponents() {
        install_component(&installer, component, &opts, args.dump_resources)
            .await
            .with_context(|| format!("error during {} install", component))?;
    }
    install_component(&installer, Component::Backyards, &opts, args.dump_resources).await?;

    if args.runs_demo() && !args.dump_resources {
        info!("starting demo");
        let _load = load::spawn_load(config, &cluster, load::LoadArgs::default())
            .await
            .context("error during sending load to demo application")?;
        let query = format!("?namespaces={}", opts.demo_namespace);
        dashboard::open(config, &cluster, 0, &query).await.context("error during opening dashboard")?;
    }
    Ok(())
}

#[derive(Args, Debug, Clone)]
pub struct UninstallArgs {
    /// Name of the release
    #[arg(long, default_value = DEFAULT_RELEASE_NAME)]
    pub release_name: String,
    /// Namespace of Istio sidecar injector
    #[arg(long, default_value = ISTIO_NAMESPACE)]
    pub istio_namespace: String,
    /// Dump resources to stdout instead of deleting them
    #[arg(short = 'd', long)]
    pub dump_resources: bool,
}

pub async fn run_uninstall(config: &Config, args: &UninstallArgs) -> Result<()> {
    let cluster = config.cluster().await?;
    let opts = InstallOptions {
        release_name: args.release_name.clone(),
        istio_namespace: args.istio_namespace.clone(),
        ..config.install_options()
    };
    uninstall_component(&cluster.installer(config), Component::Backyards, &opts, args.dump_resources)
        .await
        .context("could not delete k8s resources")
}
