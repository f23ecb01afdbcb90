use anyhow::Result;
use clap::{Args, Subcommand};
use yard_install::{Component, InstallOptions, CANARY_NAMESPACE, DEMO_NAMESPACE, ISTIO_NAMESPACE, MESH_RELEASE_NAME, PROMETHEUS_URL};

use super::load::{self, LoadArgs};
use super::{install_component, uninstall_component};
use crate::config::Config;

#[derive(Args, Debug, Clone)]
pub struct DumpFlag {
    /// Dump resources to stdout instead of applying them
    #[arg(short = 'd', long)]
    pub dump_resources: bool,
}

#[derive(Args, Debug, Clone)]
pub struct IstioArgs {
    /// Name of the release
    #[arg(long, default_value = MESH_RELEASE_NAME)]
    pub release_name: String,
    #[command(flatten)]
    pub dump: DumpFlag,
}

#[derive(Subcommand, Debug, Clone)]
pub enum IstioCommand {
    /// Install Istio mesh
    Install(IstioArgs),
    /// Output or delete Kubernetes resources to uninstall Istio
    Uninstall(IstioArgs),
}

#[derive(Subcommand, Debug, Clone)]
pub enum CertManagerCommand {
    /// Install cert-manager
    Install(DumpFlag),
    /// Output or delete Kubernetes resources to uninstall cert-manager
    Uninstall(DumpFlag),
}

#[derive(Args, Debug, Clone)]
pub struct CanaryArgs {
    /// Namespace of Istio sidecar injector
    #[arg(long, default_value = ISTIO_NAMESPACE)]
    pub istio_namespace: String,
    /// Namespace for the canary operator
    #[arg(long, default_value = CANARY_NAMESPACE)]
    pub canary_namespace: String,
    /// Prometheus URL for metrics
    #[arg(long, default_value = PROMETHEUS_URL)]
    pub prometheus_url: String,
    #[command(flatten)]
    pub dump: DumpFlag,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CanaryCommand {
    /// Install Canary feature
    Install(CanaryArgs),
    /// Output or delete Kubernetes resources to uninstall Canary feature
    Uninstall(CanaryArgs),
}

#[derive(Args, Debug, Clone)]
pub struct DemoAppArgs {
    /// Namespace for demo application
    #[arg(long, default_value = DEMO_NAMESPACE)]
    pub demo_namespace: String,
    /// Namespace of Istio sidecar injector
    #[arg(long, default_value = ISTIO_NAMESPACE)]
    pub istio_namespace: String,
    #[command(flatten)]
    pub dump: DumpFlag,
}

#[derive(Subcommand, Debug, Clone)]
pub enum DemoAppCommand {
    /// Install demo application
    Install(DemoAppArgs),
    /// Output or delete Kubernetes resources to uninstall demo application
    Uninstall(DemoAppArgs),
    /// Send load to demo application
    Load(LoadArgs),
}

impl IstioArgs {
    fn options(&self, config: &Config) -> InstallOptions {
        InstallOptions { mesh_release_name: self.release_name.clone(), ..config.install_options() }
    }
}

impl CanaryArgs {
    fn options(&self, config: &Config) -> InstallOptions {
        InstallOptions {
            istio_namespace: self.istio_namespace.clone(),
            canary_namespace: self.canary_namespace.clone(),
            prometheus_url: self.prometheus_url.clone(),
            ..config.install_options()
        }
    }
}

impl DemoAppArgs {
    fn options(&self, config: &Config) -> InstallOptions {
        InstallOptions {
            demo_namespace: self.demo_namespace.clone(),
            istio_namespace: self.istio_namespace.clone(),
            ..config.install_options()
        }
    }
}

pub async fn run_istio(config: &Config, cmd: &IstioCommand) -> Result<()> {
    let installer = config.cluster().await?.installer(config);
    match cmd {
        IstioCommand::Install(a) => install_component(&installer, Component::Mesh, &a.options(config), a.dump.dump_resources).await,
        IstioCommand::Uninstall(a) => uninstall_component(&installer, Component::Mesh, &a.options(config), a.dump.dump_resources).await,
    }
}

pub async fn run_cert_manager(config: &Config, cmd: &CertManagerCommand) -> Result<()> {
    let installer = config.cluster().await?.installer(config);
    let opts = config.install_options();
    match cmd {
        CertManagerCommand::Install(d) => install_component(&installer, Component::CertManager, &opts, d.dump_resources).await,
        CertManagerCommand::Uninstall(d) => uninstall_component(&installer, Component::CertManager, &opts, d.dump_resources).await,
    }
}

pub async fn run_canary(config: &Config, cmd: &CanaryCommand) -> Result<()> {
    let installer = config.cluster().await?.installer(config);
    match cmd {
        CanaryCommand::Install(a) => install_component(&installer, Component::Canary, &a.options(config), a.dump.dump_resources).await,
        CanaryCommand::Uninstall(a) => uninstall_component(&installer, Component::Canary, &a.options(config), a.dump.dump_resources).await,
    }
}

pub async fn run_demoapp(config: &Config, cmd: &DemoAppCommand) -> Result<()> {
    let cluster = config.cluster().await?;
    let installer = cluster.installer(config);
    match cmd {
        DemoAppCommand::Install(a) => install_component(&installer, Component::DemoApp, &a.options(config), a.dump.dump_resources).await,
        DemoAppCommand::Uninstall(a) => uninstall_component(&installer, Component::DemoApp, &a.options(config), a.dump.dump_resources).await,
        DemoAppCommand::Load(args) => load::run(config, &cluster, args.clone()).await,
    }
}
