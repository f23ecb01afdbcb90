use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

mod commands;
mod config;

use commands::components::{CanaryCommand, CertManagerCommand, DemoAppCommand, IstioCommand};
use commands::dashboard::DashboardArgs;
use commands::install::{InstallArgs, UninstallArgs};
use commands::routing::RoutingCommand;
use commands::version::VersionArgs;
use config::{parse_namespace, Config, Output};

#[derive(Parser, Debug)]
#[command(name = "yardctl", version, about = "Install and manage Backyards, the Istio service mesh platform")]
struct Cli {
    /// Namespace in which Backyards is installed
    #[arg(short = 'n', long, global = true, env = "YARD_NAMESPACE", default_value = yard_install::DEFAULT_NAMESPACE, value_parser = parse_namespace)]
    namespace: String,

    /// Path to the kubeconfig file to use for CLI requests
    #[arg(short = 'c', long, global = true)]
    kubeconfig: Option<PathBuf>,

    /// Name of the kubeconfig context to use
    #[arg(long, global = true)]
    context: Option<String>,

    /// Turn on debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Output format
    #[arg(short = 'o', long, global = true, value_enum, default_value_t = Output::Table)]
    output: Output,

    /// Directory holding the component charts
    #[arg(long, global = true, env = "YARD_CHARTS_DIR", default_value = "charts")]
    charts_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install Backyards
    Install(InstallArgs),
    /// Output or delete Kubernetes resources to uninstall Backyards
    Uninstall(UninstallArgs),
    /// Install and manage Istio
    #[command(subcommand)]
    Istio(IstioCommand),
    /// Install and manage the Canary feature
    #[command(subcommand)]
    Canary(CanaryCommand),
    /// Install and manage cert-manager
    #[command(subcommand)]
    CertManager(CertManagerCommand),
    /// Install and manage the demo application
    #[command(subcommand)]
    Demoapp(DemoAppCommand),
    /// Open the Backyards dashboard
    Dashboard(DashboardArgs),
    /// Print the client and api version information
    Version(VersionArgs),
    /// Manage service routing configurations
    #[command(subcommand)]
    Routing(RoutingCommand),
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            namespace: self.namespace.clone(),
            kubeconfig: self.kubeconfig.clone(),
            context: self.context.clone(),
            output: self.output,
            charts_dir: self.charts_dir.clone(),
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let env = std::env::var("YARD_LOG").unwrap_or_else(|_| default.to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(verbose).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("YARD_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid YARD_METRICS_ADDR; expected host:port");
        }
    }
}

async fn dispatch(config: &Config, command: &Commands) -> Result<()> {
    match command {
        Commands::Install(args) => commands::install::run_install(config, args).await,
        Commands::Uninstall(args) => commands::install::run_uninstall(config, args).await,
        Commands::Istio(cmd) => commands::components::run_istio(config, cmd).await,
        Commands::Canary(cmd) => commands::components::run_canary(config, cmd).await,
        Commands::CertManager(cmd) => commands::components::run_cert_manager(config, cmd).await,
        Commands::Demoapp(cmd) => commands::components::run_demoapp(config, cmd).await,
        Commands::Dashboard(args) => commands::dashboard::run(config, args).await,
        Commands::Version(args) => commands::version::run(config, args).await,
        Commands::Routing(cmd) => commands::routing::run(config, cmd).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    init_metrics();
    let config = cli.config();

    if let Err(e) = dispatch(&config, &cli.command).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Result<Cli, clap::Error> { Cli::try_parse_from(std::iter::once("yardctl").chain(argv.iter().copied())) }

    #[test]
    fn global_flags_reach_the_config() {
        let cli = parse(&["version", "-n", "mesh-ui", "-o", "json", "--context", "kind-yard", "-v"]).unwrap();
        let config = cli.config();
        assert_eq!(config.namespace, "mesh-ui");
        assert_eq!(config.output, Output::Json);
        assert_eq!(config.context.as_deref(), Some("kind-yard"));
        assert!(cli.verbose);
    }

    #[test]
    fn invalid_namespace_is_rejected_by_the_parser() {
        assert!(parse(&["dashboard", "-n", "not_valid"]).is_err());
    }

    #[test]
    fn component_subcommands_parse() {
        let cli = parse(&["cert-manager", "install", "-d"]).unwrap();
        assert!(matches!(cli.command, Commands::CertManager(CertManagerCommand::Install(ref d)) if d.dump_resources));

        let cli = parse(&["demoapp", "load", "--rps", "20"]).unwrap();
        assert!(matches!(cli.command, Commands::Demoapp(DemoAppCommand::Load(ref l)) if l.frequency == 20 && l.duration == 30));

        let cli = parse(&["dashboard"]).unwrap();
        assert!(matches!(cli.command, Commands::Dashboard(ref d) if d.port == 50500));

        let cli = parse(&["routing", "cb", "delete", "ns/svc"]).unwrap();
        assert!(matches!(cli.command, Commands::Routing(RoutingCommand::CircuitBreaker(_))));
    }
}
