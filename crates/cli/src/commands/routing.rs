use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Subcommand};
use tracing::info;
use yard_core::{GroupVersionKind, ResourceObject};
use yard_graphql::{
    circuit_breaker_of, parse_service_id, parse_subsets, traffic_shifting_of, CircuitBreakerSettings, Destination, DisableGlobalTrafficPolicyRequest,
    DisableHttpRouteRequest, GraphqlClient, HttpRouteDestination, ApplyHttpRouteRequest, ParsedSubsets, ServiceId,
    TrafficPolicyClient,
};
use yard_kubehub::{service_account_token, ObjectStore};
use yard_ops::Tunnel;

use super::dashboard::igw_tunnel;
use crate::config::{Cluster, Config, Output};

const SERVICE_ACCOUNT: &str = "backyards";

#[derive(Subcommand, Debug, Clone)]
pub enum RoutingCommand {
    /// Manage traffic shifting configurations
    #[command(subcommand, name = "ts", alias = "traffic-shifting")]
    TrafficShifting(TrafficShiftingCommand),
    /// Manage circuit breaker configurations
    #[command(subcommand, name = "cb", alias = "circuit-breaker")]
    CircuitBreaker(CircuitBreakerCommand),
}

#[derive(Subcommand, Debug, Clone)]
pub enum TrafficShiftingCommand {
    /// Get traffic shifting rules for a service
    Get(ServiceArgs),
    /// Set traffic shifting rules for a service
    Set(TsSetArgs),
    /// Delete traffic shifting rules of a service
    Delete(ServiceArgs),
}

#[derive(Subcommand, Debug, Clone)]
pub enum CircuitBreakerCommand {
    /// Get circuit breaker rules for a service
    Get(ServiceArgs),
    /// Set circuit breaker rules for a service
    Set(CbSetArgs),
    /// Delete circuit breaker rules of a service
    Delete(ServiceArgs),
}

/// The target service, positionally or with `--service`.
#[derive(Args, Debug, Clone, Default)]
pub struct ServiceArgs {
    /// Service as namespace/name
    #[arg(value_name = "NAMESPACE/NAME")]
    pub service_id: Option<String>,
    /// Service as namespace/name
    #[arg(long = "service", id = "service_flag", value_name = "NAMESPACE/NAME")]
    pub service_flag: Option<String>,
}

impl ServiceArgs {
    pub fn service(&self) -> Result<ServiceId> {
        let raw = self.service_id.as_deref().or(self.service_flag.as_deref()).unwrap_or_default();
        if raw.is_empty() { bail!("service must be specified"); }
        Ok(parse_service_id(raw)?)
    }
}

#[derive(Args, Debug, Clone)]
pub struct TsSetArgs {
    #[command(flatten)]
    pub service: ServiceArgs,
    /// Subsets with weights, e.g. v1=70 v2=30
    #[arg(value_name = "SUBSET=WEIGHT")]
    pub subsets: Vec<String>,
    /// Subset with weight (repeatable; weights must add up to 100)
    #[arg(long = "subset", value_name = "SUBSET=WEIGHT")]
    pub subset_flags: Vec<String>,
}

impl TsSetArgs {
    pub fn parsed(&self) -> Result<(ServiceId, ParsedSubsets)> {
        let service = self.service.service()?;
        let raw: Vec<&String> = self.subset_flags.iter().chain(&self.subsets).collect();
        if raw.is_empty() { bail!("at least 1 subset must be specified"); }
        Ok((service, parse_subsets(&raw)?))
    }
}

#[derive(Args, Debug, Clone)]
pub struct CbSetArgs {
    #[command(flatten)]
    pub service: ServiceArgs,
    /// Maximum number of HTTP1/TCP connections to a destination host
    #[arg(long, default_value_t = 1024)]
    pub max_connections: i32,
    /// TCP connection timeout
    #[arg(long, default_value = "3s")]
    pub connect_timeout: String,
    /// Maximum number of pending HTTP requests to a destination
    #[arg(long, default_value_t = 1024)]
    pub max_pending_requests: i32,
    /// Maximum number of requests to a backend
    #[arg(long, default_value_t = 1024)]
    pub max_requests: i32,
    /// Maximum number of requests per connection to a backend; 1 disables keep alive
    #[arg(long, default_value_t = 1)]
    pub max_requests_per_connection: i32,
    /// Maximum number of retries outstanding to all hosts at a given time
    #[arg(long, default_value_t = 1024)]
    pub max_retries: i32,
    /// Number of errors before a host is ejected from the connection pool
    #[arg(long, default_value_t = 5)]
    pub consecutive_errors: i32,
    /// Time interval between ejection sweep analysis
    #[arg(long, default_value = "10s")]
    pub interval: String,
    /// Minimum ejection duration
    #[arg(long, default_value = "30s")]
    pub base_ejection_time: String,
    /// Maximum % of hosts in the load balancing pool that can be ejected
    #[arg(long, default_value_t = 100)]
    pub max_ejection_percent: i32,
}

impl CbSetArgs {
    pub fn settings(&self) -> CircuitBreakerSettings {
        CircuitBreakerSettings {
            max_connections: self.max_connections,
            connect_timeout: self.connect_timeout.clone(),
            http1_max_pending_requests: self.max_pending_requests,
            http2_max_requests: self.max_requests,
            max_requests_per_connection: self.max_requests_per_connection,
            max_retries: self.max_retries,
            consecutive_errors: self.consecutive_errors,
            interval: self.interval.clone(),
            base_ejection_time: self.base_ejection_time.clone(),
            max_ejection_percent: self.max_ejection_percent,
        }
    }
}

pub async fn set_traffic_shifting(client: &dyn TrafficPolicyClient, service: &ServiceId, subsets: &ParsedSubsets) -> Result<()> {
    let req = ApplyHttpRouteRequest {
        name: service.name.clone(),
        namespace: service.namespace.clone(),
        route: subsets
            .iter()
            .map(|(subset, weight)| HttpRouteDestination {
                destination: Destination { host: service.name.clone(), subset: Some(subset.to_string()), port: None },
                weight,
            })
            .collect(),
    };
    if !client.apply_http_route(&req).await? { return Err(anyhow!("unknown error: cannot set traffic shifting")); }
    info!("traffic shifting for {} set to {} successfully", service, subsets);
    Ok(())
}

pub async fn delete_traffic_shifting(client: &dyn TrafficPolicyClient, service: &ServiceId) -> Result<()> {
    let req = DisableHttpRouteRequest { name: service.name.clone(), namespace: service.namespace.clone(), rules: vec!["Route".into()] };
    if !client.disable_http_route(&req).await? { return Err(anyhow!("unknown error: cannot delete traffic shifting")); }
    info!("traffic shifting rules of {} successfully deleted", service);
    Ok(())
}

pub async fn set_circuit_breaker(client: &dyn TrafficPolicyClient, service: &ServiceId, settings: &CircuitBreakerSettings) -> Result<()> {
    let req = settings.to_request(&service.name, &service.namespace);
    if !client.apply_global_traffic_policy(&req).await? { return Err(anyhow!("unknown error: cannot apply circuit breaker settings")); }
    info!("circuit breaker rules successfully applied to '{}'", service);
    Ok(())
}

pub async fn delete_circuit_breaker(client: &dyn TrafficPolicyClient, service: &ServiceId) -> Result<()> {
    let req = DisableGlobalTrafficPolicyRequest {
        name: service.name.clone(),
        namespace: service.namespace.clone(),
        rules: vec!["ConnectionPool".into(), "OutlierDetection".into()],
    };
    if !client.disable_global_traffic_policy(&req).await? { return Err(anyhow!("unknown error: cannot delete circuit breaker settings")); }
    info!("circuit breaker rules of '{}' successfully deleted", service);
    Ok(())
}

fn istio_gvk(kind: &str) -> GroupVersionKind { GroupVersionKind::gvk("networking.istio.io", "v1alpha3", kind) }

/// The Istio object named after the service, or `None` when there is none.
async fn istio_rule(store: &dyn ObjectStore, kind: &str, service: &ServiceId) -> Result<Option<ResourceObject>> {
    match store.get(&ResourceObject::stub(&istio_gvk(kind), Some(&service.namespace), &service.name)).await {
        Ok(obj) => Ok(Some(obj)),
        Err(e) if e.is_not_found() || e.is_no_match() => Ok(None),
        Err(e) => Err(e).with_context(|| format!("could not get {} {}", kind, service)),
    }
}

/// Traffic shifting currently set for the service, from its `VirtualService`.
pub async fn get_traffic_shifting(store: &dyn ObjectStore, service: &ServiceId) -> Result<Option<ParsedSubsets>> {
    Ok(istio_rule(store, "VirtualService", service).await?.map(|vs| traffic_shifting_of(vs.raw())))
}

/// Circuit breaker currently set for the service, from its `DestinationRule`.
pub async fn get_circuit_breaker(store: &dyn ObjectStore, service: &ServiceId) -> Result<Option<CircuitBreakerSettings>> {
    Ok(istio_rule(store, "DestinationRule", service).await?.and_then(|dr| circuit_breaker_of(dr.raw())))
}

fn circuit_breaker_table(cb: &CircuitBreakerSettings) -> String {
    let headers = ["Connections", "Timeout", "Pending Requests", "Requests", "RPC", "Retries", "Errors", "Interval", "Ejection time", "Percentage"];
    let row = [
        cb.max_connections.to_string(),
        cb.connect_timeout.clone(),
        cb.http1_max_pending_requests.to_string(),
        cb.http2_max_requests.to_string(),
        cb.max_requests_per_connection.to_string(),
        cb.max_retries.to_string(),
        cb.consecutive_errors.to_string(),
        cb.interval.clone(),
        cb.base_ejection_time.clone(),
        cb.max_ejection_percent.to_string(),
    ];
    let widths: Vec<usize> = headers.iter().zip(&row).map(|(h, v)| h.len().max(v.len())).collect();
    let line = |cells: Vec<&str>| cells.iter().zip(&widths).map(|(c, w)| format!("{:<w$}", c, w = w)).collect::<Vec<_>>().join("  ");
    format!("{}\n{}", line(headers.to_vec()), line(row.iter().map(String::as_str).collect()))
}

async fn run_get(config: &Config, cluster: &Cluster, cmd: &RoutingCommand, service: &ServiceId) -> Result<()> {
    let store = cluster.store();
    if let RoutingCommand::CircuitBreaker(_) = cmd {
        return match get_circuit_breaker(&*store, service).await? {
            Some(cb) => config.print(&cb, circuit_breaker_table),
            None => { info!("no circuit breaker rules set for {}", service); Ok(()) }
        };
    }
    match get_traffic_shifting(&*store, service).await? {
        Some(subsets) if config.output == Output::Table => { info!("traffic shifting for {} is currently set to {}", service, subsets); Ok(()) }
        Some(subsets) => config.print(&subsets, |s| s.to_string()),
        None => { info!("no traffic shifting rules set for {}", service); Ok(()) }
    }
}

/// An authenticated client talking through a fresh gateway tunnel; the
/// tunnel must outlive the client's calls.
async fn graphql_client(config: &Config, cluster: &Cluster) -> Result<(GraphqlClient, Tunnel)> {
    let token = service_account_token(&*cluster.store(), &config.namespace, SERVICE_ACCOUNT)
        .await
        .context("could not get initialized graphql client")?;
    let tunnel = igw_tunnel(config, cluster, 0).await?;
    let mut client = GraphqlClient::new(tunnel.url("/api/graphql"))?;
    client.set_jwt_token(token);
    Ok((client, tunnel))
}

pub async fn run(config: &Config, cmd: &RoutingCommand) -> Result<()> {
    // argument errors come before any cluster access
    let service = match cmd {
        RoutingCommand::TrafficShifting(TrafficShiftingCommand::Get(a)) | RoutingCommand::CircuitBreaker(CircuitBreakerCommand::Get(a)) => a.service()?,
        RoutingCommand::TrafficShifting(TrafficShiftingCommand::Set(a)) => a.parsed()?.0,
        RoutingCommand::TrafficShifting(TrafficShiftingCommand::Delete(a)) => a.service()?,
        RoutingCommand::CircuitBreaker(CircuitBreakerCommand::Set(a)) => a.service.service()?,
        RoutingCommand::CircuitBreaker(CircuitBreakerCommand::Delete(a)) => a.service()?,
    };

    let cluster = config.cluster().await?;
    cluster.service(&service.namespace, &service.name).await?;
    if matches!(cmd, RoutingCommand::TrafficShifting(TrafficShiftingCommand::Get(_)) | RoutingCommand::CircuitBreaker(CircuitBreakerCommand::Get(_))) {
        return run_get(config, &cluster, cmd, &service).await;
    }
    let (client, tunnel) = graphql_client(config, &cluster).await?;

    let result = match cmd {
        RoutingCommand::TrafficShifting(TrafficShiftingCommand::Set(a)) => {
            let (_, subsets) = a.parsed()?;
            set_traffic_shifting(&client, &service, &subsets).await
        }
        RoutingCommand::TrafficShifting(TrafficShiftingCommand::Delete(_)) => delete_traffic_shifting(&client, &service).await,
        RoutingCommand::CircuitBreaker(CircuitBreakerCommand::Set(a)) => set_circuit_breaker(&client, &service, &a.settings()).await,
        RoutingCommand::CircuitBreaker(CircuitBreakerCommand::Delete(_)) => delete_circuit_breaker(&client, &service).await,
        RoutingCommand::TrafficShifting(TrafficShiftingCommand::Get(_)) | RoutingCommand::CircuitBreaker(CircuitBreakerCommand::Get(_)) => Ok(()),
    };
    tunnel.stop();
    result
}
