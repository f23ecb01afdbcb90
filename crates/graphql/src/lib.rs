//! Yard graphql: a small client for the traffic-policy mutations exposed by
//! the dashboard's GraphQL endpoint, plus the argument parsers and rule
//! readers the routing commands share.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

mod client;
mod parse;
mod rules;
mod types;

pub use client::GraphqlClient;
pub use parse::{parse_service_id, parse_subsets, ParseError, ParsedSubsets, ServiceId};
pub use rules::{circuit_breaker_of, traffic_shifting_of};
pub use types::*;

#[derive(Debug, thiserror::Error)]
pub enum GraphqlError {
    #[error("graphql request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("graphql endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("graphql: {0}")]
    Remote(String),
    #[error("graphql response has no data for {0}")]
    MissingData(&'static str),
    #[error("could not decode graphql response: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GraphqlError>;

/// Traffic-policy operations the routing and demo commands rely on.
#[async_trait::async_trait]
pub trait TrafficPolicyClient: Send + Sync {
    async fn apply_http_route(&self, req: &ApplyHttpRouteRequest) -> Result<bool>;
    async fn disable_http_route(&self, req: &DisableHttpRouteRequest) -> Result<bool>;
    async fn apply_global_traffic_policy(&self, req: &ApplyGlobalTrafficPolicyRequest) -> Result<bool>;
    async fn disable_global_traffic_policy(&self, req: &DisableGlobalTrafficPolicyRequest) -> Result<bool>;
    async fn generate_load(&self, req: &GenerateLoadRequest) -> Result<BTreeMap<String, u64>>;
}
