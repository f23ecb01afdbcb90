use std::collections::BTreeMap;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::types::*;
use crate::{GraphqlError, Result, TrafficPolicyClient};

const APPLY_HTTP_ROUTE: &str = r#"
mutation applyHTTPRoute($input: ApplyHTTPRouteInput!) {
  applyHTTPRoute(input: $input)
}
"#;

const DISABLE_HTTP_ROUTE: &str = r#"
mutation disableHTTPRoute($input: DisableHTTPRouteInput!) {
  disableHTTPRoute(input: $input)
}
"#;

const APPLY_GLOBAL_TRAFFIC_POLICY: &str = r#"
mutation applyGlobalTrafficPolicy($input: ApplyGlobalTrafficPolicyInput!) {
  applyGlobalTrafficPolicy(input: $input)
}
"#;

const DISABLE_GLOBAL_TRAFFIC_POLICY: &str = r#"
mutation disableGlobalTrafficPolicy($input: DisableGlobalTrafficPolicyInput!) {
  disableGlobalTrafficPolicy(input: $input)
}
"#;

const GENERATE_LOAD: &str = r#"
mutation load($namespace: String!, $service: String!, $port: Int!, $endpoint: String!, $method: String!, $body: String, $headers: Map, $frequency: Int!, $duration: Int!) {
  generateLoad(namespace: $namespace, service: $service, port: $port, endpoint: $endpoint, method: $method, body: $body, headers: $headers, frequency: $frequency, duration: $duration)
}
"#;

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    errors: Vec<RemoteError>,
}

#[derive(Deserialize)]
struct RemoteError {
    message: String,
}

/// POSTs `{query, variables}` documents to one GraphQL endpoint.
#[derive(Debug, Clone)]
pub struct GraphqlClient {
    url: String,
    http: reqwest::Client,
    jwt_token: Option<String>,
}

impl GraphqlClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let timeout = std::env::var("YARD_GRAPHQL_TIMEOUT_SECS").ok().and_then(|s| s.parse::<u64>().ok()).unwrap_or(30);
        Self::with_timeout(url, Duration::from_secs(timeout))
    }

    /// For operations that block server side, like load generation.
    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { url: url.into(), http, jwt_token: None })
    }

    pub fn set_jwt_token(&mut self, token: impl Into<String>) { self.jwt_token = Some(token.into()); }

    pub fn url(&self) -> &str { &self.url }

    /// Runs one operation and decodes the `data` member named `field`.
    async fn run<T: DeserializeOwned>(&self, query: &str, variables: Value, field: &'static str) -> Result<T> {
        let mut request = self
            .http
            .post(&self.url)
            .header("Cache-Control", "no-cache")
            .json(&json!({ "query": query, "variables": variables }));
        if let Some(token) = &self.jwt_token { request = request.header("Authorization", format!("Bearer {}", token)); }

        debug!(url = %self.url, operation = field, "graphql request");
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        // GraphQL servers report query errors with 4xx and an errors array; prefer that message
        let envelope: Option<Envelope> = serde_json::from_str(&body).ok();
        if let Some(first) = envelope.as_ref().and_then(|e| e.errors.first()) {
            return Err(GraphqlError::Remote(first.message.clone()));
        }
        if !status.is_success() { return Err(GraphqlError::Status { status: status.as_u16(), body }); }

        let envelope = match envelope {
            Some(e) => e,
            None => serde_json::from_str::<Envelope>(&body)?,
        };
        let value = envelope.data.and_then(|mut d| d.remove(field)).filter(|v| !v.is_null());
        let value = value.ok_or(GraphqlError::MissingData(field))?;
        Ok(serde_json::from_value(value)?)
    }
}

#[async_trait::async_trait]
impl TrafficPolicyClient for GraphqlClient {
    async fn apply_http_route(&self, req: &ApplyHttpRouteRequest) -> Result<bool> {
        self.run(APPLY_HTTP_ROUTE, json!({ "input": req }), "applyHTTPRoute").await
    }

    async fn disable_http_route(&self, req: &DisableHttpRouteRequest) -> Result<bool> {
        self.run(DISABLE_HTTP_ROUTE, json!({ "input": req }), "disableHTTPRoute").await
    }

    async fn apply_global_traffic_policy(&self, req: &ApplyGlobalTrafficPolicyRequest) -> Result<bool> {
        self.run(APPLY_GLOBAL_TRAFFIC_POLICY, json!({ "input": req }), "applyGlobalTrafficPolicy").await
    }

    async fn disable_global_traffic_policy(&self, req: &DisableGlobalTrafficPolicyRequest) -> Result<bool> {
        self.run(DISABLE_GLOBAL_TRAFFIC_POLICY, json!({ "input": req }), "disableGlobalTrafficPolicy").await
    }

    async fn generate_load(&self, req: &GenerateLoadRequest) -> Result<BTreeMap<String, u64>> {
        let variables = json!({
            "namespace": req.namespace,
            "service": req.service,
            "port": req.port,
            "endpoint": req.endpoint,
            "method": req.method,
            "body": req.body,
            "headers": req.headers,
            "frequency": req.frequency,
            "duration": req.duration,
        });
        self.run(GENERATE_LOAD, variables, "generateLoad").await
    }
}
