use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortSelector {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Destination {
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<PortSelector>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpRouteDestination {
    pub destination: Destination,
    pub weight: u32,
}

/// Weighted routing of a service's traffic across its subsets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyHttpRouteRequest {
    pub name: String,
    pub namespace: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub route: Vec<HttpRouteDestination>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisableHttpRouteRequest {
    pub name: String,
    pub namespace: String,
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpSettings {
    pub max_connections: i32,
    pub connect_timeout: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpSettings {
    pub http1_max_pending_requests: i32,
    pub http2_max_requests: i32,
    pub max_requests_per_connection: i32,
    pub max_retries: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionPoolSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp: Option<TcpSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlierDetection {
    pub consecutive_errors: i32,
    pub interval: String,
    pub base_ejection_time: String,
    pub max_ejection_percent: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyGlobalTrafficPolicyRequest {
    pub name: String,
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_pool: Option<ConnectionPoolSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outlier_detection: Option<OutlierDetection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisableGlobalTrafficPolicyRequest {
    pub name: String,
    pub namespace: String,
    pub rules: Vec<String>,
}

/// Flat circuit-breaker knobs as the `routing cb set` command takes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerSettings {
    pub max_connections: i32,
    pub connect_timeout: String,
    pub http1_max_pending_requests: i32,
    pub http2_max_requests: i32,
    pub max_requests_per_connection: i32,
    pub max_retries: i32,
    pub consecutive_errors: i32,
    pub interval: String,
    pub base_ejection_time: String,
    pub max_ejection_percent: i32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            max_connections: 1024,
            connect_timeout: "3s".into(),
            http1_max_pending_requests: 1024,
            http2_max_requests: 1024,
            max_requests_per_connection: 1,
            max_retries: 1024,
            consecutive_errors: 5,
            interval: "10s".into(),
            base_ejection_time: "30s".into(),
            max_ejection_percent: 100,
        }
    }
}

impl CircuitBreakerSettings {
    pub fn to_request(&self, name: &str, namespace: &str) -> ApplyGlobalTrafficPolicyRequest {
        ApplyGlobalTrafficPolicyRequest {
            name: name.to_string(),
            namespace: namespace.to_string(),
            connection_pool: Some(ConnectionPoolSettings {
                tcp: Some(TcpSettings { max_connections: self.max_connections, connect_timeout: self.connect_timeout.clone() }),
                http: Some(HttpSettings {
                    http1_max_pending_requests: self.http1_max_pending_requests,
                    http2_max_requests: self.http2_max_requests,
                    max_requests_per_connection: self.max_requests_per_connection,
                    max_retries: self.max_retries,
                }),
            }),
            outlier_detection: Some(OutlierDetection {
                consecutive_errors: self.consecutive_errors,
                interval: self.interval.clone(),
                base_ejection_time: self.base_ejection_time.clone(),
                max_ejection_percent: self.max_ejection_percent,
            }),
        }
    }
}

/// Synthetic traffic against a service, driven from inside the mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateLoadRequest {
    pub namespace: String,
    pub service: String,
    pub port: u16,
    pub endpoint: String,
    pub method: String,
    pub body: Option<String>,
    pub headers: BTreeMap<String, String>,
    /// Requests per second.
    pub frequency: u32,
    /// Seconds.
    pub duration: u32,
}
