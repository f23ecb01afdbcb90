use std::collections::BTreeMap;

use serde_json::Value;

use crate::{CircuitBreakerSettings, ParsedSubsets};

fn int(v: &Value, path: &str) -> i32 { v.pointer(path).and_then(Value::as_i64).unwrap_or(0) as i32 }

fn text(v: &Value, path: &str) -> String { v.pointer(path).and_then(Value::as_str).unwrap_or_default().to_string() }

/// Weights of the catch-all HTTP routes of a `VirtualService`; routes with a
/// match block are skipped.
pub fn traffic_shifting_of(virtual_service: &Value) -> ParsedSubsets {
    let mut subsets = BTreeMap::new();
    let routes = virtual_service.pointer("/spec/http").and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();
    for route in routes {
        if route.get("match").and_then(Value::as_array).is_some_and(|m| !m.is_empty()) { continue; }
        for dest in route.get("route").and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default() {
            let weight = dest.get("weight").and_then(Value::as_u64).unwrap_or(0) as u32;
            subsets.insert(text(dest, "/destination/subset"), weight);
        }
    }
    ParsedSubsets(subsets)
}

/// Circuit breaker settings of a `DestinationRule`, or `None` when it has no
/// connection pool policy.
pub fn circuit_breaker_of(destination_rule: &Value) -> Option<CircuitBreakerSettings> {
    let tp = destination_rule.pointer("/spec/trafficPolicy")?;
    tp.get("connectionPool").filter(|p| !p.is_null())?;
    Some(CircuitBreakerSettings {
        max_connections: int(tp, "/connectionPool/tcp/maxConnections"),
        connect_timeout: text(tp, "/connectionPool/tcp/connectTimeout"),
        http1_max_pending_requests: int(tp, "/connectionPool/http/http1MaxPendingRequests"),
        http2_max_requests: int(tp, "/connectionPool/http/http2MaxRequests"),
        max_requests_per_connection: int(tp, "/connectionPool/http/maxRequestsPerConnection"),
        max_retries: int(tp, "/connectionPool/http/maxRetries"),
        consecutive_errors: int(tp, "/outlierDetection/consecutiveErrors"),
        interval: text(tp, "/outlierDetection/interval"),
        base_ejection_time: text(tp, "/outlierDetection/baseEjectionTime"),
        max_ejection_percent: int(tp, "/outlierDetection/maxEjectionPercent"),
    })
}
