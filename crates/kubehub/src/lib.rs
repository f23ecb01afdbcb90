//! Yard kubehub: the remote object store seam and its kube-rs implementation.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use base64::Engine as _;
use yard_core::{GroupVersionKind, ResourceObject, StoreError};

mod kube_store;
#[cfg(any(test, feature = "memory"))]
pub mod memory;

pub use kube_store::{ClientConfig, KubeStore};
#[cfg(any(test, feature = "memory"))]
pub use memory::{MemoryStore, StoreOp};

/// Remote object store used by the reconciler, the poller and the tunnel.
///
/// Lookups take a target object and only read its identity (gvk, namespace,
/// name); `ResourceObject::stub` builds one when only the name is known.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, target: &ResourceObject) -> Result<ResourceObject, StoreError>;
    async fn create(&self, obj: &ResourceObject) -> Result<ResourceObject, StoreError>;
    /// Replace; `obj` must carry the stored resourceVersion.
    async fn update(&self, obj: &ResourceObject) -> Result<ResourceObject, StoreError>;
    async fn delete(&self, obj: &ResourceObject) -> Result<(), StoreError>;
    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<ResourceObject>, StoreError>;

    /// Forget cached API discovery, e.g. after new CRDs became established.
    async fn refresh(&self) -> Result<(), StoreError> { Ok(()) }
}

pub fn pod_gvk() -> GroupVersionKind { GroupVersionKind::gvk("", "v1", "Pod") }

/// Equality-based label selector, `k=v,k2=v2` in key order.
pub fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join(",")
}

pub fn matches_selector(obj: &ResourceObject, labels: &BTreeMap<String, String>) -> bool {
    let have = obj.labels();
    labels.iter().all(|(k, v)| have.get(k) == Some(v))
}

pub fn pod_phase(pod: &ResourceObject) -> Option<&str> {
    pod.status().and_then(|s| s.get("phase")).and_then(|p| p.as_str())
}

/// Reads the API token of a service account from its first referenced secret.
pub async fn service_account_token(store: &dyn ObjectStore, namespace: &str, name: &str) -> Result<String> {
    let sa_gvk = GroupVersionKind::gvk("", "v1", "ServiceAccount");
    let sa = store
        .get(&ResourceObject::stub(&sa_gvk, Some(namespace), name))
        .await
        .with_context(|| format!("could not get service account {}/{}", namespace, name))?;
    let secret_name = sa
        .raw()
        .get("secrets")
        .and_then(|s| s.as_array())
        .and_then(|a| a.first())
        .and_then(|s| s.get("name"))
        .and_then(|n| n.as_str())
        .ok_or_else(|| anyhow!("no secrets found in service account {}/{}", namespace, name))?
        .to_string();

    let secret_gvk = GroupVersionKind::gvk("", "v1", "Secret");
    let secret = store
        .get(&ResourceObject::stub(&secret_gvk, Some(namespace), &secret_name))
        .await
        .with_context(|| format!("could not get secret {}/{}", namespace, secret_name))?;
    let encoded = secret
        .raw()
        .get("data")
        .and_then(|d| d.get("token"))
        .and_then(|t| t.as_str())
        .unwrap_or_default();
    let token = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .context("decoding service account token")?;
    Ok(String::from_utf8_lossy(&token).into_owned())
}
