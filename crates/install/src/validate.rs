use std::collections::BTreeMap;

use tracing::debug;
use yard_core::{GroupVersionKind, ResourceObject, StoreError};
use yard_kubehub::{pod_gvk, pod_phase, ObjectStore};

use crate::{InstallError, InstallOptions, CERT_MANAGER_CRD, CERT_MANAGER_NAMESPACE, MANAGED_BY_LABEL, MANAGED_BY_VALUE};

/// Whether any matching pod exists, and whether one of them is Running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PodHealth {
    pub exists: bool,
    pub healthy: bool,
}

pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

pub fn sidecar_injector_labels() -> BTreeMap<String, String> { labels(&[("app", "istio-sidecar-injector")]) }

pub fn cert_manager_labels() -> BTreeMap<String, String> { labels(&[("app", "cert-manager")]) }

pub fn crd_gvk() -> GroupVersionKind { GroupVersionKind::gvk("apiextensions.k8s.io", "v1", "CustomResourceDefinition") }

pub fn namespace_gvk() -> GroupVersionKind { GroupVersionKind::gvk("", "v1", "Namespace") }

pub async fn pods_status(store: &dyn ObjectStore, namespace: &str, labels: &BTreeMap<String, String>) -> Result<PodHealth, StoreError> {
    let pods = store.list(&pod_gvk(), Some(namespace), labels).await?;
    let health = PodHealth { exists: !pods.is_empty(), healthy: pods.iter().any(|p| pod_phase(p) == Some("Running")) };
    debug!(namespace, pods = pods.len(), healthy = health.healthy, "pod status");
    Ok(health)
}

/// True only when every named CRD is present.
pub async fn crds_exist(store: &dyn ObjectStore, names: &[&str]) -> Result<bool, StoreError> {
    for name in names {
        match store.get(&ResourceObject::stub(&crd_gvk(), None, name)).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

/// Canary and the demo app need a running sidecar injector.
pub async fn require_sidecar_injector(store: &dyn ObjectStore, istio_namespace: &str) -> Result<(), InstallError> {
    let health = pods_status(store, istio_namespace, &sidecar_injector_labels()).await?;
    match health {
        PodHealth { healthy: true, .. } => Ok(()),
        PodHealth { exists: true, .. } => Err(InstallError::Istio(format!("Istio sidecar injector not healthy yet in '{}'", istio_namespace))),
        _ => Err(InstallError::Istio(format!("could not find Istio sidecar injector in '{}'", istio_namespace))),
    }
}

/// Collects every unmet requirement of the main install instead of stopping
/// at the first one.
pub async fn validate_backyards(store: &dyn ObjectStore, opts: &InstallOptions) -> Result<(), InstallError> {
    let mut problems = Vec::new();

    let istio = pods_status(store, &opts.istio_namespace, &sidecar_injector_labels()).await?;
    if !istio.exists {
        problems.push(format!(
            "could not find Istio sidecar injector in '{}' namespace, use the --install-istio flag",
            opts.istio_namespace
        ));
    } else if !istio.healthy {
        problems.push(format!("Istio sidecar injector not healthy yet in '{}' namespace", opts.istio_namespace));
    }

    if !opts.disable_cert_manager {
        let cm = pods_status(store, CERT_MANAGER_NAMESPACE, &cert_manager_labels()).await?;
        if !cm.exists {
            problems.push(format!(
                "could not find cert-manager controller in '{}' namespace, use the --install-cert-manager flag or disable it using --disable-cert-manager which disables dependent services as well",
                CERT_MANAGER_NAMESPACE
            ));
        } else if !cm.healthy {
            problems.push(format!("cert-manager controller not healthy yet in '{}' namespace", CERT_MANAGER_NAMESPACE));
        }
    }

    if opts.disable_cert_manager && !opts.disable_audit_sink {
        problems.push("the HTTP AuditSink feature cannot work without cert-manager".to_string());
    }

    if problems.is_empty() { Ok(()) } else { Err(InstallError::Requirements(problems)) }
}

/// Refuses to touch a cert-manager that someone else installed.
pub async fn check_cert_manager_managed(store: &dyn ObjectStore) -> Result<(), InstallError> {
    if !crds_exist(store, &[CERT_MANAGER_CRD]).await? { return Ok(()); }
    let ns = match store.get(&ResourceObject::stub(&namespace_gvk(), None, CERT_MANAGER_NAMESPACE)).await {
        Ok(ns) => ns,
        Err(e) if e.is_not_found() => {
            return Err(InstallError::CertManager(
                "cert-manager already installed and not managed by us, please remove previous cert-manager to continue".into(),
            ))
        }
        Err(e) => return Err(e.into()),
    };
    match ns.labels().get(MANAGED_BY_LABEL) {
        Some(owner) if owner == MANAGED_BY_VALUE => Ok(()),
        Some(owner) => Err(InstallError::CertManager(format!(
            "cert-manager already installed but the owner is unknown: {}; please remove previous cert-manager to continue",
            owner
        ))),
        None => Err(InstallError::CertManager(
            "cert-manager already installed but the owner is unknown; please remove previous cert-manager to continue".into(),
        )),
    }
}
