//! Yard install: renders the mesh components from their charts and installs
//! or removes them through the reconciler, gating each step on cluster state.

#![forbid(unsafe_code)]

use std::fmt;

use yard_core::{ObjectError, StoreError};

mod components;
mod installer;
mod render;
mod validate;

pub use components::{istio_cr, render_component, ComponentObjects};
pub use installer::{Dump, Installer};
pub use render::{merge_values, ChartRenderer, ReleaseOptions, RenderError, Renderer};
pub use validate::{
    cert_manager_labels, check_cert_manager_managed, crds_exist, pods_status, require_sidecar_injector,
    sidecar_injector_labels, validate_backyards, PodHealth,
};

pub const DEFAULT_NAMESPACE: &str = "backyards-system";
pub const DEFAULT_RELEASE_NAME: &str = "backyards";
pub const ISTIO_NAMESPACE: &str = "istio-system";
pub const MESH_RELEASE_NAME: &str = "istio-operator";
pub const ISTIO_CR_NAME: &str = "mesh";
pub const ISTIO_CR_KIND: &str = "Istio";
pub const ISTIO_CRDS: &[&str] = &["istios.istio.banzaicloud.io", "remoteistios.istio.banzaicloud.io"];
pub const CANARY_NAMESPACE: &str = "backyards-canary";
pub const DEMO_NAMESPACE: &str = "backyards-demo";
pub const PROMETHEUS_URL: &str = "http://backyards-prometheus.backyards-system";
pub const CERT_MANAGER_NAMESPACE: &str = "cert-manager";
pub const CERT_MANAGER_CRD: &str = "certificates.certmanager.k8s.io";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "yardctl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Mesh,
    CertManager,
    Canary,
    DemoApp,
    Backyards,
}

impl Component {
    /// Whether install blocks until every object exists and its replicas are ready.
    pub fn waits_for_readiness(self) -> bool { matches!(self, Component::Backyards | Component::CertManager | Component::Canary) }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Component::Mesh => "Istio mesh",
            Component::CertManager => "cert-manager",
            Component::Canary => "Canary feature",
            Component::DemoApp => "demo application",
            Component::Backyards => "Backyards",
        })
    }
}

/// Knobs shared by all components; each reads the fields it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOptions {
    pub release_name: String,
    /// Release of the Istio operator chart.
    pub mesh_release_name: String,
    pub namespace: String,
    pub istio_namespace: String,
    pub canary_namespace: String,
    pub demo_namespace: String,
    pub prometheus_url: String,
    pub disable_cert_manager: bool,
    pub disable_audit_sink: bool,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            release_name: DEFAULT_RELEASE_NAME.into(),
            mesh_release_name: MESH_RELEASE_NAME.into(),
            namespace: DEFAULT_NAMESPACE.into(),
            istio_namespace: ISTIO_NAMESPACE.into(),
            canary_namespace: CANARY_NAMESPACE.into(),
            demo_namespace: DEMO_NAMESPACE.into(),
            prometheus_url: PROMETHEUS_URL.into(),
            disable_cert_manager: false,
            disable_audit_sink: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Object(#[from] ObjectError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("unable to install Backyards:{}", bullets(.0))]
    Requirements(Vec<String>),
    #[error("{0}")]
    Istio(String),
    #[error("{0}")]
    CertManager(String),
}

fn bullets(items: &[String]) -> String {
    items.iter().map(|i| format!("\n - {}", i)).collect()
}
