use std::path::Path;

use serde_json::{json, Value};
use yard_core::{ResourceBatch, ResourceObject};

use crate::render::{ReleaseOptions, Renderer};
use crate::{
    Component, InstallError, InstallOptions, CERT_MANAGER_NAMESPACE, DEFAULT_RELEASE_NAME, ISTIO_CR_NAME, MANAGED_BY_LABEL, MANAGED_BY_VALUE,
};

const BACKYARDS_CHART: &str = "backyards";
const ISTIO_OPERATOR_CHART: &str = "istio-operator";
const CANARY_OPERATOR_CHART: &str = "canary-operator";
const MESHDEMO_CHART: &str = "meshdemo";
const CERT_MANAGER_CHART: &str = "cert-manager";
const CERT_MANAGER_CAINJECTOR_CHART: &str = "cert-manager-cainjector";
const CERT_MANAGER_CRDS_CHART: &str = "cert-manager-crds";

const PILOT_IMAGE: &str = "banzaicloud/istio-pilot:1.2.2-bzc";
const MIXER_IMAGE: &str = "banzaicloud/istio-mixer:1.2.2-bzc";

/// A component's objects split in two phases: CRDs, which must be
/// established before anything using them is applied, and the rest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentObjects {
    pub crds: ResourceBatch,
    pub objects: ResourceBatch,
}

impl ComponentObjects {
    fn split(batch: ResourceBatch) -> Self {
        let (crds, objects) = batch.partition_kind("CustomResourceDefinition");
        Self { crds, objects }
    }

    pub fn all(&self) -> ResourceBatch {
        let mut all = self.crds.clone();
        all.extend(self.objects.clone());
        all
    }
}

/// The control plane custom resource the istio operator reconciles.
pub fn istio_cr(namespace: &str) -> Result<ResourceObject, InstallError> {
    Ok(ResourceObject::from_value(json!({
        "apiVersion": "istio.banzaicloud.io/v1beta1",
        "kind": "Istio",
        "metadata": {"name": ISTIO_CR_NAME, "namespace": namespace},
        "spec": {
            "version": "1.2",
            "mtls": true,
            "controlPlaneSecurityEnabled": true,
            "imagePullPolicy": "Always",
            "sidecarInjector": {"rewriteAppHTTPProbe": true},
            "gateways": {
                "ingress": {"maxReplicas": 1},
                "egress": {"maxReplicas": 1},
            },
            "pilot": {"image": PILOT_IMAGE, "maxReplicas": 1},
            "mixer": {"image": MIXER_IMAGE, "maxReplicas": 1},
        },
    }))?)
}

fn cert_manager_namespace() -> Result<ResourceObject, InstallError> {
    Ok(ResourceObject::from_value(json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": CERT_MANAGER_NAMESPACE,
            "labels": {
                "certmanager.k8s.io/disable-validation": "true",
                "app": "cert-manager",
                "app.kubernetes.io/name": "cert-manager",
                (MANAGED_BY_LABEL): MANAGED_BY_VALUE,
                "app.kubernetes.io/instance": "cert-manager",
                "app.kubernetes.io/part-of": "backyards",
            },
        },
    }))?)
}

fn backyards_values(opts: &InstallOptions) -> Value {
    json!({
        "nameOverride": opts.release_name,
        "useNamespaceResource": true,
        "istio": {"namespace": opts.istio_namespace},
        "certmanager": {"enabled": !opts.disable_cert_manager},
        "auditsink": {"enabled": !opts.disable_audit_sink},
    })
}

/// Renders every object a component consists of.
pub fn render_component(
    renderer: &dyn Renderer,
    charts_dir: &Path,
    component: Component,
    opts: &InstallOptions,
) -> Result<ComponentObjects, InstallError> {
    let chart = |name: &str| charts_dir.join(name);
    let batch = match component {
        Component::Mesh => {
            let release = ReleaseOptions::install(&opts.mesh_release_name, &opts.istio_namespace);
            let mut batch = renderer.render(&chart(ISTIO_OPERATOR_CHART), &json!({}), &release)?;
            batch.push(istio_cr(&opts.istio_namespace)?);
            batch
        }
        Component::CertManager => {
            let release = ReleaseOptions::install("cert-manager", CERT_MANAGER_NAMESPACE);
            let mut batch = renderer.render(&chart(CERT_MANAGER_CRDS_CHART), &json!({}), &release)?;
            batch.push(cert_manager_namespace()?);
            batch.extend(renderer.render(&chart(CERT_MANAGER_CAINJECTOR_CHART), &json!({}), &release)?);
            batch.extend(renderer.render(&chart(CERT_MANAGER_CHART), &json!({}), &release)?);
            batch
        }
        Component::Canary => {
            let release = ReleaseOptions::install("canary-operator", &opts.canary_namespace);
            let values = json!({"prometheus": {"url": opts.prometheus_url}});
            renderer.render(&chart(CANARY_OPERATOR_CHART), &values, &release)?
        }
        Component::DemoApp => {
            let release = ReleaseOptions::install("meshdemo", &opts.demo_namespace);
            renderer.render(&chart(MESHDEMO_CHART), &json!({"useNamespaceResource": true}), &release)?
        }
        Component::Backyards => {
            let release = ReleaseOptions::install(DEFAULT_RELEASE_NAME, &opts.namespace);
            renderer.render(&chart(BACKYARDS_CHART), &backyards_values(opts), &release)?
        }
    };
    batch.ensure_unique()?;
    Ok(ComponentObjects::split(batch))
}
