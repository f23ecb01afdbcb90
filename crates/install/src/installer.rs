use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use yard_apply::{ApplyReport, DeleteReport, KindOrder, PostApplyHook, PostDeleteHook, Reconciler, WaitForConditions, WaitForCrd};
use yard_kubehub::ObjectStore;
use yard_wait::{default_crd, default_readiness, does_not_exist, exists, replicas_ready, wait_for_resources, BackoffPolicy};

use crate::components::{render_component, ComponentObjects};
use crate::render::{ChartRenderer, Renderer};
use crate::validate::{check_cert_manager_managed, crds_exist, require_sidecar_injector, validate_backyards};
use crate::{Component, InstallError, InstallOptions, ISTIO_CRDS, ISTIO_CR_KIND};

// the Istio CR is deleted before the operator that has to clean it up
fn kind_order() -> KindOrder { KindOrder::install_default().with(ISTIO_CR_KIND, 1000) }

/// What a dump run prints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dump {
    Manifest(String),
    /// Only the CRDs; the same command has to run again once they are installed.
    CrdsOnly(String),
}

/// Installs and removes components. Every step goes through the reconciler
/// so repeated runs converge instead of failing on existing objects.
pub struct Installer {
    store: Arc<dyn ObjectStore>,
    reconciler: Reconciler,
    charts_dir: PathBuf,
    renderer: Arc<dyn Renderer>,
    readiness: BackoffPolicy,
    crd_wait: BackoffPolicy,
}

impl Installer {
    pub fn new(store: Arc<dyn ObjectStore>, charts_dir: impl Into<PathBuf>) -> Self {
        Self {
            reconciler: Reconciler::new(store.clone()).with_order(kind_order()),
            store,
            charts_dir: charts_dir.into(),
            renderer: Arc::new(ChartRenderer::new()),
            readiness: default_readiness(),
            crd_wait: default_crd(),
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self { self.renderer = renderer; self }

    pub fn with_policies(mut self, readiness: BackoffPolicy, crd_wait: BackoffPolicy) -> Self {
        self.readiness = readiness;
        self.crd_wait = crd_wait;
        self
    }

    pub fn charts_dir(&self) -> &Path { &self.charts_dir }

    pub fn objects(&self, component: Component, opts: &InstallOptions) -> Result<ComponentObjects, InstallError> {
        render_component(&*self.renderer, &self.charts_dir, component, opts)
    }

    /// Cluster prerequisites of a component.
    pub async fn preflight(&self, component: Component, opts: &InstallOptions) -> Result<(), InstallError> {
        match component {
            Component::Backyards => validate_backyards(&*self.store, opts).await,
            Component::CertManager => check_cert_manager_managed(&*self.store).await,
            Component::Canary | Component::DemoApp => require_sidecar_injector(&*self.store, &opts.istio_namespace).await,
            Component::Mesh => Ok(()),
        }
    }

    /// Checks prerequisites, applies CRDs and waits for them, applies the
    /// rest, then waits for readiness where the component asks for it.
    pub async fn install(&self, component: Component, opts: &InstallOptions) -> Result<ApplyReport> {
        self.preflight(component, opts).await?;
        let ComponentObjects { crds, objects } = self.objects(component, opts)?;
        info!(component = %component, crds = crds.len(), objects = objects.len(), "installing");

        let mut waited = crds.clone();
        waited.extend(objects.clone());

        let mut report = ApplyReport::default();
        if !crds.is_empty() {
            let hooks: Vec<Arc<dyn PostApplyHook>> = vec![Arc::new(WaitForCrd::new(self.crd_wait.clone()))];
            report.merge(self.reconciler.apply(crds, &hooks).await.context("could not apply k8s resources")?);
            self.store.refresh().await.context("could not refresh API discovery")?;
        }
        report.merge(self.reconciler.apply(objects, &[]).await.context("could not apply k8s resources")?);

        if component.waits_for_readiness() {
            wait_for_resources(&*self.store, waited.iter(), &self.readiness, &[exists(), replicas_ready()])
                .await
                .with_context(|| format!("{} did not become ready", component))?;
        }
        info!(component = %component, "installed");
        Ok(report)
    }

    /// Deletes every object of the component, waiting for each to be gone.
    pub async fn uninstall(&self, component: Component, opts: &InstallOptions) -> Result<DeleteReport> {
        let batch = self.objects(component, opts)?.all();
        info!(component = %component, objects = batch.len(), "uninstalling");
        let hooks: Vec<Arc<dyn PostDeleteHook>> =
            vec![Arc::new(WaitForConditions::new(self.readiness.clone(), vec![does_not_exist()]))];
        let report = self.reconciler.delete(batch, &hooks).await;
        info!(component = %component, hook_errors = report.hook_errors, "uninstalled");
        Ok(report)
    }

    /// Manifest for a dump run. The mesh is two-phase: until its CRDs exist
    /// only they are emitted.
    pub async fn dump(&self, component: Component, opts: &InstallOptions) -> Result<Dump> {
        let mut objects = self.objects(component, opts)?;
        kind_order().sort_for_apply(&mut objects.objects);
        if component == Component::Mesh {
            let present = crds_exist(&*self.store, ISTIO_CRDS).await.context("could not check whether CRD exists or not")?;
            return Ok(if present {
                Dump::Manifest(objects.objects.to_yaml_manifest().context("could not render YAML manifest")?)
            } else {
                Dump::CrdsOnly(objects.crds.to_yaml_manifest().context("could not render YAML manifest")?)
            });
        }
        Ok(Dump::Manifest(objects.all().to_yaml_manifest().context("could not render YAML manifest")?))
    }

    /// Manifest for an uninstall dump, in delete order.
    pub fn dump_removal(&self, component: Component, opts: &InstallOptions) -> Result<String> {
        let mut batch = self.objects(component, opts)?.all();
        kind_order().sort_for_delete(&mut batch);
        batch.to_yaml_manifest().context("could not render YAML manifest")
    }
}
