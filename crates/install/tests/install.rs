use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use yard_apply::Outcome;
use yard_core::ResourceObject;
use yard_install::*;
use yard_kubehub::{MemoryStore, StoreOp};
use yard_wait::BackoffPolicy;

const CRDS: &str = r#"
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: istios.istio.banzaicloud.io
spec:
  group: istio.banzaicloud.io
  names: {kind: Istio, plural: istios}
  scope: Namespaced
  versions:
  - {name: v1beta1, served: true, storage: true}
---
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: remoteistios.istio.banzaicloud.io
spec:
  group: istio.banzaicloud.io
  names: {kind: RemoteIstio, plural: remoteistios}
  scope: Namespaced
  versions:
  - {name: v1beta1, served: true, storage: true}
"#;

fn deployment(name: &str) -> String {
    format!(
        r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: {name}
  namespace: {{{{ Release.Namespace }}}}
  labels:
    release: {{{{ Release.Name }}}}
spec:
  selector:
    matchLabels: {{app: {name}}}
  template:
    metadata:
      labels: {{app: {name}}}
    spec:
      containers:
      - name: main
        image: {{{{ Values.image | default("busybox") }}}}
"#
    )
}

fn write(chart: &Path, file: &str, text: &str) {
    let path = chart.join(file);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

fn charts() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    let op = root.join("istio-operator");
    write(&op, "values.yaml", "image: banzaicloud/istio-operator:0.2.1\n");
    write(&op, "templates/crds.yaml", CRDS);
    write(&op, "templates/deployment.yaml", &deployment("istio-operator"));
    write(&op, "templates/_notes.tpl", "not: [valid yaml\n");
    write(&op, "templates/README.md", "ignored");

    let by = root.join("backyards");
    write(&by, "values.yaml", "image: banzaicloud/backyards:0.1\nauditsink:\n  enabled: true\n  port: 443\n");
    write(&by, "templates/deployment.yaml", &deployment("backyards"));
    write(
        &by,
        "templates/auditsink.yaml",
        &format!("{{% if Values.auditsink.enabled %}}\n{}{{% endif %}}\n", deployment("backyards-auditsink")),
    );
    write(
        &by,
        "templates/service.yaml",
        "apiVersion: v1\nkind: Service\nmetadata:\n  name: {{ Values.nameOverride }}\n  namespace: {{ Release.Namespace }}\nspec:\n  ports:\n  - port: 80\n",
    );

    write(&root.join("canary-operator"), "templates/deployment.yaml", &deployment("canary-operator"));
    write(&root.join("meshdemo"), "templates/deployment.yaml", &deployment("frontpage"));
    write(&root.join("cert-manager"), "templates/deployment.yaml", &deployment("cert-manager"));
    write(&root.join("cert-manager-cainjector"), "templates/deployment.yaml", &deployment("cert-manager-cainjector"));
    write(&root.join("cert-manager-crds"), "templates/crds.yaml", &CRDS.replace("istio.banzaicloud.io", "certmanager.k8s.io"));
    dir
}

/// A store whose CRDs become Established as soon as they are created.
fn cluster() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.on_create(|obj: &mut ResourceObject| {
        if obj.kind() != "CustomResourceDefinition" { return; }
        let names = obj.raw()["spec"]["names"].clone();
        obj.raw_mut()["status"] = json!({
            "acceptedNames": names,
            "conditions": [{"type": "Established", "status": "True"}]
        });
    });
    store
}

fn pod(ns: &str, name: &str, app: &str) -> ResourceObject {
    ResourceObject::from_value(json!({
        "apiVersion": "v1", "kind": "Pod",
        "metadata": {"name": name, "namespace": ns, "labels": {"app": app}},
        "status": {"phase": "Running"}
    }))
    .unwrap()
}

fn installer(store: &Arc<MemoryStore>, charts: &TempDir) -> Installer {
    let quick = BackoffPolicy::constant(Duration::from_secs(1), 3);
    Installer::new(store.clone(), charts.path()).with_policies(quick.clone(), quick)
}

fn created_names(store: &MemoryStore) -> Vec<String> {
    store
        .writes()
        .into_iter()
        .filter_map(|op| match op { StoreOp::Create(k) => Some(k.name), _ => None })
        .collect()
}

#[test]
fn rendering_is_deterministic_and_merges_values() {
    let charts = charts();
    let renderer = ChartRenderer::new();
    let release = ReleaseOptions::install("backyards", "backyards-system");
    let chart = charts.path().join("backyards");

    let overrides = json!({"nameOverride": "yard", "auditsink": {"enabled": false}});
    let first = renderer.render(&chart, &overrides, &release).unwrap();
    let second = renderer.render(&chart, &overrides, &release).unwrap();
    assert_eq!(first, second);

    let names: Vec<&str> = first.iter().map(|o| o.name()).collect();
    assert_eq!(names, vec!["backyards", "yard"]);
    let deploy = &first.as_slice()[0];
    assert_eq!(deploy.namespace(), Some("backyards-system"));
    assert_eq!(deploy.raw()["metadata"]["labels"]["release"], "backyards");
    assert_eq!(deploy.raw()["spec"]["template"]["spec"]["containers"][0]["image"], "banzaicloud/backyards:0.1");
}

#[test]
fn render_errors_name_the_template() {
    let charts = charts();
    let chart = charts.path().join("broken");
    write(&chart, "templates/bad.yaml", "kind: {{ Values.x \n");
    let err = ChartRenderer::new().render(&chart, &json!({}), &ReleaseOptions::install("x", "y")).unwrap_err();
    assert!(matches!(err, RenderError::Template { ref name, .. } if name == "bad.yaml"), "{}", err);

    write(&chart, "templates/bad.yaml", "kind: Thing\n");
    let err = ChartRenderer::new().render(&chart, &json!({}), &ReleaseOptions::install("x", "y")).unwrap_err();
    assert!(matches!(err, RenderError::Manifest { .. }), "{}", err);
}

#[tokio::test(start_paused = true)]
async fn mesh_installs_crds_first_and_converges() {
    let charts = charts();
    let store = cluster();
    let installer = installer(&store, &charts);
    let opts = InstallOptions::default();

    let report = installer.install(Component::Mesh, &opts).await.unwrap();
    assert_eq!(report.count(Outcome::Created), 4);
    assert_eq!(report.hook_errors, 0);
    assert_eq!(
        created_names(&store),
        vec!["istios.istio.banzaicloud.io", "remoteistios.istio.banzaicloud.io", "istio-operator", "mesh"]
    );

    store.clear_ops();
    let again = installer.install(Component::Mesh, &opts).await.unwrap();
    assert_eq!(again.count(Outcome::Unchanged), 4);
    assert!(store.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn mesh_release_name_is_configurable() {
    let charts = charts();
    let store = cluster();
    let installer = installer(&store, &charts);
    let opts = InstallOptions { mesh_release_name: "mesh-operator".into(), ..Default::default() };

    installer.install(Component::Mesh, &opts).await.unwrap();
    let key = yard_core::ObjectKey {
        group: "apps".into(),
        kind: "Deployment".into(),
        namespace: Some(ISTIO_NAMESPACE.into()),
        name: "istio-operator".into(),
    };
    let deploy = store.lookup(&key).unwrap();
    assert_eq!(deploy.labels().get("release").map(String::as_str), Some("mesh-operator"));

    installer.uninstall(Component::Mesh, &opts).await.unwrap();
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn mesh_dump_is_two_phase() {
    let charts = charts();
    let store = cluster();
    let installer = installer(&store, &charts);
    let opts = InstallOptions::default();

    let Dump::CrdsOnly(crds) = installer.dump(Component::Mesh, &opts).await.unwrap() else { panic!("expected CRDs only") };
    assert!(crds.contains("istios.istio.banzaicloud.io"));
    assert!(!crds.contains("\nkind: Istio\n"));
    assert!(store.writes().is_empty());

    installer.install(Component::Mesh, &opts).await.unwrap();
    let Dump::Manifest(rest) = installer.dump(Component::Mesh, &opts).await.unwrap() else { panic!("expected full manifest") };
    assert!(rest.contains("\nkind: Istio\n"));
    assert!(!rest.contains("CustomResourceDefinition"));
}

#[tokio::test(start_paused = true)]
async fn mesh_uninstall_removes_the_cr_before_the_operator() {
    let charts = charts();
    let store = cluster();
    let installer = installer(&store, &charts);
    let opts = InstallOptions::default();
    installer.install(Component::Mesh, &opts).await.unwrap();
    store.clear_ops();

    let report = installer.uninstall(Component::Mesh, &opts).await.unwrap();
    assert_eq!(report.count(Outcome::Deleted), 4);
    assert_eq!(report.hook_errors, 0);
    let deleted: Vec<String> = store
        .writes()
        .into_iter()
        .filter_map(|op| match op { StoreOp::Delete(k) => Some(k.name), _ => None })
        .collect();
    assert_eq!(deleted.first().map(String::as_str), Some("mesh"));
    assert_eq!(deleted.get(1).map(String::as_str), Some("istio-operator"));
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn backyards_refuses_to_install_without_requirements() {
    let charts = charts();
    let store = cluster();
    let err = installer(&store, &charts).install(Component::Backyards, &InstallOptions::default()).await.unwrap_err();
    let err = err.downcast::<InstallError>().unwrap();
    assert!(matches!(err, InstallError::Requirements(ref items) if items.len() == 2), "{}", err);
    assert!(store.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn backyards_install_follows_options() {
    let charts = charts();
    let store = cluster();
    store.insert(pod("istio-system", "istio-sidecar-injector-0", "istio-sidecar-injector"));
    let opts = InstallOptions { disable_cert_manager: true, disable_audit_sink: true, ..Default::default() };

    let report = installer(&store, &charts).install(Component::Backyards, &opts).await.unwrap();
    assert_eq!(report.count(Outcome::Created), 2);
    assert_eq!(created_names(&store), vec!["backyards", "backyards"]);
}

#[tokio::test(start_paused = true)]
async fn canary_needs_the_sidecar_injector() {
    let charts = charts();
    let store = cluster();
    let installer = installer(&store, &charts);
    let err = installer.install(Component::Canary, &InstallOptions::default()).await.unwrap_err();
    assert_eq!(err.to_string(), "could not find Istio sidecar injector in 'istio-system'");

    store.insert(pod("istio-system", "istio-sidecar-injector-0", "istio-sidecar-injector"));
    installer.install(Component::Canary, &InstallOptions::default()).await.unwrap();
    assert_eq!(created_names(&store), vec!["canary-operator"]);
}

#[tokio::test(start_paused = true)]
async fn cert_manager_install_labels_its_namespace() {
    let charts = charts();
    let store = cluster();
    let installer = installer(&store, &charts);
    installer.install(Component::CertManager, &InstallOptions::default()).await.unwrap();

    let names = created_names(&store);
    assert_eq!(names[..2], ["istios.certmanager.k8s.io".to_string(), "remoteistios.certmanager.k8s.io".to_string()]);
    assert_eq!(names[2], "cert-manager");

    // with the CRD present the namespace label decides ownership
    store.insert(ResourceObject::from_value(json!({
        "apiVersion": "apiextensions.k8s.io/v1", "kind": "CustomResourceDefinition",
        "metadata": {"name": CERT_MANAGER_CRD}
    })).unwrap());
    installer.install(Component::CertManager, &InstallOptions::default()).await.unwrap();
}
