use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use anyhow::{Context, Result};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    discovery::{Discovery, Scope},
    Client, Config,
};
use tokio::sync::RwLock;
use tracing::{debug, info};
use yard_core::{ResourceObject, StoreError};

use crate::{selector_string, ObjectStore};

/// Where to find cluster credentials.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub kubeconfig: Option<PathBuf>,
    pub context: Option<String>,
}

impl ClientConfig {
    pub async fn connect(&self) -> Result<Client> {
        let opts = KubeConfigOptions { context: self.context.clone(), ..Default::default() };
        let config = match (&self.kubeconfig, &self.context) {
            (Some(path), _) => {
                let kc = Kubeconfig::read_from(path).with_context(|| format!("reading kubeconfig {}", path.display()))?;
                Config::from_custom_kubeconfig(kc, &opts).await.context("could not get k8s config")?
            }
            (None, Some(_)) => Config::from_kubeconfig(&opts).await.context("could not get k8s config")?,
            (None, None) => Config::infer().await.context("could not get k8s config")?,
        };
        Client::try_from(config).context("could not get k8s client")
    }
}

type GvkId = (String, String, String);

fn gvk_id(gvk: &GroupVersionKind) -> GvkId { (gvk.group.clone(), gvk.version.clone(), gvk.kind.clone()) }

enum Lookup {
    Found(ApiResource, bool),
    /// Not served as of the last discovery run.
    Missing,
    Unknown,
}

/// The last discovery run plus the kinds it was asked for and did not
/// serve. Misses stick until the next run.
#[derive(Default)]
struct DiscoveryCache {
    discovery: Option<Discovery>,
    missing: BTreeSet<GvkId>,
}

impl DiscoveryCache {
    fn lookup(&self, gvk: &GroupVersionKind) -> Lookup {
        if self.missing.contains(&gvk_id(gvk)) { return Lookup::Missing; }
        match self.discovery.as_ref().and_then(|d| d.resolve_gvk(gvk)) {
            Some((ar, caps)) => Lookup::Found(ar, matches!(caps.scope, Scope::Namespaced)),
            None => Lookup::Unknown,
        }
    }

    fn replace(&mut self, discovery: Discovery) {
        self.discovery = Some(discovery);
        self.missing.clear();
    }

    fn mark_missing(&mut self, gvk: &GroupVersionKind) { self.missing.insert(gvk_id(gvk)); }
}

fn no_match(gvk: &GroupVersionKind) -> StoreError { StoreError::NoMatch { group: gvk.group.clone(), kind: gvk.kind.clone() } }

/// Object store backed by a live cluster, addressing every kind dynamically
/// through API discovery.
pub struct KubeStore {
    client: Client,
    cache: RwLock<DiscoveryCache>,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client, cache: RwLock::new(DiscoveryCache::default()) }
    }

    pub fn client(&self) -> Client { self.client.clone() }

    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<(ApiResource, bool), StoreError> {
        match self.cache.read().await.lookup(gvk) {
            Lookup::Found(ar, namespaced) => return Ok((ar, namespaced)),
            Lookup::Missing => return Err(no_match(gvk)),
            Lookup::Unknown => {}
        }
        // Rediscover once, the kind may have been registered since.
        let fresh = Discovery::new(self.client.clone()).run().await.map_err(map_kube_err)?;
        let mut cache = self.cache.write().await;
        cache.replace(fresh);
        match cache.lookup(gvk) {
            Lookup::Found(ar, namespaced) => Ok((ar, namespaced)),
            _ => {
                debug!(group = %gvk.group, kind = %gvk.kind, "kind not served");
                cache.mark_missing(gvk);
                Err(no_match(gvk))
            }
        }
    }

    async fn api_for(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Result<Api<DynamicObject>, StoreError> {
        let (ar, namespaced) = self.resolve(gvk).await?;
        Ok(match (namespaced, namespace) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            (true, None) => Api::default_namespaced_with(self.client.clone(), &ar),
            (false, _) => Api::all_with(self.client.clone(), &ar),
        })
    }
}

fn map_kube_err(e: kube::Error) -> StoreError {
    match e {
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound(ae.message),
        kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict(ae.message),
        kube::Error::Api(ae) => StoreError::Api { code: ae.code, message: ae.message },
        kube::Error::SerdeError(e) => StoreError::Serialization(e.to_string()),
        other => StoreError::Transport(other.to_string()),
    }
}

fn to_dynamic(obj: &ResourceObject) -> Result<DynamicObject, StoreError> {
    serde_json::from_value(obj.raw().clone()).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn from_dynamic(gvk: &GroupVersionKind, mut d: DynamicObject) -> Result<ResourceObject, StoreError> {
    // Items returned by list calls carry no TypeMeta.
    if d.types.is_none() {
        let api_version = if gvk.group.is_empty() { gvk.version.clone() } else { format!("{}/{}", gvk.group, gvk.version) };
        d.types = Some(kube::core::TypeMeta { api_version, kind: gvk.kind.clone() });
    }
    let v = serde_json::to_value(&d).map_err(|e| StoreError::Serialization(e.to_string()))?;
    ResourceObject::from_value(v).map_err(|e| StoreError::Serialization(e.to_string()))
}

#[async_trait::async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, target: &ResourceObject) -> Result<ResourceObject, StoreError> {
        let api = self.api_for(target.gvk(), target.namespace()).await?;
        let d = api.get(target.name()).await.map_err(map_kube_err)?;
        from_dynamic(target.gvk(), d)
    }

    async fn create(&self, obj: &ResourceObject) -> Result<ResourceObject, StoreError> {
        let api = self.api_for(obj.gvk(), obj.namespace()).await?;
        let d = api.create(&PostParams::default(), &to_dynamic(obj)?).await.map_err(map_kube_err)?;
        from_dynamic(obj.gvk(), d)
    }

    async fn update(&self, obj: &ResourceObject) -> Result<ResourceObject, StoreError> {
        let api = self.api_for(obj.gvk(), obj.namespace()).await?;
        let d = api.replace(obj.name(), &PostParams::default(), &to_dynamic(obj)?).await.map_err(map_kube_err)?;
        from_dynamic(obj.gvk(), d)
    }

    async fn delete(&self, obj: &ResourceObject) -> Result<(), StoreError> {
        let api = self.api_for(obj.gvk(), obj.namespace()).await?;
        api.delete(obj.name(), &DeleteParams::background()).await.map_err(map_kube_err)?;
        Ok(())
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<ResourceObject>, StoreError> {
        let api = self.api_for(gvk, namespace).await?;
        let lp = ListParams::default().labels(&selector_string(labels));
        let list = api.list(&lp).await.map_err(map_kube_err)?;
        debug!(kind = %gvk.kind, ns = ?namespace, count = list.items.len(), "list");
        list.items.into_iter().map(|d| from_dynamic(gvk, d)).collect()
    }

    async fn refresh(&self) -> Result<(), StoreError> {
        let fresh = Discovery::new(self.client.clone()).run().await.map_err(map_kube_err)?;
        self.cache.write().await.replace(fresh);
        info!("api discovery refreshed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kube_api_errors_are_classified() {
        let mk = |code: u16| kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".into(),
            message: format!("code {}", code),
            reason: String::new(),
            code,
        });
        assert!(map_kube_err(mk(404)).is_not_found());
        assert!(matches!(map_kube_err(mk(409)), StoreError::Conflict(_)));
        assert!(matches!(map_kube_err(mk(403)), StoreError::Api { code: 403, .. }));
    }

    #[tokio::test]
    async fn discovery_misses_stick_until_the_next_run() {
        let client = Client::try_from(Config::new("http://127.0.0.1:1".parse().unwrap())).unwrap();
        let gvk = GroupVersionKind::gvk("istio.banzaicloud.io", "v1beta1", "Istio");
        let mut cache = DiscoveryCache::default();
        assert!(matches!(cache.lookup(&gvk), Lookup::Unknown));

        cache.replace(Discovery::new(client.clone()));
        assert!(matches!(cache.lookup(&gvk), Lookup::Unknown));
        cache.mark_missing(&gvk);
        assert!(matches!(cache.lookup(&gvk), Lookup::Missing));
        let other = GroupVersionKind::gvk("istio.banzaicloud.io", "v1beta1", "RemoteIstio");
        assert!(matches!(cache.lookup(&other), Lookup::Unknown));

        cache.replace(Discovery::new(client));
        assert!(matches!(cache.lookup(&gvk), Lookup::Unknown));
    }

    #[test]
    fn list_items_get_type_meta_back() {
        let gvk = GroupVersionKind::gvk("apps", "v1", "Deployment");
        let ar = ApiResource::from_gvk(&gvk);
        let mut d = DynamicObject::new("app", &ar).within("ns");
        d.types = None;
        let o = from_dynamic(&gvk, d).unwrap();
        assert_eq!(o.api_version(), "apps/v1");
        assert_eq!(o.kind(), "Deployment");
        assert_eq!(o.namespace(), Some("ns"));
    }
}
