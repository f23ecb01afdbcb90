use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Namespace, Pod};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::core::GroupVersionKind;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value as Json};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ObjectError {
    #[error("manifest document is not an object")]
    NotAnObject,
    #[error("manifest missing apiVersion")]
    MissingApiVersion,
    #[error("manifest missing kind")]
    MissingKind,
    #[error("manifest missing metadata.name")]
    MissingName,
    #[error("parsing YAML manifest: {0}")]
    Yaml(String),
    #[error("duplicate object in batch: {0}")]
    Duplicate(ObjectKey),
}

/// Identity of an object inside the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub group: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl fmt::Display for ObjectKey {
    // kind[.group]/name, e.g. deployment.apps/istio-operator
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.kind.to_lowercase();
        if self.group.is_empty() {
            write!(f, "{}/{}", kind, self.name)
        } else {
            write!(f, "{}.{}/{}", kind, self.group, self.name)
        }
    }
}

/// A single declarative unit of remote state.
///
/// The full document is kept as JSON so that objects of unknown kinds survive
/// a parse/serialize round trip untouched; [`ResourceObject::typed`] gives a
/// typed view for the kinds the core needs to inspect.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceObject {
    gvk: GroupVersionKind,
    raw: Json,
}

impl ResourceObject {
    pub fn from_value(raw: Json) -> Result<Self, ObjectError> {
        let obj = raw.as_object().ok_or(ObjectError::NotAnObject)?;
        let api_version = obj.get("apiVersion").and_then(|v| v.as_str()).ok_or(ObjectError::MissingApiVersion)?;
        let kind = obj.get("kind").and_then(|v| v.as_str()).ok_or(ObjectError::MissingKind)?;
        obj.get("metadata").and_then(|m| m.get("name")).and_then(|v| v.as_str()).ok_or(ObjectError::MissingName)?;
        let (group, version) = match api_version.split_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), api_version.to_string()),
        };
        let gvk = GroupVersionKind { group, version, kind: kind.to_string() };
        Ok(Self { gvk, raw })
    }

    /// Build a bare object carrying only identity, as used for lookups.
    pub fn stub(gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> Self {
        let api_version = if gvk.group.is_empty() { gvk.version.clone() } else { format!("{}/{}", gvk.group, gvk.version) };
        let mut meta = Map::new();
        meta.insert("name".into(), Json::String(name.to_string()));
        if let Some(ns) = namespace {
            meta.insert("namespace".into(), Json::String(ns.to_string()));
        }
        let raw = serde_json::json!({ "apiVersion": api_version, "kind": gvk.kind, "metadata": meta });
        Self { gvk: gvk.clone(), raw }
    }

    pub fn gvk(&self) -> &GroupVersionKind { &self.gvk }
    pub fn kind(&self) -> &str { &self.gvk.kind }
    pub fn group(&self) -> &str { &self.gvk.group }

    pub fn api_version(&self) -> String {
        if self.gvk.group.is_empty() { self.gvk.version.clone() } else { format!("{}/{}", self.gvk.group, self.gvk.version) }
    }

    pub fn name(&self) -> &str {
        self.meta_str("name").unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.meta_str("namespace").filter(|s| !s.is_empty())
    }

    pub fn set_namespace(&mut self, namespace: &str) -> Result<(), ObjectError> {
        self.metadata_mut()?.insert("namespace".into(), Json::String(namespace.to_string()));
        Ok(())
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            group: self.gvk.group.clone(),
            kind: self.gvk.kind.clone(),
            namespace: self.namespace().map(|s| s.to_string()),
            name: self.name().to_string(),
        }
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.meta_str("resourceVersion")
    }

    pub fn set_resource_version(&mut self, rv: Option<&str>) -> Result<(), ObjectError> {
        let meta = self.metadata_mut()?;
        match rv {
            Some(rv) => { meta.insert("resourceVersion".into(), Json::String(rv.to_string())); }
            None => { meta.remove("resourceVersion"); }
        }
        Ok(())
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.raw.get("metadata")?.get("annotations")?.get(key)?.as_str()
    }

    pub fn set_annotation(&mut self, key: &str, value: String) -> Result<(), ObjectError> {
        let meta = self.metadata_mut()?;
        let annos = meta.entry("annotations").or_insert_with(|| Json::Object(Map::new()));
        if !annos.is_object() {
            *annos = Json::Object(Map::new());
        }
        if let Some(map) = annos.as_object_mut() {
            map.insert(key.to_string(), Json::String(value));
        }
        Ok(())
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        self.string_map("labels")
    }

    pub fn finalizers(&self) -> Vec<String> {
        self.raw
            .get("metadata")
            .and_then(|m| m.get("finalizers"))
            .and_then(|f| f.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect())
            .unwrap_or_default()
    }

    pub fn status(&self) -> Option<&Json> {
        self.raw.get("status")
    }

    pub fn raw(&self) -> &Json { &self.raw }
    pub fn raw_mut(&mut self) -> &mut Json { &mut self.raw }
    pub fn into_raw(self) -> Json { self.raw }

    /// Typed view keyed by (group/version, kind). Unknown kinds, and known
    /// kinds whose body does not convert, come back as `Opaque`.
    pub fn typed(&self) -> TypedResource {
        fn conv<T: serde::de::DeserializeOwned>(v: &Json) -> Option<T> {
            serde_json::from_value(v.clone()).ok()
        }
        let typed = match (self.api_version().as_str(), self.kind()) {
            ("apiextensions.k8s.io/v1", "CustomResourceDefinition") => conv(&self.raw).map(|c| TypedResource::CustomResourceDefinition(Box::new(c))),
            ("apps/v1", "Deployment") => conv(&self.raw).map(|d| TypedResource::Deployment(Box::new(d))),
            ("apps/v1", "StatefulSet") => conv(&self.raw).map(|s| TypedResource::StatefulSet(Box::new(s))),
            ("v1", "Pod") => conv(&self.raw).map(|p| TypedResource::Pod(Box::new(p))),
            ("v1", "Namespace") => conv(&self.raw).map(|n| TypedResource::Namespace(Box::new(n))),
            _ => None,
        };
        typed.unwrap_or_else(|| TypedResource::Opaque(self.raw.clone()))
    }

    fn meta_str(&self, field: &str) -> Option<&str> {
        self.raw.get("metadata")?.get(field)?.as_str()
    }

    fn string_map(&self, field: &str) -> BTreeMap<String, String> {
        self.raw
            .get("metadata")
            .and_then(|m| m.get(field))
            .and_then(|v| v.as_object())
            .map(|m| m.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))).collect())
            .unwrap_or_default()
    }

    // `raw_mut` callers can replace the whole document.
    fn metadata_mut(&mut self) -> Result<&mut Map<String, Json>, ObjectError> {
        let doc = self.raw.as_object_mut().ok_or(ObjectError::NotAnObject)?;
        let meta = doc.entry("metadata").or_insert_with(|| Json::Object(Map::new()));
        if !meta.is_object() {
            *meta = Json::Object(Map::new());
        }
        meta.as_object_mut().ok_or(ObjectError::NotAnObject)
    }
}

impl Serialize for ResourceObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ResourceObject {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Json::deserialize(deserializer)?;
        ResourceObject::from_value(raw).map_err(serde::de::Error::custom)
    }
}

/// Typed body of the kinds the poller and installer inspect.
#[derive(Debug, Clone)]
pub enum TypedResource {
    CustomResourceDefinition(Box<CustomResourceDefinition>),
    Deployment(Box<Deployment>),
    StatefulSet(Box<StatefulSet>),
    Pod(Box<Pod>),
    Namespace(Box<Namespace>),
    Opaque(Json),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_value_reports_missing_fields() {
        let e = ResourceObject::from_value(serde_json::json!({"kind": "Foo", "metadata": {"name": "x"}})).unwrap_err();
        assert_eq!(e, ObjectError::MissingApiVersion);
        let e = ResourceObject::from_value(serde_json::json!({"apiVersion": "v1", "metadata": {"name": "x"}})).unwrap_err();
        assert_eq!(e, ObjectError::MissingKind);
        let e = ResourceObject::from_value(serde_json::json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {}})).unwrap_err();
        assert_eq!(e, ObjectError::MissingName);
        assert_eq!(ResourceObject::from_value(serde_json::json!([1])).unwrap_err(), ObjectError::NotAnObject);
    }

    #[test]
    fn key_display_includes_group_only_when_set() {
        let cm = ResourceObject::from_value(serde_json::json!({
            "apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "cfg", "namespace": "ns"}
        })).unwrap();
        assert_eq!(cm.key().to_string(), "configmap/cfg");
        assert_eq!(cm.key().namespace.as_deref(), Some("ns"));

        let dep = ResourceObject::from_value(serde_json::json!({
            "apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "app"}
        })).unwrap();
        assert_eq!(dep.key().to_string(), "deployment.apps/app");
        assert_eq!(dep.api_version(), "apps/v1");
    }

    #[test]
    fn annotations_and_resource_version_are_editable() {
        let mut o = ResourceObject::stub(&GroupVersionKind::gvk("", "v1", "ConfigMap"), Some("ns"), "cfg");
        assert_eq!(o.annotation("a"), None);
        o.set_annotation("a", "b".into()).unwrap();
        assert_eq!(o.annotation("a"), Some("b"));
        o.set_resource_version(Some("42")).unwrap();
        assert_eq!(o.resource_version(), Some("42"));
        o.set_resource_version(None).unwrap();
        assert_eq!(o.resource_version(), None);
        o.set_namespace("other").unwrap();
        assert_eq!(o.namespace(), Some("other"));
    }

    #[test]
    fn edits_fail_once_the_document_is_no_object() {
        let mut o = ResourceObject::stub(&GroupVersionKind::gvk("", "v1", "ConfigMap"), Some("ns"), "cfg");
        o.raw_mut()["metadata"] = serde_json::json!("broken");
        o.set_annotation("a", "b".into()).unwrap();
        assert_eq!(o.annotation("a"), Some("b"));

        *o.raw_mut() = serde_json::json!(["not", "an", "object"]);
        assert_eq!(o.set_annotation("a", "b".into()), Err(ObjectError::NotAnObject));
        assert_eq!(o.set_resource_version(Some("1")), Err(ObjectError::NotAnObject));
        assert_eq!(o.set_namespace("ns"), Err(ObjectError::NotAnObject));
    }

    #[test]
    fn typed_falls_back_to_opaque() {
        let crd_without_spec = ResourceObject::from_value(serde_json::json!({
            "apiVersion": "apiextensions.k8s.io/v1", "kind": "CustomResourceDefinition", "metadata": {"name": "widgets.example.com"}
        })).unwrap();
        assert!(matches!(crd_without_spec.typed(), TypedResource::Opaque(_)));

        let dep = ResourceObject::from_value(serde_json::json!({
            "apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "app"},
            "status": {"replicas": 2, "readyReplicas": 1}
        })).unwrap();
        match dep.typed() {
            TypedResource::Deployment(d) => assert_eq!(d.status.and_then(|s| s.ready_replicas), Some(1)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn serde_round_trip_preserves_unknown_fields() {
        let v = serde_json::json!({
            "apiVersion": "example.com/v1alpha1", "kind": "Widget",
            "metadata": {"name": "w"}, "spec": {"x": [1, 2, {"y": null}]}
        });
        let o: ResourceObject = serde_json::from_value(v.clone()).unwrap();
        assert_eq!(serde_json::to_value(&o).unwrap(), v);
    }
}
