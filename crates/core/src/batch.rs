use std::collections::HashSet;

use serde::Deserialize;
use serde_json::Value as Json;

use crate::object::{ObjectError, ObjectKey, ResourceObject};

/// Ordered sequence of objects processed together by the reconciler.
/// Order is significant and preserved as given.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceBatch {
    items: Vec<ResourceObject>,
}

impl ResourceBatch {
    pub fn new() -> Self { Self::default() }

    pub fn push(&mut self, obj: ResourceObject) { self.items.push(obj); }

    pub fn extend(&mut self, other: ResourceBatch) { self.items.extend(other.items); }

    pub fn len(&self) -> usize { self.items.len() }

    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    pub fn iter(&self) -> std::slice::Iter<'_, ResourceObject> { self.items.iter() }

    pub fn as_slice(&self) -> &[ResourceObject] { &self.items }

    pub fn as_mut_vec(&mut self) -> &mut Vec<ResourceObject> { &mut self.items }

    pub fn keys(&self) -> Vec<ObjectKey> {
        self.items.iter().map(|o| o.key()).collect()
    }

    /// Split into (objects of `kind`, everything else), keeping relative order.
    pub fn partition_kind(self, kind: &str) -> (ResourceBatch, ResourceBatch) {
        let (a, b): (Vec<_>, Vec<_>) = self.items.into_iter().partition(|o| o.kind() == kind);
        (ResourceBatch { items: a }, ResourceBatch { items: b })
    }

    /// Identity must be unique within a batch.
    pub fn ensure_unique(&self) -> Result<(), ObjectError> {
        let mut seen = HashSet::with_capacity(self.items.len());
        for o in &self.items {
            let k = o.key();
            if !seen.insert(k.clone()) {
                return Err(ObjectError::Duplicate(k));
            }
        }
        Ok(())
    }

    /// Parse a multi-document YAML manifest. Empty documents are skipped.
    pub fn parse_manifest(yaml: &str) -> Result<Self, ObjectError> {
        let mut items = Vec::new();
        for doc in serde_yaml::Deserializer::from_str(yaml) {
            let val = serde_yaml::Value::deserialize(doc).map_err(|e| ObjectError::Yaml(e.to_string()))?;
            if val.is_null() { continue; }
            let json: Json = serde_json::to_value(val).map_err(|e| ObjectError::Yaml(e.to_string()))?;
            items.push(ResourceObject::from_value(json)?);
        }
        Ok(Self { items })
    }

    /// Render back to a multi-document YAML manifest (`---` separated).
    pub fn to_yaml_manifest(&self) -> Result<String, serde_yaml::Error> {
        let mut out = String::new();
        for o in &self.items {
            out.push_str("---\n");
            out.push_str(&serde_yaml::to_string(o.raw())?);
        }
        Ok(out)
    }
}

impl From<Vec<ResourceObject>> for ResourceBatch {
    fn from(items: Vec<ResourceObject>) -> Self { Self { items } }
}

impl FromIterator<ResourceObject> for ResourceBatch {
    fn from_iter<I: IntoIterator<Item = ResourceObject>>(iter: I) -> Self {
        Self { items: iter.into_iter().collect() }
    }
}

impl IntoIterator for ResourceBatch {
    type Item = ResourceObject;
    type IntoIter = std::vec::IntoIter<ResourceObject>;
    fn into_iter(self) -> Self::IntoIter { self.items.into_iter() }
}

impl<'a> IntoIterator for &'a ResourceBatch {
    type Item = &'a ResourceObject;
    type IntoIter = std::slice::Iter<'a, ResourceObject>;
    fn into_iter(self) -> Self::IntoIter { self.items.iter() }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
apiVersion: v1
kind: Namespace
metadata:
  name: demo
---
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: app
  namespace: demo
spec:
  replicas: 1
"#;

    #[test]
    fn parse_manifest_skips_empty_documents() {
        let b = ResourceBatch::parse_manifest(MANIFEST).unwrap();
        assert_eq!(b.len(), 2);
        assert_eq!(b.as_slice()[0].kind(), "Namespace");
        assert_eq!(b.as_slice()[1].namespace(), Some("demo"));
    }

    #[test]
    fn manifest_round_trip_is_stable() {
        let b = ResourceBatch::parse_manifest(MANIFEST).unwrap();
        let yaml = b.to_yaml_manifest().unwrap();
        let again = ResourceBatch::parse_manifest(&yaml).unwrap();
        assert_eq!(b, again);
    }

    #[test]
    fn duplicate_identity_is_rejected() {
        let mut b = ResourceBatch::parse_manifest(MANIFEST).unwrap();
        let first = b.as_slice()[0].clone();
        b.push(first);
        assert!(matches!(b.ensure_unique(), Err(ObjectError::Duplicate(k)) if k.name == "demo"));
    }

    #[test]
    fn partition_keeps_order() {
        let b = ResourceBatch::parse_manifest(MANIFEST).unwrap();
        let (ns, rest) = b.partition_kind("Namespace");
        assert_eq!(ns.len(), 1);
        assert_eq!(rest.as_slice()[0].name(), "app");
    }
}
