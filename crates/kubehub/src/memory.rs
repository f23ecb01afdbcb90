//! In-process object store.
//!
//! Mirrors the server behaviours the reconciler and poller depend on:
//! resourceVersion bumping with optimistic concurrency, NotFound/Conflict,
//! NoMatch for kinds that are not served, and finalizers holding back a
//! delete. Every call is recorded so tests can assert on the exact traffic.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use yard_core::{GroupVersionKind, ObjectKey, ResourceObject, StoreError};

use crate::{matches_selector, ObjectStore};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get(ObjectKey),
    Create(ObjectKey),
    Update(ObjectKey),
    Delete(ObjectKey),
    /// Listing by kind.
    List(String),
}

type CreateHook = Box<dyn Fn(&mut ResourceObject) + Send + Sync>;

#[derive(Default)]
struct Inner {
    objects: BTreeMap<ObjectKey, ResourceObject>,
    next_rv: u64,
    ops: Vec<StoreOp>,
    unknown: BTreeSet<(String, String)>,
    failures: HashMap<StoreOp, StoreError>,
}

impl Inner {
    fn bump(&mut self, obj: &mut ResourceObject) {
        self.next_rv += 1;
        // stored objects always come from `from_value`
        let _ = obj.set_resource_version(Some(&self.next_rv.to_string()));
    }

    fn check(&mut self, op: StoreOp, gvk: &GroupVersionKind) -> Result<(), StoreError> {
        self.ops.push(op.clone());
        if self.unknown.contains(&(gvk.group.clone(), gvk.kind.clone())) {
            return Err(StoreError::NoMatch { group: gvk.group.clone(), kind: gvk.kind.clone() });
        }
        match self.failures.get(&op) {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    on_create: Mutex<Vec<CreateHook>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Seed an object as if it already existed on the server. Not recorded.
    pub fn insert(&self, mut obj: ResourceObject) -> ResourceObject {
        let mut inner = self.lock();
        inner.bump(&mut obj);
        inner.objects.insert(obj.key(), obj.clone());
        obj
    }

    pub fn lookup(&self, key: &ObjectKey) -> Option<ResourceObject> {
        self.lock().objects.get(key).cloned()
    }

    pub fn contains(&self, key: &ObjectKey) -> bool { self.lock().objects.contains_key(key) }

    pub fn len(&self) -> usize { self.lock().objects.len() }

    pub fn is_empty(&self) -> bool { self.lock().objects.is_empty() }

    /// Mutate a stored object in place (e.g. to play the controller that
    /// fills in status). Bumps its resourceVersion. Returns false when absent.
    pub fn modify(&self, key: &ObjectKey, f: impl FnOnce(&mut ResourceObject)) -> bool {
        let mut inner = self.lock();
        let Some(mut obj) = inner.objects.get(key).cloned() else { return false };
        f(&mut obj);
        inner.bump(&mut obj);
        inner.objects.insert(key.clone(), obj);
        true
    }

    pub fn remove(&self, key: &ObjectKey) -> Option<ResourceObject> { self.lock().objects.remove(key) }

    /// Every operation of this kind fails with NoMatch from now on.
    pub fn mark_unknown_kind(&self, group: &str, kind: &str) {
        self.lock().unknown.insert((group.to_string(), kind.to_string()));
    }

    /// Make one specific operation fail with `err` until cleared.
    pub fn inject_failure(&self, op: StoreOp, err: StoreError) { self.lock().failures.insert(op, err); }

    pub fn clear_failures(&self) { self.lock().failures.clear(); }

    /// Run on every created object before it is stored.
    pub fn on_create(&self, f: impl Fn(&mut ResourceObject) + Send + Sync + 'static) {
        if let Ok(mut hooks) = self.on_create.lock() {
            hooks.push(Box::new(f));
        }
    }

    pub fn ops(&self) -> Vec<StoreOp> { self.lock().ops.clone() }

    pub fn clear_ops(&self) { self.lock().ops.clear(); }

    /// Recorded mutating calls only.
    pub fn writes(&self) -> Vec<StoreOp> {
        self.ops().into_iter().filter(|op| matches!(op, StoreOp::Create(_) | StoreOp::Update(_) | StoreOp::Delete(_))).collect()
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, target: &ResourceObject) -> Result<ResourceObject, StoreError> {
        let key = target.key();
        let mut inner = self.lock();
        inner.check(StoreOp::Get(key.clone()), target.gvk())?;
        inner.objects.get(&key).cloned().ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn create(&self, obj: &ResourceObject) -> Result<ResourceObject, StoreError> {
        let key = obj.key();
        let mut created = obj.clone();
        if let Ok(hooks) = self.on_create.lock() {
            for h in hooks.iter() { h(&mut created); }
        }
        let mut inner = self.lock();
        inner.check(StoreOp::Create(key.clone()), obj.gvk())?;
        if inner.objects.contains_key(&key) {
            return Err(StoreError::Conflict(format!("{} already exists", key)));
        }
        inner.bump(&mut created);
        inner.objects.insert(key, created.clone());
        Ok(created)
    }

    async fn update(&self, obj: &ResourceObject) -> Result<ResourceObject, StoreError> {
        let key = obj.key();
        let mut inner = self.lock();
        inner.check(StoreOp::Update(key.clone()), obj.gvk())?;
        let stored_rv = match inner.objects.get(&key) {
            Some(stored) => stored.resource_version().map(|s| s.to_string()),
            None => return Err(StoreError::NotFound(key.to_string())),
        };
        if obj.resource_version().is_some() && obj.resource_version().map(|s| s.to_string()) != stored_rv {
            return Err(StoreError::Conflict(format!("{} has been modified", key)));
        }
        let mut updated = obj.clone();
        // Status is owned by the server side.
        if let Some(status) = inner.objects.get(&key).and_then(|s| s.status().cloned()) {
            updated.raw_mut()["status"] = status;
        }
        inner.bump(&mut updated);
        inner.objects.insert(key, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, obj: &ResourceObject) -> Result<(), StoreError> {
        let key = obj.key();
        let mut inner = self.lock();
        inner.check(StoreOp::Delete(key.clone()), obj.gvk())?;
        let Some(stored) = inner.objects.get(&key).cloned() else {
            return Err(StoreError::NotFound(key.to_string()));
        };
        if stored.finalizers().is_empty() {
            inner.objects.remove(&key);
        } else {
            let mut marked = stored;
            marked.raw_mut()["metadata"]["deletionTimestamp"] = serde_json::Value::String("1970-01-01T00:00:00Z".into());
            inner.bump(&mut marked);
            inner.objects.insert(key, marked);
        }
        Ok(())
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<ResourceObject>, StoreError> {
        let mut inner = self.lock();
        inner.check(StoreOp::List(gvk.kind.clone()), gvk)?;
        Ok(inner
            .objects
            .values()
            .filter(|o| o.group() == gvk.group && o.kind() == gvk.kind)
            .filter(|o| namespace.map_or(true, |ns| o.namespace() == Some(ns)))
            .filter(|o| matches_selector(o, labels))
            .cloned()
            .collect())
    }
}
