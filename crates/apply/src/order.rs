use std::collections::HashMap;

use yard_core::{ResourceBatch, ResourceObject};

/// Kind precedence used when installing charts: schemas and namespaces first,
/// workloads after the objects they reference, API services last.
const INSTALL_ORDER: &[&str] = &[
    "CustomResourceDefinition",
    "Namespace",
    "ResourceQuota",
    "LimitRange",
    "PodSecurityPolicy",
    "PodDisruptionBudget",
    "Secret",
    "ConfigMap",
    "StorageClass",
    "PersistentVolume",
    "PersistentVolumeClaim",
    "ServiceAccount",
    "ClusterRole",
    "ClusterRoleList",
    "ClusterRoleBinding",
    "ClusterRoleBindingList",
    "Role",
    "RoleList",
    "RoleBinding",
    "RoleBindingList",
    "Service",
    "DaemonSet",
    "Pod",
    "ReplicationController",
    "ReplicaSet",
    "Deployment",
    "HorizontalPodAutoscaler",
    "StatefulSet",
    "Job",
    "CronJob",
    "Ingress",
    "APIService",
];

/// Maps a kind to an integer priority. Kinds without an entry sort after
/// every known kind, for apply and for delete alike.
#[derive(Debug, Clone, Default)]
pub struct KindOrder {
    priorities: HashMap<String, i32>,
}

impl KindOrder {
    pub fn new<I, S>(priorities: I) -> Self
    where
        I: IntoIterator<Item = (S, i32)>,
        S: Into<String>,
    {
        Self { priorities: priorities.into_iter().map(|(k, p)| (k.into(), p)).collect() }
    }

    pub fn install_default() -> Self {
        Self::new(INSTALL_ORDER.iter().enumerate().map(|(i, k)| (*k, i as i32)))
    }

    /// Adds or overrides one kind's priority.
    pub fn with(mut self, kind: impl Into<String>, priority: i32) -> Self {
        self.priorities.insert(kind.into(), priority);
        self
    }

    pub fn priority(&self, kind: &str) -> Option<i32> { self.priorities.get(kind).copied() }

    /// Ascending priority; stable, so equal kinds keep input order.
    pub fn sort_for_apply(&self, batch: &mut ResourceBatch) {
        batch.as_mut_vec().sort_by_key(|o| self.apply_rank(o));
    }

    /// Descending priority, unknown kinds still last; stable.
    pub fn sort_for_delete(&self, batch: &mut ResourceBatch) {
        batch.as_mut_vec().sort_by_key(|o| self.delete_rank(o));
    }

    fn apply_rank(&self, o: &ResourceObject) -> (bool, i32) {
        match self.priority(o.kind()) { Some(p) => (false, p), None => (true, 0) }
    }

    fn delete_rank(&self, o: &ResourceObject) -> (bool, std::cmp::Reverse<i32>) {
        match self.priority(o.kind()) { Some(p) => (false, std::cmp::Reverse(p)), None => (true, std::cmp::Reverse(0)) }
    }
}
