//! Yard wait: polls remote objects until a set of condition checks holds.

#![forbid(unsafe_code)]

use std::time::Duration;

use tracing::info;
use yard_core::ResourceObject;
use yard_kubehub::ObjectStore;

mod backoff;
pub mod checks;

pub use backoff::{poll, poll_fn, BackoffPolicy, PollError};
pub use checks::{
    check, crd_established, crd_names_rejected, does_not_exist, exists, pod_running, replicas_ready, ConditionCheck,
    Fetched,
};

/// Readiness wait used after installing workloads: 5s x 24.
pub fn default_readiness() -> BackoffPolicy { BackoffPolicy::constant(Duration::from_secs(5), 24) }

/// CRD establishment wait: 5s x 10.
pub fn default_crd() -> BackoffPolicy { BackoffPolicy::constant(Duration::from_secs(5), 10) }

pub async fn wait_for_resource(
    store: &dyn ObjectStore,
    object: &ResourceObject,
    policy: &BackoffPolicy,
    checks: &[ConditionCheck],
) -> Result<(), PollError> {
    let name = object.key().to_string();
    info!("{} - pending", name);
    poll(|| store.get(object), checks, policy).await?;
    info!("{} - ok", name);
    Ok(())
}

/// Waits on each object in turn; the first failure aborts the rest.
pub async fn wait_for_resources<'a, I>(
    store: &dyn ObjectStore,
    objects: I,
    policy: &BackoffPolicy,
    checks: &[ConditionCheck],
) -> Result<(), PollError>
where
    I: IntoIterator<Item = &'a ResourceObject>,
{
    for o in objects {
        wait_for_resource(store, o, policy, checks).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tokio::time::Instant;
    use yard_kubehub::{MemoryStore, StoreOp};

    use super::*;

    fn deployment(name: &str, ready: i32) -> ResourceObject {
        ResourceObject::from_value(json!({
            "apiVersion": "apps/v1", "kind": "Deployment",
            "metadata": {"name": name, "namespace": "backyards-system"},
            "status": {"replicas": 1, "readyReplicas": ready}
        }))
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn waits_until_object_appears_and_is_ready() {
        let store = Arc::new(MemoryStore::new());
        let target = deployment("backyards", 1);
        let writer = store.clone();
        let late = target.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            writer.insert(late);
        });

        let start = Instant::now();
        let policy = BackoffPolicy::constant(Duration::from_secs(5), 5);
        wait_for_resource(&*store, &target, &policy, &[exists(), replicas_ready()]).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        let gets = store.ops().into_iter().filter(|op| matches!(op, StoreOp::Get(_))).count();
        assert_eq!(gets, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn first_failure_stops_the_sequence() {
        let store = MemoryStore::new();
        let ready = deployment("ready", 1);
        let stuck = deployment("stuck", 0);
        let never_checked = deployment("later", 1);
        store.insert(ready.clone());
        store.insert(stuck.clone());
        store.insert(never_checked.clone());

        let policy = BackoffPolicy::constant(Duration::from_secs(1), 2);
        let res = wait_for_resources(&store, [&ready, &stuck, &never_checked], &policy, &[exists(), replicas_ready()]).await;
        assert_eq!(res, Err(PollError::Exhausted { steps: 2 }));
        assert!(!store.ops().contains(&StoreOp::Get(never_checked.key())));
    }
}
