use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, error, warn};
use yard_core::ResourceObject;
use yard_kubehub::ObjectStore;
use yard_wait::{
    crd_established, crd_names_rejected, does_not_exist, poll, poll_fn, wait_for_resource, BackoffPolicy,
    ConditionCheck, PollError,
};

/// Runs after an object was created or updated. `object` is the stored state
/// read before the write, or the created object when there was none.
#[async_trait]
pub trait PostApplyHook: Send + Sync {
    async fn run(&self, store: &dyn ObjectStore, object: &ResourceObject) -> Result<()>;
}

/// Runs after a delete was issued for an object that existed.
#[async_trait]
pub trait PostDeleteHook: Send + Sync {
    async fn run(&self, store: &dyn ObjectStore, object: &ResourceObject) -> Result<()>;
}

/// Blocks until a just-applied CRD is established, then refreshes the
/// store's view of served kinds. Other kinds are ignored.
pub struct WaitForCrd { pub policy: BackoffPolicy }

impl WaitForCrd {
    pub fn new(policy: BackoffPolicy) -> Self { Self { policy } }
}

#[async_trait]
impl PostApplyHook for WaitForCrd {
    async fn run(&self, store: &dyn ObjectStore, object: &ResourceObject) -> Result<()> {
        if object.kind() != "CustomResourceDefinition" { return Ok(()); }
        let name = &object.key().to_string();
        let established = &crd_established();
        poll_fn(&self.policy, || async move {
            debug!("wait for {} to be available", name);
            match store.get(object).await {
                Ok(crd) => {
                    if let Some(reason) = crd_names_rejected(&crd) { return Err(PollError::Aborted(reason)); }
                    Ok(established(&Ok(crd)))
                }
                Err(e) => {
                    error!(object = %name, error = %e, "fetch failed");
                    Ok(false)
                }
            }
        })
        .await
        .with_context(|| format!("{} not established", name))?;
        if let Err(e) = store.refresh().await {
            warn!(error = %e, "could not refresh api discovery");
        }
        Ok(())
    }
}

/// Blocks until an object deleted with finalizers is actually gone.
pub struct WaitForFinalizers { pub policy: BackoffPolicy }

impl WaitForFinalizers {
    pub fn new(policy: BackoffPolicy) -> Self { Self { policy } }
}

#[async_trait]
impl PostDeleteHook for WaitForFinalizers {
    async fn run(&self, store: &dyn ObjectStore, object: &ResourceObject) -> Result<()> {
        if object.finalizers().is_empty() { return Ok(()); }
        debug!("wait for {} to be deleted", object.key());
        poll(|| store.get(object), &[does_not_exist()], &self.policy)
            .await
            .with_context(|| format!("{} still present", object.key()))
    }
}

/// Generic wait on an arbitrary set of checks, after apply or after delete.
pub struct WaitForConditions {
    pub policy: BackoffPolicy,
    pub checks: Vec<ConditionCheck>,
}

impl WaitForConditions {
    pub fn new(policy: BackoffPolicy, checks: Vec<ConditionCheck>) -> Self { Self { policy, checks } }
}

#[async_trait]
impl PostApplyHook for WaitForConditions {
    async fn run(&self, store: &dyn ObjectStore, object: &ResourceObject) -> Result<()> {
        wait_for_resource(store, object, &self.policy, &self.checks).await.with_context(|| format!("waiting for {}", object.key()))
    }
}

#[async_trait]
impl PostDeleteHook for WaitForConditions {
    async fn run(&self, store: &dyn ObjectStore, object: &ResourceObject) -> Result<()> {
        wait_for_resource(store, object, &self.policy, &self.checks).await.with_context(|| format!("waiting for {}", object.key()))
    }
}
