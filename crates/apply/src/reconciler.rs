use std::sync::Arc;

use metrics::counter;
use tracing::{error, info, warn};
use yard_core::{ObjectError, ObjectKey, ResourceBatch, StoreError};
use yard_kubehub::ObjectStore;

use crate::diff::{last_applied, stamp_last_applied, three_way_diff};
use crate::hooks::{PostApplyHook, PostDeleteHook};
use crate::order::KindOrder;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("could not get resource {object}: {source}")]
    Fetch { object: String, source: StoreError },
    #[error("could not create resource {object}: {source}")]
    Create { object: String, source: StoreError },
    #[error("could not update resource {object}: {source}")]
    Update { object: String, source: StoreError },
    #[error("invalid resource {object}: {source}")]
    Invalid { object: String, source: ObjectError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Configured,
    Unchanged,
    Deleted,
    /// Not present when the delete started.
    Missing,
    /// Gone between the existence check and the delete call.
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Default)]
pub struct Report {
    pub entries: Vec<(ObjectKey, Outcome)>,
    pub hook_errors: usize,
}

pub type ApplyReport = Report;
pub type DeleteReport = Report;

impl Report {
    pub fn count(&self, outcome: Outcome) -> usize { self.entries.iter().filter(|(_, o)| *o == outcome).count() }

    pub fn outcome(&self, key: &ObjectKey) -> Option<Outcome> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, o)| *o)
    }

    /// Appends a later phase's results.
    pub fn merge(&mut self, other: Report) {
        self.entries.extend(other.entries);
        self.hook_errors += other.hook_errors;
    }

    fn record(&mut self, key: ObjectKey, outcome: Outcome) { self.entries.push((key, outcome)); }
}

/// Applies and deletes batches one object at a time, in kind order.
pub struct Reconciler {
    store: Arc<dyn ObjectStore>,
    order: KindOrder,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self { Self { store, order: KindOrder::install_default() } }

    pub fn with_order(mut self, order: KindOrder) -> Self { self.order = order; self }

    pub fn store(&self) -> &dyn ObjectStore { &*self.store }

    /// Create-or-update every object. A fetch failure other than NotFound,
    /// or a failed write, aborts the batch; hook failures never do.
    pub async fn apply(&self, batch: ResourceBatch, hooks: &[Arc<dyn PostApplyHook>]) -> Result<ApplyReport, ReconcileError> {
        let mut batch = batch;
        self.order.sort_for_apply(&mut batch);
        let mut report = Report::default();

        for obj in batch {
            let key = obj.key();
            let name = key.to_string();
            let mut desired = obj;

            let hook_target = match self.store.get(&desired).await {
                Ok(stored) => {
                    let invalid = |source| ReconcileError::Invalid { object: name.clone(), source };
                    desired.set_resource_version(stored.resource_version()).map_err(invalid)?;
                    let diff = three_way_diff(last_applied(&stored).as_ref(), desired.raw(), stored.raw());
                    if diff.is_empty() {
                        info!("{} unchanged", name);
                        counter!("reconcile_unchanged", 1u64);
                        report.record(key, Outcome::Unchanged);
                        continue;
                    }
                    stamp_last_applied(&mut desired).map_err(invalid)?;
                    self.store
                        .update(&desired)
                        .await
                        .map_err(|source| ReconcileError::Update { object: name.clone(), source })?;
                    info!(adds = diff.adds, updates = diff.updates, removes = diff.removes, "{} configured", name);
                    counter!("reconcile_configured", 1u64);
                    report.record(key, Outcome::Configured);
                    stored
                }
                Err(e) if e.is_not_found() => {
                    stamp_last_applied(&mut desired).map_err(|source| ReconcileError::Invalid { object: name.clone(), source })?;
                    let created = self
                        .store
                        .create(&desired)
                        .await
                        .map_err(|source| ReconcileError::Create { object: name.clone(), source })?;
                    info!("{} created", name);
                    counter!("reconcile_created", 1u64);
                    report.record(key, Outcome::Created);
                    created
                }
                Err(source) => return Err(ReconcileError::Fetch { object: name, source }),
            };

            for hook in hooks {
                if let Err(e) = hook.run(&*self.store, &hook_target).await {
                    error!(object = %name, error = %format!("{:#}", e), "post-apply hook failed");
                    counter!("reconcile_hook_errors", 1u64);
                    report.hook_errors += 1;
                }
            }
        }
        Ok(report)
    }

    /// Best-effort teardown: per-object errors are logged and the rest of the
    /// batch is still processed.
    pub async fn delete(&self, batch: ResourceBatch, hooks: &[Arc<dyn PostDeleteHook>]) -> DeleteReport {
        let mut batch = batch;
        self.order.sort_for_delete(&mut batch);
        let mut report = Report::default();

        for obj in batch {
            let key = obj.key();
            let name = key.to_string();

            let stored = match self.store.get(&obj).await {
                Ok(stored) => stored,
                Err(e) if e.is_not_found() || e.is_no_match() => {
                    warn!(error = %e, "could not delete {}", name);
                    report.record(key, Outcome::Missing);
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "could not delete {}", name);
                    report.record(key, Outcome::Failed);
                    continue;
                }
            };

            let outcome = match self.store.delete(&obj).await {
                Ok(()) => Outcome::Deleted,
                Err(e) if e.is_not_found() || e.is_no_match() => {
                    warn!(error = %e, "could not delete {}", name);
                    report.record(key, Outcome::Skipped);
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "could not delete {}", name);
                    Outcome::Failed
                }
            };

            for hook in hooks {
                if let Err(e) = hook.run(&*self.store, &stored).await {
                    error!(object = %name, error = %format!("{:#}", e), "post-delete hook failed");
                    counter!("reconcile_hook_errors", 1u64);
                    report.hook_errors += 1;
                }
            }
            if outcome == Outcome::Deleted {
                info!("{} deleted", name);
                counter!("reconcile_deleted", 1u64);
            }
            report.record(key, outcome);
        }
        report
    }
}
