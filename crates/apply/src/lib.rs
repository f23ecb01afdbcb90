//! Yard apply: idempotent create-or-update and best-effort delete of ordered
//! resource batches, with last-applied diffing and post-action hooks.

#![forbid(unsafe_code)]

mod diff;
mod hooks;
mod order;
mod reconciler;

pub use diff::{
    canonical_json, fingerprint, last_applied, stamp_last_applied, strip_noisy, three_way_diff, DiffSummary,
    LAST_APPLIED_ANNOTATION,
};
pub use hooks::{PostApplyHook, PostDeleteHook, WaitForConditions, WaitForCrd, WaitForFinalizers};
pub use order::KindOrder;
pub use reconciler::{ApplyReport, DeleteReport, Outcome, ReconcileError, Reconciler, Report};
