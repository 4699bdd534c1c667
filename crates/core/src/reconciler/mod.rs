//! Pending reconciliation.
//!
//! Each `reconcile()` call is one sweep over the in-flight keys. There is no
//! internal loop; the caller owns the cadence.

mod sweep;

pub use sweep::{PendingReconciler, ReconcileReport, RECONCILER_ACTOR};
