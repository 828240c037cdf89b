// Package lifecycle workflows: transition rules, single/bulk status changes,
// consolidation of packages into groups and group-wide status changes.

pub mod consolidation;
pub mod coordinator;
pub mod errors;
pub mod status_service;
pub mod transitions;

pub use consolidation::{ChargesUpdate, ConsolidationEngine};
pub use coordinator::{ConsolidatedStatusCoordinator, ConsolidatedUpdate, ConsolidatedUpdateOptions};
pub use errors::{ErrorKind, FailedItem, WorkflowError};
pub use status_service::{BulkStatusReport, PackageStatusService};
pub use transitions::StatusTransitionTable;

use std::future::Future;
use tracing::warn;

/// Re-run a whole read-check-write transaction when the store reports that a
/// row changed underneath it. Domain errors are returned as-is.
pub(crate) async fn retry_on_conflict<T, F, Fut>(
    operation: &str,
    max_retries: u32,
    mut attempt: F,
) -> Result<T, WorkflowError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, WorkflowError>>,
{
    let mut retries = 0;
    loop {
        match attempt().await {
            Err(WorkflowError::PersistenceFailure(e)) if e.is_conflict() && retries < max_retries => {
                retries += 1;
                warn!(operation, retries, error = %e, "Concurrent modification, retrying");
            }
            other => return other,
        }
    }
}
