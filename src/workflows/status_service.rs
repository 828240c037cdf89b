// Single and bulk status changes on individual packages

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

use super::errors::{FailedItem, WorkflowError};
use super::retry_on_conflict;
use crate::config::WorkflowConfig;
use crate::models::{
    ActorId, AuditEntry, EntityRef, HistoryAction, NewPackage, Package, PackageId, PackageStatus,
    StatusHistory,
};
use crate::notifications::{NotificationDispatcher, NotificationEvent};
use crate::store::Store;
use crate::telemetry::{create_workflow_span, generate_correlation_id};

/// Per-package outcome of a bulk status change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkStatusReport {
    pub target: PackageStatus,
    pub succeeded: Vec<PackageId>,
    pub failed: Vec<FailedItem>,
}

impl BulkStatusReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_ids(&self) -> Vec<PackageId> {
        self.failed.iter().map(|f| f.package_id).collect()
    }
}

pub struct PackageStatusService {
    store: Arc<dyn Store>,
    notifier: Arc<dyn NotificationDispatcher>,
    config: WorkflowConfig,
}

impl PackageStatusService {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn NotificationDispatcher>) -> Self {
        Self::with_config(store, notifier, WorkflowConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn Store>,
        notifier: Arc<dyn NotificationDispatcher>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    pub fn can_transition(&self, package: &Package, target: PackageStatus) -> bool {
        package.status.can_transition_to(target)
    }

    /// Live package by id; soft-deleted rows are reported as missing
    pub async fn find_package(&self, id: PackageId) -> Result<Package, WorkflowError> {
        self.store
            .find_package(id)
            .await?
            .filter(|p| !p.is_deleted())
            .ok_or_else(|| WorkflowError::package_not_found(id))
    }

    pub async fn history(&self, entity: EntityRef) -> Result<Vec<StatusHistory>, WorkflowError> {
        Ok(self.store.history_for(entity).await?)
    }

    /// Add a package arriving on a manifest. It always starts pending.
    pub async fn register_package(
        &self,
        package: NewPackage,
        actor: ActorId,
    ) -> Result<Package, WorkflowError> {
        let mut tx = self.store.begin().await?;
        let created = tx.insert_package(package).await?;
        tx.record(AuditEntry {
            entity: EntityRef::Package(created.id),
            actor,
            action: HistoryAction::Registered,
            from_status: None,
            to_status: created.status,
            reason: None,
            recorded_at: created.created_at,
        })
        .await?;
        tx.commit().await?;

        info!(
            package.id = %created.id,
            tracking_number = %created.tracking_number,
            customer.id = %created.customer_id,
            "Package registered"
        );
        Ok(created)
    }

    /// Move one package to `target`, recording history in the same commit
    pub async fn update_status(
        &self,
        package_id: PackageId,
        target: PackageStatus,
        actor: ActorId,
        reason: Option<String>,
    ) -> Result<Package, WorkflowError> {
        let correlation_id = generate_correlation_id();
        let entity = EntityRef::Package(package_id).to_string();
        self.transition(package_id, target, actor, reason, true)
            .instrument(create_workflow_span(
                "update_status",
                Some(&entity),
                Some(&correlation_id),
            ))
            .await
    }

    /// Apply `update_status` to each id independently. Duplicate ids are
    /// applied once, in first-seen order.
    pub async fn bulk_update_status(
        &self,
        package_ids: &[PackageId],
        target: PackageStatus,
        actor: ActorId,
        reason: Option<String>,
    ) -> BulkStatusReport {
        let correlation_id = generate_correlation_id();
        let span = create_workflow_span("bulk_update_status", None, Some(&correlation_id));

        async {
            let mut seen = HashSet::new();
            let mut report = BulkStatusReport {
                target,
                succeeded: Vec::new(),
                failed: Vec::new(),
            };

            for &id in package_ids.iter().filter(|id| seen.insert(**id)) {
                match self.transition(id, target, actor, reason.clone(), true).await {
                    Ok(_) => report.succeeded.push(id),
                    Err(e) => {
                        debug!(package.id = %id, error = %e, "Bulk status change skipped package");
                        report.failed.push(FailedItem::new(id, &e));
                    }
                }
            }

            info!(
                target = %target,
                succeeded = report.succeeded.len(),
                failed = report.failed.len(),
                "Bulk status update finished"
            );
            report
        }
        .instrument(span)
        .await
    }

    /// Transition with conflict retries and optional notification
    pub(crate) async fn transition(
        &self,
        package_id: PackageId,
        target: PackageStatus,
        actor: ActorId,
        reason: Option<String>,
        notify: bool,
    ) -> Result<Package, WorkflowError> {
        let (package, from) =
            retry_on_conflict("update_status", self.config.max_conflict_retries, || {
                self.try_transition(package_id, target, actor, reason.clone())
            })
            .await?;

        if notify && self.config.should_notify(target) {
            self.dispatch(&package, from).await;
        }
        Ok(package)
    }

    /// One read-check-write cycle inside a single transaction
    async fn try_transition(
        &self,
        package_id: PackageId,
        target: PackageStatus,
        actor: ActorId,
        reason: Option<String>,
    ) -> Result<(Package, PackageStatus), WorkflowError> {
        let mut tx = self.store.begin().await?;

        let current = tx
            .package_for_update(package_id)
            .await?
            .filter(|p| !p.is_deleted())
            .ok_or_else(|| WorkflowError::package_not_found(package_id))?;

        let from = current.status;
        if !from.can_transition_to(target) {
            return Err(WorkflowError::InvalidTransition { from, to: target });
        }

        let updated = Package {
            status: target,
            updated_at: Utc::now(),
            ..current
        };
        let saved = tx.save_package(&updated).await?;
        tx.record(AuditEntry::status_change(
            EntityRef::Package(package_id),
            actor,
            from,
            target,
            reason,
        ))
        .await?;
        tx.commit().await?;

        info!(
            package.id = %package_id,
            from = %from,
            to = %target,
            actor.id = %actor,
            "Package status updated"
        );
        Ok((saved, from))
    }

    async fn dispatch(&self, package: &Package, from: PackageStatus) {
        let payload = json!({
            "package_id": package.id,
            "tracking_number": package.tracking_number,
            "previous_status": from,
            "status": package.status,
            "consolidated_id": package.consolidated_id,
        });
        let event = NotificationEvent::PackageStatusChanged(package.status);

        if let Err(e) = self
            .notifier
            .notify(package.customer_id, event, payload)
            .await
        {
            warn!(
                package.id = %package.id,
                event = %event.name(),
                error = %e,
                "Notification dispatch failed; status change stands"
            );
        }
    }
}
