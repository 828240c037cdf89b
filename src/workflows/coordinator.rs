// Group-wide status changes. A consolidated package has no lifecycle of its
// own; its status mirrors what was last applied to all of its members.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn, Instrument};

use super::errors::{FailedItem, WorkflowError};
use super::retry_on_conflict;
use super::status_service::PackageStatusService;
use crate::config::WorkflowConfig;
use crate::models::{
    ActorId, AuditEntry, ConsolidatedId, ConsolidatedPackage, EntityRef, PackageId, PackageStatus,
};
use crate::store::Store;
use crate::telemetry::{create_workflow_span, generate_correlation_id};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidatedUpdateOptions {
    /// Recorded on every member's history entry and on the group's
    pub reason: Option<String>,
    /// Dispatch customer notifications for member transitions
    pub notify: bool,
}

impl Default for ConsolidatedUpdateOptions {
    fn default() -> Self {
        Self {
            reason: None,
            notify: true,
        }
    }
}

/// Outcome of a group-wide status change that passed validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConsolidatedUpdate {
    /// Every member is at the new status and the group now mirrors it.
    /// `members_updated` counts only members this call moved.
    Applied {
        consolidated: ConsolidatedPackage,
        members_updated: usize,
    },
    /// Some members moved, some did not. The group keeps its old status and
    /// members that moved are not rolled back.
    Partial {
        consolidated: ConsolidatedPackage,
        succeeded: Vec<PackageId>,
        failed: Vec<FailedItem>,
    },
}

impl ConsolidatedUpdate {
    pub fn consolidated(&self) -> &ConsolidatedPackage {
        match self {
            ConsolidatedUpdate::Applied { consolidated, .. }
            | ConsolidatedUpdate::Partial { consolidated, .. } => consolidated,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, ConsolidatedUpdate::Applied { .. })
    }
}

pub struct ConsolidatedStatusCoordinator {
    store: Arc<dyn Store>,
    status_service: Arc<PackageStatusService>,
    config: WorkflowConfig,
}

impl ConsolidatedStatusCoordinator {
    pub fn new(store: Arc<dyn Store>, status_service: Arc<PackageStatusService>) -> Self {
        Self::with_config(store, status_service, WorkflowConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn Store>,
        status_service: Arc<PackageStatusService>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            store,
            status_service,
            config,
        }
    }

    /// Move every live member of `group_id` to `target`, then the group
    /// itself if all members made it. Members already at `target` count as
    /// moved without a new write or history entry, so retrying a partial
    /// update converges.
    ///
    /// Fails before touching any member when the group's mirrored status does
    /// not allow `target`, or when `target` is ready and some member still has
    /// zero customs, storage or delivery fees.
    pub async fn update_consolidated_status(
        &self,
        group_id: ConsolidatedId,
        target: PackageStatus,
        actor: ActorId,
        options: ConsolidatedUpdateOptions,
    ) -> Result<ConsolidatedUpdate, WorkflowError> {
        let correlation_id = generate_correlation_id();
        let entity = EntityRef::Consolidated(group_id).to_string();
        let span = create_workflow_span(
            "update_consolidated_status",
            Some(&entity),
            Some(&correlation_id),
        );

        self.apply(group_id, target, actor, options)
            .instrument(span)
            .await
    }

    async fn apply(
        &self,
        group_id: ConsolidatedId,
        target: PackageStatus,
        actor: ActorId,
        options: ConsolidatedUpdateOptions,
    ) -> Result<ConsolidatedUpdate, WorkflowError> {
        let group = self
            .store
            .find_consolidated(group_id)
            .await?
            .filter(|g| g.is_active)
            .ok_or_else(|| WorkflowError::group_not_found(group_id))?;

        if !group.status.can_transition_to(target) {
            return Err(WorkflowError::InvalidTransition {
                from: group.status,
                to: target,
            });
        }

        let members = self.store.find_members_of(group_id).await?;
        if target == PackageStatus::Ready {
            let missing: Vec<PackageId> = members
                .iter()
                .filter(|p| p.fees.missing_clearance_fees())
                .map(|p| p.id)
                .collect();
            if !missing.is_empty() {
                info!(
                    consolidated.id = %group_id,
                    packages = ?missing,
                    "Group cannot be marked ready until fees are entered"
                );
                return Err(WorkflowError::FeesRequired {
                    package_ids: missing,
                });
            }
        }

        let mut succeeded = Vec::with_capacity(members.len());
        let mut failed = Vec::new();
        let mut already_there = 0;
        for member in &members {
            // Moved by an earlier partial attempt or on its own
            if member.status == target {
                already_there += 1;
                continue;
            }
            match self
                .status_service
                .transition(member.id, target, actor, options.reason.clone(), options.notify)
                .await
            {
                Ok(_) => succeeded.push(member.id),
                Err(e) => {
                    warn!(
                        consolidated.id = %group_id,
                        package.id = %member.id,
                        error = %e,
                        "Member status change failed"
                    );
                    failed.push(FailedItem::new(member.id, &e));
                }
            }
        }

        if !failed.is_empty() {
            warn!(
                consolidated.id = %group_id,
                target = %target,
                succeeded = succeeded.len(),
                failed = failed.len(),
                "Group status left unchanged after partial member failure"
            );
            let consolidated = self
                .store
                .find_consolidated(group_id)
                .await?
                .unwrap_or(group);
            return Ok(ConsolidatedUpdate::Partial {
                consolidated,
                succeeded,
                failed,
            });
        }

        let consolidated = retry_on_conflict(
            "update_consolidated_status",
            self.config.max_conflict_retries,
            || self.mirror_status(group_id, target, actor, options.reason.clone()),
        )
        .await?;

        info!(
            consolidated.id = %group_id,
            tracking_number = %consolidated.tracking_number,
            status = %target,
            members_updated = succeeded.len(),
            already_there,
            "Consolidated status updated"
        );
        Ok(ConsolidatedUpdate::Applied {
            consolidated,
            members_updated: succeeded.len(),
        })
    }

    /// Write the group's own status once all members have moved
    async fn mirror_status(
        &self,
        group_id: ConsolidatedId,
        target: PackageStatus,
        actor: ActorId,
        reason: Option<String>,
    ) -> Result<ConsolidatedPackage, WorkflowError> {
        let mut tx = self.store.begin().await?;
        let group = tx
            .consolidated_for_update(group_id)
            .await?
            .filter(|g| g.is_active)
            .ok_or_else(|| WorkflowError::group_not_found(group_id))?;

        let from = group.status;
        if !from.can_transition_to(target) {
            return Err(WorkflowError::InvalidTransition { from, to: target });
        }

        let saved = tx
            .save_consolidated(&ConsolidatedPackage {
                status: target,
                updated_at: Utc::now(),
                ..group
            })
            .await?;
        tx.record(AuditEntry::status_change(
            EntityRef::Consolidated(group_id),
            actor,
            from,
            target,
            reason,
        ))
        .await?;
        tx.commit().await?;
        Ok(saved)
    }
}
