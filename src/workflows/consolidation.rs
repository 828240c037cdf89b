// Grouping individual packages into consolidated shipments and keeping the
// group's totals in step with its members.

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, Instrument};

use super::errors::WorkflowError;
use super::retry_on_conflict;
use crate::config::WorkflowConfig;
use crate::models::{
    ActorId, AuditEntry, ConsolidatedId, ConsolidatedPackage, ConsolidationTotals, CustomerId,
    EntityRef, HistoryAction, NewConsolidatedPackage, Package, PackageCharges, PackageId,
};
use crate::store::{Store, StoreError, StoreTransaction};
use crate::telemetry::{create_workflow_span, generate_correlation_id};

/// Smallest group `consolidate` will create
pub const MIN_CONSOLIDATION_SIZE: usize = 2;

// No 0/O or 1/I so numbers survive being read over the phone
const TRACKING_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const TRACKING_SUFFIX_LEN: usize = 8;

/// Result of editing a package's billing fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargesUpdate {
    pub package: Package,
    /// The parent group with recomputed totals, when the package is a member
    pub consolidated: Option<ConsolidatedPackage>,
}

pub struct ConsolidationEngine {
    store: Arc<dyn Store>,
    config: WorkflowConfig,
}

fn dedupe(ids: &[PackageId]) -> Vec<PackageId> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

fn random_suffix() -> String {
    let mut rng = rand::rng();
    (0..TRACKING_SUFFIX_LEN)
        .map(|_| TRACKING_ALPHABET[rng.random_range(0..TRACKING_ALPHABET.len())] as char)
        .collect()
}

/// Load a live package or fail with `NotFound`
async fn live_package(
    tx: &mut dyn StoreTransaction,
    id: PackageId,
) -> Result<Package, WorkflowError> {
    tx.package_for_update(id)
        .await?
        .filter(|p| !p.is_deleted())
        .ok_or_else(|| WorkflowError::package_not_found(id))
}

/// Load an active group or fail with `NotFound`
async fn active_group(
    tx: &mut dyn StoreTransaction,
    id: ConsolidatedId,
) -> Result<ConsolidatedPackage, WorkflowError> {
    tx.consolidated_for_update(id)
        .await?
        .filter(|g| g.is_active)
        .ok_or_else(|| WorkflowError::group_not_found(id))
}

/// Re-sum the group's live members into its totals. Writes the group row
/// only when the sums actually changed.
async fn refresh_totals(
    tx: &mut dyn StoreTransaction,
    group: ConsolidatedPackage,
) -> Result<ConsolidatedPackage, StoreError> {
    let members = tx.members_of(group.id).await?;
    let totals = ConsolidationTotals::from_members(&members);
    if totals == group.totals {
        return Ok(group);
    }
    debug!(
        consolidated.id = %group.id,
        quantity = totals.quantity,
        total_cost = totals.total_cost,
        "Consolidation totals recomputed"
    );
    tx.save_consolidated(&ConsolidatedPackage {
        totals,
        updated_at: Utc::now(),
        ..group
    })
    .await
}

/// Deactivate a group whose last member left
async fn dissolve_if_empty(
    tx: &mut dyn StoreTransaction,
    group: ConsolidatedPackage,
    actor: ActorId,
) -> Result<ConsolidatedPackage, StoreError> {
    if group.totals.quantity > 0 || !group.is_active {
        return Ok(group);
    }
    let now = Utc::now();
    let dissolved = tx
        .save_consolidated(&ConsolidatedPackage {
            is_active: false,
            deactivated_at: Some(now),
            updated_at: now,
            ..group
        })
        .await?;
    tx.record(AuditEntry::event(
        EntityRef::Consolidated(dissolved.id),
        actor,
        HistoryAction::Unconsolidated,
        dissolved.status,
        Some(format!(
            "{} dissolved: no members left",
            dissolved.tracking_number
        )),
    ))
    .await?;
    info!(
        consolidated.id = %dissolved.id,
        tracking_number = %dissolved.tracking_number,
        "Consolidation dissolved"
    );
    Ok(dissolved)
}

impl ConsolidationEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_config(store, WorkflowConfig::default())
    }

    pub fn with_config(store: Arc<dyn Store>, config: WorkflowConfig) -> Self {
        Self { store, config }
    }

    pub async fn find_consolidated(
        &self,
        id: ConsolidatedId,
    ) -> Result<ConsolidatedPackage, WorkflowError> {
        self.store
            .find_consolidated(id)
            .await?
            .ok_or_else(|| WorkflowError::group_not_found(id))
    }

    pub async fn members(&self, id: ConsolidatedId) -> Result<Vec<Package>, WorkflowError> {
        Ok(self.store.find_members_of(id).await?)
    }

    /// Group `package_ids` of `customer` into a new consolidated package.
    ///
    /// Packages in a terminal status are not eligible and are left out; the
    /// remaining packages must number at least [`MIN_CONSOLIDATION_SIZE`].
    /// The group mirrors the least advanced member status.
    pub async fn consolidate(
        &self,
        package_ids: &[PackageId],
        customer: CustomerId,
        actor: ActorId,
    ) -> Result<ConsolidatedPackage, WorkflowError> {
        let ids = dedupe(package_ids);
        let correlation_id = generate_correlation_id();
        let span = create_workflow_span("consolidate", None, Some(&correlation_id));

        retry_on_conflict("consolidate", self.config.max_conflict_retries, || {
            self.try_consolidate(&ids, customer, actor)
        })
        .instrument(span)
        .await
    }

    async fn try_consolidate(
        &self,
        ids: &[PackageId],
        customer: CustomerId,
        actor: ActorId,
    ) -> Result<ConsolidatedPackage, WorkflowError> {
        let mut tx = self.store.begin().await?;

        let mut packages = Vec::with_capacity(ids.len());
        for &id in ids {
            packages.push(live_package(tx.as_mut(), id).await?);
        }

        let eligible = self
            .check_eligibility(tx.as_mut(), packages, customer)
            .await?;
        if eligible.len() < MIN_CONSOLIDATION_SIZE {
            return Err(WorkflowError::InsufficientPackages {
                eligible: eligible.len(),
            });
        }

        let tracking_number = self.generate_tracking_number(tx.as_mut()).await?;
        let status = eligible
            .iter()
            .map(|p| p.status)
            .min_by_key(|s| s.lifecycle_rank())
            .ok_or(WorkflowError::InsufficientPackages { eligible: 0 })?;

        let group = tx
            .insert_consolidated(NewConsolidatedPackage {
                tracking_number: tracking_number.clone(),
                customer_id: customer,
                status,
                totals: ConsolidationTotals::default(),
                created_at: Utc::now(),
            })
            .await?;

        let member_count = eligible.len();
        for package in eligible {
            let member = tx
                .save_package(&Package {
                    consolidated_id: Some(group.id),
                    updated_at: Utc::now(),
                    ..package
                })
                .await?;
            tx.record(AuditEntry::event(
                EntityRef::Package(member.id),
                actor,
                HistoryAction::Consolidated,
                member.status,
                Some(format!("Joined consolidation {tracking_number}")),
            ))
            .await?;
        }

        let group = refresh_totals(tx.as_mut(), group).await?;
        tx.record(AuditEntry {
            entity: EntityRef::Consolidated(group.id),
            actor,
            action: HistoryAction::Consolidated,
            from_status: None,
            to_status: group.status,
            reason: Some(format!("Consolidated {member_count} packages")),
            recorded_at: Utc::now(),
        })
        .await?;
        tx.commit().await?;

        info!(
            consolidated.id = %group.id,
            tracking_number = %group.tracking_number,
            customer.id = %customer,
            quantity = group.totals.quantity,
            status = %group.status,
            "Packages consolidated"
        );
        Ok(group)
    }

    /// Ownership and membership checks shared by `consolidate` and
    /// `add_packages`. Returns the packages that may join a group.
    async fn check_eligibility(
        &self,
        tx: &mut dyn StoreTransaction,
        packages: Vec<Package>,
        customer: CustomerId,
    ) -> Result<Vec<Package>, WorkflowError> {
        let foreign: Vec<PackageId> = packages
            .iter()
            .filter(|p| p.customer_id != customer)
            .map(|p| p.id)
            .collect();
        if !foreign.is_empty() {
            return Err(WorkflowError::CrossCustomerViolation {
                customer,
                package_ids: foreign,
            });
        }

        let mut group_active: HashMap<ConsolidatedId, bool> = HashMap::new();
        let mut grouped = Vec::new();
        for package in &packages {
            let Some(group_id) = package.consolidated_id else {
                continue;
            };
            let active = match group_active.get(&group_id) {
                Some(active) => *active,
                None => {
                    let active = tx
                        .consolidated_for_update(group_id)
                        .await?
                        .is_some_and(|g| g.is_active);
                    group_active.insert(group_id, active);
                    active
                }
            };
            if active {
                grouped.push(package.id);
            }
        }
        if !grouped.is_empty() {
            return Err(WorkflowError::AlreadyConsolidated {
                package_ids: grouped,
            });
        }

        let (eligible, terminal): (Vec<Package>, Vec<Package>) = packages
            .into_iter()
            .partition(|p| !p.status.is_terminal());
        if !terminal.is_empty() {
            info!(
                skipped = ?terminal.iter().map(|p| p.id).collect::<Vec<_>>(),
                "Packages in a terminal status are not eligible for consolidation"
            );
        }
        Ok(eligible)
    }

    async fn generate_tracking_number(
        &self,
        tx: &mut dyn StoreTransaction,
    ) -> Result<String, WorkflowError> {
        let date = Utc::now().format("%y%m%d");
        for _ in 0..self.config.tracking_number_attempts {
            let candidate = format!("{}-{}-{}", self.config.tracking_prefix, date, random_suffix());
            if !tx.tracking_number_exists(&candidate).await? {
                return Ok(candidate);
            }
            debug!(tracking_number = %candidate, "Tracking number collision, drawing again");
        }
        Err(StoreError::TrackingNumberExhausted {
            attempts: self.config.tracking_number_attempts,
        }
        .into())
    }

    /// Break a group apart. Members go back to individual tracking and the
    /// group row is deactivated, never deleted.
    pub async fn unconsolidate(
        &self,
        group_id: ConsolidatedId,
        actor: ActorId,
        notes: Option<String>,
    ) -> Result<Vec<Package>, WorkflowError> {
        let correlation_id = generate_correlation_id();
        let entity = EntityRef::Consolidated(group_id).to_string();
        let span = create_workflow_span("unconsolidate", Some(&entity), Some(&correlation_id));

        retry_on_conflict("unconsolidate", self.config.max_conflict_retries, || {
            self.try_unconsolidate(group_id, actor, notes.clone())
        })
        .instrument(span)
        .await
    }

    async fn try_unconsolidate(
        &self,
        group_id: ConsolidatedId,
        actor: ActorId,
        notes: Option<String>,
    ) -> Result<Vec<Package>, WorkflowError> {
        let mut tx = self.store.begin().await?;
        let group = active_group(tx.as_mut(), group_id).await?;
        let tracking_number = group.tracking_number.clone();

        let members = tx.members_of(group_id).await?;
        let mut released = Vec::with_capacity(members.len());
        for package in members {
            let member = tx
                .save_package(&Package {
                    consolidated_id: None,
                    updated_at: Utc::now(),
                    ..package
                })
                .await?;
            tx.record(AuditEntry::event(
                EntityRef::Package(member.id),
                actor,
                HistoryAction::Unconsolidated,
                member.status,
                Some(format!("Released from consolidation {tracking_number}")),
            ))
            .await?;
            released.push(member);
        }

        let group = refresh_totals(tx.as_mut(), group).await?;
        let now = Utc::now();
        let group = tx
            .save_consolidated(&ConsolidatedPackage {
                is_active: false,
                deactivated_at: Some(now),
                updated_at: now,
                notes: notes.clone().or(group.notes.clone()),
                ..group
            })
            .await?;

        let reason = match notes.as_deref() {
            Some(notes) => format!("Unconsolidated {tracking_number}: {notes}"),
            None => format!("Unconsolidated {tracking_number}"),
        };
        tx.record(AuditEntry::event(
            EntityRef::Consolidated(group.id),
            actor,
            HistoryAction::Unconsolidated,
            group.status,
            Some(reason),
        ))
        .await?;
        tx.commit().await?;

        info!(
            consolidated.id = %group_id,
            tracking_number = %tracking_number,
            released = released.len(),
            "Consolidation broken up"
        );
        Ok(released)
    }

    /// Re-sum member weight, value and fees into the group. Idempotent.
    pub async fn recompute_totals(
        &self,
        group_id: ConsolidatedId,
    ) -> Result<ConsolidatedPackage, WorkflowError> {
        retry_on_conflict("recompute_totals", self.config.max_conflict_retries, || async move {
            let mut tx = self.store.begin().await?;
            let group = tx
                .consolidated_for_update(group_id)
                .await?
                .ok_or_else(|| WorkflowError::group_not_found(group_id))?;
            let group = refresh_totals(tx.as_mut(), group).await?;
            tx.commit().await?;
            Ok(group)
        })
        .await
    }

    /// Edit a package's weight, declared value and fees. A member's group
    /// totals are recomputed in the same transaction.
    pub async fn update_package_charges(
        &self,
        package_id: PackageId,
        charges: PackageCharges,
        actor: ActorId,
    ) -> Result<ChargesUpdate, WorkflowError> {
        retry_on_conflict("update_package_charges", self.config.max_conflict_retries, || {
            self.try_update_charges(package_id, charges, actor)
        })
        .await
    }

    async fn try_update_charges(
        &self,
        package_id: PackageId,
        charges: PackageCharges,
        actor: ActorId,
    ) -> Result<ChargesUpdate, WorkflowError> {
        let mut tx = self.store.begin().await?;
        let current = live_package(tx.as_mut(), package_id).await?;
        let previous = current.charges();

        let package = tx
            .save_package(&Package {
                weight_kg: charges.weight_kg,
                declared_value: charges.declared_value,
                fees: charges.fees,
                updated_at: Utc::now(),
                ..current
            })
            .await?;
        tx.record(AuditEntry::event(
            EntityRef::Package(package_id),
            actor,
            HistoryAction::ChargesUpdated,
            package.status,
            Some(format!(
                "Fees {} -> {}, weight {} kg -> {} kg",
                previous.fees.total(),
                charges.fees.total(),
                previous.weight_kg,
                charges.weight_kg
            )),
        ))
        .await?;

        let group = match package.consolidated_id {
            Some(group_id) => tx
                .consolidated_for_update(group_id)
                .await?
                .filter(|g| g.is_active),
            None => None,
        };
        let consolidated = match group {
            Some(group) => Some(refresh_totals(tx.as_mut(), group).await?),
            None => None,
        };
        tx.commit().await?;

        info!(
            package.id = %package_id,
            fees_total = charges.fees.total(),
            consolidated.id = ?package.consolidated_id,
            "Package charges updated"
        );
        Ok(ChargesUpdate {
            package,
            consolidated,
        })
    }

    /// Join more packages to an active group. Same eligibility rules as
    /// `consolidate`; the group's mirrored status is left as it is.
    pub async fn add_packages(
        &self,
        group_id: ConsolidatedId,
        package_ids: &[PackageId],
        actor: ActorId,
    ) -> Result<ConsolidatedPackage, WorkflowError> {
        let ids = dedupe(package_ids);
        retry_on_conflict("add_packages", self.config.max_conflict_retries, || {
            self.try_add_packages(group_id, &ids, actor)
        })
        .await
    }

    async fn try_add_packages(
        &self,
        group_id: ConsolidatedId,
        ids: &[PackageId],
        actor: ActorId,
    ) -> Result<ConsolidatedPackage, WorkflowError> {
        let mut tx = self.store.begin().await?;
        let group = active_group(tx.as_mut(), group_id).await?;

        let mut packages = Vec::with_capacity(ids.len());
        for &id in ids {
            packages.push(live_package(tx.as_mut(), id).await?);
        }
        let eligible = self
            .check_eligibility(tx.as_mut(), packages, group.customer_id)
            .await?;
        if eligible.is_empty() {
            return Err(WorkflowError::InsufficientPackages { eligible: 0 });
        }

        let added = eligible.len();
        for package in eligible {
            let member = tx
                .save_package(&Package {
                    consolidated_id: Some(group_id),
                    updated_at: Utc::now(),
                    ..package
                })
                .await?;
            tx.record(AuditEntry::event(
                EntityRef::Package(member.id),
                actor,
                HistoryAction::MembersAdded,
                member.status,
                Some(format!("Joined consolidation {}", group.tracking_number)),
            ))
            .await?;
        }

        let group = refresh_totals(tx.as_mut(), group).await?;
        tx.record(AuditEntry::event(
            EntityRef::Consolidated(group_id),
            actor,
            HistoryAction::MembersAdded,
            group.status,
            Some(format!("Added {added} packages")),
        ))
        .await?;
        tx.commit().await?;

        info!(
            consolidated.id = %group_id,
            added,
            quantity = group.totals.quantity,
            "Packages added to consolidation"
        );
        Ok(group)
    }

    /// Detach one member. Removing the last member dissolves the group.
    pub async fn remove_package(
        &self,
        group_id: ConsolidatedId,
        package_id: PackageId,
        actor: ActorId,
        reason: Option<String>,
    ) -> Result<ConsolidatedPackage, WorkflowError> {
        retry_on_conflict("remove_package", self.config.max_conflict_retries, || {
            self.try_remove_package(group_id, package_id, actor, reason.clone())
        })
        .await
    }

    async fn try_remove_package(
        &self,
        group_id: ConsolidatedId,
        package_id: PackageId,
        actor: ActorId,
        reason: Option<String>,
    ) -> Result<ConsolidatedPackage, WorkflowError> {
        let mut tx = self.store.begin().await?;
        let group = active_group(tx.as_mut(), group_id).await?;
        let package = live_package(tx.as_mut(), package_id).await?;
        if package.consolidated_id != Some(group_id) {
            return Err(WorkflowError::package_not_found(package_id));
        }

        let member = tx
            .save_package(&Package {
                consolidated_id: None,
                updated_at: Utc::now(),
                ..package
            })
            .await?;
        tx.record(AuditEntry::event(
            EntityRef::Package(member.id),
            actor,
            HistoryAction::MemberRemoved,
            member.status,
            reason
                .clone()
                .or_else(|| Some(format!("Removed from consolidation {}", group.tracking_number))),
        ))
        .await?;
        tx.record(AuditEntry::event(
            EntityRef::Consolidated(group_id),
            actor,
            HistoryAction::MemberRemoved,
            group.status,
            Some(format!("Removed package {}", member.tracking_number)),
        ))
        .await?;

        let group = refresh_totals(tx.as_mut(), group).await?;
        let group = dissolve_if_empty(tx.as_mut(), group, actor).await?;
        tx.commit().await?;

        info!(
            consolidated.id = %group_id,
            package.id = %package_id,
            quantity = group.totals.quantity,
            active = group.is_active,
            "Package removed from consolidation"
        );
        Ok(group)
    }

    /// Soft-delete a package, detaching it from any group first
    pub async fn soft_delete_package(
        &self,
        package_id: PackageId,
        actor: ActorId,
        reason: Option<String>,
    ) -> Result<Package, WorkflowError> {
        retry_on_conflict("soft_delete_package", self.config.max_conflict_retries, || {
            self.try_soft_delete(package_id, actor, reason.clone())
        })
        .await
    }

    async fn try_soft_delete(
        &self,
        package_id: PackageId,
        actor: ActorId,
        reason: Option<String>,
    ) -> Result<Package, WorkflowError> {
        let mut tx = self.store.begin().await?;
        let package = live_package(tx.as_mut(), package_id).await?;
        let former_group = package.consolidated_id;
        let now = Utc::now();

        let deleted = tx
            .save_package(&Package {
                consolidated_id: None,
                deleted_at: Some(now),
                updated_at: now,
                ..package
            })
            .await?;
        tx.record(AuditEntry::event(
            EntityRef::Package(package_id),
            actor,
            HistoryAction::Deleted,
            deleted.status,
            reason,
        ))
        .await?;

        if let Some(group_id) = former_group {
            if let Some(group) = tx
                .consolidated_for_update(group_id)
                .await?
                .filter(|g| g.is_active)
            {
                let group = refresh_totals(tx.as_mut(), group).await?;
                dissolve_if_empty(tx.as_mut(), group, actor).await?;
            }
        }
        tx.commit().await?;

        info!(package.id = %package_id, "Package soft-deleted");
        Ok(deleted)
    }
}
