// Append-only audit trail entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{ActorId, ConsolidatedId, HistoryId, PackageId};
use super::status::PackageStatus;

/// The row a history entry is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    Package(PackageId),
    Consolidated(ConsolidatedId),
}

impl EntityRef {
    pub fn kind(&self) -> &'static str {
        match self {
            EntityRef::Package(_) => "package",
            EntityRef::Consolidated(_) => "consolidated_package",
        }
    }

    pub fn raw_id(&self) -> i64 {
        match self {
            EntityRef::Package(id) => id.0,
            EntityRef::Consolidated(id) => id.0,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.kind(), self.raw_id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Registered,
    StatusChanged,
    Consolidated,
    Unconsolidated,
    MembersAdded,
    MemberRemoved,
    ChargesUpdated,
    Deleted,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Registered => "registered",
            HistoryAction::StatusChanged => "status_changed",
            HistoryAction::Consolidated => "consolidated",
            HistoryAction::Unconsolidated => "unconsolidated",
            HistoryAction::MembersAdded => "members_added",
            HistoryAction::MemberRemoved => "member_removed",
            HistoryAction::ChargesUpdated => "charges_updated",
            HistoryAction::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let action = match s {
            "registered" => HistoryAction::Registered,
            "status_changed" => HistoryAction::StatusChanged,
            "consolidated" => HistoryAction::Consolidated,
            "unconsolidated" => HistoryAction::Unconsolidated,
            "members_added" => HistoryAction::MembersAdded,
            "member_removed" => HistoryAction::MemberRemoved,
            "charges_updated" => HistoryAction::ChargesUpdated,
            "deleted" => HistoryAction::Deleted,
            _ => return None,
        };
        Some(action)
    }
}

/// What a caller hands to the audit recorder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entity: EntityRef,
    pub actor: ActorId,
    pub action: HistoryAction,
    pub from_status: Option<PackageStatus>,
    pub to_status: PackageStatus,
    pub reason: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn status_change(
        entity: EntityRef,
        actor: ActorId,
        from: PackageStatus,
        to: PackageStatus,
        reason: Option<String>,
    ) -> Self {
        Self {
            entity,
            actor,
            action: HistoryAction::StatusChanged,
            from_status: Some(from),
            to_status: to,
            reason,
            recorded_at: Utc::now(),
        }
    }

    /// An entry that leaves the status untouched (grouping, charges, deletion)
    pub fn event(
        entity: EntityRef,
        actor: ActorId,
        action: HistoryAction,
        status: PackageStatus,
        reason: Option<String>,
    ) -> Self {
        Self {
            entity,
            actor,
            action,
            from_status: Some(status),
            to_status: status,
            reason,
            recorded_at: Utc::now(),
        }
    }
}

/// Immutable, persisted history record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusHistory {
    pub id: HistoryId,
    pub entity: EntityRef,
    pub actor: ActorId,
    pub action: HistoryAction,
    pub from_status: Option<PackageStatus>,
    pub to_status: PackageStatus,
    pub reason: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl StatusHistory {
    pub fn from_entry(id: HistoryId, entry: AuditEntry) -> Self {
        Self {
            id,
            entity: entry.entity,
            actor: entry.actor,
            action: entry.action,
            from_status: entry.from_status,
            to_status: entry.to_status,
            reason: entry.reason,
            recorded_at: entry.recorded_at,
        }
    }

    pub fn is_transition(&self) -> bool {
        self.action == HistoryAction::StatusChanged
    }
}
