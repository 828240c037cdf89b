// Outcomes of workflow operations that did not go through

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::models::{CustomerId, EntityRef, PackageId, PackageStatus};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Cannot move from {from} to {to}")]
    InvalidTransition {
        from: PackageStatus,
        to: PackageStatus,
    },

    #[error("Packages {package_ids:?} do not belong to customer {customer}")]
    CrossCustomerViolation {
        customer: CustomerId,
        package_ids: Vec<PackageId>,
    },

    #[error("Packages {package_ids:?} are already part of an active consolidation")]
    AlreadyConsolidated { package_ids: Vec<PackageId> },

    #[error("Consolidation needs at least 2 eligible packages, got {eligible}")]
    InsufficientPackages { eligible: usize },

    #[error("{entity} not found")]
    NotFound { entity: EntityRef },

    #[error("Fees must be entered for packages {package_ids:?} before they can be marked ready")]
    FeesRequired { package_ids: Vec<PackageId> },

    #[error("Persistence failure: {0}")]
    PersistenceFailure(#[from] StoreError),
}

/// Flat discriminant of [`WorkflowError`], cheap to copy into reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidTransition,
    CrossCustomerViolation,
    AlreadyConsolidated,
    InsufficientPackages,
    NotFound,
    FeesRequired,
    PersistenceFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::CrossCustomerViolation => "cross_customer_violation",
            ErrorKind::AlreadyConsolidated => "already_consolidated",
            ErrorKind::InsufficientPackages => "insufficient_packages",
            ErrorKind::NotFound => "not_found",
            ErrorKind::FeesRequired => "fees_required",
            ErrorKind::PersistenceFailure => "persistence_failure",
        };
        f.write_str(name)
    }
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            WorkflowError::CrossCustomerViolation { .. } => ErrorKind::CrossCustomerViolation,
            WorkflowError::AlreadyConsolidated { .. } => ErrorKind::AlreadyConsolidated,
            WorkflowError::InsufficientPackages { .. } => ErrorKind::InsufficientPackages,
            WorkflowError::NotFound { .. } => ErrorKind::NotFound,
            WorkflowError::FeesRequired { .. } => ErrorKind::FeesRequired,
            WorkflowError::PersistenceFailure(_) => ErrorKind::PersistenceFailure,
        }
    }

    /// Expected business-rule outcomes, as opposed to storage breakage
    pub fn is_domain_violation(&self) -> bool {
        !matches!(self, WorkflowError::PersistenceFailure(_))
    }

    pub fn package_not_found(id: PackageId) -> Self {
        WorkflowError::NotFound {
            entity: EntityRef::Package(id),
        }
    }

    pub fn group_not_found(id: crate::models::ConsolidatedId) -> Self {
        WorkflowError::NotFound {
            entity: EntityRef::Consolidated(id),
        }
    }
}

/// One item that a bulk or group operation could not apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    pub package_id: PackageId,
    pub kind: ErrorKind,
    pub message: String,
}

impl FailedItem {
    pub fn new(package_id: PackageId, error: &WorkflowError) -> Self {
        Self {
            package_id,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}
