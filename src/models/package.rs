use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ConsolidatedId, CustomerId, PackageId};
use super::status::PackageStatus;

/// Fee components charged on a package, in cents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageFees {
    pub freight: i64,
    pub customs: i64,
    pub storage: i64,
    pub delivery: i64,
}

impl PackageFees {
    pub fn total(&self) -> i64 {
        self.freight + self.customs + self.storage + self.delivery
    }

    /// True when any clearance fee has not been entered yet.
    /// Freight is billed at intake and is not part of this check.
    pub fn missing_clearance_fees(&self) -> bool {
        self.customs == 0 || self.storage == 0 || self.delivery == 0
    }
}

/// A single physical shipment unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub id: PackageId,
    pub tracking_number: String,
    pub customer_id: CustomerId,
    pub manifest_id: i64,
    pub weight_kg: f64,
    pub declared_value: i64,
    pub fees: PackageFees,
    pub status: PackageStatus,
    /// `None` means the package is tracked individually
    pub consolidated_id: Option<ConsolidatedId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency counter, bumped by the store on every save
    pub version: i64,
}

impl Package {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_consolidated(&self) -> bool {
        self.consolidated_id.is_some()
    }

    pub fn charges(&self) -> PackageCharges {
        PackageCharges {
            weight_kg: self.weight_kg,
            declared_value: self.declared_value,
            fees: self.fees,
        }
    }
}

/// Registration input for a package arriving on a manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPackage {
    pub tracking_number: String,
    pub customer_id: CustomerId,
    pub manifest_id: i64,
    pub weight_kg: f64,
    pub declared_value: i64,
    #[serde(default)]
    pub fees: PackageFees,
}

/// The editable billing fields of a package
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PackageCharges {
    pub weight_kg: f64,
    pub declared_value: i64,
    pub fees: PackageFees,
}
