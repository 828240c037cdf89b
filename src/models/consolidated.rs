use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ConsolidatedId, CustomerId};
use super::package::Package;
use super::status::PackageStatus;

/// Aggregate sums over the active members of a group.
///
/// Always derived from member rows through [`ConsolidationTotals::from_members`];
/// nothing writes these fields directly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationTotals {
    pub quantity: u32,
    pub weight_kg: f64,
    pub declared_value: i64,
    pub freight: i64,
    pub customs: i64,
    pub storage: i64,
    pub delivery: i64,
    pub total_cost: i64,
}

impl ConsolidationTotals {
    /// Sum the billing fields of every live member. Deleted rows are skipped.
    pub fn from_members<'a, I>(members: I) -> Self
    where
        I: IntoIterator<Item = &'a Package>,
    {
        let mut totals = ConsolidationTotals::default();
        for package in members.into_iter().filter(|p| !p.is_deleted()) {
            totals.quantity += 1;
            totals.weight_kg += package.weight_kg;
            totals.declared_value += package.declared_value;
            totals.freight += package.fees.freight;
            totals.customs += package.fees.customs;
            totals.storage += package.fees.storage;
            totals.delivery += package.fees.delivery;
        }
        totals.total_cost = totals.freight + totals.customs + totals.storage + totals.delivery;
        totals
    }
}

/// A group of packages shipped and billed together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedPackage {
    pub id: ConsolidatedId,
    pub tracking_number: String,
    pub customer_id: CustomerId,
    /// Mirrored lifecycle state of the members
    pub status: PackageStatus,
    pub totals: ConsolidationTotals,
    pub is_active: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl ConsolidatedPackage {
    /// A group with no live members is dissolved even if not yet flagged
    pub fn is_dissolved(&self) -> bool {
        !self.is_active || self.totals.quantity == 0
    }
}

/// Insert payload for a new group row
#[derive(Debug, Clone, PartialEq)]
pub struct NewConsolidatedPackage {
    pub tracking_number: String,
    pub customer_id: CustomerId,
    pub status: PackageStatus,
    pub totals: ConsolidationTotals,
    pub created_at: DateTime<Utc>,
}
