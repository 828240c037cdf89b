// Domain model for packages, consolidated groups and their status history

pub mod consolidated;
pub mod history;
pub mod ids;
pub mod package;
pub mod status;

pub use consolidated::{ConsolidatedPackage, ConsolidationTotals, NewConsolidatedPackage};
pub use history::{AuditEntry, EntityRef, HistoryAction, StatusHistory};
pub use ids::{ActorId, ConsolidatedId, CustomerId, HistoryId, PackageId};
pub use package::{NewPackage, Package, PackageCharges, PackageFees};
pub use status::{PackageStatus, ParseStatusError};
