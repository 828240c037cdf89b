// Repository interface for packages, groups and their history.
//
// Every mutation goes through a `StoreTransaction`: begin, read rows for
// update, write, record history, commit. Dropping a transaction without
// committing discards its writes.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{
    AuditEntry, ConsolidatedId, ConsolidatedPackage, EntityRef, NewConsolidatedPackage, NewPackage,
    Package, PackageId, StatusHistory,
};

pub mod memory;
#[cfg(feature = "database")]
pub mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "database")]
pub use sqlite::SqliteStore;

/// Errors raised by a storage backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "database")]
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Concurrent modification of {entity}")]
    Conflict { entity: EntityRef },

    #[error("Stored data is corrupt: {reason}")]
    Corrupt { reason: String },

    #[error("Could not generate a unique tracking number after {attempts} attempts")]
    TrackingNumberExhausted { attempts: u32 },
}

impl StoreError {
    /// Lost-update conflicts are retried by the services; nothing else is
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Append-only history sink. Implemented by every store transaction so a
/// history record commits or rolls back together with the row it describes.
#[async_trait]
pub trait AuditRecorder: Send {
    async fn record(&mut self, entry: AuditEntry) -> Result<StatusHistory, StoreError>;
}

/// A unit of work over the store
#[async_trait]
pub trait StoreTransaction: AuditRecorder {
    /// Read a package for update. Returns soft-deleted rows too; callers decide.
    async fn package_for_update(&mut self, id: PackageId) -> Result<Option<Package>, StoreError>;

    async fn consolidated_for_update(
        &mut self,
        id: ConsolidatedId,
    ) -> Result<Option<ConsolidatedPackage>, StoreError>;

    /// Live (not soft-deleted) members of a group
    async fn members_of(&mut self, id: ConsolidatedId) -> Result<Vec<Package>, StoreError>;

    async fn insert_package(&mut self, package: NewPackage) -> Result<Package, StoreError>;

    /// Write a package row. Fails with `Conflict` if the stored version no
    /// longer matches `package.version`; returns the row with its new version.
    async fn save_package(&mut self, package: &Package) -> Result<Package, StoreError>;

    async fn insert_consolidated(
        &mut self,
        group: NewConsolidatedPackage,
    ) -> Result<ConsolidatedPackage, StoreError>;

    /// Versioned write of a group row, same contract as `save_package`
    async fn save_consolidated(
        &mut self,
        group: &ConsolidatedPackage,
    ) -> Result<ConsolidatedPackage, StoreError>;

    async fn tracking_number_exists(&mut self, tracking_number: &str) -> Result<bool, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Read access plus transaction factory
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;

    async fn find_package(&self, id: PackageId) -> Result<Option<Package>, StoreError>;

    async fn find_consolidated(
        &self,
        id: ConsolidatedId,
    ) -> Result<Option<ConsolidatedPackage>, StoreError>;

    async fn find_members_of(&self, id: ConsolidatedId) -> Result<Vec<Package>, StoreError>;

    /// Live packages ordered by id
    async fn list_packages(&self) -> Result<Vec<Package>, StoreError>;

    /// History of one entity, oldest first
    async fn history_for(&self, entity: EntityRef) -> Result<Vec<StatusHistory>, StoreError>;
}
