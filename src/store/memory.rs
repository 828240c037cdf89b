// In-process store with an optional JSON snapshot file.
//
// Transactions own the state mutex for their whole lifetime, so writers are
// fully serialized. Each transaction edits a working copy of the rows that
// replaces the shared rows only on commit. History is append-only and never
// copied: a transaction collects its new entries and commit appends them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use super::{AuditRecorder, Store, StoreError, StoreTransaction};
use crate::models::{
    AuditEntry, ConsolidatedId, ConsolidatedPackage, EntityRef, HistoryId, NewConsolidatedPackage,
    NewPackage, Package, PackageId, PackageStatus, StatusHistory,
};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    packages: BTreeMap<PackageId, Package>,
    groups: BTreeMap<ConsolidatedId, ConsolidatedPackage>,
    history: Vec<StatusHistory>,
    next_package_id: i64,
    next_group_id: i64,
    next_history_id: i64,
}

/// On-disk layout of a snapshot file
#[derive(Debug, Deserialize)]
struct Snapshot {
    version: u32,
    packages: Vec<Package>,
    groups: Vec<ConsolidatedPackage>,
    history: Vec<StatusHistory>,
}

/// Same layout as [`Snapshot`], borrowed for writing
#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    packages: Vec<&'a Package>,
    groups: Vec<&'a ConsolidatedPackage>,
    history: Vec<&'a StatusHistory>,
}

impl MemoryState {
    fn from_snapshot(snapshot: Snapshot) -> Result<Self, StoreError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::Corrupt {
                reason: format!(
                    "snapshot version {} is not supported (expected {})",
                    snapshot.version, SNAPSHOT_VERSION
                ),
            });
        }

        let next_package_id = snapshot.packages.iter().map(|p| p.id.0).max().unwrap_or(0);
        let next_group_id = snapshot.groups.iter().map(|g| g.id.0).max().unwrap_or(0);
        let next_history_id = snapshot.history.iter().map(|h| h.id.0).max().unwrap_or(0);

        Ok(Self {
            packages: snapshot.packages.into_iter().map(|p| (p.id, p)).collect(),
            groups: snapshot.groups.into_iter().map(|g| (g.id, g)).collect(),
            history: snapshot.history,
            next_package_id,
            next_group_id,
            next_history_id,
        })
    }

    /// Copy of the rows and id counters, with no history
    fn rows(&self) -> Self {
        Self {
            packages: self.packages.clone(),
            groups: self.groups.clone(),
            history: Vec::new(),
            next_package_id: self.next_package_id,
            next_group_id: self.next_group_id,
            next_history_id: self.next_history_id,
        }
    }

    fn live_members(&self, id: ConsolidatedId) -> Vec<Package> {
        self.packages
            .values()
            .filter(|p| p.consolidated_id == Some(id) && !p.is_deleted())
            .cloned()
            .collect()
    }
}

/// Store backed by process memory
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store persisted to `path`, loading it if the file exists.
    /// Every commit rewrites the file.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let state = if fs::try_exists(&path).await? {
            let raw = fs::read(&path).await?;
            let snapshot: Snapshot = serde_json::from_slice(&raw)?;
            let state = MemoryState::from_snapshot(snapshot)?;
            info!(
                path = %path.display(),
                packages = state.packages.len(),
                groups = state.groups.len(),
                "Loaded store snapshot"
            );
            state
        } else {
            debug!(path = %path.display(), "No snapshot found, starting empty");
            MemoryState::default()
        };

        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            snapshot_path: Some(path),
        })
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }
}

/// Write the rows of `rows` and the committed plus pending history
async fn write_snapshot(
    path: &Path,
    rows: &MemoryState,
    committed: &[StatusHistory],
    pending: &[StatusHistory],
) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let snapshot = SnapshotRef {
        version: SNAPSHOT_VERSION,
        packages: rows.packages.values().collect(),
        groups: rows.groups.values().collect(),
        history: committed.iter().chain(pending).collect(),
    };
    let body = serde_json::to_vec_pretty(&snapshot)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    snapshot_path: Option<PathBuf>,
}

#[async_trait]
impl AuditRecorder for MemoryTransaction {
    async fn record(&mut self, entry: AuditEntry) -> Result<StatusHistory, StoreError> {
        self.working.next_history_id += 1;
        let record = StatusHistory::from_entry(HistoryId(self.working.next_history_id), entry);
        self.working.history.push(record.clone());
        Ok(record)
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn package_for_update(&mut self, id: PackageId) -> Result<Option<Package>, StoreError> {
        Ok(self.working.packages.get(&id).cloned())
    }

    async fn consolidated_for_update(
        &mut self,
        id: ConsolidatedId,
    ) -> Result<Option<ConsolidatedPackage>, StoreError> {
        Ok(self.working.groups.get(&id).cloned())
    }

    async fn members_of(&mut self, id: ConsolidatedId) -> Result<Vec<Package>, StoreError> {
        Ok(self.working.live_members(id))
    }

    async fn insert_package(&mut self, package: NewPackage) -> Result<Package, StoreError> {
        self.working.next_package_id += 1;
        let now = chrono::Utc::now();
        let row = Package {
            id: PackageId(self.working.next_package_id),
            tracking_number: package.tracking_number,
            customer_id: package.customer_id,
            manifest_id: package.manifest_id,
            weight_kg: package.weight_kg,
            declared_value: package.declared_value,
            fees: package.fees,
            status: PackageStatus::Pending,
            consolidated_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            version: 0,
        };
        self.working.packages.insert(row.id, row.clone());
        Ok(row)
    }

    async fn save_package(&mut self, package: &Package) -> Result<Package, StoreError> {
        let stored = self
            .working
            .packages
            .get_mut(&package.id)
            .ok_or_else(|| StoreError::Corrupt {
                reason: format!("package {} does not exist", package.id),
            })?;
        if stored.version != package.version {
            return Err(StoreError::Conflict {
                entity: EntityRef::Package(package.id),
            });
        }
        *stored = Package {
            version: package.version + 1,
            ..package.clone()
        };
        Ok(stored.clone())
    }

    async fn insert_consolidated(
        &mut self,
        group: NewConsolidatedPackage,
    ) -> Result<ConsolidatedPackage, StoreError> {
        if self
            .working
            .groups
            .values()
            .any(|g| g.tracking_number == group.tracking_number)
        {
            return Err(StoreError::Corrupt {
                reason: format!("duplicate consolidated tracking number {}", group.tracking_number),
            });
        }
        self.working.next_group_id += 1;
        let row = ConsolidatedPackage {
            id: ConsolidatedId(self.working.next_group_id),
            tracking_number: group.tracking_number,
            customer_id: group.customer_id,
            status: group.status,
            totals: group.totals,
            is_active: true,
            notes: None,
            created_at: group.created_at,
            updated_at: group.created_at,
            deactivated_at: None,
            version: 0,
        };
        self.working.groups.insert(row.id, row.clone());
        Ok(row)
    }

    async fn save_consolidated(
        &mut self,
        group: &ConsolidatedPackage,
    ) -> Result<ConsolidatedPackage, StoreError> {
        let stored = self
            .working
            .groups
            .get_mut(&group.id)
            .ok_or_else(|| StoreError::Corrupt {
                reason: format!("consolidated package {} does not exist", group.id),
            })?;
        if stored.version != group.version {
            return Err(StoreError::Conflict {
                entity: EntityRef::Consolidated(group.id),
            });
        }
        *stored = ConsolidatedPackage {
            version: group.version + 1,
            ..group.clone()
        };
        Ok(stored.clone())
    }

    async fn tracking_number_exists(&mut self, tracking_number: &str) -> Result<bool, StoreError> {
        Ok(self
            .working
            .groups
            .values()
            .any(|g| g.tracking_number == tracking_number))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction {
            mut guard,
            mut working,
            snapshot_path,
        } = *self;
        let pending = std::mem::take(&mut working.history);

        // Persist first so a failed write leaves the shared state untouched
        if let Some(path) = snapshot_path {
            write_snapshot(&path, &working, &guard.history, &pending).await?;
        }
        working.history = std::mem::take(&mut guard.history);
        working.history.extend(pending);
        *guard = working;
        Ok(())
    }
}

impl MemoryStore {
    async fn begin_memory(&self) -> MemoryTransaction {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.rows();
        MemoryTransaction {
            guard,
            working,
            snapshot_path: self.snapshot_path.clone(),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(self.begin_memory().await))
    }

    async fn find_package(&self, id: PackageId) -> Result<Option<Package>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.packages.get(&id).cloned())
    }

    async fn find_consolidated(
        &self,
        id: ConsolidatedId,
    ) -> Result<Option<ConsolidatedPackage>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.groups.get(&id).cloned())
    }

    async fn find_members_of(&self, id: ConsolidatedId) -> Result<Vec<Package>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.live_members(id))
    }

    async fn list_packages(&self) -> Result<Vec<Package>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .packages
            .values()
            .filter(|p| !p.is_deleted())
            .cloned()
            .collect())
    }

    async fn history_for(&self, entity: EntityRef) -> Result<Vec<StatusHistory>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .history
            .iter()
            .filter(|h| h.entity == entity)
            .cloned()
            .collect())
    }
}
