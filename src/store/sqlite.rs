// SQLite backend. Lost updates are caught with a `version` column that
// every UPDATE compares and bumps. Transactions start with BEGIN IMMEDIATE
// so a second writer waits on the busy timeout instead of failing its lock
// upgrade halfway through.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Executor, Row, Sqlite, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use super::{AuditRecorder, Store, StoreError, StoreTransaction};
use crate::config::DatabaseConfig;
use crate::models::{
    ActorId, AuditEntry, ConsolidatedId, ConsolidatedPackage, ConsolidationTotals, CustomerId,
    EntityRef, HistoryAction, HistoryId, NewConsolidatedPackage, NewPackage, Package, PackageFees,
    PackageId, PackageStatus, StatusHistory,
};

macro_rules! package_columns {
    () => {
        "id, tracking_number, customer_id, manifest_id, weight_kg, declared_value, \
         freight_fee, customs_fee, storage_fee, delivery_fee, status, consolidated_id, \
         created_at, updated_at, deleted_at, version"
    };
}

macro_rules! group_columns {
    () => {
        "id, tracking_number, customer_id, status, quantity, total_weight_kg, \
         total_declared_value, total_freight, total_customs, total_storage, total_delivery, \
         total_cost, is_active, notes, created_at, updated_at, deactivated_at, version"
    };
}

macro_rules! history_columns {
    () => {
        "id, entity_type, entity_id, actor_id, action, from_status, to_status, reason, recorded_at"
    };
}

fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            reason: format!("bad timestamp '{raw}': {e}"),
        })
}

fn parse_optional_timestamp(raw: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.as_deref().map(parse_timestamp).transpose()
}

fn parse_status(raw: &str) -> Result<PackageStatus, StoreError> {
    raw.parse().map_err(|e| StoreError::Corrupt {
        reason: format!("{e}"),
    })
}

fn package_from_row(row: &SqliteRow) -> Result<Package, StoreError> {
    Ok(Package {
        id: PackageId(row.try_get("id")?),
        tracking_number: row.try_get("tracking_number")?,
        customer_id: CustomerId(row.try_get("customer_id")?),
        manifest_id: row.try_get("manifest_id")?,
        weight_kg: row.try_get("weight_kg")?,
        declared_value: row.try_get("declared_value")?,
        fees: PackageFees {
            freight: row.try_get("freight_fee")?,
            customs: row.try_get("customs_fee")?,
            storage: row.try_get("storage_fee")?,
            delivery: row.try_get("delivery_fee")?,
        },
        status: parse_status(row.try_get::<&str, _>("status")?)?,
        consolidated_id: row
            .try_get::<Option<i64>, _>("consolidated_id")?
            .map(ConsolidatedId),
        created_at: parse_timestamp(row.try_get::<&str, _>("created_at")?)?,
        updated_at: parse_timestamp(row.try_get::<&str, _>("updated_at")?)?,
        deleted_at: parse_optional_timestamp(row.try_get("deleted_at")?)?,
        version: row.try_get("version")?,
    })
}

fn group_from_row(row: &SqliteRow) -> Result<ConsolidatedPackage, StoreError> {
    let quantity: i64 = row.try_get("quantity")?;
    Ok(ConsolidatedPackage {
        id: ConsolidatedId(row.try_get("id")?),
        tracking_number: row.try_get("tracking_number")?,
        customer_id: CustomerId(row.try_get("customer_id")?),
        status: parse_status(row.try_get::<&str, _>("status")?)?,
        totals: ConsolidationTotals {
            quantity: u32::try_from(quantity).map_err(|_| StoreError::Corrupt {
                reason: format!("negative quantity {quantity}"),
            })?,
            weight_kg: row.try_get("total_weight_kg")?,
            declared_value: row.try_get("total_declared_value")?,
            freight: row.try_get("total_freight")?,
            customs: row.try_get("total_customs")?,
            storage: row.try_get("total_storage")?,
            delivery: row.try_get("total_delivery")?,
            total_cost: row.try_get("total_cost")?,
        },
        is_active: row.try_get("is_active")?,
        notes: row.try_get("notes")?,
        created_at: parse_timestamp(row.try_get::<&str, _>("created_at")?)?,
        updated_at: parse_timestamp(row.try_get::<&str, _>("updated_at")?)?,
        deactivated_at: parse_optional_timestamp(row.try_get("deactivated_at")?)?,
        version: row.try_get("version")?,
    })
}

fn history_from_row(row: &SqliteRow) -> Result<StatusHistory, StoreError> {
    let entity_type: &str = row.try_get("entity_type")?;
    let entity_id: i64 = row.try_get("entity_id")?;
    let entity = match entity_type {
        "package" => EntityRef::Package(PackageId(entity_id)),
        "consolidated_package" => EntityRef::Consolidated(ConsolidatedId(entity_id)),
        other => {
            return Err(StoreError::Corrupt {
                reason: format!("unknown history entity type '{other}'"),
            })
        }
    };
    let action_raw: &str = row.try_get("action")?;
    let action = HistoryAction::parse(action_raw).ok_or_else(|| StoreError::Corrupt {
        reason: format!("unknown history action '{action_raw}'"),
    })?;

    Ok(StatusHistory {
        id: HistoryId(row.try_get("id")?),
        entity,
        actor: ActorId(row.try_get("actor_id")?),
        action,
        from_status: row
            .try_get::<Option<&str>, _>("from_status")?
            .map(parse_status)
            .transpose()?,
        to_status: parse_status(row.try_get::<&str, _>("to_status")?)?,
        reason: row.try_get("reason")?,
        recorded_at: parse_timestamp(row.try_get::<&str, _>("recorded_at")?)?,
    })
}

async fn fetch_package<'e, E>(executor: E, id: PackageId) -> Result<Option<Package>, StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(concat!("SELECT ", package_columns!(), " FROM packages WHERE id = ?1"))
        .bind(id.0)
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(package_from_row).transpose()
}

async fn fetch_group<'e, E>(
    executor: E,
    id: ConsolidatedId,
) -> Result<Option<ConsolidatedPackage>, StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(concat!(
        "SELECT ",
        group_columns!(),
        " FROM consolidated_packages WHERE id = ?1"
    ))
    .bind(id.0)
    .fetch_optional(executor)
    .await?;
    row.as_ref().map(group_from_row).transpose()
}

async fn fetch_members<'e, E>(executor: E, id: ConsolidatedId) -> Result<Vec<Package>, StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(concat!(
        "SELECT ",
        package_columns!(),
        " FROM packages WHERE consolidated_id = ?1 AND deleted_at IS NULL ORDER BY id ASC"
    ))
    .bind(id.0)
    .fetch_all(executor)
    .await?;
    rows.iter().map(package_from_row).collect()
}

/// SQLite-backed store
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect, creating the database file and running migrations as configured
    pub async fn connect(database: &DatabaseConfig) -> Result<Self, StoreError> {
        let database_url = database.url.as_str();
        if !Sqlite::database_exists(database_url).await? {
            info!("Creating database at {}", database_url);
            Sqlite::create_database(database_url).await?;
        }

        let options = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(database.busy_timeout_ms));
        let pool = SqlitePoolOptions::new()
            .max_connections(database.max_connections)
            .connect_with(options)
            .await?;

        if database.auto_migrate {
            info!("Running database migrations...");
            sqlx::migrate!("./migrations").run(&pool).await?;
            info!("Database migrations completed");
        }

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn shutdown(&self) {
        info!("Shutting down database connections...");
        self.pool.close().await;
        info!("Database connections closed");
    }
}

pub struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl AuditRecorder for SqliteTransaction {
    async fn record(&mut self, entry: AuditEntry) -> Result<StatusHistory, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO status_history
                (entity_type, entity_id, actor_id, action, from_status, to_status, reason, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(entry.entity.kind())
        .bind(entry.entity.raw_id())
        .bind(entry.actor.0)
        .bind(entry.action.as_str())
        .bind(entry.from_status.map(|s| s.as_str()))
        .bind(entry.to_status.as_str())
        .bind(entry.reason.as_deref())
        .bind(timestamp(&entry.recorded_at))
        .execute(&mut *self.tx)
        .await?;

        Ok(StatusHistory::from_entry(
            HistoryId(result.last_insert_rowid()),
            entry,
        ))
    }
}

#[async_trait]
impl StoreTransaction for SqliteTransaction {
    async fn package_for_update(&mut self, id: PackageId) -> Result<Option<Package>, StoreError> {
        fetch_package(&mut *self.tx, id).await
    }

    async fn consolidated_for_update(
        &mut self,
        id: ConsolidatedId,
    ) -> Result<Option<ConsolidatedPackage>, StoreError> {
        fetch_group(&mut *self.tx, id).await
    }

    async fn members_of(&mut self, id: ConsolidatedId) -> Result<Vec<Package>, StoreError> {
        fetch_members(&mut *self.tx, id).await
    }

    async fn insert_package(&mut self, package: NewPackage) -> Result<Package, StoreError> {
        let now = timestamp(&Utc::now());
        let result = sqlx::query(
            r#"
            INSERT INTO packages
                (tracking_number, customer_id, manifest_id, weight_kg, declared_value,
                 freight_fee, customs_fee, storage_fee, delivery_fee, status,
                 created_at, updated_at, version)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11, 0)
            "#,
        )
        .bind(&package.tracking_number)
        .bind(package.customer_id.0)
        .bind(package.manifest_id)
        .bind(package.weight_kg)
        .bind(package.declared_value)
        .bind(package.fees.freight)
        .bind(package.fees.customs)
        .bind(package.fees.storage)
        .bind(package.fees.delivery)
        .bind(PackageStatus::Pending.as_str())
        .bind(&now)
        .execute(&mut *self.tx)
        .await?;

        let id = PackageId(result.last_insert_rowid());
        fetch_package(&mut *self.tx, id)
            .await?
            .ok_or_else(|| StoreError::Corrupt {
                reason: format!("package {id} vanished after insert"),
            })
    }

    async fn save_package(&mut self, package: &Package) -> Result<Package, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE packages SET
                tracking_number = ?1, customer_id = ?2, manifest_id = ?3, weight_kg = ?4,
                declared_value = ?5, freight_fee = ?6, customs_fee = ?7, storage_fee = ?8,
                delivery_fee = ?9, status = ?10, consolidated_id = ?11, updated_at = ?12,
                deleted_at = ?13, version = version + 1
            WHERE id = ?14 AND version = ?15
            "#,
        )
        .bind(&package.tracking_number)
        .bind(package.customer_id.0)
        .bind(package.manifest_id)
        .bind(package.weight_kg)
        .bind(package.declared_value)
        .bind(package.fees.freight)
        .bind(package.fees.customs)
        .bind(package.fees.storage)
        .bind(package.fees.delivery)
        .bind(package.status.as_str())
        .bind(package.consolidated_id.map(|id| id.0))
        .bind(timestamp(&package.updated_at))
        .bind(package.deleted_at.as_ref().map(timestamp))
        .bind(package.id.0)
        .bind(package.version)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict {
                entity: EntityRef::Package(package.id),
            });
        }
        Ok(Package {
            version: package.version + 1,
            ..package.clone()
        })
    }

    async fn insert_consolidated(
        &mut self,
        group: NewConsolidatedPackage,
    ) -> Result<ConsolidatedPackage, StoreError> {
        let created_at = timestamp(&group.created_at);
        let result = sqlx::query(
            r#"
            INSERT INTO consolidated_packages
                (tracking_number, customer_id, status, quantity, total_weight_kg,
                 total_declared_value, total_freight, total_customs, total_storage,
                 total_delivery, total_cost, is_active, created_at, updated_at, version)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 1, ?12, ?12, 0)
            "#,
        )
        .bind(&group.tracking_number)
        .bind(group.customer_id.0)
        .bind(group.status.as_str())
        .bind(i64::from(group.totals.quantity))
        .bind(group.totals.weight_kg)
        .bind(group.totals.declared_value)
        .bind(group.totals.freight)
        .bind(group.totals.customs)
        .bind(group.totals.storage)
        .bind(group.totals.delivery)
        .bind(group.totals.total_cost)
        .bind(&created_at)
        .execute(&mut *self.tx)
        .await?;

        let id = ConsolidatedId(result.last_insert_rowid());
        fetch_group(&mut *self.tx, id)
            .await?
            .ok_or_else(|| StoreError::Corrupt {
                reason: format!("consolidated package {id} vanished after insert"),
            })
    }

    async fn save_consolidated(
        &mut self,
        group: &ConsolidatedPackage,
    ) -> Result<ConsolidatedPackage, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE consolidated_packages SET
                status = ?1, quantity = ?2, total_weight_kg = ?3, total_declared_value = ?4,
                total_freight = ?5, total_customs = ?6, total_storage = ?7, total_delivery = ?8,
                total_cost = ?9, is_active = ?10, notes = ?11, updated_at = ?12,
                deactivated_at = ?13, version = version + 1
            WHERE id = ?14 AND version = ?15
            "#,
        )
        .bind(group.status.as_str())
        .bind(i64::from(group.totals.quantity))
        .bind(group.totals.weight_kg)
        .bind(group.totals.declared_value)
        .bind(group.totals.freight)
        .bind(group.totals.customs)
        .bind(group.totals.storage)
        .bind(group.totals.delivery)
        .bind(group.totals.total_cost)
        .bind(group.is_active)
        .bind(group.notes.as_deref())
        .bind(timestamp(&group.updated_at))
        .bind(group.deactivated_at.as_ref().map(timestamp))
        .bind(group.id.0)
        .bind(group.version)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict {
                entity: EntityRef::Consolidated(group.id),
            });
        }
        Ok(ConsolidatedPackage {
            version: group.version + 1,
            ..group.clone()
        })
    }

    async fn tracking_number_exists(&mut self, tracking_number: &str) -> Result<bool, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM consolidated_packages WHERE tracking_number = ?1",
        )
        .bind(tracking_number)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count > 0)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        Ok(Box::new(SqliteTransaction { tx }))
    }

    async fn find_package(&self, id: PackageId) -> Result<Option<Package>, StoreError> {
        fetch_package(&self.pool, id).await
    }

    async fn find_consolidated(
        &self,
        id: ConsolidatedId,
    ) -> Result<Option<ConsolidatedPackage>, StoreError> {
        fetch_group(&self.pool, id).await
    }

    async fn find_members_of(&self, id: ConsolidatedId) -> Result<Vec<Package>, StoreError> {
        fetch_members(&self.pool, id).await
    }

    async fn list_packages(&self) -> Result<Vec<Package>, StoreError> {
        let rows = sqlx::query(concat!(
            "SELECT ",
            package_columns!(),
            " FROM packages WHERE deleted_at IS NULL ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(package_from_row).collect()
    }

    async fn history_for(&self, entity: EntityRef) -> Result<Vec<StatusHistory>, StoreError> {
        let rows = sqlx::query(concat!(
            "SELECT ",
            history_columns!(),
            " FROM status_history WHERE entity_type = ?1 AND entity_id = ?2 ORDER BY id ASC"
        ))
        .bind(entity.kind())
        .bind(entity.raw_id())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(history_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        SqliteStore { pool }
    }

    fn new_package() -> NewPackage {
        NewPackage {
            tracking_number: "TRK-100".to_string(),
            customer_id: CustomerId(3),
            manifest_id: 12,
            weight_kg: 2.0,
            declared_value: 9_900,
            fees: PackageFees {
                freight: 100,
                customs: 0,
                storage: 0,
                delivery: 0,
            },
        }
    }

    #[tokio::test]
    async fn test_insert_and_find_package() {
        let store = memory_store().await;
        let mut tx = store.begin().await.unwrap();
        let package = tx.insert_package(new_package()).await.unwrap();
        tx.commit().await.unwrap();

        let found = store.find_package(package.id).await.unwrap().unwrap();
        assert_eq!(found, package);
        assert_eq!(found.status, PackageStatus::Pending);
    }

    #[tokio::test]
    async fn test_versioned_update_detects_stale_row() {
        let store = memory_store().await;
        let mut tx = store.begin().await.unwrap();
        let package = tx.insert_package(new_package()).await.unwrap();

        let mut moved = package.clone();
        moved.status = PackageStatus::Processing;
        let saved = tx.save_package(&moved).await.unwrap();
        assert_eq!(saved.version, 1);

        let err = tx.save_package(&moved).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_history_round_trip() {
        let store = memory_store().await;
        let mut tx = store.begin().await.unwrap();
        let package = tx.insert_package(new_package()).await.unwrap();
        tx.record(AuditEntry::status_change(
            EntityRef::Package(package.id),
            ActorId(5),
            PackageStatus::Pending,
            PackageStatus::Processing,
            Some("picked up".to_string()),
        ))
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let history = store
            .history_for(EntityRef::Package(package.id))
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from_status, Some(PackageStatus::Pending));
        assert_eq!(history[0].to_status, PackageStatus::Processing);
        assert_eq!(history[0].reason.as_deref(), Some("picked up"));
    }
}
