use anyhow::Result;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::config::{DatabaseConfig, FreightDeskConfig};
use crate::models::{ActorId, PackageFees};
use crate::notifications::LogNotifier;
use crate::store::{MemoryStore, Store};
use crate::workflows::{ConsolidatedStatusCoordinator, ConsolidationEngine, PackageStatusService};

use super::FeeArgs;

pub mod consolidation;
pub mod init_config;
pub mod package;

/// Services wired to the configured store, shared by every command
pub struct Desk {
    pub store: Arc<dyn Store>,
    pub status: Arc<PackageStatusService>,
    pub engine: ConsolidationEngine,
    pub coordinator: ConsolidatedStatusCoordinator,
    pub actor: ActorId,
    pub json: bool,
}

impl Desk {
    pub fn new(store: Arc<dyn Store>, config: &FreightDeskConfig, actor: ActorId, json: bool) -> Self {
        let status = Arc::new(PackageStatusService::with_config(
            store.clone(),
            Arc::new(LogNotifier),
            config.workflow.clone(),
        ));
        Self {
            engine: ConsolidationEngine::with_config(store.clone(), config.workflow.clone()),
            coordinator: ConsolidatedStatusCoordinator::with_config(
                store.clone(),
                status.clone(),
                config.workflow.clone(),
            ),
            status,
            store,
            actor,
            json,
        }
    }

    /// Print `value` as pretty JSON when `--json` was given; returns whether it did
    pub fn emit_json<T: Serialize>(&self, value: &T) -> Result<bool> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        Ok(self.json)
    }
}

/// SQLite when a database is configured, otherwise the snapshot-backed
/// memory store
pub async fn open_store(config: &FreightDeskConfig) -> Result<Arc<dyn Store>> {
    if let Some(database) = &config.database {
        return open_database(database).await;
    }

    let path = Path::new(&config.store.snapshot_path);
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await?;
    }
    Ok(Arc::new(MemoryStore::open(path).await?))
}

#[cfg(feature = "database")]
async fn open_database(database: &DatabaseConfig) -> Result<Arc<dyn Store>> {
    let store = crate::store::SqliteStore::connect(database).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "database"))]
async fn open_database(database: &DatabaseConfig) -> Result<Arc<dyn Store>> {
    anyhow::bail!(
        "Database {} is configured but freight-desk was built without the `database` feature",
        database.url
    )
}

pub async fn with_desk<F, Fut, R>(actor: Option<i64>, json: bool, f: F) -> Result<R>
where
    F: FnOnce(Desk) -> Fut,
    Fut: std::future::Future<Output = Result<R>>,
{
    let config = crate::config::config()?;
    let actor = ActorId(actor.unwrap_or(config.desk.default_actor_id));

    match open_store(config).await {
        Ok(store) => f(Desk::new(store, config, actor, json)).await,
        Err(e) => {
            println!("❌ Failed to open store: {e:#}");
            Err(e)
        }
    }
}

impl FeeArgs {
    /// Overlay the given fees on `base`
    pub fn apply(&self, base: PackageFees) -> PackageFees {
        PackageFees {
            freight: self.freight.unwrap_or(base.freight),
            customs: self.customs.unwrap_or(base.customs),
            storage: self.storage.unwrap_or(base.storage),
            delivery: self.delivery.unwrap_or(base.delivery),
        }
    }
}

/// Cents as a decimal amount
pub fn money(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    format!("{sign}{}.{:02}", cents.abs() / 100, cents.abs() % 100)
}

pub async fn show_how_to_get_started() -> Result<()> {
    println!("📦 Freight Desk - Package consolidation and status tracking");
    println!();
    println!("Packages:");
    println!("  📥 freight-desk register --tracking T --customer C   # Add a package");
    println!("  🔎 freight-desk show <id>                            # Inspect a package");
    println!("  🚚 freight-desk status <id> <status>                 # Move a package");
    println!("  📋 freight-desk bulk-status <status> <ids>...        # Move many packages");
    println!();
    println!("Consolidation:");
    println!("  📦 freight-desk consolidate --customer C <ids>...    # Group packages");
    println!("  🔀 freight-desk group-status <group> <status>        # Move a whole group");
    println!("  ✂️  freight-desk unconsolidate <group>                # Break a group up");
    println!();
    println!("💡 Run 'freight-desk init-config' to write a configuration file first.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_formatting() {
        assert_eq!(money(0), "0.00");
        assert_eq!(money(12_345), "123.45");
        assert_eq!(money(-5), "-0.05");
    }

    #[test]
    fn test_fee_overlay_keeps_unset_fees() {
        let base = PackageFees {
            freight: 100,
            customs: 200,
            storage: 300,
            delivery: 400,
        };
        let args = FeeArgs {
            customs: Some(250),
            ..FeeArgs::default()
        };
        let fees = args.apply(base);
        assert_eq!(fees.customs, 250);
        assert_eq!(fees.freight, 100);
        assert_eq!(fees.delivery, 400);
    }
}
