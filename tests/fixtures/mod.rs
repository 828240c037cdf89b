//! Shared builders for freight desk integration tests
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};

use freight_desk::models::{
    ActorId, CustomerId, NewPackage, Package, PackageFees, PackageId, PackageStatus,
};
use freight_desk::notifications::{NotificationDispatcher, NotificationEvent};
use freight_desk::store::{MemoryStore, Store};
use freight_desk::workflows::{
    ConsolidatedStatusCoordinator, ConsolidationEngine, PackageStatusService,
};

pub const CUSTOMER: CustomerId = CustomerId(501);
pub const OTHER_CUSTOMER: CustomerId = CustomerId(777);
pub const CLERK: ActorId = ActorId(12);

/// Records every notification it is handed
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    pub sent: Arc<Mutex<Vec<(CustomerId, NotificationEvent, Value)>>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.sent.lock().unwrap().iter().map(|(_, e, _)| *e).collect()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn notify(
        &self,
        recipient: CustomerId,
        event: NotificationEvent,
        payload: Value,
    ) -> Result<()> {
        self.sent.lock().unwrap().push((recipient, event, payload));
        Ok(())
    }
}

/// Always fails, counting how often it was asked
#[derive(Debug, Default, Clone)]
pub struct FailingNotifier {
    pub attempts: Arc<Mutex<u32>>,
}

#[async_trait]
impl NotificationDispatcher for FailingNotifier {
    async fn notify(&self, _: CustomerId, _: NotificationEvent, _: Value) -> Result<()> {
        *self.attempts.lock().unwrap() += 1;
        anyhow::bail!("mail relay unreachable")
    }
}

/// All workflow services over one store
pub struct TestDesk {
    pub store: Arc<dyn Store>,
    pub notifier: RecordingNotifier,
    pub status: Arc<PackageStatusService>,
    pub engine: ConsolidationEngine,
    pub coordinator: ConsolidatedStatusCoordinator,
}

impl TestDesk {
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    pub fn with_store(store: MemoryStore) -> Self {
        Self::over(Arc::new(store))
    }

    pub fn over(store: Arc<dyn Store>) -> Self {
        let notifier = RecordingNotifier::default();
        let status = Arc::new(PackageStatusService::new(
            store.clone(),
            Arc::new(notifier.clone()),
        ));
        Self {
            engine: ConsolidationEngine::new(store.clone()),
            coordinator: ConsolidatedStatusCoordinator::new(store.clone(), status.clone()),
            status,
            notifier,
            store,
        }
    }

    pub async fn register(&self, tracking: &str, customer: CustomerId, fees: PackageFees) -> Package {
        self.status
            .register_package(
                NewPackage {
                    tracking_number: tracking.to_string(),
                    customer_id: customer,
                    manifest_id: 90,
                    weight_kg: 4.0,
                    declared_value: 25_000,
                    fees,
                },
                CLERK,
            )
            .await
            .expect("register package")
    }

    /// Three pending packages of [`CUSTOMER`] with full fees
    pub async fn three_packages(&self) -> Vec<PackageId> {
        let mut ids = Vec::new();
        for i in 1..=3 {
            let package = self
                .register(&format!("1Z999AA1000{i}"), CUSTOMER, full_fees())
                .await;
            ids.push(package.id);
        }
        ids
    }

    pub async fn move_to(&self, id: PackageId, status: PackageStatus) -> Package {
        self.status
            .update_status(id, status, CLERK, None)
            .await
            .expect("status change")
    }

    pub async fn package(&self, id: PackageId) -> Package {
        self.store
            .find_package(id)
            .await
            .expect("store read")
            .expect("package exists")
    }
}

/// A legal sequence of moves from pending to `status`
pub fn path_to(status: PackageStatus) -> Vec<PackageStatus> {
    use PackageStatus::*;
    match status {
        Pending => vec![],
        Processing => vec![Processing],
        Shipped => vec![Processing, Shipped],
        Customs => vec![Processing, Customs],
        Ready => vec![Processing, Ready],
        Delivered => vec![Processing, Ready, Delivered],
        Delayed => vec![Delayed],
        Cancelled => vec![Cancelled],
    }
}

pub fn full_fees() -> PackageFees {
    PackageFees {
        freight: 4_500,
        customs: 1_200,
        storage: 300,
        delivery: 800,
    }
}

pub fn fees_without_customs() -> PackageFees {
    PackageFees {
        customs: 0,
        ..full_fees()
    }
}
