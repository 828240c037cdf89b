// Customer notification seam. Delivery (mail, SMS) lives outside this crate;
// the workflows only hand events to a dispatcher and never wait on it.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::models::{CustomerId, PackageStatus};

/// Events a customer may be told about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    PackageStatusChanged(PackageStatus),
}

impl NotificationEvent {
    pub fn name(&self) -> String {
        match self {
            NotificationEvent::PackageStatusChanged(status) => format!("package.{status}"),
        }
    }
}

/// Fire-and-forget notification sink
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(
        &self,
        recipient: CustomerId,
        event: NotificationEvent,
        payload: Value,
    ) -> Result<()>;
}

/// Emits a structured log line per notification
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl NotificationDispatcher for LogNotifier {
    async fn notify(
        &self,
        recipient: CustomerId,
        event: NotificationEvent,
        payload: Value,
    ) -> Result<()> {
        info!(
            customer.id = %recipient,
            event = %event.name(),
            payload = %payload,
            "Customer notification queued"
        );
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct NoopNotifier;

#[async_trait]
impl NotificationDispatcher for NoopNotifier {
    async fn notify(&self, _: CustomerId, _: NotificationEvent, _: Value) -> Result<()> {
        Ok(())
    }
}
