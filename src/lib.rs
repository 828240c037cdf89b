// Freight Desk Library - Package consolidation and status workflows
// This exposes the core components for the operator CLI and for integration

pub mod cli;
pub mod config;
pub mod models;
pub mod notifications;
pub mod store;
pub mod telemetry;
pub mod workflows;

// Re-export key types for easy access
pub use config::{config, init_config, FreightDeskConfig};
pub use models::{
    ActorId, ConsolidatedId, ConsolidatedPackage, CustomerId, NewPackage, Package, PackageCharges,
    PackageFees, PackageId, PackageStatus, StatusHistory,
};
pub use notifications::{LogNotifier, NoopNotifier, NotificationDispatcher, NotificationEvent};
pub use store::{AuditRecorder, MemoryStore, Store, StoreError, StoreTransaction};
pub use telemetry::{create_workflow_span, generate_correlation_id, init_telemetry, shutdown_telemetry};
pub use workflows::{
    BulkStatusReport, ConsolidatedStatusCoordinator, ConsolidatedUpdate, ConsolidatedUpdateOptions,
    ConsolidationEngine, PackageStatusService, StatusTransitionTable, WorkflowError,
};
