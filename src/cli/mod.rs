use clap::{Parser, Subcommand};

use crate::models::PackageStatus;

pub mod commands;

#[derive(Parser)]
#[command(name = "freight-desk")]
#[command(about = "Package consolidation and status tracking for a freight forwarding desk")]
#[command(long_about = "Freight Desk registers packages arriving on manifests, groups a customer's \
                       packages into consolidated shipments and moves packages and groups through \
                       their lifecycle with a full audit trail. Start with 'freight-desk register'.")]
pub struct Cli {
    /// Operator recorded in history (defaults to desk.default_actor_id)
    #[arg(long, global = true, help = "Actor id recorded in status history")]
    pub actor: Option<i64>,
    /// Print results as JSON instead of a human summary
    #[arg(long, global = true, help = "Emit machine-readable JSON output")]
    pub json: bool,
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Register a package arriving on a manifest (starts pending)
    Register {
        #[arg(long, help = "Carrier tracking number of the package")]
        tracking: String,
        #[arg(long, help = "Owning customer id")]
        customer: i64,
        #[arg(long, default_value = "0", help = "Manifest the package arrived on")]
        manifest: i64,
        #[arg(long, default_value = "0", help = "Weight in kilograms")]
        weight: f64,
        #[arg(long, default_value = "0", help = "Declared value in cents")]
        value: i64,
        #[command(flatten)]
        fees: FeeArgs,
    },
    /// Show one package
    Show {
        /// Package id
        id: i64,
    },
    /// Move one package to a new status
    Status {
        /// Package id
        id: i64,
        /// Target status (pending, processing, shipped, customs, ready, delivered, delayed, cancelled)
        status: PackageStatus,
        #[arg(long, help = "Reason recorded in history")]
        reason: Option<String>,
    },
    /// Move several packages to a new status independently
    BulkStatus {
        /// Target status
        status: PackageStatus,
        /// Package ids
        #[arg(required = true, num_args = 1..)]
        ids: Vec<i64>,
        #[arg(long, help = "Reason recorded in history")]
        reason: Option<String>,
    },
    /// Group a customer's packages into one consolidated shipment
    Consolidate {
        #[arg(long, help = "Customer owning every package")]
        customer: i64,
        /// Package ids (at least two eligible)
        #[arg(required = true, num_args = 2..)]
        ids: Vec<i64>,
    },
    /// Break a consolidated shipment back into individual packages
    Unconsolidate {
        /// Consolidated package id
        group: i64,
        #[arg(long, help = "Notes kept on the deactivated group")]
        notes: Option<String>,
    },
    /// Move every member of a consolidated shipment to a new status
    GroupStatus {
        /// Consolidated package id
        group: i64,
        /// Target status
        status: PackageStatus,
        #[arg(long, help = "Reason recorded in history")]
        reason: Option<String>,
        #[arg(long, help = "Do not notify customers about member changes")]
        no_notify: bool,
    },
    /// Add packages to an existing consolidated shipment
    AddMembers {
        /// Consolidated package id
        group: i64,
        /// Package ids
        #[arg(required = true, num_args = 1..)]
        ids: Vec<i64>,
    },
    /// Take one package out of a consolidated shipment
    RemoveMember {
        /// Consolidated package id
        group: i64,
        /// Package id
        package: i64,
        #[arg(long, help = "Reason recorded in history")]
        reason: Option<String>,
    },
    /// Edit a package's weight, declared value or fees
    Charges {
        /// Package id
        id: i64,
        #[arg(long, help = "Weight in kilograms")]
        weight: Option<f64>,
        #[arg(long, help = "Declared value in cents")]
        value: Option<i64>,
        #[command(flatten)]
        fees: FeeArgs,
    },
    /// Soft-delete a package
    Delete {
        /// Package id
        id: i64,
        #[arg(long, help = "Reason recorded in history")]
        reason: Option<String>,
    },
    /// Show the audit trail of a package or consolidated shipment
    History {
        /// Package id, or consolidated package id with --group
        id: i64,
        #[arg(long, help = "Treat the id as a consolidated package id")]
        group: bool,
    },
    /// Write a configuration file with default settings
    InitConfig {
        #[arg(long, default_value = "freight-desk.toml", help = "Where to write the configuration")]
        path: String,
        #[arg(long, help = "Overwrite an existing file")]
        force: bool,
    },
}

/// Fee components in cents. Unset fees keep their current value on edit and
/// default to zero on registration.
#[derive(Debug, Clone, Copy, Default, clap::Args)]
pub struct FeeArgs {
    #[arg(long, help = "Freight fee in cents")]
    pub freight: Option<i64>,
    #[arg(long, help = "Customs clearance fee in cents")]
    pub customs: Option<i64>,
    #[arg(long, help = "Storage fee in cents")]
    pub storage: Option<i64>,
    #[arg(long, help = "Delivery fee in cents")]
    pub delivery: Option<i64>,
}
