use anyhow::Result;
use clap::Parser;

use freight_desk::cli::commands::{
    consolidation, init_config::InitConfigCommand, package, show_how_to_get_started, with_desk,
};
use freight_desk::cli::{Cli, Commands};
use freight_desk::config::{config, ObservabilityConfig};
use freight_desk::models::{ConsolidatedId, EntityRef, PackageId};
use freight_desk::telemetry::{init_telemetry, shutdown_telemetry};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let observability = config()
        .map(|c| c.observability.clone())
        .unwrap_or_else(|_| ObservabilityConfig::default());
    if let Err(e) = init_telemetry(&observability) {
        eprintln!("Warning: Failed to initialize telemetry: {e}");
    }

    let result = tokio::runtime::Runtime::new()?.block_on(run(cli));
    shutdown_telemetry();
    result
}

async fn run(cli: Cli) -> Result<()> {
    let Cli {
        actor,
        json,
        command,
    } = cli;

    match command {
        // Default behavior: no subcommand - explain how to get started
        None => show_how_to_get_started().await,
        Some(Commands::InitConfig { path, force }) => {
            InitConfigCommand::new(path, force).execute().await
        }
        Some(command) => {
            with_desk(actor, json, |desk| async move {
                match command {
                    Commands::Register {
                        tracking,
                        customer,
                        manifest,
                        weight,
                        value,
                        fees,
                    } => {
                        package::register(&desk, tracking, customer, manifest, weight, value, fees)
                            .await
                    }
                    Commands::Show { id } => package::show(&desk, id).await,
                    Commands::Status { id, status, reason } => {
                        package::update_status(&desk, id, status, reason).await
                    }
                    Commands::BulkStatus {
                        status,
                        ids,
                        reason,
                    } => package::bulk_status(&desk, status, ids, reason).await,
                    Commands::Consolidate { customer, ids } => {
                        consolidation::consolidate(&desk, customer, ids).await
                    }
                    Commands::Unconsolidate { group, notes } => {
                        consolidation::unconsolidate(&desk, group, notes).await
                    }
                    Commands::GroupStatus {
                        group,
                        status,
                        reason,
                        no_notify,
                    } => consolidation::group_status(&desk, group, status, reason, !no_notify).await,
                    Commands::AddMembers { group, ids } => {
                        consolidation::add_members(&desk, group, ids).await
                    }
                    Commands::RemoveMember {
                        group,
                        package,
                        reason,
                    } => consolidation::remove_member(&desk, group, package, reason).await,
                    Commands::Charges {
                        id,
                        weight,
                        value,
                        fees,
                    } => package::charges(&desk, id, weight, value, fees).await,
                    Commands::Delete { id, reason } => package::delete(&desk, id, reason).await,
                    Commands::History { id, group } => {
                        let entity = if group {
                            EntityRef::Consolidated(ConsolidatedId(id))
                        } else {
                            EntityRef::Package(PackageId(id))
                        };
                        package::history(&desk, entity).await
                    }
                    Commands::InitConfig { .. } => unreachable!("init-config runs without a desk"),
                }
            })
            .await
        }
    }
}
