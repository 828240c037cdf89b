use anyhow::Result;

use super::{money, Desk};
use crate::models::{ConsolidatedId, ConsolidatedPackage, CustomerId, PackageId, PackageStatus};
use crate::workflows::{ConsolidatedUpdate, ConsolidatedUpdateOptions, WorkflowError};

fn print_group(group: &ConsolidatedPackage) {
    println!("📦 Consolidated #{} ({})", group.id, group.tracking_number);
    println!("   👤 Customer: {}", group.customer_id);
    println!("   🚦 Status: {}", group.status);
    println!(
        "   📊 {} packages, {} kg, declared value {}",
        group.totals.quantity,
        group.totals.weight_kg,
        money(group.totals.declared_value)
    );
    println!(
        "   💰 Fees: freight {}, customs {}, storage {}, delivery {} (total {})",
        money(group.totals.freight),
        money(group.totals.customs),
        money(group.totals.storage),
        money(group.totals.delivery),
        money(group.totals.total_cost)
    );
    if !group.is_active {
        println!("   ⛔ Inactive");
    }
    if let Some(notes) = &group.notes {
        println!("   📝 {notes}");
    }
}

pub async fn consolidate(desk: &Desk, customer: i64, ids: Vec<i64>) -> Result<()> {
    let ids: Vec<PackageId> = ids.into_iter().map(PackageId).collect();
    let group = desk
        .engine
        .consolidate(&ids, CustomerId(customer), desk.actor)
        .await?;
    if !desk.emit_json(&group)? {
        println!("✅ Consolidated {} packages", group.totals.quantity);
        print_group(&group);
    }
    Ok(())
}

pub async fn unconsolidate(desk: &Desk, group: i64, notes: Option<String>) -> Result<()> {
    let released = desk
        .engine
        .unconsolidate(ConsolidatedId(group), desk.actor, notes)
        .await?;
    if !desk.emit_json(&released)? {
        println!("✂️  Group #{group} broken up, {} packages released", released.len());
        for package in &released {
            println!("   📦 #{} ({}) {}", package.id, package.tracking_number, package.status);
        }
    }
    Ok(())
}

pub async fn group_status(
    desk: &Desk,
    group: i64,
    status: PackageStatus,
    reason: Option<String>,
    notify: bool,
) -> Result<()> {
    let outcome = desk
        .coordinator
        .update_consolidated_status(
            ConsolidatedId(group),
            status,
            desk.actor,
            ConsolidatedUpdateOptions { reason, notify },
        )
        .await;

    let outcome = match outcome {
        Err(WorkflowError::FeesRequired { package_ids }) if !desk.json => {
            println!("💰 Fees must be entered before group #{group} can be marked ready:");
            for id in &package_ids {
                println!("   📦 #{id}  →  freight-desk charges {id} --customs ... --storage ... --delivery ...");
            }
            return Err(WorkflowError::FeesRequired { package_ids }.into());
        }
        other => other?,
    };

    if desk.emit_json(&outcome)? {
        return Ok(());
    }
    match &outcome {
        ConsolidatedUpdate::Applied {
            consolidated,
            members_updated,
        } => {
            println!(
                "✅ Group {} and its {} packages are now {}",
                consolidated.tracking_number, members_updated, consolidated.status
            );
        }
        ConsolidatedUpdate::Partial {
            consolidated,
            succeeded,
            failed,
        } => {
            println!(
                "⚠️  Group {} stays {}: {} packages moved to {status}, {} did not",
                consolidated.tracking_number,
                consolidated.status,
                succeeded.len(),
                failed.len()
            );
            for item in failed {
                println!("   ❌ #{} [{}] {}", item.package_id, item.kind, item.message);
            }
            println!("💡 Packages that moved keep their new status; fix the rest and retry");
        }
    }
    Ok(())
}

pub async fn add_members(desk: &Desk, group: i64, ids: Vec<i64>) -> Result<()> {
    let ids: Vec<PackageId> = ids.into_iter().map(PackageId).collect();
    let group = desk
        .engine
        .add_packages(ConsolidatedId(group), &ids, desk.actor)
        .await?;
    if !desk.emit_json(&group)? {
        println!("✅ Packages added");
        print_group(&group);
    }
    Ok(())
}

pub async fn remove_member(
    desk: &Desk,
    group: i64,
    package: i64,
    reason: Option<String>,
) -> Result<()> {
    let group = desk
        .engine
        .remove_package(ConsolidatedId(group), PackageId(package), desk.actor, reason)
        .await?;
    if !desk.emit_json(&group)? {
        println!("✅ Package #{package} removed");
        if group.is_dissolved() {
            println!("   ⛔ Group {} had no members left and was dissolved", group.tracking_number);
        } else {
            print_group(&group);
        }
    }
    Ok(())
}
