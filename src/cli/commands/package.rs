use anyhow::Result;

use super::{money, Desk};
use crate::cli::FeeArgs;
use crate::models::{
    CustomerId, EntityRef, NewPackage, Package, PackageCharges, PackageId, PackageStatus,
    StatusHistory,
};
use crate::workflows::BulkStatusReport;

fn print_package(package: &Package) {
    println!("📦 Package #{} ({})", package.id, package.tracking_number);
    println!("   👤 Customer: {}", package.customer_id);
    println!("   🧾 Manifest: {}", package.manifest_id);
    println!("   🚦 Status: {}", package.status);
    println!(
        "   ⚖️  Weight: {} kg, declared value {}",
        package.weight_kg,
        money(package.declared_value)
    );
    println!(
        "   💰 Fees: freight {}, customs {}, storage {}, delivery {} (total {})",
        money(package.fees.freight),
        money(package.fees.customs),
        money(package.fees.storage),
        money(package.fees.delivery),
        money(package.fees.total())
    );
    match package.consolidated_id {
        Some(group) => println!("   🔗 Consolidated into group #{group}"),
        None => println!("   🔗 Individual package"),
    }
}

pub async fn register(
    desk: &Desk,
    tracking: String,
    customer: i64,
    manifest: i64,
    weight: f64,
    value: i64,
    fees: FeeArgs,
) -> Result<()> {
    let package = desk
        .status
        .register_package(
            NewPackage {
                tracking_number: tracking,
                customer_id: CustomerId(customer),
                manifest_id: manifest,
                weight_kg: weight,
                declared_value: value,
                fees: fees.apply(Default::default()),
            },
            desk.actor,
        )
        .await?;

    if !desk.emit_json(&package)? {
        println!("✅ Registered package #{}", package.id);
        print_package(&package);
    }
    Ok(())
}

pub async fn show(desk: &Desk, id: i64) -> Result<()> {
    let package = desk.status.find_package(PackageId(id)).await?;
    if !desk.emit_json(&package)? {
        print_package(&package);
        let next = package.status.allowed_next_states();
        if next.is_empty() {
            println!("   🏁 Terminal status, no further moves");
        } else {
            let names: Vec<&str> = next.iter().map(|s| s.as_str()).collect();
            println!("   ➡️  Can move to: {}", names.join(", "));
        }
    }
    Ok(())
}

pub async fn update_status(
    desk: &Desk,
    id: i64,
    status: PackageStatus,
    reason: Option<String>,
) -> Result<()> {
    let package = desk
        .status
        .update_status(PackageId(id), status, desk.actor, reason)
        .await?;
    if !desk.emit_json(&package)? {
        println!("✅ Package #{} is now {}", package.id, package.status);
    }
    Ok(())
}

fn print_bulk_report(report: &BulkStatusReport) {
    println!(
        "📋 Bulk move to {}: {} succeeded, {} failed",
        report.target,
        report.succeeded.len(),
        report.failed.len()
    );
    for id in &report.succeeded {
        println!("   ✅ #{id}");
    }
    for item in &report.failed {
        println!("   ❌ #{} [{}] {}", item.package_id, item.kind, item.message);
    }
}

pub async fn bulk_status(
    desk: &Desk,
    status: PackageStatus,
    ids: Vec<i64>,
    reason: Option<String>,
) -> Result<()> {
    let ids: Vec<PackageId> = ids.into_iter().map(PackageId).collect();
    let report = desk
        .status
        .bulk_update_status(&ids, status, desk.actor, reason)
        .await;
    if !desk.emit_json(&report)? {
        print_bulk_report(&report);
        if !report.is_complete() {
            println!();
            println!("💡 Failed packages need manual attention; see 'freight-desk show <id>'");
        }
    }
    Ok(())
}

pub async fn charges(
    desk: &Desk,
    id: i64,
    weight: Option<f64>,
    value: Option<i64>,
    fees: FeeArgs,
) -> Result<()> {
    let current = desk.status.find_package(PackageId(id)).await?;
    let charges = PackageCharges {
        weight_kg: weight.unwrap_or(current.weight_kg),
        declared_value: value.unwrap_or(current.declared_value),
        fees: fees.apply(current.fees),
    };

    let update = desk
        .engine
        .update_package_charges(current.id, charges, desk.actor)
        .await?;
    if !desk.emit_json(&update)? {
        println!("✅ Charges updated");
        print_package(&update.package);
        if let Some(group) = &update.consolidated {
            println!(
                "   📦 Group {} now totals {} over {} packages",
                group.tracking_number,
                money(group.totals.total_cost),
                group.totals.quantity
            );
        }
    }
    Ok(())
}

pub async fn delete(desk: &Desk, id: i64, reason: Option<String>) -> Result<()> {
    let package = desk
        .engine
        .soft_delete_package(PackageId(id), desk.actor, reason)
        .await?;
    if !desk.emit_json(&package)? {
        println!("🗑️  Package #{} ({}) deleted", package.id, package.tracking_number);
    }
    Ok(())
}

fn print_history(entity: EntityRef, history: &[StatusHistory]) {
    println!("📜 History of {entity}");
    if history.is_empty() {
        println!("   (no entries)");
        return;
    }
    for entry in history {
        let change = match entry.from_status {
            Some(from) if from != entry.to_status => format!("{from} -> {}", entry.to_status),
            _ => entry.to_status.to_string(),
        };
        print!(
            "   {} {} [{}] by actor {}",
            entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            entry.action.as_str(),
            change,
            entry.actor
        );
        match &entry.reason {
            Some(reason) => println!(": {reason}"),
            None => println!(),
        }
    }
}

pub async fn history(desk: &Desk, entity: EntityRef) -> Result<()> {
    let history = desk.status.history(entity).await?;
    if !desk.emit_json(&history)? {
        print_history(entity, &history);
    }
    Ok(())
}
