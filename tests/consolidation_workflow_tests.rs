//! Consolidation lifecycle against the in-memory store: grouping, totals,
//! group-wide status changes and breaking groups up again.

use freight_desk::models::{
    EntityRef, HistoryAction, PackageCharges, PackageFees, PackageId, PackageStatus,
};
use freight_desk::store::Store;
use freight_desk::workflows::{ConsolidatedUpdate, ConsolidatedUpdateOptions, WorkflowError};

mod fixtures;
use fixtures::*;

#[tokio::test]
async fn consolidate_three_pending_then_move_group_to_processing() {
    let desk = TestDesk::new();
    let ids = desk.three_packages().await;

    let group = desk.engine.consolidate(&ids, CUSTOMER, CLERK).await.unwrap();
    assert_eq!(group.totals.quantity, 3);
    assert_eq!(group.status, PackageStatus::Pending);
    assert!(group.is_active);
    assert!(group.tracking_number.starts_with("CONS-"));
    assert_eq!(group.tracking_number.len(), "CONS-YYMMDD-XXXXXXXX".len());

    let outcome = desk
        .coordinator
        .update_consolidated_status(
            group.id,
            PackageStatus::Processing,
            CLERK,
            ConsolidatedUpdateOptions::default(),
        )
        .await
        .unwrap();

    match outcome {
        ConsolidatedUpdate::Applied {
            consolidated,
            members_updated,
        } => {
            assert_eq!(members_updated, 3);
            assert_eq!(consolidated.status, PackageStatus::Processing);
        }
        other => panic!("expected every member to move, got {other:?}"),
    }
    for id in ids {
        assert_eq!(desk.package(id).await.status, PackageStatus::Processing);
    }
}

#[tokio::test]
async fn ready_requires_clearance_fees_on_every_member() {
    let desk = TestDesk::new();
    let p1 = desk.register("1Z-A", CUSTOMER, full_fees()).await;
    let p2 = desk.register("1Z-B", CUSTOMER, fees_without_customs()).await;
    let p3 = desk.register("1Z-C", CUSTOMER, full_fees()).await;

    let group = desk
        .engine
        .consolidate(&[p1.id, p2.id, p3.id], CUSTOMER, CLERK)
        .await
        .unwrap();
    desk.coordinator
        .update_consolidated_status(
            group.id,
            PackageStatus::Processing,
            CLERK,
            ConsolidatedUpdateOptions::default(),
        )
        .await
        .unwrap();
    let history_before = desk
        .store
        .history_for(EntityRef::Package(p1.id))
        .await
        .unwrap()
        .len();

    let err = desk
        .coordinator
        .update_consolidated_status(
            group.id,
            PackageStatus::Ready,
            CLERK,
            ConsolidatedUpdateOptions::default(),
        )
        .await
        .unwrap_err();

    match err {
        WorkflowError::FeesRequired { package_ids } => assert_eq!(package_ids, vec![p2.id]),
        other => panic!("expected FeesRequired, got {other:?}"),
    }

    let group = desk.engine.find_consolidated(group.id).await.unwrap();
    assert_eq!(group.status, PackageStatus::Processing);
    assert_eq!(desk.package(p1.id).await.status, PackageStatus::Processing);
    assert_eq!(desk.package(p3.id).await.status, PackageStatus::Processing);
    assert_eq!(
        desk.store
            .history_for(EntityRef::Package(p1.id))
            .await
            .unwrap()
            .len(),
        history_before
    );
}

#[tokio::test]
async fn cross_customer_request_creates_no_group() {
    let desk = TestDesk::new();
    let mine = desk.register("1Z-MINE", CUSTOMER, full_fees()).await;
    let also_mine = desk.register("1Z-MINE-2", CUSTOMER, full_fees()).await;
    let theirs = desk.register("1Z-THEIRS", OTHER_CUSTOMER, full_fees()).await;

    let err = desk
        .engine
        .consolidate(&[mine.id, also_mine.id, theirs.id], CUSTOMER, CLERK)
        .await
        .unwrap_err();
    match err {
        WorkflowError::CrossCustomerViolation {
            customer,
            package_ids,
        } => {
            assert_eq!(customer, CUSTOMER);
            assert_eq!(package_ids, vec![theirs.id]);
        }
        other => panic!("expected CrossCustomerViolation, got {other:?}"),
    }

    for id in [mine.id, also_mine.id, theirs.id] {
        assert!(desk.package(id).await.consolidated_id.is_none());
    }
    assert!(desk
        .engine
        .find_consolidated(freight_desk::models::ConsolidatedId(1))
        .await
        .is_err());
}

#[tokio::test]
async fn packages_in_an_active_group_cannot_join_another() {
    let desk = TestDesk::new();
    let ids = desk.three_packages().await;
    desk.engine
        .consolidate(&ids[..2], CUSTOMER, CLERK)
        .await
        .unwrap();

    let err = desk
        .engine
        .consolidate(&ids[1..], CUSTOMER, CLERK)
        .await
        .unwrap_err();
    match err {
        WorkflowError::AlreadyConsolidated { package_ids } => assert_eq!(package_ids, vec![ids[1]]),
        other => panic!("expected AlreadyConsolidated, got {other:?}"),
    }
}

#[tokio::test]
async fn terminal_packages_do_not_count_toward_the_minimum() {
    let desk = TestDesk::new();
    let ids = desk.three_packages().await;
    desk.move_to(ids[0], PackageStatus::Cancelled).await;
    desk.move_to(ids[1], PackageStatus::Cancelled).await;

    let err = desk
        .engine
        .consolidate(&ids, CUSTOMER, CLERK)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::InsufficientPackages { eligible: 1 }
    ));

    // Duplicates collapse before counting
    let err = desk
        .engine
        .consolidate(&[ids[2], ids[2]], CUSTOMER, CLERK)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::InsufficientPackages { eligible: 1 }
    ));
}

#[tokio::test]
async fn group_mirrors_least_advanced_member() {
    let desk = TestDesk::new();
    let ids = desk.three_packages().await;
    desk.move_to(ids[0], PackageStatus::Processing).await;
    desk.move_to(ids[0], PackageStatus::Shipped).await;
    desk.move_to(ids[1], PackageStatus::Processing).await;
    desk.move_to(ids[2], PackageStatus::Processing).await;

    let group = desk.engine.consolidate(&ids, CUSTOMER, CLERK).await.unwrap();
    assert_eq!(group.status, PackageStatus::Processing);
}

#[tokio::test]
async fn recompute_totals_is_idempotent() {
    let desk = TestDesk::new();
    let ids = desk.three_packages().await;
    let group = desk.engine.consolidate(&ids, CUSTOMER, CLERK).await.unwrap();

    let first = desk.engine.recompute_totals(group.id).await.unwrap();
    let second = desk.engine.recompute_totals(group.id).await.unwrap();
    assert_eq!(first.totals, second.totals);
    assert_eq!(first.version, second.version);

    let fees = full_fees();
    assert_eq!(first.totals.quantity, 3);
    assert_eq!(first.totals.freight, fees.freight * 3);
    assert_eq!(first.totals.total_cost, fees.total() * 3);
    assert!((first.totals.weight_kg - 12.0).abs() < 1e-9);
}

#[tokio::test]
async fn unconsolidate_then_consolidate_issues_a_new_tracking_number() {
    let desk = TestDesk::new();
    let ids = desk.three_packages().await;
    let first = desk.engine.consolidate(&ids, CUSTOMER, CLERK).await.unwrap();

    let released = desk
        .engine
        .unconsolidate(first.id, CLERK, Some("customer asked to split".to_string()))
        .await
        .unwrap();
    assert_eq!(released.len(), 3);
    assert!(released.iter().all(|p| p.consolidated_id.is_none()));

    let old = desk.engine.find_consolidated(first.id).await.unwrap();
    assert!(!old.is_active);
    assert!(old.deactivated_at.is_some());
    assert_eq!(old.notes.as_deref(), Some("customer asked to split"));

    let history = desk
        .store
        .history_for(EntityRef::Consolidated(first.id))
        .await
        .unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.action, HistoryAction::Unconsolidated);
    assert!(last
        .reason
        .as_deref()
        .unwrap()
        .contains(&first.tracking_number));

    let second = desk.engine.consolidate(&ids, CUSTOMER, CLERK).await.unwrap();
    assert_ne!(second.id, first.id);
    assert_ne!(second.tracking_number, first.tracking_number);

    // An inactive group cannot be broken up twice
    let err = desk
        .engine
        .unconsolidate(first.id, CLERK, None)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound { .. }));
}

#[tokio::test]
async fn charge_edits_flow_into_group_totals() {
    let desk = TestDesk::new();
    let ids = desk.three_packages().await;
    let group = desk.engine.consolidate(&ids, CUSTOMER, CLERK).await.unwrap();

    let update = desk
        .engine
        .update_package_charges(
            ids[0],
            PackageCharges {
                weight_kg: 10.0,
                declared_value: 25_000,
                fees: PackageFees {
                    freight: 9_000,
                    ..full_fees()
                },
            },
            CLERK,
        )
        .await
        .unwrap();

    let refreshed = update.consolidated.expect("member of a group");
    assert_eq!(refreshed.id, group.id);
    assert_eq!(refreshed.totals.freight, 9_000 + 4_500 * 2);
    assert!((refreshed.totals.weight_kg - 18.0).abs() < 1e-9);
    assert_eq!(
        refreshed.totals.total_cost,
        refreshed.totals.freight
            + refreshed.totals.customs
            + refreshed.totals.storage
            + refreshed.totals.delivery
    );

    let history = desk
        .store
        .history_for(EntityRef::Package(ids[0]))
        .await
        .unwrap();
    assert_eq!(history.last().unwrap().action, HistoryAction::ChargesUpdated);
}

#[tokio::test]
async fn members_can_be_added_and_removed() {
    let desk = TestDesk::new();
    let ids = desk.three_packages().await;
    let group = desk
        .engine
        .consolidate(&ids[..2], CUSTOMER, CLERK)
        .await
        .unwrap();

    let group = desk
        .engine
        .add_packages(group.id, &[ids[2]], CLERK)
        .await
        .unwrap();
    assert_eq!(group.totals.quantity, 3);
    assert_eq!(desk.package(ids[2]).await.consolidated_id, Some(group.id));

    let group = desk
        .engine
        .remove_package(group.id, ids[0], CLERK, None)
        .await
        .unwrap();
    assert_eq!(group.totals.quantity, 2);
    assert!(group.is_active);
    assert!(desk.package(ids[0]).await.consolidated_id.is_none());
}

#[tokio::test]
async fn removing_the_last_member_dissolves_the_group() {
    let desk = TestDesk::new();
    let ids = desk.three_packages().await;
    let group = desk
        .engine
        .consolidate(&ids[..2], CUSTOMER, CLERK)
        .await
        .unwrap();

    desk.engine
        .remove_package(group.id, ids[0], CLERK, None)
        .await
        .unwrap();
    let group = desk
        .engine
        .remove_package(group.id, ids[1], CLERK, Some("rerouted".to_string()))
        .await
        .unwrap();

    assert!(!group.is_active);
    assert!(group.is_dissolved());
    assert_eq!(group.totals.quantity, 0);
    assert!(desk.engine.members(group.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn soft_deleted_member_leaves_its_group() {
    let desk = TestDesk::new();
    let ids = desk.three_packages().await;
    let group = desk.engine.consolidate(&ids, CUSTOMER, CLERK).await.unwrap();

    let deleted = desk
        .engine
        .soft_delete_package(ids[1], CLERK, Some("damaged in transit".to_string()))
        .await
        .unwrap();
    assert!(deleted.is_deleted());

    let group = desk.engine.find_consolidated(group.id).await.unwrap();
    assert_eq!(group.totals.quantity, 2);
    let members: Vec<PackageId> = desk
        .engine
        .members(group.id)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(members, vec![ids[0], ids[2]]);

    let err = desk.status.find_package(ids[1]).await.unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound { .. }));
}

#[tokio::test]
async fn members_already_at_target_do_not_block_the_group() {
    let desk = TestDesk::new();
    let ids = desk.three_packages().await;
    let group = desk.engine.consolidate(&ids, CUSTOMER, CLERK).await.unwrap();
    desk.move_to(ids[2], PackageStatus::Processing).await;

    let outcome = desk
        .coordinator
        .update_consolidated_status(
            group.id,
            PackageStatus::Processing,
            CLERK,
            ConsolidatedUpdateOptions::default(),
        )
        .await
        .unwrap();
    match outcome {
        ConsolidatedUpdate::Applied {
            consolidated,
            members_updated,
        } => {
            assert_eq!(consolidated.status, PackageStatus::Processing);
            assert_eq!(members_updated, 2);
        }
        other => panic!("expected the group to move, got {other:?}"),
    }

    // Only the direct move is in the member's history
    let changes = desk
        .store
        .history_for(EntityRef::Package(ids[2]))
        .await
        .unwrap()
        .into_iter()
        .filter(|h| h.action == HistoryAction::StatusChanged)
        .count();
    assert_eq!(changes, 1);
}
