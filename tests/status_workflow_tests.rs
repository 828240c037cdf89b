//! Single and bulk package status changes, history and notifications

use std::sync::Arc;

use freight_desk::models::{EntityRef, HistoryAction, PackageStatus};
use freight_desk::notifications::NotificationEvent;
use freight_desk::store::{MemoryStore, Store};
use freight_desk::workflows::{ErrorKind, PackageStatusService, StatusTransitionTable, WorkflowError};

mod fixtures;
use fixtures::*;

#[tokio::test]
async fn update_succeeds_exactly_for_allowed_targets() {
    for from in PackageStatus::ALL {
        for target in PackageStatus::ALL {
            let desk = TestDesk::new();
            let package = desk.register("1Z-PROP", CUSTOMER, full_fees()).await;
            for step in path_to(from) {
                desk.move_to(package.id, step).await;
            }
            assert_eq!(desk.package(package.id).await.status, from);
            let history_before = desk
                .store
                .history_for(EntityRef::Package(package.id))
                .await
                .unwrap()
                .len();

            let result = desk
                .status
                .update_status(package.id, target, CLERK, None)
                .await;
            let history = desk
                .store
                .history_for(EntityRef::Package(package.id))
                .await
                .unwrap();

            if StatusTransitionTable::allows(from, target) {
                let updated = result.unwrap();
                assert_eq!(updated.status, target);
                assert_eq!(history.len(), history_before + 1);
                let last = history.last().unwrap();
                assert_eq!(last.from_status, Some(from));
                assert_eq!(last.to_status, target);
                assert_eq!(last.action, HistoryAction::StatusChanged);
            } else {
                assert!(matches!(
                    result,
                    Err(WorkflowError::InvalidTransition { .. })
                ));
                assert_eq!(history.len(), history_before);
                assert_eq!(desk.package(package.id).await.status, from);
            }
        }
    }
}

#[tokio::test]
async fn bulk_update_skips_terminal_packages() {
    let desk = TestDesk::new();
    let ids = desk.three_packages().await;
    for status in [
        PackageStatus::Processing,
        PackageStatus::Ready,
        PackageStatus::Delivered,
    ] {
        desk.move_to(ids[1], status).await;
    }

    let report = desk
        .status
        .bulk_update_status(&ids, PackageStatus::Delayed, CLERK, Some("port strike".into()))
        .await;

    assert_eq!(report.succeeded, vec![ids[0], ids[2]]);
    assert_eq!(report.failed_ids(), vec![ids[1]]);
    assert_eq!(report.failed[0].kind, ErrorKind::InvalidTransition);
    assert!(!report.is_complete());

    assert_eq!(desk.package(ids[0]).await.status, PackageStatus::Delayed);
    assert_eq!(desk.package(ids[1]).await.status, PackageStatus::Delivered);
    assert_eq!(desk.package(ids[2]).await.status, PackageStatus::Delayed);
}

#[tokio::test]
async fn bulk_update_reports_missing_packages() {
    let desk = TestDesk::new();
    let ids = desk.three_packages().await;
    let missing = freight_desk::models::PackageId(9_999);

    let report = desk
        .status
        .bulk_update_status(
            &[ids[0], missing, ids[0]],
            PackageStatus::Processing,
            CLERK,
            None,
        )
        .await;

    assert_eq!(report.succeeded, vec![ids[0]]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].package_id, missing);
    assert_eq!(report.failed[0].kind, ErrorKind::NotFound);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_updates_to_one_package_apply_once() {
    let desk = TestDesk::new();
    let package = desk.register("1Z-RACE", CUSTOMER, full_fees()).await;

    let (a, b) = tokio::join!(
        desk.status
            .update_status(package.id, PackageStatus::Processing, CLERK, None),
        desk.status
            .update_status(package.id, PackageStatus::Processing, CLERK, None),
    );

    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes.iter().any(|r| matches!(
        r,
        Err(WorkflowError::InvalidTransition {
            from: PackageStatus::Processing,
            to: PackageStatus::Processing
        })
    )));

    let changes = desk
        .store
        .history_for(EntityRef::Package(package.id))
        .await
        .unwrap()
        .into_iter()
        .filter(|h| h.action == HistoryAction::StatusChanged)
        .count();
    assert_eq!(changes, 1);
}

#[tokio::test]
async fn notifications_follow_configured_statuses() {
    let desk = TestDesk::new();
    let package = desk.register("1Z-NOTIFY", CUSTOMER, full_fees()).await;

    desk.move_to(package.id, PackageStatus::Processing).await;
    desk.move_to(package.id, PackageStatus::Customs).await;
    desk.move_to(package.id, PackageStatus::Ready).await;

    assert_eq!(
        desk.notifier.events(),
        vec![
            NotificationEvent::PackageStatusChanged(PackageStatus::Customs),
            NotificationEvent::PackageStatusChanged(PackageStatus::Ready),
        ]
    );
    let sent = desk.notifier.sent.lock().unwrap();
    assert_eq!(sent[0].0, CUSTOMER);
    assert_eq!(sent[0].2["tracking_number"], "1Z-NOTIFY");
}

#[tokio::test]
async fn failed_notification_does_not_undo_the_change() {
    let notifier = FailingNotifier::default();
    let store = Arc::new(MemoryStore::new());
    let service = PackageStatusService::new(store.clone(), Arc::new(notifier.clone()));
    let package = service
        .register_package(
            freight_desk::models::NewPackage {
                tracking_number: "1Z-MAIL".to_string(),
                customer_id: CUSTOMER,
                manifest_id: 3,
                weight_kg: 1.0,
                declared_value: 500,
                fees: full_fees(),
            },
            CLERK,
        )
        .await
        .unwrap();

    service
        .update_status(package.id, PackageStatus::Delayed, CLERK, None)
        .await
        .unwrap();

    let stored = store.find_package(package.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PackageStatus::Delayed);
    assert_eq!(*notifier.attempts.lock().unwrap(), 1);
}

#[tokio::test]
async fn coordinator_member_changes_respect_notify_option() {
    let desk = TestDesk::new();
    let ids = desk.three_packages().await;
    let group = desk.engine.consolidate(&ids, CUSTOMER, CLERK).await.unwrap();

    desk.coordinator
        .update_consolidated_status(
            group.id,
            PackageStatus::Delayed,
            CLERK,
            freight_desk::workflows::ConsolidatedUpdateOptions {
                reason: None,
                notify: false,
            },
        )
        .await
        .unwrap();
    assert!(desk.notifier.events().is_empty());
}
