//! Transfer request lifecycle against the memory backend

mod common;

use std::sync::Arc;

use tool_store::{SiteId, TransferRequestId, TransferStatus, UserId};
use tooltrack::{notify::Recipient, App, DeliveryStatus, InventoryError};

const TOOLS: &[(&str, &str, &str)] = &[
    ("INV-001", "qr-drill", "Drill"),
    ("INV-002", "qr-grinder", "Angle grinder"),
];

fn handle(h: &str) -> Recipient {
    Recipient::Handle(h.to_string())
}

#[tokio::test]
async fn test_request_then_approve_moves_tool() {
    let (yard, notifier) = common::yard(TOOLS).await;
    let drill = &yard.tools[0];

    let created = yard
        .app
        .transfers
        .create(drill.id, yard.south_foreman.id, yard.north.id, yard.south.id)
        .await
        .unwrap();
    assert_eq!(created.request.status, TransferStatus::Pending);
    assert!(created.delivery.is_delivered());

    let to_foreman = notifier.sent_to(&handle("@petrov"));
    assert_eq!(to_foreman.len(), 1);
    assert!(to_foreman[0].contains("Drill (inv. #INV-001)"));
    assert!(to_foreman[0].contains("'South'"));

    let pending = yard.app.transfers.pending_for_site(yard.north.id).await.unwrap();
    assert_eq!(pending.len(), 1);

    let approved = yard
        .app
        .transfers
        .approve(created.request.id, yard.north_foreman.id)
        .await
        .unwrap();
    assert_eq!(approved.request.status, TransferStatus::Completed);
    assert_eq!(approved.request.approver_id, Some(yard.north_foreman.id));
    assert!(approved.request.decided_at.is_some());

    let moved = yard.app.registry.get_tool(drill.id).await.unwrap();
    assert_eq!(moved.site_id, Some(yard.south.id));

    let to_requester = notifier.sent_to(&handle("@sidorov"));
    assert_eq!(to_requester.len(), 1);
    assert!(to_requester[0].contains("approved"));

    assert!(yard
        .app
        .transfers
        .pending_for_site(yard.north.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_reject_leaves_tool_in_place() {
    let (yard, notifier) = common::yard(TOOLS).await;
    let grinder = &yard.tools[1];
    let request = yard
        .app
        .transfers
        .create(grinder.id, yard.south_foreman.id, yard.north.id, yard.south.id)
        .await
        .unwrap()
        .request;

    let rejected = yard
        .app
        .transfers
        .reject(request.id, yard.north_foreman.id)
        .await
        .unwrap();
    assert_eq!(rejected.request.status, TransferStatus::Rejected);

    let tool = yard.app.registry.get_tool(grinder.id).await.unwrap();
    assert_eq!(tool.site_id, Some(yard.north.id));
    assert!(notifier.sent_to(&handle("@sidorov"))[0].contains("rejected"));
}

#[tokio::test]
async fn test_second_decision_is_already_terminal() {
    let (yard, _) = common::yard(TOOLS).await;
    let request = yard
        .app
        .transfers
        .create(yard.tools[0].id, yard.south_foreman.id, yard.north.id, yard.south.id)
        .await
        .unwrap()
        .request;

    yard.app
        .transfers
        .approve(request.id, yard.north_foreman.id)
        .await
        .unwrap();

    for attempt in [
        yard.app.transfers.approve(request.id, yard.north_foreman.id).await,
        yard.app.transfers.reject(request.id, yard.north_foreman.id).await,
    ] {
        assert!(matches!(
            attempt,
            Err(InventoryError::AlreadyTerminal {
                status: TransferStatus::Completed,
                ..
            })
        ));
    }

    let stored = yard.app.transfers.get(request.id).await.unwrap();
    assert_eq!(stored.status, TransferStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_decisions_have_one_winner() {
    for _ in 0..20 {
        let (yard, _) = common::yard(TOOLS).await;
        let request = yard
            .app
            .transfers
            .create(yard.tools[0].id, yard.south_foreman.id, yard.north.id, yard.south.id)
            .await
            .unwrap()
            .request;

        let approve = {
            let app = yard.app.clone();
            let approver = yard.north_foreman.id;
            tokio::spawn(async move { app.transfers.approve(request.id, approver).await })
        };
        let reject = {
            let app = yard.app.clone();
            let approver = yard.north_foreman.id;
            tokio::spawn(async move { app.transfers.reject(request.id, approver).await })
        };

        let results = [approve.await.unwrap(), reject.await.unwrap()];
        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(InventoryError::AlreadyTerminal { .. }))));

        let stored = yard.app.transfers.get(request.id).await.unwrap();
        assert_eq!(stored.status, winners[0].request.status);

        let tool = yard.app.registry.get_tool(yard.tools[0].id).await.unwrap();
        let expected_site = match stored.status {
            TransferStatus::Completed => yard.south.id,
            _ => yard.north.id,
        };
        assert_eq!(tool.site_id, Some(expected_site));
    }
}

#[tokio::test]
async fn test_competing_requests_for_one_tool() {
    let (yard, _) = common::yard(TOOLS).await;
    let third = yard.app.registry.create_site("East", None).await.unwrap();
    let drill = yard.tools[0].id;

    let to_south = yard
        .app
        .transfers
        .create(drill, yard.south_foreman.id, yard.north.id, yard.south.id)
        .await
        .unwrap()
        .request;
    let to_east = yard
        .app
        .transfers
        .create(drill, yard.worker.id, yard.north.id, third.id)
        .await
        .unwrap()
        .request;

    yard.app
        .transfers
        .approve(to_south.id, yard.north_foreman.id)
        .await
        .unwrap();

    let err = yard
        .app
        .transfers
        .approve(to_east.id, yard.north_foreman.id)
        .await
        .unwrap_err();
    assert!(matches!(err, InventoryError::Conflict(_)));

    // The losing request is untouched and the tool stays where the winner put it.
    let stored = yard.app.transfers.get(to_east.id).await.unwrap();
    assert_eq!(stored.status, TransferStatus::Pending);
    let tool = yard.app.registry.get_tool(drill).await.unwrap();
    assert_eq!(tool.site_id, Some(yard.south.id));

    // It can still be rejected.
    let rejected = yard
        .app
        .transfers
        .reject(to_east.id, yard.north_foreman.id)
        .await
        .unwrap();
    assert_eq!(rejected.request.status, TransferStatus::Rejected);
}

#[tokio::test]
async fn test_invalid_requests_are_refused() {
    let (yard, _) = common::yard(TOOLS).await;
    let transfers = &yard.app.transfers;
    let drill = yard.tools[0].id;

    let same_site = transfers
        .create(drill, yard.worker.id, yard.north.id, yard.north.id)
        .await
        .unwrap_err();
    assert!(matches!(same_site, InventoryError::InvalidTransfer(_)));

    let wrong_source = transfers
        .create(drill, yard.worker.id, yard.south.id, yard.north.id)
        .await
        .unwrap_err();
    assert!(matches!(wrong_source, InventoryError::InvalidTransfer(_)));

    let missing_site = transfers
        .create(drill, yard.worker.id, yard.north.id, SiteId(999))
        .await
        .unwrap_err();
    assert!(missing_site.is_not_found());

    let missing_user = transfers
        .create(drill, UserId(999), yard.north.id, yard.south.id)
        .await
        .unwrap_err();
    assert!(missing_user.is_not_found());

    let missing_request = transfers
        .approve(TransferRequestId(999), yard.north_foreman.id)
        .await
        .unwrap_err();
    assert!(missing_request.is_not_found());

    assert!(transfers.pending_for_site(yard.north.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delivery_failure_does_not_undo_decision() {
    let app = App::in_memory(Arc::new(common::FailingNotifier));
    let yard = common::populate(app, TOOLS).await;

    let created = yard
        .app
        .transfers
        .create(yard.tools[0].id, yard.south_foreman.id, yard.north.id, yard.south.id)
        .await
        .unwrap();
    assert!(matches!(created.delivery, DeliveryStatus::Failed(_)));

    let approved = yard
        .app
        .transfers
        .approve(created.request.id, yard.north_foreman.id)
        .await
        .unwrap();
    assert!(matches!(approved.delivery, DeliveryStatus::Failed(_)));
    assert_eq!(approved.request.status, TransferStatus::Completed);

    let tool = yard.app.registry.get_tool(yard.tools[0].id).await.unwrap();
    assert_eq!(tool.site_id, Some(yard.south.id));
}
