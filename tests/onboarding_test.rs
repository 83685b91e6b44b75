//! Registration dialog and foreman confirmation

mod common;

use tool_store::Role;
use tooltrack::notify::Recipient;

#[tokio::test]
async fn test_registration_approved_by_foreman() {
    let (yard, notifier) = common::yard(&[]).await;
    let app = &yard.app;

    let user = app.begin_registration("kuznetsov", Some(555)).await.unwrap();
    assert_eq!(user.handle, "@kuznetsov");
    assert_eq!(user.role, Role::Pending);

    app.registration_name("kuznetsov", "Kuznetsov").unwrap();
    let submitted = app.registration_site("@kuznetsov", yard.north.id).await.unwrap();
    assert!(submitted.delivery.is_delivered());
    assert_eq!(app.sessions.active_count(), 0);

    let to_foreman = notifier.sent_to(&Recipient::Handle("@petrov".to_string()));
    assert_eq!(to_foreman.len(), 1);
    assert!(to_foreman[0].contains("Kuznetsov (@kuznetsov)"));

    let pending = app.onboarding.pending_registrations(yard.north.id).await.unwrap();
    assert_eq!(pending.len(), 1);

    let approved = app
        .onboarding
        .approve_registration(user.id, yard.north_foreman.id)
        .await
        .unwrap();
    assert_eq!(approved.user.role, Role::Worker);
    assert_eq!(approved.user.site_id, Some(yard.north.id));
    assert!(notifier.sent_to(&Recipient::Chat(555))[0].contains("'North'"));

    let workers = app.onboarding.workers_at_site(yard.north.id).await.unwrap();
    assert_eq!(workers.len(), 2);
}

#[tokio::test]
async fn test_registration_rejected() {
    let (yard, notifier) = common::yard(&[]).await;
    let app = &yard.app;

    let user = app.begin_registration("@orlov", None).await.unwrap();
    app.registration_name("@orlov", "Orlov").unwrap();
    app.registration_site("@orlov", yard.south.id).await.unwrap();

    let rejected = app.onboarding.reject_registration(user.id).await.unwrap();
    assert_eq!(rejected.user.role, Role::Pending);
    assert_eq!(rejected.user.site_id, None);
    assert!(notifier.sent_to(&Recipient::Handle("@orlov".to_string()))[0].contains("rejected"));
    assert!(app
        .onboarding
        .pending_registrations(yard.south.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_repeat_contact_reuses_user() {
    let (yard, _) = common::yard(&[]).await;
    let first = yard.app.begin_registration("@belov", None).await.unwrap();
    let again = yard.app.begin_registration("belov", Some(77)).await.unwrap();
    assert_eq!(first.id, again.id);
    assert_eq!(again.chat_id, Some(77));
}
