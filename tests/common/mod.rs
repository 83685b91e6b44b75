//! Shared fixtures for tooltrack integration tests

use std::sync::{Arc, Once};

use async_trait::async_trait;
use tool_store::{Role, Site, Tool, User};
use tooltrack::{
    config::LoggingConfig,
    logging::init_logging,
    notify::{DeliveryError, Recipient, RecordingNotifier},
    App, Notifier,
};

static LOGGING: Once = Once::new();

pub fn init_test_logging() {
    LOGGING.call_once(|| {
        init_logging(&LoggingConfig {
            level: "warn".to_string(),
            json: false,
        })
    });
}

/// Refuses every delivery
#[allow(dead_code)]
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn deliver(&self, _recipient: &Recipient, _message: &str) -> Result<(), DeliveryError> {
        Err(DeliveryError::Transport("network unreachable".to_string()))
    }
}

/// Two sites with a foreman each, a worker on the first, tools on the first
#[allow(dead_code)]
pub struct Yard {
    pub app: App,
    pub north: Site,
    pub south: Site,
    pub north_foreman: User,
    pub south_foreman: User,
    pub worker: User,
    pub tools: Vec<Tool>,
}

/// `tools` are `(inventory number, qr payload, name)` placed at the north site
#[allow(dead_code)]
pub async fn yard(tools: &[(&str, &str, &str)]) -> (Yard, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::new());
    let yard = populate(App::in_memory(notifier.clone()), tools).await;
    (yard, notifier)
}

pub async fn populate(app: App, tools: &[(&str, &str, &str)]) -> Yard {
    init_test_logging();

    let north = app.registry.create_site("North", Some("Lenina 1")).await.unwrap();
    let south = app.registry.create_site("South", None).await.unwrap();
    let north_foreman = app
        .onboarding
        .enroll("@petrov", Some("Petrov"), Role::Foreman, Some(north.id))
        .await
        .unwrap();
    let south_foreman = app
        .onboarding
        .enroll("@sidorov", Some("Sidorov"), Role::Foreman, Some(south.id))
        .await
        .unwrap();
    let worker = app
        .onboarding
        .enroll("@ivanov", Some("Ivanov"), Role::Worker, Some(north.id))
        .await
        .unwrap();

    let mut registered = Vec::new();
    for (inventory_number, qr, name) in tools {
        registered.push(
            app.registry
                .register_tool(inventory_number, qr, name, Some(north.id))
                .await
                .unwrap(),
        );
    }

    // Foreman assignment is reflected on the site rows.
    let north = app.registry.get_site(north.id).await.unwrap();
    let south = app.registry.get_site(south.id).await.unwrap();

    Yard {
        app,
        north,
        south,
        north_foreman,
        south_foreman,
        worker,
        tools: registered,
    }
}
