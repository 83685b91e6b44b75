//! Service wiring: one shared store, one notifier, every engine component.

use std::sync::Arc;

use tool_store::{create_storage, SiteId, StorageBundle, User};
use tracing::info;

use crate::{
    config::{AppConfig, ConfigError, NotificationConfig},
    error::{InventoryError, InventoryResult},
    notify::{LogNotifier, NotificationGateway, Notifier, TelegramNotifier},
    onboarding::{normalize_handle, RegistrationOutcome, UserOnboarding},
    qr::QrResolver,
    reconcile::InventoryReconciler,
    registry::ToolRegistry,
    session::RegistrationSessions,
    transfer::TransferEngine,
};

pub fn build_notifier(config: &NotificationConfig) -> Result<Arc<dyn Notifier>, ConfigError> {
    match config {
        NotificationConfig::Log => Ok(Arc::new(LogNotifier)),
        NotificationConfig::Telegram {
            bot_token,
            api_base,
        } => {
            let notifier = TelegramNotifier::new(bot_token, api_base)
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
            Ok(Arc::new(notifier))
        }
    }
}

#[derive(Clone)]
pub struct App {
    pub registry: ToolRegistry,
    pub reconciler: InventoryReconciler,
    pub transfers: TransferEngine,
    pub onboarding: UserOnboarding,
    pub sessions: Arc<RegistrationSessions>,
    pub gateway: NotificationGateway,
    storage: StorageBundle,
}

impl App {
    pub fn new(storage: StorageBundle, notifier: Arc<dyn Notifier>, config: &AppConfig) -> Self {
        let registry = ToolRegistry::new(
            storage.tools.clone(),
            QrResolver::new(config.qr.case_insensitive),
        );
        let gateway = NotificationGateway::new(notifier);
        let reconciler = InventoryReconciler::new(
            registry.clone(),
            storage.users.clone(),
            storage.checks.clone(),
        );
        let transfers = TransferEngine::new(
            registry.clone(),
            storage.users.clone(),
            storage.transfers.clone(),
            gateway.clone(),
        );
        let onboarding = UserOnboarding::new(storage.users.clone(), registry.clone(), gateway.clone());
        let sessions = Arc::new(RegistrationSessions::new().with_ttl(config.sessions.ttl()));

        Self {
            registry,
            reconciler,
            transfers,
            onboarding,
            sessions,
            gateway,
            storage,
        }
    }

    /// Validate `config`, connect storage and build the notifier
    pub async fn from_config(config: &AppConfig) -> InventoryResult<Self> {
        config.validate()?;
        let storage = create_storage(&config.storage)
            .await
            .map_err(InventoryError::Storage)?;
        let notifier = build_notifier(&config.notifications)?;
        let app = Self::new(storage, notifier, config);
        info!(
            backend = ?config.storage.backend,
            case_insensitive_qr = app.registry.resolver().is_case_insensitive(),
            "Application initialized"
        );
        Ok(app)
    }

    /// Memory storage with the given notifier and default settings
    pub fn in_memory(notifier: Arc<dyn Notifier>) -> Self {
        Self::new(StorageBundle::in_memory(), notifier, &AppConfig::default())
    }

    pub fn storage(&self) -> &StorageBundle {
        &self.storage
    }

    // --- registration dialog ---------------------------------------------------

    /// First step of the dialog: make sure the user exists and ask for a name
    pub async fn begin_registration(
        &self,
        handle: &str,
        chat_id: Option<i64>,
    ) -> InventoryResult<User> {
        let user = self.onboarding.register(handle, chat_id).await?;
        self.sessions.start(&user.handle);
        Ok(user)
    }

    pub fn registration_name(&self, handle: &str, name: &str) -> InventoryResult<()> {
        let handle = normalize_handle(handle);
        Ok(self.sessions.submit_name(&handle, name)?)
    }

    /// Final step: the site must exist before the dialog is closed
    pub async fn registration_site(
        &self,
        handle: &str,
        site: SiteId,
    ) -> InventoryResult<RegistrationOutcome> {
        let handle = normalize_handle(handle);
        self.registry.get_site(site).await?;
        let completed = self.sessions.submit_site(&handle, site)?;
        self.onboarding.submit_registration(&completed).await
    }
}

#[cfg(test)]
mod tests {
    use tool_store::Role;

    use super::*;
    use crate::{notify::RecordingNotifier, session::SessionError};

    #[tokio::test]
    async fn registration_dialog_end_to_end() {
        let app = App::in_memory(Arc::new(RecordingNotifier::new()));
        let site = app.registry.create_site("Yard", None).await.unwrap();

        app.begin_registration("ivan", Some(10)).await.unwrap();
        app.registration_name("@ivan", "Ivan").unwrap();

        let err = app.registration_site("@ivan", SiteId(999)).await.unwrap_err();
        assert!(err.is_not_found());

        let outcome = app.registration_site("@ivan", site.id).await.unwrap();
        assert_eq!(outcome.user.name.as_deref(), Some("Ivan"));
        assert_eq!(outcome.user.role, Role::Pending);
        assert_eq!(outcome.user.site_id, Some(site.id));
    }

    #[tokio::test]
    async fn registration_site_without_name_is_rejected() {
        let app = App::in_memory(Arc::new(RecordingNotifier::new()));
        let site = app.registry.create_site("Yard", None).await.unwrap();
        app.begin_registration("@ivan", None).await.unwrap();

        let err = app.registration_site("@ivan", site.id).await.unwrap_err();
        assert!(matches!(
            err,
            InventoryError::Registration(SessionError::UnexpectedInput { .. })
        ));
    }

    #[tokio::test]
    async fn from_config_rejects_invalid_settings() {
        let mut config = AppConfig::default();
        config.sessions.ttl_secs = 0;
        assert!(matches!(
            App::from_config(&config).await,
            Err(InventoryError::Config(_))
        ));
        assert!(App::from_config(&AppConfig::default()).await.is_ok());

        config.sessions.ttl_secs = 60;
        config.qr.case_insensitive = true;
        let app = App::from_config(&config).await.unwrap();
        assert!(app.registry.resolver().is_case_insensitive());
    }
}
