//! Factory function to create storage backends based on configuration.

use std::sync::Arc;

use tracing::info;

use crate::{
    config::{StorageBackend, StorageConfig},
    core::{InventoryCheckStorage, StoreError, ToolStorage, TransferStorage, UserStorage},
    memory::MemoryStore,
    postgres::PostgresStore,
};

/// One handle per storage trait, all backed by the same store
#[derive(Clone)]
pub struct StorageBundle {
    pub tools: Arc<dyn ToolStorage>,
    pub users: Arc<dyn UserStorage>,
    pub transfers: Arc<dyn TransferStorage>,
    pub checks: Arc<dyn InventoryCheckStorage>,
}

impl StorageBundle {
    /// Share a single store value across every trait handle
    pub fn from_store<S>(store: S) -> Self
    where
        S: ToolStorage + UserStorage + TransferStorage + InventoryCheckStorage,
    {
        let store = Arc::new(store);
        Self {
            tools: store.clone(),
            users: store.clone(),
            transfers: store.clone(),
            checks: store,
        }
    }

    pub fn in_memory() -> Self {
        Self::from_store(MemoryStore::new())
    }
}

/// Create storage backends based on configuration.
///
/// The Postgres backend runs `ensure_schema` before returning.
pub async fn create_storage(config: &StorageConfig) -> Result<StorageBundle, String> {
    config.validate()?;

    match config.backend {
        StorageBackend::Memory => {
            info!("Initializing tool store: Memory");
            Ok(StorageBundle::in_memory())
        }
        StorageBackend::Postgres => {
            let pg = config
                .postgres
                .clone()
                .ok_or("postgres configuration is required when backend is postgres")?;
            let url = pg.db_url.clone();
            let store = PostgresStore::new(pg)?;
            store
                .ensure_schema()
                .await
                .map_err(|e: StoreError| e.to_string())?;
            info!(
                "Initializing tool store: Postgres at {}",
                redact_url(&url)
            );
            Ok(StorageBundle::from_store(store))
        }
    }
}

// Drop the password before logging a connection URL.
fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "<invalid url>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{NewSite, SiteId};

    #[tokio::test]
    async fn memory_bundle_shares_one_store() {
        let bundle = create_storage(&StorageConfig::default()).await.unwrap();
        let site = bundle
            .tools
            .create_site(NewSite {
                name: "Depot".to_string(),
                location: None,
            })
            .await
            .unwrap();
        let users = bundle.users.list_users_at_site(site.id, None).await.unwrap();
        assert!(users.is_empty());
        assert_eq!(bundle.tools.list_sites().await.unwrap().len(), 1);
        assert!(bundle.tools.get_site(SiteId(999)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn postgres_without_section_is_rejected() {
        let config = StorageConfig {
            backend: StorageBackend::Postgres,
            postgres: None,
        };
        assert!(create_storage(&config).await.is_err());
    }

    #[test]
    fn redacts_password() {
        let redacted = redact_url("postgres://app:secret@db:5432/tools");
        assert!(!redacted.contains("secret"));
        assert!(redacted.contains("***"));
    }
}
