use std::sync::Arc;

use anyhow::Context;

use crate::auth::{Argon2Hasher, CredentialHasher};
use crate::config::AppConfig;
use crate::db;
use crate::storage::{Storage, StorageClient};
use crate::users::{
    repo::{PgUserStore, UserStore},
    MemoryUserStore,
};

/// `DATABASE_URL` value that selects the process-local store.
pub const MEMORY_DATABASE_URL: &str = "memory";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn UserStore>,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn StorageClient>,
    pub hasher: Arc<dyn CredentialHasher>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let store = user_store(&config).await?;
        let storage = Arc::new(Storage::from_config(&config.media).await?) as Arc<dyn StorageClient>;
        let hasher =
            Arc::new(Argon2Hasher::from_config(&config.password)?) as Arc<dyn CredentialHasher>;

        tokio::fs::create_dir_all(&config.media.upload_dir)
            .await
            .with_context(|| format!("create upload dir {}", config.media.upload_dir.display()))?;

        Ok(Self::from_parts(store, config, storage, hasher))
    }

    pub fn from_parts(
        store: Arc<dyn UserStore>,
        config: Arc<AppConfig>,
        storage: Arc<dyn StorageClient>,
        hasher: Arc<dyn CredentialHasher>,
    ) -> Self {
        Self {
            store,
            config,
            storage,
            hasher,
        }
    }
}

/// Postgres store for a connection URL, or the in-memory store for local runs.
async fn user_store(config: &AppConfig) -> anyhow::Result<Arc<dyn UserStore>> {
    if config.database_url == MEMORY_DATABASE_URL {
        tracing::warn!("using in-memory user store; accounts are lost on restart");
        return Ok(Arc::new(MemoryUserStore::new()));
    }
    let pool = db::connect(config).await?;
    db::migrate(&pool).await?;
    Ok(Arc::new(PgUserStore::new(pool)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{JwtConfig, MediaConfig, PasswordConfig};

    fn config(database_url: &str) -> AppConfig {
        AppConfig {
            database_url: database_url.into(),
            database_max_connections: 1,
            host: "127.0.0.1".into(),
            port: 0,
            cookie_secure: false,
            jwt: JwtConfig {
                access_secret: "a".into(),
                refresh_secret: "r".into(),
                issuer: "i".into(),
                audience: "aud".into(),
                access_ttl_minutes: 1,
                refresh_ttl_minutes: 1,
            },
            media: MediaConfig {
                endpoint: "fake".into(),
                bucket: "fake".into(),
                access_key: "fake".into(),
                secret_key: "fake".into(),
                region: "us-east-1".into(),
                public_url: "https://media.test".into(),
                upload_dir: std::env::temp_dir(),
                max_upload_bytes: 1,
            },
            password: PasswordConfig::default(),
        }
    }

    #[tokio::test]
    async fn memory_url_selects_in_memory_store() {
        let store = user_store(&config(MEMORY_DATABASE_URL)).await.unwrap();
        assert!(store.find_by_id(uuid::Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_database_url_fails_startup() {
        let res = user_store(&config("not-a-database-url")).await;
        assert!(res.is_err());
    }
}
