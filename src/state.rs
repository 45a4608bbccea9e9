use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use crate::auth::{
    jwt::JwtKeys,
    repo::{PgUserStore, UserStore},
    services::ensure_admin,
};
use crate::config::AppConfig;
use crate::properties::repo::{PgPropertyStore, PropertyStore};
use crate::storage::{Storage, StorageClient};

#[derive(Clone)]
pub struct AppState {
    pub jwt: JwtKeys,
    pub users: Arc<dyn UserStore>,
    pub properties: Arc<dyn PropertyStore>,
    pub storage: Arc<dyn StorageClient>,
}

impl AppState {
    /// Opens the pool once, applies migrations and ensures the bootstrap admin.
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;

        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        if let Err(e) = sqlx::migrate!("./migrations").run(&db).await {
            tracing::warn!(error = %e, "migration failed; continuing");
        }

        let storage = Arc::new(Storage::new(&config.storage).await?) as Arc<dyn StorageClient>;
        let users = Arc::new(PgUserStore::new(db.clone())) as Arc<dyn UserStore>;

        if let Some(admin) = &config.bootstrap_admin {
            ensure_admin(users.as_ref(), admin)
                .await
                .context("ensure bootstrap admin")?;
        }

        Ok(Self {
            jwt: JwtKeys::from_config(&config.jwt),
            properties: Arc::new(PgPropertyStore::new(db)),
            users,
            storage,
        })
    }
}
