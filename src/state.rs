use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use crate::{
    auth::{
        links::LinkKeys,
        throttle::Throttle,
        tokens::{PgTokenStore, TokenStore},
    },
    config::{AppConfig, StorageConfig},
    notify::{self, Notifier},
    storage::{LocalStorage, S3Storage, StorageClient},
    users::repo::{PgUserRepo, UserRepo},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserRepo>,
    pub tokens: Arc<dyn TokenStore>,
    pub storage: Arc<dyn StorageClient>,
    pub notifier: Arc<dyn Notifier>,
    pub links: Arc<LinkKeys>,
    pub resend_throttle: Arc<Throttle>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        if let Err(e) = sqlx::migrate!("./migrations").run(&db).await {
            tracing::warn!(error = %e, "migration failed; continuing");
        }

        let storage: Arc<dyn StorageClient> = match &config.storage {
            StorageConfig::Local { root } => Arc::new(LocalStorage::new(root, &config.app_url)),
            StorageConfig::S3(s3) => Arc::new(S3Storage::new(s3).await?),
        };
        let notifier: Arc<dyn Notifier> = Arc::from(notify::from_config(&config.mail)?);

        Ok(Self::from_parts(
            config,
            Arc::new(PgUserRepo::new(db.clone())),
            Arc::new(PgTokenStore::new(db)),
            storage,
            notifier,
        ))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserRepo>,
        tokens: Arc<dyn TokenStore>,
        storage: Arc<dyn StorageClient>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let links = Arc::new(LinkKeys::new(&config.links));
        let resend_throttle = Arc::new(Throttle::per_minute(config.resend_per_minute));
        Self {
            config,
            users,
            tokens,
            storage,
            notifier,
            links,
            resend_throttle,
        }
    }
}
