use std::sync::Arc;

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    auth::jwt::TokenService,
    config::AppConfig,
    db::PgPool,
    error::{AppError, AppResult},
    files::FileManager,
    mail::Mailer,
    storage::ObjectStorage,
};

pub type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub files: FileManager,
    pub tokens: TokenService,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        storage: Arc<dyn ObjectStorage>,
        tokens: TokenService,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let files = FileManager::new(storage, config.max_upload_bytes);
        Self {
            pool,
            config: Arc::new(config),
            files,
            tokens,
            mailer,
        }
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }
}
