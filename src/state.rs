use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::ConnectionManager;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<ConnectionManager>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Postgres-backed state; no connection is opened until first use.
    pub fn init(config: AppConfig) -> Self {
        let db = Arc::new(ConnectionManager::postgres(config.database.clone()));
        Self {
            db,
            config: Arc::new(config),
        }
    }

    pub fn from_parts(db: Arc<ConnectionManager>, config: Arc<AppConfig>) -> Self {
        Self { db, config }
    }
}
