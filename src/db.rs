use std::{
    future::Future,
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    PgPool,
};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{config::DatabaseSettings, error::AppError};

/// Opens and closes database sessions for the [`ConnectionManager`].
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, url: &str, settings: &DatabaseSettings) -> Result<PgPool, AppError>;
    async fn close(&self, pool: PgPool);
}

/// Postgres session factory.
#[derive(Debug, Default, Clone, Copy)]
pub struct PgConnector;

#[async_trait]
impl Connector for PgConnector {
    async fn open(&self, url: &str, settings: &DatabaseSettings) -> Result<PgPool, AppError> {
        let statement_timeout = format!("{}ms", settings.socket_timeout.as_millis());
        let options = PgConnectOptions::from_str(url)
            .map_err(|e| AppError::Configuration(format!("invalid DATABASE_URL: {e}")))?
            .options([("statement_timeout", statement_timeout)]);

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.server_selection_timeout)
            .connect_with(options)
            .await?;
        Ok(pool)
    }

    async fn close(&self, pool: PgPool) {
        pool.close().await;
    }
}

/// A live database session shared by everything that talks to storage.
#[derive(Debug)]
pub struct DbHandle {
    pool: PgPool,
    session_id: Uuid,
    connected_at: OffsetDateTime,
}

impl DbHandle {
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn connected_at(&self) -> OffsetDateTime {
        self.connected_at
    }
}

type ConnectAttempt = Shared<BoxFuture<'static, Result<Arc<DbHandle>, AppError>>>;

enum Slot {
    Idle,
    Connecting { attempt: u64, future: ConnectAttempt },
    Connected(Arc<DbHandle>),
}

/// Owns the single cached database handle.
///
/// At most one open is in flight. Callers that arrive while it runs await
/// the same attempt and receive its result; a failed attempt resets the
/// slot so the next call starts over.
pub struct ConnectionManager {
    settings: DatabaseSettings,
    connector: Arc<dyn Connector>,
    slot: Mutex<Slot>,
    attempts: AtomicU64,
}

impl ConnectionManager {
    pub fn new(settings: DatabaseSettings, connector: Arc<dyn Connector>) -> Self {
        Self {
            settings,
            connector,
            slot: Mutex::new(Slot::Idle),
            attempts: AtomicU64::new(0),
        }
    }

    pub fn postgres(settings: DatabaseSettings) -> Self {
        Self::new(settings, Arc::new(PgConnector))
    }

    pub async fn connect(&self) -> Result<Arc<DbHandle>, AppError> {
        let (attempt, future) = {
            let mut slot = self.slot.lock().await;
            match &*slot {
                Slot::Connected(handle) => return Ok(Arc::clone(handle)),
                Slot::Connecting { attempt, future } => (*attempt, future.clone()),
                Slot::Idle => {
                    let url = self.settings.url.clone().ok_or_else(|| {
                        AppError::Configuration(
                            "DATABASE_URL is not defined in environment variables".into(),
                        )
                    })?;
                    let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
                    let future =
                        open_session(Arc::clone(&self.connector), url, self.settings.clone())
                            .boxed()
                            .shared();
                    *slot = Slot::Connecting {
                        attempt,
                        future: future.clone(),
                    };
                    (attempt, future)
                }
            }
        };

        let result = future.await;

        let mut slot = self.slot.lock().await;
        if matches!(&*slot, Slot::Connecting { attempt: current, .. } if *current == attempt) {
            *slot = match &result {
                Ok(handle) => Slot::Connected(Arc::clone(handle)),
                Err(_) => Slot::Idle,
            };
        }
        result
    }

    pub async fn disconnect(&self) {
        let taken = {
            let mut slot = self.slot.lock().await;
            match std::mem::replace(&mut *slot, Slot::Idle) {
                Slot::Connected(handle) => Some(handle),
                other => {
                    *slot = other;
                    None
                }
            }
        };
        if let Some(handle) = taken {
            self.connector.close(handle.pool.clone()).await;
            info!(session_id = %handle.session_id, "disconnected from database");
        }
    }

    pub async fn is_connected(&self) -> bool {
        matches!(&*self.slot.lock().await, Slot::Connected(_))
    }

    /// Runs `op` against a connected handle.
    pub async fn with_database<T, F, Fut>(&self, op: F) -> Result<T, AppError>
    where
        F: FnOnce(Arc<DbHandle>) -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let handle = self.connect().await?;
        op(handle).await.map_err(|e| {
            error!(error = %e, "database operation failed");
            e
        })
    }
}

async fn open_session(
    connector: Arc<dyn Connector>,
    url: String,
    settings: DatabaseSettings,
) -> Result<Arc<DbHandle>, AppError> {
    let pool = connector.open(&url, &settings).await.map_err(|e| {
        error!(error = %e, "error connecting to database");
        e
    })?;

    let handle = Arc::new(DbHandle {
        pool,
        session_id: Uuid::new_v4(),
        connected_at: OffsetDateTime::now_utc(),
    });
    info!(session_id = %handle.session_id, "connected to database");
    Ok(handle)
}

/// Connects at startup; a failure is logged and the process keeps going.
pub async fn init_database(manager: &ConnectionManager) -> Option<Arc<DbHandle>> {
    match manager.connect().await {
        Ok(handle) => {
            info!("database initialized successfully");
            Some(handle)
        }
        Err(e) => {
            warn!(error = %e, "failed to initialize database");
            None
        }
    }
}

pub async fn migrate(handle: &DbHandle) -> Result<(), AppError> {
    sqlx::migrate!("./migrations")
        .run(handle.pool())
        .await
        .map_err(|e| AppError::Unknown(format!("migration failed: {e}")))
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn connect_caches_the_handle() {
        let connector = Arc::new(CountingConnector::default());
        let manager = ConnectionManager::new(settings_with_url(), connector.clone());

        let first = manager.connect().await.expect("first connect");
        let second = manager.connect().await.expect("second connect");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connector.opened(), 1);
        assert!(manager.is_connected().await);
    }

    #[tokio::test]
    async fn concurrent_first_connects_open_one_session() {
        let connector = Arc::new(CountingConnector {
            delay: Some(Duration::from_millis(50)),
            ..CountingConnector::default()
        });
        let manager = Arc::new(ConnectionManager::new(
            settings_with_url(),
            connector.clone(),
        ));

        let (a, b) = tokio::join!(manager.connect(), manager.connect());
        let (a, b) = (a.expect("connect a"), b.expect("connect b"));

        assert_eq!(connector.opened(), 1);
        assert_eq!(a.session_id(), b.session_id());
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn concurrent_connects_across_tasks_open_one_session() {
        let connector = Arc::new(CountingConnector {
            delay: Some(Duration::from_millis(20)),
            ..CountingConnector::default()
        });
        let manager = Arc::new(ConnectionManager::new(
            settings_with_url(),
            connector.clone(),
        ));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.connect().await.map(|h| h.session_id()) })
            })
            .collect();

        let mut ids = Vec::new();
        for t in tasks {
            ids.push(t.await.unwrap().unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(connector.opened(), 1);
    }

    #[tokio::test]
    async fn concurrent_failing_connects_share_one_timeout() {
        let stall = Duration::from_millis(200);
        let connector = Arc::new(StallingConnector {
            stall,
            ..StallingConnector::default()
        });
        let manager = Arc::new(ConnectionManager::new(
            settings_with_url(),
            connector.clone(),
        ));

        let started = tokio::time::Instant::now();
        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.connect().await })
            })
            .collect();
        for t in tasks {
            let err = t.await.unwrap().unwrap_err();
            assert!(matches!(err, AppError::Transport(_)));
        }

        // serial attempts would take 5 x 200 ms
        assert!(started.elapsed() < stall * 2, "took {:?}", started.elapsed());
        assert_eq!(connector.attempts(), 1);
        assert!(!manager.is_connected().await);

        // the failed attempt is not cached; the next call tries again
        assert!(manager.connect().await.is_err());
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test]
    async fn missing_url_is_a_configuration_error() {
        let manager = ConnectionManager::new(
            DatabaseSettings::default(),
            Arc::new(CountingConnector::default()),
        );
        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
        assert!(!manager.is_connected().await);
    }

    #[tokio::test]
    async fn failed_connect_leaves_cache_empty() {
        let manager = ConnectionManager::new(settings_with_url(), Arc::new(UnreachableConnector));
        assert!(matches!(
            manager.connect().await.unwrap_err(),
            AppError::Transport(_)
        ));
        assert!(!manager.is_connected().await);
        assert!(init_database(&manager).await.is_none());
    }

    #[tokio::test]
    async fn disconnect_clears_cache_and_allows_reconnect() {
        let connector = Arc::new(CountingConnector::default());
        let manager = ConnectionManager::new(settings_with_url(), connector.clone());

        let first = manager.connect().await.unwrap();
        manager.disconnect().await;
        assert!(!manager.is_connected().await);
        assert_eq!(connector.closed(), 1);

        // second disconnect is a no-op
        manager.disconnect().await;
        assert_eq!(connector.closed(), 1);

        let second = manager.connect().await.unwrap();
        assert_ne!(first.session_id(), second.session_id());
        assert_eq!(connector.opened(), 2);
    }

    #[tokio::test]
    async fn with_database_connects_then_runs_operation() {
        let connector = Arc::new(CountingConnector::default());
        let manager = ConnectionManager::new(settings_with_url(), connector.clone());

        let id = manager
            .with_database(|h| async move { Ok(h.session_id()) })
            .await
            .unwrap();
        assert_eq!(manager.connect().await.unwrap().session_id(), id);

        let err = manager
            .with_database(|_| async { Err::<(), _>(AppError::NotFound("user".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
