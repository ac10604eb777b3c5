use std::{
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use futures::future::BoxFuture;
use sqlx::{
    query,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions},
};
use thiserror::Error;
use tokio::{sync::OnceCell, time::sleep};

use crate::config::StoreConfig;

pub mod chapters;
pub mod manga;
pub mod subscriptions;

use chapters::ChapterQueue;
use manga::MangaRepository;
use subscriptions::SubscriptionRepository;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS manga (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        feed_url TEXT NOT NULL UNIQUE,
        last_chapter INTEGER,
        checked_at DATETIME,
        added_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS subscriptions (
        chat_id INTEGER NOT NULL,
        manga_id INTEGER NOT NULL REFERENCES manga(id) ON DELETE CASCADE,
        added_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY (chat_id, manga_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chapter_jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        manga_id INTEGER NOT NULL REFERENCES manga(id) ON DELETE CASCADE,
        chapter INTEGER NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        worker INTEGER,
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        finished_at DATETIME,
        UNIQUE (manga_id, chapter)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chapters (
        manga_id INTEGER NOT NULL REFERENCES manga(id) ON DELETE CASCADE,
        chapter INTEGER NOT NULL,
        title TEXT,
        page_count INTEGER NOT NULL,
        created_by INTEGER NOT NULL,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY (manga_id, chapter)
    )
    "#,
];

/// The store could not be reached within the connector's retry policy.
#[derive(Debug, Error)]
#[error("store unavailable after {attempts} connect attempt(s): {reason}")]
pub struct StoreUnavailable {
    pub attempts: u32,
    pub reason: String,
}

/// Connect lifecycle of the shared store.
pub trait StoreConnector: Send + Sync {
    type Handle: Clone + Send + Sync + 'static;

    fn connect(&self) -> BoxFuture<'_, Result<Self::Handle, StoreUnavailable>>;
}

/// Shared handle over the single SQLite pool of the process.
#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn manga(&self) -> MangaRepository {
        MangaRepository::new(self.pool.clone())
    }

    pub fn subscriptions(&self) -> SubscriptionRepository {
        SubscriptionRepository::new(self.pool.clone())
    }

    pub fn chapters(&self) -> ChapterQueue {
        ChapterQueue::new(self.pool.clone())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

pub struct SqliteConnector {
    db_path: PathBuf,
    config: StoreConfig,
    database: OnceCell<Database>,
}

impl SqliteConnector {
    pub fn new(db_path: impl Into<PathBuf>, config: StoreConfig) -> Self {
        Self {
            db_path: db_path.into(),
            config,
            database: OnceCell::new(),
        }
    }

    async fn connect_with_retry(&self) -> Result<Database, StoreUnavailable> {
        let attempts = self.config.connect_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match init_pool(&self.db_path, self.config.max_connections).await {
                Ok(pool) => {
                    tracing::info!(
                        target: "store",
                        path = %self.db_path.display(),
                        attempt,
                        "store connected"
                    );
                    return Ok(Database::new(pool));
                }
                Err(err) => {
                    tracing::warn!(
                        target: "store",
                        path = %self.db_path.display(),
                        attempt,
                        attempts,
                        error = %err,
                        "store connect attempt failed"
                    );
                    last_error = format!("{err:#}");
                    if attempt < attempts {
                        sleep(self.config.retry_delay).await;
                    }
                }
            }
        }
        Err(StoreUnavailable {
            attempts,
            reason: last_error,
        })
    }
}

impl StoreConnector for SqliteConnector {
    type Handle = Database;

    fn connect(&self) -> BoxFuture<'_, Result<Database, StoreUnavailable>> {
        Box::pin(async move {
            self.database
                .get_or_try_init(|| self.connect_with_retry())
                .await
                .cloned()
        })
    }
}

pub async fn init_pool(db_path: &Path, max_connections: u32) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5))
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    for statement in SCHEMA {
        query(statement).execute(&pool).await?;
    }

    let requeued = ChapterQueue::new(pool.clone()).requeue_interrupted().await?;
    if requeued > 0 {
        tracing::info!(target: "store", requeued, "requeued chapter jobs interrupted by a previous run");
    }

    Ok(pool)
}

#[cfg(test)]
pub(crate) async fn test_database(dir: &tempfile::TempDir) -> Database {
    Database::new(init_pool(&dir.path().join("test.db"), 5).await.unwrap())
}
