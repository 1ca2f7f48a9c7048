//! Durable single-use nonce registry.
//!
//! Admission is a single `INSERT OR IGNORE` against a `UNIQUE` column, so two
//! requests racing with the same nonce (even from separate processes sharing
//! the database file) cannot both win.
//!
//! When the store itself is unusable the guard admits the nonce, so replay
//! protection is off for as long as the database is broken.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rusqlite::{Connection, params};
use thiserror::Error;
use tracing::{debug, warn};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS nonces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    nonce TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);";

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("cannot prepare nonce store directory {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("nonce store error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Records nonces. One operation: insert unless already present.
pub trait NonceStore: Send + Sync + 'static {
    /// Returns `true` iff this call created the record.
    fn insert_if_absent(&self, nonce: &str) -> Result<bool, ReplayError>;
}

/// SQLite-backed [`NonceStore`]. A fresh connection is opened per call.
pub struct SqliteNonceStore {
    path: PathBuf,
}

impl SqliteNonceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn open(&self) -> Result<Connection, ReplayError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ReplayError::Directory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(conn)
    }
}

impl NonceStore for SqliteNonceStore {
    fn insert_if_absent(&self, nonce: &str) -> Result<bool, ReplayError> {
        let conn = self.open()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO nonces (nonce, created_at) VALUES (?1, ?2)",
            params![nonce, Utc::now().to_rfc3339()],
        )?;
        Ok(inserted == 1)
    }
}

/// Admits each nonce at most once. Fails open on storage errors.
#[derive(Clone)]
pub struct ReplayGuard {
    store: Arc<dyn NonceStore>,
}

impl ReplayGuard {
    pub fn new(store: impl NonceStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self::new(SqliteNonceStore::new(path))
    }

    /// Blocking. Returns `true` on first sight of `nonce`.
    pub fn consume_nonce(&self, nonce: &str) -> bool {
        match self.store.insert_if_absent(nonce) {
            Ok(true) => true,
            Ok(false) => {
                debug!(nonce, "Nonce already consumed");
                false
            }
            Err(e) => {
                warn!(nonce, error = %e, "Nonce store unavailable, admitting nonce");
                true
            }
        }
    }

    /// Runs [`consume_nonce`](Self::consume_nonce) on the blocking pool.
    pub async fn consume(&self, nonce: &str) -> bool {
        let guard = self.clone();
        let nonce = nonce.to_owned();
        match tokio::task::spawn_blocking(move || guard.consume_nonce(&nonce)).await {
            Ok(admitted) => admitted,
            Err(e) => {
                warn!(error = %e, "Nonce check task failed, admitting nonce");
                true
            }
        }
    }
}
