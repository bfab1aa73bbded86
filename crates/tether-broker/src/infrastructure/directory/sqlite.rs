//! SQLite-backed Session Directory.
//!
//! Every broker instance that can reach the same database file shares one
//! claim table, and the unique index on `session_id` is the cross-process
//! mutual-exclusion primitive:
//!
//! - **claim** is a plain `INSERT`; losing the race surfaces as a
//!   constraint violation, which maps to [`ClaimOutcome::Conflict`].
//! - **release** is `DELETE ... WHERE session_id = ? AND etag = ?`, so a stale
//!   token can never remove somebody else's newer entry.
//!
//! `rusqlite` is synchronous.  Every statement runs on tokio's blocking pool
//! behind a `std::sync::Mutex`, so the async workers never wait on disk I/O.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode};
use tracing::{debug, info};

use tether_core::{ClaimToken, DirectoryEntry};

use crate::application::directory::{ClaimOutcome, DirectoryError, SessionDirectory};

/// How long a statement waits on another process's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS tether_sessions (
        session_id  TEXT    NOT NULL,
        etag        TEXT    NOT NULL,
        broker_host TEXT    NOT NULL,
        broker_ip   TEXT    NOT NULL,
        broker_port INTEGER NOT NULL,
        created_at  TEXT    NOT NULL DEFAULT (datetime('now'))
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_tether_sessions_session_id
        ON tether_sessions(session_id);";

pub struct SqliteDirectory {
    path: PathBuf,
    conn: Arc<StdMutex<Option<Connection>>>,
}

impl SqliteDirectory {
    /// Creates an unprovisioned directory for the database at `path`.
    ///
    /// Nothing is opened until [`SessionDirectory::provision`] runs.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conn: Arc::new(StdMutex::new(None)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `op` against the open connection on the blocking pool.
    async fn with_conn<T, F>(&self, op: F) -> Result<T, DirectoryError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, DirectoryError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| DirectoryError::Store(format!("connection lock poisoned: {e}")))?;
            let conn = guard.as_ref().ok_or(DirectoryError::NotProvisioned)?;
            op(conn)
        })
        .await
        .map_err(|e| DirectoryError::Store(format!("blocking task failed: {e}")))?
    }
}

fn open(path: &Path) -> Result<Connection, DirectoryError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            DirectoryError::Unavailable(format!("cannot create {}: {e}", parent.display()))
        })?;
    }
    let conn = Connection::open(path).map_err(|e| {
        DirectoryError::Unavailable(format!("cannot open {}: {e}", path.display()))
    })?;
    conn.busy_timeout(BUSY_TIMEOUT).map_err(store_error)?;
    // WAL lets readers and the single writer proceed together.
    conn.pragma_update(None, "journal_mode", "WAL").ok();
    Ok(conn)
}

fn store_error(e: rusqlite::Error) -> DirectoryError {
    DirectoryError::Store(e.to_string())
}

#[async_trait]
impl SessionDirectory for SqliteDirectory {
    async fn provision(&self) -> Result<(), DirectoryError> {
        let path = self.path.clone();
        let slot = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|e| DirectoryError::Store(format!("connection lock poisoned: {e}")))?;
            if guard.is_none() {
                *guard = Some(open(&path)?);
            }
            if let Some(conn) = guard.as_ref() {
                conn.execute_batch(SCHEMA).map_err(store_error)?;
            }
            info!(path = %path.display(), "sqlite session directory provisioned");
            Ok(())
        })
        .await
        .map_err(|e| DirectoryError::Store(format!("blocking task failed: {e}")))?
    }

    async fn claim(&self, entry: &DirectoryEntry) -> Result<ClaimOutcome, DirectoryError> {
        let entry = entry.clone();
        self.with_conn(move |conn| {
            let token = ClaimToken::generate();
            let inserted = conn.execute(
                "INSERT INTO tether_sessions (session_id, etag, broker_host, broker_ip, broker_port)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entry.session_id,
                    token.as_str(),
                    entry.broker.host,
                    entry.broker.ip.to_string(),
                    i64::from(entry.broker.port),
                ],
            );
            match inserted {
                Ok(_) => Ok(ClaimOutcome::Granted(token)),
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    Ok(ClaimOutcome::Conflict)
                }
                Err(e) => Err(store_error(e)),
            }
        })
        .await
    }

    async fn release(&self, session_id: &str, token: &ClaimToken) -> Result<(), DirectoryError> {
        let session_id = session_id.to_string();
        let token = token.clone();
        self.with_conn(move |conn| {
            let deleted = conn
                .execute(
                    "DELETE FROM tether_sessions WHERE session_id = ?1 AND etag = ?2",
                    params![session_id, token.as_str()],
                )
                .map_err(store_error)?;
            if deleted == 0 {
                debug!(session_id = %session_id, "release skipped: entry gone or version token mismatch");
            }
            Ok(())
        })
        .await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
