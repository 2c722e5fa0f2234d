use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;
use tracing::debug;

use crate::error::{MigrationError, Result};

/// A parsed database connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    File(PathBuf),
    Memory,
}

impl DatabaseTarget {
    /// Accepts a bare path, `sqlite://<path>`, `sqlite:<path>` or `:memory:`.
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(MigrationError::Connection {
                target: String::new(),
                reason: "database url is empty".into(),
            });
        }

        let rest = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);

        if rest == ":memory:" {
            return Ok(Self::Memory);
        }
        if let Some((scheme, _)) = rest.split_once("://") {
            // Never echo the rest of the url: it may carry credentials.
            return Err(MigrationError::Connection {
                target: format!("{scheme}://..."),
                reason: format!("unsupported database scheme {scheme:?}"),
            });
        }
        if rest.is_empty() {
            return Err(MigrationError::Connection {
                target: url.to_string(),
                reason: "database path is empty".into(),
            });
        }
        Ok(Self::File(PathBuf::from(rest)))
    }

    /// Build the connection source for this target.
    pub fn open(&self, busy_timeout: Duration) -> Result<Box<dyn ConnectionSource>> {
        match self {
            Self::File(path) => Ok(Box::new(FileDatabase::new(path, busy_timeout))),
            Self::Memory => Ok(Box::new(SharedDatabase::in_memory()?)),
        }
    }
}

/// Hands out connections whose lifetime is bounded by the returned guard.
pub trait ConnectionSource: Send + Sync {
    fn acquire(&self) -> Result<ScopedConnection<'_>>;

    /// Human-readable target, for logs and error messages.
    fn describe(&self) -> String;
}

/// A connection that is closed (or handed back) when dropped.
pub enum ScopedConnection<'a> {
    Owned(Connection),
    Shared(MutexGuard<'a, Connection>),
}

impl Deref for ScopedConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        match self {
            Self::Owned(conn) => conn,
            Self::Shared(guard) => &**guard,
        }
    }
}

impl DerefMut for ScopedConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        match self {
            Self::Owned(conn) => conn,
            Self::Shared(guard) => &mut **guard,
        }
    }
}

/// An on-disk SQLite database. Every acquisition opens a fresh connection.
#[derive(Debug, Clone)]
pub struct FileDatabase {
    path: PathBuf,
    busy_timeout: Duration,
}

impl FileDatabase {
    pub fn new(path: impl Into<PathBuf>, busy_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            busy_timeout,
        }
    }

    fn connection_error(&self, reason: impl std::fmt::Display) -> MigrationError {
        MigrationError::Connection {
            target: self.describe(),
            reason: reason.to_string(),
        }
    }
}

impl ConnectionSource for FileDatabase {
    fn acquire(&self) -> Result<ScopedConnection<'_>> {
        debug!("opening database at {}", self.path.display());
        let conn = Connection::open(&self.path).map_err(|e| self.connection_error(e))?;

        conn.busy_timeout(self.busy_timeout)
            .map_err(|e| self.connection_error(format!("failed to set busy timeout: {e}")))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| self.connection_error(format!("failed to set pragmas: {e}")))?;

        Ok(ScopedConnection::Owned(conn))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// A single connection shared behind a mutex, typically in-memory. The lock
/// guard is the scope: holding it excludes every other user.
pub struct SharedDatabase {
    conn: Mutex<Connection>,
    label: String,
}

impl SharedDatabase {
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| MigrationError::Connection {
            target: ":memory:".into(),
            reason: e.to_string(),
        })?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| MigrationError::Connection {
                target: ":memory:".into(),
                reason: format!("failed to set pragmas: {e}"),
            })?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        let label = conn
            .path()
            .filter(|p| !p.is_empty())
            .unwrap_or(":memory:")
            .to_string();
        Self {
            conn: Mutex::new(conn),
            label,
        }
    }
}

impl ConnectionSource for SharedDatabase {
    fn acquire(&self) -> Result<ScopedConnection<'_>> {
        let guard = self.conn.lock().map_err(|_| MigrationError::Connection {
            target: self.describe(),
            reason: "connection lock poisoned".into(),
        })?;
        Ok(ScopedConnection::Shared(guard))
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

impl<T: ConnectionSource + ?Sized> ConnectionSource for Arc<T> {
    fn acquire(&self) -> Result<ScopedConnection<'_>> {
        (**self).acquire()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_urls() {
        assert_eq!(
            DatabaseTarget::parse("ledger.db").unwrap(),
            DatabaseTarget::File(PathBuf::from("ledger.db"))
        );
        assert_eq!(
            DatabaseTarget::parse("sqlite:///var/lib/ledger.db").unwrap(),
            DatabaseTarget::File(PathBuf::from("/var/lib/ledger.db"))
        );
        assert_eq!(
            DatabaseTarget::parse("sqlite:data/ledger.db").unwrap(),
            DatabaseTarget::File(PathBuf::from("data/ledger.db"))
        );
        assert_eq!(DatabaseTarget::parse(":memory:").unwrap(), DatabaseTarget::Memory);
        assert_eq!(
            DatabaseTarget::parse("sqlite://:memory:").unwrap(),
            DatabaseTarget::Memory
        );
    }

    #[test]
    fn rejects_foreign_schemes_and_empty_urls() {
        let err = DatabaseTarget::parse("postgres://user:pw@localhost/ledger").unwrap_err();
        assert_eq!(err.kind(), "connection");
        assert!(err.to_string().contains("postgres"), "{err}");

        assert!(DatabaseTarget::parse("   ").is_err());
        assert!(DatabaseTarget::parse("sqlite://").is_err());
    }

    #[test]
    fn file_database_opens_a_fresh_connection_each_time() {
        let dir = tempfile::tempdir().unwrap();
        let db = FileDatabase::new(dir.path().join("ledger.db"), Duration::from_millis(100));

        {
            let conn = db.acquire().unwrap();
            conn.execute_batch("CREATE TABLE accounts (id INTEGER PRIMARY KEY);")
                .unwrap();
        }

        let conn = db.acquire().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='accounts'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn file_database_reports_unopenable_path() {
        let dir = tempfile::tempdir().unwrap();
        let db = FileDatabase::new(
            dir.path().join("missing-dir").join("ledger.db"),
            Duration::from_millis(100),
        );
        let err = db.acquire().err().expect("open should fail");
        assert_eq!(err.kind(), "connection");
    }

    #[test]
    fn shared_database_keeps_state_between_acquisitions() {
        let db = SharedDatabase::in_memory().unwrap();
        db.acquire()
            .unwrap()
            .execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1);")
            .unwrap();

        let x: i64 = db
            .acquire()
            .unwrap()
            .query_row("SELECT x FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(x, 1);
        assert_eq!(db.describe(), ":memory:");
    }
}
