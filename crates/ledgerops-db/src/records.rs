use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use ledgerops_security::InputValidator;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MigrationError, Result};
use crate::migrations::{MigrationId, MigrationScript};

pub const DEFAULT_TABLE: &str = "_migrations";

/// One row of the record table: proof that a migration was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub identifier: MigrationId,
    pub name: String,
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
}

impl MigrationRecord {
    /// `applied_at` is truncated to microseconds, the precision the record
    /// table stores, so the record compares equal to what is read back.
    pub fn for_script(script: &MigrationScript, applied_at: DateTime<Utc>) -> Self {
        Self {
            identifier: script.id().clone(),
            name: script.name().to_string(),
            checksum: script.checksum().to_string(),
            applied_at: applied_at.trunc_subsecs(6),
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let identifier: String = row.get(0)?;
        let applied_at: String = row.get(3)?;
        Ok(Self {
            identifier: MigrationId::new(identifier).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))
            })?,
            name: row.get(1)?,
            checksum: row.get(2)?,
            applied_at: parse_datetime(&applied_at).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e))
            })?,
        })
    }
}

/// The table recording applied migrations. The identifier is the primary
/// key, so at most one record can exist per migration.
#[derive(Debug, Clone)]
pub struct RecordTable {
    name: String,
}

impl Default for RecordTable {
    fn default() -> Self {
        Self {
            name: DEFAULT_TABLE.to_string(),
        }
    }
}

impl RecordTable {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        InputValidator::validate_sql_identifier(&name)
            .map_err(|e| MigrationError::Invalid(format!("bad migrations table name: {e}")))?;
        Ok(Self { name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ensure(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                identifier TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL,
                checksum TEXT NOT NULL,
                applied_at TEXT NOT NULL
            );",
            self.name
        ))
        .map_err(MigrationError::tracking(format!(
            "failed to create {}",
            self.name
        )))
    }

    pub fn exists(&self, conn: &Connection) -> Result<bool> {
        conn.query_row(
            "SELECT count(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1",
            params![self.name],
            |row| row.get(0),
        )
        .map_err(MigrationError::tracking(format!(
            "failed to look up {}",
            self.name
        )))
    }

    pub fn find(&self, conn: &Connection, id: &MigrationId) -> Result<Option<MigrationRecord>> {
        conn.query_row(
            &format!(
                "SELECT identifier, name, checksum, applied_at FROM {} WHERE identifier = ?1",
                self.name
            ),
            params![id.as_str()],
            MigrationRecord::from_row,
        )
        .optional()
        .map_err(MigrationError::tracking(format!(
            "failed to read record for {id}"
        )))
    }

    /// Insert `record`. The raw database error is returned so the caller
    /// can tell a lost race (primary key conflict) from other failures.
    pub fn insert(&self, conn: &Connection, record: &MigrationRecord) -> rusqlite::Result<()> {
        conn.execute(
            &format!(
                "INSERT INTO {} (identifier, name, checksum, applied_at) VALUES (?1, ?2, ?3, ?4)",
                self.name
            ),
            params![
                record.identifier.as_str(),
                record.name,
                record.checksum,
                record
                    .applied_at
                    .to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )?;
        debug!("recorded migration {} in {}", record.identifier, self.name);
        Ok(())
    }

    /// All records, ordered by identifier.
    pub fn list(&self, conn: &Connection) -> Result<Vec<MigrationRecord>> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT identifier, name, checksum, applied_at FROM {}",
                self.name
            ))
            .map_err(MigrationError::tracking("failed to prepare query"))?;

        let mut records = stmt
            .query_map([], MigrationRecord::from_row)
            .map_err(MigrationError::tracking("failed to query records"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(MigrationError::tracking("failed to read record row"))?;

        records.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        Ok(records)
    }
}

pub(crate) fn is_primary_key_conflict(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn parse_datetime(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Rows inserted by hand with datetime('now') use "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|naive| naive.and_utc())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn_with_table() -> (Connection, RecordTable) {
        let conn = Connection::open_in_memory().unwrap();
        let table = RecordTable::default();
        table.ensure(&conn).unwrap();
        (conn, table)
    }

    #[test]
    fn ensure_is_idempotent() {
        let (conn, table) = conn_with_table();
        table.ensure(&conn).unwrap();
        assert!(table.exists(&conn).unwrap());
        assert!(table.list(&conn).unwrap().is_empty());
    }

    #[test]
    fn rejects_unsafe_table_names() {
        assert!(RecordTable::new("schema_history").is_ok());
        let err = RecordTable::new("x; DROP TABLE accounts").unwrap_err();
        assert_eq!(err.kind(), "invalid");
    }

    #[test]
    fn insert_then_find_round_trip() {
        let (conn, table) = conn_with_table();
        let script = MigrationScript::new("030", "budgets", "SELECT 1;").unwrap();
        let record = MigrationRecord::for_script(&script, Utc::now());
        table.insert(&conn, &record).unwrap();

        let found = table.find(&conn, script.id()).unwrap().unwrap();
        assert_eq!(found, record);
        assert_eq!(found.checksum, script.checksum());

        let missing = MigrationId::new("031").unwrap();
        assert!(table.find(&conn, &missing).unwrap().is_none());
    }

    #[test]
    fn record_timestamp_keeps_microsecond_precision() {
        let script = MigrationScript::new("030", "budgets", "SELECT 1;").unwrap();
        let at = DateTime::parse_from_rfc3339("2024-03-01T12:30:45.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        let record = MigrationRecord::for_script(&script, at);
        assert_eq!(record.applied_at.timestamp_subsec_nanos(), 123_456_000);

        let (conn, table) = conn_with_table();
        table.insert(&conn, &record).unwrap();
        assert_eq!(table.find(&conn, script.id()).unwrap(), Some(record));
    }

    #[test]
    fn second_insert_is_a_primary_key_conflict() {
        let (conn, table) = conn_with_table();
        let script = MigrationScript::new("030", "budgets", "SELECT 1;").unwrap();
        let record = MigrationRecord::for_script(&script, Utc::now());
        table.insert(&conn, &record).unwrap();

        let err = table.insert(&conn, &record).unwrap_err();
        assert!(is_primary_key_conflict(&err), "{err}");
        assert_eq!(table.list(&conn).unwrap().len(), 1);
    }

    #[test]
    fn list_orders_numerically() {
        let (conn, table) = conn_with_table();
        for id in ["100", "20", "3"] {
            let script = MigrationScript::new(id, "", "SELECT 1;").unwrap();
            table
                .insert(&conn, &MigrationRecord::for_script(&script, Utc::now()))
                .unwrap();
        }
        let ids: Vec<String> = table
            .list(&conn)
            .unwrap()
            .into_iter()
            .map(|r| r.identifier.to_string())
            .collect();
        assert_eq!(ids, ["3", "20", "100"]);
    }

    #[test]
    fn reads_sqlite_style_timestamps() {
        let (conn, table) = conn_with_table();
        conn.execute(
            "INSERT INTO _migrations VALUES ('001', 'seed', 'abc', '2024-01-01 12:30:00')",
            [],
        )
        .unwrap();
        let record = table
            .find(&conn, &MigrationId::new("001").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(record.applied_at.to_rfc3339(), "2024-01-01T12:30:00+00:00");
    }
}
