use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use ledgerops_config::DatabaseConfig;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionSource, DatabaseTarget};
use crate::error::{MigrationError, Result};
use crate::migrations::{MigrationId, MigrationScript};
use crate::records::{DEFAULT_TABLE, MigrationRecord, RecordTable, is_primary_key_conflict};

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Table that records applied migrations.
    pub migrations_table: String,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            migrations_table: DEFAULT_TABLE.to_string(),
        }
    }
}

/// Outcome of a successful [`MigrationRunner::apply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Applied {
    /// The record now in the table: freshly inserted, or the existing one
    /// when the migration was skipped.
    pub record: MigrationRecord,
    /// `true` when the migration had already been applied with the same
    /// checksum and nothing was executed.
    pub skipped: bool,
}

impl Applied {
    pub fn identifier(&self) -> &MigrationId {
        &self.record.identifier
    }
}

/// Read-only view of one migration against the record table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MigrationStatus {
    Pending {
        identifier: MigrationId,
        name: String,
    },
    Applied {
        record: MigrationRecord,
    },
    /// Applied, but the script on disk no longer matches what was applied.
    Drifted {
        record: MigrationRecord,
        checksum: String,
    },
    /// Recorded as applied, but no script with this identifier was given.
    Orphaned {
        record: MigrationRecord,
    },
}

impl MigrationStatus {
    pub fn identifier(&self) -> &MigrationId {
        match self {
            Self::Pending { identifier, .. } => identifier,
            Self::Applied { record }
            | Self::Drifted { record, .. }
            | Self::Orphaned { record } => &record.identifier,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending { .. } => "pending",
            Self::Applied { .. } => "applied",
            Self::Drifted { .. } => "drifted",
            Self::Orphaned { .. } => "orphaned",
        }
    }
}

/// Applies migration scripts to one database, each at most once.
///
/// Every call acquires its own connection from the [`ConnectionSource`] and
/// releases it before returning, on success and failure alike.
pub struct MigrationRunner {
    source: Box<dyn ConnectionSource>,
    table: RecordTable,
}

impl MigrationRunner {
    pub fn new(source: impl ConnectionSource + 'static, options: RunnerOptions) -> Result<Self> {
        Self::with_source(Box::new(source), options)
    }

    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| MigrationError::Connection {
                target: "<unset>".into(),
                reason: "no database url configured".into(),
            })?;
        let target = DatabaseTarget::parse(url)?;
        let source = target.open(Duration::from_millis(config.busy_timeout_ms))?;
        Self::with_source(
            source,
            RunnerOptions {
                migrations_table: config.migrations_table.clone(),
            },
        )
    }

    fn with_source(source: Box<dyn ConnectionSource>, options: RunnerOptions) -> Result<Self> {
        let table = RecordTable::new(options.migrations_table)?;
        debug!(
            "migration runner for {} using table {}",
            source.describe(),
            table.name()
        );
        Ok(Self { source, table })
    }

    pub fn target(&self) -> String {
        self.source.describe()
    }

    /// Apply `script` unless it has already been applied.
    ///
    /// - recorded with the same checksum: `Applied { skipped: true }`, no writes;
    /// - recorded with a different checksum: [`MigrationError::Drift`], nothing executed;
    /// - otherwise the source runs as one batch in a transaction together with
    ///   the record insert. Any failure rolls the whole transaction back.
    ///
    /// The write lock is taken before the lookup (`BEGIN IMMEDIATE`), so
    /// concurrent runners on the same database serialize.
    ///
    /// Scripts that begin, commit or roll back a transaction themselves are
    /// rejected as [`MigrationError::Invalid`] before anything runs.
    pub fn apply(&self, script: &MigrationScript) -> Result<Applied> {
        let id = script.id();
        if let Some(statement) = script.transaction_control() {
            return Err(MigrationError::Invalid(format!(
                "migration {id} contains a {statement} statement; \
                 scripts must not manage their own transaction"
            )));
        }

        let mut conn = self.source.acquire()?;
        self.table.ensure(&conn)?;

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|source| MigrationError::Execution {
                identifier: id.to_string(),
                source,
            })?;

        if let Some(record) = self.table.find(&tx, id)? {
            rollback(tx, id);
            return reconcile(script, record);
        }

        info!("applying migration {id} ({})", script.name());
        if let Err(source) = tx.execute_batch(script.source()) {
            warn!("migration {id} failed, rolling back: {source}");
            rollback(tx, id);
            return Err(MigrationError::Execution {
                identifier: id.to_string(),
                source,
            });
        }
        if tx.is_autocommit() {
            // The batch ended our transaction; never record it as applied.
            drop(tx);
            return Err(MigrationError::Invalid(format!(
                "migration {id} ended the runner's transaction"
            )));
        }

        let record = MigrationRecord::for_script(script, Utc::now());
        if let Err(err) = self.table.insert(&tx, &record) {
            rollback(tx, id);
            if is_primary_key_conflict(&err) {
                return self.recover_from_conflict(&conn, script, err);
            }
            return Err(MigrationError::tracking(format!(
                "failed to record migration {id}"
            ))(err));
        }

        tx.commit().map_err(|source| MigrationError::Execution {
            identifier: id.to_string(),
            source,
        })?;

        info!("migration {id} applied");
        Ok(Applied {
            record,
            skipped: false,
        })
    }

    /// Another runner recorded `script` between our lookup and our insert.
    /// Its record decides the outcome, like a lookup hit would.
    fn recover_from_conflict(
        &self,
        conn: &Connection,
        script: &MigrationScript,
        conflict: rusqlite::Error,
    ) -> Result<Applied> {
        let id = script.id();
        debug!("migration {id} was recorded concurrently");
        let existing = self
            .table
            .find(conn, id)?
            .ok_or_else(|| MigrationError::Tracking {
                context: format!("record for {id} vanished after conflict"),
                source: conflict,
            })?;
        reconcile(script, existing)
    }

    /// Apply `scripts` in identifier order, stopping at the first failure.
    /// Migrations applied before the failure stay committed.
    pub fn apply_all(&self, scripts: &[MigrationScript]) -> Result<Vec<Applied>> {
        let mut ordered: Vec<&MigrationScript> = scripts.iter().collect();
        ordered.sort_by(|a, b| a.id().cmp(b.id()));
        if let Some(pair) = ordered.windows(2).find(|w| w[0].id() == w[1].id()) {
            return Err(MigrationError::Invalid(format!(
                "duplicate migration identifier {}",
                pair[0].id()
            )));
        }

        let mut results = Vec::with_capacity(ordered.len());
        for script in ordered {
            results.push(self.apply(script)?);
        }

        let applied = results.iter().filter(|a| !a.skipped).count();
        info!(
            "{applied} migration(s) applied, {} already up to date",
            results.len() - applied
        );
        Ok(results)
    }

    /// Every recorded migration, ordered by identifier. Does not create the
    /// record table.
    pub fn applied(&self) -> Result<Vec<MigrationRecord>> {
        let conn = self.source.acquire()?;
        if !self.table.exists(&conn)? {
            return Ok(Vec::new());
        }
        self.table.list(&conn)
    }

    /// Compare `scripts` with the record table without changing anything.
    pub fn status(&self, scripts: &[MigrationScript]) -> Result<Vec<MigrationStatus>> {
        let mut records: HashMap<MigrationId, MigrationRecord> = self
            .applied()?
            .into_iter()
            .map(|r| (r.identifier.clone(), r))
            .collect();

        let mut report: Vec<MigrationStatus> = scripts
            .iter()
            .map(|script| match records.remove(script.id()) {
                None => MigrationStatus::Pending {
                    identifier: script.id().clone(),
                    name: script.name().to_string(),
                },
                Some(record) if record.checksum == script.checksum() => {
                    MigrationStatus::Applied { record }
                }
                Some(record) => MigrationStatus::Drifted {
                    record,
                    checksum: script.checksum().to_string(),
                },
            })
            .collect();

        report.extend(
            records
                .into_values()
                .map(|record| MigrationStatus::Orphaned { record }),
        );
        report.sort_by(|a, b| a.identifier().cmp(b.identifier()));
        Ok(report)
    }
}

fn reconcile(script: &MigrationScript, record: MigrationRecord) -> Result<Applied> {
    if record.checksum == script.checksum() {
        debug!("migration {} already applied, skipping", script.id());
        return Ok(Applied {
            record,
            skipped: true,
        });
    }
    warn!(
        "migration {} drifted: recorded {} but script is {}",
        script.id(),
        record.checksum,
        script.checksum()
    );
    Err(MigrationError::Drift {
        identifier: script.id().to_string(),
        recorded: record.checksum,
        current: script.checksum().to_string(),
    })
}

fn rollback(tx: Transaction<'_>, id: &MigrationId) {
    if let Err(e) = tx.rollback() {
        warn!("rollback of migration {id} failed: {e}");
    }
}
