pub mod connection;
pub mod error;
pub mod migrations;
pub mod records;
pub mod runner;

pub use connection::{ConnectionSource, DatabaseTarget, FileDatabase, ScopedConnection, SharedDatabase};
pub use error::{MigrationError, Result};
pub use migrations::{MigrationId, MigrationScript, compute_checksum};
pub use records::{DEFAULT_TABLE, MigrationRecord, RecordTable};
pub use runner::{Applied, MigrationRunner, MigrationStatus, RunnerOptions};
