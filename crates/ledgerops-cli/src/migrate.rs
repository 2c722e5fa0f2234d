use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use ledgerops_config::AppConfig;
use ledgerops_db::{MigrationError, MigrationRunner, MigrationScript, MigrationStatus};
use tracing::info;

use crate::summary;

#[derive(Subcommand)]
pub enum MigrateAction {
    /// Apply a single migration script
    Apply {
        /// Path to the SQL file, named `<id>_<name>.sql` unless --id is given
        file: PathBuf,
        /// Identifier to record the script under
        #[arg(long)]
        id: Option<String>,
    },
    /// Apply every script in the migrations directory, in order
    Up {
        /// Overrides `migrations.dir` from the config
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Show which scripts are applied, pending or drifted; exits 3 on drift
    Status {
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn run(action: MigrateAction, config: &AppConfig) -> Result<()> {
    match action {
        MigrateAction::Apply { file, id } => {
            let script = match id {
                Some(id) => MigrationScript::from_file_with_id(&file, id)?,
                None => MigrationScript::from_file(&file)?,
            };
            let runner = runner(config)?;
            let applied = runner.apply(&script)?;
            summary::print_applied(&runner.target(), std::slice::from_ref(&applied));
        }
        MigrateAction::Up { dir } => {
            let dir = dir.unwrap_or_else(|| config.migrations.dir.clone());
            let scripts = MigrationScript::load_dir(&dir)?;
            if scripts.is_empty() {
                println!("No migrations found in {}", dir.display());
                return Ok(());
            }
            info!("found {} migration(s) in {}", scripts.len(), dir.display());
            let runner = runner(config)?;
            let results = runner.apply_all(&scripts)?;
            summary::print_applied(&runner.target(), &results);
        }
        MigrateAction::Status { dir, json } => {
            let dir = dir.unwrap_or_else(|| config.migrations.dir.clone());
            let scripts = MigrationScript::load_dir(&dir)?;
            let runner = runner(config)?;
            let report = runner.status(&scripts)?;

            if json {
                let out = serde_json::to_string_pretty(&report)
                    .context("failed to serialize status report")?;
                println!("{out}");
            } else {
                summary::print_status(&runner.target(), &report);
            }

            if let Some(MigrationStatus::Drifted { record, checksum }) = report
                .iter()
                .find(|s| matches!(s, MigrationStatus::Drifted { .. }))
            {
                return Err(MigrationError::Drift {
                    identifier: record.identifier.to_string(),
                    recorded: record.checksum.clone(),
                    current: checksum.clone(),
                }
                .into());
            }
        }
    }
    Ok(())
}

fn runner(config: &AppConfig) -> Result<MigrationRunner> {
    Ok(MigrationRunner::from_config(&config.database)?)
}
