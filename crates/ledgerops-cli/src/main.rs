mod migrate;
mod password;
mod summary;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ledgerops_config::{AppConfig, ConfigLoader};
use ledgerops_db::MigrationError;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ledgerops", version, about = "Ledger backend maintenance tooling")]
struct Cli {
    /// Config file (YAML, TOML or JSON). Defaults to ~/.ledgerops/config.yml
    #[arg(long, global = true, env = "LEDGEROPS_CONFIG")]
    config: Option<PathBuf>,

    /// Database connection string; overrides config and environment
    #[arg(long, global = true)]
    database: Option<String>,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Apply and inspect SQL migrations
    Migrate {
        #[command(subcommand)]
        action: migrate::MigrateAction,
    },
    /// Hash a password with Argon2id and print the PHC string
    HashPassword {
        /// Password to hash; prompted for (or read from stdin) when omitted
        #[arg(long)]
        password: Option<String>,
    },
    /// Check a password against a PHC hash; exits non-zero on mismatch
    VerifyPassword {
        #[arg(long)]
        hash: String,
        #[arg(long)]
        password: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {}: {}", error_kind(&err), render_error(&err));
            ExitCode::from(exit_code(&err))
        }
    }
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let default = if verbose {
        "warn,ledgerops=debug"
    } else {
        "warn,ledgerops=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Migrate { action } => {
            let config = load_config(cli.config, cli.database)?;
            migrate::run(action, &config)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::HashPassword { password } => {
            password::hash(password)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::VerifyPassword { hash, password } => {
            if password::verify(&hash, password)? {
                println!("password matches");
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("password does not match");
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

fn load_config(path: Option<PathBuf>, database: Option<String>) -> Result<AppConfig> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = path {
        loader = loader.with_file(path);
    }
    let mut config = loader.load().context("failed to load configuration")?;
    if let Some(url) = database {
        config.database.url = Some(url);
    }
    Ok(config)
}

/// Join the error chain like `{:#}` does, minus causes whose text the
/// previous message already ends with.
fn render_error(err: &anyhow::Error) -> String {
    let mut out = err.to_string();
    for cause in err.chain().skip(1) {
        let cause = cause.to_string();
        if !out.ends_with(&cause) {
            out.push_str(": ");
            out.push_str(&cause);
        }
    }
    out
}

fn error_kind(err: &anyhow::Error) -> &'static str {
    if let Some(e) = err.downcast_ref::<MigrationError>() {
        return e.kind();
    }
    match err.downcast_ref::<ledgerops_common::Error>() {
        Some(ledgerops_common::Error::Config(_)) => "config",
        Some(ledgerops_common::Error::NotFound(_)) => "not_found",
        Some(ledgerops_common::Error::Security(_)) => "security",
        _ => "error",
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<MigrationError>() {
        Some(MigrationError::NotFound { .. }) => 2,
        Some(MigrationError::Drift { .. }) => 3,
        Some(MigrationError::Execution { .. }) => 4,
        Some(MigrationError::Connection { .. }) => 5,
        Some(_) => 1,
        None => match err.downcast_ref::<ledgerops_common::Error>() {
            Some(ledgerops_common::Error::NotFound(_)) => 2,
            _ => 1,
        },
    }
}
