use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ledgerops_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

pub const ENV_DATABASE_URL: &str = "LEDGEROPS_DATABASE_URL";
pub const ENV_DATABASE_URL_FALLBACK: &str = "DATABASE_URL";
pub const ENV_MIGRATIONS_DIR: &str = "LEDGEROPS_MIGRATIONS_DIR";
pub const ENV_MIGRATIONS_TABLE: &str = "LEDGEROPS_MIGRATIONS_TABLE";
pub const ENV_BUSY_TIMEOUT_MS: &str = "LEDGEROPS_BUSY_TIMEOUT_MS";

/// Resolves an [`AppConfig`] from, in increasing precedence: built-in
/// defaults, a YAML/TOML/JSON file, a `.env` file and the process
/// environment. CLI flags are layered on top by the caller.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env_file: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit config file. Unlike the default location, a missing
    /// explicit file is an error.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Read dotenv entries from `path` instead of searching for `.env`.
    pub fn with_env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_file = Some(path.into());
        self
    }

    /// `~/.ledgerops/config.yml`
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".ledgerops").join("config.yml"))
    }

    pub fn load(&self) -> Result<AppConfig> {
        let mut config = match &self.config_path {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::NotFound(format!(
                        "config file {}",
                        path.display()
                    )));
                }
                load_file(path)?
            }
            None => match Self::default_config_path().filter(|p| p.exists()) {
                Some(path) => load_file(&path)?,
                None => {
                    debug!("no config file found, using defaults");
                    AppConfig::default()
                }
            },
        };

        let dotenv = self.read_dotenv()?;
        apply_env(&mut config, |key| {
            std::env::var(key)
                .ok()
                .or_else(|| dotenv.get(key).cloned())
        })?;

        Ok(config)
    }

    fn read_dotenv(&self) -> Result<HashMap<String, String>> {
        let iter = match &self.env_file {
            Some(path) => dotenvy::from_path_iter(path),
            None => dotenvy::dotenv_iter(),
        };

        let iter = match iter {
            Ok(iter) => iter,
            Err(e) if e.not_found() => return Ok(HashMap::new()),
            Err(e) => return Err(Error::Config(format!("failed to read .env: {e}"))),
        };

        let mut vars = HashMap::new();
        for item in iter {
            let (key, value) =
                item.map_err(|e| Error::Config(format!("invalid .env entry: {e}")))?;
            vars.insert(key, value);
        }
        debug!("read {} entries from .env", vars.len());
        Ok(vars)
    }
}

/// Parse a config file, choosing the format from its extension.
pub fn load_file(path: &Path) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path)?;
    let config = parse_config(path, &contents)?;
    info!("loaded config from {}", path.display());
    Ok(config)
}

pub fn parse_config(path: &Path, contents: &str) -> Result<AppConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "yml" | "yaml" => serde_yaml::from_str(contents)
            .map_err(|e| Error::Config(format!("YAML parse error: {e}"))),
        "toml" => {
            toml::from_str(contents).map_err(|e| Error::Config(format!("TOML parse error: {e}")))
        }
        "json" => Ok(serde_json::from_str(contents)?),
        other => Err(Error::Config(format!(
            "unsupported config extension: {other}"
        ))),
    }
}

/// Overlay environment variables onto `config`. `lookup` abstracts the
/// environment so callers can merge several sources.
pub fn apply_env<F>(config: &mut AppConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(url) = non_empty(ENV_DATABASE_URL).or_else(|| non_empty(ENV_DATABASE_URL_FALLBACK))
    {
        config.database.url = Some(url);
    }
    if let Some(dir) = non_empty(ENV_MIGRATIONS_DIR) {
        config.migrations.dir = PathBuf::from(dir);
    }
    if let Some(table) = non_empty(ENV_MIGRATIONS_TABLE) {
        config.database.migrations_table = table;
    }
    if let Some(raw) = non_empty(ENV_BUSY_TIMEOUT_MS) {
        config.database.busy_timeout_ms = raw.trim().parse().map_err(|_| {
            Error::Config(format!("{ENV_BUSY_TIMEOUT_MS} must be an integer, got {raw:?}"))
        })?;
    }
    Ok(())
}
