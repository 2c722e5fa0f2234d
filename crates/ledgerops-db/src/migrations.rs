//! Migration scripts: identified, named, checksummed units of SQL.
//!
//! Each script has an identifier that orders it among its siblings and a
//! SHA-256 checksum of its exact source text. Applied scripts are tracked in
//! the record table (see [`crate::records`]); the checksum is what lets the
//! runner tell "already applied" apart from "changed since it was applied".

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use ring::digest::{SHA256, digest};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MigrationError, Result};

/// `030_add_budgets` → (`030`, `add_budgets`)
static FILE_STEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^_\-\s]+)(?:[_\-]+(.+))?$").expect("valid regex"));

/// Identifier of a migration. All-digit identifiers compare numerically, so
/// `9` sorts before `030`; anything else compares as text, after the numeric
/// ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MigrationId(String);

impl MigrationId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(MigrationError::Invalid(
                "migration identifier cannot be empty".into(),
            ));
        }
        if id.chars().any(char::is_control) {
            return Err(MigrationError::Invalid(format!(
                "migration identifier {id:?} contains control characters"
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn numeric(&self) -> Option<&str> {
        self.0
            .bytes()
            .all(|b| b.is_ascii_digit())
            .then(|| self.0.trim_start_matches('0'))
    }
}

impl Ord for MigrationId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric(), other.numeric()) {
            (Some(a), Some(b)) => a
                .len()
                .cmp(&b.len())
                .then_with(|| a.cmp(b))
                .then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for MigrationId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An immutable migration: identifier, name, SQL source and its checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationScript {
    id: MigrationId,
    name: String,
    source: String,
    checksum: String,
}

impl MigrationScript {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<Self> {
        let id = MigrationId::new(id)?;
        let source = source.into();
        if source.trim().is_empty() {
            return Err(MigrationError::Invalid(format!(
                "migration {id} has an empty source"
            )));
        }
        let name = name.into().trim().to_string();
        let name = if name.is_empty() { id.to_string() } else { name };
        let checksum = compute_checksum(&source);
        Ok(Self {
            id,
            name,
            source,
            checksum,
        })
    }

    /// Load a script from `<id>_<name>.sql`. The identifier and name come
    /// from the file name.
    pub fn from_file(path: &Path) -> Result<Self> {
        let (id, name) = split_file_stem(path)?;
        Self::read(path, id, name)
    }

    /// Load a script from any file, with an explicit identifier.
    pub fn from_file_with_id(path: &Path, id: impl Into<String>) -> Result<Self> {
        let name = split_file_stem(path)
            .map(|(_, name)| name)
            .unwrap_or_default();
        Self::read(path, id.into(), name)
    }

    /// Load every `*.sql` file in `dir`, ordered by identifier.
    pub fn load_dir(dir: &Path) -> Result<Vec<Self>> {
        let entries = std::fs::read_dir(dir).map_err(|source| MigrationError::NotFound {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| MigrationError::NotFound {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "sql") {
                paths.push(path);
            }
        }

        let mut scripts = paths
            .iter()
            .map(|p| Self::from_file(p))
            .collect::<Result<Vec<_>>>()?;
        scripts.sort_by(|a, b| a.id.cmp(&b.id));

        if let Some(pair) = scripts.windows(2).find(|w| w[0].id == w[1].id) {
            return Err(MigrationError::Invalid(format!(
                "duplicate migration identifier {} in {}",
                pair[0].id,
                dir.display()
            )));
        }

        debug!("loaded {} migration(s) from {}", scripts.len(), dir.display());
        Ok(scripts)
    }

    pub fn id(&self) -> &MigrationId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// The first statement that would begin or end a transaction, such as
    /// `COMMIT` or `ROLLBACK`. `ROLLBACK TO` a savepoint and the
    /// `BEGIN ... END` body of `CREATE TRIGGER` don't count.
    pub fn transaction_control(&self) -> Option<String> {
        statements(&self.source).into_iter().find_map(|words| {
            let first = words.first()?;
            match first.as_str() {
                "BEGIN" | "COMMIT" | "END" => Some(first.clone()),
                "ROLLBACK" if !words.iter().any(|w| w == "TO") => Some(first.clone()),
                _ => None,
            }
        })
    }

    fn read(path: &Path, id: String, name: String) -> Result<Self> {
        let source =
            std::fs::read_to_string(path).map_err(|source| MigrationError::NotFound {
                path: path.to_path_buf(),
                source,
            })?;
        debug!("read migration {id} from {}", path.display());
        Self::new(id, name, source)
    }
}

/// SHA-256 of `sql`, as 64 lowercase hex characters.
pub fn compute_checksum(sql: &str) -> String {
    hex::encode(digest(&SHA256, sql.as_bytes()))
}

fn split_file_stem(path: &Path) -> Result<(String, String)> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let caps = FILE_STEM.captures(stem).ok_or_else(|| {
        MigrationError::Invalid(format!(
            "cannot derive a migration identifier from {}",
            path.display()
        ))
    })?;
    let id = caps[1].to_string();
    let name = caps
        .get(2)
        .map(|m| m.as_str().replace(['_', '-'], " "))
        .unwrap_or_default();
    Ok((id, name))
}

enum Token {
    Word(String),
    Semicolon,
}

/// Split SQL into words (uppercased) and statement separators, skipping
/// comments, string literals and quoted identifiers.
fn tokenize(sql: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            ';' => tokens.push(Token::Semicolon),
            '-' if chars.peek() == Some(&'-') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            '\'' | '"' | '`' | '[' => {
                let close = if c == '[' { ']' } else { c };
                for c in chars.by_ref() {
                    if c == close {
                        break;
                    }
                }
            }
            c if c.is_alphanumeric() || c == '_' => {
                let mut word = c.to_uppercase().to_string();
                while let Some(&next) = chars.peek() {
                    if !(next.is_alphanumeric() || next == '_') {
                        break;
                    }
                    word.extend(next.to_uppercase());
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
            _ => {}
        }
    }
    tokens
}

/// The words of each statement in `sql`. Semicolons inside a trigger body
/// don't end the `CREATE TRIGGER` statement.
fn statements(sql: &str) -> Vec<Vec<String>> {
    let mut statements = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut in_trigger = false;
    let mut in_body = false;
    let mut case_depth = 0usize;

    for token in tokenize(sql) {
        match token {
            Token::Semicolon if in_trigger => {}
            Token::Semicolon => {
                if !current.is_empty() {
                    statements.push(std::mem::take(&mut current));
                }
            }
            Token::Word(word) => {
                if word == "TRIGGER"
                    && current.first().is_some_and(|w| w == "CREATE")
                    && current.len() <= 2
                {
                    in_trigger = true;
                } else if in_trigger && !in_body && word == "BEGIN" {
                    in_body = true;
                } else if in_body && word == "CASE" {
                    case_depth += 1;
                } else if in_body && word == "END" {
                    if case_depth > 0 {
                        case_depth -= 1;
                    } else {
                        in_trigger = false;
                        in_body = false;
                    }
                }
                current.push(word);
            }
        }
    }
    if !current.is_empty() {
        statements.push(current);
    }
    statements
}
