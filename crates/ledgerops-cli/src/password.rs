use std::io::{BufRead, IsTerminal};

use anyhow::{Context, Result};
use dialoguer::Password;
use ledgerops_security::{InputValidator, hash_password, verify_password};
use tracing::debug;

/// Hash a password and print the PHC string on stdout.
pub fn hash(password: Option<String>) -> Result<()> {
    let password = match password {
        Some(p) => p,
        None => obtain_password(true)?,
    };
    let hash = hash_password(&password)?;
    println!("{hash}");
    Ok(())
}

pub fn verify(hash: &str, password: Option<String>) -> Result<bool> {
    let password = match password {
        Some(p) => p,
        None => obtain_password(false)?,
    };
    Ok(verify_password(&password, hash)?)
}

/// Prompt without echo on a terminal; otherwise take one line from stdin so
/// the command can be scripted.
fn obtain_password(confirm: bool) -> Result<String> {
    if std::io::stdin().is_terminal() {
        let prompt = Password::new().with_prompt("Password");
        let prompt = if confirm {
            prompt.with_confirmation("Confirm password", "Passwords don't match")
        } else {
            prompt
        };
        return prompt.interact().context("password input cancelled");
    }

    debug!("stdin is not a terminal, reading password from it");
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password from stdin")?;
    Ok(InputValidator::strip_line_ending(&line).to_string())
}
