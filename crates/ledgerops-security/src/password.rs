use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use ledgerops_common::{Error, Result};
use tracing::debug;

use crate::validation::InputValidator;

/// Hash `password` with Argon2id (library-default cost parameters) and a
/// fresh random salt. Returns the PHC string, e.g. `$argon2id$v=19$...`.
pub fn hash_password(password: &str) -> Result<String> {
    InputValidator::validate_password(password)?;

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| Error::Security(format!("failed to hash password: {e}")))?;

    debug!("generated {} password hash", hash.algorithm);
    Ok(hash.to_string())
}

/// Check `password` against a PHC string produced by [`hash_password`].
///
/// A malformed hash is an error; a well-formed hash that doesn't match is
/// `Ok(false)`.
pub fn verify_password(password: &str, phc: &str) -> Result<bool> {
    let parsed = PasswordHash::new(phc)
        .map_err(|e| Error::Security(format!("invalid password hash: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_argon2id_phc_string() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(hash.starts_with("$argon2id$"), "unexpected hash: {hash}");
    }

    #[test]
    fn same_password_gets_different_salts() {
        let a = hash_password("hunter22").unwrap();
        let b = hash_password("hunter22").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn verify_accepts_only_the_hashed_password() {
        let hash = hash_password("s3cret-budget").unwrap();
        assert!(verify_password("s3cret-budget", &hash).unwrap());
        assert!(!verify_password("s3cret-budgeT", &hash).unwrap());
    }

    #[test]
    fn verify_rejects_garbage_hash() {
        let err = verify_password("anything", "not-a-phc-string").unwrap_err();
        assert!(matches!(err, Error::Security(_)));
    }

    #[test]
    fn empty_password_is_refused() {
        assert!(hash_password("").is_err());
    }
}
