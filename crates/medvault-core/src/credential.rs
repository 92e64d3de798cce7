//! Credential secret hashing.
//!
//! Secrets are stored as argon2 PHC strings (`$argon2id$v=19$…`) and never
//! leave the store.

use argon2::{
  Argon2, PasswordHash, PasswordHasher as _, PasswordVerifier as _,
  password_hash::SaltString,
};
use rand_core::OsRng;

use crate::{Error, Result};

/// Hash `secret` with a fresh random salt.
pub fn hash_secret(secret: &str) -> Result<String> {
  let salt = SaltString::generate(&mut OsRng);
  Argon2::default()
    .hash_password(secret.as_bytes(), &salt)
    .map(|hash| hash.to_string())
    .map_err(|e| Error::Credential(e.to_string()))
}

/// Check `secret` against a stored PHC string. Malformed hashes never verify.
pub fn verify_secret(phc: &str, secret: &str) -> bool {
  PasswordHash::new(phc)
    .and_then(|hash| Argon2::default().verify_password(secret.as_bytes(), &hash))
    .is_ok()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn hash_then_verify() {
    let phc = hash_secret("hunter2").unwrap();
    assert!(phc.starts_with("$argon2"));
    assert!(verify_secret(&phc, "hunter2"));
    assert!(!verify_secret(&phc, "hunter3"));
  }

  #[test]
  fn salts_differ() {
    assert_ne!(hash_secret("same").unwrap(), hash_secret("same").unwrap());
  }

  #[test]
  fn malformed_hash_rejects() {
    assert!(!verify_secret("plaintext", "plaintext"));
  }
}
