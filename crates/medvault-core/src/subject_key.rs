//! Subject keys — the 14-character identifiers naming individuals.
//!
//! A key is both the individual's login identifier and the foreign key that
//! binds records and consent requests to them. Issued keys are ten digits
//! derived from the holder's folded name, phone number, and the issuance
//! month, followed by a four-digit random disambiguator.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::{Error, Result};

/// Length of every subject key, supplied or issued.
pub const SUBJECT_KEY_LEN: usize = 14;

/// Upper bound on disambiguator draws before issuance gives up.
pub const MAX_ISSUE_ATTEMPTS: u32 = 32;

const DERIVED_DIGITS: u32 = 10;
const DISAMBIGUATOR_SPACE: u32 = 10_000;

#[derive(
  Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct SubjectKey(String);

impl SubjectKey {
  /// Accept an externally supplied key. Keys are exactly
  /// [`SUBJECT_KEY_LEN`] ASCII alphanumerics.
  pub fn parse(s: impl Into<String>) -> Result<Self> {
    let s = s.into();
    if s.len() == SUBJECT_KEY_LEN && s.bytes().all(|b| b.is_ascii_alphanumeric())
    {
      Ok(Self(s))
    } else {
      Err(Error::InvalidSubjectKey(s))
    }
  }

  pub fn as_str(&self) -> &str { &self.0 }

  /// Derive a key for `(name, phone)` issued at `issued`, using the given
  /// disambiguator (reduced modulo 10 000).
  pub fn derive(
    name: &str,
    phone: &str,
    issued: DateTime<Utc>,
    disambiguator: u32,
  ) -> Self {
    let mut hasher = Sha256::new();
    hasher.update(fold_name(name).as_bytes());
    hasher.update([0]);
    hasher.update(phone.trim().as_bytes());
    hasher.update([0]);
    hasher.update(issued.format("%Y-%m").to_string().as_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let stem = u64::from_be_bytes(prefix) % 10u64.pow(DERIVED_DIGITS);

    Self(format!("{stem:010}{:04}", disambiguator % DISAMBIGUATOR_SPACE))
  }

  /// Issue a fresh key, drawing disambiguators until `is_taken` reports a
  /// free one. Returns `Ok(None)` after [`MAX_ISSUE_ATTEMPTS`] collisions.
  pub fn issue<E>(
    name: &str,
    phone: &str,
    issued: DateTime<Utc>,
    mut is_taken: impl FnMut(&SubjectKey) -> Result<bool, E>,
  ) -> Result<Option<Self>, E> {
    for _ in 0..MAX_ISSUE_ATTEMPTS {
      let disambiguator = OsRng.next_u32() % DISAMBIGUATOR_SPACE;
      let candidate = Self::derive(name, phone, issued, disambiguator);
      if !is_taken(&candidate)? {
        return Ok(Some(candidate));
      }
    }
    Ok(None)
  }
}

/// Case- and whitespace-insensitive form of a display name, used to match an
/// individual who already holds a key.
pub fn fold_name(name: &str) -> String { name.trim().to_lowercase() }

impl fmt::Display for SubjectKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl FromStr for SubjectKey {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> { Self::parse(s) }
}

impl TryFrom<String> for SubjectKey {
  type Error = Error;

  fn try_from(s: String) -> Result<Self> { Self::parse(s) }
}

impl From<SubjectKey> for String {
  fn from(key: SubjectKey) -> Self { key.0 }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone as _;

  use super::*;

  fn march() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 14, 9, 30, 0).unwrap()
  }

  #[test]
  fn derived_key_is_fourteen_digits() {
    let key = SubjectKey::derive("Asha Rao", "9876543210", march(), 42);
    assert_eq!(key.as_str().len(), SUBJECT_KEY_LEN);
    assert!(key.as_str().bytes().all(|b| b.is_ascii_digit()));
    assert!(key.as_str().ends_with("0042"));
  }

  #[test]
  fn derivation_is_deterministic_and_case_insensitive() {
    let a = SubjectKey::derive("Asha Rao", "9876543210", march(), 7);
    let b = SubjectKey::derive("  asha rao ", "9876543210", march(), 7);
    assert_eq!(a, b);
  }

  #[test]
  fn derivation_depends_on_phone_and_month() {
    let base = SubjectKey::derive("Asha Rao", "9876543210", march(), 7);
    let other_phone = SubjectKey::derive("Asha Rao", "9876543211", march(), 7);
    let april = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
    let other_month = SubjectKey::derive("Asha Rao", "9876543210", april, 7);
    assert_ne!(base, other_phone);
    assert_ne!(base, other_month);
  }

  #[test]
  fn same_month_shares_stem() {
    let early = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    let a = SubjectKey::derive("Asha Rao", "9876543210", early, 1);
    let b = SubjectKey::derive("Asha Rao", "9876543210", march(), 1);
    assert_eq!(a, b);
  }

  #[test]
  fn issue_skips_taken_candidates() {
    let mut calls = 0;
    let key = SubjectKey::issue("Asha Rao", "9876543210", march(), |_| {
      calls += 1;
      Ok::<_, Error>(calls < 3)
    })
    .unwrap();
    assert!(key.is_some());
    assert_eq!(calls, 3);
  }

  #[test]
  fn issue_gives_up_when_everything_is_taken() {
    let key =
      SubjectKey::issue("Asha Rao", "9876543210", march(), |_| Ok::<_, Error>(true))
        .unwrap();
    assert!(key.is_none());
  }

  #[test]
  fn parse_rejects_malformed_keys() {
    assert!(SubjectKey::parse("12345678901234").is_ok());
    assert!(SubjectKey::parse("ABCDEF12345678").is_ok());
    assert!(matches!(
      SubjectKey::parse("1234"),
      Err(Error::InvalidSubjectKey(_))
    ));
    assert!(SubjectKey::parse("1234567890123-").is_err());
    assert!(SubjectKey::parse("123456789012345").is_err());
  }

  #[test]
  fn serde_goes_through_validation() {
    let key: SubjectKey = serde_json::from_str("\"12345678901234\"").unwrap();
    assert_eq!(serde_json::to_string(&key).unwrap(), "\"12345678901234\"");
    assert!(serde_json::from_str::<SubjectKey>("\"short\"").is_err());
  }
}
