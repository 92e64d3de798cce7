//! Accounts — the two kinds of principal in the exchange.
//!
//! Credential secrets are not part of these types; stores keep the hash
//! alongside the account and only expose it through
//! [`crate::store::ExchangeStore::authenticate`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::subject_key::SubjectKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
  Male,
  Female,
  Other,
}

/// A record-holding organisation. Logs in with its email address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Institution {
  pub institution_id: Uuid,
  /// Unique among institutions.
  pub login_email:    String,
  pub display_name:   String,
  pub created_at:     DateTime<Utc>,
  pub last_login_at:  Option<DateTime<Utc>>,
}

/// A record-owning person. Logs in with their subject key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Individual {
  pub individual_id: Uuid,
  /// Unique among individuals and immutable once issued.
  pub subject_key:   SubjectKey,
  pub display_name:  String,
  pub sex:           Sex,
  pub phone:         String,
  pub created_at:    DateTime<Utc>,
  pub last_login_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Account {
  Institution(Institution),
  Individual(Individual),
}

impl Account {
  pub fn id(&self) -> Uuid {
    match self {
      Self::Institution(i) => i.institution_id,
      Self::Individual(i) => i.individual_id,
    }
  }

  pub fn as_institution(&self) -> Option<&Institution> {
    match self {
      Self::Institution(i) => Some(i),
      Self::Individual(_) => None,
    }
  }

  pub fn as_individual(&self) -> Option<&Individual> {
    match self {
      Self::Individual(i) => Some(i),
      Self::Institution(_) => None,
    }
  }

  pub fn into_institution(self) -> Option<Institution> {
    match self {
      Self::Institution(i) => Some(i),
      Self::Individual(_) => None,
    }
  }

  pub fn into_individual(self) -> Option<Individual> {
    match self {
      Self::Individual(i) => Some(i),
      Self::Institution(_) => None,
    }
  }
}

// ─── Registration inputs ─────────────────────────────────────────────────────

/// Input to [`crate::store::ExchangeStore::register_institution`].
#[derive(Debug, Clone)]
pub struct NewInstitution {
  pub login_email:  String,
  pub display_name: String,
  /// Plaintext secret; hashed by the store before it is persisted.
  pub secret:       String,
}

/// Where a new individual's subject key comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyIssuance {
  /// Use this key; registration fails if it is taken.
  Supplied(SubjectKey),
  /// Reuse the key already held by the same (name, phone) pair, or issue a
  /// fresh one.
  Generate,
}

/// Input to [`crate::store::ExchangeStore::register_individual`].
#[derive(Debug, Clone)]
pub struct NewIndividual {
  pub key:          KeyIssuance,
  pub display_name: String,
  pub sex:          Sex,
  pub phone:        String,
  pub secret:       String,
}

/// Outcome of [`crate::store::ExchangeStore::register_individual`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enrollment {
  /// A new account was created.
  Created(Individual),
  /// A generated-key registration matched an individual already holding a
  /// key for the same name and phone. Their account is returned unchanged.
  Existing(Individual),
}

impl Enrollment {
  pub fn is_new(&self) -> bool { matches!(self, Self::Created(_)) }

  pub fn individual(&self) -> &Individual {
    match self {
      Self::Created(i) | Self::Existing(i) => i,
    }
  }

  pub fn into_individual(self) -> Individual {
    match self {
      Self::Created(i) | Self::Existing(i) => i,
    }
  }
}
