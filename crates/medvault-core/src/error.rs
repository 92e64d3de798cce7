//! Error types for `medvault-core`.

use thiserror::Error;
use uuid::Uuid;

use crate::subject_key::SubjectKey;

#[derive(Debug, Error)]
pub enum Error {
  #[error("an institution with login email {0:?} already exists")]
  DuplicateEmail(String),

  #[error("an individual with subject key {0} already exists")]
  DuplicateSubjectKey(SubjectKey),

  #[error("invalid credentials")]
  InvalidCredentials,

  #[error("subject not found: {0}")]
  SubjectNotFound(SubjectKey),

  #[error("record not found: {0}")]
  RecordNotFound(Uuid),

  #[error("consent request not found: {0}")]
  RequestNotFound(Uuid),

  /// The acting individual is not the subject of the request.
  #[error("consent request {0} belongs to another subject")]
  Unauthorized(Uuid),

  #[error("record {record_id} does not belong to subject {subject_key}")]
  RecordSubjectMismatch {
    record_id:   Uuid,
    subject_key: SubjectKey,
  },

  #[error("invalid subject key: {0:?}")]
  InvalidSubjectKey(String),

  #[error("no free subject key found after {0} attempts")]
  SubjectKeySpaceExhausted(u32),

  #[error("credential error: {0}")]
  Credential(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

/// Coarse classification of [`Error`], used by outer layers to pick a
/// response without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  DuplicateIdentifier,
  InvalidCredentials,
  NotFound,
  Unauthorized,
  InvalidInput,
  Internal,
}

impl Error {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::DuplicateEmail(_) | Self::DuplicateSubjectKey(_) => {
        ErrorKind::DuplicateIdentifier
      }
      Self::InvalidCredentials => ErrorKind::InvalidCredentials,
      Self::SubjectNotFound(_)
      | Self::RecordNotFound(_)
      | Self::RequestNotFound(_) => ErrorKind::NotFound,
      Self::Unauthorized(_) => ErrorKind::Unauthorized,
      Self::RecordSubjectMismatch { .. } | Self::InvalidSubjectKey(_) => {
        ErrorKind::InvalidInput
      }
      Self::SubjectKeySpaceExhausted(_)
      | Self::Credential(_)
      | Self::Serialization(_) => ErrorKind::Internal,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Implemented by backend error types so callers can recover the domain
/// error a backend wraps.
pub trait StoreError: std::error::Error + Send + Sync + 'static {
  /// The wrapped core error, if this failure originated in domain logic.
  fn as_core(&self) -> Option<&Error>;

  fn kind(&self) -> ErrorKind {
    self.as_core().map_or(ErrorKind::Internal, Error::kind)
  }
}

impl StoreError for Error {
  fn as_core(&self) -> Option<&Error> { Some(self) }
}
