//! Consent requests and their state machine.
//!
//! A request is filed by an institution and decided by the individual it
//! names. `Pending` moves to `Approved` or `Rejected` exactly once; both are
//! terminal and later decisions are ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, account::Institution, subject_key::SubjectKey};

// ─── Kinds and status ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentKind {
  Upload,
  Access,
}

/// What a request asks the individual to approve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ConsentScope {
  /// Approve one specific uploaded record.
  Upload { record_id: Uuid },
  /// Approve blanket visibility of every approved record of the subject.
  Access,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentStatus {
  Pending,
  Approved,
  Rejected,
}

impl ConsentStatus {
  pub fn is_terminal(self) -> bool { !matches!(self, Self::Pending) }
}

/// The individual's decision on a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
  Approved,
  Rejected,
}

impl From<Outcome> for ConsentStatus {
  fn from(outcome: Outcome) -> Self {
    match outcome {
      Outcome::Approved => Self::Approved,
      Outcome::Rejected => Self::Rejected,
    }
  }
}

// ─── Requester ───────────────────────────────────────────────────────────────

/// The institution filing a request, as recorded on the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
  pub institution_id:   Uuid,
  pub institution_name: String,
}

impl From<&Institution> for Requester {
  fn from(institution: &Institution) -> Self {
    Self {
      institution_id:   institution.institution_id,
      institution_name: institution.display_name.clone(),
    }
  }
}

// ─── ConsentRequest ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRequest {
  pub request_id:       Uuid,
  #[serde(flatten)]
  pub scope:            ConsentScope,
  pub subject_key:      SubjectKey,
  pub institution_id:   Uuid,
  pub institution_name: String,
  pub requested_at:     DateTime<Utc>,
  pub status:           ConsentStatus,
  /// Set when the request leaves `Pending`.
  pub resolved_at:      Option<DateTime<Utc>>,
}

impl ConsentRequest {
  /// A new pending request.
  pub fn pending(
    scope: ConsentScope,
    subject_key: SubjectKey,
    requester: Requester,
  ) -> Self {
    Self {
      request_id: Uuid::new_v4(),
      scope,
      subject_key,
      institution_id: requester.institution_id,
      institution_name: requester.institution_name,
      requested_at: Utc::now(),
      status: ConsentStatus::Pending,
      resolved_at: None,
    }
  }

  pub fn kind(&self) -> ConsentKind {
    match self.scope {
      ConsentScope::Upload { .. } => ConsentKind::Upload,
      ConsentScope::Access => ConsentKind::Access,
    }
  }

  /// The gated record, for upload requests.
  pub fn record_id(&self) -> Option<Uuid> {
    match self.scope {
      ConsentScope::Upload { record_id } => Some(record_id),
      ConsentScope::Access => None,
    }
  }

  pub fn is_pending(&self) -> bool { self.status == ConsentStatus::Pending }

  /// Only the subject of a request may decide it.
  pub fn authorize(&self, actor: &SubjectKey) -> Result<()> {
    if &self.subject_key == actor {
      Ok(())
    } else {
      Err(Error::Unauthorized(self.request_id))
    }
  }

  /// Apply a decision. Returns `false`, leaving the request untouched, if it
  /// was already decided.
  pub fn decide(&mut self, outcome: Outcome, at: DateTime<Utc>) -> bool {
    if self.status.is_terminal() {
      return false;
    }
    self.status = outcome.into();
    self.resolved_at = Some(at);
    true
  }

  /// The record whose `approved` flag must flip together with this request:
  /// set only for an approved upload request.
  pub fn record_to_approve(&self) -> Option<Uuid> {
    match (self.status, self.scope) {
      (ConsentStatus::Approved, ConsentScope::Upload { record_id }) => {
        Some(record_id)
      }
      _ => None,
    }
  }

  /// Whether this request grants blanket access to `institution_id` over
  /// `subject_key`.
  pub fn grants_access(
    &self,
    institution_id: Uuid,
    subject_key: &SubjectKey,
  ) -> bool {
    self.scope == ConsentScope::Access
      && self.status == ConsentStatus::Approved
      && self.institution_id == institution_id
      && &self.subject_key == subject_key
  }
}

// ─── Filing and resolution results ───────────────────────────────────────────

/// How [`crate::store::ExchangeStore::file_access_request`] disposed of a
/// filing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessDisposition {
  /// A new pending request was added to the ledger.
  Created,
  /// The institution already has a pending request; it is returned.
  AlreadyPending,
  /// The institution already holds an approved grant; it is returned.
  AlreadyGranted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessFiling {
  pub request:     ConsentRequest,
  pub disposition: AccessDisposition,
}

/// Find the live access request `institution_id` already holds for
/// `subject_key`. An approved grant is preferred over a pending request.
pub fn existing_access<'a>(
  requests: impl IntoIterator<Item = &'a ConsentRequest>,
  institution_id: Uuid,
  subject_key: &SubjectKey,
) -> Option<(&'a ConsentRequest, AccessDisposition)> {
  let mut pending = None;
  for request in requests {
    if request.scope != ConsentScope::Access
      || request.institution_id != institution_id
      || &request.subject_key != subject_key
    {
      continue;
    }
    match request.status {
      ConsentStatus::Approved => {
        return Some((request, AccessDisposition::AlreadyGranted));
      }
      ConsentStatus::Pending => {
        pending.get_or_insert(request);
      }
      ConsentStatus::Rejected => {}
    }
  }
  pending.map(|request| (request, AccessDisposition::AlreadyPending))
}

/// Result of [`crate::store::ExchangeStore::resolve`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
  /// The request as it stands after the call.
  pub request: ConsentRequest,
  /// `false` when the request was already decided and nothing changed.
  pub applied: bool,
}

// ─── Ledger events ───────────────────────────────────────────────────────────

/// Published by stores after a ledger write commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "request", rename_all = "snake_case")]
pub enum LedgerEvent {
  Filed(ConsentRequest),
  Resolved(ConsentRequest),
}

#[cfg(test)]
mod tests {
  use super::*;

  fn key(s: &str) -> SubjectKey { SubjectKey::parse(s).unwrap() }

  fn access(subject: SubjectKey, who: Requester) -> ConsentRequest {
    ConsentRequest::pending(ConsentScope::Access, subject, who)
  }

  fn requester() -> Requester {
    Requester {
      institution_id:   Uuid::new_v4(),
      institution_name: "Northside Clinic".into(),
    }
  }

  #[test]
  fn first_decision_wins() {
    let mut req = access(key("11111111111111"), requester());
    assert!(req.decide(Outcome::Approved, Utc::now()));
    let decided_at = req.resolved_at;

    assert!(!req.decide(Outcome::Rejected, Utc::now()));
    assert_eq!(req.status, ConsentStatus::Approved);
    assert_eq!(req.resolved_at, decided_at);
  }

  #[test]
  fn rejection_is_terminal_too() {
    let mut req = access(key("11111111111111"), requester());
    assert!(req.decide(Outcome::Rejected, Utc::now()));
    assert!(!req.decide(Outcome::Approved, Utc::now()));
    assert_eq!(req.status, ConsentStatus::Rejected);
  }

  #[test]
  fn only_approved_uploads_approve_records() {
    let record_id = Uuid::new_v4();
    let mut upload = ConsentRequest::pending(
      ConsentScope::Upload { record_id },
      key("11111111111111"),
      requester(),
    );
    assert_eq!(upload.record_to_approve(), None);
    upload.decide(Outcome::Approved, Utc::now());
    assert_eq!(upload.record_to_approve(), Some(record_id));

    let mut rejected = ConsentRequest::pending(
      ConsentScope::Upload { record_id },
      key("11111111111111"),
      requester(),
    );
    rejected.decide(Outcome::Rejected, Utc::now());
    assert_eq!(rejected.record_to_approve(), None);

    let mut blanket = access(key("11111111111111"), requester());
    blanket.decide(Outcome::Approved, Utc::now());
    assert_eq!(blanket.record_to_approve(), None);
  }

  #[test]
  fn authorize_checks_subject() {
    let req = access(key("11111111111111"), requester());
    assert!(req.authorize(&key("11111111111111")).is_ok());
    assert!(matches!(
      req.authorize(&key("22222222222222")),
      Err(Error::Unauthorized(id)) if id == req.request_id
    ));
  }

  #[test]
  fn existing_access_prefers_grant_over_pending() {
    let subject = key("11111111111111");
    let who = requester();

    let pending =
      ConsentRequest::pending(ConsentScope::Access, subject.clone(), who.clone());
    let mut granted =
      ConsentRequest::pending(ConsentScope::Access, subject.clone(), who.clone());
    granted.decide(Outcome::Approved, Utc::now());

    let ledger = vec![pending.clone(), granted.clone()];
    let (found, disposition) =
      existing_access(&ledger, who.institution_id, &subject).unwrap();
    assert_eq!(found.request_id, granted.request_id);
    assert_eq!(disposition, AccessDisposition::AlreadyGranted);

    let ledger = vec![pending.clone()];
    let (found, disposition) =
      existing_access(&ledger, who.institution_id, &subject).unwrap();
    assert_eq!(found.request_id, pending.request_id);
    assert_eq!(disposition, AccessDisposition::AlreadyPending);
  }

  #[test]
  fn existing_access_ignores_rejected_and_other_parties() {
    let subject = key("11111111111111");
    let who = requester();

    let mut rejected =
      ConsentRequest::pending(ConsentScope::Access, subject.clone(), who.clone());
    rejected.decide(Outcome::Rejected, Utc::now());
    let elsewhere = access(key("22222222222222"), who.clone());
    let upload = ConsentRequest::pending(
      ConsentScope::Upload { record_id: Uuid::new_v4() },
      subject.clone(),
      who.clone(),
    );
    let other_institution =
      ConsentRequest::pending(ConsentScope::Access, subject.clone(), requester());

    let ledger = vec![rejected, elsewhere, upload, other_institution];
    assert!(existing_access(&ledger, who.institution_id, &subject).is_none());
  }

  #[test]
  fn request_serialises_flat() {
    let record_id = Uuid::new_v4();
    let req = ConsentRequest::pending(
      ConsentScope::Upload { record_id },
      key("11111111111111"),
      requester(),
    );
    let json = serde_json::to_value(&req).unwrap();
    assert_eq!(json["kind"], "upload");
    assert_eq!(json["record_id"], record_id.to_string());
    assert_eq!(json["status"], "pending");

    let back: ConsentRequest = serde_json::from_value(json).unwrap();
    assert_eq!(back, req);
  }
}
