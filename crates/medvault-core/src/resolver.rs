//! The access resolver: which records an institution can currently see for a
//! subject.
//!
//! Visibility is the union of two sets:
//!
//! - the **direct set**, approved records the institution itself uploaded
//!   for the subject;
//! - the **blanket set**, every approved record of the subject regardless of
//!   uploader, included only while the institution holds an approved access
//!   request for the subject.
//!
//! The result is de-duplicated by record id, direct records first, each set
//! in insertion order. Resolution is a pure function over an
//! [`AccessSnapshot`]; stores are responsible for capturing the snapshot at
//! a single consistent point.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{consent::ConsentRequest, record::Record, subject_key::SubjectKey};

/// Ledger and record state read at one consistent point.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessSnapshot {
  /// Records of the subject, approved or not, in insertion order.
  pub subject_records: Vec<Record>,
  /// Access requests the institution has filed for the subject, any status.
  pub access_requests: Vec<ConsentRequest>,
}

/// Whether `institution_id` holds an approved blanket grant over
/// `subject_key` among `requests`.
pub fn has_blanket_grant(
  institution_id: Uuid,
  subject_key: &SubjectKey,
  requests: &[ConsentRequest],
) -> bool {
  requests
    .iter()
    .any(|r| r.grants_access(institution_id, subject_key))
}

/// Records visible to `institution_id` for `subject_key`.
pub fn visible_records(
  institution_id: Uuid,
  subject_key: &SubjectKey,
  snapshot: &AccessSnapshot,
) -> Vec<Record> {
  let mut seen = HashSet::new();
  let mut visible = Vec::new();

  for record in
    approved_for(snapshot, subject_key).filter(|r| r.uploader_id == institution_id)
  {
    if seen.insert(record.record_id) {
      visible.push(record.clone());
    }
  }

  if has_blanket_grant(institution_id, subject_key, &snapshot.access_requests) {
    for record in approved_for(snapshot, subject_key) {
      if seen.insert(record.record_id) {
        visible.push(record.clone());
      }
    }
  }

  visible
}

fn approved_for<'a>(
  snapshot: &'a AccessSnapshot,
  subject_key: &'a SubjectKey,
) -> impl Iterator<Item = &'a Record> + 'a {
  snapshot
    .subject_records
    .iter()
    .filter(move |r| r.approved && &r.subject_key == subject_key)
}
