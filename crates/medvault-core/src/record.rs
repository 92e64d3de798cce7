//! Records — uploaded documents owned by an individual.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::subject_key::SubjectKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordCategory {
  Prescription,
  LabReport,
  DischargeSummary,
  RadiologyReport,
  ConsultationNote,
  Other(String),
}

/// An uploaded document. Owned by the individual named by `subject_key`; the
/// uploading institution keeps provenance but not ownership.
///
/// `approved` starts `false` and only ever becomes `true`, when the paired
/// upload request is approved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
  pub record_id:   Uuid,
  pub subject_key: SubjectKey,
  pub uploader_id: Uuid,
  pub category:    RecordCategory,
  /// Opaque content; never inspected. Base64 in serialised form.
  #[serde(with = "payload_base64")]
  pub payload:     Vec<u8>,
  pub filename:    String,
  pub mime_type:   String,
  pub notes:       Option<String>,
  pub created_at:  DateTime<Utc>,
  pub approved:    bool,
}

/// Input to [`crate::store::ExchangeStore::upload`].
#[derive(Debug, Clone)]
pub struct NewRecord {
  pub subject_key: SubjectKey,
  pub uploader_id: Uuid,
  pub category:    RecordCategory,
  pub payload:     Vec<u8>,
  pub filename:    String,
  pub mime_type:   String,
  pub notes:       Option<String>,
}

impl NewRecord {
  /// Assign an id and timestamp. The result is always unapproved.
  pub fn into_pending(self) -> Record {
    Record {
      record_id:   Uuid::new_v4(),
      subject_key: self.subject_key,
      uploader_id: self.uploader_id,
      category:    self.category,
      payload:     self.payload,
      filename:    self.filename,
      mime_type:   self.mime_type,
      notes:       self.notes,
      created_at:  Utc::now(),
      approved:    false,
    }
  }
}

/// Serde adapter storing byte payloads as standard base64 strings.
pub mod payload_base64 {
  use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
  use serde::{Deserialize as _, Deserializer, Serializer, de::Error as _};

  pub fn serialize<S: Serializer>(
    bytes: impl AsRef<[u8]>,
    serializer: S,
  ) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&B64.encode(bytes))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(
    deserializer: D,
  ) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    B64.decode(encoded).map_err(D::Error::custom)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn new_records_are_unapproved() {
    let record = NewRecord {
      subject_key: SubjectKey::parse("12345678901234").unwrap(),
      uploader_id: Uuid::new_v4(),
      category:    RecordCategory::LabReport,
      payload:     b"%PDF-1.7".to_vec(),
      filename:    "cbc.pdf".into(),
      mime_type:   "application/pdf".into(),
      notes:       None,
    }
    .into_pending();
    assert!(!record.approved);
  }

  #[test]
  fn payload_is_base64_on_the_wire() {
    let record = NewRecord {
      subject_key: SubjectKey::parse("12345678901234").unwrap(),
      uploader_id: Uuid::new_v4(),
      category:    RecordCategory::Other("dental chart".into()),
      payload:     b"hello".to_vec(),
      filename:    "chart.txt".into(),
      mime_type:   "text/plain".into(),
      notes:       Some("upper left".into()),
    }
    .into_pending();

    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["payload"], "aGVsbG8=");
    assert_eq!(json["category"]["other"], "dental chart");

    let back: Record = serde_json::from_value(json).unwrap();
    assert_eq!(back.payload, b"hello");
  }
}
