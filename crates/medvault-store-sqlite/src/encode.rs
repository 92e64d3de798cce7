//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings, UUIDs hyphenated lowercase strings, and
//! record categories compact JSON. Enums are stored as their lowercase serde
//! names.

use chrono::{DateTime, Utc};
use medvault_core::{
  SubjectKey,
  account::{Account, Individual, Institution, Sex},
  consent::{ConsentRequest, ConsentScope, ConsentStatus},
  record::{Record, RecordCategory},
};
use uuid::Uuid;

use crate::{Error, Result};

pub const ACCOUNT_COLUMNS: &str = "account_id, kind, login_email, subject_key, \
   display_name, sex, phone, created_at, last_login_at";

pub const RECORD_COLUMNS: &str = "record_id, subject_key, uploader_id, category, \
   payload, filename, mime_type, notes, created_at, approved";

pub const REQUEST_COLUMNS: &str = "request_id, kind, record_id, subject_key, \
   institution_id, institution_name, requested_at, status, resolved_at";

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<&str>) -> Result<Option<DateTime<Utc>>> {
  s.map(decode_dt).transpose()
}

pub fn decode_subject_key(s: String) -> Result<SubjectKey> {
  SubjectKey::parse(s).map_err(|e| Error::Decode(e.to_string()))
}

// ─── Enums ───────────────────────────────────────────────────────────────────

pub fn encode_sex(sex: Sex) -> &'static str {
  match sex {
    Sex::Male => "male",
    Sex::Female => "female",
    Sex::Other => "other",
  }
}

pub fn decode_sex(s: &str) -> Result<Sex> {
  match s {
    "male" => Ok(Sex::Male),
    "female" => Ok(Sex::Female),
    "other" => Ok(Sex::Other),
    other => Err(Error::Decode(format!("unknown sex: {other:?}"))),
  }
}

pub fn encode_status(status: ConsentStatus) -> &'static str {
  match status {
    ConsentStatus::Pending => "pending",
    ConsentStatus::Approved => "approved",
    ConsentStatus::Rejected => "rejected",
  }
}

pub fn decode_status(s: &str) -> Result<ConsentStatus> {
  match s {
    "pending" => Ok(ConsentStatus::Pending),
    "approved" => Ok(ConsentStatus::Approved),
    "rejected" => Ok(ConsentStatus::Rejected),
    other => Err(Error::Decode(format!("unknown consent status: {other:?}"))),
  }
}

pub fn encode_category(c: &RecordCategory) -> Result<String> {
  Ok(serde_json::to_string(c)?)
}

pub fn decode_category(s: &str) -> Result<RecordCategory> {
  Ok(serde_json::from_str(s)?)
}

// ─── Accounts ────────────────────────────────────────────────────────────────

/// Raw strings read from an `accounts` row (credential excluded).
pub struct RawAccount {
  pub account_id:    String,
  pub kind:          String,
  pub login_email:   Option<String>,
  pub subject_key:   Option<String>,
  pub display_name:  String,
  pub sex:           Option<String>,
  pub phone:         Option<String>,
  pub created_at:    String,
  pub last_login_at: Option<String>,
}

impl RawAccount {
  /// Read a row selected with [`ACCOUNT_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      account_id:    row.get(0)?,
      kind:          row.get(1)?,
      login_email:   row.get(2)?,
      subject_key:   row.get(3)?,
      display_name:  row.get(4)?,
      sex:           row.get(5)?,
      phone:         row.get(6)?,
      created_at:    row.get(7)?,
      last_login_at: row.get(8)?,
    })
  }

  pub fn into_account(self) -> Result<Account> {
    let id = decode_uuid(&self.account_id)?;
    let created_at = decode_dt(&self.created_at)?;
    let last_login_at = decode_opt_dt(self.last_login_at.as_deref())?;
    let missing = |col: &str| {
      Error::Decode(format!("{} account {id} lacks {col}", self.kind))
    };

    match self.kind.as_str() {
      "institution" => Ok(Account::Institution(Institution {
        institution_id: id,
        login_email: self
          .login_email
          .clone()
          .ok_or_else(|| missing("login_email"))?,
        display_name: self.display_name.clone(),
        created_at,
        last_login_at,
      })),
      "individual" => Ok(Account::Individual(Individual {
        individual_id: id,
        subject_key: decode_subject_key(
          self.subject_key.clone().ok_or_else(|| missing("subject_key"))?,
        )?,
        display_name: self.display_name.clone(),
        sex: decode_sex(self.sex.as_deref().ok_or_else(|| missing("sex"))?)?,
        phone: self.phone.clone().ok_or_else(|| missing("phone"))?,
        created_at,
        last_login_at,
      })),
      other => Err(Error::Decode(format!("unknown account kind: {other:?}"))),
    }
  }
}

// ─── Records ─────────────────────────────────────────────────────────────────

/// Column values of a `records` row.
pub struct RawRecord {
  pub record_id:   String,
  pub subject_key: String,
  pub uploader_id: String,
  pub category:    String,
  pub payload:     Vec<u8>,
  pub filename:    String,
  pub mime_type:   String,
  pub notes:       Option<String>,
  pub created_at:  String,
  pub approved:    bool,
}

impl RawRecord {
  pub fn from_record(r: &Record) -> Result<Self> {
    Ok(Self {
      record_id:   encode_uuid(r.record_id),
      subject_key: r.subject_key.to_string(),
      uploader_id: encode_uuid(r.uploader_id),
      category:    encode_category(&r.category)?,
      payload:     r.payload.clone(),
      filename:    r.filename.clone(),
      mime_type:   r.mime_type.clone(),
      notes:       r.notes.clone(),
      created_at:  encode_dt(r.created_at),
      approved:    r.approved,
    })
  }

  /// Read a row selected with [`RECORD_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      record_id:   row.get(0)?,
      subject_key: row.get(1)?,
      uploader_id: row.get(2)?,
      category:    row.get(3)?,
      payload:     row.get(4)?,
      filename:    row.get(5)?,
      mime_type:   row.get(6)?,
      notes:       row.get(7)?,
      created_at:  row.get(8)?,
      approved:    row.get(9)?,
    })
  }

  pub fn insert(&self, conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute(
      &format!(
        "INSERT INTO records ({RECORD_COLUMNS}) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
      ),
      rusqlite::params![
        self.record_id,
        self.subject_key,
        self.uploader_id,
        self.category,
        self.payload,
        self.filename,
        self.mime_type,
        self.notes,
        self.created_at,
        self.approved,
      ],
    )?;
    Ok(())
  }

  pub fn into_record(self) -> Result<Record> {
    Ok(Record {
      record_id:   decode_uuid(&self.record_id)?,
      subject_key: decode_subject_key(self.subject_key)?,
      uploader_id: decode_uuid(&self.uploader_id)?,
      category:    decode_category(&self.category)?,
      payload:     self.payload,
      filename:    self.filename,
      mime_type:   self.mime_type,
      notes:       self.notes,
      created_at:  decode_dt(&self.created_at)?,
      approved:    self.approved,
    })
  }
}

// ─── Consent requests ────────────────────────────────────────────────────────

/// Column values of a `consent_requests` row.
pub struct RawRequest {
  pub request_id:       String,
  pub kind:             String,
  pub record_id:        Option<String>,
  pub subject_key:      String,
  pub institution_id:   String,
  pub institution_name: String,
  pub requested_at:     String,
  pub status:           String,
  pub resolved_at:      Option<String>,
}

impl RawRequest {
  pub fn from_request(r: &ConsentRequest) -> Self {
    let (kind, record_id) = match r.scope {
      ConsentScope::Upload { record_id } => {
        ("upload", Some(encode_uuid(record_id)))
      }
      ConsentScope::Access => ("access", None),
    };
    Self {
      request_id:       encode_uuid(r.request_id),
      kind:             kind.to_owned(),
      record_id,
      subject_key:      r.subject_key.to_string(),
      institution_id:   encode_uuid(r.institution_id),
      institution_name: r.institution_name.clone(),
      requested_at:     encode_dt(r.requested_at),
      status:           encode_status(r.status).to_owned(),
      resolved_at:      r.resolved_at.map(encode_dt),
    }
  }

  /// Read a row selected with [`REQUEST_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      request_id:       row.get(0)?,
      kind:             row.get(1)?,
      record_id:        row.get(2)?,
      subject_key:      row.get(3)?,
      institution_id:   row.get(4)?,
      institution_name: row.get(5)?,
      requested_at:     row.get(6)?,
      status:           row.get(7)?,
      resolved_at:      row.get(8)?,
    })
  }

  pub fn insert(&self, conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute(
      &format!(
        "INSERT INTO consent_requests ({REQUEST_COLUMNS}) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
      ),
      rusqlite::params![
        self.request_id,
        self.kind,
        self.record_id,
        self.subject_key,
        self.institution_id,
        self.institution_name,
        self.requested_at,
        self.status,
        self.resolved_at,
      ],
    )?;
    Ok(())
  }

  pub fn into_request(self) -> Result<ConsentRequest> {
    let scope = match (self.kind.as_str(), self.record_id.as_deref()) {
      ("upload", Some(record_id)) => {
        ConsentScope::Upload { record_id: decode_uuid(record_id)? }
      }
      ("access", None) => ConsentScope::Access,
      (kind, record_id) => {
        return Err(Error::Decode(format!(
          "request kind {kind:?} with record_id {record_id:?}"
        )));
      }
    };
    Ok(ConsentRequest {
      request_id: decode_uuid(&self.request_id)?,
      scope,
      subject_key: decode_subject_key(self.subject_key)?,
      institution_id: decode_uuid(&self.institution_id)?,
      institution_name: self.institution_name,
      requested_at: decode_dt(&self.requested_at)?,
      status: decode_status(&self.status)?,
      resolved_at: decode_opt_dt(self.resolved_at.as_deref())?,
    })
  }
}

/// Run a prepared query and collect raw rows.
pub fn query_all<T, P: rusqlite::Params>(
  conn: &rusqlite::Connection,
  sql: &str,
  params: P,
  from_row: fn(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
) -> rusqlite::Result<Vec<T>> {
  let mut stmt = conn.prepare(sql)?;
  let rows = stmt.query_map(params, from_row)?;
  rows.collect()
}
