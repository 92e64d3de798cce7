//! [`SqliteStore`] — the SQLite implementation of [`ExchangeStore`].

use std::path::Path;

use chrono::Utc;
use medvault_core::{
  SubjectKey,
  account::{
    Account, Enrollment, Individual, Institution, KeyIssuance, NewIndividual,
    NewInstitution,
  },
  consent::{
    AccessDisposition, AccessFiling, ConsentRequest, ConsentScope, LedgerEvent,
    Outcome, Requester, Resolution, existing_access,
  },
  credential::{hash_secret, verify_secret},
  record::{NewRecord, Record},
  resolver::AccessSnapshot,
  store::{ExchangeStore, LEDGER_EVENT_CAPACITY},
  subject_key::{MAX_ISSUE_ATTEMPTS, fold_name},
};
use rusqlite::{OptionalExtension as _, TransactionBehavior};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
  encode::{
    ACCOUNT_COLUMNS, RECORD_COLUMNS, REQUEST_COLUMNS, RawAccount, RawRecord,
    RawRequest, encode_dt, encode_sex, encode_status, encode_uuid, query_all,
  },
  schema::SCHEMA,
  Error, Result,
};

type CoreError = medvault_core::Error;

// ─── Store ───────────────────────────────────────────────────────────────────

/// A medvault store backed by a single SQLite file.
///
/// Cloning is cheap: the inner connection and event channel are
/// reference-counted. All statements run on one connection thread, and every
/// multi-statement operation runs inside one transaction.
#[derive(Clone)]
pub struct SqliteStore {
  conn:   tokio_rusqlite::Connection,
  events: broadcast::Sender<LedgerEvent>,
}

/// What happened inside an individual-registration transaction.
enum Registration {
  Inserted(SubjectKey),
  Existing(RawAccount),
  DuplicateKey(SubjectKey),
  Exhausted,
}

/// Outcome of the record-link check in `file_upload_request`.
enum RecordLink {
  Linked,
  Missing,
  OtherSubject,
}

/// Outcome of an access-request filing transaction.
enum AccessFilingRow {
  Created,
  Live(Vec<RawRequest>),
  NoSubject,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn).await
  }

  /// Open a private in-memory database.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn).await
  }

  async fn init(conn: tokio_rusqlite::Connection) -> Result<Self> {
    conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    let (events, _) = broadcast::channel(LEDGER_EVENT_CAPACITY);
    Ok(Self { conn, events })
  }

  fn publish(&self, event: LedgerEvent) {
    // No receivers is not an error.
    let _ = self.events.send(event);
  }

  /// Fetch one account row by a single-column predicate.
  async fn account_where(
    &self,
    predicate: &'static str,
    value: String,
  ) -> Result<Option<Account>> {
    let raw: Option<RawAccount> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE {predicate}"),
              rusqlite::params![value],
              RawAccount::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawAccount::into_account).transpose()
  }

  async fn records_where(
    &self,
    predicate: &'static str,
    value: String,
  ) -> Result<Vec<Record>> {
    let raws: Vec<RawRecord> = self
      .conn
      .call(move |conn| {
        Ok(query_all(
          conn,
          &format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE {predicate} ORDER BY rowid"
          ),
          rusqlite::params![value],
          RawRecord::from_row,
        )?)
      })
      .await?;

    raws.into_iter().map(RawRecord::into_record).collect()
  }
}

fn subject_key_taken(
  conn: &rusqlite::Connection,
  key: &str,
) -> rusqlite::Result<bool> {
  Ok(
    conn
      .query_row(
        "SELECT 1 FROM accounts WHERE subject_key = ?1",
        rusqlite::params![key],
        |_| Ok(()),
      )
      .optional()?
      .is_some(),
  )
}

// ─── ExchangeStore impl ──────────────────────────────────────────────────────

impl ExchangeStore for SqliteStore {
  type Error = Error;

  // ── Identity registry ─────────────────────────────────────────────────────

  async fn register_institution(&self, input: NewInstitution) -> Result<Account> {
    let institution = Institution {
      institution_id: Uuid::new_v4(),
      login_email:    input.login_email,
      display_name:   input.display_name,
      created_at:     Utc::now(),
      last_login_at:  None,
    };

    let credential = hash_secret(&input.secret)?;
    let id_str     = encode_uuid(institution.institution_id);
    let email      = institution.login_email.clone();
    let name       = institution.display_name.clone();
    let folded     = fold_name(&institution.display_name);
    let at_str     = encode_dt(institution.created_at);

    let inserted: bool = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let taken = tx
          .query_row(
            "SELECT 1 FROM accounts WHERE login_email = ?1",
            rusqlite::params![email],
            |_| Ok(()),
          )
          .optional()?
          .is_some();
        if taken {
          return Ok(false);
        }

        tx.execute(
          "INSERT INTO accounts (
             account_id, kind, login_email, display_name, name_folded,
             credential, created_at
           ) VALUES (?1, 'institution', ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![id_str, email, name, folded, credential, at_str],
        )?;
        tx.commit()?;
        Ok(true)
      })
      .await?;

    if !inserted {
      return Err(CoreError::DuplicateEmail(institution.login_email).into());
    }
    Ok(Account::Institution(institution))
  }

  async fn register_individual(
    &self,
    input: NewIndividual,
  ) -> Result<Enrollment> {
    let credential = hash_secret(&input.secret)?;
    let individual_id = Uuid::new_v4();
    let created_at = Utc::now();

    let id_str   = encode_uuid(individual_id);
    let at_str   = encode_dt(created_at);
    let sex_str  = encode_sex(input.sex);
    let name     = input.display_name.clone();
    let phone    = input.phone.clone();
    let issuance = input.key;

    let registration = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let folded = fold_name(&name);

        let key = match issuance {
          KeyIssuance::Supplied(key) => {
            if subject_key_taken(&tx, key.as_str())? {
              return Ok(Registration::DuplicateKey(key));
            }
            key
          }
          KeyIssuance::Generate => {
            let existing = tx
              .query_row(
                &format!(
                  "SELECT {ACCOUNT_COLUMNS} FROM accounts
                   WHERE kind = 'individual' AND name_folded = ?1 AND phone = ?2
                   ORDER BY rowid LIMIT 1"
                ),
                rusqlite::params![folded, phone],
                RawAccount::from_row,
              )
              .optional()?;
            if let Some(raw) = existing {
              return Ok(Registration::Existing(raw));
            }

            let issued = SubjectKey::issue(&name, &phone, created_at, |k| {
              subject_key_taken(&tx, k.as_str())
            })?;
            match issued {
              Some(key) => key,
              None => return Ok(Registration::Exhausted),
            }
          }
        };

        tx.execute(
          "INSERT INTO accounts (
             account_id, kind, subject_key, display_name, name_folded,
             sex, phone, credential, created_at
           ) VALUES (?1, 'individual', ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          rusqlite::params![
            id_str,
            key.as_str(),
            name,
            folded,
            sex_str,
            phone,
            credential,
            at_str,
          ],
        )?;
        tx.commit()?;
        Ok(Registration::Inserted(key))
      })
      .await?;

    match registration {
      Registration::Inserted(subject_key) => Ok(Enrollment::Created(Individual {
        individual_id,
        subject_key,
        display_name: input.display_name,
        sex: input.sex,
        phone: input.phone,
        created_at,
        last_login_at: None,
      })),
      Registration::Existing(raw) => {
        let existing = raw.into_account()?.into_individual().ok_or_else(|| {
          Error::Decode("name and phone matched a non-individual row".into())
        })?;
        tracing::debug!(
          subject_key = %existing.subject_key,
          "reusing subject key for known name and phone"
        );
        Ok(Enrollment::Existing(existing))
      }
      Registration::DuplicateKey(key) => {
        Err(CoreError::DuplicateSubjectKey(key).into())
      }
      Registration::Exhausted => {
        Err(CoreError::SubjectKeySpaceExhausted(MAX_ISSUE_ATTEMPTS).into())
      }
    }
  }

  async fn find_by_login_email(
    &self,
    email: String,
  ) -> Result<Option<Institution>> {
    let account = self
      .account_where("kind = 'institution' AND login_email = ?1", email)
      .await?;
    Ok(account.and_then(Account::into_institution))
  }

  async fn find_by_subject_key(
    &self,
    key: SubjectKey,
  ) -> Result<Option<Individual>> {
    let account = self
      .account_where("kind = 'individual' AND subject_key = ?1", key.into())
      .await?;
    Ok(account.and_then(Account::into_individual))
  }

  async fn find_institution(
    &self,
    institution_id: Uuid,
  ) -> Result<Option<Institution>> {
    let account = self
      .account_where(
        "kind = 'institution' AND account_id = ?1",
        encode_uuid(institution_id),
      )
      .await?;
    Ok(account.and_then(Account::into_institution))
  }

  async fn exists_subject_key(&self, key: SubjectKey) -> Result<bool> {
    let key_str: String = key.into();
    Ok(
      self
        .conn
        .call(move |conn| Ok(subject_key_taken(conn, &key_str)?))
        .await?,
    )
  }

  async fn authenticate(
    &self,
    identifier: String,
    secret: String,
  ) -> Result<Account> {
    // Institution by email first, then individual by subject key.
    let lookup = identifier.clone();
    let candidates: Vec<(String, String)> = self
      .conn
      .call(move |conn| {
        let mut found = Vec::with_capacity(2);
        for sql in [
          "SELECT account_id, credential FROM accounts
           WHERE kind = 'institution' AND login_email = ?1",
          "SELECT account_id, credential FROM accounts
           WHERE kind = 'individual' AND subject_key = ?1",
        ] {
          if let Some(row) = conn
            .query_row(sql, rusqlite::params![lookup], |r| {
              Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })
            .optional()?
          {
            found.push(row);
          }
        }
        Ok(found)
      })
      .await?;

    let Some(account_id) = candidates
      .into_iter()
      .find(|(_, phc)| verify_secret(phc, &secret))
      .map(|(id, _)| id)
    else {
      tracing::debug!(%identifier, "authentication failed");
      return Err(CoreError::InvalidCredentials.into());
    };

    let now_str = encode_dt(Utc::now());
    let raw: RawAccount = self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE accounts SET last_login_at = ?1 WHERE account_id = ?2",
          rusqlite::params![now_str, account_id],
        )?;
        Ok(conn.query_row(
          &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE account_id = ?1"),
          rusqlite::params![account_id],
          RawAccount::from_row,
        )?)
      })
      .await?;

    raw.into_account()
  }

  // ── Record store ──────────────────────────────────────────────────────────

  async fn upload(&self, input: NewRecord) -> Result<Record> {
    let record = input.into_pending();
    let raw = RawRecord::from_record(&record)?;

    self
      .conn
      .call(move |conn| {
        raw.insert(conn)?;
        Ok(())
      })
      .await?;

    Ok(record)
  }

  async fn mark_approved(&self, record_id: Uuid) -> Result<()> {
    let id_str = encode_uuid(record_id);
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE records SET approved = 1 WHERE record_id = ?1",
          rusqlite::params![id_str],
        )?)
      })
      .await?;

    if changed == 0 {
      tracing::warn!(%record_id, "mark_approved: unknown record, ignoring");
    }
    Ok(())
  }

  async fn record_by_id(&self, record_id: Uuid) -> Result<Option<Record>> {
    let id_str = encode_uuid(record_id);
    let raw: Option<RawRecord> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {RECORD_COLUMNS} FROM records WHERE record_id = ?1"),
              rusqlite::params![id_str],
              RawRecord::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawRecord::into_record).transpose()
  }

  async fn records_by_uploader(
    &self,
    institution_id: Uuid,
  ) -> Result<Vec<Record>> {
    let uploader = encode_uuid(institution_id);
    self
      .records_where("approved = 1 AND uploader_id = ?1", uploader)
      .await
  }

  async fn records_by_subject(&self, key: SubjectKey) -> Result<Vec<Record>> {
    self
      .records_where("approved = 1 AND subject_key = ?1", key.into())
      .await
  }

  // ── Consent ledger ────────────────────────────────────────────────────────

  async fn file_upload_request(
    &self,
    subject_key: SubjectKey,
    requester:   Requester,
    record_id:   Uuid,
  ) -> Result<ConsentRequest> {
    let request = ConsentRequest::pending(
      ConsentScope::Upload { record_id },
      subject_key.clone(),
      requester,
    );
    let raw = RawRequest::from_request(&request);

    let link = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let owner: Option<String> = tx
          .query_row(
            "SELECT subject_key FROM records WHERE record_id = ?1",
            rusqlite::params![raw.record_id],
            |r| r.get(0),
          )
          .optional()?;

        match owner {
          None => return Ok(RecordLink::Missing),
          Some(owner) if owner != raw.subject_key => {
            return Ok(RecordLink::OtherSubject);
          }
          Some(_) => {}
        }

        raw.insert(&tx)?;
        tx.commit()?;
        Ok(RecordLink::Linked)
      })
      .await?;

    match link {
      RecordLink::Linked => {
        self.publish(LedgerEvent::Filed(request.clone()));
        Ok(request)
      }
      RecordLink::Missing => Err(CoreError::RecordNotFound(record_id).into()),
      RecordLink::OtherSubject => {
        Err(CoreError::RecordSubjectMismatch { record_id, subject_key }.into())
      }
    }
  }

  async fn file_access_request(
    &self,
    subject_key: SubjectKey,
    requester:   Requester,
  ) -> Result<AccessFiling> {
    let institution_id = requester.institution_id;
    let request =
      ConsentRequest::pending(ConsentScope::Access, subject_key.clone(), requester);
    let raw = RawRequest::from_request(&request);

    let filing = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if !subject_key_taken(&tx, &raw.subject_key)? {
          return Ok(AccessFilingRow::NoSubject);
        }

        let live = query_all(
          &tx,
          &format!(
            "SELECT {REQUEST_COLUMNS} FROM consent_requests
             WHERE institution_id = ?1 AND subject_key = ?2 AND kind = 'access'
               AND status IN ('pending', 'approved')
             ORDER BY rowid"
          ),
          rusqlite::params![raw.institution_id, raw.subject_key],
          RawRequest::from_row,
        )?;
        if !live.is_empty() {
          return Ok(AccessFilingRow::Live(live));
        }

        raw.insert(&tx)?;
        tx.commit()?;
        Ok(AccessFilingRow::Created)
      })
      .await?;

    match filing {
      AccessFilingRow::Created => {
        self.publish(LedgerEvent::Filed(request.clone()));
        Ok(AccessFiling { request, disposition: AccessDisposition::Created })
      }
      AccessFilingRow::Live(raws) => {
        let live = raws
          .into_iter()
          .map(RawRequest::into_request)
          .collect::<Result<Vec<_>>>()?;
        let (existing, disposition) =
          existing_access(&live, institution_id, &subject_key).ok_or_else(|| {
            Error::Decode("live access row does not match its filter".into())
          })?;
        tracing::debug!(
          request_id = %existing.request_id,
          ?disposition,
          "access request already on file"
        );
        Ok(AccessFiling { request: existing.clone(), disposition })
      }
      AccessFilingRow::NoSubject => {
        Err(CoreError::SubjectNotFound(subject_key).into())
      }
    }
  }

  async fn resolve(
    &self,
    request_id: Uuid,
    actor:      SubjectKey,
    outcome:    Outcome,
  ) -> Result<Resolution> {
    let id_str = encode_uuid(request_id);

    // The status write and the record approval share one IMMEDIATE
    // transaction; readers see both or neither.
    let resolution = self
      .conn
      .call(move |conn| -> tokio_rusqlite::Result<Result<Resolution>> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let raw = tx
          .query_row(
            &format!(
              "SELECT {REQUEST_COLUMNS} FROM consent_requests \
               WHERE request_id = ?1"
            ),
            rusqlite::params![id_str],
            RawRequest::from_row,
          )
          .optional()?;

        let Some(raw) = raw else {
          return Ok(Err(CoreError::RequestNotFound(request_id).into()));
        };
        let mut request = match raw.into_request() {
          Ok(request) => request,
          Err(e) => return Ok(Err(e)),
        };
        if let Err(e) = request.authorize(&actor) {
          return Ok(Err(e.into()));
        }

        let applied = request.decide(outcome, Utc::now());
        if !applied {
          tracing::debug!(
            %request_id,
            status = ?request.status,
            "request already decided"
          );
          return Ok(Ok(Resolution { request, applied }));
        }

        tx.execute(
          "UPDATE consent_requests SET status = ?1, resolved_at = ?2
           WHERE request_id = ?3 AND status = 'pending'",
          rusqlite::params![
            encode_status(request.status),
            request.resolved_at.map(encode_dt),
            id_str,
          ],
        )?;

        if let Some(record_id) = request.record_to_approve() {
          let changed = tx.execute(
            "UPDATE records SET approved = 1 WHERE record_id = ?1",
            rusqlite::params![encode_uuid(record_id)],
          )?;
          if changed == 0 {
            tracing::warn!(
              %record_id,
              %request_id,
              "approved upload request points at an unknown record"
            );
          }
        }

        tx.commit()?;
        Ok(Ok(Resolution { request, applied }))
      })
      .await?;

    let resolution = resolution?;
    if resolution.applied {
      self.publish(LedgerEvent::Resolved(resolution.request.clone()));
    }
    Ok(resolution)
  }

  async fn request_by_id(
    &self,
    request_id: Uuid,
  ) -> Result<Option<ConsentRequest>> {
    let id_str = encode_uuid(request_id);
    let raw: Option<RawRequest> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {REQUEST_COLUMNS} FROM consent_requests \
                 WHERE request_id = ?1"
              ),
              rusqlite::params![id_str],
              RawRequest::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawRequest::into_request).transpose()
  }

  async fn pending_for(&self, key: SubjectKey) -> Result<Vec<ConsentRequest>> {
    let key_str: String = key.into();
    let raws: Vec<RawRequest> = self
      .conn
      .call(move |conn| {
        Ok(query_all(
          conn,
          &format!(
            "SELECT {REQUEST_COLUMNS} FROM consent_requests
             WHERE subject_key = ?1 AND status = 'pending'
             ORDER BY rowid"
          ),
          rusqlite::params![key_str],
          RawRequest::from_row,
        )?)
      })
      .await?;

    raws.into_iter().map(RawRequest::into_request).collect()
  }

  fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
    self.events.subscribe()
  }

  // ── Access resolver ───────────────────────────────────────────────────────

  async fn access_snapshot(
    &self,
    institution_id: Uuid,
    subject_key:    SubjectKey,
  ) -> Result<AccessSnapshot> {
    let inst_str: String = encode_uuid(institution_id);
    let key_str: String = subject_key.into();

    let (records, requests): (Vec<RawRecord>, Vec<RawRequest>) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let records = query_all(
          &tx,
          &format!(
            "SELECT {RECORD_COLUMNS} FROM records \
             WHERE subject_key = ?1 ORDER BY rowid"
          ),
          rusqlite::params![key_str],
          RawRecord::from_row,
        )?;
        let requests = query_all(
          &tx,
          &format!(
            "SELECT {REQUEST_COLUMNS} FROM consent_requests
             WHERE institution_id = ?1 AND subject_key = ?2 AND kind = 'access'
             ORDER BY rowid"
          ),
          rusqlite::params![inst_str, key_str],
          RawRequest::from_row,
        )?;
        tx.commit()?;
        Ok((records, requests))
      })
      .await?;

    Ok(AccessSnapshot {
      subject_records: records
        .into_iter()
        .map(RawRecord::into_record)
        .collect::<Result<_>>()?,
      access_requests: requests
        .into_iter()
        .map(RawRequest::into_request)
        .collect::<Result<_>>()?,
    })
  }
}
