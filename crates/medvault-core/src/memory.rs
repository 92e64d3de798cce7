//! In-memory implementation of [`ExchangeStore`].
//!
//! Primarily for tests and embedding. It has the same semantics as the SQLite
//! backend but keeps everything in memory with no persistence. A single
//! [`RwLock`] guards all three collections, so every mutation is atomic and
//! every snapshot is consistent.

use chrono::Utc;
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use crate::{
  Error, Result,
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
  subject_key::{MAX_ISSUE_ATTEMPTS, SubjectKey, fold_name},
};

/// In-memory store. All data is lost when the store is dropped.
pub struct MemoryStore {
  inner:  RwLock<Inner>,
  events: broadcast::Sender<LedgerEvent>,
}

#[derive(Default)]
struct Inner {
  accounts: Vec<StoredAccount>,
  records:  Vec<Record>,
  requests: Vec<ConsentRequest>,
}

struct StoredAccount {
  account:    Account,
  credential: String,
}

impl Inner {
  fn institution_by_email(&self, email: &str) -> Option<&StoredAccount> {
    self.accounts.iter().find(|s| {
      s.account
        .as_institution()
        .is_some_and(|i| i.login_email == email)
    })
  }

  fn individual_by_key(&self, key: &SubjectKey) -> Option<&StoredAccount> {
    self.accounts.iter().find(|s| {
      s.account
        .as_individual()
        .is_some_and(|i| &i.subject_key == key)
    })
  }

  fn individual_by_name_phone(
    &self,
    name: &str,
    phone: &str,
  ) -> Option<&Individual> {
    let folded = fold_name(name);
    self
      .accounts
      .iter()
      .filter_map(|s| s.account.as_individual())
      .find(|i| fold_name(&i.display_name) == folded && i.phone == phone)
  }

  fn touch_login(&mut self, account_id: Uuid) -> Option<Account> {
    let now = Utc::now();
    let stored = self
      .accounts
      .iter_mut()
      .find(|s| s.account.id() == account_id)?;
    match &mut stored.account {
      Account::Institution(i) => i.last_login_at = Some(now),
      Account::Individual(i) => i.last_login_at = Some(now),
    }
    Some(stored.account.clone())
  }
}

impl MemoryStore {
  pub fn new() -> Self {
    let (events, _) = broadcast::channel(LEDGER_EVENT_CAPACITY);
    Self { inner: RwLock::new(Inner::default()), events }
  }

  fn publish(&self, event: LedgerEvent) {
    // No receivers is not an error.
    let _ = self.events.send(event);
  }
}

impl Default for MemoryStore {
  fn default() -> Self { Self::new() }
}

impl ExchangeStore for MemoryStore {
  type Error = Error;

  // ── Identity registry ─────────────────────────────────────────────────────

  async fn register_institution(&self, input: NewInstitution) -> Result<Account> {
    let credential = hash_secret(&input.secret)?;
    let mut inner = self.inner.write().await;

    if inner.institution_by_email(&input.login_email).is_some() {
      return Err(Error::DuplicateEmail(input.login_email));
    }

    let account = Account::Institution(Institution {
      institution_id: Uuid::new_v4(),
      login_email:    input.login_email,
      display_name:   input.display_name,
      created_at:     Utc::now(),
      last_login_at:  None,
    });
    inner.accounts.push(StoredAccount { account: account.clone(), credential });
    Ok(account)
  }

  async fn register_individual(&self, input: NewIndividual) -> Result<Enrollment> {
    let credential = hash_secret(&input.secret)?;
    let mut inner = self.inner.write().await;

    let subject_key = match input.key {
      KeyIssuance::Supplied(key) => {
        if inner.individual_by_key(&key).is_some() {
          return Err(Error::DuplicateSubjectKey(key));
        }
        key
      }
      KeyIssuance::Generate => {
        if let Some(existing) =
          inner.individual_by_name_phone(&input.display_name, &input.phone)
        {
          tracing::debug!(
            subject_key = %existing.subject_key,
            "reusing subject key for known name and phone"
          );
          return Ok(Enrollment::Existing(existing.clone()));
        }
        SubjectKey::issue(&input.display_name, &input.phone, Utc::now(), |k| {
          Ok::<_, Error>(inner.individual_by_key(k).is_some())
        })?
        .ok_or(Error::SubjectKeySpaceExhausted(MAX_ISSUE_ATTEMPTS))?
      }
    };

    let individual = Individual {
      individual_id: Uuid::new_v4(),
      subject_key,
      display_name: input.display_name,
      sex: input.sex,
      phone: input.phone,
      created_at: Utc::now(),
      last_login_at: None,
    };
    inner.accounts.push(StoredAccount {
      account: Account::Individual(individual.clone()),
      credential,
    });
    Ok(Enrollment::Created(individual))
  }

  async fn find_by_login_email(
    &self,
    email: String,
  ) -> Result<Option<Institution>> {
    let inner = self.inner.read().await;
    Ok(
      inner
        .institution_by_email(&email)
        .and_then(|s| s.account.as_institution())
        .cloned(),
    )
  }

  async fn find_by_subject_key(
    &self,
    key: SubjectKey,
  ) -> Result<Option<Individual>> {
    let inner = self.inner.read().await;
    Ok(
      inner
        .individual_by_key(&key)
        .and_then(|s| s.account.as_individual())
        .cloned(),
    )
  }

  async fn find_institution(
    &self,
    institution_id: Uuid,
  ) -> Result<Option<Institution>> {
    let inner = self.inner.read().await;
    Ok(
      inner
        .accounts
        .iter()
        .filter_map(|s| s.account.as_institution())
        .find(|i| i.institution_id == institution_id)
        .cloned(),
    )
  }

  async fn exists_subject_key(&self, key: SubjectKey) -> Result<bool> {
    Ok(self.inner.read().await.individual_by_key(&key).is_some())
  }

  async fn authenticate(
    &self,
    identifier: String,
    secret: String,
  ) -> Result<Account> {
    // Institution first, then individual. Hashes are verified with no lock
    // held; only the login timestamp needs the write guard.
    let candidates: Vec<(Uuid, String)> = {
      let inner = self.inner.read().await;
      let individual = SubjectKey::parse(identifier.as_str())
        .ok()
        .and_then(|key| inner.individual_by_key(&key));
      inner
        .institution_by_email(&identifier)
        .into_iter()
        .chain(individual)
        .map(|s| (s.account.id(), s.credential.clone()))
        .collect()
    };

    let Some(account_id) = candidates
      .into_iter()
      .find(|(_, phc)| verify_secret(phc, &secret))
      .map(|(id, _)| id)
    else {
      return Err(Error::InvalidCredentials);
    };

    self
      .inner
      .write()
      .await
      .touch_login(account_id)
      .ok_or(Error::InvalidCredentials)
  }

  // ── Record store ──────────────────────────────────────────────────────────

  async fn upload(&self, input: NewRecord) -> Result<Record> {
    let record = input.into_pending();
    self.inner.write().await.records.push(record.clone());
    Ok(record)
  }

  async fn mark_approved(&self, record_id: Uuid) -> Result<()> {
    let mut inner = self.inner.write().await;
    match inner.records.iter_mut().find(|r| r.record_id == record_id) {
      Some(record) => record.approved = true,
      None => tracing::warn!(%record_id, "mark_approved: unknown record, ignoring"),
    }
    Ok(())
  }

  async fn record_by_id(&self, record_id: Uuid) -> Result<Option<Record>> {
    let inner = self.inner.read().await;
    Ok(inner.records.iter().find(|r| r.record_id == record_id).cloned())
  }

  async fn records_by_uploader(&self, institution_id: Uuid) -> Result<Vec<Record>> {
    let inner = self.inner.read().await;
    Ok(
      inner
        .records
        .iter()
        .filter(|r| r.approved && r.uploader_id == institution_id)
        .cloned()
        .collect(),
    )
  }

  async fn records_by_subject(&self, key: SubjectKey) -> Result<Vec<Record>> {
    let inner = self.inner.read().await;
    Ok(
      inner
        .records
        .iter()
        .filter(|r| r.approved && r.subject_key == key)
        .cloned()
        .collect(),
    )
  }

  // ── Consent ledger ────────────────────────────────────────────────────────

  async fn file_upload_request(
    &self,
    subject_key: SubjectKey,
    requester:   Requester,
    record_id:   Uuid,
  ) -> Result<ConsentRequest> {
    let request = {
      let mut inner = self.inner.write().await;
      let record = inner
        .records
        .iter()
        .find(|r| r.record_id == record_id)
        .ok_or(Error::RecordNotFound(record_id))?;
      if record.subject_key != subject_key {
        return Err(Error::RecordSubjectMismatch { record_id, subject_key });
      }

      let request = ConsentRequest::pending(
        ConsentScope::Upload { record_id },
        subject_key,
        requester,
      );
      inner.requests.push(request.clone());
      request
    };

    self.publish(LedgerEvent::Filed(request.clone()));
    Ok(request)
  }

  async fn file_access_request(
    &self,
    subject_key: SubjectKey,
    requester:   Requester,
  ) -> Result<AccessFiling> {
    let request = {
      let mut inner = self.inner.write().await;
      if inner.individual_by_key(&subject_key).is_none() {
        return Err(Error::SubjectNotFound(subject_key));
      }

      if let Some((existing, disposition)) =
        existing_access(&inner.requests, requester.institution_id, &subject_key)
      {
        tracing::debug!(
          request_id = %existing.request_id,
          ?disposition,
          "access request already on file"
        );
        return Ok(AccessFiling { request: existing.clone(), disposition });
      }

      let request =
        ConsentRequest::pending(ConsentScope::Access, subject_key, requester);
      inner.requests.push(request.clone());
      request
    };

    self.publish(LedgerEvent::Filed(request.clone()));
    Ok(AccessFiling { request, disposition: AccessDisposition::Created })
  }

  async fn resolve(
    &self,
    request_id: Uuid,
    actor:      SubjectKey,
    outcome:    Outcome,
  ) -> Result<Resolution> {
    let resolution = {
      let mut inner = self.inner.write().await;
      let request = inner
        .requests
        .iter_mut()
        .find(|r| r.request_id == request_id)
        .ok_or(Error::RequestNotFound(request_id))?;
      request.authorize(&actor)?;

      let applied = request.decide(outcome, Utc::now());
      let request = request.clone();

      if applied {
        if let Some(record_id) = request.record_to_approve() {
          match inner.records.iter_mut().find(|r| r.record_id == record_id) {
            Some(record) => record.approved = true,
            None => tracing::warn!(
              %record_id,
              %request_id,
              "approved upload request points at an unknown record"
            ),
          }
        }
      } else {
        tracing::debug!(
          %request_id,
          status = ?request.status,
          "request already decided"
        );
      }

      Resolution { request, applied }
    };

    if resolution.applied {
      self.publish(LedgerEvent::Resolved(resolution.request.clone()));
    }
    Ok(resolution)
  }

  async fn request_by_id(
    &self,
    request_id: Uuid,
  ) -> Result<Option<ConsentRequest>> {
    let inner = self.inner.read().await;
    Ok(inner.requests.iter().find(|r| r.request_id == request_id).cloned())
  }

  async fn pending_for(&self, key: SubjectKey) -> Result<Vec<ConsentRequest>> {
    let inner = self.inner.read().await;
    Ok(
      inner
        .requests
        .iter()
        .filter(|r| r.is_pending() && r.subject_key == key)
        .cloned()
        .collect(),
    )
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
    let inner = self.inner.read().await;
    Ok(AccessSnapshot {
      subject_records: inner
        .records
        .iter()
        .filter(|r| r.subject_key == subject_key)
        .cloned()
        .collect(),
      access_requests: inner
        .requests
        .iter()
        .filter(|r| {
          r.scope == ConsentScope::Access
            && r.institution_id == institution_id
            && r.subject_key == subject_key
        })
        .cloned()
        .collect(),
    })
  }
}

#[cfg(test)]
mod tests;
