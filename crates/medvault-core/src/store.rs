//! The `ExchangeStore` trait.
//!
//! Implemented by storage backends ([`crate::memory::MemoryStore`] and
//! `medvault-store-sqlite`). Higher layers (`medvault-api`) depend on this
//! abstraction, not on any concrete backend.
//!
//! Backends own two consistency guarantees:
//!
//! - approving an upload request flips the request status and the record's
//!   `approved` flag in one atomic step;
//! - [`ExchangeStore::access_snapshot`] reads records and grants at a single
//!   consistent point, so resolution never mixes an approved status with a
//!   not-yet-approved record.

use std::future::Future;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
  StoreError,
  account::{
    Account, Enrollment, Individual, Institution, NewIndividual, NewInstitution,
  },
  consent::{
    AccessFiling, ConsentRequest, LedgerEvent, Outcome, Requester, Resolution,
  },
  record::{NewRecord, Record},
  resolver::{self, AccessSnapshot},
  subject_key::SubjectKey,
};

/// Capacity of the ledger event channel. Slow subscribers observe
/// `RecvError::Lagged` rather than blocking writers.
pub const LEDGER_EVENT_CAPACITY: usize = 256;

/// Abstraction over a medvault store backend.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait ExchangeStore: Send + Sync {
  type Error: StoreError;

  // ── Identity registry ───────────────────────────────────────────────────

  /// Register an institution. Fails with `DuplicateEmail` if the login email
  /// is taken.
  fn register_institution(
    &self,
    input: NewInstitution,
  ) -> impl Future<Output = Result<Account, Self::Error>> + Send + '_;

  /// Register an individual.
  ///
  /// With [`crate::account::KeyIssuance::Supplied`], fails with
  /// `DuplicateSubjectKey` if the key is taken. With
  /// [`crate::account::KeyIssuance::Generate`], an individual already
  /// registered under the same folded name and phone is returned unchanged;
  /// otherwise a fresh key is issued. The returned [`Enrollment`] tells the
  /// two apart.
  fn register_individual(
    &self,
    input: NewIndividual,
  ) -> impl Future<Output = Result<Enrollment, Self::Error>> + Send + '_;

  fn find_by_login_email(
    &self,
    email: String,
  ) -> impl Future<Output = Result<Option<Institution>, Self::Error>> + Send + '_;

  fn find_by_subject_key(
    &self,
    key: SubjectKey,
  ) -> impl Future<Output = Result<Option<Individual>, Self::Error>> + Send + '_;

  fn find_institution(
    &self,
    institution_id: Uuid,
  ) -> impl Future<Output = Result<Option<Institution>, Self::Error>> + Send + '_;

  fn exists_subject_key(
    &self,
    key: SubjectKey,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Resolve `identifier` as an institution login email first, then as a
  /// subject key, succeeding on the first secret match. Records
  /// `last_login_at` on success; fails with `InvalidCredentials` otherwise.
  fn authenticate(
    &self,
    identifier: String,
    secret: String,
  ) -> impl Future<Output = Result<Account, Self::Error>> + Send + '_;

  // ── Record store ────────────────────────────────────────────────────────

  /// Insert an unapproved record. Subject and uploader are not checked
  /// against the registry.
  fn upload(
    &self,
    input: NewRecord,
  ) -> impl Future<Output = Result<Record, Self::Error>> + Send + '_;

  /// Set `approved` on a record. Idempotent; an unknown id is logged and
  /// ignored.
  ///
  /// [`ExchangeStore::resolve`] performs the same write itself, inside the
  /// step that approves the upload request, rather than calling this.
  fn mark_approved(
    &self,
    record_id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn record_by_id(
    &self,
    record_id: Uuid,
  ) -> impl Future<Output = Result<Option<Record>, Self::Error>> + Send + '_;

  /// Approved records uploaded by `institution_id`, in insertion order.
  fn records_by_uploader(
    &self,
    institution_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Record>, Self::Error>> + Send + '_;

  /// Approved records owned by `key`, in insertion order.
  fn records_by_subject(
    &self,
    key: SubjectKey,
  ) -> impl Future<Output = Result<Vec<Record>, Self::Error>> + Send + '_;

  // ── Consent ledger ──────────────────────────────────────────────────────

  /// File a pending upload request for `record_id`. Never deduplicated.
  ///
  /// Fails with `RecordNotFound` for an unknown record and
  /// `RecordSubjectMismatch` if the record belongs to another subject.
  fn file_upload_request(
    &self,
    subject_key: SubjectKey,
    requester: Requester,
    record_id: Uuid,
  ) -> impl Future<Output = Result<ConsentRequest, Self::Error>> + Send + '_;

  /// File an access request, unless the institution already holds an
  /// approved or pending one for the subject, in which case that request is
  /// returned and the ledger does not grow.
  ///
  /// Fails with `SubjectNotFound` if no individual holds `subject_key`.
  fn file_access_request(
    &self,
    subject_key: SubjectKey,
    requester: Requester,
  ) -> impl Future<Output = Result<AccessFiling, Self::Error>> + Send + '_;

  /// Decide a request on behalf of `actor`, who must be its subject.
  ///
  /// The first decision wins; deciding a terminal request returns it
  /// unchanged with `applied = false`. Approving an upload request also
  /// approves its record, atomically.
  fn resolve(
    &self,
    request_id: Uuid,
    actor: SubjectKey,
    outcome: Outcome,
  ) -> impl Future<Output = Result<Resolution, Self::Error>> + Send + '_;

  fn request_by_id(
    &self,
    request_id: Uuid,
  ) -> impl Future<Output = Result<Option<ConsentRequest>, Self::Error>>
  + Send
  + '_;

  /// Pending requests of any kind naming `key`, in insertion order.
  fn pending_for(
    &self,
    key: SubjectKey,
  ) -> impl Future<Output = Result<Vec<ConsentRequest>, Self::Error>> + Send + '_;

  /// Subscribe to ledger mutations. Each filing and each applied decision
  /// publishes one event after it commits.
  fn subscribe(&self) -> broadcast::Receiver<LedgerEvent>;

  // ── Access resolver ─────────────────────────────────────────────────────

  /// Capture the state [`resolver::visible_records`] needs, consistently.
  fn access_snapshot(
    &self,
    institution_id: Uuid,
    subject_key: SubjectKey,
  ) -> impl Future<Output = Result<AccessSnapshot, Self::Error>> + Send + '_;

  /// Records `institution_id` can currently see for `subject_key`: its own
  /// approved uploads, then (given an approved access grant) every other
  /// approved record of the subject.
  fn visible_records(
    &self,
    institution_id: Uuid,
    subject_key: SubjectKey,
  ) -> impl Future<Output = Result<Vec<Record>, Self::Error>> + Send + '_ {
    async move {
      let snapshot = self
        .access_snapshot(institution_id, subject_key.clone())
        .await?;
      Ok(resolver::visible_records(institution_id, &subject_key, &snapshot))
    }
  }
}
