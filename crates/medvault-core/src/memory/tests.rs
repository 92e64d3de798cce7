//! Behavioural tests for `MemoryStore`.

use std::{sync::Arc, time::Duration};

use uuid::Uuid;

use super::MemoryStore;
use crate::{
  Error,
  account::{Account, Institution, KeyIssuance, NewIndividual, NewInstitution, Sex},
  consent::{AccessDisposition, ConsentStatus, LedgerEvent, Outcome, Requester},
  record::{NewRecord, Record, RecordCategory},
  store::ExchangeStore,
  subject_key::SubjectKey,
};

async fn institution(store: &MemoryStore, email: &str) -> Institution {
  let account = store
    .register_institution(NewInstitution {
      login_email:  email.into(),
      display_name: format!("Hospital {email}"),
      secret:       "h-secret".into(),
    })
    .await
    .unwrap();
  account.as_institution().unwrap().clone()
}

fn generated(name: &str, phone: &str) -> NewIndividual {
  NewIndividual {
    key:          KeyIssuance::Generate,
    display_name: name.into(),
    sex:          Sex::Female,
    phone:        phone.into(),
    secret:       "p-secret".into(),
  }
}

async fn individual(store: &MemoryStore, name: &str, phone: &str) -> SubjectKey {
  let enrollment = store
    .register_individual(generated(name, phone))
    .await
    .unwrap();
  enrollment.into_individual().subject_key
}

/// Upload a record and file its upload request, as an institution would.
async fn upload(
  store: &MemoryStore,
  by: &Institution,
  subject: &SubjectKey,
) -> (Record, Uuid) {
  let record = store
    .upload(NewRecord {
      subject_key: subject.clone(),
      uploader_id: by.institution_id,
      category:    RecordCategory::LabReport,
      payload:     b"glucose 5.1 mmol/L".to_vec(),
      filename:    "labs.txt".into(),
      mime_type:   "text/plain".into(),
      notes:       None,
    })
    .await
    .unwrap();
  let request = store
    .file_upload_request(subject.clone(), Requester::from(by), record.record_id)
    .await
    .unwrap();
  (record, request.request_id)
}

fn ids(records: &[Record]) -> Vec<Uuid> {
  records.iter().map(|r| r.record_id).collect()
}

// ─── Identity registry ───────────────────────────────────────────────────────

#[tokio::test]
async fn duplicate_institution_email_rejected() {
  let store = MemoryStore::new();
  institution(&store, "desk@h1.example").await;
  let err = store
    .register_institution(NewInstitution {
      login_email:  "desk@h1.example".into(),
      display_name: "Impostor".into(),
      secret:       "x".into(),
    })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::DuplicateEmail(_)));
}

#[tokio::test]
async fn supplied_key_collision_rejected() {
  let store = MemoryStore::new();
  let key = SubjectKey::parse("12345678901234").unwrap();
  let input = NewIndividual {
    key:          KeyIssuance::Supplied(key.clone()),
    display_name: "Ravi".into(),
    sex:          Sex::Male,
    phone:        "555-0100".into(),
    secret:       "s".into(),
  };
  store.register_individual(input.clone()).await.unwrap();
  assert!(store.exists_subject_key(key).await.unwrap());

  let err = store.register_individual(input).await.unwrap_err();
  assert!(matches!(err, Error::DuplicateSubjectKey(_)));
}

#[tokio::test]
async fn generated_key_is_idempotent_per_name_and_phone() {
  let store = MemoryStore::new();
  let first = individual(&store, "Meera Iyer", "555-0101").await;
  let again = store
    .register_individual(generated("meera iyer", "555-0101"))
    .await
    .unwrap();
  let other = individual(&store, "Meera Iyer", "555-0199").await;

  assert!(!again.is_new());
  assert_eq!(again.individual().subject_key, first);
  assert_ne!(first, other);
  assert_eq!(first.as_str().len(), 14);
}

#[tokio::test]
async fn authenticate_by_email_or_subject_key() {
  let store = MemoryStore::new();
  let h1 = institution(&store, "desk@h1.example").await;
  let s = individual(&store, "Meera Iyer", "555-0101").await;

  let account = store
    .authenticate("desk@h1.example".into(), "h-secret".into())
    .await
    .unwrap();
  assert_eq!(account.id(), h1.institution_id);
  assert!(account.as_institution().unwrap().last_login_at.is_some());

  let account = store
    .authenticate(s.to_string(), "p-secret".into())
    .await
    .unwrap();
  assert!(matches!(account, Account::Individual(ref i) if i.subject_key == s));

  let err = store
    .authenticate("desk@h1.example".into(), "wrong".into())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::InvalidCredentials));

  let err = store
    .authenticate("nobody".into(), "p-secret".into())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::InvalidCredentials));
}

#[tokio::test]
async fn colliding_identifier_resolves_institution_first() {
  let store = MemoryStore::new();
  let shared = "12345678901234";

  let clinic = store
    .register_institution(NewInstitution {
      login_email:  shared.into(),
      display_name: "Clinic".into(),
      secret:       "h-secret".into(),
    })
    .await
    .unwrap();
  let person = store
    .register_individual(NewIndividual {
      key:          KeyIssuance::Supplied(SubjectKey::parse(shared).unwrap()),
      display_name: "Ravi".into(),
      sex:          Sex::Male,
      phone:        "555-0100".into(),
      secret:       "p-secret".into(),
    })
    .await
    .unwrap()
    .into_individual();

  let account = store
    .authenticate(shared.into(), "h-secret".into())
    .await
    .unwrap();
  assert!(account.as_institution().is_some());
  assert_eq!(account.id(), clinic.id());

  // The institution's secret fails, so the individual is tried next.
  let account = store
    .authenticate(shared.into(), "p-secret".into())
    .await
    .unwrap();
  assert!(account.as_individual().is_some());
  assert_eq!(account.id(), person.individual_id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn authentication_leaves_the_store_readable() {
  let store = Arc::new(MemoryStore::new());
  institution(&store, "desk@h1.example").await;

  let logins = {
    let store = Arc::clone(&store);
    tokio::spawn(async move {
      for _ in 0..10 {
        store
          .authenticate("desk@h1.example".into(), "h-secret".into())
          .await
          .unwrap();
      }
    })
  };

  let (mut readable, mut sampled) = (0u32, 0u32);
  while !logins.is_finished() {
    sampled += 1;
    if store.inner.try_read().is_ok() {
      readable += 1;
    }
    tokio::time::sleep(Duration::from_millis(1)).await;
  }
  logins.await.unwrap();

  // Hash checks run unlocked; only the brief last-login write excludes
  // readers.
  assert!(readable * 2 >= sampled, "readable in {readable}/{sampled} samples");
}

// ─── Consent ledger ──────────────────────────────────────────────────────────

#[tokio::test]
async fn upload_request_validates_record_link() {
  let store = MemoryStore::new();
  let h1 = institution(&store, "desk@h1.example").await;
  let s = individual(&store, "Meera Iyer", "555-0101").await;
  let other = individual(&store, "Arjun Das", "555-0102").await;
  let (record, _) = upload(&store, &h1, &s).await;

  let err = store
    .file_upload_request(s.clone(), Requester::from(&h1), Uuid::new_v4())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::RecordNotFound(_)));

  let err = store
    .file_upload_request(other, Requester::from(&h1), record.record_id)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::RecordSubjectMismatch { .. }));
}

#[tokio::test]
async fn upload_requests_are_not_deduplicated() {
  let store = MemoryStore::new();
  let h1 = institution(&store, "desk@h1.example").await;
  let s = individual(&store, "Meera Iyer", "555-0101").await;
  let (record, first) = upload(&store, &h1, &s).await;

  let second = store
    .file_upload_request(s.clone(), Requester::from(&h1), record.record_id)
    .await
    .unwrap();
  assert_ne!(second.request_id, first);
  assert_eq!(store.pending_for(s).await.unwrap().len(), 2);
}

#[tokio::test]
async fn access_requests_are_deduplicated() {
  let store = MemoryStore::new();
  let h2 = institution(&store, "desk@h2.example").await;
  let s = individual(&store, "Meera Iyer", "555-0101").await;

  let first = store
    .file_access_request(s.clone(), Requester::from(&h2))
    .await
    .unwrap();
  assert_eq!(first.disposition, AccessDisposition::Created);

  let second = store
    .file_access_request(s.clone(), Requester::from(&h2))
    .await
    .unwrap();
  assert_eq!(second.disposition, AccessDisposition::AlreadyPending);
  assert_eq!(second.request.request_id, first.request.request_id);
  assert_eq!(store.pending_for(s.clone()).await.unwrap().len(), 1);

  store
    .resolve(first.request.request_id, s.clone(), Outcome::Approved)
    .await
    .unwrap();
  let third = store
    .file_access_request(s.clone(), Requester::from(&h2))
    .await
    .unwrap();
  assert_eq!(third.disposition, AccessDisposition::AlreadyGranted);
  assert_eq!(third.request.request_id, first.request.request_id);
}

#[tokio::test]
async fn rejected_access_can_be_requested_again() {
  let store = MemoryStore::new();
  let h2 = institution(&store, "desk@h2.example").await;
  let s = individual(&store, "Meera Iyer", "555-0101").await;

  let first = store
    .file_access_request(s.clone(), Requester::from(&h2))
    .await
    .unwrap();
  store
    .resolve(first.request.request_id, s.clone(), Outcome::Rejected)
    .await
    .unwrap();

  let again = store
    .file_access_request(s.clone(), Requester::from(&h2))
    .await
    .unwrap();
  assert_eq!(again.disposition, AccessDisposition::Created);
  assert_ne!(again.request.request_id, first.request.request_id);
}

#[tokio::test]
async fn access_request_for_unknown_subject_fails() {
  let store = MemoryStore::new();
  let h2 = institution(&store, "desk@h2.example").await;
  let err = store
    .file_access_request(
      SubjectKey::parse("00000000000000").unwrap(),
      Requester::from(&h2),
    )
    .await
    .unwrap_err();
  assert!(matches!(err, Error::SubjectNotFound(_)));
}

#[tokio::test]
async fn only_the_subject_may_resolve() {
  let store = MemoryStore::new();
  let h1 = institution(&store, "desk@h1.example").await;
  let s = individual(&store, "Meera Iyer", "555-0101").await;
  let intruder = individual(&store, "Arjun Das", "555-0102").await;
  let (record, request_id) = upload(&store, &h1, &s).await;

  let err = store
    .resolve(request_id, intruder, Outcome::Approved)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Unauthorized(_)));
  assert!(!store.record_by_id(record.record_id).await.unwrap().unwrap().approved);

  let err = store
    .resolve(Uuid::new_v4(), s, Outcome::Approved)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::RequestNotFound(_)));
}

#[tokio::test]
async fn first_resolution_wins() {
  let store = MemoryStore::new();
  let h1 = institution(&store, "desk@h1.example").await;
  let s = individual(&store, "Meera Iyer", "555-0101").await;
  let (record, request_id) = upload(&store, &h1, &s).await;

  let rejected = store
    .resolve(request_id, s.clone(), Outcome::Rejected)
    .await
    .unwrap();
  assert!(rejected.applied);

  let late = store
    .resolve(request_id, s.clone(), Outcome::Approved)
    .await
    .unwrap();
  assert!(!late.applied);
  assert_eq!(late.request.status, ConsentStatus::Rejected);
  assert!(!store.record_by_id(record.record_id).await.unwrap().unwrap().approved);
  assert!(store.pending_for(s).await.unwrap().is_empty());
}

#[tokio::test]
async fn mark_approved_is_idempotent_and_tolerates_unknown_ids() {
  let store = MemoryStore::new();
  let h1 = institution(&store, "desk@h1.example").await;
  let s = individual(&store, "Meera Iyer", "555-0101").await;
  let (record, _) = upload(&store, &h1, &s).await;

  store.mark_approved(record.record_id).await.unwrap();
  store.mark_approved(record.record_id).await.unwrap();
  store.mark_approved(Uuid::new_v4()).await.unwrap();

  let owned = store.records_by_subject(s).await.unwrap();
  assert_eq!(ids(&owned), vec![record.record_id]);
}

// ─── Resolution scenario ─────────────────────────────────────────────────────

#[tokio::test]
async fn upload_then_blanket_access_scenario() {
  let store = MemoryStore::new();
  let h1 = institution(&store, "desk@h1.example").await;
  let h2 = institution(&store, "desk@h2.example").await;
  let s = individual(&store, "Meera Iyer", "555-0101").await;

  let (r1, pairing) = upload(&store, &h1, &s).await;
  assert!(
    store
      .visible_records(h1.institution_id, s.clone())
      .await
      .unwrap()
      .is_empty()
  );
  assert!(store.records_by_uploader(h1.institution_id).await.unwrap().is_empty());

  let resolution = store
    .resolve(pairing, s.clone(), Outcome::Approved)
    .await
    .unwrap();
  assert!(resolution.applied);
  assert_eq!(
    ids(&store.visible_records(h1.institution_id, s.clone()).await.unwrap()),
    vec![r1.record_id]
  );
  assert_eq!(
    ids(&store.records_by_uploader(h1.institution_id).await.unwrap()),
    vec![r1.record_id]
  );

  let filing = store
    .file_access_request(s.clone(), Requester::from(&h2))
    .await
    .unwrap();
  assert!(
    store
      .visible_records(h2.institution_id, s.clone())
      .await
      .unwrap()
      .is_empty()
  );

  store
    .resolve(filing.request.request_id, s.clone(), Outcome::Approved)
    .await
    .unwrap();
  assert_eq!(
    ids(&store.visible_records(h2.institution_id, s.clone()).await.unwrap()),
    vec![r1.record_id]
  );

  // H2's own later upload comes first once approved.
  let (r2, r2_request) = upload(&store, &h2, &s).await;
  store.resolve(r2_request, s.clone(), Outcome::Approved).await.unwrap();
  assert_eq!(
    ids(&store.visible_records(h2.institution_id, s.clone()).await.unwrap()),
    vec![r2.record_id, r1.record_id]
  );
  // H1 has no blanket grant and only sees its own upload.
  assert_eq!(
    ids(&store.visible_records(h1.institution_id, s).await.unwrap()),
    vec![r1.record_id]
  );
}

// ─── Ledger events ───────────────────────────────────────────────────────────

#[tokio::test]
async fn ledger_events_follow_writes() {
  let store = MemoryStore::new();
  let mut events = store.subscribe();
  let h1 = institution(&store, "desk@h1.example").await;
  let s = individual(&store, "Meera Iyer", "555-0101").await;
  let (_, request_id) = upload(&store, &h1, &s).await;

  match events.recv().await.unwrap() {
    LedgerEvent::Filed(r) => assert_eq!(r.request_id, request_id),
    other => panic!("unexpected event {other:?}"),
  }

  store.resolve(request_id, s.clone(), Outcome::Approved).await.unwrap();
  store.resolve(request_id, s.clone(), Outcome::Rejected).await.unwrap();

  match events.recv().await.unwrap() {
    LedgerEvent::Resolved(r) => assert_eq!(r.status, ConsentStatus::Approved),
    other => panic!("unexpected event {other:?}"),
  }
  // The no-op second resolution publishes nothing.
  assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn concurrent_readers_never_see_torn_approval() {
  let store = Arc::new(MemoryStore::new());
  let h1 = institution(&store, "desk@h1.example").await;
  let s = individual(&store, "Meera Iyer", "555-0101").await;
  let (record, request_id) = upload(&store, &h1, &s).await;

  let reader = {
    let store = Arc::clone(&store);
    let s = s.clone();
    tokio::spawn(async move {
      for _ in 0..200 {
        let visible = store
          .visible_records(h1.institution_id, s.clone())
          .await
          .unwrap();
        let request = store.request_by_id(request_id).await.unwrap().unwrap();
        // Visibility can only lag the status, never lead it.
        if !visible.is_empty() {
          assert_eq!(request.status, ConsentStatus::Approved);
        }
        assert!(visible.iter().all(|r| r.approved));
        tokio::task::yield_now().await;
      }
    })
  };

  store.resolve(request_id, s.clone(), Outcome::Approved).await.unwrap();
  reader.await.unwrap();
  assert!(store.record_by_id(record.record_id).await.unwrap().unwrap().approved);
}
