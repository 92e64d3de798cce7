//! Handlers for `/records` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/records` | Institution only. Body: [`UploadBody`]; stores the record and files its upload request |
//! | `GET`  | `/records` | Institutions get their approved uploads, individuals their approved records |
//! | `GET`  | `/records/{id}` | Owner, or an institution the record is visible to; 404 otherwise |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use medvault_core::{
  SubjectKey,
  account::Account,
  consent::{ConsentRequest, Requester},
  record::{NewRecord, Record, RecordCategory, payload_base64},
  store::ExchangeStore,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{auth::Principal, error::ApiError};

// ─── Upload ───────────────────────────────────────────────────────────────────

/// JSON body accepted by `POST /records`. `payload` is base64.
#[derive(Debug, Deserialize)]
pub struct UploadBody {
  pub subject_key: SubjectKey,
  pub category:    RecordCategory,
  #[serde(with = "payload_base64")]
  pub payload:     Vec<u8>,
  pub filename:    String,
  pub mime_type:   String,
  pub notes:       Option<String>,
}

/// The stored record and the upload request gating it.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadReceipt {
  pub record:  Record,
  pub request: ConsentRequest,
}

/// `POST /records` — returns 201 + [`UploadReceipt`].
pub async fn create<S>(
  State(store): State<Arc<S>>,
  principal: Principal,
  Json(body): Json<UploadBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: ExchangeStore + 'static,
{
  let institution = principal.institution()?;
  let subject_key = body.subject_key.clone();

  let record = store
    .upload(NewRecord {
      subject_key: body.subject_key,
      uploader_id: institution.institution_id,
      category:    body.category,
      payload:     body.payload,
      filename:    body.filename,
      mime_type:   body.mime_type,
      notes:       body.notes,
    })
    .await
    .map_err(ApiError::store)?;

  let request = store
    .file_upload_request(
      subject_key,
      Requester::from(institution),
      record.record_id,
    )
    .await
    .map_err(ApiError::store)?;

  Ok((StatusCode::CREATED, Json(UploadReceipt { record, request })))
}

// ─── List ─────────────────────────────────────────────────────────────────────

/// `GET /records`
pub async fn list<S>(
  State(store): State<Arc<S>>,
  Principal(account): Principal,
) -> Result<Json<Vec<Record>>, ApiError>
where
  S: ExchangeStore + 'static,
{
  let records = match account {
    Account::Institution(i) => store.records_by_uploader(i.institution_id).await,
    Account::Individual(i) => store.records_by_subject(i.subject_key).await,
  }
  .map_err(ApiError::store)?;
  Ok(Json(records))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /records/{id}`
///
/// A record the caller may not see is reported as missing, so probing ids
/// reveals nothing.
pub async fn get_one<S>(
  State(store): State<Arc<S>>,
  Principal(account): Principal,
  Path(id): Path<Uuid>,
) -> Result<Json<Record>, ApiError>
where
  S: ExchangeStore + 'static,
{
  let not_found = || ApiError::NotFound(format!("record {id} not found"));

  let record = store
    .record_by_id(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(not_found)?;

  let visible = match &account {
    Account::Individual(i) => i.subject_key == record.subject_key,
    Account::Institution(i) => store
      .visible_records(i.institution_id, record.subject_key.clone())
      .await
      .map_err(ApiError::store)?
      .iter()
      .any(|r| r.record_id == id),
  };

  if !visible {
    return Err(not_found());
  }
  Ok(Json(record))
}
