//! Handlers for `/consent` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/consent/access` | Institution only. Body: `{"subject_key":"..."}`; 201 when a request is filed, 200 when one already exists |
//! | `GET`  | `/consent/pending` | Individual only. Pending requests naming the caller |
//! | `GET`  | `/consent/{id}` | The request's subject or requesting institution |
//! | `POST` | `/consent/{id}/approve` | Individual only; must be the request's subject |
//! | `POST` | `/consent/{id}/reject` | Individual only; must be the request's subject |

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
  consent::{AccessDisposition, ConsentRequest, Outcome, Requester, Resolution},
  store::ExchangeStore,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{auth::Principal, error::ApiError};

// ─── Access requests ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AccessBody {
  pub subject_key: SubjectKey,
}

/// `POST /consent/access`
pub async fn request_access<S>(
  State(store): State<Arc<S>>,
  principal: Principal,
  Json(body): Json<AccessBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: ExchangeStore + 'static,
{
  let institution = principal.institution()?;
  let filing = store
    .file_access_request(body.subject_key, Requester::from(institution))
    .await
    .map_err(ApiError::store)?;

  let status = match filing.disposition {
    AccessDisposition::Created => StatusCode::CREATED,
    AccessDisposition::AlreadyPending | AccessDisposition::AlreadyGranted => {
      StatusCode::OK
    }
  };
  Ok((status, Json(filing)))
}

// ─── Pending ──────────────────────────────────────────────────────────────────

/// `GET /consent/pending`
pub async fn pending<S>(
  State(store): State<Arc<S>>,
  principal: Principal,
) -> Result<Json<Vec<ConsentRequest>>, ApiError>
where
  S: ExchangeStore + 'static,
{
  let individual = principal.individual()?;
  let requests = store
    .pending_for(individual.subject_key.clone())
    .await
    .map_err(ApiError::store)?;
  Ok(Json(requests))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /consent/{id}`
pub async fn get_one<S>(
  State(store): State<Arc<S>>,
  Principal(account): Principal,
  Path(id): Path<Uuid>,
) -> Result<Json<ConsentRequest>, ApiError>
where
  S: ExchangeStore + 'static,
{
  let not_found = || ApiError::NotFound(format!("consent request {id} not found"));
  let request = store
    .request_by_id(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(not_found)?;

  let party = match &account {
    Account::Individual(i) => i.subject_key == request.subject_key,
    Account::Institution(i) => i.institution_id == request.institution_id,
  };
  if !party {
    return Err(not_found());
  }
  Ok(Json(request))
}

// ─── Decide ───────────────────────────────────────────────────────────────────

async fn decide<S>(
  store: &S,
  principal: &Principal,
  request_id: Uuid,
  outcome: Outcome,
) -> Result<Json<Resolution>, ApiError>
where
  S: ExchangeStore,
{
  let individual = principal.individual()?;
  let resolution = store
    .resolve(request_id, individual.subject_key.clone(), outcome)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(resolution))
}

/// `POST /consent/{id}/approve`
pub async fn approve<S>(
  State(store): State<Arc<S>>,
  principal: Principal,
  Path(id): Path<Uuid>,
) -> Result<Json<Resolution>, ApiError>
where
  S: ExchangeStore + 'static,
{
  decide(store.as_ref(), &principal, id, Outcome::Approved).await
}

/// `POST /consent/{id}/reject`
pub async fn reject<S>(
  State(store): State<Arc<S>>,
  principal: Principal,
  Path(id): Path<Uuid>,
) -> Result<Json<Resolution>, ApiError>
where
  S: ExchangeStore + 'static,
{
  decide(store.as_ref(), &principal, id, Outcome::Rejected).await
}
