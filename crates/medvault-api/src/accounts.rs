//! Handlers for account endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/institutions` | Body: [`InstitutionBody`]; returns 201 + account |
//! | `GET`  | `/institutions/{id}` | Authenticated; 404 if not found |
//! | `POST` | `/individuals` | Body: [`IndividualBody`]; 201 when created, 200 when a key is reused |
//! | `GET`  | `/individuals/{key}` | Authenticated; 404 if not found |
//! | `GET`  | `/me` | The authenticated account |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use medvault_core::{
  SubjectKey,
  account::{
    Account, Individual, Institution, KeyIssuance, NewIndividual, NewInstitution,
    Sex,
  },
  store::ExchangeStore,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{auth::Principal, error::ApiError};

/// Reject blank required fields before they reach the store.
fn require(field: &str, value: &str) -> Result<(), ApiError> {
  if value.trim().is_empty() {
    return Err(ApiError::BadRequest(format!("{field} must not be empty")));
  }
  Ok(())
}

pub(crate) fn parse_key(raw: &str) -> Result<SubjectKey, ApiError> {
  SubjectKey::parse(raw).map_err(|e| ApiError::BadRequest(e.to_string()))
}

// ─── Institutions ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct InstitutionBody {
  pub login_email:  String,
  pub display_name: String,
  pub secret:       String,
}

/// `POST /institutions` — open registration.
pub async fn register_institution<S>(
  State(store): State<Arc<S>>,
  Json(body): Json<InstitutionBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: ExchangeStore,
{
  require("login_email", &body.login_email)?;
  require("display_name", &body.display_name)?;
  require("secret", &body.secret)?;

  let account = store
    .register_institution(NewInstitution {
      login_email:  body.login_email.trim().to_owned(),
      display_name: body.display_name,
      secret:       body.secret,
    })
    .await
    .map_err(ApiError::store)?;
  tracing::info!(institution_id = %account.id(), "institution registered");
  Ok((StatusCode::CREATED, Json(account)))
}

/// `GET /institutions/{id}`
pub async fn get_institution<S>(
  State(store): State<Arc<S>>,
  _principal: Principal,
  Path(id): Path<Uuid>,
) -> Result<Json<Institution>, ApiError>
where
  S: ExchangeStore + 'static,
{
  let institution = store
    .find_institution(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("institution {id} not found")))?;
  Ok(Json(institution))
}

// ─── Individuals ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct IndividualBody {
  /// A key the individual already holds. When absent the store reuses the
  /// key of a matching (name, phone) registration or issues a new one.
  pub subject_key:  Option<String>,
  pub display_name: String,
  pub sex:          Sex,
  pub phone:        String,
  pub secret:       String,
}

/// `POST /individuals` — open registration.
///
/// Omitting `subject_key` asks for a generated key. If the same name and
/// phone already hold one, that account comes back with `200 OK` instead of
/// `201 Created`.
pub async fn register_individual<S>(
  State(store): State<Arc<S>>,
  Json(body): Json<IndividualBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: ExchangeStore,
{
  require("display_name", &body.display_name)?;
  require("phone", &body.phone)?;
  require("secret", &body.secret)?;

  let key = match body.subject_key.as_deref() {
    Some(raw) => KeyIssuance::Supplied(parse_key(raw)?),
    None => KeyIssuance::Generate,
  };

  let enrollment = store
    .register_individual(NewIndividual {
      key,
      display_name: body.display_name,
      sex: body.sex,
      phone: body.phone.trim().to_owned(),
      secret: body.secret,
    })
    .await
    .map_err(ApiError::store)?;

  let status = if enrollment.is_new() {
    StatusCode::CREATED
  } else {
    StatusCode::OK
  };
  Ok((status, Json(Account::Individual(enrollment.into_individual()))))
}

/// `GET /individuals/{key}`
pub async fn get_individual<S>(
  State(store): State<Arc<S>>,
  _principal: Principal,
  Path(key): Path<String>,
) -> Result<Json<Individual>, ApiError>
where
  S: ExchangeStore + 'static,
{
  let key = parse_key(&key)?;
  let individual = store
    .find_by_subject_key(key.clone())
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("subject {key} not found")))?;
  Ok(Json(individual))
}

// ─── Me ───────────────────────────────────────────────────────────────────────

/// `GET /me`
pub async fn me(Principal(account): Principal) -> Json<Account> { Json(account) }
