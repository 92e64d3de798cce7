//! Handler for `GET /access/{key}` — the records an institution can see.

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
};
use medvault_core::{record::Record, store::ExchangeStore};

use crate::{accounts::parse_key, auth::Principal, error::ApiError};

/// `GET /access/{key}` — the caller's own approved uploads for the subject,
/// followed by everything else a blanket grant exposes.
pub async fn visible<S>(
  State(store): State<Arc<S>>,
  principal: Principal,
  Path(key): Path<String>,
) -> Result<Json<Vec<Record>>, ApiError>
where
  S: ExchangeStore + 'static,
{
  let institution = principal.institution()?;
  let key = parse_key(&key)?;
  let records = store
    .visible_records(institution.institution_id, key)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(records))
}
