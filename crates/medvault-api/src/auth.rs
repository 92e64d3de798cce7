//! HTTP Basic-auth extractor resolving the calling principal.

use std::sync::Arc;

use axum::{
  extract::FromRequestParts,
  http::{HeaderMap, header, request::Parts},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use medvault_core::{
  ErrorKind, StoreError as _,
  account::{Account, Individual, Institution},
  store::ExchangeStore,
};

use crate::error::ApiError;

/// The authenticated caller. Present in a handler means the request carried
/// valid credentials for an institution or an individual.
#[derive(Debug, Clone)]
pub struct Principal(pub Account);

impl Principal {
  /// The caller as an institution, or `403` for an individual.
  pub fn institution(&self) -> Result<&Institution, ApiError> {
    self
      .0
      .as_institution()
      .ok_or_else(|| ApiError::Forbidden("institution credentials required".into()))
  }

  /// The caller as an individual, or `403` for an institution.
  pub fn individual(&self) -> Result<&Individual, ApiError> {
    self
      .0
      .as_individual()
      .ok_or_else(|| ApiError::Forbidden("individual credentials required".into()))
  }
}

/// Split an `Authorization: Basic` header into `(identifier, secret)`.
pub fn basic_credentials(
  headers: &HeaderMap,
) -> Result<(String, String), ApiError> {
  let header_val = headers
    .get(header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .ok_or(ApiError::Unauthorized)?;

  let encoded = header_val
    .strip_prefix("Basic ")
    .ok_or(ApiError::Unauthorized)?;

  let decoded = B64.decode(encoded).map_err(|_| ApiError::Unauthorized)?;
  let creds   = String::from_utf8(decoded).map_err(|_| ApiError::Unauthorized)?;

  let (identifier, secret) = creds.split_once(':').ok_or(ApiError::Unauthorized)?;
  Ok((identifier.to_owned(), secret.to_owned()))
}

impl<S> FromRequestParts<Arc<S>> for Principal
where
  S: ExchangeStore + 'static,
{
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    store: &Arc<S>,
  ) -> Result<Self, Self::Rejection> {
    let (identifier, secret) = basic_credentials(&parts.headers)?;
    match store.authenticate(identifier, secret).await {
      Ok(account) => Ok(Principal(account)),
      Err(e) if e.kind() == ErrorKind::InvalidCredentials => {
        Err(ApiError::Unauthorized)
      }
      Err(e) => Err(ApiError::store(e)),
    }
  }
}

#[cfg(test)]
mod tests {
  use axum::http::HeaderValue;

  use super::*;

  fn headers(value: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
    headers
  }

  #[test]
  fn splits_on_first_colon() {
    let value = format!("Basic {}", B64.encode("desk@h1.example:pa:ss"));
    let (id, secret) = basic_credentials(&headers(&value)).unwrap();
    assert_eq!(id, "desk@h1.example");
    assert_eq!(secret, "pa:ss");
  }

  #[test]
  fn missing_header() {
    assert!(matches!(
      basic_credentials(&HeaderMap::new()),
      Err(ApiError::Unauthorized)
    ));
  }

  #[test]
  fn invalid_base64() {
    assert!(matches!(
      basic_credentials(&headers("Basic !!!not-base64!!!")),
      Err(ApiError::Unauthorized)
    ));
  }

  #[test]
  fn wrong_scheme() {
    assert!(matches!(
      basic_credentials(&headers("Bearer abc")),
      Err(ApiError::Unauthorized)
    ));
  }
}
