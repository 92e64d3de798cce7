//! JSON REST API for medvault.
//!
//! Exposes an axum [`Router`] backed by any
//! [`medvault_core::store::ExchangeStore`]. Every route except the two
//! registration endpoints requires HTTP Basic credentials of the form
//! `identifier:secret`, where the identifier is an institution's login email
//! or an individual's subject key. TLS and transport concerns are the
//! caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", medvault_api::api_router(store.clone()))
//! ```

pub mod access;
pub mod accounts;
pub mod auth;
pub mod consent;
pub mod error;
pub mod records;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use medvault_core::store::ExchangeStore;

pub use auth::Principal;
pub use error::ApiError;

/// Build a fully-materialised API router for `store`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(store: Arc<S>) -> Router<()>
where
  S: ExchangeStore + 'static,
{
  Router::new()
    // Accounts
    .route("/institutions", post(accounts::register_institution::<S>))
    .route("/institutions/{id}", get(accounts::get_institution::<S>))
    .route("/individuals", post(accounts::register_individual::<S>))
    .route("/individuals/{key}", get(accounts::get_individual::<S>))
    .route("/me", get(accounts::me))
    // Records
    .route("/records", get(records::list::<S>).post(records::create::<S>))
    .route("/records/{id}", get(records::get_one::<S>))
    // Consent
    .route("/consent/access", post(consent::request_access::<S>))
    .route("/consent/pending", get(consent::pending::<S>))
    .route("/consent/{id}", get(consent::get_one::<S>))
    .route("/consent/{id}/approve", post(consent::approve::<S>))
    .route("/consent/{id}/reject", post(consent::reject::<S>))
    // Access
    .route("/access/{key}", get(access::visible::<S>))
    .with_state(store)
}
