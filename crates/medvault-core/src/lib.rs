//! Core types and trait definitions for the medvault record exchange.
//!
//! Institutions upload records about individuals and ask for access to them;
//! individuals approve or reject each request. This crate holds the domain
//! model, the consent state machine, the access resolver, and the
//! [`store::ExchangeStore`] abstraction. It is deliberately free of HTTP and
//! database dependencies.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod account;
pub mod consent;
pub mod credential;
pub mod error;
pub mod memory;
pub mod record;
pub mod resolver;
pub mod store;
pub mod subject_key;

pub use error::{Error, ErrorKind, Result, StoreError};
pub use subject_key::SubjectKey;
