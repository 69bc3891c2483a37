//! # integration - Account Worker Client and Fetch Cache
//!
//! Fetches authoritative platform data for an account by talking to a
//! dedicated **worker process** per account over a line-delimited JSON
//! protocol on its standard streams.
//!
//! ## Architecture
//!
//! ```text
//! IntegrationClient::fetch_all(account, range)
//!        │  one future per DataKind (try_join_all)
//!        ↓
//!   FetchCache (read-through, TTL) ──hit──→ FetchResult
//!        │ miss
//!        ↓
//!   DataSource::fetch ── ProcessDataSource
//!        │
//!        ↓
//!   WorkerPool::acquire ──→ Connection (one worker per account)
//!                              │  {id, operation, parameters}  → stdin
//!                              │  {id, result} / {id, error}  ← stdout
//! ```
//!
//! ## Failure classification
//!
//! - `segments` and `campaigns` are **critical**: a failure aborts the fan-out
//!   with [`IntegrationError::CriticalFetch`].
//! - `flows`, `metrics`, `lists` and `catalog_items` are **non-critical**: a
//!   failure becomes [`KindOutcome::Degraded`] with an advisory and an empty
//!   record set.
//! - Only [`IntegrationError::RpcTimeout`] is transient
//!   ([`IntegrationError::is_transient`]); callers decide whether to retry.
//!
//! ## Credentials
//!
//! Account secrets are resolved by a [`CredentialResolver`] and handed to the
//! worker as process environment at spawn time. They never appear in requests.

pub mod cache;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod kind;
pub mod pool;
pub mod protocol;

pub use cache::{CacheConfig, CacheMetrics, FetchCache};
pub use client::{DataSource, IntegrationClient, ProcessDataSource};
pub use config::{CredentialResolver, EnvCredentialResolver, StaticCredentialResolver, WorkerConfig};
pub use connection::Connection;
pub use error::{IntegrationError, Result};
pub use kind::{
    AccountTarget, AggregateResult, DataKind, DateRange, FetchRequest, FetchResult,
    InvalidDateRange, KindOutcome,
};
pub use pool::WorkerPool;
