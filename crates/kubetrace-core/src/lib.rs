//! kubetrace-core: record and analyze Kubernetes operator API interactions.
//!
//! An interceptor wrapped around a controller's client feeds every API call
//! and reconcile invocation into an append-only SQLite log. Offline
//! consumers then load a session and reconstruct what happened:
//!
//! ```text
//! client wrapper -> Recorder -> Store (SQLite)
//!                                  |
//!          ReplayCursor / analysis / causality / verify
//! ```
//!
//! # Modules
//!
//! - `assert`: named precondition checks with call-site capture
//! - `model`: operation and reconcile-span records, validation
//! - `storage`: SQLite store, schema bootstrap and forward migrations
//! - `verify`: read-only integrity verifier
//! - `replay`: bounded cursor over a loaded session
//! - `analysis`: loop detection, slow calls, error and access profiles
//! - `causality`: write/reconcile causality graph and chain enumeration
//! - `recorder`: the boundary contract interceptors feed the log through
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod analysis;
pub mod assert;
pub mod causality;
pub mod error;
pub mod model;
pub mod recorder;
pub mod replay;
pub mod storage;
pub mod verify;

pub use error::{Error, Result, StorageError};

/// Crate version, for diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
