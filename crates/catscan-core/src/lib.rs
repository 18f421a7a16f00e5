//! CatSCAN Core - scan history, diffing, credentials and configuration
//!
//! This crate provides the append-only `SQLite` history of scan snapshots,
//! the diff engine that compares them, keyring-backed API tokens, and the
//! user configuration.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
    clippy::unused_self
)]

pub mod config;
pub mod diff;
pub mod secrets;
pub mod storage;

pub use catscan_scanner;

pub use config::{CatscanConfig, ConfigError};
pub use diff::{HistoryRecord, SnapshotDiff};
pub use secrets::KeyringTokenSource;
pub use storage::{HistoryStore, SnapshotSummary, StoreError, StoreResult};
