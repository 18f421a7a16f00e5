//! CatSCAN Scanner - bounded-parallel organization scans
//!
//! This crate walks every workspace of a Terraform Cloud organization through
//! a shared [`catscan_api::ApiClient`], isolating per-workspace failures and
//! reusing unchanged workspaces from a previous snapshot.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
    clippy::too_many_lines,
    clippy::cast_precision_loss
)]

pub mod error;
pub mod progress;
pub mod scan;
pub mod snapshot;

pub use error::{ScanError, ScanResult};
pub use progress::{ScanEvent, ScanProgress};
pub use scan::{Scanner, DEFAULT_CONCURRENCY};
pub use snapshot::{
    fingerprint, FailureKind, ScanOutcome, ScanSnapshot, ScanSummary, WorkspaceScan,
    WorkspaceStatus,
};
