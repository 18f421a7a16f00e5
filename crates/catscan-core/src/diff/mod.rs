//! Snapshot diffing

pub mod compute;
pub mod types;

pub use compute::{diff, initial};
pub use types::{AttributeChange, HistoryRecord, ResourceChange, SnapshotDiff};
