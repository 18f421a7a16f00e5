//! Storage layer (`SQLite`)
//!
//! Snapshots and history records are append-only: triggers abort any update
//! or delete, so a stored snapshot never changes once written.

pub mod db;
pub mod migrations;
pub mod records;
pub mod snapshots;

pub use db::{Database, StoreError, StoreResult};
pub use records::RecordStore;
pub use snapshots::{SnapshotStore, SnapshotSummary};

use crate::diff::{self, HistoryRecord};
use catscan_scanner::ScanSnapshot;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

/// Scan history of every organization
pub struct HistoryStore {
    db: Database,
}

impl HistoryStore {
    /// Open or create the store at `path`
    pub fn open(path: &Path) -> StoreResult<Self> {
        debug!(path = %path.display(), "opening history store");
        Ok(Self {
            db: Database::open(path)?,
        })
    }

    /// In-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        Ok(Self {
            db: Database::in_memory()?,
        })
    }

    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Persist `snapshot`; the returned summary identifies it
    pub fn save(&self, snapshot: &ScanSnapshot) -> StoreResult<SnapshotSummary> {
        let handle = SnapshotStore::new(self.db.connection()).insert(snapshot)?;
        info!(
            snapshot = %handle.id,
            organization = %handle.organization,
            resources = handle.resources,
            "saved snapshot"
        );
        Ok(handle)
    }

    pub fn load(&self, id: Uuid) -> StoreResult<Option<ScanSnapshot>> {
        SnapshotStore::new(self.db.connection()).get(id)
    }

    /// Most recent completed snapshot; cancelled scans are never returned
    pub fn load_latest(&self, organization: &str) -> StoreResult<Option<ScanSnapshot>> {
        SnapshotStore::new(self.db.connection()).latest_completed(organization)
    }

    /// Snapshot summaries, newest first
    pub fn list(
        &self,
        organization: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<SnapshotSummary>> {
        SnapshotStore::new(self.db.connection()).list(organization, limit)
    }

    #[must_use]
    pub fn diff(&self, old: &ScanSnapshot, new: &ScanSnapshot) -> HistoryRecord {
        diff::diff(old, new)
    }

    pub fn record(&self, record: &HistoryRecord) -> StoreResult<()> {
        RecordStore::new(self.db.connection()).insert(record)
    }

    /// History records of `organization`, newest first
    pub fn history(&self, organization: &str, limit: usize) -> StoreResult<Vec<HistoryRecord>> {
        RecordStore::new(self.db.connection()).list(organization, limit)
    }

    pub fn record_for(&self, snapshot_id: Uuid) -> StoreResult<Option<HistoryRecord>> {
        RecordStore::new(self.db.connection()).for_snapshot(snapshot_id)
    }

    /// Save `snapshot`, diff it against the previous completed snapshot of
    /// its organization, and record the diff. All or nothing.
    pub fn save_and_diff(
        &self,
        snapshot: &ScanSnapshot,
    ) -> StoreResult<(SnapshotSummary, HistoryRecord)> {
        let tx = self.db.connection().unchecked_transaction()?;

        let previous = SnapshotStore::new(&tx).latest_completed(&snapshot.organization)?;
        let handle = SnapshotStore::new(&tx).insert(snapshot)?;
        let record = previous
            .as_ref()
            .map_or_else(|| diff::initial(snapshot), |prev| diff::diff(prev, snapshot));
        RecordStore::new(&tx).insert(&record)?;

        tx.commit()?;
        info!(
            snapshot = %handle.id,
            previous = ?record.previous_snapshot_id,
            added = record.diff.added.len(),
            removed = record.diff.removed.len(),
            changed = record.diff.changed.len(),
            indeterminate = record.diff.indeterminate.len(),
            "recorded history"
        );
        Ok((handle, record))
    }
}
