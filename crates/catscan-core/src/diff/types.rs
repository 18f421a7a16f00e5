//! Snapshot diff types

use catscan_api::ResourceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Changes between two snapshots of one organization
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDiff {
    /// In the new snapshot only
    pub added: BTreeSet<ResourceId>,
    /// In the old snapshot only
    pub removed: BTreeSet<ResourceId>,
    /// In both, with differing fields; sorted by resource
    pub changed: Vec<ResourceChange>,
    /// Workspaces whose diff was suppressed because a side failed or was cancelled
    pub indeterminate: BTreeSet<String>,
}

impl SnapshotDiff {
    /// No resource-level change and nothing indeterminate
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.changed.is_empty()
            && self.indeterminate.is_empty()
    }

    #[must_use]
    pub fn has_changes(&self) -> bool {
        !(self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty())
    }
}

/// A resource present on both sides whose fields differ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceChange {
    pub id: ResourceId,
    /// Sorted by field name
    pub fields: Vec<AttributeChange>,
}

/// One differing field. `None` means the field is absent on that side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    pub field: String,
    pub old: Option<Value>,
    pub new: Option<Value>,
}

/// A persisted diff between a snapshot and its predecessor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: Uuid,
    pub organization: String,
    /// The newer snapshot
    pub snapshot_id: Uuid,
    /// The baseline; `None` for the first snapshot of an organization
    pub previous_snapshot_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub diff: SnapshotDiff,
}
