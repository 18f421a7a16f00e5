//! Scan snapshot types

use catscan_api::{ApiError, ErrorKind, Resource, ResourceId, StateVersion, Workspace};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Why a workspace could not be scanned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network failure that outlived every retry
    TransientNetwork,
    /// Response did not decode
    MalformedResponse,
    /// Non-retryable client error
    Client,
    /// The worker died before reporting
    Internal,
}

impl From<ErrorKind> for FailureKind {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::TransientNetwork => Self::TransientNetwork,
            ErrorKind::MalformedResponse => Self::MalformedResponse,
            ErrorKind::Client => Self::Client,
            ErrorKind::Unauthenticated | ErrorKind::Cancelled | ErrorKind::Config => {
                Self::Internal
            }
        }
    }
}

/// Outcome of scanning one workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkspaceStatus {
    Succeeded,
    Failed { kind: FailureKind, message: String },
    Cancelled,
}

/// Per-workspace entry of a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceScan {
    pub workspace: Workspace,
    /// State version observed during this scan, if any
    pub state_version: Option<StateVersion>,
    #[serde(flatten)]
    pub status: WorkspaceStatus,
    /// Sorted by address; empty unless `Succeeded`
    pub resources: Vec<Resource>,
    /// Resources were carried over from the previous snapshot
    #[serde(default)]
    pub reused: bool,
    /// SHA-256 over the canonical resource list; `None` unless `Succeeded`
    #[serde(default)]
    pub fingerprint: Option<String>,
}

impl WorkspaceScan {
    /// A complete resource list. Sorts by address and fingerprints it.
    ///
    /// # Errors
    /// Returns `MalformedResponse` if two resources share an address
    pub fn succeeded(
        workspace: Workspace,
        state_version: Option<StateVersion>,
        mut resources: Vec<Resource>,
        reused: bool,
    ) -> Result<Self, ApiError> {
        resources.sort_by(|a, b| a.address.cmp(&b.address));
        if let Some(pair) = resources.windows(2).find(|w| w[0].address == w[1].address) {
            return Err(ApiError::malformed(
                format!("/workspaces/{}/resources", workspace.id),
                format!("duplicate resource address {}", pair[0].address),
            ));
        }

        let fingerprint = fingerprint(&resources);
        Ok(Self {
            workspace,
            state_version,
            status: WorkspaceStatus::Succeeded,
            resources,
            reused,
            fingerprint: Some(fingerprint),
        })
    }

    #[must_use]
    pub fn failed(workspace: Workspace, state_version: Option<StateVersion>, error: &ApiError) -> Self {
        Self::without_resources(
            workspace,
            state_version,
            WorkspaceStatus::Failed {
                kind: error.kind().into(),
                message: error.to_string(),
            },
        )
    }

    #[must_use]
    pub fn internal_failure(workspace: Workspace, message: impl Into<String>) -> Self {
        Self::without_resources(
            workspace,
            None,
            WorkspaceStatus::Failed {
                kind: FailureKind::Internal,
                message: message.into(),
            },
        )
    }

    #[must_use]
    pub fn cancelled(workspace: Workspace, state_version: Option<StateVersion>) -> Self {
        Self::without_resources(workspace, state_version, WorkspaceStatus::Cancelled)
    }

    fn without_resources(
        workspace: Workspace,
        state_version: Option<StateVersion>,
        status: WorkspaceStatus,
    ) -> Self {
        Self {
            workspace,
            state_version,
            status,
            resources: Vec::new(),
            reused: false,
            fingerprint: None,
        }
    }

    #[must_use]
    pub fn is_succeeded(&self) -> bool {
        matches!(self.status, WorkspaceStatus::Succeeded)
    }

    /// Serial of the observed state version
    #[must_use]
    pub fn serial(&self) -> Option<u64> {
        self.state_version.as_ref().map(|sv| sv.serial)
    }
}

/// Hex SHA-256 of the JSON encoding of `resources`
///
/// Attribute maps are key-sorted, so equal resource lists always hash equal.
#[must_use]
pub fn fingerprint(resources: &[Resource]) -> String {
    let mut hasher = Sha256::new();
    for resource in resources {
        // Serializing owned strings and BTreeMaps cannot fail
        if let Ok(bytes) = serde_json::to_vec(resource) {
            hasher.update(&bytes);
        }
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// How the scan as a whole ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOutcome {
    Completed,
    Cancelled,
}

/// Full result of one scan of an organization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSnapshot {
    pub id: Uuid,
    pub organization: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: ScanOutcome,
    /// Keyed by workspace ID
    pub workspaces: BTreeMap<String, WorkspaceScan>,
}

/// Counts over a snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub workspaces: usize,
    pub succeeded: usize,
    pub reused: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub resources: usize,
}

impl ScanSnapshot {
    #[must_use]
    pub fn workspace(&self, id: &str) -> Option<&WorkspaceScan> {
        self.workspaces.get(id)
    }

    /// Every resource in the snapshot, ordered by workspace then address
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.workspaces.values().flat_map(|ws| ws.resources.iter())
    }

    /// Resource identities of one successfully scanned workspace
    pub fn resource_ids(&self, workspace_id: &str) -> impl Iterator<Item = ResourceId> + '_ {
        self.workspaces
            .get(workspace_id)
            .into_iter()
            .flat_map(|ws| ws.resources.iter().map(Resource::id))
    }

    #[must_use]
    pub fn summary(&self) -> ScanSummary {
        let mut summary = ScanSummary {
            workspaces: self.workspaces.len(),
            ..ScanSummary::default()
        };
        for ws in self.workspaces.values() {
            match ws.status {
                WorkspaceStatus::Succeeded => {
                    summary.succeeded += 1;
                    summary.resources += ws.resources.len();
                    if ws.reused {
                        summary.reused += 1;
                    }
                }
                WorkspaceStatus::Failed { .. } => summary.failed += 1,
                WorkspaceStatus::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }

    /// Whether this snapshot may serve as a baseline for later scans
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.outcome == ScanOutcome::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catscan_api::Attributes;

    fn ws(id: &str) -> Workspace {
        Workspace {
            id: id.into(),
            name: id.into(),
            organization: "acme".into(),
            last_state_version_id: None,
        }
    }

    fn res(ws: &str, address: &str) -> Resource {
        Resource {
            workspace_id: ws.into(),
            address: address.into(),
            resource_type: "null_resource".into(),
            provider: "hashicorp/null".into(),
            module_path: None,
            attributes: Attributes::new(),
        }
    }

    #[test]
    fn test_succeeded_sorts_by_address() {
        let scan = WorkspaceScan::succeeded(
            ws("ws-1"),
            None,
            vec![res("ws-1", "b"), res("ws-1", "a"), res("ws-1", "c")],
            false,
        )
        .unwrap();
        let addresses: Vec<_> = scan.resources.iter().map(|r| r.address.as_str()).collect();
        assert_eq!(addresses, ["a", "b", "c"]);
        assert!(scan.fingerprint.is_some());
    }

    #[test]
    fn test_duplicate_address_is_malformed() {
        let err = WorkspaceScan::succeeded(
            ws("ws-1"),
            None,
            vec![res("ws-1", "a"), res("ws-1", "a")],
            false,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    }

    #[test]
    fn test_fingerprint_ignores_input_order() {
        let a = WorkspaceScan::succeeded(ws("ws-1"), None, vec![res("ws-1", "x"), res("ws-1", "y")], false)
            .unwrap();
        let b = WorkspaceScan::succeeded(ws("ws-1"), None, vec![res("ws-1", "y"), res("ws-1", "x")], false)
            .unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn test_status_is_flattened_into_entry() {
        let scan = WorkspaceScan::cancelled(ws("ws-1"), None);
        let json = serde_json::to_value(&scan).unwrap();
        assert_eq!(json["status"], "cancelled");

        let failed = WorkspaceScan::failed(ws("ws-2"), None, &ApiError::malformed("/p", "bad"));
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["kind"], "malformed_response");
        let back: WorkspaceScan = serde_json::from_value(json).unwrap();
        assert_eq!(back, failed);
    }

    #[test]
    fn test_summary_counts() {
        let mut workspaces = BTreeMap::new();
        workspaces.insert(
            "ws-1".into(),
            WorkspaceScan::succeeded(ws("ws-1"), None, vec![res("ws-1", "a")], true).unwrap(),
        );
        workspaces.insert("ws-2".into(), WorkspaceScan::cancelled(ws("ws-2"), None));
        workspaces.insert(
            "ws-3".into(),
            WorkspaceScan::internal_failure(ws("ws-3"), "boom"),
        );
        let snapshot = ScanSnapshot {
            id: Uuid::new_v4(),
            organization: "acme".into(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            outcome: ScanOutcome::Completed,
            workspaces,
        };
        let summary = snapshot.summary();
        assert_eq!(summary.workspaces, 3);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.reused, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.cancelled, 1);
        assert_eq!(summary.resources, 1);
        assert_eq!(snapshot.resource_ids("ws-1").count(), 1);
    }
}
