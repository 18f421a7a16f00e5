//! Scan progress reporting

use crate::snapshot::WorkspaceStatus;
use std::time::{Duration, Instant};

/// Event emitted while a scan runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// Workspace list fetched
    Listed {
        organization: String,
        workspaces: usize,
    },
    /// A worker picked up a workspace
    WorkspaceStarted { workspace_id: String, name: String },
    /// Serial unchanged; previous resources carried over
    WorkspaceReused { workspace_id: String, serial: u64 },
    /// A workspace reached its final status
    WorkspaceFinished {
        workspace_id: String,
        status: WorkspaceStatus,
        resources: usize,
    },
}

/// Running totals folded from [`ScanEvent`]s
#[derive(Debug, Clone)]
pub struct ScanProgress {
    /// Workspaces in the organization, once listed
    pub total: usize,
    pub finished: usize,
    pub reused: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub resources: usize,
    started: Instant,
}

impl ScanProgress {
    #[must_use]
    pub fn new() -> Self {
        Self {
            total: 0,
            finished: 0,
            reused: 0,
            failed: 0,
            cancelled: 0,
            resources: 0,
            started: Instant::now(),
        }
    }

    pub fn apply(&mut self, event: &ScanEvent) {
        match event {
            ScanEvent::Listed { workspaces, .. } => self.total = *workspaces,
            ScanEvent::WorkspaceStarted { .. } => {}
            ScanEvent::WorkspaceReused { .. } => self.reused += 1,
            ScanEvent::WorkspaceFinished {
                status, resources, ..
            } => {
                self.finished += 1;
                self.resources += resources;
                match status {
                    WorkspaceStatus::Succeeded => {}
                    WorkspaceStatus::Failed { .. } => self.failed += 1,
                    WorkspaceStatus::Cancelled => self.cancelled += 1,
                }
            }
        }
    }

    /// Workspaces not yet finished
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.finished)
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Finished workspaces per second
    #[must_use]
    pub fn workspaces_per_second(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.finished as f64 / secs
        } else {
            0.0
        }
    }
}

impl Default for ScanProgress {
    fn default() -> Self {
        Self::new()
    }
}
