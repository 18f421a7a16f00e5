//! Bounded-parallel scan of an organization

use crate::error::{ScanError, ScanResult};
use crate::progress::ScanEvent;
use crate::snapshot::{ScanOutcome, ScanSnapshot, WorkspaceScan};
use catscan_api::{ApiClient, ApiError, Resource, ResourceWalker, StateVersion, Workspace};
use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default number of workspaces walked at once
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Scans every workspace of an organization through a shared client
#[derive(Debug, Clone)]
pub struct Scanner {
    client: Arc<ApiClient>,
    concurrency: usize,
    incremental: bool,
    events: Option<UnboundedSender<ScanEvent>>,
}

impl Scanner {
    #[must_use]
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self {
            client,
            concurrency: DEFAULT_CONCURRENCY,
            incremental: true,
            events: None,
        }
    }

    /// Number of workers; zero is treated as one
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Reuse resources of workspaces whose serial is unchanged
    #[must_use]
    pub fn with_incremental(mut self, incremental: bool) -> Self {
        self.incremental = incremental;
        self
    }

    /// Send progress events to `events`
    #[must_use]
    pub fn with_events(mut self, events: UnboundedSender<ScanEvent>) -> Self {
        self.events = Some(events);
        self
    }

    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    #[must_use]
    pub fn client(&self) -> &Arc<ApiClient> {
        &self.client
    }

    /// Scan `organization`, optionally reusing `previous`
    ///
    /// Per-workspace failures are recorded in the snapshot. Only a missing or
    /// rejected credential, a failed workspace listing, or a scan in which no
    /// workspace succeeded fails the call. All workers are joined before this
    /// returns.
    pub async fn scan(
        &self,
        organization: &str,
        previous: Option<&ScanSnapshot>,
        cancel: &CancellationToken,
    ) -> ScanResult<ScanSnapshot> {
        if organization.trim().is_empty() {
            return Err(ScanError::Config("organization must not be empty".into()));
        }

        let started_at = Utc::now();
        self.client
            .require_token()
            .await
            .map_err(|e| ScanError::from_api(organization, e))?;

        let scope = cancel.child_token();
        info!(organization, concurrency = self.concurrency, "starting scan");

        let workspaces = ResourceWalker::new(&self.client)
            .list_workspaces(organization, scope.clone())
            .await
            .map_err(|e| ScanError::from_api(organization, e))?;
        info!(organization, workspaces = workspaces.len(), "listed workspaces");
        self.emit(ScanEvent::Listed {
            organization: organization.to_string(),
            workspaces: workspaces.len(),
        });

        let prior = if self.incremental {
            prior_resources(organization, previous)
        } else {
            HashMap::new()
        };

        let total = workspaces.len();
        let ctx = Arc::new(ScanContext {
            client: Arc::clone(&self.client),
            slots: (0..total).map(|_| OnceLock::new()).collect(),
            queue: Mutex::new((0..total).collect()),
            workspaces,
            prior,
            fatal: OnceLock::new(),
            scope: scope.clone(),
            events: self.events.clone(),
        });

        let mut workers = JoinSet::new();
        for worker in 0..self.concurrency.min(total) {
            let ctx = Arc::clone(&ctx);
            workers.spawn(async move { ctx.run_worker(worker).await });
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "scan worker exited abnormally");
            }
        }

        if let Some(err) = ctx.fatal.get() {
            warn!(organization, error = %err, "scan aborted");
            return Err(ScanError::from_api(organization, err.clone()));
        }

        let mut entries = BTreeMap::new();
        for (workspace, slot) in ctx.workspaces.iter().zip(&ctx.slots) {
            let entry = slot.get().cloned().unwrap_or_else(|| {
                if scope.is_cancelled() {
                    WorkspaceScan::cancelled(workspace.clone(), None)
                } else {
                    WorkspaceScan::internal_failure(
                        workspace.clone(),
                        "worker exited before reporting",
                    )
                }
            });
            if entries.insert(workspace.id.clone(), entry).is_some() {
                warn!(workspace = %workspace.id, "workspace listed twice");
            }
        }

        let outcome = if scope.is_cancelled() {
            ScanOutcome::Cancelled
        } else {
            ScanOutcome::Completed
        };
        let snapshot = ScanSnapshot {
            id: Uuid::new_v4(),
            organization: organization.to_string(),
            started_at,
            finished_at: Utc::now(),
            outcome,
            workspaces: entries,
        };

        let summary = snapshot.summary();
        info!(
            organization,
            outcome = ?snapshot.outcome,
            succeeded = summary.succeeded,
            reused = summary.reused,
            failed = summary.failed,
            cancelled = summary.cancelled,
            resources = summary.resources,
            "scan finished"
        );

        if summary.workspaces > 0 && summary.succeeded == 0 {
            return Err(ScanError::NothingSucceeded {
                failed: summary.failed,
                cancelled: summary.cancelled,
                snapshot: Box::new(snapshot),
            });
        }
        Ok(snapshot)
    }

    fn emit(&self, event: ScanEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

/// Serial and resources of each workspace that succeeded in `previous`
fn prior_resources(
    organization: &str,
    previous: Option<&ScanSnapshot>,
) -> HashMap<String, (u64, Vec<Resource>)> {
    let Some(previous) = previous else {
        return HashMap::new();
    };
    if previous.organization != organization {
        warn!(
            organization,
            previous = %previous.organization,
            "previous snapshot belongs to another organization, ignoring it"
        );
        return HashMap::new();
    }

    previous
        .workspaces
        .iter()
        .filter(|(_, scan)| scan.is_succeeded())
        .filter_map(|(id, scan)| {
            scan.serial()
                .map(|serial| (id.clone(), (serial, scan.resources.clone())))
        })
        .collect()
}

/// State shared by the workers of one scan
struct ScanContext {
    client: Arc<ApiClient>,
    workspaces: Vec<Workspace>,
    /// One slot per workspace; each is written by exactly one worker
    slots: Vec<OnceLock<WorkspaceScan>>,
    queue: Mutex<VecDeque<usize>>,
    prior: HashMap<String, (u64, Vec<Resource>)>,
    fatal: OnceLock<ApiError>,
    scope: CancellationToken,
    events: Option<UnboundedSender<ScanEvent>>,
}

impl ScanContext {
    async fn run_worker(&self, worker: usize) {
        loop {
            let next = self.queue.lock().pop_front();
            let Some(index) = next else {
                break;
            };
            let workspace = &self.workspaces[index];

            let scan = if self.scope.is_cancelled() {
                WorkspaceScan::cancelled(workspace.clone(), None)
            } else {
                debug!(worker, workspace = %workspace.id, "scanning workspace");
                self.emit(ScanEvent::WorkspaceStarted {
                    workspace_id: workspace.id.clone(),
                    name: workspace.name.clone(),
                });
                self.scan_workspace(workspace).await
            };

            self.emit(ScanEvent::WorkspaceFinished {
                workspace_id: workspace.id.clone(),
                status: scan.status.clone(),
                resources: scan.resources.len(),
            });
            if self.slots[index].set(scan).is_err() {
                warn!(workspace = %workspace.id, "workspace scanned twice");
            }
        }
        debug!(worker, "worker done");
    }

    async fn scan_workspace(&self, workspace: &Workspace) -> WorkspaceScan {
        let walker = ResourceWalker::new(&self.client);

        let state_version = match walker.current_state_version(workspace, &self.scope).await {
            Ok(Some(sv)) => sv,
            Ok(None) => return self.complete(workspace, None, Vec::new(), false),
            Err(e) => return self.settle(workspace, None, e),
        };

        if let Some((serial, resources)) = self.prior.get(&workspace.id) {
            if *serial == state_version.serial {
                debug!(workspace = %workspace.id, serial, "serial unchanged, reusing resources");
                self.emit(ScanEvent::WorkspaceReused {
                    workspace_id: workspace.id.clone(),
                    serial: *serial,
                });
                return self.complete(workspace, Some(state_version), resources.clone(), true);
            }
        }

        let mut resources = Vec::new();
        let pages =
            walker.resource_pages(workspace, Some(&state_version), None, self.scope.clone());
        futures::pin_mut!(pages);
        while let Some(page) = pages.next().await {
            match page {
                Ok(page) => resources.extend(page.resources),
                Err(e) => return self.settle(workspace, Some(state_version), e),
            }
        }

        self.complete(workspace, Some(state_version), resources, false)
    }

    fn complete(
        &self,
        workspace: &Workspace,
        state_version: Option<StateVersion>,
        resources: Vec<Resource>,
        reused: bool,
    ) -> WorkspaceScan {
        match WorkspaceScan::succeeded(workspace.clone(), state_version.clone(), resources, reused)
        {
            Ok(scan) => scan,
            Err(e) => self.settle(workspace, state_version, e),
        }
    }

    /// Turn an error into the workspace's final entry
    fn settle(
        &self,
        workspace: &Workspace,
        state_version: Option<StateVersion>,
        error: ApiError,
    ) -> WorkspaceScan {
        if matches!(error, ApiError::Cancelled) {
            debug!(workspace = %workspace.id, "workspace cancelled");
            return WorkspaceScan::cancelled(workspace.clone(), state_version);
        }

        if error.is_fatal() {
            warn!(workspace = %workspace.id, error = %error, "fatal error, cancelling scan");
            let scan = WorkspaceScan::failed(workspace.clone(), state_version, &error);
            let _ = self.fatal.set(error);
            self.scope.cancel();
            return scan;
        }

        warn!(workspace = %workspace.id, error = %error, "workspace scan failed");
        WorkspaceScan::failed(workspace.clone(), state_version, &error)
    }

    fn emit(&self, event: ScanEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}
