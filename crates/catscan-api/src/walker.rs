//! Typed enumeration of workspaces, state versions and resources
//!
//! Pure orchestration over [`ApiClient::paginate`] and [`decode`]; retries
//! are entirely the client's business.

use crate::client::{ApiClient, ApiRequest};
use crate::decode;
use crate::error::{ApiError, ApiResult};
use crate::model::{Resource, StateVersion, Workspace};
use crate::pagination::PageCursor;
use async_stream::try_stream;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One decoded page of a workspace's resources
#[derive(Debug, Clone)]
pub struct ResourcePage {
    /// Cursor that fetched this page; `None` for the first page
    pub cursor: Option<PageCursor>,
    /// Cursor to resume after this page; `None` when this was the last
    pub next: Option<PageCursor>,
    pub resources: Vec<Resource>,
}

/// Walks one entity type at a time through a shared client
#[derive(Debug, Clone, Copy)]
pub struct ResourceWalker<'a> {
    client: &'a ApiClient,
}

impl<'a> ResourceWalker<'a> {
    #[must_use]
    pub fn new(client: &'a ApiClient) -> Self {
        Self { client }
    }

    /// Every workspace in `organization`, in server order
    pub fn workspaces(
        &self,
        organization: &str,
        cancel: CancellationToken,
    ) -> impl Stream<Item = ApiResult<Workspace>> + 'a {
        let client = self.client;
        let path = format!("/organizations/{organization}/workspaces");

        try_stream! {
            let pages = client.paginate(path.clone(), Vec::new(), None, cancel);
            futures::pin_mut!(pages);
            while let Some(page) = pages.next().await {
                let page = page?;
                for item in decode::list_items(&path, &page.body)? {
                    yield decode::workspace(&path, item)?;
                }
            }
        }
    }

    /// Collect the full workspace list
    ///
    /// # Errors
    /// Propagates the first error of the walk
    pub async fn list_workspaces(
        &self,
        organization: &str,
        cancel: CancellationToken,
    ) -> ApiResult<Vec<Workspace>> {
        let stream = self.workspaces(organization, cancel);
        futures::pin_mut!(stream);
        let mut workspaces = Vec::new();
        while let Some(workspace) = stream.next().await {
            workspaces.push(workspace?);
        }
        Ok(workspaces)
    }

    /// Current state version of `workspace`
    ///
    /// `Ok(None)` when the workspace has never stored state.
    ///
    /// # Errors
    /// Any client error other than a 404
    pub async fn current_state_version(
        &self,
        workspace: &Workspace,
        cancel: &CancellationToken,
    ) -> ApiResult<Option<StateVersion>> {
        let path = format!("/workspaces/{}/current-state-version", workspace.id);
        match self.client.request(&ApiRequest::get(path.clone()), cancel).await {
            Ok(response) => decode::state_version(&path, &workspace.id, &response.body).map(Some),
            Err(ApiError::Client { status: 404, .. }) => {
                debug!(workspace = %workspace.id, "workspace has no state yet");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Resources of `workspace`, one decoded page at a time
    ///
    /// Pages are yielded only once fully decoded, so a consumer that stops
    /// between pages never holds half a page. The endpoint always lists the
    /// workspace's current state and cannot be pinned to a version;
    /// `state_version` only labels the walk in logs.
    pub fn resource_pages(
        &self,
        workspace: &Workspace,
        state_version: Option<&StateVersion>,
        start: Option<PageCursor>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = ApiResult<ResourcePage>> + 'a {
        let client = self.client;
        let workspace_id = workspace.id.clone();
        let serial = state_version.map(|sv| sv.serial);
        let path = format!("/workspaces/{workspace_id}/resources");

        try_stream! {
            debug!(workspace = %workspace_id, serial = ?serial, "walking resources");
            let pages = client.paginate(path.clone(), Vec::new(), start, cancel);
            futures::pin_mut!(pages);
            while let Some(page) = pages.next().await {
                let page = page?;
                let resources = decode::list_items(&path, &page.body)?
                    .iter()
                    .map(|item| decode::resource(&path, &workspace_id, item))
                    .collect::<ApiResult<Vec<_>>>()?;
                yield ResourcePage {
                    cursor: page.cursor,
                    next: page.next,
                    resources,
                };
            }
        }
    }

    /// Resources of `workspace`, flattened
    pub fn resources(
        &self,
        workspace: &Workspace,
        state_version: Option<&StateVersion>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = ApiResult<Resource>> + 'a {
        let pages = self.resource_pages(workspace, state_version, None, cancel);
        try_stream! {
            futures::pin_mut!(pages);
            while let Some(page) = pages.next().await {
                for resource in page?.resources {
                    yield resource;
                }
            }
        }
    }
}
