//! `catscan scan`

use anyhow::{bail, Context as _, Result};
use catscan_api::{ApiClient, CancellationToken};
use catscan_core::{HistoryRecord, SnapshotSummary};
use catscan_scanner::{ScanError, ScanEvent, ScanProgress, ScanSnapshot, Scanner};
use clap::Args;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{print_json, Context};

/// Arguments for `catscan scan`
#[derive(Args)]
pub struct ScanArgs {
    /// Organization to scan (defaults to the configured one)
    #[arg(long)]
    pub org: Option<String>,

    /// Workspaces walked at once
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Walk every workspace even if its state is unchanged
    #[arg(long)]
    pub full: bool,

    /// Do not write the result to the history database
    #[arg(long)]
    pub no_save: bool,
}

#[derive(Serialize)]
struct ScanReport<'a> {
    saved: Option<SnapshotSummary>,
    history: Option<HistoryRecord>,
    snapshot: &'a ScanSnapshot,
}

pub async fn execute(args: ScanArgs, ctx: &Context) -> Result<()> {
    let Some(organization) = ctx.organization(args.org) else {
        bail!("no organization given; pass --org or set CATSCAN_ORG");
    };
    let config = &ctx.config;

    let limiter = Arc::new(config.rate_limiter()?);
    let client = Arc::new(ApiClient::new(
        config.client_config(),
        ctx.token_source(),
        limiter,
    )?);

    let store = if args.no_save && args.full {
        None
    } else {
        Some(ctx.open_store()?)
    };
    let previous = match (&store, args.full) {
        (Some(store), false) => store.load_latest(&organization)?,
        _ => None,
    };
    if let Some(previous) = &previous {
        debug!(snapshot = %previous.id, "using previous snapshot as baseline");
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling scan");
            interrupt.cancel();
        }
    });

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let progress = tokio::spawn(async move {
        let mut progress = ScanProgress::new();
        while let Some(event) = events_rx.recv().await {
            progress.apply(&event);
            if let ScanEvent::WorkspaceFinished { workspace_id, .. } = &event {
                debug!(
                    workspace = %workspace_id,
                    finished = progress.finished,
                    total = progress.total,
                    "workspace done"
                );
            }
        }
        progress
    });

    let scanner = Scanner::new(client)
        .with_concurrency(args.concurrency.unwrap_or(config.concurrency))
        .with_incremental(!args.full)
        .with_events(events_tx);
    let result = scanner
        .scan(&organization, previous.as_ref(), &cancel)
        .await;
    drop(scanner);

    if let Ok(progress) = progress.await {
        info!(
            workspaces = progress.finished,
            reused = progress.reused,
            failed = progress.failed,
            elapsed_ms = u64::try_from(progress.elapsed().as_millis()).unwrap_or(u64::MAX),
            "scan complete"
        );
    }

    let snapshot = match result {
        Ok(snapshot) => snapshot,
        Err(ScanError::NothingSucceeded { snapshot, .. }) => {
            print_json(&ScanReport {
                saved: None,
                history: None,
                snapshot: &snapshot,
            })?;
            bail!(
                "no workspace of {organization} could be scanned ({} failed, {} cancelled)",
                snapshot.summary().failed,
                snapshot.summary().cancelled
            );
        }
        Err(e) => return Err(e).context(format!("scan of {organization} failed")),
    };

    let (saved, history) = match (&store, args.no_save) {
        (Some(store), false) => {
            let (saved, record) = store.save_and_diff(&snapshot)?;
            (Some(saved), Some(record))
        }
        _ => (None, None),
    };

    print_json(&ScanReport {
        saved,
        history,
        snapshot: &snapshot,
    })?;

    if !snapshot.is_complete() {
        bail!("scan of {organization} was cancelled; partial results printed");
    }
    Ok(())
}
