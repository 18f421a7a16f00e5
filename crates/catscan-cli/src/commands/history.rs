//! `catscan history` and `catscan show`

use anyhow::{anyhow, Result};
use serde_json::json;
use uuid::Uuid;

use crate::{print_json, Context};

pub fn list(org: Option<String>, limit: usize, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let organization = ctx.organization(org);

    let snapshots = store.list(organization.as_deref(), limit)?;
    let records = match &organization {
        Some(org) => store.history(org, limit)?,
        None => Vec::new(),
    };

    print_json(&json!({
        "organization": organization,
        "snapshots": snapshots,
        "records": records,
    }))
}

pub fn show(snapshot_id: Uuid, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let snapshot = store
        .load(snapshot_id)?
        .ok_or_else(|| anyhow!("snapshot {snapshot_id} not found"))?;
    let record = store.record_for(snapshot_id)?;

    print_json(&json!({
        "summary": snapshot.summary(),
        "history": record,
        "snapshot": snapshot,
    }))
}
