//! Diff computation between snapshots

use crate::diff::{AttributeChange, HistoryRecord, ResourceChange, SnapshotDiff};
use catscan_api::Resource;
use catscan_scanner::{ScanSnapshot, WorkspaceScan};
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};
use uuid::Uuid;

/// Names reported for the typed resource fields, matching their wire keys.
/// Decoding lifts these keys out of the attribute map.
const TYPE_FIELD: &str = "provider-type";
const PROVIDER_FIELD: &str = "provider";
const MODULE_FIELD: &str = "module";

/// Diff `new` against `old`
///
/// Workspaces that failed or were cancelled on either side are reported as
/// indeterminate and contribute nothing to added, removed or changed.
#[must_use]
pub fn diff(old: &ScanSnapshot, new: &ScanSnapshot) -> HistoryRecord {
    if old.organization != new.organization {
        warn!(
            old = %old.organization,
            new = %new.organization,
            "diffing snapshots of different organizations"
        );
    }
    record(Some(old), new)
}

/// Record for the first snapshot of an organization: every resource is added
#[must_use]
pub fn initial(new: &ScanSnapshot) -> HistoryRecord {
    record(None, new)
}

fn record(old: Option<&ScanSnapshot>, new: &ScanSnapshot) -> HistoryRecord {
    HistoryRecord {
        id: Uuid::new_v4(),
        organization: new.organization.clone(),
        snapshot_id: new.id,
        previous_snapshot_id: old.map(|s| s.id),
        created_at: Utc::now(),
        diff: compute(old, new),
    }
}

fn compute(old: Option<&ScanSnapshot>, new: &ScanSnapshot) -> SnapshotDiff {
    let empty: BTreeMap<String, WorkspaceScan> = BTreeMap::new();
    let old_workspaces = old.map_or(&empty, |s| &s.workspaces);

    let ids: BTreeSet<&String> = old_workspaces.keys().chain(new.workspaces.keys()).collect();
    let mut diff = SnapshotDiff::default();

    for id in ids {
        let before = old_workspaces.get(id);
        let after = new.workspaces.get(id);

        if before.is_some_and(|ws| !ws.is_succeeded()) || after.is_some_and(|ws| !ws.is_succeeded())
        {
            debug!(workspace = %id, "workspace diff is indeterminate");
            diff.indeterminate.insert(id.clone());
            continue;
        }

        match (before, after) {
            (Some(before), Some(after)) => diff_workspace(before, after, &mut diff),
            (None, Some(after)) => diff.added.extend(after.resources.iter().map(Resource::id)),
            (Some(before), None) => diff.removed.extend(before.resources.iter().map(Resource::id)),
            (None, None) => {}
        }
    }

    diff.changed.sort_by(|a, b| a.id.cmp(&b.id));
    diff
}

fn diff_workspace(before: &WorkspaceScan, after: &WorkspaceScan, diff: &mut SnapshotDiff) {
    if before.fingerprint.is_some() && before.fingerprint == after.fingerprint {
        return;
    }

    let old: BTreeMap<&str, &Resource> = before
        .resources
        .iter()
        .map(|r| (r.address.as_str(), r))
        .collect();
    let new: BTreeMap<&str, &Resource> = after
        .resources
        .iter()
        .map(|r| (r.address.as_str(), r))
        .collect();

    for (address, resource) in &new {
        match old.get(address) {
            None => {
                diff.added.insert(resource.id());
            }
            Some(previous) => {
                let fields = field_changes(previous, resource);
                if !fields.is_empty() {
                    diff.changed.push(ResourceChange {
                        id: resource.id(),
                        fields,
                    });
                }
            }
        }
    }
    for (address, resource) in &old {
        if !new.contains_key(address) {
            diff.removed.insert(resource.id());
        }
    }
}

/// Typed fields first, then attributes sorted by name
///
/// The two are compared separately, so an attribute sharing a typed field's
/// name is reported as its own change.
fn field_changes(old: &Resource, new: &Resource) -> Vec<AttributeChange> {
    let typed = typed_fields(old)
        .into_iter()
        .zip(typed_fields(new))
        .map(|((field, before), (_, after))| (field.to_string(), Some(before), Some(after)));

    let names: BTreeSet<&String> = old.attributes.keys().chain(new.attributes.keys()).collect();
    let attributes = names.into_iter().map(|name| {
        (
            name.clone(),
            old.attributes.get(name).cloned(),
            new.attributes.get(name).cloned(),
        )
    });

    typed
        .chain(attributes)
        .filter(|(_, before, after)| before != after)
        .map(|(field, old, new)| AttributeChange { field, old, new })
        .collect()
}

fn typed_fields(resource: &Resource) -> [(&'static str, Value); 3] {
    [
        (TYPE_FIELD, Value::String(resource.resource_type.clone())),
        (PROVIDER_FIELD, Value::String(resource.provider.clone())),
        (
            MODULE_FIELD,
            resource
                .module_path
                .clone()
                .map_or(Value::Null, Value::String),
        ),
    ]
}
