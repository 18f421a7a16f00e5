//! History store tests
//!
//! Append-only persistence of snapshots and the diffs recorded between them.

use catscan_api::{Attributes, Resource, ResourceId, Workspace};
use catscan_core::storage::{HistoryStore, StoreError};
use catscan_scanner::{ScanOutcome, ScanSnapshot, WorkspaceScan};
use chrono::{Duration, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use tempfile::TempDir;
use uuid::Uuid;

// ============================================================================
// Fixtures
// ============================================================================

fn workspace(id: &str, org: &str) -> Workspace {
    Workspace {
        id: id.to_string(),
        name: format!("{id}-name"),
        organization: org.to_string(),
        last_state_version_id: None,
    }
}

fn resource(ws: &str, address: &str, size: &str) -> Resource {
    let mut attributes = Attributes::new();
    attributes.insert("size".to_string(), json!(size));
    Resource {
        workspace_id: ws.to_string(),
        address: address.to_string(),
        resource_type: "aws_instance".to_string(),
        provider: "hashicorp/aws".to_string(),
        module_path: None,
        attributes,
    }
}

fn snapshot(org: &str, minutes_ago: i64, entries: Vec<WorkspaceScan>) -> ScanSnapshot {
    let finished_at = Utc::now() - Duration::minutes(minutes_ago);
    ScanSnapshot {
        id: Uuid::new_v4(),
        organization: org.to_string(),
        started_at: finished_at - Duration::seconds(30),
        finished_at,
        outcome: ScanOutcome::Completed,
        workspaces: entries
            .into_iter()
            .map(|e| (e.workspace.id.clone(), e))
            .collect::<BTreeMap<_, _>>(),
    }
}

fn ok(org: &str, id: &str, resources: Vec<Resource>) -> WorkspaceScan {
    WorkspaceScan::succeeded(workspace(id, org), None, resources, false)
        .expect("valid resources")
}

fn simple(org: &str, minutes_ago: i64) -> ScanSnapshot {
    snapshot(
        org,
        minutes_ago,
        vec![ok(org, "ws-1", vec![resource("ws-1", "aws_instance.a", "small")])],
    )
}

// ============================================================================
// Snapshots
// ============================================================================

#[test]
fn test_save_and_load_round_trip() {
    let store = HistoryStore::in_memory().expect("store");
    let snap = simple("acme", 0);

    let handle = store.save(&snap).expect("save");
    assert_eq!(handle.id, snap.id);
    assert_eq!(handle.resources, 1);

    let loaded = store.load(snap.id).expect("load").expect("present");
    assert_eq!(loaded, snap);
    assert!(store.load(Uuid::new_v4()).expect("load").is_none());
}

#[test]
fn test_snapshot_is_written_once() {
    let store = HistoryStore::in_memory().expect("store");
    let snap = simple("acme", 0);
    store.save(&snap).expect("first save");

    let err = store.save(&snap).unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists(id) if id == snap.id));
}

#[test]
fn test_updates_and_deletes_are_rejected() {
    let store = HistoryStore::in_memory().expect("store");
    let snap = simple("acme", 0);
    store.save_and_diff(&snap).expect("save");
    let conn = store.database().connection();

    assert!(conn
        .execute("UPDATE snapshots SET organization = 'other'", [])
        .is_err());
    assert!(conn.execute("DELETE FROM snapshots", []).is_err());
    assert!(conn.execute("DELETE FROM history_records", []).is_err());
    assert_eq!(store.load(snap.id).expect("load").expect("present"), snap);
}

#[test]
fn test_load_latest_skips_cancelled() {
    let store = HistoryStore::in_memory().expect("store");
    let older = simple("acme", 10);
    let mut cancelled = simple("acme", 1);
    cancelled.outcome = ScanOutcome::Cancelled;
    store.save(&older).expect("save");
    store.save(&cancelled).expect("save");

    let latest = store.load_latest("acme").expect("query").expect("present");
    assert_eq!(latest.id, older.id);
}

#[test]
fn test_load_latest_orders_by_finish_time() {
    let store = HistoryStore::in_memory().expect("store");
    let newest = simple("acme", 1);
    let oldest = simple("acme", 60);
    let other_org = simple("globex", 0);
    store.save(&newest).expect("save");
    store.save(&oldest).expect("save");
    store.save(&other_org).expect("save");

    assert_eq!(
        store.load_latest("acme").expect("query").map(|s| s.id),
        Some(newest.id)
    );
    assert!(store.load_latest("initech").expect("query").is_none());
}

#[test]
fn test_list_newest_first() {
    let store = HistoryStore::in_memory().expect("store");
    let ids: Vec<Uuid> = [30, 20, 10]
        .into_iter()
        .map(|m| {
            let snap = simple("acme", m);
            store.save(&snap).expect("save");
            snap.id
        })
        .collect();
    store.save(&simple("globex", 0)).expect("save");

    let listed = store.list(Some("acme"), 10).expect("list");
    let listed_ids: Vec<Uuid> = listed.iter().map(|s| s.id).collect();
    assert_eq!(listed_ids, [ids[2], ids[1], ids[0]]);

    assert_eq!(store.list(Some("acme"), 2).expect("list").len(), 2);
    assert_eq!(store.list(None, 10).expect("list").len(), 4);
}

#[test]
fn test_persists_across_reopen() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("nested").join("history.db");
    let snap = simple("acme", 0);

    {
        let store = HistoryStore::open(&path).expect("open");
        store.save_and_diff(&snap).expect("save");
    }

    let store = HistoryStore::open(&path).expect("reopen");
    assert_eq!(store.load_latest("acme").expect("query"), Some(snap.clone()));
    assert_eq!(store.history("acme", 10).expect("history").len(), 1);
}

// ============================================================================
// History records
// ============================================================================

#[test]
fn test_first_save_records_everything_added() {
    let store = HistoryStore::in_memory().expect("store");
    let snap = simple("acme", 0);

    let (_, record) = store.save_and_diff(&snap).expect("save");
    assert!(record.previous_snapshot_id.is_none());
    assert_eq!(record.diff.added.len(), 1);
}

#[test]
fn test_save_and_diff_against_previous() {
    let store = HistoryStore::in_memory().expect("store");
    let first = snapshot(
        "acme",
        10,
        vec![ok(
            "acme",
            "ws-1",
            vec![
                resource("ws-1", "aws_instance.a", "small"),
                resource("ws-1", "aws_instance.b", "small"),
            ],
        )],
    );
    let second = snapshot(
        "acme",
        0,
        vec![ok(
            "acme",
            "ws-1",
            vec![
                resource("ws-1", "aws_instance.a", "large"),
                resource("ws-1", "aws_instance.c", "small"),
            ],
        )],
    );

    store.save_and_diff(&first).expect("first");
    let (handle, record) = store.save_and_diff(&second).expect("second");

    assert_eq!(handle.id, second.id);
    assert_eq!(record.previous_snapshot_id, Some(first.id));
    let id = |address: &str| ResourceId {
        workspace_id: "ws-1".to_string(),
        address: address.to_string(),
    };
    assert!(record.diff.added.contains(&id("aws_instance.c")));
    assert!(record.diff.removed.contains(&id("aws_instance.b")));
    assert_eq!(record.diff.changed.len(), 1);
    assert_eq!(record.diff.changed[0].fields[0].new, Some(json!("large")));

    let history = store.history("acme", 10).expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0], record);
    assert_eq!(store.record_for(second.id).expect("query"), Some(record));
}

#[test]
fn test_failed_workspace_is_not_reported_removed() {
    let store = HistoryStore::in_memory().expect("store");
    let first = snapshot(
        "acme",
        10,
        vec![
            ok("acme", "ws-1", vec![resource("ws-1", "a", "small")]),
            ok("acme", "ws-2", vec![resource("ws-2", "b", "small")]),
        ],
    );
    let second = snapshot(
        "acme",
        0,
        vec![
            ok("acme", "ws-1", vec![resource("ws-1", "a", "small")]),
            WorkspaceScan::internal_failure(workspace("ws-2", "acme"), "timed out"),
        ],
    );

    store.save_and_diff(&first).expect("first");
    let (_, record) = store.save_and_diff(&second).expect("second");

    assert!(record.diff.removed.is_empty());
    assert!(record.diff.indeterminate.contains("ws-2"));
    assert!(!record.diff.has_changes());
}

#[test]
fn test_cancelled_snapshot_is_not_a_baseline() {
    let store = HistoryStore::in_memory().expect("store");
    let first = simple("acme", 20);
    let mut cancelled = simple("acme", 10);
    cancelled.outcome = ScanOutcome::Cancelled;
    let third = simple("acme", 0);

    store.save_and_diff(&first).expect("first");
    store.save_and_diff(&cancelled).expect("cancelled");
    let (_, record) = store.save_and_diff(&third).expect("third");

    assert_eq!(record.previous_snapshot_id, Some(first.id));
}
