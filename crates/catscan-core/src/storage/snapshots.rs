//! Snapshot storage operations

use crate::storage::db::{StoreError, StoreResult};
use catscan_scanner::{ScanOutcome, ScanSnapshot};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Listing entry for a stored snapshot; also the handle returned by a save
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub id: Uuid,
    pub organization: String,
    pub outcome: ScanOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub workspaces: usize,
    pub resources: usize,
}

impl SnapshotSummary {
    #[must_use]
    pub fn of(snapshot: &ScanSnapshot) -> Self {
        let summary = snapshot.summary();
        Self {
            id: snapshot.id,
            organization: snapshot.organization.clone(),
            outcome: snapshot.outcome,
            started_at: snapshot.started_at,
            finished_at: snapshot.finished_at,
            workspaces: summary.workspaces,
            resources: summary.resources,
        }
    }
}

/// Snapshot storage operations
pub struct SnapshotStore<'a> {
    conn: &'a Connection,
}

impl<'a> SnapshotStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a snapshot. A snapshot ID can be written once only.
    pub fn insert(&self, snapshot: &ScanSnapshot) -> StoreResult<SnapshotSummary> {
        let summary = SnapshotSummary::of(snapshot);
        let json = serde_json::to_string(snapshot)
            .map_err(|e| StoreError::Serialization(format!("Failed to serialize snapshot: {e}")))?;

        let result = self.conn.execute(
            r"
            INSERT INTO snapshots (id, organization, outcome, started_at, finished_at, workspaces, resources, data)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
            params![
                snapshot.id.to_string(),
                snapshot.organization,
                outcome_str(snapshot.outcome),
                timestamp(snapshot.started_at),
                timestamp(snapshot.finished_at),
                to_i64(summary.workspaces),
                to_i64(summary.resources),
                json,
            ],
        );

        match result {
            Ok(_) => Ok(summary),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::AlreadyExists(snapshot.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Get a snapshot by ID
    pub fn get(&self, id: Uuid) -> StoreResult<Option<ScanSnapshot>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT data FROM snapshots WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        json.map(|json| parse_snapshot(&id.to_string(), &json))
            .transpose()
    }

    /// Most recent completed snapshot of `organization`
    pub fn latest_completed(&self, organization: &str) -> StoreResult<Option<ScanSnapshot>> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                r"
                SELECT id, data FROM snapshots
                WHERE organization = ?1 AND outcome = ?2
                ORDER BY finished_at DESC, rowid DESC
                LIMIT 1
                ",
                params![organization, outcome_str(ScanOutcome::Completed)],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        row.map(|(id, json)| parse_snapshot(&id, &json)).transpose()
    }

    /// Summaries, newest first, optionally for one organization
    pub fn list(&self, organization: Option<&str>, limit: usize) -> StoreResult<Vec<SnapshotSummary>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT id, organization, outcome, started_at, finished_at, workspaces, resources
            FROM snapshots
            WHERE ?1 IS NULL OR organization = ?1
            ORDER BY finished_at DESC, rowid DESC
            LIMIT ?2
            ",
        )?;

        let rows = stmt.query_map(params![organization, to_i64(limit)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            let (id_str, organization, outcome, started_at, finished_at, workspaces, resources) =
                row?;
            let corrupt = |reason: String| StoreError::Corrupt {
                id: id_str.clone(),
                reason,
            };

            summaries.push(SnapshotSummary {
                id: Uuid::parse_str(&id_str).map_err(|e| corrupt(format!("invalid UUID: {e}")))?,
                organization,
                outcome: parse_outcome(&outcome)
                    .ok_or_else(|| corrupt(format!("unknown outcome {outcome}")))?,
                started_at: parse_timestamp(&started_at).map_err(&corrupt)?,
                finished_at: parse_timestamp(&finished_at).map_err(&corrupt)?,
                workspaces: usize::try_from(workspaces).unwrap_or_default(),
                resources: usize::try_from(resources).unwrap_or_default(),
            });
        }

        Ok(summaries)
    }
}

fn parse_snapshot(id: &str, json: &str) -> StoreResult<ScanSnapshot> {
    serde_json::from_str(json).map_err(|e| StoreError::Corrupt {
        id: id.to_string(),
        reason: format!("failed to parse snapshot: {e}"),
    })
}

fn outcome_str(outcome: ScanOutcome) -> &'static str {
    match outcome {
        ScanOutcome::Completed => "completed",
        ScanOutcome::Cancelled => "cancelled",
    }
}

fn parse_outcome(value: &str) -> Option<ScanOutcome> {
    match value {
        "completed" => Some(ScanOutcome::Completed),
        "cancelled" => Some(ScanOutcome::Cancelled),
        _ => None,
    }
}

/// Fixed-width UTC timestamp, so text order matches time order
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid datetime {value}: {e}"))
}

pub(crate) fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
