//! History record storage operations

use crate::diff::HistoryRecord;
use crate::storage::db::{StoreError, StoreResult};
use crate::storage::snapshots::{timestamp, to_i64};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

/// History record storage operations
pub struct RecordStore<'a> {
    conn: &'a Connection,
}

impl<'a> RecordStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Append a record. Both snapshots it references must already be stored.
    pub fn insert(&self, record: &HistoryRecord) -> StoreResult<()> {
        let json = serde_json::to_string(record)
            .map_err(|e| StoreError::Serialization(format!("Failed to serialize record: {e}")))?;

        self.conn.execute(
            r"
            INSERT INTO history_records (id, organization, snapshot_id, previous_snapshot_id, data, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
            params![
                record.id.to_string(),
                record.organization,
                record.snapshot_id.to_string(),
                record.previous_snapshot_id.map(|id| id.to_string()),
                json,
                timestamp(record.created_at),
            ],
        )?;

        Ok(())
    }

    /// Record computed for `snapshot_id`, if any
    pub fn for_snapshot(&self, snapshot_id: Uuid) -> StoreResult<Option<HistoryRecord>> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                r"
                SELECT id, data FROM history_records
                WHERE snapshot_id = ?1
                ORDER BY created_at DESC, rowid DESC
                LIMIT 1
                ",
                params![snapshot_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        row.map(|(id, json)| parse_record(&id, &json)).transpose()
    }

    /// Records of `organization`, newest first
    pub fn list(&self, organization: &str, limit: usize) -> StoreResult<Vec<HistoryRecord>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT id, data FROM history_records
            WHERE organization = ?1
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?2
            ",
        )?;

        let rows = stmt.query_map(params![organization, to_i64(limit)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, json) = row?;
            records.push(parse_record(&id, &json)?);
        }
        Ok(records)
    }
}

fn parse_record(id: &str, json: &str) -> StoreResult<HistoryRecord> {
    serde_json::from_str(json).map_err(|e| StoreError::Corrupt {
        id: id.to_string(),
        reason: format!("failed to parse history record: {e}"),
    })
}
