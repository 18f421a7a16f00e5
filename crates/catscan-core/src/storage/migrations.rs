//! Database migrations

use rusqlite::Connection;

use super::db::StoreResult;

const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> StoreResult<()> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version < 1 {
        migrate_v1(conn)?;
    }

    conn.pragma_update(None, "user_version", CURRENT_VERSION)?;
    Ok(())
}

fn migrate_v1(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        r"
        -- Full snapshot document as JSON in the data column
        CREATE TABLE IF NOT EXISTS snapshots (
            id TEXT PRIMARY KEY,
            organization TEXT NOT NULL,
            outcome TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            workspaces INTEGER NOT NULL,
            resources INTEGER NOT NULL,
            data TEXT NOT NULL
        );

        -- Diff of a snapshot against its predecessor
        CREATE TABLE IF NOT EXISTS history_records (
            id TEXT PRIMARY KEY,
            organization TEXT NOT NULL,
            snapshot_id TEXT NOT NULL REFERENCES snapshots(id),
            previous_snapshot_id TEXT REFERENCES snapshots(id),
            data TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_snapshots_org ON snapshots(organization, finished_at);
        CREATE INDEX IF NOT EXISTS idx_history_org ON history_records(organization, created_at);

        -- Append-only
        CREATE TRIGGER IF NOT EXISTS snapshots_no_update BEFORE UPDATE ON snapshots
        BEGIN SELECT RAISE(ABORT, 'snapshots are append-only'); END;
        CREATE TRIGGER IF NOT EXISTS snapshots_no_delete BEFORE DELETE ON snapshots
        BEGIN SELECT RAISE(ABORT, 'snapshots are append-only'); END;
        CREATE TRIGGER IF NOT EXISTS history_no_update BEFORE UPDATE ON history_records
        BEGIN SELECT RAISE(ABORT, 'history records are append-only'); END;
        CREATE TRIGGER IF NOT EXISTS history_no_delete BEFORE DELETE ON history_records
        BEGIN SELECT RAISE(ABORT, 'history records are append-only'); END;
        ",
    )?;

    Ok(())
}
