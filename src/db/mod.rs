mod schema;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::models::*;

/// Hard cap on how many events a single read returns.
pub const MAX_EVENT_LIMIT: u32 = 500;

/// Event log and snapshot metadata store.
///
/// Snapshot content lives on disk under the backup directory; this only keeps
/// what was copied where, plus the single-slot undo target.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        schema::run_migrations(&conn)
    }

    // ============================================================
    // Event log
    // ============================================================

    pub fn append_event(&self, input: NewEvent) -> Result<Event> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let now = Utc::now();

        conn.execute(
            "INSERT INTO events (timestamp, action, project, filename, outcome, details)
             VALUES (?, ?, ?, ?, ?, ?)",
            (
                now.to_rfc3339(),
                input.action.as_str(),
                &input.project,
                &input.filename,
                input.outcome.as_str(),
                serde_json::to_string(&input.details)?,
            ),
        )?;

        Ok(Event {
            id: conn.last_insert_rowid(),
            timestamp: now,
            action: input.action,
            project: input.project,
            filename: input.filename,
            outcome: input.outcome,
            details: input.details,
        })
    }

    /// The most recent events, newest first.
    pub fn recent_events(&self, limit: u32) -> Result<Vec<Event>> {
        let limit = limit.clamp(1, MAX_EVENT_LIMIT);
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, action, project, filename, outcome, details
             FROM events ORDER BY id DESC LIMIT ?",
        )?;

        let events = stmt
            .query_map([limit], |row| {
                Ok(Event {
                    id: row.get(0)?,
                    timestamp: parse_datetime(row.get::<_, String>(1)?),
                    action: EventAction::from_str(&row.get::<_, String>(2)?)
                        .unwrap_or(EventAction::Snapshot),
                    project: row.get(3)?,
                    filename: row.get(4)?,
                    outcome: EventOutcome::from_str(&row.get::<_, String>(5)?)
                        .unwrap_or(EventOutcome::Ok),
                    details: serde_json::from_str(&row.get::<_, String>(6)?)
                        .unwrap_or(serde_json::Value::Null),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(events)
    }

    // ============================================================
    // Snapshots
    // ============================================================

    /// Record a snapshot and make it the undo target in one transaction.
    ///
    /// Returns the target it displaced, if any.
    pub fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<Option<Uuid>> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;

        let displaced: Option<String> = tx
            .query_row(
                "SELECT snapshot_id FROM undo_target WHERE slot = 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        tx.execute(
            "INSERT INTO snapshots (id, name, reason, projects, created_at)
             VALUES (?, ?, ?, ?, ?)",
            (
                snapshot.id.to_string(),
                &snapshot.name,
                snapshot.reason.as_str(),
                serde_json::to_string(&snapshot.projects)?,
                snapshot.created_at.to_rfc3339(),
            ),
        )?;

        for (position, entry) in snapshot.entries.iter().enumerate() {
            tx.execute(
                "INSERT INTO snapshot_entries
                 (snapshot_id, position, project, filename, backup_path, checksum)
                 VALUES (?, ?, ?, ?, ?, ?)",
                (
                    snapshot.id.to_string(),
                    position as i64,
                    &entry.project,
                    &entry.filename,
                    entry.backup_path.to_string_lossy(),
                    &entry.checksum,
                ),
            )?;
        }

        tx.execute(
            "INSERT INTO undo_target (slot, snapshot_id) VALUES (1, ?)
             ON CONFLICT(slot) DO UPDATE SET snapshot_id = excluded.snapshot_id",
            [snapshot.id.to_string()],
        )?;

        tx.commit()?;
        Ok(displaced.map(parse_uuid))
    }

    pub fn get_snapshot(&self, id: Uuid) -> Result<Option<Snapshot>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        load_snapshot(&conn, id)
    }

    /// The most recent snapshot with the given name.
    pub fn find_snapshot_by_name(&self, name: &str) -> Result<Option<Snapshot>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let id: Option<String> = conn
            .query_row(
                "SELECT id FROM snapshots WHERE name = ?
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                [name],
                |row| row.get(0),
            )
            .optional()?;

        match id {
            Some(id) => load_snapshot(&conn, parse_uuid(id)),
            None => Ok(None),
        }
    }

    /// Snapshots newest first.
    pub fn list_snapshots(&self, limit: u32) -> Result<Vec<SnapshotSummary>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT s.id, s.name, s.reason, s.created_at,
                    (SELECT COUNT(*) FROM snapshot_entries e WHERE e.snapshot_id = s.id)
             FROM snapshots s ORDER BY s.created_at DESC, s.rowid DESC LIMIT ?",
        )?;

        let snapshots = stmt
            .query_map([limit], |row| {
                Ok(SnapshotSummary {
                    id: parse_uuid(row.get::<_, String>(0)?),
                    name: row.get(1)?,
                    reason: parse_reason(row.get::<_, String>(2)?),
                    created_at: parse_datetime(row.get::<_, String>(3)?),
                    entry_count: row.get::<_, i64>(4)? as usize,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(snapshots)
    }

    pub fn undo_target(&self) -> Result<Option<Uuid>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let id: Option<String> = conn
            .query_row(
                "SELECT snapshot_id FROM undo_target WHERE slot = 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.map(parse_uuid))
    }

    /// Atomically read and clear the undo target.
    pub fn take_undo_target(&self) -> Result<Option<Snapshot>> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;

        let id: Option<String> = tx
            .query_row(
                "SELECT snapshot_id FROM undo_target WHERE slot = 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let Some(id) = id else {
            return Ok(None);
        };

        tx.execute("DELETE FROM undo_target WHERE slot = 1", [])?;
        let snapshot = load_snapshot(&tx, parse_uuid(id))?;
        tx.commit()?;

        Ok(snapshot)
    }

    /// Put a taken target back, unless a newer snapshot claimed the slot meanwhile.
    pub fn restore_undo_target(&self, id: Uuid) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute(
            "INSERT OR IGNORE INTO undo_target (slot, snapshot_id) VALUES (1, ?)",
            [id.to_string()],
        )?;
        Ok(rows > 0)
    }

    /// Hand the slot back to `previous` after the operation guarded by
    /// `current` failed. Does nothing once a newer snapshot owns the slot.
    pub fn reset_undo_target(&self, current: Uuid, previous: Option<Uuid>) -> Result<bool> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;

        let rows = tx.execute(
            "DELETE FROM undo_target WHERE slot = 1 AND snapshot_id = ?",
            [current.to_string()],
        )?;
        if rows == 0 {
            return Ok(false);
        }
        if let Some(previous) = previous {
            tx.execute(
                "INSERT INTO undo_target (slot, snapshot_id) VALUES (1, ?)",
                [previous.to_string()],
            )?;
        }

        tx.commit()?;
        Ok(true)
    }
}

fn load_snapshot(conn: &Connection, id: Uuid) -> Result<Option<Snapshot>> {
    let header = conn
        .query_row(
            "SELECT id, name, reason, projects, created_at FROM snapshots WHERE id = ?",
            [id.to_string()],
            |row| {
                Ok((
                    parse_uuid(row.get::<_, String>(0)?),
                    row.get::<_, String>(1)?,
                    parse_reason(row.get::<_, String>(2)?),
                    row.get::<_, String>(3)?,
                    parse_datetime(row.get::<_, String>(4)?),
                ))
            },
        )
        .optional()?;

    let Some((id, name, reason, projects, created_at)) = header else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT project, filename, backup_path, checksum
         FROM snapshot_entries WHERE snapshot_id = ? ORDER BY position",
    )?;
    let entries = stmt
        .query_map([id.to_string()], row_to_entry)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(Snapshot {
        id,
        name,
        reason,
        projects: serde_json::from_str(&projects)?,
        entries,
        created_at,
    }))
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<SnapshotEntry> {
    Ok(SnapshotEntry {
        project: row.get(0)?,
        filename: row.get(1)?,
        backup_path: PathBuf::from(row.get::<_, String>(2)?),
        checksum: row.get(3)?,
    })
}

fn parse_uuid(s: String) -> Uuid {
    Uuid::parse_str(&s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_reason(s: String) -> SnapshotReason {
    SnapshotReason::from_str(&s).unwrap_or(SnapshotReason::Manual)
}

fn parse_datetime(s: String) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
