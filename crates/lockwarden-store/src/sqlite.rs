//! SQLite-based store implementation

use chrono::{DateTime, Utc};
use lockwarden_api::WorkflowKind;
use lockwarden_util::ResourceGroupName;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::{AuditEvent, AuditEventType, Store, StoreError, StoreResult};

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("store lock poisoned".into()))
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            -- AllowedSet; names compare case-insensitively
            CREATE TABLE IF NOT EXISTS allowed_groups (
                name_key TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                added_at TEXT NOT NULL
            );

            -- Last executed schedule slot per workflow
            CREATE TABLE IF NOT EXISTS schedule_slots (
                workflow TEXT PRIMARY KEY,
                slot TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

impl Store for SqliteStore {
    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.conn()?;
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![event.timestamp.to_rfc3339(), event_json],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit], |row| {
            let id: i64 = row.get(0)?;
            let timestamp_str: String = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp_str, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp_str, event_json) = row?;
            let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| lockwarden_util::now());
            let event: AuditEventType = serde_json::from_str(&event_json)?;

            events.push(AuditEvent {
                id,
                timestamp,
                event,
            });
        }

        Ok(events)
    }

    fn load_allowed_groups(&self) -> StoreResult<Vec<ResourceGroupName>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT name FROM allowed_groups ORDER BY name_key")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut groups = Vec::new();
        for row in rows {
            groups.push(ResourceGroupName::new(row?));
        }
        Ok(groups)
    }

    fn add_allowed_groups(&self, groups: &[ResourceGroupName]) -> StoreResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = lockwarden_util::now().to_rfc3339();

        let mut added = 0;
        for group in groups {
            added += tx.execute(
                "INSERT OR IGNORE INTO allowed_groups (name_key, name, added_at) VALUES (?, ?, ?)",
                params![group.as_str().to_ascii_lowercase(), group.as_str(), now],
            )?;
        }
        tx.commit()?;

        if added > 0 {
            debug!(added, "Allowed resource groups persisted");
        }
        Ok(added)
    }

    fn get_last_slot(&self, workflow: WorkflowKind) -> StoreResult<Option<String>> {
        let conn = self.conn()?;
        let slot = conn
            .query_row(
                "SELECT slot FROM schedule_slots WHERE workflow = ?",
                [workflow.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(slot)
    }

    fn set_last_slot(&self, workflow: WorkflowKind, slot: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO schedule_slots (workflow, slot, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(workflow)
            DO UPDATE SET slot = excluded.slot, updated_at = excluded.updated_at
            "#,
            params![workflow.as_str(), slot, lockwarden_util::now().to_rfc3339()],
        )?;

        debug!(workflow = %workflow, slot, "Schedule slot recorded");
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_store() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.is_healthy());
    }

    #[test]
    fn test_audit_log() {
        let store = SqliteStore::in_memory().unwrap();

        store
            .append_audit(AuditEvent::new(AuditEventType::ServiceStarted))
            .unwrap();
        store
            .append_audit(AuditEvent::new(AuditEventType::AllowedSetGrew {
                added: vec![ResourceGroupName::new("rg-prod")],
            }))
            .unwrap();

        let events = store.get_recent_audits(10).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].event, AuditEventType::AllowedSetGrew { .. }));
        assert!(matches!(events[1].event, AuditEventType::ServiceStarted));
    }

    #[test]
    fn allowed_groups_only_grow_and_ignore_case() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.load_allowed_groups().unwrap().is_empty());

        let added = store
            .add_allowed_groups(&[ResourceGroupName::new("rg-prod"), ResourceGroupName::new("rg-b")])
            .unwrap();
        assert_eq!(added, 2);

        let added = store
            .add_allowed_groups(&[ResourceGroupName::new("RG-PROD")])
            .unwrap();
        assert_eq!(added, 0);

        let groups = store.load_allowed_groups().unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].as_str(), "rg-prod");
    }

    #[test]
    fn schedule_slots() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.get_last_slot(WorkflowKind::LockCheck).unwrap().is_none());

        store.set_last_slot(WorkflowKind::LockCheck, "2025-12-02T08").unwrap();
        store.set_last_slot(WorkflowKind::LockCheck, "2026-01-02T08").unwrap();
        assert_eq!(
            store.get_last_slot(WorkflowKind::LockCheck).unwrap().as_deref(),
            Some("2026-01-02T08")
        );
        assert!(store.get_last_slot(WorkflowKind::TagCleanup).unwrap().is_none());
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lockwarden.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .add_allowed_groups(&[ResourceGroupName::new("rg-keep")])
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.load_allowed_groups().unwrap().len(), 1);
    }
}
