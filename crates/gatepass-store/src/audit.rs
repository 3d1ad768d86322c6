//! Audit trail persistence
//!
//! Rows are only ever inserted. There is no update or delete path.

use chrono::{DateTime, Utc};
use gatepass_api::AuditEntry;
use gatepass_util::{format_timestamp, parse_timestamp, GatepassId};
use rusqlite::{params, Connection};

use crate::StoreResult;

pub(crate) const AUDIT_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS gatepass_audit (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        gatepass_id TEXT NOT NULL REFERENCES gatepasses(id),
        timestamp TEXT NOT NULL,
        actor TEXT NOT NULL,
        action TEXT NOT NULL,
        note TEXT NOT NULL DEFAULT '',
        is_override INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_audit_gatepass ON gatepass_audit(gatepass_id, id);
"#;

/// Append one entry to a gatepass's audit trail
pub(crate) fn append_entry(
    conn: &Connection,
    gatepass: &GatepassId,
    entry: &AuditEntry,
) -> StoreResult<i64> {
    conn.execute(
        r#"
        INSERT INTO gatepass_audit (gatepass_id, timestamp, actor, action, note, is_override)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
        params![
            gatepass.to_string(),
            format_timestamp(&entry.timestamp),
            entry.actor,
            entry.action.as_str(),
            entry.note,
            entry.is_override,
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

/// Load a gatepass's audit trail in insertion order
pub(crate) fn load_entries(conn: &Connection, gatepass: &GatepassId) -> StoreResult<Vec<AuditEntry>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT timestamp, actor, action, note, is_override
        FROM gatepass_audit
        WHERE gatepass_id = ?
        ORDER BY id ASC
        "#,
    )?;

    let rows = stmt.query_map([gatepass.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, bool>(4)?,
        ))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (timestamp, actor, action, note, is_override) = row?;
        let timestamp: DateTime<Utc> = parse_timestamp(&timestamp)?;

        entries.push(AuditEntry {
            timestamp,
            actor,
            action: action.parse()?,
            note,
            is_override,
        });
    }

    Ok(entries)
}
