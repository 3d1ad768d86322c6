//! SQLite-based store implementation

use chrono::{DateTime, Utc};
use gatepass_api::{
    ApprovalToken, AuditEntry, GatepassRequest, GatepassStatus, Parent, Student,
};
use gatepass_util::{format_timestamp, parse_timestamp, GatepassId, ParentId, StudentId, TokenId};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::audit::{self, AUDIT_SCHEMA};
use crate::{GatepassQuery, Store, StoreError, StoreResult, TokenRedemption, Transition};

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
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS parents (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT,
                phone TEXT,
                address TEXT
            );

            CREATE TABLE IF NOT EXISTS students (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                roll_no TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS student_guardians (
                student_id TEXT NOT NULL REFERENCES students(id),
                parent_id TEXT NOT NULL REFERENCES parents(id),
                position INTEGER NOT NULL,
                PRIMARY KEY (student_id, parent_id)
            );

            CREATE TABLE IF NOT EXISTS gatepasses (
                id TEXT PRIMARY KEY,
                student_id TEXT NOT NULL REFERENCES students(id),
                destination TEXT NOT NULL,
                purpose TEXT NOT NULL DEFAULT '',
                from_time TEXT NOT NULL,
                to_time TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                request_expires_at TEXT,
                actual_exit_time TEXT,
                actual_entry_time TEXT,
                version INTEGER NOT NULL DEFAULT 0,
                CHECK (from_time < to_time)
            );

            CREATE TABLE IF NOT EXISTS approval_tokens (
                token TEXT PRIMARY KEY,
                gatepass_id TEXT NOT NULL REFERENCES gatepasses(id),
                parent_id TEXT NOT NULL REFERENCES parents(id),
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                used INTEGER NOT NULL DEFAULT 0,
                used_at TEXT,
                action_taken TEXT,
                UNIQUE (gatepass_id, parent_id)
            );

            CREATE INDEX IF NOT EXISTS idx_gatepasses_student ON gatepasses(student_id);
            CREATE INDEX IF NOT EXISTS idx_gatepasses_status ON gatepasses(status, request_expires_at);
            CREATE INDEX IF NOT EXISTS idx_tokens_parent ON approval_tokens(parent_id);
            "#,
        )?;
        conn.execute_batch(AUDIT_SCHEMA)?;

        debug!("Store schema initialized");
        Ok(())
    }
}

const GATEPASS_COLUMNS: &str = "g.id, g.student_id, g.destination, g.purpose, g.from_time, \
     g.to_time, g.status, g.created_at, g.request_expires_at, g.actual_exit_time, \
     g.actual_entry_time, g.version";

const TOKEN_COLUMNS: &str =
    "token, gatepass_id, parent_id, created_at, expires_at, used, used_at, action_taken";

/// Raw column values, converted outside the rusqlite row callback
struct GatepassRow {
    id: String,
    student_id: String,
    destination: String,
    purpose: String,
    from_time: String,
    to_time: String,
    status: String,
    created_at: String,
    request_expires_at: Option<String>,
    actual_exit_time: Option<String>,
    actual_entry_time: Option<String>,
    version: i64,
}

impl GatepassRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            student_id: row.get(1)?,
            destination: row.get(2)?,
            purpose: row.get(3)?,
            from_time: row.get(4)?,
            to_time: row.get(5)?,
            status: row.get(6)?,
            created_at: row.get(7)?,
            request_expires_at: row.get(8)?,
            actual_exit_time: row.get(9)?,
            actual_entry_time: row.get(10)?,
            version: row.get(11)?,
        })
    }

    fn into_gatepass(self, audit: Vec<AuditEntry>) -> StoreResult<GatepassRequest> {
        Ok(GatepassRequest {
            id: self.id.parse()?,
            student: self.student_id.parse()?,
            destination: self.destination,
            purpose: self.purpose,
            from_time: parse_timestamp(&self.from_time)?,
            to_time: parse_timestamp(&self.to_time)?,
            status: self.status.parse()?,
            created_at: parse_timestamp(&self.created_at)?,
            request_expires_at: parse_optional(self.request_expires_at)?,
            actual_exit_time: parse_optional(self.actual_exit_time)?,
            actual_entry_time: parse_optional(self.actual_entry_time)?,
            audit,
            version: u64::try_from(self.version)
                .map_err(|_| StoreError::Serialization(format!("negative version {}", self.version)))?,
        })
    }
}

struct TokenRow {
    token: String,
    gatepass_id: String,
    parent_id: String,
    created_at: String,
    expires_at: String,
    used: bool,
    used_at: Option<String>,
    action_taken: Option<String>,
}

impl TokenRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            token: row.get(0)?,
            gatepass_id: row.get(1)?,
            parent_id: row.get(2)?,
            created_at: row.get(3)?,
            expires_at: row.get(4)?,
            used: row.get(5)?,
            used_at: row.get(6)?,
            action_taken: row.get(7)?,
        })
    }

    fn into_token(self) -> StoreResult<ApprovalToken> {
        Ok(ApprovalToken {
            token: self.token.parse()?,
            gatepass: self.gatepass_id.parse()?,
            parent: self.parent_id.parse()?,
            created_at: parse_timestamp(&self.created_at)?,
            expires_at: parse_timestamp(&self.expires_at)?,
            used: self.used,
            used_at: parse_optional(self.used_at)?,
            action_taken: self.action_taken.map(|a| a.parse()).transpose()?,
        })
    }
}

fn parse_optional(value: Option<String>) -> StoreResult<Option<DateTime<Utc>>> {
    Ok(value.map(|s| parse_timestamp(&s)).transpose()?)
}

fn format_optional(value: &Option<DateTime<Utc>>) -> Option<String> {
    value.as_ref().map(format_timestamp)
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn load_gatepasses(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> StoreResult<Vec<GatepassRequest>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, GatepassRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut gatepasses = Vec::with_capacity(rows.len());
    for row in rows {
        let id: GatepassId = row.id.parse()?;
        let audit = audit::load_entries(conn, &id)?;
        gatepasses.push(row.into_gatepass(audit)?);
    }

    Ok(gatepasses)
}

fn load_tokens(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> StoreResult<Vec<ApprovalToken>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, TokenRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter().map(TokenRow::into_token).collect()
}

fn insert_token_row(conn: &Connection, token: &ApprovalToken) -> StoreResult<()> {
    let result = conn.execute(
        r#"
        INSERT INTO approval_tokens
            (token, gatepass_id, parent_id, created_at, expires_at, used, used_at, action_taken)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            token.token.to_string(),
            token.gatepass.to_string(),
            token.parent.to_string(),
            format_timestamp(&token.created_at),
            format_timestamp(&token.expires_at),
            token.used,
            format_optional(&token.used_at),
            token.action_taken.map(|a| a.as_str()),
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(e) if is_constraint_violation(&e) => Err(StoreError::Duplicate(format!(
            "token for gatepass {} and parent {}",
            token.gatepass, token.parent
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Compare-and-swap on the `used` flag
fn redeem_token_row(conn: &Connection, redemption: &TokenRedemption) -> StoreResult<()> {
    let changed = conn.execute(
        r#"
        UPDATE approval_tokens
        SET used = 1, used_at = ?, action_taken = ?
        WHERE token = ? AND used = 0
        "#,
        params![
            format_timestamp(&redemption.at),
            redemption.action.as_str(),
            redemption.token.to_string(),
        ],
    )?;

    if changed == 1 {
        return Ok(());
    }

    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM approval_tokens WHERE token = ?",
            [redemption.token.to_string()],
            |row| row.get(0),
        )
        .optional()?;

    match exists {
        Some(_) => Err(StoreError::TokenAlreadyUsed(redemption.token.to_string())),
        None => Err(StoreError::NotFound(format!("token {}", redemption.token))),
    }
}

impl Store for SqliteStore {
    fn insert_parent(&self, parent: &Parent) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO parents (id, name, email, phone, address) VALUES (?, ?, ?, ?, ?)",
            params![
                parent.id.to_string(),
                parent.name,
                parent.email,
                parent.phone,
                parent.address,
            ],
        )?;

        debug!(parent_id = %parent.id, "Parent inserted");
        Ok(())
    }

    fn get_parent(&self, id: &ParentId) -> StoreResult<Option<Parent>> {
        let conn = self.conn()?;

        let row = conn
            .query_row(
                "SELECT name, email, phone, address FROM parents WHERE id = ?",
                [id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(name, email, phone, address)| Parent {
            id: *id,
            name,
            email,
            phone,
            address,
        }))
    }

    fn insert_student(&self, student: &Student) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let result = tx.execute(
            "INSERT INTO students (id, user_id, roll_no) VALUES (?, ?, ?)",
            params![
                student.id.to_string(),
                student.user_id.as_str(),
                student.roll_no,
            ],
        );

        match result {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                return Err(StoreError::Duplicate(format!(
                    "roll number {}",
                    student.roll_no
                )));
            }
            Err(e) => return Err(e.into()),
        }

        for (position, parent) in student.guardians.iter().enumerate() {
            tx.execute(
                r#"
                INSERT OR IGNORE INTO student_guardians (student_id, parent_id, position)
                VALUES (?, ?, ?)
                "#,
                params![student.id.to_string(), parent.to_string(), position as i64],
            )?;
        }

        tx.commit()?;

        debug!(student_id = %student.id, roll_no = %student.roll_no, "Student inserted");
        Ok(())
    }

    fn get_student(&self, id: &StudentId) -> StoreResult<Option<Student>> {
        let conn = self.conn()?;

        let row = conn
            .query_row(
                "SELECT user_id, roll_no FROM students WHERE id = ?",
                [id.to_string()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        let Some((user_id, roll_no)) = row else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT parent_id FROM student_guardians WHERE student_id = ? ORDER BY position ASC",
        )?;
        let guardians = stmt
            .query_map([id.to_string()], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .map(|s| s.parse::<ParentId>())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(Student {
            id: *id,
            user_id: user_id.into(),
            roll_no,
            guardians,
        }))
    }

    fn add_guardian(&self, student: &StudentId, parent: &ParentId) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT OR IGNORE INTO student_guardians (student_id, parent_id, position)
            VALUES (?1, ?2, (SELECT COALESCE(MAX(position), -1) + 1
                             FROM student_guardians WHERE student_id = ?1))
            "#,
            params![student.to_string(), parent.to_string()],
        )?;

        debug!(student_id = %student, parent_id = %parent, "Guardian linked");
        Ok(())
    }

    fn remove_guardian(&self, student: &StudentId, parent: &ParentId) -> StoreResult<bool> {
        let conn = self.conn()?;

        let removed = conn.execute(
            "DELETE FROM student_guardians WHERE student_id = ? AND parent_id = ?",
            params![student.to_string(), parent.to_string()],
        )?;

        debug!(student_id = %student, parent_id = %parent, removed, "Guardian unlinked");
        Ok(removed > 0)
    }

    fn create_gatepass(
        &self,
        gatepass: &GatepassRequest,
        tokens: &[ApprovalToken],
    ) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO gatepasses (
                id, student_id, destination, purpose, from_time, to_time, status,
                created_at, request_expires_at, actual_exit_time, actual_entry_time, version
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                gatepass.id.to_string(),
                gatepass.student.to_string(),
                gatepass.destination,
                gatepass.purpose,
                format_timestamp(&gatepass.from_time),
                format_timestamp(&gatepass.to_time),
                gatepass.status.as_str(),
                format_timestamp(&gatepass.created_at),
                format_optional(&gatepass.request_expires_at),
                format_optional(&gatepass.actual_exit_time),
                format_optional(&gatepass.actual_entry_time),
                gatepass.version as i64,
            ],
        )?;

        for entry in &gatepass.audit {
            audit::append_entry(&tx, &gatepass.id, entry)?;
        }

        for token in tokens {
            insert_token_row(&tx, token)?;
        }

        tx.commit()?;

        debug!(
            gatepass_id = %gatepass.id,
            token_count = tokens.len(),
            "Gatepass inserted"
        );
        Ok(())
    }

    fn get_gatepass(&self, id: &GatepassId) -> StoreResult<Option<GatepassRequest>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM gatepasses g WHERE g.id = ?", GATEPASS_COLUMNS);

        let mut gatepasses = load_gatepasses(&conn, &sql, [id.to_string()])?;
        Ok(gatepasses.pop())
    }

    fn commit_transition(&self, transition: &Transition) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let gatepass = &transition.gatepass;

        // Token first: a lost race on the token must not be reported as a
        // version conflict, which the caller would retry.
        if let Some(redemption) = &transition.redeem {
            redeem_token_row(&tx, redemption)?;
        }

        let changed = tx.execute(
            r#"
            UPDATE gatepasses
            SET status = ?, request_expires_at = ?, actual_exit_time = ?,
                actual_entry_time = ?, version = version + 1
            WHERE id = ? AND version = ?
            "#,
            params![
                gatepass.status.as_str(),
                format_optional(&gatepass.request_expires_at),
                format_optional(&gatepass.actual_exit_time),
                format_optional(&gatepass.actual_entry_time),
                gatepass.id.to_string(),
                transition.expected_version as i64,
            ],
        )?;

        if changed == 0 {
            return Err(StoreError::VersionConflict(gatepass.id.to_string()));
        }

        audit::append_entry(&tx, &gatepass.id, &transition.audit)?;

        tx.commit()?;

        debug!(
            gatepass_id = %gatepass.id,
            status = %gatepass.status,
            action = %transition.audit.action,
            "Transition committed"
        );
        Ok(())
    }

    fn list_gatepasses(&self, query: &GatepassQuery) -> StoreResult<Vec<GatepassRequest>> {
        let conn = self.conn()?;

        match query {
            GatepassQuery::ByStudent(student) => {
                let sql = format!(
                    "SELECT {} FROM gatepasses g WHERE g.student_id = ? \
                     ORDER BY g.created_at DESC, g.id",
                    GATEPASS_COLUMNS
                );
                load_gatepasses(&conn, &sql, [student.to_string()])
            }
            GatepassQuery::ByStatus(status) => {
                let sql = format!(
                    "SELECT {} FROM gatepasses g WHERE g.status = ? \
                     ORDER BY g.created_at DESC, g.id",
                    GATEPASS_COLUMNS
                );
                load_gatepasses(&conn, &sql, [status.as_str()])
            }
            GatepassQuery::StudentsOut => {
                let sql = format!(
                    "SELECT {} FROM gatepasses g WHERE g.status = ? \
                     AND g.actual_exit_time IS NOT NULL AND g.actual_entry_time IS NULL \
                     ORDER BY g.to_time ASC, g.id",
                    GATEPASS_COLUMNS
                );
                load_gatepasses(&conn, &sql, [GatepassStatus::Approved.as_str()])
            }
        }
    }

    fn list_expirable(&self, now: DateTime<Utc>) -> StoreResult<Vec<GatepassId>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id FROM gatepasses
            WHERE status IN (?, ?)
              AND request_expires_at IS NOT NULL
              AND request_expires_at <= ?
            ORDER BY request_expires_at ASC
            "#,
        )?;

        let ids = stmt
            .query_map(
                params![
                    GatepassStatus::PendingParent.as_str(),
                    GatepassStatus::PendingWarden.as_str(),
                    format_timestamp(&now),
                ],
                |row| row.get::<_, String>(0),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(ids
            .into_iter()
            .map(|s| s.parse::<GatepassId>())
            .collect::<Result<Vec<_>, _>>()?)
    }

    fn count_by_status(&self) -> StoreResult<Vec<(GatepassStatus, u64)>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM gatepasses GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut counts = Vec::with_capacity(rows.len());
        for (status, count) in rows {
            counts.push((status.parse()?, count.max(0) as u64));
        }

        Ok(counts)
    }

    fn get_audit(&self, id: &GatepassId) -> StoreResult<Vec<AuditEntry>> {
        let conn = self.conn()?;
        audit::load_entries(&conn, id)
    }

    fn insert_token(&self, token: &ApprovalToken) -> StoreResult<()> {
        let conn = self.conn()?;
        insert_token_row(&conn, token)?;

        debug!(gatepass_id = %token.gatepass, parent_id = %token.parent, "Token inserted");
        Ok(())
    }

    fn get_token(&self, token: &TokenId) -> StoreResult<Option<ApprovalToken>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM approval_tokens WHERE token = ?", TOKEN_COLUMNS);

        let mut tokens = load_tokens(&conn, &sql, [token.to_string()])?;
        Ok(tokens.pop())
    }

    fn find_token(
        &self,
        gatepass: &GatepassId,
        parent: &ParentId,
    ) -> StoreResult<Option<ApprovalToken>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM approval_tokens WHERE gatepass_id = ? AND parent_id = ?",
            TOKEN_COLUMNS
        );

        let mut tokens = load_tokens(&conn, &sql, [gatepass.to_string(), parent.to_string()])?;
        Ok(tokens.pop())
    }

    fn tokens_for_gatepass(&self, gatepass: &GatepassId) -> StoreResult<Vec<ApprovalToken>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM approval_tokens WHERE gatepass_id = ? ORDER BY rowid ASC",
            TOKEN_COLUMNS
        );

        load_tokens(&conn, &sql, [gatepass.to_string()])
    }

    fn redeem_token(&self, redemption: &TokenRedemption) -> StoreResult<()> {
        let conn = self.conn()?;
        redeem_token_row(&conn, redemption)?;

        debug!(action = %redemption.action, "Token redeemed");
        Ok(())
    }

    fn pending_for_parent(
        &self,
        parent: &ParentId,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<GatepassRequest>> {
        let conn = self.conn()?;
        let sql = format!(
            r#"
            SELECT {} FROM gatepasses g
            JOIN approval_tokens t ON t.gatepass_id = g.id
            WHERE t.parent_id = ? AND t.used = 0 AND t.expires_at > ? AND g.status = ?
            ORDER BY g.request_expires_at ASC, g.id
            "#,
            GATEPASS_COLUMNS
        );

        load_gatepasses(
            &conn,
            &sql,
            params![
                parent.to_string(),
                format_timestamp(&now),
                GatepassStatus::PendingParent.as_str(),
            ],
        )
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
    use gatepass_api::{AuditAction, Decision};
    use gatepass_util::ActorId;
    use std::sync::Arc;

    /// Current time at the precision the store keeps
    fn test_now() -> DateTime<Utc> {
        parse_timestamp(&format_timestamp(&Utc::now())).unwrap()
    }

    fn seed_student(store: &SqliteStore) -> (Student, Parent) {
        let parent = Parent {
            id: ParentId::new(),
            name: "Asha Rao".into(),
            email: Some("asha@example.com".into()),
            phone: None,
            address: None,
        };
        store.insert_parent(&parent).unwrap();

        let student = Student {
            id: StudentId::new(),
            user_id: ActorId::new("student-1"),
            roll_no: "S001".into(),
            guardians: vec![parent.id],
        };
        store.insert_student(&student).unwrap();

        (student, parent)
    }

    fn new_gatepass(student: &Student, now: DateTime<Utc>) -> GatepassRequest {
        GatepassRequest {
            id: GatepassId::new(),
            student: student.id,
            destination: "Home".into(),
            purpose: "Weekend".into(),
            from_time: now + chrono::Duration::hours(2),
            to_time: now + chrono::Duration::hours(10),
            status: GatepassStatus::PendingParent,
            created_at: now,
            request_expires_at: Some(now + chrono::Duration::hours(1)),
            actual_exit_time: None,
            actual_entry_time: None,
            audit: vec![AuditEntry::new(now, "student-1", AuditAction::Created, "")],
            version: 0,
        }
    }

    fn new_token(gatepass: &GatepassRequest, parent: &Parent) -> ApprovalToken {
        ApprovalToken {
            token: TokenId::new(),
            gatepass: gatepass.id,
            parent: parent.id,
            created_at: gatepass.created_at,
            expires_at: gatepass.request_expires_at.unwrap(),
            used: false,
            used_at: None,
            action_taken: None,
        }
    }

    #[test]
    fn test_in_memory_store() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.is_healthy());
    }

    #[test]
    fn test_on_disk_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gatepass.db");

        let parent_id = {
            let store = SqliteStore::open(&path).unwrap();
            let (_, parent) = seed_student(&store);
            parent.id
        };

        let store = SqliteStore::open(&path).unwrap();
        let parent = store.get_parent(&parent_id).unwrap().unwrap();
        assert_eq!(parent.name, "Asha Rao");
    }

    #[test]
    fn test_student_registry() {
        let store = SqliteStore::in_memory().unwrap();
        let (student, parent) = seed_student(&store);

        let loaded = store.get_student(&student.id).unwrap().unwrap();
        assert_eq!(loaded, student);

        // Duplicate roll number
        let dup = Student {
            id: StudentId::new(),
            user_id: ActorId::new("student-2"),
            roll_no: "S001".into(),
            guardians: vec![],
        };
        assert!(matches!(store.insert_student(&dup), Err(StoreError::Duplicate(_))));

        // Guardian links
        let second = Parent {
            id: ParentId::new(),
            name: "Vikram Rao".into(),
            email: None,
            phone: Some("555-0100".into()),
            address: None,
        };
        store.insert_parent(&second).unwrap();
        store.add_guardian(&student.id, &second.id).unwrap();
        store.add_guardian(&student.id, &second.id).unwrap();

        let loaded = store.get_student(&student.id).unwrap().unwrap();
        assert_eq!(loaded.guardians, vec![parent.id, second.id]);

        assert!(store.remove_guardian(&student.id, &parent.id).unwrap());
        assert!(!store.remove_guardian(&student.id, &parent.id).unwrap());
        let loaded = store.get_student(&student.id).unwrap().unwrap();
        assert_eq!(loaded.guardians, vec![second.id]);
    }

    #[test]
    fn test_create_and_load_gatepass() {
        let store = SqliteStore::in_memory().unwrap();
        let (student, parent) = seed_student(&store);
        let now = test_now();

        let gatepass = new_gatepass(&student, now);
        let token = new_token(&gatepass, &parent);
        store.create_gatepass(&gatepass, &[token.clone()]).unwrap();

        let loaded = store.get_gatepass(&gatepass.id).unwrap().unwrap();
        assert_eq!(loaded, gatepass);

        let tokens = store.tokens_for_gatepass(&gatepass.id).unwrap();
        assert_eq!(tokens, vec![token.clone()]);
        assert_eq!(
            store.find_token(&gatepass.id, &parent.id).unwrap(),
            Some(token)
        );
    }

    #[test]
    fn test_duplicate_token_pair_rejected() {
        let store = SqliteStore::in_memory().unwrap();
        let (student, parent) = seed_student(&store);
        let gatepass = new_gatepass(&student, test_now());
        store
            .create_gatepass(&gatepass, &[new_token(&gatepass, &parent)])
            .unwrap();

        let result = store.insert_token(&new_token(&gatepass, &parent));
        assert!(matches!(result, Err(StoreError::Duplicate(_))));
    }

    #[test]
    fn test_commit_transition_checks_version() {
        let store = SqliteStore::in_memory().unwrap();
        let (student, _) = seed_student(&store);
        let now = test_now();
        let gatepass = new_gatepass(&student, now);
        store.create_gatepass(&gatepass, &[]).unwrap();

        let mut next = gatepass.clone();
        next.status = GatepassStatus::Expired;
        let transition = Transition {
            gatepass: next,
            expected_version: 0,
            audit: AuditEntry::new(now, "system", AuditAction::Expired, ""),
            redeem: None,
        };

        store.commit_transition(&transition).unwrap();

        // Same expected version again loses
        assert!(matches!(
            store.commit_transition(&transition),
            Err(StoreError::VersionConflict(_))
        ));

        let loaded = store.get_gatepass(&gatepass.id).unwrap().unwrap();
        assert_eq!(loaded.status, GatepassStatus::Expired);
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.audit.len(), 2);
        assert_eq!(loaded.audit[1].action, AuditAction::Expired);
    }

    #[test]
    fn test_failed_transition_rolls_back_token() {
        let store = SqliteStore::in_memory().unwrap();
        let (student, parent) = seed_student(&store);
        let now = test_now();
        let gatepass = new_gatepass(&student, now);
        let token = new_token(&gatepass, &parent);
        store.create_gatepass(&gatepass, &[token.clone()]).unwrap();

        let mut next = gatepass.clone();
        next.status = GatepassStatus::PendingWarden;
        let transition = Transition {
            gatepass: next,
            expected_version: 41,
            audit: AuditEntry::new(now, "Asha Rao", AuditAction::ParentApproved, ""),
            redeem: Some(TokenRedemption {
                token: token.token,
                action: Decision::Approve,
                at: now,
            }),
        };

        assert!(matches!(
            store.commit_transition(&transition),
            Err(StoreError::VersionConflict(_))
        ));

        let reloaded = store.get_token(&token.token).unwrap().unwrap();
        assert!(!reloaded.used);
        assert_eq!(store.get_audit(&gatepass.id).unwrap().len(), 1);
    }

    #[test]
    fn test_redeem_is_compare_and_swap() {
        let store = SqliteStore::in_memory().unwrap();
        let (student, parent) = seed_student(&store);
        let now = test_now();
        let gatepass = new_gatepass(&student, now);
        let token = new_token(&gatepass, &parent);
        store.create_gatepass(&gatepass, &[token.clone()]).unwrap();

        let redemption = TokenRedemption {
            token: token.token,
            action: Decision::Reject,
            at: now,
        };
        store.redeem_token(&redemption).unwrap();
        assert!(matches!(
            store.redeem_token(&redemption),
            Err(StoreError::TokenAlreadyUsed(_))
        ));

        let missing = TokenRedemption {
            token: TokenId::new(),
            ..redemption
        };
        assert!(matches!(store.redeem_token(&missing), Err(StoreError::NotFound(_))));

        let used = store.get_token(&token.token).unwrap().unwrap();
        assert!(used.used);
        assert_eq!(used.action_taken, Some(Decision::Reject));
    }

    #[test]
    fn test_concurrent_redeem_single_winner() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let (student, parent) = seed_student(&store);
        let now = test_now();
        let gatepass = new_gatepass(&student, now);
        let token = new_token(&gatepass, &parent);
        store.create_gatepass(&gatepass, &[token.clone()]).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let redemption = TokenRedemption {
                    token: token.token,
                    action: Decision::Approve,
                    at: now,
                };
                std::thread::spawn(move || store.redeem_token(&redemption).is_ok())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_queries() {
        let store = SqliteStore::in_memory().unwrap();
        let (student, parent) = seed_student(&store);
        let now = test_now();

        let pending = new_gatepass(&student, now);
        store
            .create_gatepass(&pending, &[new_token(&pending, &parent)])
            .unwrap();

        let mut overdue = new_gatepass(&student, now);
        overdue.request_expires_at = Some(now - chrono::Duration::seconds(1));
        store
            .create_gatepass(&overdue, &[new_token(&overdue, &parent)])
            .unwrap();

        let mut out = new_gatepass(&student, now);
        out.status = GatepassStatus::Approved;
        out.request_expires_at = None;
        out.actual_exit_time = Some(now);
        store.create_gatepass(&out, &[]).unwrap();

        assert_eq!(
            store
                .list_gatepasses(&GatepassQuery::ByStudent(student.id))
                .unwrap()
                .len(),
            3
        );
        assert_eq!(
            store
                .list_gatepasses(&GatepassQuery::ByStatus(GatepassStatus::PendingParent))
                .unwrap()
                .len(),
            2
        );

        let students_out = store.list_gatepasses(&GatepassQuery::StudentsOut).unwrap();
        assert_eq!(students_out.len(), 1);
        assert_eq!(students_out[0].id, out.id);

        assert_eq!(store.list_expirable(now).unwrap(), vec![overdue.id]);

        // The overdue request's token has expired, so only one is actionable
        let actionable = store.pending_for_parent(&parent.id, now).unwrap();
        assert_eq!(actionable.len(), 1);
        assert_eq!(actionable[0].id, pending.id);

        let counts = store.count_by_status().unwrap();
        assert!(counts.contains(&(GatepassStatus::PendingParent, 2)));
        assert!(counts.contains(&(GatepassStatus::Approved, 1)));
    }
}
