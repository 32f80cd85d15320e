//! SQLite log store for recorded operations and reconcile spans.
//!
//! # Schema design
//!
//! The database uses WAL mode with single-writer semantics. All timestamps
//! are epoch seconds (i64); call durations are carried separately in
//! milliseconds. Payloads are stored as opaque TEXT.
//!
//! # Tables
//!
//! - `operations`: append-only log of recorded API calls, unique on
//!   `(session_id, sequence_number)`
//! - `reconcile_spans`: reconcile invocations with two-phase insert
//!   (inserted open, closed later)
//!
//! Field length bounds are repeated as CHECK constraints so out-of-band
//! writers cannot sneak oversized rows past application validation.
//!
//! # Versioning
//!
//! `PRAGMA user_version` tracks the schema version. `SCHEMA_SQL` is
//! idempotent and creates the full current schema; the [`MIGRATIONS`]
//! registry upgrades databases written before the enrichment columns
//! (`actor_id`, `uid`, `resource_version`, `generation`, `verb`) existed.

use std::path::Path;
use std::str::FromStr;

use rusqlite::{Connection, OpenFlags, params, types::Type};
use serde::Serialize;

use crate::assert::{ensure, ensure_in_range, ensure_not_empty};
use crate::error::{Error, Result, StorageError};
use crate::model::{OpType, Operation, ReconcileSpan, SessionInfo, validate_operation, validate_span};

// =============================================================================
// Schema
// =============================================================================

/// Current schema version, tracked via `PRAGMA user_version`.
pub const SCHEMA_VERSION: i32 = 2;

/// Default per-session operation capacity.
pub const DEFAULT_MAX_OPERATIONS: i64 = 1_000_000;

/// Hard cap on rows returned by any single query.
pub const MAX_QUERY_RESULTS: i64 = 10_000;

const MAX_DB_PATH_LEN: i64 = 4096;

/// Schema initialization SQL. Idempotent; safe to run on every open.
pub const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS operations (
    id INTEGER PRIMARY KEY,
    session_id TEXT NOT NULL,
    sequence_number INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,          -- epoch seconds
    operation_type TEXT NOT NULL,        -- GET|LIST|CREATE|UPDATE|PATCH|DELETE|WATCH
    resource_kind TEXT NOT NULL,
    namespace TEXT,
    name TEXT,
    resource_data TEXT,                  -- opaque serialized payload
    error TEXT,
    duration_ms INTEGER NOT NULL,
    actor_id TEXT,
    uid TEXT,
    resource_version TEXT,
    generation INTEGER,
    verb TEXT,
    CHECK(length(operation_type) <= 20),
    CHECK(length(resource_kind) <= 100),
    CHECK(length(namespace) <= 253),
    CHECK(length(name) <= 253),
    CHECK(length(resource_data) <= 1048576),
    CHECK(length(error) <= 10000),
    CHECK(length(actor_id) <= 256),
    CHECK(length(uid) <= 128),
    CHECK(length(resource_version) <= 128),
    CHECK(length(verb) <= 20),
    UNIQUE(session_id, sequence_number)
);

CREATE INDEX IF NOT EXISTS idx_session_sequence ON operations(session_id, sequence_number);
CREATE INDEX IF NOT EXISTS idx_timestamp ON operations(timestamp);
CREATE INDEX IF NOT EXISTS idx_resource ON operations(resource_kind, namespace, name);
-- idx_uid_rv is created by the enrichment migration, after the uid and
-- resource_version columns are guaranteed to exist on legacy tables.

CREATE TABLE IF NOT EXISTS reconcile_spans (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    actor_id TEXT NOT NULL,
    start_ts INTEGER NOT NULL,           -- epoch seconds
    end_ts INTEGER,                      -- NULL while the span is open
    duration_ms INTEGER,
    kind TEXT NOT NULL,
    namespace TEXT,
    name TEXT,
    trigger_uid TEXT,
    trigger_resource_version TEXT,
    trigger_reason TEXT,
    error TEXT,
    CHECK(length(id) <= 128),
    CHECK(length(actor_id) <= 256),
    CHECK(length(kind) <= 100),
    CHECK(length(namespace) <= 253),
    CHECK(length(name) <= 253),
    CHECK(length(trigger_uid) <= 128),
    CHECK(length(trigger_resource_version) <= 128),
    CHECK(length(trigger_reason) <= 512),
    CHECK(length(error) <= 10000)
);

CREATE INDEX IF NOT EXISTS idx_reconcile_session ON reconcile_spans(session_id, start_ts);
CREATE INDEX IF NOT EXISTS idx_reconcile_trigger ON reconcile_spans(trigger_uid, trigger_resource_version);
"#;

// =============================================================================
// Migrations
// =============================================================================

/// A forward schema migration.
///
/// `version` is the schema version AFTER the migration is applied. Each
/// migration must be idempotent: column additions check `PRAGMA table_info`
/// first, index creation uses IF NOT EXISTS.
pub struct Migration {
    /// Target version after this migration is applied.
    pub version: i32,
    /// Human-readable description.
    pub description: &'static str,
    /// Upgrade step. Runs inside a transaction.
    pub apply: fn(&Connection) -> Result<()>,
}

/// Registry of all migrations, applied in order.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Baseline schema",
        // SCHEMA_SQL creates the baseline; nothing to do.
        apply: |_conn| Ok(()),
    },
    Migration {
        version: 2,
        description: "Add enrichment columns and uid/rv index to operations",
        apply: migrate_enrichment_columns,
    },
];

/// Columns added after the baseline schema shipped, with their ALTER DDL.
const ENRICHMENT_COLUMNS: &[(&str, &str)] = &[
    ("actor_id", "ALTER TABLE operations ADD COLUMN actor_id TEXT"),
    ("uid", "ALTER TABLE operations ADD COLUMN uid TEXT"),
    (
        "resource_version",
        "ALTER TABLE operations ADD COLUMN resource_version TEXT",
    ),
    ("generation", "ALTER TABLE operations ADD COLUMN generation INTEGER"),
    ("verb", "ALTER TABLE operations ADD COLUMN verb TEXT"),
];

fn migrate_enrichment_columns(conn: &Connection) -> Result<()> {
    let columns = load_columns(conn, "operations")?;
    for (name, ddl) in ENRICHMENT_COLUMNS {
        if columns.iter().any(|c| c == name) {
            continue;
        }
        conn.execute(ddl, []).map_err(|e| {
            StorageError::MigrationFailed(format!("failed to add column operations.{name}: {e}"))
        })?;
        tracing::debug!(column = name, "added operations column");
    }

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_uid_rv ON operations(uid, resource_version)",
        [],
    )
    .map_err(|e| StorageError::MigrationFailed(format!("failed to create idx_uid_rv: {e}")))?;

    Ok(())
}

/// Column names of `table`, in declaration order.
pub fn load_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let sql = format!("PRAGMA table_info({table})");
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| StorageError::Database(format!("failed to read table info for {table}: {e}")))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .and_then(Iterator::collect::<rusqlite::Result<Vec<String>>>)
        .map_err(|e| StorageError::Database(format!("failed to scan table info for {table}: {e}")))?;
    Ok(names)
}

/// Index names defined on `table`.
pub fn load_indexes(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let sql = format!("PRAGMA index_list({table})");
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| StorageError::Database(format!("failed to read index list for {table}: {e}")))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .and_then(Iterator::collect::<rusqlite::Result<Vec<String>>>)
        .map_err(|e| StorageError::Database(format!("failed to scan index list for {table}: {e}")))?;
    Ok(names)
}

/// Table names present in the database.
pub fn load_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table'")
        .map_err(|e| StorageError::Database(format!("failed to query sqlite_master: {e}")))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .and_then(Iterator::collect::<rusqlite::Result<Vec<String>>>)
        .map_err(|e| StorageError::Database(format!("failed to scan sqlite_master: {e}")))?;
    Ok(names)
}

/// Read the schema version from `PRAGMA user_version`.
pub fn get_user_version(conn: &Connection) -> Result<i32> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| StorageError::Database(format!("failed to read user_version: {e}")).into())
}

fn set_user_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute_batch(&format!("PRAGMA user_version = {version}"))
        .map_err(|e| StorageError::Database(format!("failed to set user_version: {e}")).into())
}

/// Create missing tables and indexes, then apply pending migrations.
///
/// Safe to call on every open. A migration failure surfaces immediately;
/// `user_version` is only advanced after the step commits, so a partially
/// migrated database reports the last fully applied version.
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL)
        .map_err(|e| StorageError::MigrationFailed(format!("schema creation failed: {e}")))?;

    let current = get_user_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(StorageError::MigrationFailed(format!(
            "database schema version {current} is newer than supported {SCHEMA_VERSION}"
        ))
        .into());
    }

    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StorageError::MigrationFailed(format!("failed to begin migration: {e}")))?;
        (migration.apply)(&tx)?;
        set_user_version(&tx, migration.version)?;
        tx.commit()
            .map_err(|e| StorageError::MigrationFailed(format!("failed to commit migration: {e}")))?;
        tracing::info!(
            version = migration.version,
            description = migration.description,
            "applied schema migration"
        );
    }

    Ok(())
}

// =============================================================================
// Migration status
// =============================================================================

/// Status entry for one migration.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatusEntry {
    /// Schema version after the migration is applied.
    pub version: i32,
    /// Human-readable description.
    pub description: &'static str,
    /// Whether this migration has been applied.
    pub applied: bool,
}

/// Migration status for a database file, without modifying it.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatusReport {
    /// Whether the database file exists.
    pub db_exists: bool,
    /// Whether schema bootstrap is still required.
    pub needs_initialization: bool,
    /// Current schema version (`PRAGMA user_version`).
    pub current_version: i32,
    /// Target schema version.
    pub target_version: i32,
    /// All migrations with applied/pending status.
    pub entries: Vec<MigrationStatusEntry>,
}

/// Inspect a database file's migration state read-only.
pub fn migration_status(path: &Path) -> Result<MigrationStatusReport> {
    let entries = |current: i32| {
        MIGRATIONS
            .iter()
            .map(|m| MigrationStatusEntry {
                version: m.version,
                description: m.description,
                applied: m.version <= current,
            })
            .collect()
    };

    if !path.exists() {
        return Ok(MigrationStatusReport {
            db_exists: false,
            needs_initialization: true,
            current_version: 0,
            target_version: SCHEMA_VERSION,
            entries: entries(0),
        });
    }

    let conn = open_read_only(path)?;
    let current = get_user_version(&conn)?;
    let tables = load_tables(&conn)?;
    Ok(MigrationStatusReport {
        db_exists: true,
        needs_initialization: !tables.iter().any(|t| t == "operations"),
        current_version: current,
        target_version: SCHEMA_VERSION,
        entries: entries(current),
    })
}

/// Open a database file without write access.
pub fn open_read_only(path: &Path) -> Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| {
        StorageError::Database(format!("failed to open {} read-only: {e}", path.display())).into()
    })
}

// =============================================================================
// Store
// =============================================================================

/// Store configuration.
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    /// Per-session operation capacity. Inserting past it fails with
    /// `CapacityExhausted`.
    pub max_operations: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_operations: DEFAULT_MAX_OPERATIONS,
        }
    }
}

const INSERT_OPERATION_SQL: &str = "INSERT INTO operations (
    session_id, sequence_number, timestamp, operation_type,
    resource_kind, namespace, name, resource_data, error, duration_ms,
    actor_id, uid, resource_version, generation, verb
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)";

const QUERY_OPERATIONS_SQL: &str = "SELECT id, session_id, sequence_number, timestamp, operation_type,
    resource_kind, namespace, name, resource_data, error, duration_ms,
    actor_id, uid, resource_version, generation, verb
    FROM operations WHERE session_id = ?1
    ORDER BY sequence_number LIMIT ?2";

const QUERY_OPERATIONS_RANGE_SQL: &str = "SELECT id, session_id, sequence_number, timestamp, operation_type,
    resource_kind, namespace, name, resource_data, error, duration_ms,
    actor_id, uid, resource_version, generation, verb
    FROM operations WHERE session_id = ?1
    AND sequence_number BETWEEN ?2 AND ?3
    ORDER BY sequence_number LIMIT ?4";

const COUNT_SESSION_SQL: &str = "SELECT COUNT(*) FROM operations WHERE session_id = ?1";

const LIST_SESSIONS_SQL: &str = "SELECT session_id,
    MIN(timestamp) AS start_time,
    MAX(timestamp) AS end_time,
    COUNT(*) AS op_count
    FROM operations
    GROUP BY session_id
    ORDER BY start_time DESC
    LIMIT ?1";

const INSERT_SPAN_SQL: &str = "INSERT INTO reconcile_spans (
    id, session_id, actor_id, start_ts, end_ts, duration_ms,
    kind, namespace, name, trigger_uid, trigger_resource_version, trigger_reason, error
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)";

const CLOSE_SPAN_SQL: &str =
    "UPDATE reconcile_spans SET end_ts = ?2, duration_ms = ?3, error = ?4 WHERE id = ?1";

const QUERY_SPANS_SQL: &str = "SELECT id, session_id, actor_id, start_ts, end_ts, duration_ms,
    kind, namespace, name, trigger_uid, trigger_resource_version, trigger_reason, error
    FROM reconcile_spans WHERE session_id = ?1
    ORDER BY start_ts LIMIT ?2";

/// Append-only log store over a single SQLite connection.
///
/// The store owns its connection and statement cache; it is not meant to be
/// shared across threads without external serialization. Writers for
/// distinct sessions may share one store; readers should load a session into
/// memory and work on the snapshot.
pub struct Store {
    conn: Connection,
    max_operations: i64,
}

impl Store {
    /// Open (creating if necessary) the database at `path` with defaults.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Open with explicit configuration.
    pub fn open_with_config(path: &Path, config: StoreConfig) -> Result<Self> {
        let display_path = path.to_string_lossy();
        ensure_not_empty(&display_path, "database path")?;
        ensure_in_range(display_path.len() as i64, 1, MAX_DB_PATH_LEN, "database path length")?;
        ensure_in_range(
            config.max_operations,
            1,
            DEFAULT_MAX_OPERATIONS,
            "max operations",
        )?;

        let conn = Connection::open(path).map_err(|e| {
            StorageError::Database(format!("failed to open database {display_path}: {e}"))
        })?;
        let store = Self::from_connection(conn, config)?;
        tracing::debug!(path = %display_path, "log store open");
        Ok(store)
    }

    /// Open an in-memory store (tests, scratch analysis).
    pub fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with_config(StoreConfig::default())
    }

    /// Open an in-memory store with explicit configuration.
    pub fn open_in_memory_with_config(config: StoreConfig) -> Result<Self> {
        ensure_in_range(
            config.max_operations,
            1,
            DEFAULT_MAX_OPERATIONS,
            "max operations",
        )?;
        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::Database(format!("failed to open in-memory database: {e}")))?;
        Self::from_connection(conn, config)
    }

    fn from_connection(conn: Connection, config: StoreConfig) -> Result<Self> {
        initialize_schema(&conn)?;

        // All hot-path statements are prepared once here; afterwards the
        // cache serves them without re-parsing.
        conn.set_prepared_statement_cache_capacity(16);
        for sql in [
            INSERT_OPERATION_SQL,
            QUERY_OPERATIONS_SQL,
            QUERY_OPERATIONS_RANGE_SQL,
            COUNT_SESSION_SQL,
            LIST_SESSIONS_SQL,
            INSERT_SPAN_SQL,
            CLOSE_SPAN_SQL,
            QUERY_SPANS_SQL,
        ] {
            conn.prepare_cached(sql)
                .map_err(|e| StorageError::Database(format!("failed to prepare statement: {e}")))?;
        }

        Ok(Self {
            conn,
            max_operations: config.max_operations,
        })
    }

    /// Validate and persist one operation, returning the assigned row id.
    pub fn insert_operation(&self, op: &Operation) -> Result<i64> {
        validate_operation(op)?;

        let count: i64 = self
            .conn
            .prepare_cached(COUNT_SESSION_SQL)
            .and_then(|mut stmt| stmt.query_row(params![op.session_id], |row| row.get(0)))
            .map_err(|e| StorageError::Database(format!("session count failed: {e}")))?;
        if count >= self.max_operations {
            return Err(Error::CapacityExhausted(format!(
                "session {} reached max operations {}",
                op.session_id, self.max_operations
            )));
        }

        self.conn
            .prepare_cached(INSERT_OPERATION_SQL)
            .map_err(|e| Error::from(StorageError::Database(format!("insert prepare failed: {e}"))))
            .and_then(|mut stmt| {
                stmt.execute(params![
                    op.session_id,
                    op.sequence_number,
                    op.timestamp,
                    op.op_type.as_str(),
                    op.resource_kind,
                    op.namespace,
                    op.name,
                    op.resource_data,
                    op.error,
                    op.duration_ms,
                    op.actor_id,
                    op.uid,
                    op.resource_version,
                    op.generation,
                    op.verb,
                ])
                .map_err(|e| map_constraint_error("failed to insert operation", &e))
            })?;

        Ok(self.conn.last_insert_rowid())
    }

    /// All operations of a session in ascending sequence order, capped at
    /// [`MAX_QUERY_RESULTS`].
    pub fn query_operations(&self, session_id: &str) -> Result<Vec<Operation>> {
        ensure_not_empty(session_id, "session_id")?;
        let mut stmt = self
            .conn
            .prepare_cached(QUERY_OPERATIONS_SQL)
            .map_err(|e| StorageError::Database(format!("query prepare failed: {e}")))?;
        let rows = stmt
            .query_map(params![session_id, MAX_QUERY_RESULTS], row_to_operation)
            .and_then(Iterator::collect::<rusqlite::Result<Vec<Operation>>>)
            .map_err(|e| StorageError::Database(format!("operation query failed: {e}")))?;
        Ok(rows)
    }

    /// Operations of a session with `sequence_number` in `[lo, hi]`.
    pub fn query_operations_range(&self, session_id: &str, lo: i64, hi: i64) -> Result<Vec<Operation>> {
        ensure_not_empty(session_id, "session_id")?;
        ensure_in_range(lo, 0, i64::MAX, "range start")?;
        ensure(lo <= hi, "range start exceeds range end")?;
        let mut stmt = self
            .conn
            .prepare_cached(QUERY_OPERATIONS_RANGE_SQL)
            .map_err(|e| StorageError::Database(format!("range query prepare failed: {e}")))?;
        let rows = stmt
            .query_map(params![session_id, lo, hi, MAX_QUERY_RESULTS], row_to_operation)
            .and_then(Iterator::collect::<rusqlite::Result<Vec<Operation>>>)
            .map_err(|e| StorageError::Database(format!("operation range query failed: {e}")))?;
        Ok(rows)
    }

    /// All recorded sessions, newest first.
    pub fn list_sessions(&self) -> Result<Vec<SessionInfo>> {
        let mut stmt = self
            .conn
            .prepare_cached(LIST_SESSIONS_SQL)
            .map_err(|e| StorageError::Database(format!("session query prepare failed: {e}")))?;
        let rows = stmt
            .query_map(params![MAX_QUERY_RESULTS], |row| {
                Ok(SessionInfo {
                    session_id: row.get(0)?,
                    start_time: row.get(1)?,
                    end_time: row.get(2)?,
                    op_count: row.get(3)?,
                })
            })
            .and_then(Iterator::collect::<rusqlite::Result<Vec<SessionInfo>>>)
            .map_err(|e| StorageError::Database(format!("session query failed: {e}")))?;
        Ok(rows)
    }

    /// Validate and persist an open reconcile span.
    pub fn insert_span(&self, span: &ReconcileSpan) -> Result<()> {
        validate_span(span)?;
        self.conn
            .prepare_cached(INSERT_SPAN_SQL)
            .map_err(|e| Error::from(StorageError::Database(format!("span prepare failed: {e}"))))
            .and_then(|mut stmt| {
                stmt.execute(params![
                    span.id,
                    span.session_id,
                    span.actor_id,
                    span.start_ts,
                    span.end_ts,
                    span.duration_ms,
                    span.kind,
                    span.namespace,
                    span.name,
                    span.trigger_uid,
                    span.trigger_resource_version,
                    span.trigger_reason,
                    span.error,
                ])
                .map_err(|e| map_constraint_error("failed to insert span", &e))
            })?;
        Ok(())
    }

    /// Close an open span, filling `end_ts`, `duration_ms` and `error`.
    ///
    /// Closing an unknown id fails with `NotFound`; the span stays open if
    /// the update fails.
    pub fn close_span(&self, id: &str, end_ts: i64, duration_ms: i64, error: &str) -> Result<()> {
        ensure_not_empty(id, "span id")?;
        ensure_in_range(duration_ms, 0, i64::MAX, "duration_ms")?;
        let updated = self
            .conn
            .prepare_cached(CLOSE_SPAN_SQL)
            .map_err(|e| Error::from(StorageError::Database(format!("span close prepare failed: {e}"))))
            .and_then(|mut stmt| {
                stmt.execute(params![id, end_ts, duration_ms, error])
                    .map_err(|e| map_constraint_error("failed to close span", &e))
            })?;
        if updated == 0 {
            return Err(Error::NotFound(format!("span {id}")));
        }
        Ok(())
    }

    /// All spans of a session in ascending start order, capped at
    /// [`MAX_QUERY_RESULTS`].
    pub fn query_spans(&self, session_id: &str) -> Result<Vec<ReconcileSpan>> {
        ensure_not_empty(session_id, "session_id")?;
        let mut stmt = self
            .conn
            .prepare_cached(QUERY_SPANS_SQL)
            .map_err(|e| StorageError::Database(format!("span query prepare failed: {e}")))?;
        let rows = stmt
            .query_map(params![session_id, MAX_QUERY_RESULTS], row_to_span)
            .and_then(Iterator::collect::<rusqlite::Result<Vec<ReconcileSpan>>>)
            .map_err(|e| StorageError::Database(format!("span query failed: {e}")))?;
        Ok(rows)
    }

    /// Release the connection and its cached statements.
    pub fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| StorageError::Database(format!("failed to close store: {e}")).into())
    }
}

/// Map SQLite constraint violations (UNIQUE, CHECK) to validation errors;
/// everything else stays a backend failure.
fn map_constraint_error(context: &str, e: &rusqlite::Error) -> Error {
    if let rusqlite::Error::SqliteFailure(failure, message) = e {
        if failure.code == rusqlite::ErrorCode::ConstraintViolation {
            let detail = message.as_deref().unwrap_or("constraint violation");
            return Error::Validation(format!("{context}: {detail}"));
        }
    }
    StorageError::Database(format!("{context}: {e}")).into()
}

fn row_to_operation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Operation> {
    let op_type_text: String = row.get(4)?;
    let op_type = OpType::from_str(&op_type_text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    Ok(Operation {
        id: row.get(0)?,
        session_id: row.get(1)?,
        sequence_number: row.get(2)?,
        timestamp: row.get(3)?,
        op_type,
        resource_kind: row.get(5)?,
        namespace: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        name: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
        resource_data: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
        error: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
        duration_ms: row.get(10)?,
        actor_id: row.get::<_, Option<String>>(11)?.unwrap_or_default(),
        uid: row.get::<_, Option<String>>(12)?.unwrap_or_default(),
        resource_version: row.get::<_, Option<String>>(13)?.unwrap_or_default(),
        generation: row.get::<_, Option<i64>>(14)?.unwrap_or_default(),
        verb: row.get::<_, Option<String>>(15)?.unwrap_or_default(),
    })
}

fn row_to_span(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReconcileSpan> {
    Ok(ReconcileSpan {
        id: row.get(0)?,
        session_id: row.get(1)?,
        actor_id: row.get(2)?,
        start_ts: row.get(3)?,
        end_ts: row.get(4)?,
        duration_ms: row.get(5)?,
        kind: row.get(6)?,
        namespace: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
        name: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
        trigger_uid: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
        trigger_resource_version: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
        trigger_reason: row.get::<_, Option<String>>(11)?.unwrap_or_default(),
        error: row.get::<_, Option<String>>(12)?.unwrap_or_default(),
    })
}
