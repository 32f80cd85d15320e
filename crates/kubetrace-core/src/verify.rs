//! Read-only integrity verifier for a log store.
//!
//! Opens the database without write access, enumerates schema and data, and
//! reports everything it finds in one pass per check kind: broken invariants
//! as errors, degraded-but-usable conditions as warnings. The verifier never
//! stops at the first finding.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::error::{Error, Result, StorageError};
use crate::storage::{load_columns, load_indexes, load_tables, open_read_only};

/// Basic row counts for the verified database.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct VerifyStats {
    /// Distinct sessions in the operations table.
    pub sessions: i64,
    /// Total operations.
    pub operations: i64,
    /// Total reconcile spans.
    pub spans: i64,
}

/// Verification findings.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    /// Broken invariants. A non-empty list means the store is damaged.
    pub errors: Vec<String>,
    /// Suspicious but tolerated conditions.
    pub warnings: Vec<String>,
    /// Row counts.
    pub stats: VerifyStats,
}

impl VerifyReport {
    /// True when any invariant is broken.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Total number of findings.
    #[must_use]
    pub fn problem_count(&self) -> usize {
        self.errors.len() + self.warnings.len()
    }

    /// Collapse the error list into a single [`StorageError::Integrity`],
    /// or `Ok` when the store is clean.
    pub fn into_result(self) -> Result<VerifyStats> {
        if self.errors.is_empty() {
            Ok(self.stats)
        } else {
            Err(StorageError::Integrity(self.errors.join("; ")).into())
        }
    }
}

const REQUIRED_OPERATION_COLUMNS: &[&str] = &[
    "id",
    "session_id",
    "sequence_number",
    "timestamp",
    "operation_type",
    "resource_kind",
    "namespace",
    "name",
    "resource_data",
    "error",
    "duration_ms",
];

const OPTIONAL_OPERATION_COLUMNS: &[&str] =
    &["actor_id", "uid", "resource_version", "generation", "verb"];

const REQUIRED_SPAN_COLUMNS: &[&str] = &[
    "id",
    "session_id",
    "actor_id",
    "start_ts",
    "end_ts",
    "duration_ms",
    "kind",
    "namespace",
    "name",
    "trigger_uid",
    "trigger_resource_version",
    "trigger_reason",
    "error",
];

/// Limit on per-session aggregates scanned by the verifier.
const MAX_SESSION_SCAN: usize = 1_000;

/// Verify the database at `path`.
///
/// `strict` promotes missing optional columns from warnings to errors.
pub fn verify_store(path: &Path, strict: bool) -> Result<VerifyReport> {
    if !path.exists() {
        return Err(Error::NotFound(format!("database {}", path.display())));
    }
    let conn = open_read_only(path)?;
    verify_connection(&conn, strict)
}

/// Verify an already-open connection. Exposed for in-memory tests.
pub fn verify_connection(conn: &Connection, strict: bool) -> Result<VerifyReport> {
    let mut report = VerifyReport::default();

    let tables = load_tables(conn)?;
    let has_operations = tables.iter().any(|t| t == "operations");
    let has_spans = tables.iter().any(|t| t == "reconcile_spans");

    if !has_operations {
        report.errors.push("missing table: operations".to_string());
        return Ok(report);
    }
    if !has_spans {
        report
            .warnings
            .push("missing table: reconcile_spans".to_string());
    }

    check_operations_schema(conn, &mut report, strict)?;
    if has_spans {
        check_spans_schema(conn, &mut report)?;
    }

    check_operations_data(conn, &mut report)?;
    if has_spans {
        check_span_data(conn, &mut report)?;
    }

    load_stats(conn, has_spans, &mut report)?;

    tracing::debug!(
        errors = report.errors.len(),
        warnings = report.warnings.len(),
        "verification complete"
    );
    Ok(report)
}

fn check_operations_schema(conn: &Connection, report: &mut VerifyReport, strict: bool) -> Result<()> {
    let columns = load_columns(conn, "operations")?;
    for required in REQUIRED_OPERATION_COLUMNS {
        if !columns.iter().any(|c| c == required) {
            report
                .errors
                .push(format!("missing column: operations.{required}"));
        }
    }
    for optional in OPTIONAL_OPERATION_COLUMNS {
        if !columns.iter().any(|c| c == optional) {
            let finding = format!("missing column: operations.{optional}");
            if strict {
                report.errors.push(finding);
            } else {
                report.warnings.push(finding);
            }
        }
    }

    let indexes = load_indexes(conn, "operations")?;
    if !indexes.iter().any(|i| i == "idx_uid_rv") {
        report.warnings.push("missing index: idx_uid_rv".to_string());
    }
    Ok(())
}

fn check_spans_schema(conn: &Connection, report: &mut VerifyReport) -> Result<()> {
    let columns = load_columns(conn, "reconcile_spans")?;
    for required in REQUIRED_SPAN_COLUMNS {
        if !columns.iter().any(|c| c == required) {
            report
                .errors
                .push(format!("missing column: reconcile_spans.{required}"));
        }
    }
    Ok(())
}

fn check_operations_data(conn: &Connection, report: &mut VerifyReport) -> Result<()> {
    // Duplicate (session_id, sequence_number). Databases written through the
    // store cannot contain these; out-of-band writers can.
    let duplicate: Option<(String, i64, i64)> = conn
        .query_row(
            "SELECT session_id, sequence_number, COUNT(*)
             FROM operations
             GROUP BY session_id, sequence_number
             HAVING COUNT(*) > 1
             LIMIT 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()
        .map_err(|e| StorageError::Database(format!("duplicate sequence check failed: {e}")))?;
    if let Some((session, seq, count)) = duplicate {
        report.errors.push(format!(
            "duplicate sequence: session={session} seq={seq} count={count}"
        ));
    }

    let negative: i64 = conn
        .query_row("SELECT COUNT(*) FROM operations WHERE duration_ms < 0", [], |row| {
            row.get(0)
        })
        .map_err(|e| StorageError::Database(format!("negative duration check failed: {e}")))?;
    if negative > 0 {
        report
            .errors
            .push(format!("operations with negative duration_ms: {negative}"));
    }

    // Sequence gaps: contiguous [min, max] must hold count = max - min + 1.
    let mut stmt = conn
        .prepare(
            "SELECT session_id, MIN(sequence_number), MAX(sequence_number), COUNT(*)
             FROM operations GROUP BY session_id LIMIT ?1",
        )
        .map_err(|e| StorageError::Database(format!("sequence gap check failed: {e}")))?;
    let per_session = stmt
        .query_map([MAX_SESSION_SCAN as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })
        .and_then(Iterator::collect::<rusqlite::Result<Vec<_>>>)
        .map_err(|e| StorageError::Database(format!("sequence gap scan failed: {e}")))?;
    for (session, min_seq, max_seq, count) in per_session {
        let expected = max_seq - min_seq + 1;
        if expected != count {
            report.warnings.push(format!(
                "sequence gaps: session={session} expected={expected} actual={count}"
            ));
        }
    }

    // Non-decreasing timestamps along the sequence order.
    let non_monotonic: Option<String> = conn
        .query_row(
            "SELECT o1.session_id
             FROM operations o1
             JOIN operations o2
               ON o1.session_id = o2.session_id
              AND o1.sequence_number + 1 = o2.sequence_number
             WHERE o2.timestamp < o1.timestamp
             LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| StorageError::Database(format!("timestamp monotonicity check failed: {e}")))?;
    if let Some(session) = non_monotonic {
        report
            .warnings
            .push(format!("non-monotonic timestamps in session={session}"));
    }

    Ok(())
}

fn check_span_data(conn: &Connection, report: &mut VerifyReport) -> Result<()> {
    let open: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM reconcile_spans WHERE end_ts IS NULL",
            [],
            |row| row.get(0),
        )
        .map_err(|e| StorageError::Database(format!("open span check failed: {e}")))?;
    if open > 0 {
        report.warnings.push(format!("open spans: {open}"));
    }

    let negative: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM reconcile_spans WHERE duration_ms < 0",
            [],
            |row| row.get(0),
        )
        .map_err(|e| StorageError::Database(format!("negative span duration check failed: {e}")))?;
    if negative > 0 {
        report
            .errors
            .push(format!("reconcile spans with negative duration_ms: {negative}"));
    }

    let inverted: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM reconcile_spans WHERE end_ts IS NOT NULL AND end_ts < start_ts",
            [],
            |row| row.get(0),
        )
        .map_err(|e| StorageError::Database(format!("span end check failed: {e}")))?;
    if inverted > 0 {
        report
            .errors
            .push(format!("reconcile spans with end_ts before start_ts: {inverted}"));
    }

    let duration_without_end: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM reconcile_spans WHERE duration_ms IS NOT NULL AND end_ts IS NULL",
            [],
            |row| row.get(0),
        )
        .map_err(|e| StorageError::Database(format!("span duration check failed: {e}")))?;
    if duration_without_end > 0 {
        report.warnings.push(format!(
            "spans with duration_ms but missing end_ts: {duration_without_end}"
        ));
    }

    Ok(())
}

fn load_stats(conn: &Connection, has_spans: bool, report: &mut VerifyReport) -> Result<()> {
    let (sessions, operations) = conn
        .query_row(
            "SELECT COUNT(DISTINCT session_id), COUNT(*) FROM operations",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(|e| StorageError::Database(format!("operation stats failed: {e}")))?;
    report.stats.sessions = sessions;
    report.stats.operations = operations;

    if has_spans {
        report.stats.spans = conn
            .query_row("SELECT COUNT(*) FROM reconcile_spans", [], |row| row.get(0))
            .map_err(|e| StorageError::Database(format!("span stats failed: {e}")))?;
    }
    Ok(())
}
