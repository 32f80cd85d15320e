//! Offline analysis over a session's recorded operations.
//!
//! Every analysis works on an in-memory slice, never streams, and has a hard
//! ceiling on both the work done and the number of results produced. Hitting
//! a result ceiling truncates silently; it is an anticipated outcome, not an
//! error.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::assert::ensure_in_range;
use crate::error::Result;
use crate::model::{OpType, Operation};

/// Hard cap on operations accepted by any analysis.
pub const MAX_ANALYSIS_OPERATIONS: usize = 100_000;

/// Largest loop-detection window.
pub const MAX_LOOP_WINDOW: usize = 100;

/// Cap on emitted loop patterns.
const MAX_PATTERNS: usize = 100;

/// Cap on additional window matches per pattern.
const MAX_MATCHES: usize = 10;

/// Cap on reported slow operations.
const MAX_SLOW_OPS: usize = 100;

/// Cap on distinct keys in the error-by-type tally.
const MAX_ERROR_TYPES: usize = 20;

/// Cap on distinct resource keys in the access profile.
const MAX_ACCESS_PATTERNS: usize = 1_000;

// =============================================================================
// Loop detection
// =============================================================================

/// A run of back-to-back repetitions of one window of operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pattern {
    /// Index of the first operation of the first window.
    pub start_index: usize,
    /// Index of the last operation of the last matching window.
    pub end_index: usize,
    /// Number of windows equal to the first, beyond the first itself.
    /// `2` means the template occurred three times in a row.
    pub repeat_count: usize,
    /// Resource kind of the first operation in the window.
    pub kind: String,
    /// Human-readable summary.
    pub description: String,
}

/// Find repeating operation templates.
///
/// Two windows match when every position agrees on
/// `(op_type, resource_kind, namespace, name)`. A pattern is emitted once the
/// first window repeats at least twice more back-to-back; the scan resumes
/// after the pattern so overlapping patterns are not reported.
pub fn detect_loops(ops: &[Operation], window: usize) -> Result<Vec<Pattern>> {
    ensure_in_range(ops.len() as i64, 0, MAX_ANALYSIS_OPERATIONS as i64, "operation count")?;
    ensure_in_range(window as i64, 2, MAX_LOOP_WINDOW as i64, "window size")?;

    let mut patterns = Vec::new();
    let mut i = 0;
    while i + 2 * window <= ops.len() && patterns.len() < MAX_PATTERNS {
        match pattern_at(ops, i, window) {
            Some(pattern) => {
                i = pattern.end_index + 1;
                patterns.push(pattern);
            }
            None => i += 1,
        }
    }
    Ok(patterns)
}

/// Check for a repeating window starting at `start`.
fn pattern_at(ops: &[Operation], start: usize, window: usize) -> Option<Pattern> {
    let mut matches = 0;
    while matches < MAX_MATCHES {
        let candidate = start + (matches + 1) * window;
        if candidate + window > ops.len() || !windows_equal(ops, start, candidate, window) {
            break;
        }
        matches += 1;
    }
    if matches < 2 {
        return None;
    }

    let kind = ops[start].resource_kind.clone();
    Some(Pattern {
        start_index: start,
        end_index: start + (matches + 1) * window - 1,
        repeat_count: matches,
        description: format!("Repeated {kind} operations"),
        kind,
    })
}

/// Position-wise template equality of `ops[a..a+len]` and `ops[b..b+len]`.
fn windows_equal(ops: &[Operation], a: usize, b: usize, len: usize) -> bool {
    (0..len).all(|offset| {
        let lhs = &ops[a + offset];
        let rhs = &ops[b + offset];
        lhs.op_type == rhs.op_type
            && lhs.resource_kind == rhs.resource_kind
            && lhs.namespace == rhs.namespace
            && lhs.name == rhs.name
    })
}

// =============================================================================
// Slow operations
// =============================================================================

/// One operation whose duration met the threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlowOperation {
    /// Index of the operation in the analyzed slice.
    pub index: usize,
    /// Duration of the call in milliseconds.
    pub duration_ms: i64,
    /// The operation itself.
    pub operation: Operation,
}

/// All operations with `duration_ms >= threshold_ms`, in original order,
/// truncated at 100.
pub fn find_slow_operations(ops: &[Operation], threshold_ms: i64) -> Result<Vec<SlowOperation>> {
    ensure_in_range(ops.len() as i64, 0, MAX_ANALYSIS_OPERATIONS as i64, "operation count")?;
    ensure_in_range(threshold_ms, 1, 1_000_000, "threshold milliseconds")?;

    let mut slow = Vec::new();
    for (index, op) in ops.iter().enumerate() {
        if slow.len() >= MAX_SLOW_OPS {
            break;
        }
        if op.duration_ms >= threshold_ms {
            slow.push(SlowOperation {
                index,
                duration_ms: op.duration_ms,
                operation: op.clone(),
            });
        }
    }
    Ok(slow)
}

// =============================================================================
// Error aggregation
// =============================================================================

/// Summary of failed operations in a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorSummary {
    /// Total failed operations.
    pub total_errors: usize,
    /// Failures per operation type, capped at 20 distinct keys; later
    /// distinct keys are dropped silently.
    pub errors_by_type: BTreeMap<String, usize>,
    /// Earliest failed operation.
    pub first_error: Option<Operation>,
    /// Latest failed operation.
    pub last_error: Option<Operation>,
}

/// Single-pass error tally.
pub fn analyze_errors(ops: &[Operation]) -> Result<ErrorSummary> {
    ensure_in_range(ops.len() as i64, 0, MAX_ANALYSIS_OPERATIONS as i64, "operation count")?;

    let mut summary = ErrorSummary::default();
    for op in ops {
        if op.error.is_empty() {
            continue;
        }
        summary.total_errors += 1;
        if summary.first_error.is_none() {
            summary.first_error = Some(op.clone());
        }
        summary.last_error = Some(op.clone());

        let key = op.op_type.as_str();
        if summary.errors_by_type.contains_key(key) || summary.errors_by_type.len() < MAX_ERROR_TYPES
        {
            *summary.errors_by_type.entry(key.to_string()).or_insert(0) += 1;
        }
    }
    Ok(summary)
}

// =============================================================================
// Resource access profile
// =============================================================================

/// Read/write profile of one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResourceAccessPattern {
    /// `{kind}/{ns}/{name}` key.
    pub resource_key: String,
    /// GET/LIST calls against the resource.
    pub read_count: usize,
    /// CREATE/UPDATE/PATCH/DELETE calls against the resource.
    pub write_count: usize,
    /// Timestamp of the first recorded access, epoch seconds.
    pub first_access: i64,
    /// Timestamp of the latest recorded access, epoch seconds.
    pub last_access: i64,
}

/// Single-pass access profile, bounded at 1000 distinct resources; later
/// distinct keys are dropped silently while known keys keep counting.
pub fn analyze_resource_access(
    ops: &[Operation],
) -> Result<BTreeMap<String, ResourceAccessPattern>> {
    ensure_in_range(ops.len() as i64, 0, MAX_ANALYSIS_OPERATIONS as i64, "operation count")?;

    let mut profiles: BTreeMap<String, ResourceAccessPattern> = BTreeMap::new();
    for op in ops {
        let key = op.resource_key();
        if !profiles.contains_key(&key) {
            if profiles.len() >= MAX_ACCESS_PATTERNS {
                continue;
            }
            profiles.insert(
                key.clone(),
                ResourceAccessPattern {
                    resource_key: key.clone(),
                    first_access: op.timestamp,
                    ..ResourceAccessPattern::default()
                },
            );
        }
        if let Some(profile) = profiles.get_mut(&key) {
            if op.op_type.is_read() {
                profile.read_count += 1;
            } else if op.op_type.is_write() {
                profile.write_count += 1;
            }
            profile.last_access = op.timestamp;
        }
    }
    Ok(profiles)
}

// =============================================================================
// Analysis report
// =============================================================================

/// Slow-operation entry in the external report.
#[derive(Debug, Clone, Serialize)]
pub struct SlowOperationEntry {
    /// Index of the operation in the session.
    pub index: usize,
    /// Operation type.
    #[serde(rename = "type")]
    pub op_type: OpType,
    /// `{kind}/{ns}/{name}` of the target.
    pub resource: String,
    /// Call duration in milliseconds.
    pub duration_ms: i64,
}

/// Loop entry in the external report.
#[derive(Debug, Clone, Serialize)]
pub struct LoopEntry {
    /// First operation of the pattern.
    pub start_index: usize,
    /// Last operation of the pattern.
    pub end_index: usize,
    /// Additional windows matching the first.
    pub repeat_count: usize,
    /// Human-readable summary.
    pub description: String,
}

/// Error section of the external report.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorsSection {
    /// Total failed operations.
    pub total: usize,
    /// Failures per operation type.
    pub by_type: BTreeMap<String, usize>,
}

/// Combined analysis report for external consumers.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    /// Session the report describes.
    pub session_id: String,
    /// Operations analyzed.
    pub total_operations: usize,
    /// Operations at or above the duration threshold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slow_operations: Option<Vec<SlowOperationEntry>>,
    /// Detected repetition patterns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loops_detected: Option<Vec<LoopEntry>>,
    /// Error aggregate; absent when the session had no failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<ErrorsSection>,
}

impl AnalysisReport {
    /// Run all analyses over one session's operations.
    pub fn build(
        session_id: &str,
        ops: &[Operation],
        loop_window: usize,
        slow_threshold_ms: i64,
    ) -> Result<Self> {
        let slow = find_slow_operations(ops, slow_threshold_ms)?;
        let loops = detect_loops(ops, loop_window)?;
        let errors = analyze_errors(ops)?;

        Ok(Self {
            session_id: session_id.to_string(),
            total_operations: ops.len(),
            slow_operations: (!slow.is_empty()).then(|| {
                slow.iter()
                    .map(|s| SlowOperationEntry {
                        index: s.index,
                        op_type: s.operation.op_type,
                        resource: s.operation.resource_key(),
                        duration_ms: s.duration_ms,
                    })
                    .collect()
            }),
            loops_detected: (!loops.is_empty()).then(|| {
                loops
                    .iter()
                    .map(|p| LoopEntry {
                        start_index: p.start_index,
                        end_index: p.end_index,
                        repeat_count: p.repeat_count,
                        description: p.description.clone(),
                    })
                    .collect()
            }),
            errors: (errors.total_errors > 0).then(|| ErrorsSection {
                total: errors.total_errors,
                by_type: errors.errors_by_type.clone(),
            }),
        })
    }
}
