//! Record types for recorded API operations and reconcile spans.
//!
//! Conventions:
//! - Timestamps are epoch seconds (`i64`); durations are carried separately
//!   in milliseconds so sub-second calls keep their accuracy.
//! - Enrichment fields (`actor_id`, `uid`, `resource_version`, `generation`,
//!   `verb`) may be absent on records written by older recorders; an empty
//!   string (or zero generation) means "not captured".
//! - Resource kinds are opaque strings; the log does not interpret them.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// =============================================================================
// Field limits
// =============================================================================

/// Maximum `session_id` length accepted from a recorder.
pub const MAX_SESSION_ID_LEN: usize = 100;
/// Maximum serialized operation-type length.
pub const MAX_OP_TYPE_LEN: usize = 20;
/// Maximum resource kind length.
pub const MAX_RESOURCE_KIND_LEN: usize = 100;
/// Maximum namespace length (DNS subdomain bound).
pub const MAX_NAMESPACE_LEN: usize = 253;
/// Maximum object name length (DNS subdomain bound).
pub const MAX_NAME_LEN: usize = 253;
/// Maximum actor identifier length.
pub const MAX_ACTOR_ID_LEN: usize = 256;
/// Maximum object UID length.
pub const MAX_UID_LEN: usize = 128;
/// Maximum resource version length.
pub const MAX_RESOURCE_VERSION_LEN: usize = 128;
/// Maximum verb length.
pub const MAX_VERB_LEN: usize = 20;
/// Maximum span identifier length.
pub const MAX_SPAN_ID_LEN: usize = 128;
/// Maximum serialized payload size per operation (1 MiB).
pub const MAX_DATA_LEN: usize = 1_048_576;
/// Maximum recorded error message length.
pub const MAX_ERROR_LEN: usize = 10_000;
/// Maximum trigger reason length.
pub const MAX_TRIGGER_REASON_LEN: usize = 512;

/// Actor recorded when the caller did not identify itself.
pub const DEFAULT_ACTOR_ID: &str = "unknown";

/// Current wall clock as epoch seconds.
#[must_use]
pub fn now_s() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| i64::try_from(d.as_secs()).ok())
        .unwrap_or(0)
}

// =============================================================================
// Operation
// =============================================================================

/// Kind of recorded API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OpType {
    Get,
    List,
    Create,
    Update,
    Patch,
    Delete,
    Watch,
}

impl OpType {
    /// Wire/storage spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::List => "LIST",
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Watch => "WATCH",
        }
    }

    /// GET and LIST are reads.
    #[must_use]
    pub const fn is_read(self) -> bool {
        matches!(self, Self::Get | Self::List)
    }

    /// CREATE, UPDATE, PATCH and DELETE mutate the target object.
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Patch | Self::Delete)
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "GET" => Ok(Self::Get),
            "LIST" => Ok(Self::List),
            "CREATE" => Ok(Self::Create),
            "UPDATE" => Ok(Self::Update),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            "WATCH" => Ok(Self::Watch),
            other => Err(Error::Validation(format!("unknown operation type: {other}"))),
        }
    }
}

/// One recorded call against the object API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Row identifier assigned by the store on insert; 0 before insertion.
    pub id: i64,
    /// Recording run this operation belongs to.
    pub session_id: String,
    /// Monotonic per-session counter; unique within the session.
    pub sequence_number: i64,
    /// Wall clock at call time, epoch seconds.
    pub timestamp: i64,
    /// Call kind.
    pub op_type: OpType,
    /// Kind of the target object (opaque).
    pub resource_kind: String,
    /// Namespace of the target object; may be empty for cluster-scoped kinds.
    pub namespace: String,
    /// Name of the target object; may be empty for LIST/WATCH.
    pub name: String,
    /// Serialized object payload; empty when the call returned no object.
    pub resource_data: String,
    /// Error message when the call failed, empty on success.
    pub error: String,
    /// Elapsed time of the recorded call in milliseconds.
    pub duration_ms: i64,
    /// Controller that performed the call.
    pub actor_id: String,
    /// Object UID captured at call time; empty when not captured.
    pub uid: String,
    /// Object resourceVersion captured at call time; empty when not captured.
    pub resource_version: String,
    /// Object generation captured at call time; 0 when not captured.
    pub generation: i64,
    /// API verb as reported by the client; empty when not captured.
    pub verb: String,
}

impl Operation {
    /// `"{kind}/{ns}/{name}"` key identifying the target object.
    #[must_use]
    pub fn resource_key(&self) -> String {
        format!("{}/{}/{}", self.resource_kind, self.namespace, self.name)
    }
}

// =============================================================================
// Reconcile span
// =============================================================================

/// One controller reconcile invocation.
///
/// A span is inserted open (`end_ts` absent) and closed later; closing fills
/// `end_ts`, `duration_ms` and, on failure, `error`. No other field is ever
/// updated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileSpan {
    /// Externally supplied identifier, globally unique.
    pub id: String,
    /// Recording run this span belongs to.
    pub session_id: String,
    /// Controller performing the reconcile.
    pub actor_id: String,
    /// Reconcile start, epoch seconds.
    pub start_ts: i64,
    /// Reconcile end, epoch seconds; absent while the span is open.
    pub end_ts: Option<i64>,
    /// Elapsed reconcile time in milliseconds; absent while the span is open.
    pub duration_ms: Option<i64>,
    /// Kind of the reconciled object.
    pub kind: String,
    /// Namespace of the reconciled object.
    pub namespace: String,
    /// Name of the reconciled object.
    pub name: String,
    /// UID of the object whose event triggered this reconcile; may be empty.
    pub trigger_uid: String,
    /// resourceVersion of the triggering event; may be empty.
    pub trigger_resource_version: String,
    /// Free-form trigger description; may be empty.
    pub trigger_reason: String,
    /// Error message when the reconcile failed, empty otherwise.
    pub error: String,
}

impl ReconcileSpan {
    /// True while the span has not been closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.end_ts.is_none()
    }
}

/// Basic metadata for one recording run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session identifier.
    pub session_id: String,
    /// Earliest operation timestamp, epoch seconds.
    pub start_time: i64,
    /// Latest operation timestamp, epoch seconds.
    pub end_time: i64,
    /// Number of operations recorded in the session.
    pub op_count: i64,
}

// =============================================================================
// Validation
// =============================================================================

fn check(condition: bool, message: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(Error::Validation(message.to_string()))
    }
}

/// Check an operation against the declared field invariants.
///
/// Called by the store before every insert; also usable by recorders that
/// want to reject a record before handing it over.
pub fn validate_operation(op: &Operation) -> Result<()> {
    check(!op.session_id.is_empty(), "session_id is empty")?;
    check(
        !op.resource_kind.is_empty() && op.resource_kind.len() <= MAX_RESOURCE_KIND_LEN,
        "resource_kind is empty or exceeds max length",
    )?;
    check(
        op.namespace.len() <= MAX_NAMESPACE_LEN,
        "namespace exceeds max length",
    )?;
    check(op.name.len() <= MAX_NAME_LEN, "name exceeds max length")?;
    check(
        op.resource_data.len() <= MAX_DATA_LEN,
        "resource_data exceeds max length",
    )?;
    check(op.error.len() <= MAX_ERROR_LEN, "error exceeds max length")?;
    check(op.duration_ms >= 0, "duration_ms must be non-negative")?;
    check(
        op.actor_id.len() <= MAX_ACTOR_ID_LEN,
        "actor_id exceeds max length",
    )?;
    check(op.uid.len() <= MAX_UID_LEN, "uid exceeds max length")?;
    check(
        op.resource_version.len() <= MAX_RESOURCE_VERSION_LEN,
        "resource_version exceeds max length",
    )?;
    check(op.verb.len() <= MAX_VERB_LEN, "verb exceeds max length")?;
    check(op.generation >= 0, "generation must be non-negative")?;
    Ok(())
}

/// Check a reconcile span against the declared field invariants.
pub fn validate_span(span: &ReconcileSpan) -> Result<()> {
    check(
        !span.id.is_empty() && span.id.len() <= MAX_SPAN_ID_LEN,
        "span id is empty or exceeds max length",
    )?;
    check(!span.session_id.is_empty(), "session_id is empty")?;
    check(
        !span.actor_id.is_empty() && span.actor_id.len() <= MAX_ACTOR_ID_LEN,
        "actor_id is empty or exceeds max length",
    )?;
    check(
        !span.kind.is_empty() && span.kind.len() <= MAX_RESOURCE_KIND_LEN,
        "kind is empty or exceeds max length",
    )?;
    check(
        span.namespace.len() <= MAX_NAMESPACE_LEN,
        "namespace exceeds max length",
    )?;
    check(span.name.len() <= MAX_NAME_LEN, "name exceeds max length")?;
    check(
        span.trigger_uid.len() <= MAX_UID_LEN,
        "trigger_uid exceeds max length",
    )?;
    check(
        span.trigger_resource_version.len() <= MAX_RESOURCE_VERSION_LEN,
        "trigger_resource_version exceeds max length",
    )?;
    check(
        span.trigger_reason.len() <= MAX_TRIGGER_REASON_LEN,
        "trigger_reason exceeds max length",
    )?;
    check(span.error.len() <= MAX_ERROR_LEN, "error exceeds max length")?;
    if let Some(duration) = span.duration_ms {
        check(duration >= 0, "duration_ms must be non-negative")?;
        check(span.end_ts.is_some(), "duration_ms set without end_ts")?;
    }
    if let (Some(end), start) = (span.end_ts, span.start_ts) {
        check(end >= start, "end_ts precedes start_ts")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_operation(session: &str, seq: i64) -> Operation {
        Operation {
            id: 0,
            session_id: session.to_string(),
            sequence_number: seq,
            timestamp: 1_700_000_000,
            op_type: OpType::Get,
            resource_kind: "Pod".to_string(),
            namespace: "default".to_string(),
            name: "web-0".to_string(),
            resource_data: String::new(),
            error: String::new(),
            duration_ms: 12,
            actor_id: "demo/controller".to_string(),
            uid: String::new(),
            resource_version: String::new(),
            generation: 0,
            verb: String::new(),
        }
    }

    #[test]
    fn op_type_roundtrips_through_str() {
        for op_type in [
            OpType::Get,
            OpType::List,
            OpType::Create,
            OpType::Update,
            OpType::Patch,
            OpType::Delete,
            OpType::Watch,
        ] {
            assert_eq!(op_type.as_str().parse::<OpType>().unwrap(), op_type);
        }
        assert!("APPLY".parse::<OpType>().is_err());
    }

    #[test]
    fn reads_and_writes_partition() {
        assert!(OpType::Get.is_read());
        assert!(OpType::List.is_read());
        assert!(OpType::Create.is_write());
        assert!(OpType::Patch.is_write());
        assert!(!OpType::Watch.is_read());
        assert!(!OpType::Watch.is_write());
    }

    #[test]
    fn valid_operation_passes() {
        assert!(validate_operation(&sample_operation("s1", 1)).is_ok());
    }

    #[test]
    fn operation_rejects_empty_session() {
        let mut op = sample_operation("s1", 1);
        op.session_id.clear();
        assert!(validate_operation(&op).is_err());
    }

    #[test]
    fn operation_rejects_oversized_error() {
        let mut op = sample_operation("s1", 1);
        op.error = "x".repeat(MAX_ERROR_LEN + 1);
        let err = validate_operation(&op).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn operation_rejects_negative_duration() {
        let mut op = sample_operation("s1", 1);
        op.duration_ms = -1;
        assert!(validate_operation(&op).is_err());
    }

    #[test]
    fn span_requires_end_when_duration_set() {
        let span = ReconcileSpan {
            id: "abc".to_string(),
            session_id: "s1".to_string(),
            actor_id: "demo/controller".to_string(),
            start_ts: 100,
            end_ts: None,
            duration_ms: Some(5),
            kind: "Pod".to_string(),
            namespace: "default".to_string(),
            name: "web-0".to_string(),
            trigger_uid: String::new(),
            trigger_resource_version: String::new(),
            trigger_reason: String::new(),
            error: String::new(),
        };
        assert!(validate_span(&span).is_err());
    }

    #[test]
    fn span_rejects_end_before_start() {
        let span = ReconcileSpan {
            id: "abc".to_string(),
            session_id: "s1".to_string(),
            actor_id: "demo/controller".to_string(),
            start_ts: 100,
            end_ts: Some(99),
            duration_ms: None,
            kind: "Pod".to_string(),
            namespace: "default".to_string(),
            name: "web-0".to_string(),
            trigger_uid: String::new(),
            trigger_resource_version: String::new(),
            trigger_reason: String::new(),
            error: String::new(),
        };
        assert!(validate_span(&span).is_err());
    }

    #[test]
    fn op_type_serializes_uppercase() {
        let json = serde_json::to_string(&OpType::Create).unwrap();
        assert_eq!(json, "\"CREATE\"");
    }
}
