//! Recording boundary: how an interceptor feeds the log store.
//!
//! The recorder does not talk to any cluster itself. An external client
//! wrapper performs the actual API calls and hands the outcome of each call
//! to [`Recorder::record`], which assigns the session sequence number and
//! persists a validated operation. Reconcile instrumentation uses
//! [`Recorder::start_span`] / [`Recorder::end_span`].
//!
//! One recorder instance owns one session's sequence counter; inserts go
//! through it serially. Concurrent recorders must use distinct sessions.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Instant;

use crate::assert::{ensure_in_range, ensure_not_empty};
use crate::error::{Error, Result};
use crate::model::{
    DEFAULT_ACTOR_ID, MAX_ACTOR_ID_LEN, MAX_SESSION_ID_LEN, OpType, Operation, ReconcileSpan,
    now_s,
};
use crate::storage::Store;

/// Default sequence capacity per recorder instance.
pub const DEFAULT_MAX_SEQUENCE: i64 = 1_000_000;

/// Cap on concurrently tracked open spans.
const MAX_OPEN_SPANS: usize = 10_000;

/// Recorder configuration, immutable after construction.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Session all records are grouped under. Required, at most 100 chars.
    pub session_id: String,
    /// Sequence numbers above this fail with `CapacityExhausted`;
    /// 0 selects [`DEFAULT_MAX_SEQUENCE`].
    pub max_sequence: i64,
    /// Controller identity stamped on every record; empty selects
    /// `"unknown"`.
    pub actor_id: String,
}

impl RecorderConfig {
    /// Config for `session_id` with default capacity and actor.
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            max_sequence: DEFAULT_MAX_SEQUENCE,
            actor_id: String::new(),
        }
    }

    /// Set the recording actor.
    #[must_use]
    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = actor_id.into();
        self
    }

    /// Set the sequence capacity.
    #[must_use]
    pub fn with_max_sequence(mut self, max_sequence: i64) -> Self {
        self.max_sequence = max_sequence;
        self
    }
}

/// Outcome of one intercepted API call, as reported by the client wrapper.
#[derive(Debug, Clone, Default)]
pub struct RecordedCall {
    /// Call kind.
    pub op_type: Option<OpType>,
    /// Kind of the target object (opaque string).
    pub resource_kind: String,
    /// Namespace of the target.
    pub namespace: String,
    /// Name of the target.
    pub name: String,
    /// Serialized object payload; empty when the call returned no object.
    pub resource_data: String,
    /// Error message when the call failed.
    pub error: String,
    /// Elapsed call time in milliseconds.
    pub duration_ms: i64,
    /// Object UID, when the call returned an object.
    pub uid: String,
    /// Object resourceVersion, when the call returned an object.
    pub resource_version: String,
    /// Object generation, when the call returned an object.
    pub generation: i64,
    /// API verb reported by the client.
    pub verb: String,
}

impl RecordedCall {
    /// A call of `op_type` against `kind/namespace/name`.
    #[must_use]
    pub fn new(op_type: OpType, kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            op_type: Some(op_type),
            resource_kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            ..Self::default()
        }
    }
}

/// Trigger metadata attached to a reconcile span at open.
#[derive(Debug, Clone, Default)]
pub struct SpanTrigger {
    /// UID of the object whose event caused the reconcile.
    pub uid: String,
    /// resourceVersion of the triggering event.
    pub resource_version: String,
    /// Free-form reason.
    pub reason: String,
}

/// Session-scoped producer of operations and reconcile spans.
pub struct Recorder {
    session_id: String,
    actor_id: String,
    sequence: i64,
    max_sequence: i64,
    enabled: bool,
    open_spans: HashMap<String, SpanClock>,
}

/// Start bookkeeping for an open span.
struct SpanClock {
    started: Instant,
}

impl Recorder {
    /// Validate `config` and build a recorder with its counter at zero.
    pub fn new(config: RecorderConfig) -> Result<Self> {
        ensure_not_empty(&config.session_id, "session_id")?;
        ensure_in_range(
            config.session_id.len() as i64,
            1,
            MAX_SESSION_ID_LEN as i64,
            "session_id length",
        )?;
        let max_sequence = if config.max_sequence == 0 {
            DEFAULT_MAX_SEQUENCE
        } else {
            config.max_sequence
        };
        ensure_in_range(max_sequence, 1, DEFAULT_MAX_SEQUENCE, "max sequence")?;

        let actor_id = if config.actor_id.is_empty() {
            DEFAULT_ACTOR_ID.to_string()
        } else {
            config.actor_id
        };
        ensure_in_range(actor_id.len() as i64, 1, MAX_ACTOR_ID_LEN as i64, "actor_id length")?;

        Ok(Self {
            session_id: config.session_id,
            actor_id,
            sequence: 0,
            max_sequence,
            enabled: true,
            open_spans: HashMap::new(),
        })
    }

    /// Session this recorder writes to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Last assigned sequence number (0 before the first record).
    #[must_use]
    pub fn sequence_number(&self) -> i64 {
        self.sequence
    }

    /// Turn recording on.
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Turn recording off. Calls keep happening, nothing is persisted.
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Whether records are currently persisted.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Persist one intercepted call.
    ///
    /// Returns the stored row id, or `None` when recording is disabled.
    /// The sequence counter advances before the store is asked to persist,
    /// so a failed insert burns its number and the next record uses the
    /// following one.
    pub fn record(&mut self, store: &Store, call: RecordedCall) -> Result<Option<i64>> {
        if !self.enabled {
            return Ok(None);
        }
        let Some(op_type) = call.op_type else {
            return Err(Error::invalid_argument("operation type is required"));
        };
        ensure_not_empty(&call.resource_kind, "resource kind")?;

        if self.sequence >= self.max_sequence {
            return Err(Error::CapacityExhausted(format!(
                "max sequence number reached: {}",
                self.max_sequence
            )));
        }
        self.sequence += 1;

        let op = Operation {
            id: 0,
            session_id: self.session_id.clone(),
            sequence_number: self.sequence,
            timestamp: now_s(),
            op_type,
            resource_kind: call.resource_kind,
            namespace: call.namespace,
            name: call.name,
            resource_data: call.resource_data,
            error: call.error,
            duration_ms: call.duration_ms,
            actor_id: self.actor_id.clone(),
            uid: call.uid,
            resource_version: call.resource_version,
            generation: call.generation,
            verb: call.verb,
        };
        let id = store.insert_operation(&op)?;
        Ok(Some(id))
    }

    /// Open a reconcile span and return its generated id.
    ///
    /// Span ids come from a CSPRNG (128 random bits, hex), so they are
    /// globally unique for any realistic number of reconciles.
    pub fn start_span(
        &mut self,
        store: &Store,
        kind: &str,
        namespace: &str,
        name: &str,
        trigger: SpanTrigger,
    ) -> Result<String> {
        ensure_not_empty(kind, "kind")?;

        let span_id = new_span_id();
        let span = ReconcileSpan {
            id: span_id.clone(),
            session_id: self.session_id.clone(),
            actor_id: self.actor_id.clone(),
            start_ts: now_s(),
            end_ts: None,
            duration_ms: None,
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            trigger_uid: trigger.uid,
            trigger_resource_version: trigger.resource_version,
            trigger_reason: trigger.reason,
            error: String::new(),
        };
        store.insert_span(&span)?;

        // Track the start so end_span can report a millisecond duration.
        // An untracked span still closes, just with duration 0.
        if self.open_spans.len() < MAX_OPEN_SPANS {
            self.open_spans.insert(
                span_id.clone(),
                SpanClock {
                    started: Instant::now(),
                },
            );
        } else {
            tracing::warn!(span_id = %span_id, "open-span tracking full; duration will be 0");
        }

        Ok(span_id)
    }

    /// Close a span, recording its duration and outcome.
    pub fn end_span(&mut self, store: &Store, span_id: &str, error: &str) -> Result<()> {
        ensure_not_empty(span_id, "span id")?;

        let duration_ms = self
            .open_spans
            .remove(span_id)
            .map(|clock| i64::try_from(clock.started.elapsed().as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0);

        store.close_span(span_id, now_s(), duration_ms, error)
    }
}

/// 128-bit random identifier, lower-hex.
fn new_span_id() -> String {
    let bytes: [u8; 16] = rand::random();
    let mut id = String::with_capacity(32);
    for byte in bytes {
        let _ = write!(id, "{byte:02x}");
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OpType;
    use crate::storage::Store;

    fn recorder(session: &str) -> Recorder {
        Recorder::new(RecorderConfig::new(session).with_actor("demo/controller")).unwrap()
    }

    fn get_call() -> RecordedCall {
        let mut call = RecordedCall::new(OpType::Get, "Pod", "default", "web-0");
        call.duration_ms = 7;
        call
    }

    #[test]
    fn config_rejects_bad_session_ids() {
        assert!(Recorder::new(RecorderConfig::new("")).is_err());
        assert!(Recorder::new(RecorderConfig::new("s".repeat(101))).is_err());
        assert!(Recorder::new(RecorderConfig::new("ok")).is_ok());
    }

    #[test]
    fn config_defaults_actor_to_unknown() {
        let store = Store::open_in_memory().unwrap();
        let mut rec = Recorder::new(RecorderConfig::new("s1")).unwrap();
        rec.record(&store, get_call()).unwrap();
        let ops = store.query_operations("s1").unwrap();
        assert_eq!(ops[0].actor_id, "unknown");
    }

    #[test]
    fn config_rejects_oversized_max_sequence() {
        let config = RecorderConfig::new("s1").with_max_sequence(DEFAULT_MAX_SEQUENCE + 1);
        assert!(Recorder::new(config).is_err());
    }

    #[test]
    fn sequence_numbers_increase_strictly() {
        let store = Store::open_in_memory().unwrap();
        let mut rec = recorder("s1");
        for _ in 0..3 {
            rec.record(&store, get_call()).unwrap();
        }
        assert_eq!(rec.sequence_number(), 3);
        let ops = store.query_operations("s1").unwrap();
        let seqs: Vec<i64> = ops.iter().map(|o| o.sequence_number).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn capacity_exhausted_at_max_sequence() {
        let store = Store::open_in_memory().unwrap();
        let mut rec =
            Recorder::new(RecorderConfig::new("s1").with_max_sequence(2)).unwrap();
        rec.record(&store, get_call()).unwrap();
        rec.record(&store, get_call()).unwrap();
        let err = rec.record(&store, get_call()).unwrap_err();
        assert!(matches!(err, Error::CapacityExhausted(_)));
    }

    #[test]
    fn disabled_recorder_is_transparent() {
        let store = Store::open_in_memory().unwrap();
        let mut rec = recorder("s1");
        rec.disable();
        assert_eq!(rec.record(&store, get_call()).unwrap(), None);
        assert_eq!(rec.sequence_number(), 0);
        assert!(store.query_operations("s1").unwrap().is_empty());

        rec.enable();
        assert!(rec.record(&store, get_call()).unwrap().is_some());
    }

    #[test]
    fn failed_insert_burns_the_sequence_number() {
        let store = Store::open_in_memory().unwrap();
        let mut rec = recorder("s1");
        let mut bad = get_call();
        bad.resource_data = "x".repeat(crate::model::MAX_DATA_LEN + 1);
        assert!(rec.record(&store, bad).is_err());
        assert_eq!(rec.sequence_number(), 1);

        rec.record(&store, get_call()).unwrap();
        let ops = store.query_operations("s1").unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].sequence_number, 2);
    }

    #[test]
    fn span_lifecycle_records_trigger_and_closes() {
        let store = Store::open_in_memory().unwrap();
        let mut rec = recorder("s1");
        let span_id = rec
            .start_span(
                &store,
                "ConfigMap",
                "default",
                "cm",
                SpanTrigger {
                    uid: "u1".to_string(),
                    resource_version: "5".to_string(),
                    reason: "configmap updated".to_string(),
                },
            )
            .unwrap();
        assert_eq!(span_id.len(), 32);

        rec.end_span(&store, &span_id, "").unwrap();
        let spans = store.query_spans("s1").unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].id, span_id);
        assert_eq!(spans[0].trigger_uid, "u1");
        assert_eq!(spans[0].trigger_resource_version, "5");
        assert!(!spans[0].is_open());
        assert!(spans[0].duration_ms.unwrap() >= 0);
    }

    #[test]
    fn end_span_with_unknown_id_is_not_found() {
        let store = Store::open_in_memory().unwrap();
        let mut rec = recorder("s1");
        let err = rec.end_span(&store, "no-such-span", "").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn span_ids_are_unique_hex() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..256 {
            let id = new_span_id();
            assert_eq!(id.len(), 32);
            assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
            assert!(seen.insert(id));
        }
    }
}
