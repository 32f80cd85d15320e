//! Replay cursor over a loaded recording session.
//!
//! The cursor walks an immutable, in-memory sequence of operations with
//! bounded forward/backward stepping. Forward steps feed a state cache that
//! holds the most recently seen payload per resource key; the cache is a
//! bounded map, never an eviction cache, so overfilling it is an error the
//! caller has to deal with.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::assert::{ensure_in_range, ensure_not_empty};
use crate::error::{Error, Result};
use crate::model::{OpType, Operation};

/// Hard cap on operations loaded into one cursor.
pub const MAX_OPERATIONS_IN_MEMORY: usize = 100_000;

/// Largest single jump accepted by [`ReplayCursor::step_n`].
pub const MAX_STEP_SIZE: i64 = 1_000;

/// Default state-cache capacity (distinct resource keys).
pub const DEFAULT_MAX_CACHE_SIZE: usize = 1_000;

/// Aggregate statistics over a cursor's operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OperationStats {
    /// Total operations in the session.
    pub total_ops: usize,
    /// GET calls.
    pub get_ops: usize,
    /// UPDATE calls.
    pub update_ops: usize,
    /// CREATE calls.
    pub create_ops: usize,
    /// DELETE calls.
    pub delete_ops: usize,
    /// Operations that recorded an error.
    pub error_count: usize,
    /// Mean call duration in milliseconds (0 when empty).
    pub avg_duration_ms: i64,
    /// Shortest call duration in milliseconds (0 when empty).
    pub min_duration_ms: i64,
    /// Longest call duration in milliseconds (0 when empty).
    pub max_duration_ms: i64,
}

/// Cursor configuration.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Session the operations were loaded from.
    pub session_id: String,
    /// State-cache capacity; 0 selects [`DEFAULT_MAX_CACHE_SIZE`].
    pub max_cache_size: usize,
}

impl ReplayConfig {
    /// Config for `session_id` with the default cache capacity.
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
        }
    }
}

/// In-memory stepper over one session's operations.
pub struct ReplayCursor {
    operations: Vec<Operation>,
    session_id: String,
    current_index: usize,
    max_index: usize,
    state_cache: HashMap<String, Value>,
    max_cache_size: usize,
}

impl ReplayCursor {
    /// Build a cursor over `operations`, which must all belong to the
    /// configured session and stay within [`MAX_OPERATIONS_IN_MEMORY`].
    pub fn new(operations: Vec<Operation>, config: ReplayConfig) -> Result<Self> {
        ensure_not_empty(&config.session_id, "session_id")?;
        ensure_in_range(
            operations.len() as i64,
            0,
            MAX_OPERATIONS_IN_MEMORY as i64,
            "operation count",
        )?;
        let max_cache_size = if config.max_cache_size == 0 {
            DEFAULT_MAX_CACHE_SIZE
        } else {
            config.max_cache_size
        };
        let max_index = operations.len();
        Ok(Self {
            operations,
            session_id: config.session_id,
            current_index: 0,
            max_index,
            state_cache: HashMap::with_capacity(max_cache_size.min(64)),
            max_cache_size,
        })
    }

    /// Session this cursor replays.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Return the operation at the cursor and advance past it.
    ///
    /// The operation's payload (if any) is folded into the state cache.
    /// Fails at the end of the recording, and fails hard when the cache
    /// would exceed its capacity.
    pub fn step_forward(&mut self) -> Result<&Operation> {
        if self.current_index >= self.max_index {
            return Err(Error::NotFound(format!(
                "at end of replay: index {}",
                self.current_index
            )));
        }
        let index = self.current_index;
        self.current_index += 1;
        update_state_cache(
            &mut self.state_cache,
            self.max_cache_size,
            &self.operations[index],
        )?;
        Ok(&self.operations[index])
    }

    /// Move one step back and return the new current operation.
    ///
    /// The state cache is not rolled back: it tracks "most recently seen
    /// payload by key", not a materialized history.
    pub fn step_backward(&mut self) -> Result<&Operation> {
        if self.current_index == 0 {
            return Err(Error::NotFound("at beginning of replay".to_string()));
        }
        self.current_index -= 1;
        Ok(&self.operations[self.current_index])
    }

    /// Jump by `delta` operations (negative steps backward), saturating at
    /// both ends. `|delta|` must not exceed [`MAX_STEP_SIZE`].
    pub fn step_n(&mut self, delta: i64) -> Result<()> {
        ensure_in_range(delta, -MAX_STEP_SIZE, MAX_STEP_SIZE, "step count")?;
        let target = self.current_index as i64 + delta;
        self.current_index = target.clamp(0, self.max_index as i64) as usize;
        Ok(())
    }

    /// Return to the beginning and drop all cached state.
    pub fn reset(&mut self) {
        self.current_index = 0;
        self.state_cache.clear();
    }

    /// `(current_index, max_index)`.
    #[must_use]
    pub fn progress(&self) -> (usize, usize) {
        (self.current_index, self.max_index)
    }

    /// Bounds-checked random access.
    pub fn operation_at(&self, index: usize) -> Result<&Operation> {
        if self.max_index == 0 {
            return Err(Error::invalid_argument("index into empty replay"));
        }
        ensure_in_range(index as i64, 0, self.max_index as i64 - 1, "index")?;
        Ok(&self.operations[index])
    }

    /// Most recently seen payload for `{kind}/{ns}/{name}`.
    pub fn cached_resource(&self, kind: &str, namespace: &str, name: &str) -> Result<&Value> {
        ensure_not_empty(kind, "kind")?;
        let key = format!("{kind}/{namespace}/{name}");
        self.state_cache
            .get(&key)
            .ok_or_else(|| Error::NotFound(format!("resource not in cache: {key}")))
    }

    /// Number of distinct resource keys currently cached.
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.state_cache.len()
    }

    /// Single-pass statistics over all loaded operations.
    #[must_use]
    pub fn stats(&self) -> OperationStats {
        let mut stats = OperationStats {
            total_ops: self.operations.len(),
            ..OperationStats::default()
        };
        let mut total_duration: i64 = 0;
        let mut min_duration = i64::MAX;

        for op in &self.operations {
            match op.op_type {
                OpType::Get => stats.get_ops += 1,
                OpType::Update => stats.update_ops += 1,
                OpType::Create => stats.create_ops += 1,
                OpType::Delete => stats.delete_ops += 1,
                _ => {}
            }
            if !op.error.is_empty() {
                stats.error_count += 1;
            }
            total_duration += op.duration_ms;
            min_duration = min_duration.min(op.duration_ms);
            stats.max_duration_ms = stats.max_duration_ms.max(op.duration_ms);
        }

        if stats.total_ops > 0 {
            stats.avg_duration_ms = total_duration / stats.total_ops as i64;
            stats.min_duration_ms = min_duration;
        }
        stats
    }
}

/// Fold an operation's payload into the cache under its resource key.
fn update_state_cache(
    cache: &mut HashMap<String, Value>,
    max_cache_size: usize,
    op: &Operation,
) -> Result<()> {
    if op.resource_data.is_empty() {
        return Ok(());
    }
    let key = op.resource_key();
    if !cache.contains_key(&key) && cache.len() >= max_cache_size {
        return Err(Error::CapacityExhausted(format!(
            "state cache limit reached: {max_cache_size}"
        )));
    }
    let value: Value = serde_json::from_str(&op.resource_data)
        .map_err(|e| Error::Validation(format!("failed to deserialize payload for {key}: {e}")))?;
    cache.insert(key, value);
    Ok(())
}
