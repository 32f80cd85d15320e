//! Named precondition checks.
//!
//! Public entry points validate their arguments with these helpers instead of
//! panicking: a failed check returns [`Error::InvalidArgument`] carrying the
//! call site, so the caller sees which check tripped and where.

use crate::error::{Error, Result};

/// Fail with `message` unless `condition` holds.
#[track_caller]
pub fn ensure(condition: bool, message: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(Error::invalid_argument(message))
    }
}

/// Fail unless `value` is a non-empty string. `name` is the argument name
/// reported in the error.
#[track_caller]
pub fn ensure_not_empty(value: &str, name: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::invalid_argument(format!("{name} is empty")));
    }
    Ok(())
}

/// Fail unless `lo <= value <= hi`.
#[track_caller]
pub fn ensure_in_range(value: i64, lo: i64, hi: i64, name: &str) -> Result<()> {
    if value < lo || value > hi {
        return Err(Error::invalid_argument(format!(
            "{name} value {value} not in [{lo}, {hi}]"
        )));
    }
    Ok(())
}
