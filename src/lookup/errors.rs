//! Lookup error types
//!
//! Error codes:
//! - EXPAND_THRESHOLD_EXCEEDED (ERROR)
//! - EXPAND_DECLINED (DECLINE)
//! - EXPAND_INVALID_RANGE (ERROR)
//! - EXPAND_STORE_FAILURE (FATAL)
//! - EXPAND_NOT_INDEXED (FATAL)
//! - EXPAND_INCONSISTENT_ENTRY (FATAL)
//! - EXPAND_EXECUTOR_SHUTDOWN (FATAL)
//! - EXPAND_INTERRUPTED (FATAL)
//! - EXPAND_TASK_FAILED (FATAL)
//! - EXPAND_CONFIG (FATAL)
//!
//! Overflow and timeouts are not errors: they are reported through the
//! result map's flags. A `Decline` tells the predicate layer to fall back to
//! unexpanded evaluation for that term.

use std::fmt;

use thiserror::Error;

use crate::store::StoreError;

use super::result_map::ExceededThreshold;

/// Severity levels for lookup errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Optimized expansion is skipped for this term; the query continues
    Decline,
    /// The operation failed but the query may continue
    Error,
    /// The query must abandon the optimized expansion path
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Decline => write!(f, "DECLINE"),
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Why a term was not expanded through the index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclineReason {
    /// Pattern is on the disallowed list (e.g. `.*`)
    DisallowedPattern,
    /// No anchored literal on either side and full-table scans are disabled
    WildcardsBothSides,
    /// Pattern could not be analyzed
    UnparseableRegex,
}

impl fmt::Display for DeclineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclineReason::DisallowedPattern => write!(f, "pattern ignored for index lookup"),
            DeclineReason::WildcardsBothSides => write!(f, "wildcards on both sides"),
            DeclineReason::UnparseableRegex => write!(f, "unparseable regex"),
        }
    }
}

/// Errors raised by range selection and expansion tasks
#[derive(Debug, Error)]
pub enum LookupError {
    #[error(transparent)]
    ExceededThreshold(#[from] ExceededThreshold),

    #[error("Optimized expansion declined for '{term}': {reason}")]
    Declined { reason: DeclineReason, term: String },

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Store access failed: {0}")]
    Store(#[from] StoreError),

    #[error("Cannot look up a non-indexed field: {0}")]
    NotIndexed(String),

    #[error("Inconsistent index entry: {0}")]
    Inconsistent(String),

    #[error("Expansion executor shut down before the task started")]
    ExecutorShutdown,

    #[error("Interrupted while waiting on expansion task: {0}")]
    Interrupted(String),

    #[error("Expansion task failed: {0}")]
    TaskFailed(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl LookupError {
    /// Create a decline signal for a term
    pub fn declined(reason: DeclineReason, term: impl Into<String>) -> Self {
        LookupError::Declined {
            reason,
            term: term.into(),
        }
    }

    /// Returns the string code for this error
    pub fn code(&self) -> &'static str {
        match self {
            LookupError::ExceededThreshold(_) => "EXPAND_THRESHOLD_EXCEEDED",
            LookupError::Declined { .. } => "EXPAND_DECLINED",
            LookupError::InvalidRange(_) => "EXPAND_INVALID_RANGE",
            LookupError::Store(_) => "EXPAND_STORE_FAILURE",
            LookupError::NotIndexed(_) => "EXPAND_NOT_INDEXED",
            LookupError::Inconsistent(_) => "EXPAND_INCONSISTENT_ENTRY",
            LookupError::ExecutorShutdown => "EXPAND_EXECUTOR_SHUTDOWN",
            LookupError::Interrupted(_) => "EXPAND_INTERRUPTED",
            LookupError::TaskFailed(_) => "EXPAND_TASK_FAILED",
            LookupError::Config(_) => "EXPAND_CONFIG",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            LookupError::Declined { .. } => Severity::Decline,
            LookupError::ExceededThreshold(_) | LookupError::InvalidRange(_) => Severity::Error,
            _ => Severity::Fatal,
        }
    }

    /// Returns whether this error must abandon the optimized expansion path
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Returns whether this is a do-not-optimize signal
    pub fn is_decline(&self) -> bool {
        self.severity() == Severity::Decline
    }
}

/// Result type for lookup operations
pub type LookupResult<T> = Result<T, LookupError>;
