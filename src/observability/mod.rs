//! Logging setup
//!
//! The engine logs through `tracing` macros with structured fields
//! (`task_id`, `kind`, `pattern`, `table`). Embedding applications normally
//! install their own subscriber; `init_tracing` is for tests, tools and
//! applications that have none.
//!
//! # Principles
//!
//! 1. Logging is read-only: it never changes lookup outcomes
//! 2. Initialization is idempotent; a second call is a no-op

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "term_expansion=info";

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs a global text subscriber filtered by `RUST_LOG`.
///
/// Returns false when a global subscriber was already installed.
pub fn init_tracing() -> bool {
    init_tracing_with(LogFormat::Text)
}

/// Installs a global subscriber in the given format
pub fn init_tracing_with(format: LogFormat) -> bool {
    let registry = tracing_subscriber::registry().with(env_filter());
    let result = match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    };
    result.is_ok()
}
