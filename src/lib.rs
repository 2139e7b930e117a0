//! term-expansion - threshold-bounded index-term expansion
//!
//! Turns an unfielded literal, a regular expression or a bounded range into a
//! bounded set of concrete (field, value) pairs by scanning a global inverted
//! index, under a wall-clock budget.
//!
//! # Subsystems
//!
//! - `range`: regex analysis, forward/reverse index selection, scan ranges and
//!   the server-side filter stack
//! - `lookup`: result maps, expansion tasks, the timed-wait coordinator and
//!   the per-query expansion cache
//! - `store`: the scan-session seam onto the key-value store, plus an
//!   in-memory index used for tests and local runs
//! - `metadata`: which fields are forward and/or reverse indexed
//! - `config`: query-wide expansion settings

pub mod config;
pub mod lookup;
pub mod metadata;
pub mod observability;
pub mod range;
pub mod store;
