//! Storage seam for index expansion
//!
//! The engine never talks to the key-value store directly. It builds a
//! `ScanRequest` (ranges, column families, ordered filter stack), asks a
//! `ScannerFactory` for a session, and streams entries out of it.
//!
//! # Invariants
//!
//! - Sessions are closed exactly once, through `SessionGuard`
//! - A fairness filter that cuts a scan short emits a timeout sentinel entry
//!   when the sentinel filter is also stacked

mod errors;
mod key;
mod memory;
mod request;
mod session;

pub use errors::{StoreError, StoreResult};
pub use key::{
    IndexEntry, IndexKey, KeyBound, ScanRange, ANY_FIELD, EXCEEDED_TIMEOUT_VALUE, MAX_UNICODE_CHAR,
    NO_FIELD, NULL_CHAR,
};
pub use memory::MemoryIndexStore;
pub use request::{FilterDescriptor, FilterKind, ScanRequest};
pub use session::{ScanSession, ScannerFactory, SessionGuard};
