//! Scan session seam onto the key-value store

use super::errors::StoreResult;
use super::key::IndexEntry;
use super::request::ScanRequest;

/// A streaming scan over one table
pub trait ScanSession: Send {
    /// Next entry, `None` at end of scan
    fn next_entry(&mut self) -> Option<StoreResult<IndexEntry>>;

    /// Releases server-side resources. Called exactly once by `SessionGuard`.
    fn close(&mut self);
}

/// Opens scan sessions against named tables
pub trait ScannerFactory: Send + Sync {
    fn open_session(&self, table: &str, request: ScanRequest) -> StoreResult<Box<dyn ScanSession>>;
}

/// Owns a session and closes it when dropped, however the scan ends
pub struct SessionGuard {
    table: String,
    session: Option<Box<dyn ScanSession>>,
}

impl SessionGuard {
    pub fn new(table: impl Into<String>, session: Box<dyn ScanSession>) -> Self {
        Self {
            table: table.into(),
            session: Some(session),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn next_entry(&mut self) -> Option<StoreResult<IndexEntry>> {
        self.session.as_mut()?.next_entry()
    }

    /// Closes the session now; later calls and the drop are no-ops
    pub fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
            tracing::trace!(table = %self.table, "closed scan session");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_none()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard")
            .field("table", &self.table)
            .field("closed", &self.is_closed())
            .finish()
    }
}
