//! Shared dashboard state: the unit store plus the active log session.
//!
//! A single reducer task owns writes; everything else reads snapshots
//! through an `RwLock`.

use crate::logbuf::LogSession;
use crate::store::UnitStore;

#[derive(Debug)]
pub struct DashState {
    pub store: UnitStore,
    /// At most one log session at a time, bound to the focused unit.
    pub session: Option<LogSession>,
    pub last_event_id: u64,
    /// Operator-facing transient notice (scan failure, restart failure).
    pub notice: Option<String>,
    /// Capacity for new session buffers.
    pub log_cap: usize,
}

impl DashState {
    pub fn new(evict_after: u32, log_cap: usize) -> Self {
        Self {
            store: UnitStore::new(evict_after),
            session: None,
            last_event_id: 0,
            notice: None,
            log_cap: log_cap.max(1),
        }
    }

    /// The session, if it belongs to `id`.
    pub fn session_for(&self, id: &str) -> Option<&LogSession> {
        self.session.as_ref().filter(|s| s.is_for(id))
    }
}
