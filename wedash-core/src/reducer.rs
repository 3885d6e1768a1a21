//! Events and the reducer that folds them into `DashState`.
//!
//! Scanner, prober, dispatcher and log forwarder all publish onto one
//! broadcast bus; a single reducer task applies the envelopes in arrival
//! order, so readers always see a consistent snapshot.

use std::time::SystemTime;

use crate::logbuf::{LogSession, SessionMode};
use crate::state::DashState;
use crate::unit::{UnitId, UnitMeta, UnitStatus};

#[derive(Clone, Debug)]
pub enum CoreEvent {
    /// A scan pass finished with this candidate set.
    ScanCompleted { candidates: Vec<UnitMeta> },
    /// A scan pass failed (root unreadable after startup). Non-fatal.
    ScanFailed { message: String },
    /// A probe finished for one unit.
    ProbeCompleted {
        id: UnitId,
        status: UnitStatus,
        pid: Option<u32>,
    },
    /// A restart was accepted and is now in flight.
    RestartStarted { id: UnitId },
    /// The restart finished, failed, or timed out. Always clears Busy.
    RestartFinished {
        id: UnitId,
        error: Option<String>,
        timed_out: bool,
    },
    /// A log session was (re)opened for a unit.
    SessionOpened { id: UnitId, mode: SessionMode },
    /// One line arrived from the active session's source.
    SessionLine { id: UnitId, text: String },
    /// The session's source went away; show one notice line and close.
    SessionLost { id: UnitId, reason: String },
    /// The session was torn down (focus switch, quit).
    SessionClosed,
}

#[derive(Clone, Debug)]
pub struct EventEnvelope {
    pub id: u64,
    pub at: SystemTime,
    pub event: CoreEvent,
}

pub fn reduce(state: &mut DashState, env: &EventEnvelope) {
    state.last_event_id = env.id;

    match &env.event {
        CoreEvent::ScanCompleted { candidates } => {
            state.store.reconcile(candidates.clone());
            state.notice = None;
        }
        CoreEvent::ScanFailed { message } => {
            state.notice = Some(format!("scan failed: {}", message));
        }
        CoreEvent::ProbeCompleted { id, status, pid } => {
            state.store.apply_probe(id, *status, *pid, env.at);
        }
        CoreEvent::RestartStarted { id } => {
            state.store.set_busy(id);
        }
        CoreEvent::RestartFinished {
            id,
            error,
            timed_out,
        } => {
            state.store.clear_busy(id, *timed_out);
            if *timed_out {
                state.notice = Some(format!("restart of {} timed out", id));
            } else if let Some(e) = error {
                state.notice = Some(format!("restart of {} failed: {}", id, e));
            }
        }
        CoreEvent::SessionOpened { id, mode } => match &mut state.session {
            Some(session) if session.is_for(id) && session.mode == *mode => {
                session.reset();
            }
            _ => {
                state.session = Some(LogSession::new(id.clone(), *mode, state.log_cap));
            }
        },
        CoreEvent::SessionLine { id, text } => {
            if let Some(session) = state.session.as_mut().filter(|s| s.is_for(id)) {
                session.push_line(env.at, text.clone());
            }
        }
        CoreEvent::SessionLost { id, reason } => {
            if let Some(session) = state.session.as_mut().filter(|s| s.is_for(id)) {
                session.mark_unavailable(env.at, reason);
            }
        }
        CoreEvent::SessionClosed => {
            state.session = None;
        }
    }
}
