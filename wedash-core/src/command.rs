//! User-issued commands and the admission gate.
//!
//! The gate enforces the per-unit Busy state machine: Idle -> Busy on an
//! accepted Restart, back to Idle on completion, with a deadline after
//! which Busy is force-cleared so a hung external call can never lock a
//! unit out permanently.

use std::collections::BTreeMap;
use std::time::{Duration, Instant, SystemTime};

use crate::store::UnitStore;
use crate::unit::UnitId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandKind {
    Follow,
    Restart,
    ShowJournal,
    ShowLast,
    Refresh,
}

impl CommandKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Follow => "follow",
            Self::Restart => "restart",
            Self::ShowJournal => "journal",
            Self::ShowLast => "last",
            Self::Refresh => "refresh",
        }
    }

    fn needs_target(&self) -> bool {
        !matches!(self, Self::Refresh)
    }
}

#[derive(Clone, Debug)]
pub struct Command {
    pub kind: CommandKind,
    pub target: Option<UnitId>,
    pub issued_at: SystemTime,
}

impl Command {
    pub fn new(kind: CommandKind, target: Option<UnitId>) -> Self {
        Self {
            kind,
            target,
            issued_at: SystemTime::now(),
        }
    }

    pub fn refresh() -> Self {
        Self::new(CommandKind::Refresh, None)
    }

    pub fn targeting(kind: CommandKind, id: impl Into<UnitId>) -> Self {
        Self::new(kind, Some(id.into()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// A mutating command is already in flight for this unit.
    Busy,
    /// The target unit is not in the store.
    InvalidTarget,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Busy => write!(f, "busy"),
            Self::InvalidTarget => write!(f, "invalid target"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    Rejected(RejectReason),
}

impl SubmitOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Admission gate: tracks in-flight restarts with their force-clear
/// deadlines. A second mutating command for a busy unit is rejected, not
/// queued.
#[derive(Debug)]
pub struct CommandGate {
    pending: BTreeMap<UnitId, Instant>,
    timeout: Duration,
}

impl CommandGate {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: BTreeMap::new(),
            timeout,
        }
    }

    /// Decide whether `cmd` may run against the current store.
    pub fn admit(&mut self, cmd: &Command, store: &UnitStore) -> SubmitOutcome {
        self.expire();

        let target = match (&cmd.target, cmd.kind.needs_target()) {
            (Some(id), _) => {
                if !store.contains(id) {
                    return SubmitOutcome::Rejected(RejectReason::InvalidTarget);
                }
                Some(id)
            }
            (None, true) => return SubmitOutcome::Rejected(RejectReason::InvalidTarget),
            (None, false) => None,
        };

        if cmd.kind == CommandKind::Restart {
            let id = target.expect("restart always has a target");
            if self.pending.contains_key(id) || store.is_busy(id) {
                return SubmitOutcome::Rejected(RejectReason::Busy);
            }
        }

        SubmitOutcome::Accepted
    }

    /// Record an accepted restart as in flight.
    pub fn begin_restart(&mut self, id: &str) {
        self.pending
            .insert(id.to_string(), Instant::now() + self.timeout);
    }

    /// Clear a completed restart (success, failure, or timeout).
    pub fn finish_restart(&mut self, id: &str) {
        self.pending.remove(id);
    }

    /// Force-clear entries past their deadline.
    pub fn expire(&mut self) {
        let now = Instant::now();
        self.pending.retain(|_, deadline| *deadline > now);
    }

    pub fn in_flight(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::UnitMeta;
    use std::path::Path;

    fn store_with(ids: &[&str]) -> UnitStore {
        let mut store = UnitStore::new(2);
        store.reconcile(
            ids.iter()
                .map(|id| UnitMeta::from_dir(Path::new("/r"), &Path::new("/r").join(id), None))
                .collect(),
        );
        store
    }

    #[test]
    fn test_concurrent_restart_rejected_busy() {
        let store = store_with(&["svc-a", "svc-b"]);
        let mut gate = CommandGate::new(Duration::from_secs(30));

        let restart_b = Command::targeting(CommandKind::Restart, "svc-b");
        assert_eq!(gate.admit(&restart_b, &store), SubmitOutcome::Accepted);
        gate.begin_restart("svc-b");

        // Second restart on svc-b while the first is in flight.
        assert_eq!(
            gate.admit(&restart_b, &store),
            SubmitOutcome::Rejected(RejectReason::Busy)
        );

        // svc-a is unaffected.
        let restart_a = Command::targeting(CommandKind::Restart, "svc-a");
        assert_eq!(gate.admit(&restart_a, &store), SubmitOutcome::Accepted);
    }

    #[test]
    fn test_unknown_target_rejected() {
        let store = store_with(&["svc-a"]);
        let mut gate = CommandGate::new(Duration::from_secs(30));
        let cmd = Command::targeting(CommandKind::Restart, "ghost");
        assert_eq!(
            gate.admit(&cmd, &store),
            SubmitOutcome::Rejected(RejectReason::InvalidTarget)
        );
    }

    #[test]
    fn test_refresh_needs_no_target() {
        let store = store_with(&[]);
        let mut gate = CommandGate::new(Duration::from_secs(30));
        assert_eq!(gate.admit(&Command::refresh(), &store), SubmitOutcome::Accepted);
    }

    #[test]
    fn test_log_commands_allowed_while_busy() {
        let store = store_with(&["svc-a"]);
        let mut gate = CommandGate::new(Duration::from_secs(30));
        gate.begin_restart("svc-a");
        let follow = Command::targeting(CommandKind::Follow, "svc-a");
        assert_eq!(gate.admit(&follow, &store), SubmitOutcome::Accepted);
    }

    #[test]
    fn test_busy_force_cleared_after_deadline() {
        let store = store_with(&["svc-a"]);
        let mut gate = CommandGate::new(Duration::from_millis(0));
        gate.begin_restart("svc-a");

        let cmd = Command::targeting(CommandKind::Restart, "svc-a");
        // Deadline already passed; the expired entry must not lock the unit.
        assert_eq!(gate.admit(&cmd, &store), SubmitOutcome::Accepted);
        assert!(!gate.in_flight("svc-a"));
    }

    #[test]
    fn test_finish_clears_in_flight() {
        let store = store_with(&["svc-a"]);
        let mut gate = CommandGate::new(Duration::from_secs(30));
        gate.begin_restart("svc-a");
        gate.finish_restart("svc-a");
        let cmd = Command::targeting(CommandKind::Restart, "svc-a");
        assert_eq!(gate.admit(&cmd, &store), SubmitOutcome::Accepted);
    }
}
