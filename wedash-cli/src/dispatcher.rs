//! Command dispatcher: admits user commands through the gate and routes the
//! accepted ones to the restart runner, the log tailer, or the scanner.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use tokio::sync::{broadcast, mpsc};

use wedash_core::backend::ProcessManager;
use wedash_core::command::{Command, CommandGate, CommandKind, SubmitOutcome};
use wedash_core::logbuf::SessionMode;
use wedash_core::reducer::{CoreEvent, EventEnvelope};
use wedash_core::store::UnitStore;
use wedash_core::unit::{UnitId, UnitMeta};

use crate::prober::ProbeRequest;
use crate::scanner::ScanRequest;
use crate::tailer::LogTailer;

pub struct CommandDispatcher {
    gate: CommandGate,
    pm: Arc<dyn ProcessManager>,
    tailer: LogTailer,
    scan_tx: mpsc::Sender<ScanRequest>,
    probe_tx: mpsc::Sender<ProbeRequest>,
    event_tx: broadcast::Sender<EventEnvelope>,
    next_id: Arc<AtomicU64>,
    done_tx: mpsc::Sender<UnitId>,
    done_rx: mpsc::Receiver<UnitId>,
    settle: Duration,
    timeout: Duration,
}

impl CommandDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pm: Arc<dyn ProcessManager>,
        tailer: LogTailer,
        scan_tx: mpsc::Sender<ScanRequest>,
        probe_tx: mpsc::Sender<ProbeRequest>,
        event_tx: broadcast::Sender<EventEnvelope>,
        next_id: Arc<AtomicU64>,
        settle: Duration,
        timeout: Duration,
    ) -> Self {
        let (done_tx, done_rx) = mpsc::channel(64);
        Self {
            gate: CommandGate::new(timeout),
            pm,
            tailer,
            scan_tx,
            probe_tx,
            event_tx,
            next_id,
            done_tx,
            done_rx,
            settle,
            timeout,
        }
    }

    /// Admit and execute one command against the current store snapshot.
    ///
    /// Rejection is immediate and side-effect free. Acceptance of a restart
    /// marks the unit busy before the external call is spawned, so a
    /// concurrent second restart always sees the gate closed.
    pub async fn submit(&mut self, cmd: Command, store: &UnitStore) -> SubmitOutcome {
        self.reap();

        let outcome = self.gate.admit(&cmd, store);
        if !outcome.is_accepted() {
            return outcome;
        }

        match cmd.kind {
            CommandKind::Refresh => {
                let _ = self.scan_tx.try_send(ScanRequest::Refresh);
            }
            CommandKind::Follow => {
                if let Some(meta) = self.target_meta(&cmd, store) {
                    self.tailer
                        .open(&meta, SessionMode::Follow, &self.event_tx, &self.next_id)
                        .await;
                }
            }
            CommandKind::ShowLast => {
                if let Some(meta) = self.target_meta(&cmd, store) {
                    self.tailer
                        .open(&meta, SessionMode::LastN, &self.event_tx, &self.next_id)
                        .await;
                }
            }
            CommandKind::ShowJournal => {
                if let Some(meta) = self.target_meta(&cmd, store) {
                    self.tailer
                        .open(
                            &meta,
                            SessionMode::JournalWindow,
                            &self.event_tx,
                            &self.next_id,
                        )
                        .await;
                }
            }
            CommandKind::Restart => {
                if let Some(meta) = self.target_meta(&cmd, store) {
                    self.start_restart(meta);
                }
            }
        }

        outcome
    }

    fn target_meta(&self, cmd: &Command, store: &UnitStore) -> Option<UnitMeta> {
        let id = cmd.target.as_deref()?;
        store.get(id).map(|unit| unit.meta.clone())
    }

    fn start_restart(&mut self, meta: UnitMeta) {
        let id = meta.identity.clone();
        self.gate.begin_restart(&id);
        self.emit(CoreEvent::RestartStarted { id: id.clone() });

        let pm = self.pm.clone();
        let event_tx = self.event_tx.clone();
        let next_id = self.next_id.clone();
        let done_tx = self.done_tx.clone();
        let probe_tx = self.probe_tx.clone();
        let settle = self.settle;
        let timeout = self.timeout;

        tokio::spawn(async move {
            let result = tokio::time::timeout(timeout, pm.restart(&meta)).await;
            let (error, timed_out) = match result {
                Ok(Ok(())) => (None, false),
                Ok(Err(e)) => (Some(e.to_string()), false),
                Err(_) => (None, true),
            };

            let _ = event_tx.send(EventEnvelope {
                id: next_id.fetch_add(1, Ordering::SeqCst),
                at: SystemTime::now(),
                event: CoreEvent::RestartFinished {
                    id: meta.identity.clone(),
                    error,
                    timed_out,
                },
            });
            let _ = done_tx.send(meta.identity.clone()).await;
            // The process needs a moment to rewrite its pid marker before
            // the follow-up probe reads it.
            let _ = probe_tx.send(ProbeRequest::One { meta, settle }).await;
        });
    }

    /// Drain completion notices and expired deadlines so the gate reflects
    /// reality before the next admission decision.
    fn reap(&mut self) {
        while let Ok(id) = self.done_rx.try_recv() {
            self.gate.finish_restart(&id);
        }
        self.gate.expire();
    }

    pub fn close_session(&mut self) {
        self.tailer
            .close_and_notify(&self.event_tx, &self.next_id);
    }

    pub fn shutdown(&mut self) {
        self.tailer.close();
    }

    fn emit(&self, event: CoreEvent) {
        let _ = self.event_tx.send(EventEnvelope {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            at: SystemTime::now(),
            event,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use wedash_core::backend::{
        LogBackend, LogSourceError, LogStreamHandle, ProbeError, RestartError,
    };
    use wedash_core::command::RejectReason;

    struct SlowManager {
        delay: Duration,
        restarts: AtomicUsize,
    }

    #[async_trait]
    impl ProcessManager for SlowManager {
        async fn is_alive(&self, _pid: u32) -> Result<bool, ProbeError> {
            Ok(true)
        }

        async fn identity_matches(&self, _pid: u32, _unit: &UnitMeta) -> Result<bool, ProbeError> {
            Ok(true)
        }

        async fn restart(&self, _unit: &UnitMeta) -> Result<(), RestartError> {
            self.restarts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(())
        }
    }

    struct NullBackend;

    #[async_trait]
    impl LogBackend for NullBackend {
        async fn open(
            &self,
            _unit: &UnitMeta,
            _mode: SessionMode,
        ) -> Result<LogStreamHandle, LogSourceError> {
            let (tx, rx) = broadcast::channel(8);
            let task = tokio::spawn(async move {
                let _tx = tx;
                std::future::pending::<()>().await;
            });
            Ok(LogStreamHandle::new(rx, task))
        }
    }

    fn store_with(ids: &[&str]) -> UnitStore {
        let mut store = UnitStore::new(2);
        store.reconcile(
            ids.iter()
                .map(|id| UnitMeta::from_dir(Path::new("/r"), &Path::new("/r").join(id), None))
                .collect(),
        );
        store
    }

    fn dispatcher(
        pm: Arc<dyn ProcessManager>,
    ) -> (
        CommandDispatcher,
        broadcast::Receiver<EventEnvelope>,
        mpsc::Receiver<ScanRequest>,
        mpsc::Receiver<ProbeRequest>,
    ) {
        let (event_tx, event_rx) = broadcast::channel(256);
        let (scan_tx, scan_rx) = mpsc::channel(8);
        let (probe_tx, probe_rx) = mpsc::channel(8);
        let tailer = LogTailer::new(Arc::new(NullBackend));
        let d = CommandDispatcher::new(
            pm,
            tailer,
            scan_tx,
            probe_tx,
            event_tx,
            Arc::new(AtomicU64::new(1)),
            Duration::from_millis(0),
            Duration::from_secs(5),
        );
        (d, event_rx, scan_rx, probe_rx)
    }

    #[tokio::test]
    async fn test_second_restart_rejected_while_first_runs() {
        let pm = Arc::new(SlowManager {
            delay: Duration::from_millis(200),
            restarts: AtomicUsize::new(0),
        });
        let (mut d, _events, _scan, _probe) = dispatcher(pm.clone());
        let store = store_with(&["svc-a", "svc-b"]);

        let first = d
            .submit(Command::targeting(CommandKind::Restart, "svc-b"), &store)
            .await;
        assert!(first.is_accepted());

        let second = d
            .submit(Command::targeting(CommandKind::Restart, "svc-b"), &store)
            .await;
        assert_eq!(second, SubmitOutcome::Rejected(RejectReason::Busy));

        // Only one external invocation happened.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pm.restarts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_restart_emits_lifecycle_and_reprobe() {
        let pm = Arc::new(SlowManager {
            delay: Duration::from_millis(0),
            restarts: AtomicUsize::new(0),
        });
        let (mut d, mut events, _scan, mut probe) = dispatcher(pm);
        let store = store_with(&["svc-a"]);

        d.submit(Command::targeting(CommandKind::Restart, "svc-a"), &store)
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut saw_started = false;
        let mut saw_finished = false;
        while let Ok(env) = events.try_recv() {
            match env.event {
                CoreEvent::RestartStarted { .. } => saw_started = true,
                CoreEvent::RestartFinished { error, timed_out, .. } => {
                    assert!(error.is_none());
                    assert!(!timed_out);
                    saw_finished = true;
                }
                _ => {}
            }
        }
        assert!(saw_started && saw_finished);

        // The completion schedules a targeted re-probe.
        let req = probe.try_recv().unwrap();
        assert!(matches!(req, ProbeRequest::One { .. }));
    }

    #[tokio::test]
    async fn test_gate_reopens_after_completion() {
        let pm = Arc::new(SlowManager {
            delay: Duration::from_millis(0),
            restarts: AtomicUsize::new(0),
        });
        let (mut d, _events, _scan, _probe) = dispatcher(pm.clone());
        let store = store_with(&["svc-a"]);

        d.submit(Command::targeting(CommandKind::Restart, "svc-a"), &store)
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let again = d
            .submit(Command::targeting(CommandKind::Restart, "svc-a"), &store)
            .await;
        assert!(again.is_accepted());
        assert_eq!(pm.restarts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refresh_forwards_to_scanner() {
        let pm = Arc::new(SlowManager {
            delay: Duration::from_millis(0),
            restarts: AtomicUsize::new(0),
        });
        let (mut d, _events, mut scan, _probe) = dispatcher(pm);
        let store = store_with(&[]);

        let outcome = d.submit(Command::refresh(), &store).await;
        assert!(outcome.is_accepted());
        assert!(matches!(scan.try_recv(), Ok(ScanRequest::Refresh)));
    }

    #[tokio::test]
    async fn test_follow_unknown_unit_rejected() {
        let pm = Arc::new(SlowManager {
            delay: Duration::from_millis(0),
            restarts: AtomicUsize::new(0),
        });
        let (mut d, _events, _scan, _probe) = dispatcher(pm);
        let store = store_with(&["svc-a"]);

        let outcome = d
            .submit(Command::targeting(CommandKind::Follow, "ghost"), &store)
            .await;
        assert_eq!(outcome, SubmitOutcome::Rejected(RejectReason::InvalidTarget));
    }
}
