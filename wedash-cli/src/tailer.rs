//! Log tailer: owns the single active log session and the forwarder task
//! that moves source lines onto the event bus.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use wedash_core::backend::{LogBackend, LogEvent, LogStreamHandle};
use wedash_core::logbuf::SessionMode;
use wedash_core::reducer::{CoreEvent, EventEnvelope};
use wedash_core::unit::{UnitId, UnitMeta};

struct ActiveSession {
    unit: UnitId,
    mode: SessionMode,
    handle: LogStreamHandle,
    forwarder: JoinHandle<()>,
}

pub struct LogTailer {
    backend: Arc<dyn LogBackend>,
    active: Option<ActiveSession>,
}

impl LogTailer {
    pub fn new(backend: Arc<dyn LogBackend>) -> Self {
        Self {
            backend,
            active: None,
        }
    }

    /// Open (or reuse) the session for `meta`.
    ///
    /// Re-requesting follow on the unit already being followed keeps the
    /// source handle and just resets the visible buffer; everything else
    /// tears the old session down first, so at most one source handle is
    /// ever open. A source that cannot be opened still yields a session —
    /// one that immediately shows its "log unavailable" notice.
    pub async fn open(
        &mut self,
        meta: &UnitMeta,
        mode: SessionMode,
        event_tx: &broadcast::Sender<EventEnvelope>,
        next_id: &Arc<AtomicU64>,
    ) {
        if let Some(active) = &self.active {
            let reusable = active.unit == meta.identity
                && active.mode == mode
                && mode == SessionMode::Follow
                && !active.forwarder.is_finished();
            if reusable {
                emit(
                    event_tx,
                    next_id,
                    CoreEvent::SessionOpened {
                        id: meta.identity.clone(),
                        mode,
                    },
                );
                return;
            }
        }

        self.close();

        emit(
            event_tx,
            next_id,
            CoreEvent::SessionOpened {
                id: meta.identity.clone(),
                mode,
            },
        );

        let mut handle = match self.backend.open(meta, mode).await {
            Ok(handle) => handle,
            Err(e) => {
                emit(
                    event_tx,
                    next_id,
                    CoreEvent::SessionLost {
                        id: meta.identity.clone(),
                        reason: e.to_string(),
                    },
                );
                return;
            }
        };

        let Some(mut rx) = handle.take_rx() else {
            return;
        };
        let forwarder = {
            let tx = event_tx.clone();
            let ids = next_id.clone();
            let unit = meta.identity.clone();
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(LogEvent::Line(text)) => {
                            emit(&tx, &ids, CoreEvent::SessionLine { id: unit.clone(), text });
                        }
                        Ok(LogEvent::Unavailable(reason)) => {
                            emit(
                                &tx,
                                &ids,
                                CoreEvent::SessionLost {
                                    id: unit.clone(),
                                    reason,
                                },
                            );
                            break;
                        }
                        Ok(LogEvent::Eof) => break,
                        // Consumer lagged: the channel already dropped the
                        // oldest lines, keep going with the newest.
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        };

        self.active = Some(ActiveSession {
            unit: meta.identity.clone(),
            mode,
            handle,
            forwarder,
        });
    }

    /// Tear down the active session, releasing the source handle.
    /// Idempotent.
    pub fn close(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.forwarder.abort();
            active.handle.close();
        }
    }

    /// Close and tell the reducer the session is gone.
    pub fn close_and_notify(
        &mut self,
        event_tx: &broadcast::Sender<EventEnvelope>,
        next_id: &Arc<AtomicU64>,
    ) {
        if self.active.is_some() {
            self.close();
            emit(event_tx, next_id, CoreEvent::SessionClosed);
        }
    }

    pub fn active_unit(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.unit.as_str())
    }
}

fn emit(
    event_tx: &broadcast::Sender<EventEnvelope>,
    next_id: &AtomicU64,
    event: CoreEvent,
) {
    let _ = event_tx.send(EventEnvelope {
        id: next_id.fetch_add(1, Ordering::SeqCst),
        at: SystemTime::now(),
        event,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use wedash_core::backend::LogSourceError;

    /// Counts opens and hands out streams fed from a shared script.
    struct CountingBackend {
        opens: AtomicUsize,
        lines: Vec<String>,
        fail: bool,
    }

    impl CountingBackend {
        fn new(lines: &[&str]) -> Self {
            Self {
                opens: AtomicUsize::new(0),
                lines: lines.iter().map(|s| s.to_string()).collect(),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                opens: AtomicUsize::new(0),
                lines: Vec::new(),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl LogBackend for CountingBackend {
        async fn open(
            &self,
            _unit: &UnitMeta,
            _mode: SessionMode,
        ) -> Result<LogStreamHandle, LogSourceError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(LogSourceError::Missing {
                    source: "journal".into(),
                });
            }
            let (tx, rx) = broadcast::channel(64);
            let lines = self.lines.clone();
            let task = tokio::spawn(async move {
                for line in lines {
                    let _ = tx.send(LogEvent::Line(line));
                }
                // Keep the sender alive so follow streams stay open.
                std::future::pending::<()>().await;
            });
            Ok(LogStreamHandle::new(rx, task))
        }
    }

    fn meta(id: &str) -> UnitMeta {
        UnitMeta::from_dir(Path::new("/r"), &Path::new("/r").join(id), None)
    }

    fn bus() -> (broadcast::Sender<EventEnvelope>, broadcast::Receiver<EventEnvelope>) {
        broadcast::channel(256)
    }

    async fn drain(rx: &mut broadcast::Receiver<EventEnvelope>) -> Vec<CoreEvent> {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let mut events = Vec::new();
        while let Ok(env) = rx.try_recv() {
            events.push(env.event);
        }
        events
    }

    #[tokio::test]
    async fn test_refollow_reuses_handle() {
        let backend = Arc::new(CountingBackend::new(&["hello"]));
        let mut tailer = LogTailer::new(backend.clone());
        let (tx, mut rx) = bus();
        let ids = Arc::new(AtomicU64::new(1));

        tailer.open(&meta("svc"), SessionMode::Follow, &tx, &ids).await;
        tailer.open(&meta("svc"), SessionMode::Follow, &tx, &ids).await;

        assert_eq!(backend.opens.load(Ordering::SeqCst), 1);
        let events = drain(&mut rx).await;
        let opened = events
            .iter()
            .filter(|e| matches!(e, CoreEvent::SessionOpened { .. }))
            .count();
        assert_eq!(opened, 2);
    }

    #[tokio::test]
    async fn test_switching_unit_reopens() {
        let backend = Arc::new(CountingBackend::new(&[]));
        let mut tailer = LogTailer::new(backend.clone());
        let (tx, _rx) = bus();
        let ids = Arc::new(AtomicU64::new(1));

        tailer.open(&meta("svc-a"), SessionMode::Follow, &tx, &ids).await;
        tailer.open(&meta("svc-b"), SessionMode::Follow, &tx, &ids).await;

        assert_eq!(backend.opens.load(Ordering::SeqCst), 2);
        assert_eq!(tailer.active_unit(), Some("svc-b"));
    }

    #[tokio::test]
    async fn test_last_n_rerequest_restarts_sequence() {
        let backend = Arc::new(CountingBackend::new(&["l1"]));
        let mut tailer = LogTailer::new(backend.clone());
        let (tx, _rx) = bus();
        let ids = Arc::new(AtomicU64::new(1));

        tailer.open(&meta("svc"), SessionMode::LastN, &tx, &ids).await;
        tailer.open(&meta("svc"), SessionMode::LastN, &tx, &ids).await;

        // LastN is restartable, not reusable.
        assert_eq!(backend.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_lines_are_forwarded() {
        let backend = Arc::new(CountingBackend::new(&["one", "two"]));
        let mut tailer = LogTailer::new(backend);
        let (tx, mut rx) = bus();
        let ids = Arc::new(AtomicU64::new(1));

        tailer.open(&meta("svc"), SessionMode::Follow, &tx, &ids).await;
        let events = drain(&mut rx).await;
        let lines: Vec<String> = events
            .into_iter()
            .filter_map(|e| match e {
                CoreEvent::SessionLine { text, .. } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_open_failure_surfaces_session_lost() {
        let backend = Arc::new(CountingBackend::failing());
        let mut tailer = LogTailer::new(backend);
        let (tx, mut rx) = bus();
        let ids = Arc::new(AtomicU64::new(1));

        tailer.open(&meta("svc"), SessionMode::JournalWindow, &tx, &ids).await;
        let events = drain(&mut rx).await;
        assert!(events.iter().any(|e| matches!(e, CoreEvent::SessionLost { .. })));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let backend = Arc::new(CountingBackend::new(&[]));
        let mut tailer = LogTailer::new(backend);
        let (tx, _rx) = bus();
        let ids = Arc::new(AtomicU64::new(1));

        tailer.open(&meta("svc"), SessionMode::Follow, &tx, &ids).await;
        tailer.close();
        tailer.close();
        assert_eq!(tailer.active_unit(), None);
    }
}
