//! Status prober: turns a pid marker plus a process-manager query into a
//! unit status. Batched after every scan, concurrency-limited, and
//! available for targeted re-probes right after a restart.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use tokio::sync::{Semaphore, broadcast, mpsc};

use wedash_core::backend::ProcessManager;
use wedash_core::reducer::{CoreEvent, EventEnvelope};
use wedash_core::unit::{UnitMeta, UnitStatus};

#[derive(Debug)]
pub enum ProbeRequest {
    /// Probe every unit from the latest scan.
    Batch(Vec<UnitMeta>),
    /// Probe one unit after a settle delay (post-restart).
    One { meta: UnitMeta, settle: Duration },
}

/// Read the marker and classify the unit.
///
/// Missing/empty/non-numeric marker means Stopped; a pid whose process is
/// gone or belongs to someone else means Failed (a crash signal, not a
/// clean stop); query failures degrade to Unknown and are retried.
pub async fn probe_unit(pm: &dyn ProcessManager, meta: &UnitMeta) -> (UnitStatus, Option<u32>) {
    let content = match tokio::fs::read_to_string(&meta.pid_marker_path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return (UnitStatus::Stopped, None);
        }
        Err(_) => return (UnitStatus::Unknown, None),
    };

    let pid = match content.trim().parse::<u32>() {
        Ok(pid) => pid,
        Err(_) => return (UnitStatus::Stopped, None),
    };

    match pm.is_alive(pid).await {
        Ok(false) => (UnitStatus::Failed, Some(pid)),
        Ok(true) => match pm.identity_matches(pid, meta).await {
            Ok(true) => (UnitStatus::Active, Some(pid)),
            Ok(false) => (UnitStatus::Failed, Some(pid)),
            Err(_) => (UnitStatus::Unknown, Some(pid)),
        },
        Err(_) => (UnitStatus::Unknown, Some(pid)),
    }
}

pub struct StatusProber {
    pm: Arc<dyn ProcessManager>,
    concurrency: usize,
}

impl StatusProber {
    pub fn new(pm: Arc<dyn ProcessManager>, concurrency: usize) -> Self {
        Self {
            pm,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn run(
        self,
        mut req_rx: mpsc::Receiver<ProbeRequest>,
        event_tx: broadcast::Sender<EventEnvelope>,
        next_id: Arc<AtomicU64>,
    ) {
        while let Some(req) = req_rx.recv().await {
            match req {
                ProbeRequest::Batch(metas) => {
                    // A slow unit only holds one permit; the rest of the
                    // batch keeps moving.
                    let sem = Arc::new(Semaphore::new(self.concurrency));
                    for meta in metas {
                        let permit = sem.clone().acquire_owned().await;
                        let Ok(permit) = permit else { break };
                        let pm = self.pm.clone();
                        let tx = event_tx.clone();
                        let ids = next_id.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            probe_and_emit(pm.as_ref(), &meta, &tx, &ids).await;
                        });
                    }
                }
                ProbeRequest::One { meta, settle } => {
                    let pm = self.pm.clone();
                    let tx = event_tx.clone();
                    let ids = next_id.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(settle).await;
                        probe_and_emit(pm.as_ref(), &meta, &tx, &ids).await;
                    });
                }
            }
        }
    }
}

async fn probe_and_emit(
    pm: &dyn ProcessManager,
    meta: &UnitMeta,
    event_tx: &broadcast::Sender<EventEnvelope>,
    next_id: &AtomicU64,
) {
    let (status, pid) = probe_unit(pm, meta).await;
    let _ = event_tx.send(EventEnvelope {
        id: next_id.fetch_add(1, Ordering::SeqCst),
        at: SystemTime::now(),
        event: CoreEvent::ProbeCompleted {
            id: meta.identity.clone(),
            status,
            pid,
        },
    });
}
