//! Backend traits for the external collaborators: the process manager that
//! confirms liveness and performs restarts, and the log backend that
//! produces line streams.
//!
//! Adapters implement these; the core only sees the traits.

use async_trait::async_trait;
use std::fmt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::logbuf::SessionMode;
use crate::unit::UnitMeta;

/// Filesystem or process-manager query failure. Degrades the unit to
/// Unknown; retried next cycle, never fatal.
#[derive(Clone, Debug)]
pub enum ProbeError {
    Filesystem { message: String },
    ProcessQuery { message: String },
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::Filesystem { message } => write!(f, "filesystem error: {}", message),
            ProbeError::ProcessQuery { message } => {
                write!(f, "process manager unavailable: {}", message)
            }
        }
    }
}

impl std::error::Error for ProbeError {}

/// Failure of the external restart mechanism.
#[derive(Clone, Debug)]
pub enum RestartError {
    /// The unit's descriptor offers no way to restart it.
    NoTarget { id: String },
    /// The restart invocation could not be spawned.
    Spawn { id: String, message: String },
    /// The restart ran but exited non-zero.
    Failed { id: String, code: Option<i32> },
}

impl fmt::Display for RestartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartError::NoTarget { id } => {
                write!(f, "no restart target for {}", id)
            }
            RestartError::Spawn { id, message } => {
                write!(f, "failed to invoke restart for {}: {}", id, message)
            }
            RestartError::Failed { id, code } => {
                write!(f, "restart of {} exited with code {:?}", id, code)
            }
        }
    }
}

impl std::error::Error for RestartError {}

/// The log source could not be opened.
#[derive(Clone, Debug)]
pub enum LogSourceError {
    Missing { source: String },
    Spawn { message: String },
}

impl fmt::Display for LogSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogSourceError::Missing { source } => write!(f, "log source missing: {}", source),
            LogSourceError::Spawn { message } => write!(f, "failed to open log source: {}", message),
        }
    }
}

impl std::error::Error for LogSourceError {}

/// What a log stream delivers.
#[derive(Clone, Debug)]
pub enum LogEvent {
    Line(String),
    /// The source went away mid-stream (rotated file, journal down).
    Unavailable(String),
    /// A finite sequence (LastN, JournalWindow) ran to completion.
    Eof,
}

/// Handle to an open log stream.
///
/// Lines travel over a fixed-capacity broadcast channel: a lagging consumer
/// drops the oldest entries and the producer never blocks. Dropping or
/// closing the handle aborts the producer task, so switching sessions can
/// never leak a source handle. Closing twice is fine.
#[derive(Debug)]
pub struct LogStreamHandle {
    rx: Option<broadcast::Receiver<LogEvent>>,
    task: Option<JoinHandle<()>>,
}

impl LogStreamHandle {
    pub fn new(rx: broadcast::Receiver<LogEvent>, task: JoinHandle<()>) -> Self {
        Self {
            rx: Some(rx),
            task: Some(task),
        }
    }

    /// Take the receiving end. The forwarder consumes it exactly once.
    pub fn take_rx(&mut self) -> Option<broadcast::Receiver<LogEvent>> {
        self.rx.take()
    }

    pub fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.rx = None;
    }
}

impl Drop for LogStreamHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// External process manager: liveness-by-pid and restart-by-identity.
#[async_trait]
pub trait ProcessManager: Send + Sync {
    /// Does a process with this pid exist at all?
    async fn is_alive(&self, pid: u32) -> Result<bool, ProbeError>;

    /// Is the live process actually this unit's process? Guards against
    /// pid reuse after a crash.
    async fn identity_matches(&self, pid: u32, unit: &UnitMeta) -> Result<bool, ProbeError>;

    /// Invoke the external restart mechanism. Callers bound this with a
    /// timeout; there is no cancellation.
    async fn restart(&self, unit: &UnitMeta) -> Result<(), RestartError>;
}

/// External log facility: follow / last-N / time-window streams.
#[async_trait]
pub trait LogBackend: Send + Sync {
    async fn open(&self, unit: &UnitMeta, mode: SessionMode)
    -> Result<LogStreamHandle, LogSourceError>;
}
