//! Log backend over `journalctl --user`. Each session spawns one child
//! process whose stdout is pumped line by line into the stream channel.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use wedash_core::backend::{LogBackend, LogEvent, LogSourceError, LogStreamHandle};
use wedash_core::logbuf::SessionMode;
use wedash_core::unit::UnitMeta;

pub struct JournalBackend {
    last_n: usize,
    window: Duration,
    channel_cap: usize,
}

impl JournalBackend {
    pub fn new(last_n: usize, window: Duration, channel_cap: usize) -> Self {
        Self {
            last_n,
            window,
            channel_cap: channel_cap.max(16),
        }
    }

    fn args(&self, unit: &UnitMeta, mode: SessionMode) -> Vec<String> {
        let mut args = vec![
            "--user".to_string(),
            "-u".to_string(),
            unit.identity.clone(),
            "--output".to_string(),
            "cat".to_string(),
        ];
        match mode {
            SessionMode::Follow => {
                args.push("-f".to_string());
                args.push("-n".to_string());
                args.push("0".to_string());
            }
            SessionMode::LastN => {
                args.push("-n".to_string());
                args.push(self.last_n.to_string());
                args.push("--no-pager".to_string());
            }
            SessionMode::JournalWindow => {
                let minutes = (self.window.as_secs() / 60).max(1);
                args.push("--since".to_string());
                args.push(format!("-{}min", minutes));
                args.push("--no-pager".to_string());
            }
        }
        args
    }
}

#[async_trait]
impl LogBackend for JournalBackend {
    async fn open(
        &self,
        unit: &UnitMeta,
        mode: SessionMode,
    ) -> Result<LogStreamHandle, LogSourceError> {
        let mut child = tokio::process::Command::new("journalctl")
            .args(self.args(unit, mode))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LogSourceError::Spawn {
                message: format!("journalctl: {}", e),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| LogSourceError::Spawn {
            message: "journalctl produced no stdout".to_string(),
        })?;

        let (tx, rx) = broadcast::channel(self.channel_cap);
        let task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let _ = tx.send(LogEvent::Line(line));
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(LogEvent::Unavailable(format!("journal read: {}", e)));
                        return;
                    }
                }
            }
            // A follow stream only ends when journalctl dies; report that
            // instead of a clean end so the session shows why.
            match child.wait().await {
                Ok(status) if status.success() => {
                    let _ = tx.send(LogEvent::Eof);
                }
                Ok(status) => {
                    let _ = tx.send(LogEvent::Unavailable(format!(
                        "journalctl exited with {}",
                        status
                    )));
                }
                Err(e) => {
                    let _ = tx.send(LogEvent::Unavailable(format!("journalctl: {}", e)));
                }
            }
        });

        Ok(LogStreamHandle::new(rx, task))
    }
}
