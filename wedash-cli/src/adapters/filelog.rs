//! Log backend over a plain `run.log` in the unit directory, for machines
//! without a user journal. Follow mode polls the file for growth.

use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::broadcast;

use wedash_core::backend::{LogBackend, LogEvent, LogSourceError, LogStreamHandle};
use wedash_core::logbuf::SessionMode;
use wedash_core::unit::UnitMeta;

pub const LOG_FILE: &str = "run.log";

const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct FileLogBackend {
    last_n: usize,
    channel_cap: usize,
}

impl FileLogBackend {
    pub fn new(last_n: usize, channel_cap: usize) -> Self {
        Self {
            last_n,
            channel_cap: channel_cap.max(16),
        }
    }
}

fn log_path(unit: &UnitMeta) -> PathBuf {
    unit.root_path.join(LOG_FILE)
}

/// Poll `path` from its current end, emitting complete lines as they are
/// appended. A shrinking file means rotation; the stream reports it and
/// ends rather than replaying the new file from an arbitrary offset.
async fn follow(path: PathBuf, tx: broadcast::Sender<LogEvent>) {
    let mut file = match File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            let _ = tx.send(LogEvent::Unavailable(format!("open {}: {}", LOG_FILE, e)));
            return;
        }
    };
    let mut offset = match file.seek(SeekFrom::End(0)).await {
        Ok(offset) => offset,
        Err(e) => {
            let _ = tx.send(LogEvent::Unavailable(format!("seek {}: {}", LOG_FILE, e)));
            return;
        }
    };

    let mut partial = String::new();
    loop {
        tokio::time::sleep(POLL_INTERVAL).await;

        let len = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(_) => {
                let _ = tx.send(LogEvent::Unavailable(format!("{} removed", LOG_FILE)));
                return;
            }
        };
        if len < offset {
            let _ = tx.send(LogEvent::Unavailable(format!("{} rotated", LOG_FILE)));
            return;
        }
        if len == offset {
            continue;
        }

        let mut chunk = vec![0u8; (len - offset) as usize];
        if file.read_exact(&mut chunk).await.is_err() {
            let _ = tx.send(LogEvent::Unavailable(format!("read {} failed", LOG_FILE)));
            return;
        }
        offset = len;

        // Carry an unterminated tail into the next poll.
        partial.push_str(&String::from_utf8_lossy(&chunk));
        while let Some(pos) = partial.find('\n') {
            let line = partial[..pos].trim_end_matches('\r').to_string();
            partial.drain(..=pos);
            let _ = tx.send(LogEvent::Line(line));
        }
    }
}

async fn send_last_n(path: PathBuf, n: usize, tx: broadcast::Sender<LogEvent>) {
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => {
            let lines: Vec<&str> = content.lines().collect();
            let start = lines.len().saturating_sub(n);
            for line in &lines[start..] {
                let _ = tx.send(LogEvent::Line(line.to_string()));
            }
            let _ = tx.send(LogEvent::Eof);
        }
        Err(e) => {
            let _ = tx.send(LogEvent::Unavailable(format!("read {}: {}", LOG_FILE, e)));
        }
    }
}

#[async_trait]
impl LogBackend for FileLogBackend {
    async fn open(
        &self,
        unit: &UnitMeta,
        mode: SessionMode,
    ) -> Result<LogStreamHandle, LogSourceError> {
        let path = log_path(unit);
        if mode != SessionMode::JournalWindow && !path.is_file() {
            return Err(LogSourceError::Missing {
                source: path.display().to_string(),
            });
        }

        let (tx, rx) = broadcast::channel(self.channel_cap);
        let task = match mode {
            SessionMode::Follow => tokio::spawn(follow(path, tx)),
            SessionMode::LastN => tokio::spawn(send_last_n(path, self.last_n, tx)),
            SessionMode::JournalWindow => tokio::spawn(async move {
                let _ = tx.send(LogEvent::Unavailable(
                    "time window not supported by the file log backend".to_string(),
                ));
            }),
        };

        Ok(LogStreamHandle::new(rx, task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    struct TempUnit {
        dir: PathBuf,
        meta: UnitMeta,
    }

    impl TempUnit {
        fn new(tag: &str) -> Self {
            let dir = std::env::temp_dir().join(format!(
                "wedash-filelog-{}-{}",
                tag,
                std::process::id()
            ));
            let _ = std::fs::remove_dir_all(&dir);
            std::fs::create_dir_all(&dir).unwrap();
            let meta = UnitMeta::from_dir(dir.parent().unwrap_or(Path::new("/")), &dir, None);
            Self { dir, meta }
        }
    }

    impl Drop for TempUnit {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    async fn collect(handle: &mut LogStreamHandle) -> Vec<LogEvent> {
        let mut rx = handle.take_rx().unwrap();
        let mut events = Vec::new();
        loop {
            match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
                Ok(Ok(event)) => {
                    let done = matches!(event, LogEvent::Eof | LogEvent::Unavailable(_));
                    events.push(event);
                    if done {
                        break;
                    }
                }
                _ => break,
            }
        }
        events
    }

    #[tokio::test]
    async fn test_last_n_returns_tail() {
        let unit = TempUnit::new("lastn");
        std::fs::write(unit.dir.join(LOG_FILE), "a\nb\nc\nd\n").unwrap();

        let backend = FileLogBackend::new(2, 64);
        let mut handle = backend.open(&unit.meta, SessionMode::LastN).await.unwrap();
        let events = collect(&mut handle).await;

        let lines: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                LogEvent::Line(l) => Some(l.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(lines, vec!["c", "d"]);
        assert!(matches!(events.last(), Some(LogEvent::Eof)));
    }

    #[tokio::test]
    async fn test_missing_file_is_error() {
        let unit = TempUnit::new("missing");
        let backend = FileLogBackend::new(10, 64);
        let result = backend.open(&unit.meta, SessionMode::Follow).await;
        assert!(matches!(result, Err(LogSourceError::Missing { .. })));
    }

    #[tokio::test]
    async fn test_window_mode_reports_unsupported() {
        let unit = TempUnit::new("window");
        let backend = FileLogBackend::new(10, 64);
        let mut handle = backend
            .open(&unit.meta, SessionMode::JournalWindow)
            .await
            .unwrap();
        let events = collect(&mut handle).await;
        assert!(matches!(events.first(), Some(LogEvent::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_follow_picks_up_appended_lines() {
        let unit = TempUnit::new("follow");
        let path = unit.dir.join(LOG_FILE);
        std::fs::write(&path, "old\n").unwrap();

        let backend = FileLogBackend::new(10, 64);
        let mut handle = backend.open(&unit.meta, SessionMode::Follow).await.unwrap();
        let mut rx = handle.take_rx().unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        use std::io::Write;
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "fresh").unwrap();
        f.flush().unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        // Only the appended line arrives; the pre-existing content is skipped.
        match event {
            LogEvent::Line(line) => assert_eq!(line, "fresh"),
            other => panic!("unexpected event: {:?}", other),
        }
        handle.close();
    }
}
