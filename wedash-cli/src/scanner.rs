//! Discovery scanner: walks the root for unit directories and keeps the
//! store reconciled on a timer and on explicit refresh.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use tokio::sync::{broadcast, mpsc};

use wedash_core::reducer::{CoreEvent, EventEnvelope};
use wedash_core::unit::{BUILD_DESCRIPTOR, PID_MARKER, UnitMeta};

use crate::prober::ProbeRequest;

#[derive(Clone, Debug)]
pub enum ScanRequest {
    Refresh,
}

#[derive(Debug)]
pub enum ScanError {
    RootMissing { path: PathBuf },
    Io(std::io::Error),
}

impl std::fmt::Display for ScanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanError::RootMissing { path } => {
                write!(f, "discovery root not found: {}", path.display())
            }
            ScanError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for ScanError {}

/// Walk `root` up to `max_depth`, collecting every directory that carries
/// both marker files. Symlink cycles are broken with a visited (dev, inode)
/// set. Unreadable subdirectories are skipped; only an unreadable root is
/// an error.
pub fn scan(root: &Path, max_depth: usize) -> Result<Vec<UnitMeta>, ScanError> {
    let root = root
        .canonicalize()
        .map_err(|_| ScanError::RootMissing { path: root.to_path_buf() })?;
    if !root.is_dir() {
        return Err(ScanError::RootMissing { path: root });
    }

    let mut found = Vec::new();
    let mut visited: HashSet<(u64, u64)> = HashSet::new();
    let mut stack: Vec<(PathBuf, usize)> = vec![(root.clone(), 0)];

    while let Some((dir, depth)) = stack.pop() {
        if !mark_visited(&dir, &mut visited) {
            continue;
        }

        if is_unit_dir(&dir) {
            let name = descriptor_name(&dir.join(BUILD_DESCRIPTOR));
            found.push(UnitMeta::from_dir(&root, &dir, name));
        }

        if depth >= max_depth {
            continue;
        }

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            // Per-directory errors never abort the scan.
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push((path, depth + 1));
            }
        }
    }

    // Deterministic order regardless of walk order.
    found.sort_by(|a, b| a.identity.cmp(&b.identity));
    Ok(found)
}

/// A unit is recognized solely by co-presence of both marker files
/// directly inside the directory. Filenames are case-sensitive.
fn is_unit_dir(dir: &Path) -> bool {
    dir.join(PID_MARKER).is_file() && dir.join(BUILD_DESCRIPTOR).is_file()
}

#[cfg(unix)]
fn mark_visited(dir: &Path, visited: &mut HashSet<(u64, u64)>) -> bool {
    use std::os::unix::fs::MetadataExt;
    match fs::metadata(dir) {
        Ok(meta) => visited.insert((meta.dev(), meta.ino())),
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn mark_visited(dir: &Path, visited: &mut HashSet<(u64, u64)>) -> bool {
    let _ = (dir, visited);
    true
}

/// Pull a display name out of the build descriptor: the first
/// `NAME = value` style assignment wins.
fn descriptor_name(descriptor: &Path) -> Option<String> {
    let content = fs::read_to_string(descriptor).ok()?;
    for line in content.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("NAME") {
            let rest = rest.trim_start();
            for op in ["?=", ":=", "="] {
                if let Some(value) = rest.strip_prefix(op) {
                    let value = value.trim();
                    if !value.is_empty() {
                        return Some(value.to_string());
                    }
                }
            }
        }
    }
    None
}

/// The scanner task: a scan on every interval tick and on every refresh
/// request. Scans run one at a time; refresh requests arriving while one
/// is in flight are drained afterwards and piggyback on its result.
pub struct DiscoveryScanner {
    root: PathBuf,
    max_depth: usize,
    interval: Duration,
}

impl DiscoveryScanner {
    pub fn new(root: PathBuf, max_depth: usize, interval: Duration) -> Self {
        Self {
            root,
            max_depth,
            interval,
        }
    }

    pub async fn run(
        self,
        mut refresh_rx: mpsc::Receiver<ScanRequest>,
        event_tx: broadcast::Sender<EventEnvelope>,
        probe_tx: mpsc::Sender<ProbeRequest>,
        next_id: Arc<AtomicU64>,
    ) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                req = refresh_rx.recv() => {
                    if req.is_none() {
                        break;
                    }
                }
            }

            let root = self.root.clone();
            let depth = self.max_depth;
            let result = tokio::task::spawn_blocking(move || scan(&root, depth)).await;

            let event = match result {
                Ok(Ok(candidates)) => {
                    let _ = probe_tx.send(ProbeRequest::Batch(candidates.clone())).await;
                    CoreEvent::ScanCompleted { candidates }
                }
                Ok(Err(e)) => CoreEvent::ScanFailed { message: e.to_string() },
                Err(e) => CoreEvent::ScanFailed { message: e.to_string() },
            };

            let _ = event_tx.send(EventEnvelope {
                id: next_id.fetch_add(1, Ordering::SeqCst),
                at: SystemTime::now(),
                event,
            });

            // Requests that piled up during the scan piggyback on it.
            while refresh_rx.try_recv().is_ok() {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TempTree {
        root: PathBuf,
    }

    impl TempTree {
        fn new(tag: &str) -> Self {
            let root = std::env::temp_dir().join(format!(
                "wedash-scan-{}-{}",
                tag,
                std::process::id()
            ));
            let _ = fs::remove_dir_all(&root);
            fs::create_dir_all(&root).unwrap();
            Self { root }
        }

        fn unit(&self, rel: &str, pid: &str) -> PathBuf {
            let dir = self.root.join(rel);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(PID_MARKER), pid).unwrap();
            fs::write(dir.join(BUILD_DESCRIPTOR), "up:\n\techo up\n").unwrap();
            dir
        }
    }

    impl Drop for TempTree {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.root);
        }
    }

    #[test]
    fn test_requires_both_markers() {
        let tree = TempTree::new("markers");
        tree.unit("svc-a", "123");
        tree.unit("svc-b", "456");

        // svc-c has only a Makefile, no pid marker.
        let svc_c = tree.root.join("svc-c");
        fs::create_dir_all(&svc_c).unwrap();
        fs::write(svc_c.join(BUILD_DESCRIPTOR), "all:\n").unwrap();

        // svc-d has only a pid marker.
        let svc_d = tree.root.join("svc-d");
        fs::create_dir_all(&svc_d).unwrap();
        fs::write(svc_d.join(PID_MARKER), "789").unwrap();

        let found = scan(&tree.root, 5).unwrap();
        let ids: Vec<&str> = found.iter().map(|m| m.identity.as_str()).collect();
        assert_eq!(ids, vec!["svc-a", "svc-b"]);
    }

    #[test]
    fn test_depth_bound() {
        let tree = TempTree::new("depth");
        tree.unit("a/b/deep", "1");

        let shallow = scan(&tree.root, 1).unwrap();
        assert!(shallow.is_empty());

        let deep = scan(&tree.root, 3).unwrap();
        assert_eq!(deep.len(), 1);
        assert_eq!(deep[0].identity, "a-b-deep");
        assert_eq!(deep[0].project, "b");
    }

    #[test]
    fn test_descriptor_name_extraction() {
        let tree = TempTree::new("name");
        let dir = tree.unit("svc", "1");
        fs::write(
            dir.join(BUILD_DESCRIPTOR),
            "NAME := billing-gateway\nup:\n\techo up\n",
        )
        .unwrap();

        let found = scan(&tree.root, 2).unwrap();
        assert_eq!(found[0].name, "billing-gateway");
    }

    #[test]
    fn test_missing_root_is_error() {
        let result = scan(Path::new("/definitely/not/a/real/root"), 2);
        assert!(matches!(result, Err(ScanError::RootMissing { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_cycle_is_skipped() {
        let tree = TempTree::new("cycle");
        tree.unit("svc", "1");
        let loop_link = tree.root.join("svc").join("loop");
        std::os::unix::fs::symlink(&tree.root, &loop_link).unwrap();

        // Must terminate and find the unit exactly once.
        let found = scan(&tree.root, 10).unwrap();
        assert_eq!(found.len(), 1);
    }
}
