//! Unit model for wedash
//!
//! A Unit is one discovered service: a directory that carries both a pid
//! marker file and a build descriptor. The scanner produces the immutable
//! metadata; the prober fills in the live status.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Unique identifier for a unit, derived from its directory path.
pub type UnitId = String;

/// Marker file holding the unit's registered process id.
pub const PID_MARKER: &str = "service.pid";

/// Build/run descriptor whose presence (together with the pid marker)
/// makes a directory a unit.
pub const BUILD_DESCRIPTOR: &str = "Makefile";

/// Immutable facts about a unit as found on disk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitMeta {
    /// Stable key: path components relative to the scan root joined with
    /// `-`. Doubles as the journal unit name.
    pub identity: UnitId,
    /// Logical grouping: the parent directory name.
    pub project: String,
    /// Display name derived from the build descriptor (falls back to the
    /// directory name).
    pub name: String,
    /// Absolute path to the unit directory.
    pub root_path: PathBuf,
    pub pid_marker_path: PathBuf,
    pub build_descriptor_path: PathBuf,
}

impl UnitMeta {
    /// Build metadata for a qualifying directory found under `scan_root`.
    pub fn from_dir(scan_root: &Path, dir: &Path, name: Option<String>) -> Self {
        let identity = derive_identity(scan_root, dir);
        let project = dir
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = name.unwrap_or_else(|| {
            dir.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| identity.clone())
        });

        Self {
            identity,
            project,
            name,
            root_path: dir.to_path_buf(),
            pid_marker_path: dir.join(PID_MARKER),
            build_descriptor_path: dir.join(BUILD_DESCRIPTOR),
        }
    }
}

/// Identity is the relative path joined with `-`, so a unit directly under
/// the root keeps its plain directory name.
fn derive_identity(scan_root: &Path, dir: &Path) -> UnitId {
    let rel = dir.strip_prefix(scan_root).unwrap_or(dir);
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();

    if parts.is_empty() {
        dir.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| String::from("root"))
    } else {
        parts.join("-")
    }
}

/// Live status of a unit as determined by the prober.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitStatus {
    /// Not probed yet, or the last probe could not reach the filesystem or
    /// process manager. Retried next cycle.
    #[default]
    Unknown,
    /// Marker pid exists and matches a live process.
    Active,
    /// Marker present but the process is gone or belongs to someone else.
    Failed,
    /// Marker missing, empty, or not a pid.
    Stopped,
}

impl UnitStatus {
    pub fn label(&self) -> &'static str {
        match self {
            UnitStatus::Unknown => "unknown",
            UnitStatus::Active => "active",
            UnitStatus::Failed => "failed",
            UnitStatus::Stopped => "stopped",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, UnitStatus::Active)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, UnitStatus::Failed)
    }
}

/// A unit in the store: immutable metadata plus probe state.
#[derive(Clone, Debug)]
pub struct Unit {
    pub meta: UnitMeta,
    pub status: UnitStatus,
    pub pid: Option<u32>,
    pub last_probe_time: Option<SystemTime>,
    /// Set while a restart is in flight; stale probe results are discarded
    /// for busy units.
    pub busy: bool,
    /// Scan arrival order, tie-breaker for the stable sort.
    pub discovery_order: u64,
    /// Consecutive scans that did not find this directory qualifying.
    pub missed_scans: u32,
}

impl Unit {
    pub fn new(meta: UnitMeta, discovery_order: u64) -> Self {
        Self {
            meta,
            status: UnitStatus::Unknown,
            pid: None,
            last_probe_time: None,
            busy: false,
            discovery_order,
            missed_scans: 0,
        }
    }

    pub fn identity(&self) -> &str {
        &self.meta.identity
    }
}
