//! Operational tuning knobs, loadable from `wedash.yaml`.
//!
//! Every constant the engine depends on (scan cadence, eviction debounce,
//! restart timeout, buffer capacity) lives here with a sane default rather
//! than being hard-coded at its point of use.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Settings {
    /// Interval between discovery scans, in milliseconds.
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,

    /// Maximum directory depth the scanner descends to.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Consecutive missed scans before a vanished unit is evicted.
    #[serde(default = "default_evict_after_misses")]
    pub evict_after_misses: u32,

    /// Concurrent probes per batch.
    #[serde(default = "default_probe_concurrency")]
    pub probe_concurrency: usize,

    /// Bound on an external restart invocation, in milliseconds. Busy is
    /// force-cleared when it elapses.
    #[serde(default = "default_restart_timeout_ms")]
    pub restart_timeout_ms: u64,

    /// Delay before the targeted re-probe that follows a restart.
    #[serde(default = "default_restart_settle_ms")]
    pub restart_settle_ms: u64,

    /// Capacity of the visible log buffer (lines).
    #[serde(default = "default_log_buffer_cap")]
    pub log_buffer_cap: usize,

    /// Default N for show-last-N.
    #[serde(default = "default_last_n")]
    pub last_n: usize,

    /// Span of the journal window mode, in seconds.
    #[serde(default = "default_journal_window_secs")]
    pub journal_window_secs: u64,
}

fn default_scan_interval_ms() -> u64 {
    5000
}
fn default_max_depth() -> usize {
    5
}
fn default_evict_after_misses() -> u32 {
    2
}
fn default_probe_concurrency() -> usize {
    4
}
fn default_restart_timeout_ms() -> u64 {
    30_000
}
fn default_restart_settle_ms() -> u64 {
    500
}
fn default_log_buffer_cap() -> usize {
    2000
}
fn default_last_n() -> usize {
    200
}
fn default_journal_window_secs() -> u64 {
    900
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scan_interval_ms: default_scan_interval_ms(),
            max_depth: default_max_depth(),
            evict_after_misses: default_evict_after_misses(),
            probe_concurrency: default_probe_concurrency(),
            restart_timeout_ms: default_restart_timeout_ms(),
            restart_settle_ms: default_restart_settle_ms(),
            log_buffer_cap: default_log_buffer_cap(),
            last_n: default_last_n(),
            journal_window_secs: default_journal_window_secs(),
        }
    }
}

#[derive(Debug)]
pub enum SettingsError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    Invalid { field: &'static str },
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO error: {}", e),
            Self::Yaml(e) => write!(f, "YAML parse error: {}", e),
            Self::Invalid { field } => write!(f, "invalid setting: {} must be non-zero", field),
        }
    }
}

impl std::error::Error for SettingsError {}

impl From<std::io::Error> for SettingsError {
    fn from(e: std::io::Error) -> Self {
        SettingsError::Io(e)
    }
}

impl From<serde_yaml::Error> for SettingsError {
    fn from(e: serde_yaml::Error) -> Self {
        SettingsError::Yaml(e)
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    pub fn from_str(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = serde_yaml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Search for a settings file: `WEDASH_CONFIG` first, then
    /// `wedash.yaml` / `.wedash.yaml` in `start_dir` and its parents.
    /// No file found means defaults.
    pub fn discover(start_dir: &Path) -> Result<(Option<PathBuf>, Self), SettingsError> {
        if let Ok(env_path) = std::env::var("WEDASH_CONFIG") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Ok((Some(path.clone()), Self::load(&path)?));
            }
        }

        let names = ["wedash.yaml", ".wedash.yaml"];
        let mut dir = Some(start_dir);
        while let Some(current) = dir {
            for name in &names {
                let path = current.join(name);
                if path.exists() {
                    return Ok((Some(path.clone()), Self::load(&path)?));
                }
            }
            dir = current.parent();
        }

        Ok((None, Self::default()))
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.evict_after_misses == 0 {
            return Err(SettingsError::Invalid {
                field: "evict_after_misses",
            });
        }
        if self.log_buffer_cap == 0 {
            return Err(SettingsError::Invalid {
                field: "log_buffer_cap",
            });
        }
        if self.probe_concurrency == 0 {
            return Err(SettingsError::Invalid {
                field: "probe_concurrency",
            });
        }
        Ok(())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn restart_timeout(&self) -> Duration {
        Duration::from_millis(self.restart_timeout_ms)
    }

    pub fn restart_settle(&self) -> Duration {
        Duration::from_millis(self.restart_settle_ms)
    }

    pub fn journal_window(&self) -> Duration {
        Duration::from_secs(self.journal_window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.evict_after_misses, 2);
        assert_eq!(s.last_n, 200);
        assert_eq!(s.scan_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let s = Settings::from_str("scan_interval_ms: 1000\nlast_n: 50\n").unwrap();
        assert_eq!(s.scan_interval_ms, 1000);
        assert_eq!(s.last_n, 50);
        assert_eq!(s.evict_after_misses, 2);
    }

    #[test]
    fn test_zero_cap_rejected() {
        let result = Settings::from_str("log_buffer_cap: 0\n");
        assert!(matches!(result, Err(SettingsError::Invalid { .. })));
    }
}
