//! Process manager backed by the local machine: pid liveness via signal 0,
//! identity checks via the process table, restarts via make targets in the
//! unit's build descriptor.

use async_trait::async_trait;
use std::process::Stdio;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::Mutex;

use wedash_core::backend::{ProbeError, ProcessManager, RestartError};
use wedash_core::unit::UnitMeta;

pub struct LocalProcessManager {
    system: Mutex<System>,
}

impl LocalProcessManager {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for LocalProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
fn signal_probe(pid: u32) -> Option<bool> {
    // kill(pid, 0) delivers nothing; it only reports existence. EPERM
    // means the process exists but belongs to another user.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return Some(true);
    }
    match std::io::Error::last_os_error().raw_os_error() {
        Some(libc::EPERM) => Some(true),
        Some(libc::ESRCH) => Some(false),
        _ => None,
    }
}

#[cfg(not(unix))]
fn signal_probe(_pid: u32) -> Option<bool> {
    None
}

/// A make target exists when a rule line for it starts at column zero.
fn has_target(descriptor: &str, target: &str) -> bool {
    descriptor.lines().any(|line| {
        if line.starts_with(char::is_whitespace) {
            return false;
        }
        match line.split_once(':') {
            Some((head, rest)) => {
                // `foo:` is a rule; `foo :=` is an assignment.
                head.trim_end() == target && !rest.starts_with('=')
            }
            None => false,
        }
    })
}

async fn run_make(unit: &UnitMeta, target: &str) -> Result<(), RestartError> {
    let output = tokio::process::Command::new("make")
        .arg(target)
        .current_dir(&unit.root_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(|e| RestartError::Spawn {
            id: unit.identity.clone(),
            message: e.to_string(),
        })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(RestartError::Failed {
            id: unit.identity.clone(),
            code: output.status.code(),
        })
    }
}

#[async_trait]
impl ProcessManager for LocalProcessManager {
    async fn is_alive(&self, pid: u32) -> Result<bool, ProbeError> {
        if let Some(alive) = signal_probe(pid) {
            return Ok(alive);
        }
        let mut system = self.system.lock().await;
        let refreshed =
            system.refresh_processes(ProcessesToUpdate::Some(&[Pid::from_u32(pid)]), true);
        Ok(refreshed > 0 && system.process(Pid::from_u32(pid)).is_some())
    }

    async fn identity_matches(&self, pid: u32, unit: &UnitMeta) -> Result<bool, ProbeError> {
        let mut system = self.system.lock().await;
        system.refresh_processes(ProcessesToUpdate::Some(&[Pid::from_u32(pid)]), true);
        let Some(process) = system.process(Pid::from_u32(pid)) else {
            return Ok(false);
        };

        if process.cwd() == Some(unit.root_path.as_path()) {
            return Ok(true);
        }

        // Fall back to the command line for daemons that chdir away.
        let needle = unit.root_path.to_string_lossy();
        let in_cmdline = process
            .cmd()
            .iter()
            .any(|arg| arg.to_string_lossy().contains(needle.as_ref()));
        Ok(in_cmdline)
    }

    async fn restart(&self, unit: &UnitMeta) -> Result<(), RestartError> {
        let descriptor = tokio::fs::read_to_string(&unit.build_descriptor_path)
            .await
            .map_err(|e| RestartError::Spawn {
                id: unit.identity.clone(),
                message: e.to_string(),
            })?;

        if has_target(&descriptor, "restart") {
            return run_make(unit, "restart").await;
        }
        if has_target(&descriptor, "down") && has_target(&descriptor, "up") {
            run_make(unit, "down").await?;
            return run_make(unit, "up").await;
        }
        Err(RestartError::NoTarget {
            id: unit.identity.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_target_matches_rules_only() {
        let makefile = "NAME := svc\nrestart: down up\n\techo restarting\nup:\n\techo up\n";
        assert!(has_target(makefile, "restart"));
        assert!(has_target(makefile, "up"));
        assert!(!has_target(makefile, "down"));
        // Variable assignment is not a target.
        assert!(!has_target(makefile, "NAME"));
    }

    #[test]
    fn test_indented_lines_are_recipes_not_targets() {
        let makefile = "all:\n\trestart: not-a-target\n";
        assert!(!has_target(makefile, "restart"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_own_pid_is_alive() {
        let pm = LocalProcessManager::new();
        assert!(pm.is_alive(std::process::id()).await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_wildly_large_pid_is_dead() {
        let pm = LocalProcessManager::new();
        // Above the default pid_max on Linux.
        assert!(!pm.is_alive(4_000_000).await.unwrap());
    }
}
