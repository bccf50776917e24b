//! Hypervisor Client: domain lookup, power control and snapshots
//!
//! Wraps the hypervisor's management surface behind the `Hypervisor` trait.
//! The production implementation drives the `virsh` CLI, which exposes the
//! six operations the harness needs (lookup, state query, start, snapshot
//! create/lookup/delete) without linking the libvirt C library.

use crate::error::{GraderError, Result};
use std::process::{Command, Output};

/// Power state of a guest domain as reported by the hypervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerState {
    Undefined,
    ShutOff,
    Running,
    /// A state the harness cannot grade from (paused, crashed, pmsuspended).
    Unsupported(String),
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowerState::Undefined => write!(f, "undefined"),
            PowerState::ShutOff => write!(f, "shut off"),
            PowerState::Running => write!(f, "running"),
            PowerState::Unsupported(raw) => write!(f, "{}", raw),
        }
    }
}

/// Handle to a domain that is known to be defined on the hypervisor.
#[derive(Debug, Clone)]
pub struct DomainHandle {
    pub name: String,
}

/// Handle to a snapshot created by this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub name: String,
}

/// The six hypervisor operations the harness depends on.
pub trait Hypervisor {
    fn find_domain(&self, name: &str) -> Result<DomainHandle>;
    fn power_state(&self, domain: &DomainHandle) -> Result<PowerState>;
    fn start(&self, domain: &DomainHandle) -> Result<()>;
    fn create_snapshot(&self, domain: &DomainHandle, name: &str) -> Result<Snapshot>;
    fn snapshot_exists(&self, domain: &DomainHandle, name: &str) -> Result<bool>;
    fn delete_snapshot(&self, domain: &DomainHandle, snapshot: &Snapshot) -> Result<()>;
}

// =============================================================================
// virsh-backed client
// =============================================================================

pub struct VirshClient {
    /// Hypervisor connection URI (`virsh -c`). None uses virsh's default.
    uri: Option<String>,
}

impl VirshClient {
    pub fn new(uri: Option<String>) -> Self {
        Self { uri }
    }

    fn virsh(&self, args: &[&str]) -> Result<Output> {
        let mut cmd = Command::new("virsh");
        if let Some(uri) = &self.uri {
            cmd.arg("-c").arg(uri);
        }
        cmd.args(args)
            .output()
            .map_err(|e| GraderError::io("virsh", e))
    }
}

impl Hypervisor for VirshClient {
    fn find_domain(&self, name: &str) -> Result<DomainHandle> {
        let output = self.virsh(&["dominfo", name])?;
        if !output.status.success() {
            return Err(GraderError::DomainNotFound(name.to_string()));
        }
        Ok(DomainHandle {
            name: name.to_string(),
        })
    }

    fn power_state(&self, domain: &DomainHandle) -> Result<PowerState> {
        let output = self.virsh(&["domstate", &domain.name])?;
        if !output.status.success() {
            return Err(GraderError::DomainNotFound(domain.name.clone()));
        }
        let raw = String::from_utf8_lossy(&output.stdout);
        Ok(parse_power_state(raw.trim()))
    }

    fn start(&self, domain: &DomainHandle) -> Result<()> {
        let output = self.virsh(&["start", &domain.name])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GraderError::DomainStart(
                domain.name.clone(),
                stderr.trim().to_string(),
            ));
        }
        Ok(())
    }

    fn create_snapshot(&self, domain: &DomainHandle, name: &str) -> Result<Snapshot> {
        let output = self.virsh(&["snapshot-create-as", &domain.name, name])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GraderError::Snapshot {
                domain: domain.name.clone(),
                detail: format!("create '{}' failed: {}", name, stderr.trim()),
            });
        }
        Ok(Snapshot {
            name: name.to_string(),
        })
    }

    fn snapshot_exists(&self, domain: &DomainHandle, name: &str) -> Result<bool> {
        let output = self.virsh(&["snapshot-info", &domain.name, name])?;
        Ok(output.status.success())
    }

    fn delete_snapshot(&self, domain: &DomainHandle, snapshot: &Snapshot) -> Result<()> {
        let output = self.virsh(&["snapshot-delete", &domain.name, &snapshot.name])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GraderError::Snapshot {
                domain: domain.name.clone(),
                detail: format!("delete '{}' failed: {}", snapshot.name, stderr.trim()),
            });
        }
        Ok(())
    }
}

/// Map `virsh domstate` output to the harness's state set.
fn parse_power_state(raw: &str) -> PowerState {
    match raw {
        "running" => PowerState::Running,
        "shut off" => PowerState::ShutOff,
        "" | "no state" => PowerState::Undefined,
        other => PowerState::Unsupported(other.to_string()),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_power_state_known_states() {
        assert_eq!(parse_power_state("running"), PowerState::Running);
        assert_eq!(parse_power_state("shut off"), PowerState::ShutOff);
        assert_eq!(parse_power_state("no state"), PowerState::Undefined);
        assert_eq!(parse_power_state(""), PowerState::Undefined);
    }

    #[test]
    fn test_parse_power_state_unsupported() {
        assert_eq!(
            parse_power_state("paused"),
            PowerState::Unsupported("paused".to_string())
        );
        assert_eq!(
            parse_power_state("pmsuspended"),
            PowerState::Unsupported("pmsuspended".to_string())
        );
    }

    #[test]
    fn test_power_state_display() {
        assert_eq!(PowerState::Running.to_string(), "running");
        assert_eq!(PowerState::ShutOff.to_string(), "shut off");
        assert_eq!(
            PowerState::Unsupported("paused".to_string()).to_string(),
            "paused"
        );
    }
}
