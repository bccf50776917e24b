//! Shared mocks for integration tests: a scripted hypervisor and a scripted
//! shell transport, plus a reporter that records every event it sees.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use vmgrade::error::{GraderError, Result};
use vmgrade::hypervisor::{DomainHandle, Hypervisor, PowerState, Snapshot};
use vmgrade::reporter::Reporter;
use vmgrade::shell::{Connector, OutputStream, ShellSession};

// =============================================================================
// Mock Hypervisor
// =============================================================================

#[derive(Default)]
pub struct MockHypervisor {
    domains: RefCell<HashMap<String, PowerState>>,
    snapshots: RefCell<HashSet<(String, String)>>,
    pub created: RefCell<Vec<String>>,
    pub deleted: RefCell<Vec<String>>,
    pub refuse_start: bool,
    /// start() succeeds but the domain never reaches Running
    pub stuck_after_start: bool,
    pub fail_delete: bool,
}

impl MockHypervisor {
    pub fn with_domain(name: &str, state: PowerState) -> Self {
        let hv = Self::default();
        hv.domains.borrow_mut().insert(name.to_string(), state);
        hv
    }

    pub fn seed_snapshot(&self, domain: &str, name: &str) {
        self.snapshots
            .borrow_mut()
            .insert((domain.to_string(), name.to_string()));
    }

    pub fn has_snapshot(&self, domain: &str, name: &str) -> bool {
        self.snapshots
            .borrow()
            .contains(&(domain.to_string(), name.to_string()))
    }
}

impl Hypervisor for MockHypervisor {
    fn find_domain(&self, name: &str) -> Result<DomainHandle> {
        if !self.domains.borrow().contains_key(name) {
            return Err(GraderError::DomainNotFound(name.to_string()));
        }
        Ok(DomainHandle {
            name: name.to_string(),
        })
    }

    fn power_state(&self, domain: &DomainHandle) -> Result<PowerState> {
        self.domains
            .borrow()
            .get(&domain.name)
            .cloned()
            .ok_or_else(|| GraderError::DomainNotFound(domain.name.clone()))
    }

    fn start(&self, domain: &DomainHandle) -> Result<()> {
        if self.refuse_start {
            return Err(GraderError::DomainStart(
                domain.name.clone(),
                "hypervisor refused".to_string(),
            ));
        }
        if !self.stuck_after_start {
            self.domains
                .borrow_mut()
                .insert(domain.name.clone(), PowerState::Running);
        }
        Ok(())
    }

    fn create_snapshot(&self, domain: &DomainHandle, name: &str) -> Result<Snapshot> {
        self.snapshots
            .borrow_mut()
            .insert((domain.name.clone(), name.to_string()));
        self.created.borrow_mut().push(name.to_string());
        Ok(Snapshot {
            name: name.to_string(),
        })
    }

    fn snapshot_exists(&self, domain: &DomainHandle, name: &str) -> Result<bool> {
        Ok(self.has_snapshot(&domain.name, name))
    }

    fn delete_snapshot(&self, domain: &DomainHandle, snapshot: &Snapshot) -> Result<()> {
        if self.fail_delete {
            return Err(GraderError::Snapshot {
                domain: domain.name.clone(),
                detail: format!("delete '{}' failed: snapshot is in use", snapshot.name),
            });
        }
        let removed = self
            .snapshots
            .borrow_mut()
            .remove(&(domain.name.clone(), snapshot.name.clone()));
        if !removed {
            return Err(GraderError::Snapshot {
                domain: domain.name.clone(),
                detail: format!("snapshot '{}' does not exist", snapshot.name),
            });
        }
        self.deleted.borrow_mut().push(snapshot.name.clone());
        Ok(())
    }
}

// =============================================================================
// Mock Shell Transport
// =============================================================================

/// What every session spawned by a `MockConnector` does.
#[derive(Default, Clone)]
pub struct SessionScript {
    /// Exit status per command prefix; unmatched commands exit 0
    pub command_status: Vec<(String, i64)>,
    /// connect() fails with a Connection error
    pub connect_fail: bool,
    /// upload() to a destination containing this string drops the transport
    pub upload_fail_for: Option<String>,
    /// Output chunks for run_streaming, in guest order
    pub stream_chunks: Vec<String>,
    /// Exit status reported after the stream is drained
    pub stream_status: i64,
}

/// Everything that happened on the transport, across all sessions.
#[derive(Default)]
pub struct TransportLog {
    pub connects: usize,
    pub closes: usize,
    pub commands: Vec<String>,
    pub uploads: Vec<(PathBuf, String)>,
}

pub struct MockConnector {
    pub script: SessionScript,
    pub log: Rc<RefCell<TransportLog>>,
}

impl MockConnector {
    pub fn new(script: SessionScript) -> Self {
        Self {
            script,
            log: Rc::new(RefCell::new(TransportLog::default())),
        }
    }
}

impl Connector for MockConnector {
    fn connect(&self, host: &str) -> Result<Box<dyn ShellSession>> {
        if self.script.connect_fail {
            return Err(GraderError::Connection {
                host: host.to_string(),
                detail: "no route to host".to_string(),
            });
        }
        self.log.borrow_mut().connects += 1;
        Ok(Box::new(MockSession {
            script: self.script.clone(),
            log: Rc::clone(&self.log),
        }))
    }
}

pub struct MockSession {
    script: SessionScript,
    log: Rc<RefCell<TransportLog>>,
}

impl ShellSession for MockSession {
    fn run(&mut self, command: &str) -> Result<i64> {
        self.log.borrow_mut().commands.push(command.to_string());
        for (prefix, status) in &self.script.command_status {
            if command.starts_with(prefix.as_str()) {
                return Ok(*status);
            }
        }
        Ok(0)
    }

    fn run_streaming(&mut self, command: &str) -> Result<Box<dyn OutputStream>> {
        self.log.borrow_mut().commands.push(command.to_string());
        Ok(Box::new(MockStream {
            chunks: self.script.stream_chunks.clone().into(),
            status: self.script.stream_status,
            drained: false,
        }))
    }

    fn upload(&mut self, local: &Path, remote: &str) -> Result<()> {
        if let Some(pattern) = &self.script.upload_fail_for {
            if remote.contains(pattern.as_str()) {
                return Err(GraderError::RemoteExecution(format!(
                    "upload of '{}' failed: connection reset",
                    local.display()
                )));
            }
        }
        self.log
            .borrow_mut()
            .uploads
            .push((local.to_path_buf(), remote.to_string()));
        Ok(())
    }

    fn close(&mut self) {
        self.log.borrow_mut().closes += 1;
    }
}

pub struct MockStream {
    chunks: VecDeque<String>,
    status: i64,
    drained: bool,
}

impl OutputStream for MockStream {
    fn next_chunk(&mut self) -> Result<Option<String>> {
        match self.chunks.pop_front() {
            Some(chunk) => Ok(Some(chunk)),
            None => {
                self.drained = true;
                Ok(None)
            }
        }
    }

    fn exit_status(&mut self) -> Result<i64> {
        if !self.drained {
            return Err(GraderError::RemoteExecution(
                "exit status requested before output stream was drained".to_string(),
            ));
        }
        Ok(self.status)
    }
}

// =============================================================================
// Recording Reporter
// =============================================================================

#[derive(Default)]
pub struct RecordingReporter {
    pub phases: Vec<String>,
    pub output: String,
    pub grade: Option<u8>,
    pub grading_failure: Option<String>,
    pub infrastructure_failure: Option<String>,
    pub teardown_failure: Option<String>,
}

impl Reporter for RecordingReporter {
    fn on_run_start(&mut self, _domain: &str, _host: &str) {}

    fn on_phase_start(&mut self, phase: &str) {
        self.phases.push(phase.to_string());
    }

    fn on_phase_complete(&mut self, _phase: &str) {}

    fn on_test_output(&mut self, chunk: &str) {
        self.output.push_str(chunk);
    }

    fn on_grade(&mut self, percent: u8) {
        self.grade = Some(percent);
    }

    fn on_grading_failure(&mut self, detail: &str) {
        self.grading_failure = Some(detail.to_string());
    }

    fn on_infrastructure_failure(&mut self, message: &str) {
        self.infrastructure_failure = Some(message.to_string());
    }

    fn on_teardown_failure(&mut self, message: &str) {
        self.teardown_failure = Some(message.to_string());
    }
}
