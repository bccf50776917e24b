//! Environment Lifecycle Manager: guaranteed setup/teardown of the guest
//!
//! Setup walks a fixed sequence of states and aborts on the first failure:
//!
//! ```text
//! Unconfigured -> DomainResolved -> DomainRunning -> GuestReachable
//!              -> SnapshotTaken (Ready)
//! ```
//!
//! Teardown deletes exactly the snapshot this run created (the name is
//! derived deterministically from the domain name, so the `Environment`
//! value alone is enough to locate it). Once setup has returned, teardown
//! must run no matter how the rest of the run went; the orchestrator owns
//! that guarantee.

use crate::config::RetryPolicy;
use crate::error::{GraderError, Result};
use crate::hypervisor::{Hypervisor, PowerState, Snapshot};
use crate::shell::Connector;

/// Guest-side liveness probe. Exit 0 means the guest is ready to grade on.
pub const LIVENESS_PROBE: &str = "mn --version";

/// The unit of rollback: which domain we grade on and which snapshot must
/// be deleted when the run ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub domain_name: String,
    pub snapshot_name: String,
}

/// Deterministic snapshot name for a run on the given domain.
pub fn snapshot_name(domain: &str) -> String {
    format!("vmgrade-{}", domain)
}

pub struct LifecycleManager<'a> {
    hypervisor: &'a dyn Hypervisor,
    connector: &'a dyn Connector,
    retry: RetryPolicy,
}

impl<'a> LifecycleManager<'a> {
    pub fn new(
        hypervisor: &'a dyn Hypervisor,
        connector: &'a dyn Connector,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            hypervisor,
            connector,
            retry,
        }
    }

    /// Stand up the test environment: resolve the domain, get it running,
    /// wait for the guest to answer the liveness probe, then snapshot it.
    ///
    /// Any failure aborts with no snapshot created, so a failed setup never
    /// needs teardown.
    pub fn setup(&self, domain_name: &str, host: &str) -> Result<Environment> {
        let domain = self.hypervisor.find_domain(domain_name)?;

        match self.hypervisor.power_state(&domain)? {
            PowerState::Running => {}
            PowerState::ShutOff => {
                // One synchronous start; if the domain is not Running when
                // it returns, that is fatal, not retryable.
                self.hypervisor.start(&domain)?;
                let state = self.hypervisor.power_state(&domain)?;
                if state != PowerState::Running {
                    return Err(GraderError::DomainStart(
                        domain_name.to_string(),
                        format!("domain reported state '{}' after start", state),
                    ));
                }
            }
            other => {
                return Err(GraderError::DomainStart(
                    domain_name.to_string(),
                    format!("domain in unsupported state '{}'", other),
                ));
            }
        }

        self.wait_reachable(host)?;

        let snapshot = self
            .hypervisor
            .create_snapshot(&domain, &snapshot_name(domain_name))?;

        Ok(Environment {
            domain_name: domain_name.to_string(),
            snapshot_name: snapshot.name,
        })
    }

    /// Tear down the environment: resolve the domain again and delete the
    /// snapshot recorded in `env`. Errors here are reported on a secondary
    /// channel by the orchestrator and never mask the run's primary outcome.
    pub fn teardown(&self, env: &Environment) -> Result<()> {
        let domain = self.hypervisor.find_domain(&env.domain_name)?;

        let snapshot = Snapshot {
            name: env.snapshot_name.clone(),
        };
        if !self.hypervisor.snapshot_exists(&domain, &snapshot.name)? {
            return Err(GraderError::Snapshot {
                domain: env.domain_name.clone(),
                detail: format!("snapshot '{}' no longer exists", snapshot.name),
            });
        }
        self.hypervisor.delete_snapshot(&domain, &snapshot)
    }

    /// Bounded retry-with-backoff around the liveness probe. The guest may
    /// still be booting after a cold start; a connect failure or a non-zero
    /// probe status both count as a failed attempt. Exhaustion surfaces as
    /// a reachability error.
    fn wait_reachable(&self, host: &str) -> Result<()> {
        let attempts = self.retry.attempts.max(1);
        let mut last_detail = String::new();

        for attempt in 1..=attempts {
            match self.probe(host) {
                Ok(()) => return Ok(()),
                Err(e) => last_detail = e.to_string(),
            }
            if attempt < attempts {
                std::thread::sleep(self.retry.backoff());
            }
        }

        Err(GraderError::Connection {
            host: host.to_string(),
            detail: format!(
                "guest not reachable after {} attempt(s): {}",
                attempts, last_detail
            ),
        })
    }

    fn probe(&self, host: &str) -> Result<()> {
        let mut session = self.connector.connect(host)?;
        let result = session.run(LIVENESS_PROBE);
        session.close();

        match result? {
            0 => Ok(()),
            status => Err(GraderError::Connection {
                host: host.to_string(),
                detail: format!("liveness probe exited with status {}", status),
            }),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_name_is_deterministic_per_domain() {
        assert_eq!(snapshot_name("mininet-test"), "vmgrade-mininet-test");
        assert_eq!(snapshot_name("mininet-test"), snapshot_name("mininet-test"));
        assert_ne!(snapshot_name("vm-a"), snapshot_name("vm-b"));
    }

    #[test]
    fn test_environment_carries_both_identities() {
        let env = Environment {
            domain_name: "mininet-test".to_string(),
            snapshot_name: snapshot_name("mininet-test"),
        };
        assert_eq!(env.domain_name, "mininet-test");
        assert_eq!(env.snapshot_name, "vmgrade-mininet-test");
    }
}
