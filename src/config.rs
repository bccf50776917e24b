//! Configuration Loader
//! - CLI argument parsing with clap (env-var fallbacks)
//! - Optional vmgrade.toml for SSH credentials and the reachability
//!   retry policy

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::shell::ShellConfig;

// =============================================================================
// CLI Configuration
// =============================================================================

/// Output format for grading results
#[derive(ValueEnum, Clone, Debug, Default, PartialEq)]
pub enum OutputFormat {
    /// Human-readable CLI output (to stderr)
    #[default]
    Human,
    /// Machine-readable NDJSON (to stdout)
    Json,
}

/// Vmgrade CLI - VM Snapshot Grading Harness
#[derive(Parser)]
#[command(name = "vmgrade", version, about = "VM Snapshot Grading Harness")]
pub struct Cli {
    /// Code submission to be tested
    #[arg(long, default_value = "sample-submission.py", env = "VMGRADE_SUBMISSION")]
    pub submission: PathBuf,

    /// Destination path for the submission on the guest
    #[arg(long, default_value = "/tmp/submission.py")]
    pub submission_dest: String,

    /// Test suite to test the code submission with
    #[arg(long, default_value = "sample-test-suite.py", env = "VMGRADE_TEST_SUITE")]
    pub test_suite: PathBuf,

    /// Destination path for the test suite on the guest
    #[arg(long, default_value = "/tmp/tests.py")]
    pub test_suite_dest: String,

    /// Hypervisor domain to test the code submission on
    #[arg(long, default_value = "mininet-test", env = "VMGRADE_DOMAIN")]
    pub domain_name: String,

    /// Hostname for the test domain's guest
    #[arg(long, default_value = "mininet", env = "VMGRADE_HOSTNAME")]
    pub hostname: String,

    /// Output format (also: VMGRADE_FORMAT env var)
    #[arg(long, value_enum, default_value_t = OutputFormat::Human, env = "VMGRADE_FORMAT")]
    pub format: OutputFormat,

    /// Path to a vmgrade.toml with SSH credentials and retry policy
    #[arg(long, env = "VMGRADE_CONFIG")]
    pub config: Option<PathBuf>,
}

// =============================================================================
// Grader Configuration
// =============================================================================

/// Bounded retry-with-backoff for the guest reachability probe. The guest
/// may still be booting after a cold start; attempts are spaced by a fixed
/// backoff and exhaustion surfaces as a reachability error.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff_ms: 2000,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Everything a grading run needs, passed explicitly into the orchestrator.
#[derive(Debug, Clone)]
pub struct GraderConfig {
    pub submission: PathBuf,
    pub submission_dest: String,
    pub test_suite: PathBuf,
    pub test_suite_dest: String,
    pub domain_name: String,
    pub hostname: String,
    pub shell: ShellConfig,
    pub retry: RetryPolicy,
    pub hypervisor_uri: Option<String>,
}

impl GraderConfig {
    /// Build the run configuration from CLI flags plus the optional TOML
    /// file. CLI values win for paths and names; the file carries the
    /// transport credentials and retry policy.
    pub fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let file = match &cli.config {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::default(),
        };

        Ok(Self {
            submission: cli.submission.clone(),
            submission_dest: cli.submission_dest.clone(),
            test_suite: cli.test_suite.clone(),
            test_suite_dest: cli.test_suite_dest.clone(),
            domain_name: cli.domain_name.clone(),
            hostname: cli.hostname.clone(),
            shell: file.ssh,
            retry: file.retry,
            hypervisor_uri: file.hypervisor_uri,
        })
    }
}

// =============================================================================
// TOML Configuration File
// =============================================================================

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    ssh: ShellConfig,
    #[serde(default)]
    retry: RetryPolicy,
    #[serde(default)]
    hypervisor_uri: Option<String>,
}

impl ConfigFile {
    fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {}", path.display(), e))?;
        let config: ConfigFile = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("failed to parse {}: {}", path.display(), e))?;
        Ok(config)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_cli_asserts() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["vmgrade"]);
        assert_eq!(cli.submission, PathBuf::from("sample-submission.py"));
        assert_eq!(cli.submission_dest, "/tmp/submission.py");
        assert_eq!(cli.test_suite, PathBuf::from("sample-test-suite.py"));
        assert_eq!(cli.test_suite_dest, "/tmp/tests.py");
        assert_eq!(cli.domain_name, "mininet-test");
        assert_eq!(cli.hostname, "mininet");
        assert_eq!(cli.format, OutputFormat::Human);
    }

    #[test]
    fn test_config_without_file_uses_defaults() {
        let cli = Cli::parse_from(["vmgrade", "--domain-name", "grading-vm"]);
        let config = GraderConfig::from_cli(&cli).unwrap();
        assert_eq!(config.domain_name, "grading-vm");
        assert_eq!(config.shell.user, "mininet");
        assert_eq!(config.retry.attempts, 5);
        assert_eq!(config.retry.backoff_ms, 2000);
        assert!(config.hypervisor_uri.is_none());
    }

    #[test]
    fn test_config_file_overrides() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(
            br#"
hypervisor_uri = "qemu:///system"

[ssh]
user = "grader"
port = 2222

[retry]
attempts = 3
backoff_ms = 500
"#,
        )
        .unwrap();
        f.flush().unwrap();

        let path = f.path().to_string_lossy().to_string();
        let cli = Cli::parse_from(["vmgrade", "--config", &path]);
        let config = GraderConfig::from_cli(&cli).unwrap();

        assert_eq!(config.shell.user, "grader");
        assert_eq!(config.shell.port, 2222);
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.retry.backoff(), Duration::from_millis(500));
        assert_eq!(config.hypervisor_uri.as_deref(), Some("qemu:///system"));
    }

    #[test]
    fn test_config_file_partial_sections() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"[ssh]\nport = 22022\n").unwrap();
        f.flush().unwrap();

        let path = f.path().to_string_lossy().to_string();
        let cli = Cli::parse_from(["vmgrade", "--config", &path]);
        let config = GraderConfig::from_cli(&cli).unwrap();

        assert_eq!(config.shell.port, 22022);
        assert_eq!(config.shell.user, "mininet");
        assert_eq!(config.retry.attempts, 5);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let cli = Cli::parse_from(["vmgrade", "--config", "/nonexistent/vmgrade.toml"]);
        assert!(GraderConfig::from_cli(&cli).is_err());
    }
}
