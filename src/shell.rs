//! Remote Shell Client: command execution and file transfer against the guest
//!
//! The transport is the system OpenSSH client (`ssh`/`scp`) driven in batch
//! mode, wrapped behind the `ShellSession` trait so the lifecycle, delivery
//! and executor layers can be tested against scripted sessions.
//!
//! ## Exit status vs transport failure
//!
//! OpenSSH reserves exit code 255 for its own transport errors (dropped
//! connection, auth rejected mid-session). A remote command can never
//! legitimately report 255 through this client; it is mapped to
//! `RemoteExecution` so callers see a transport fault, not a command result.

use crate::error::{GraderError, Result};
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

/// Credentials and endpoint options for the guest shell service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    pub user: String,
    pub port: u16,
    pub keyfile: PathBuf,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            user: "mininet".to_string(),
            port: 22,
            keyfile: PathBuf::from("~/.ssh/id_rsa"),
        }
    }
}

/// One phase's shell session. Implementations must fail fast: a dropped
/// transport surfaces as `RemoteExecution`, a failed connect as `Connection`.
pub trait ShellSession {
    /// Execute a command synchronously and return its exit status.
    fn run(&mut self, command: &str) -> Result<i64>;

    /// Execute a command and stream its output as it arrives.
    fn run_streaming(&mut self, command: &str) -> Result<Box<dyn OutputStream>>;

    /// Copy a local file to a path on the guest.
    fn upload(&mut self, local: &Path, remote: &str) -> Result<()>;

    /// Release the session. Safe to call multiple times.
    fn close(&mut self);
}

/// Live output of a streaming remote command.
///
/// Chunks arrive in the order the guest produced them and the sequence is
/// finite: `next_chunk` returns `None` once the remote process has exited.
/// The exit status is only available after the stream is fully drained;
/// draining it is the synchronization point.
pub trait OutputStream {
    fn next_chunk(&mut self) -> Result<Option<String>>;

    /// Exit status of the remote command. Errors if called before the
    /// stream has been drained to `None`.
    fn exit_status(&mut self) -> Result<i64>;
}

/// Session factory. Each orchestration phase opens its own session through
/// one of these and closes it when the phase ends.
pub trait Connector {
    fn connect(&self, host: &str) -> Result<Box<dyn ShellSession>>;
}

// =============================================================================
// OpenSSH-backed session
// =============================================================================

pub struct OpenSshConnector {
    pub config: ShellConfig,
}

impl Connector for OpenSshConnector {
    fn connect(&self, host: &str) -> Result<Box<dyn ShellSession>> {
        Ok(Box::new(OpenSshSession::connect(host, &self.config)?))
    }
}

pub struct OpenSshSession {
    host: String,
    config: ShellConfig,
    closed: bool,
}

impl OpenSshSession {
    /// Connect to the guest. Blocking; probes the transport with a no-op
    /// command so unreachable hosts and bad credentials fail here, as a
    /// `Connection` error, rather than mid-run.
    pub fn connect(host: &str, config: &ShellConfig) -> Result<Self> {
        let session = Self {
            host: host.to_string(),
            config: config.clone(),
            closed: false,
        };

        let output = session
            .ssh_command("true")
            .output()
            .map_err(|e| GraderError::Connection {
                host: host.to_string(),
                detail: format!("failed to spawn ssh: {}", e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GraderError::Connection {
                host: host.to_string(),
                detail: stderr.trim().to_string(),
            });
        }
        Ok(session)
    }

    fn ssh_command(&self, remote_command: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-p")
            .arg(self.config.port.to_string())
            .arg("-i")
            .arg(expand_home(&self.config.keyfile))
            .arg(format!("{}@{}", self.config.user, self.host))
            .arg("--")
            .arg(remote_command);
        cmd
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(GraderError::RemoteExecution(
                "session already closed".to_string(),
            ));
        }
        Ok(())
    }
}

impl ShellSession for OpenSshSession {
    fn run(&mut self, command: &str) -> Result<i64> {
        self.ensure_open()?;
        let status = self
            .ssh_command(command)
            .stdout(Stdio::null())
            .status()
            .map_err(|e| GraderError::RemoteExecution(format!("ssh spawn failed: {}", e)))?;

        match status.code() {
            Some(255) => Err(GraderError::RemoteExecution(format!(
                "transport dropped while running '{}'",
                command
            ))),
            Some(code) => Ok(code as i64),
            None => Err(GraderError::RemoteExecution(
                "ssh terminated by signal".to_string(),
            )),
        }
    }

    fn run_streaming(&mut self, command: &str) -> Result<Box<dyn OutputStream>> {
        self.ensure_open()?;
        let mut child = self
            .ssh_command(command)
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| GraderError::RemoteExecution(format!("ssh spawn failed: {}", e)))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            GraderError::RemoteExecution("failed to capture remote stdout".to_string())
        })?;

        Ok(Box::new(SshOutputStream {
            child,
            stdout: Some(stdout),
            pending: Vec::new(),
            finished: None,
            status: None,
        }))
    }

    fn upload(&mut self, local: &Path, remote: &str) -> Result<()> {
        self.ensure_open()?;
        let output = Command::new("scp")
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-P")
            .arg(self.config.port.to_string())
            .arg("-i")
            .arg(expand_home(&self.config.keyfile))
            .arg(local)
            .arg(format!("{}@{}:{}", self.config.user, self.host, remote))
            .output()
            .map_err(|e| GraderError::RemoteExecution(format!("scp spawn failed: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GraderError::RemoteExecution(format!(
                "upload of '{}' failed: {}",
                local.display(),
                stderr.trim()
            )));
        }
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Streaming handle over a live `ssh` child process. Reading blocks on the
/// pipe (no busy-wait); EOF on stdout means the remote process exited.
///
/// Raw reads can split a multi-byte UTF-8 character across two chunks, so
/// undecodable trailing bytes are held in `pending` until the next read
/// completes them.
struct SshOutputStream {
    child: Child,
    stdout: Option<ChildStdout>,
    pending: Vec<u8>,
    /// Status collected at EOF, held back until the caller has seen the end
    /// of the stream
    finished: Option<i64>,
    /// Status exposed through `exit_status`, set only once drained
    status: Option<i64>,
}

impl OutputStream for SshOutputStream {
    fn next_chunk(&mut self) -> Result<Option<String>> {
        while let Some(stdout) = self.stdout.as_mut() {
            let mut buf = [0u8; 4096];
            let n = stdout
                .read(&mut buf)
                .map_err(|e| GraderError::RemoteExecution(format!("stream read failed: {}", e)))?;

            if n == 0 {
                // Remote process exited; collect the status but keep it
                // back until the caller has drained the stream to None.
                self.stdout = None;
                let status = self
                    .child
                    .wait()
                    .map_err(|e| GraderError::RemoteExecution(format!("wait failed: {}", e)))?;
                match status.code() {
                    Some(255) => {
                        return Err(GraderError::RemoteExecution(
                            "transport dropped during streaming run".to_string(),
                        ))
                    }
                    Some(code) => self.finished = Some(code as i64),
                    None => {
                        return Err(GraderError::RemoteExecution(
                            "ssh terminated by signal".to_string(),
                        ))
                    }
                }
                break;
            }

            self.pending.extend_from_slice(&buf[..n]);
            if let Some(chunk) = take_decoded(&mut self.pending, false) {
                return Ok(Some(chunk));
            }
            // Everything buffered so far is an incomplete sequence; read on.
        }

        if let Some(chunk) = take_decoded(&mut self.pending, true) {
            return Ok(Some(chunk));
        }
        self.status = self.finished;
        Ok(None)
    }

    fn exit_status(&mut self) -> Result<i64> {
        self.status.ok_or_else(|| {
            GraderError::RemoteExecution(
                "exit status requested before output stream was drained".to_string(),
            )
        })
    }
}

/// Take the decodable prefix of `pending` as a string. A trailing
/// incomplete UTF-8 sequence is left buffered for the next read unless the
/// stream hit EOF, in which case it is flushed with replacement characters.
fn take_decoded(pending: &mut Vec<u8>, eof: bool) -> Option<String> {
    if pending.is_empty() {
        return None;
    }
    match std::str::from_utf8(pending) {
        Ok(s) => {
            let chunk = s.to_owned();
            pending.clear();
            Some(chunk)
        }
        Err(e) if e.error_len().is_none() && !eof => {
            // The tail is a character cut off mid-sequence
            let valid = e.valid_up_to();
            if valid == 0 {
                return None;
            }
            let chunk = String::from_utf8_lossy(&pending[..valid]).into_owned();
            pending.drain(..valid);
            Some(chunk)
        }
        Err(_) => {
            // Genuinely invalid bytes (or a truncated tail at EOF)
            let chunk = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            Some(chunk)
        }
    }
}

impl Drop for SshOutputStream {
    fn drop(&mut self) {
        // Abandoned stream: don't leave the ssh child around.
        if self.status.is_none() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

fn expand_home(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_config_defaults() {
        let config = ShellConfig::default();
        assert_eq!(config.user, "mininet");
        assert_eq!(config.port, 22);
        assert_eq!(config.keyfile, PathBuf::from("~/.ssh/id_rsa"));
    }

    #[test]
    fn test_shell_config_from_toml() {
        let config: ShellConfig = toml::from_str(
            r#"
user = "grader"
port = 2222
"#,
        )
        .unwrap();
        assert_eq!(config.user, "grader");
        assert_eq!(config.port, 2222);
        // Unset keys fall back to defaults
        assert_eq!(config.keyfile, PathBuf::from("~/.ssh/id_rsa"));
    }

    #[test]
    fn test_expand_home() {
        std::env::set_var("HOME", "/home/grader");
        assert_eq!(
            expand_home(Path::new("~/.ssh/id_rsa")),
            PathBuf::from("/home/grader/.ssh/id_rsa")
        );
        // Absolute paths pass through untouched
        assert_eq!(
            expand_home(Path::new("/etc/keys/id_rsa")),
            PathBuf::from("/etc/keys/id_rsa")
        );
    }

    /// Stream over a local child process; the drain-then-status behavior
    /// is the same regardless of what spawned the pipe.
    fn stream_over(command: &str) -> SshOutputStream {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        let stdout = child.stdout.take().unwrap();
        SshOutputStream {
            child,
            stdout: Some(stdout),
            pending: Vec::new(),
            finished: None,
            status: None,
        }
    }

    #[test]
    fn test_exit_status_before_drain_is_an_error() {
        let mut stream = stream_over("echo one; exit 7");

        // Before any read
        assert!(matches!(
            stream.exit_status(),
            Err(GraderError::RemoteExecution(_))
        ));

        // Mid-stream: output seen, but not yet drained to None
        let first = stream.next_chunk().unwrap().unwrap();
        assert!(first.contains("one"));
        assert!(stream.exit_status().is_err());

        // Draining is the synchronization point
        while stream.next_chunk().unwrap().is_some() {}
        assert_eq!(stream.exit_status().unwrap(), 7);
    }

    #[test]
    fn test_take_decoded_holds_split_multibyte_char() {
        let bytes = "Grade: 87% ✓".as_bytes();
        // Split inside the 3-byte '✓'
        let (head, tail) = bytes.split_at(bytes.len() - 2);

        let mut pending = head.to_vec();
        let first = take_decoded(&mut pending, false).unwrap();
        assert_eq!(first, "Grade: 87% ");
        assert!(!first.contains('\u{FFFD}'));
        assert_eq!(pending.len(), 1);

        pending.extend_from_slice(tail);
        let second = take_decoded(&mut pending, false).unwrap();
        assert_eq!(second, "✓");
        assert!(pending.is_empty());
    }

    #[test]
    fn test_take_decoded_incomplete_prefix_waits_for_more() {
        let mut pending = vec![0xE2];
        assert!(take_decoded(&mut pending, false).is_none());
        assert_eq!(pending, vec![0xE2]);
    }

    #[test]
    fn test_take_decoded_flushes_truncated_tail_at_eof() {
        let mut pending = vec![0xE2, 0x9C];
        let chunk = take_decoded(&mut pending, true).unwrap();
        assert!(chunk.contains('\u{FFFD}'));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_closed_session_rejects_commands() {
        let mut session = OpenSshSession {
            host: "mininet".to_string(),
            config: ShellConfig::default(),
            closed: false,
        };
        session.close();
        session.close(); // idempotent

        let err = session.run("true").unwrap_err();
        assert!(matches!(err, GraderError::RemoteExecution(_)));
    }
}
