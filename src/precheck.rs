//! Local syntax pre-check boundary
//!
//! Cheap sanity check before any guest contact: compile the Python file
//! locally with `py_compile`. The orchestrator decides how a failure is
//! classified (submission fault vs broken grader payload), so this module
//! only reports the fault detail.

use std::fmt;
use std::path::Path;
use std::process::Command;

/// A file that failed the local compile check, with the compiler's detail.
#[derive(Debug)]
pub struct SyntaxFault {
    pub detail: String,
}

impl fmt::Display for SyntaxFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.detail)
    }
}

/// Compile `path` locally; Ok means the file parses.
pub fn check_syntax(path: &Path) -> Result<(), SyntaxFault> {
    let output = Command::new("python3")
        .arg("-m")
        .arg("py_compile")
        .arg(path)
        .output()
        .map_err(|e| SyntaxFault {
            detail: format!("failed to run py_compile on '{}': {}", path.display(), e),
        })?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(SyntaxFault {
        detail: stderr.trim().to_string(),
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_valid_python_passes() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"x = 1\nprint(x)\n").unwrap();
        f.flush().unwrap();

        assert!(check_syntax(f.path()).is_ok());
    }

    #[test]
    fn test_invalid_python_reports_detail() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"def broken(:\n    pass\n").unwrap();
        f.flush().unwrap();

        let fault = check_syntax(f.path()).unwrap_err();
        assert!(!fault.detail.is_empty());
    }

    #[test]
    fn test_missing_file_is_a_fault() {
        let fault = check_syntax(Path::new("/nonexistent/submission.py")).unwrap_err();
        assert!(!fault.detail.is_empty());
    }
}
