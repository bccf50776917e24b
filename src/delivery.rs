//! Artifact Delivery: checksum-verified file push to the guest
//!
//! An artifact only counts as delivered once the guest itself has verified
//! the bytes: the local digest is rendered into a `sha1sum -c` manifest,
//! both files are uploaded, and the guest runs the verification against the
//! uploaded copy. The executor must never run against an unverified file.

use crate::checksum::{checksum, render_manifest};
use crate::error::{GraderError, Result};
use crate::shell::ShellSession;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

/// A local file and where it lands on the guest.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub source: PathBuf,
    pub dest: String,
}

impl Artifact {
    pub fn new(source: impl Into<PathBuf>, dest: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            dest: dest.into(),
        }
    }
}

/// An artifact the guest has verified, with the digest that proved it.
#[derive(Debug, Clone)]
pub struct Delivered {
    pub artifact: Artifact,
    pub digest: String,
}

/// Push an artifact to the guest and verify it arrived uncorrupted.
///
/// Fails with `Integrity` (naming the source path) if the guest-side
/// verification exits non-zero; no partial "delivered" state is left.
pub fn deliver(session: &mut dyn ShellSession, artifact: &Artifact) -> Result<Delivered> {
    let digest = checksum(&artifact.source)?;

    // Manifest references the destination path so the guest checks the
    // uploaded copy, not some local path of ours.
    let mut manifest = NamedTempFile::new()
        .map_err(|e| GraderError::io(std::env::temp_dir(), e))?;
    manifest
        .write_all(render_manifest(&digest, &artifact.dest).as_bytes())
        .map_err(|e| GraderError::io(manifest.path(), e))?;
    manifest
        .flush()
        .map_err(|e| GraderError::io(manifest.path(), e))?;

    let manifest_dest = format!("{}.sha1sum", artifact.dest);
    session.upload(&artifact.source, &artifact.dest)?;
    session.upload(manifest.path(), &manifest_dest)?;

    let status = session.run(&format!("sha1sum -c {}", manifest_dest))?;
    if status != 0 {
        return Err(GraderError::Integrity(artifact.source.clone()));
    }

    Ok(Delivered {
        artifact: artifact.clone(),
        digest,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_new() {
        let artifact = Artifact::new("submission.py", "/tmp/submission.py");
        assert_eq!(artifact.source, PathBuf::from("submission.py"));
        assert_eq!(artifact.dest, "/tmp/submission.py");
    }

    #[test]
    fn test_manifest_io_error_names_the_temp_dir() {
        // Same construction deliver() uses when the manifest tempfile
        // cannot be created: the error must carry a real filesystem path
        let source = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = GraderError::io(std::env::temp_dir(), source);

        let rendered = err.to_string();
        assert!(rendered.contains(&*std::env::temp_dir().to_string_lossy()));
    }
}
