//! Integrity Codec: streaming SHA-1 digests and verification manifests
//!
//! Artifacts are verified on the guest with `sha1sum -c`, so the digest and
//! the manifest line format must match what that tool expects: a lowercase
//! hex digest, two spaces, then the path.

use crate::error::{GraderError, Result};
use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Read chunk size. Files are streamed, never loaded whole.
const CHUNK_SIZE: usize = 65536;

/// Compute the SHA-1 digest of a file as a lowercase hex string.
pub fn checksum(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| GraderError::io(path, e))?;
    let mut hasher = Sha1::new();
    let mut buf = [0u8; CHUNK_SIZE];

    loop {
        let n = file.read(&mut buf).map_err(|e| GraderError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Render the one-line manifest `sha1sum -c` consumes: "digest  path".
pub fn render_manifest(digest: &str, path: &str) -> String {
    format!("{}  {}\n", digest, path)
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
    fn test_checksum_is_deterministic() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"h1 = net.addHost('h1')\n").unwrap();
        f.flush().unwrap();

        let a = checksum(f.path()).unwrap();
        let b = checksum(f.path()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 40); // 160-bit digest in hex
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
    }

    #[test]
    fn test_checksum_known_vector() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"abc").unwrap();
        f.flush().unwrap();

        // sha1("abc")
        assert_eq!(
            checksum(f.path()).unwrap(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_single_byte_mutation_changes_digest() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"print('hello')\n").unwrap();
        f.flush().unwrap();
        let before = checksum(f.path()).unwrap();

        let mut g = NamedTempFile::new().unwrap();
        g.write_all(b"print('hellp')\n").unwrap();
        g.flush().unwrap();
        let after = checksum(g.path()).unwrap();

        assert_ne!(before, after);
    }

    #[test]
    fn test_checksum_streams_large_file() {
        let mut f = NamedTempFile::new().unwrap();
        // Spans multiple read chunks
        let data = vec![0x5au8; CHUNK_SIZE * 3 + 17];
        f.write_all(&data).unwrap();
        f.flush().unwrap();

        let whole = checksum(f.path()).unwrap();
        let mut hasher = Sha1::new();
        hasher.update(&data);
        assert_eq!(whole, hex::encode(hasher.finalize()));
    }

    #[test]
    fn test_checksum_missing_file_is_io_error() {
        let err = checksum(Path::new("/nonexistent/submission.py")).unwrap_err();
        assert!(matches!(err, GraderError::Io { .. }));
    }

    #[test]
    fn test_render_manifest_format() {
        let line = render_manifest("a9993e364706816aba3e25717850c26c9cd0d89d", "/tmp/tests.py");
        assert_eq!(
            line,
            "a9993e364706816aba3e25717850c26c9cd0d89d  /tmp/tests.py\n"
        );
    }
}
