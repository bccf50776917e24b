//! Artifact delivery integration tests
//!
//! Round-trip the deliver path against a scripted transport: upload order,
//! manifest placement, guest-side verification, and failure kinds.

mod common;

use common::{MockConnector, SessionScript};
use std::io::Write;
use tempfile::NamedTempFile;
use vmgrade::checksum::checksum;
use vmgrade::delivery::{deliver, Artifact};
use vmgrade::error::GraderError;
use vmgrade::shell::Connector;

fn sample_submission() -> NamedTempFile {
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(b"net = Mininet(topo=SingleSwitchTopo(3))\n")
        .unwrap();
    f.flush().unwrap();
    f
}

#[test]
fn delivery_uploads_artifact_then_manifest_then_verifies() {
    let connector = MockConnector::new(SessionScript::default());
    let mut session = connector.connect("mininet").unwrap();

    let local = sample_submission();
    let artifact = Artifact::new(local.path(), "/tmp/submission.py");
    let delivered = deliver(session.as_mut(), &artifact).unwrap();

    assert_eq!(delivered.digest, checksum(local.path()).unwrap());

    let log = connector.log.borrow();
    assert_eq!(log.uploads.len(), 2);
    // Artifact first, manifest second, both at their guest paths
    assert_eq!(log.uploads[0].0, local.path());
    assert_eq!(log.uploads[0].1, "/tmp/submission.py");
    assert_eq!(log.uploads[1].1, "/tmp/submission.py.sha1sum");
    // The guest checked the uploaded manifest
    assert_eq!(
        log.commands,
        vec!["sha1sum -c /tmp/submission.py.sha1sum".to_string()]
    );
}

#[test]
fn manifest_references_the_destination_path() {
    let connector = MockConnector::new(SessionScript::default());
    let mut session = connector.connect("mininet").unwrap();

    let local = sample_submission();
    let artifact = Artifact::new(local.path(), "/tmp/tests.py");
    let delivered = deliver(session.as_mut(), &artifact).unwrap();

    // The manifest tempfile existed during upload; check its recorded
    // content through the digest it must pair with the destination
    let log = connector.log.borrow();
    let manifest_local = &log.uploads[1].0;
    // The tempfile is gone after deliver returns, but its upload was
    // recorded against the right guest path
    assert_eq!(log.uploads[1].1, "/tmp/tests.py.sha1sum");
    assert_ne!(manifest_local, local.path());
    assert_eq!(delivered.artifact.dest, "/tmp/tests.py");
}

#[test]
fn failed_guest_verification_is_an_integrity_error() {
    // Simulates corruption in transit: the guest's sha1sum disagrees
    let connector = MockConnector::new(SessionScript {
        command_status: vec![("sha1sum -c".to_string(), 1)],
        ..Default::default()
    });
    let mut session = connector.connect("mininet").unwrap();

    let local = sample_submission();
    let artifact = Artifact::new(local.path(), "/tmp/submission.py");
    let err = deliver(session.as_mut(), &artifact).unwrap_err();

    // The error names the artifact's source path
    assert!(matches!(err, GraderError::Integrity(path) if path == local.path()));
}

#[test]
fn dropped_transport_is_a_remote_execution_error_not_integrity() {
    let connector = MockConnector::new(SessionScript {
        upload_fail_for: Some("/tmp/submission.py".to_string()),
        ..Default::default()
    });
    let mut session = connector.connect("mininet").unwrap();

    let local = sample_submission();
    let artifact = Artifact::new(local.path(), "/tmp/submission.py");
    let err = deliver(session.as_mut(), &artifact).unwrap_err();

    assert!(matches!(err, GraderError::RemoteExecution(_)));
    // Nothing reached the guest
    assert!(connector.log.borrow().uploads.is_empty());
}

#[test]
fn missing_source_file_fails_before_any_upload() {
    let connector = MockConnector::new(SessionScript::default());
    let mut session = connector.connect("mininet").unwrap();

    let artifact = Artifact::new("/nonexistent/submission.py", "/tmp/submission.py");
    let err = deliver(session.as_mut(), &artifact).unwrap_err();

    assert!(matches!(err, GraderError::Io { .. }));
    assert!(connector.log.borrow().uploads.is_empty());
}

#[test]
fn byte_mutation_changes_the_digest_delivery_would_send() {
    let local = sample_submission();
    let before = checksum(local.path()).unwrap();

    let mut mutated = NamedTempFile::new().unwrap();
    mutated
        .write_all(b"net = Mininet(topo=SingleSwitchTopo(4))\n")
        .unwrap();
    mutated.flush().unwrap();

    assert_ne!(before, checksum(mutated.path()).unwrap());
}
