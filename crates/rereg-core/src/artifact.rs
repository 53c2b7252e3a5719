//! Installer artifact digest and removal.

use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

use crate::error::RunError;

/// SHA-256 (lowercase hex) of the file at `path`.
pub fn file_digest(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Compare a computed digest with an optional pinned one.
pub fn check_digest(actual: &str, expected: Option<&str>) -> Result<(), RunError> {
    match expected {
        Some(expected) if !expected.trim().eq_ignore_ascii_case(actual) => {
            Err(RunError::DigestMismatch {
                expected: expected.trim().to_ascii_lowercase(),
                actual: actual.to_string(),
            })
        }
        _ => Ok(()),
    }
}

/// What happened when removing the artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactRemoval {
    Removed,
    NotPresent,
    Failed(String),
}

/// Delete the artifact if it exists. Never fails the caller.
pub fn remove_artifact(path: &Path) -> ArtifactRemoval {
    match std::fs::remove_file(path) {
        Ok(()) => ArtifactRemoval::Removed,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => ArtifactRemoval::NotPresent,
        Err(e) => ArtifactRemoval::Failed(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_digest_known_value() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.msi");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            file_digest(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_check_digest() {
        let actual = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
        assert!(check_digest(actual, None).is_ok());
        assert!(check_digest(actual, Some(&actual.to_uppercase())).is_ok());
        assert!(matches!(
            check_digest(actual, Some("00")),
            Err(RunError::DigestMismatch { .. })
        ));
    }

    #[test]
    fn test_remove_artifact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("RDAgent.msi");
        std::fs::write(&path, b"msi").unwrap();

        assert_eq!(remove_artifact(&path), ArtifactRemoval::Removed);
        assert!(!path.exists());
        assert_eq!(remove_artifact(&path), ArtifactRemoval::NotPresent);
    }
}
