// pgsnapd/src/verify/mod.rs
use std::fs;
use std::path::Path;

use crate::checksum;
use crate::errors::{BackupError, Result};
use crate::store;

/// Restore-time integrity check: re-hashes a locally stored artifact and
/// compares it against its `.sha256` sidecar.
pub fn verify_artifact(backup_dir: &Path, artifact_name: &str) -> Result<()> {
    let bytes = fs::read(backup_dir.join(artifact_name))?;
    let sidecar_path = backup_dir.join(store::digest_name(artifact_name));
    let sidecar = fs::read_to_string(&sidecar_path)?;

    let (expected, named) = checksum::parse_sidecar(&sidecar).ok_or_else(|| {
        BackupError::Config(format!(
            "malformed digest file {}",
            sidecar_path.display()
        ))
    })?;
    if named != artifact_name {
        return Err(BackupError::Config(format!(
            "digest file {} names {:?}, not {:?}",
            sidecar_path.display(),
            named,
            artifact_name
        )));
    }

    if !checksum::verify(&bytes, &expected) {
        return Err(BackupError::DigestMismatch {
            name: artifact_name.to_string(),
            expected,
            actual: checksum::sign(&bytes),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const ARTIFACT: &str = "backup_appdb_20260830_031500.sql.gz";

    fn write_snapshot(dir: &Path, artifact_bytes: &[u8], digest_of: &[u8]) {
        fs::write(dir.join(ARTIFACT), artifact_bytes).unwrap();
        let digest = checksum::sign(digest_of);
        fs::write(
            dir.join(store::digest_name(ARTIFACT)),
            checksum::sidecar_contents(&digest, ARTIFACT),
        )
        .unwrap();
    }

    #[test]
    fn intact_artifact_verifies() {
        let dir = tempdir().unwrap();
        write_snapshot(dir.path(), b"artifact", b"artifact");
        verify_artifact(dir.path(), ARTIFACT).unwrap();
    }

    #[test]
    fn corrupted_artifact_is_a_digest_mismatch() {
        let dir = tempdir().unwrap();
        write_snapshot(dir.path(), b"bitrot", b"artifact");
        let err = verify_artifact(dir.path(), ARTIFACT).unwrap_err();
        assert!(matches!(err, BackupError::DigestMismatch { .. }));
    }

    #[test]
    fn missing_sidecar_is_an_io_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(ARTIFACT), b"artifact").unwrap();
        let err = verify_artifact(dir.path(), ARTIFACT).unwrap_err();
        assert!(matches!(err, BackupError::Io(_)));
    }
}
