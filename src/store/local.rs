// pgsnapd/src/store/local.rs
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use tempfile::NamedTempFile;

use crate::errors::{BackupError, Result};
use crate::store::{ARTIFACT_PREFIX, SnapshotStore};

/// Directory-backed snapshot store.
///
/// `put` stages the object in a temp file inside the target directory and
/// renames it into place, so a concurrent `list` or read never observes a
/// half-written object.
pub struct LocalStore {
    id: String,
    dir: PathBuf,
}

impl LocalStore {
    pub fn new(id: impl Into<String>, dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { id: id.into(), dir })
    }

    fn write_err(&self, name: &str, cause: impl std::fmt::Display) -> BackupError {
        BackupError::StoreWrite {
            store: self.id.clone(),
            name: name.to_string(),
            cause: cause.to_string(),
        }
    }
}

#[async_trait]
impl SnapshotStore for LocalStore {
    fn id(&self) -> &str {
        &self.id
    }

    async fn put(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|e| self.write_err(name, e))?;
        tmp.write_all(bytes).map_err(|e| self.write_err(name, e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| self.write_err(name, e))?;
        tmp.persist(self.dir.join(name))
            .map_err(|e| self.write_err(name, e))?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Ok(name) = entry.file_name().into_string() {
                if name.starts_with(ARTIFACT_PREFIX) {
                    names.push(name);
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.dir.join(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BackupError::StoreDelete {
                store: self.id.clone(),
                name: name.to_string(),
                cause: e.to_string(),
            }),
        }
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.dir.join(name).is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store(dir: &std::path::Path) -> LocalStore {
        LocalStore::new("local", dir).unwrap()
    }

    #[tokio::test]
    async fn put_then_read_back() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store
            .put("backup_appdb_20260830_031500.sql.gz", b"artifact bytes")
            .await
            .unwrap();

        assert!(
            store
                .exists("backup_appdb_20260830_031500.sql.gz")
                .await
                .unwrap()
        );
        let on_disk = fs::read(dir.path().join("backup_appdb_20260830_031500.sql.gz")).unwrap();
        assert_eq!(on_disk, b"artifact bytes");
    }

    #[tokio::test]
    async fn put_leaves_no_temp_residue() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store
            .put("backup_appdb_20260830_031500.sql.gz", b"bytes")
            .await
            .unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries, vec!["backup_appdb_20260830_031500.sql.gz"]);
    }

    #[tokio::test]
    async fn put_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let name = "backup_appdb_20260830_031500.sql.gz";
        store.put(name, b"same bytes").await.unwrap();
        store.put(name, b"same bytes").await.unwrap();

        assert_eq!(store.list().await.unwrap(), vec![name.to_string()]);
        assert_eq!(fs::read(dir.path().join(name)).unwrap(), b"same bytes");
    }

    #[tokio::test]
    async fn delete_of_missing_object_is_not_an_error() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store
            .delete("backup_appdb_20200101_000000.sql.gz")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn list_is_sorted_and_ignores_foreign_files() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store
            .put("backup_appdb_20260830_031500.sql.gz", b"b")
            .await
            .unwrap();
        store
            .put("backup_appdb_20260829_031500.sql.gz", b"a")
            .await
            .unwrap();
        fs::write(dir.path().join("notes.txt"), b"unrelated").unwrap();

        assert_eq!(
            store.list().await.unwrap(),
            vec![
                "backup_appdb_20260829_031500.sql.gz".to_string(),
                "backup_appdb_20260830_031500.sql.gz".to_string(),
            ]
        );
        // repeated listing has no side effects
        assert_eq!(store.list().await.unwrap().len(), 2);
    }
}
