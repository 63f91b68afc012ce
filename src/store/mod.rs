// pgsnapd/src/store/mod.rs
pub mod local;
pub mod s3;
#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::errors::Result;

pub use local::LocalStore;
pub use s3::S3Store;

pub const ARTIFACT_PREFIX: &str = "backup_";
pub const ARTIFACT_SUFFIX: &str = ".sql.gz";
pub const DIGEST_SUFFIX: &str = ".sha256";

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// A place snapshots live: the local backup directory or a remote bucket.
///
/// Both implementations must make `put` atomic from the perspective of
/// readers (write-to-temp-then-rename locally, atomic object replace
/// remotely) and `delete` idempotent: deleting an absent object succeeds.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Identifier used in logs, errors and run reports.
    fn id(&self) -> &str;

    async fn put(&self, name: &str, bytes: &[u8]) -> Result<()>;

    /// Names of all backup objects (artifacts and digest sidecars) at this
    /// store, sorted ascending. Restartable, no side effects.
    async fn list(&self) -> Result<Vec<String>>;

    async fn delete(&self, name: &str) -> Result<()>;

    async fn exists(&self, name: &str) -> Result<bool>;
}

/// `backup_<database>_<YYYYMMDD_HHMMSS>.sql.gz`
///
/// The embedded timestamp is authoritative for retention; store mtimes are
/// never consulted.
pub fn artifact_name(database: &str, timestamp: DateTime<Utc>) -> String {
    format!(
        "{}{}_{}{}",
        ARTIFACT_PREFIX,
        database,
        timestamp.format(TIMESTAMP_FORMAT),
        ARTIFACT_SUFFIX
    )
}

pub fn digest_name(artifact: &str) -> String {
    format!("{}{}", artifact, DIGEST_SUFFIX)
}

/// Recovers `(database, timestamp)` from an artifact name, or `None` if the
/// name does not follow the naming contract. Database names may themselves
/// contain underscores, so the timestamp is taken from the fixed-width tail.
pub fn parse_artifact_name(name: &str) -> Option<(String, DateTime<Utc>)> {
    let stem = name
        .strip_prefix(ARTIFACT_PREFIX)?
        .strip_suffix(ARTIFACT_SUFFIX)?;
    // <database>_<YYYYMMDD_HHMMSS>: the timestamp occupies the last 15 bytes.
    let split = stem.len().checked_sub(15).filter(|&n| n >= 2)?;
    if !stem.is_char_boundary(split) {
        return None;
    }
    let (head, ts_str) = stem.split_at(split);
    let database = head.strip_suffix('_')?;
    if database.is_empty() {
        return None;
    }
    let timestamp = NaiveDateTime::parse_from_str(ts_str, TIMESTAMP_FORMAT).ok()?;
    Some((database.to_string(), timestamp.and_utc()))
}

pub fn is_artifact(name: &str) -> bool {
    parse_artifact_name(name).is_some()
}

pub fn is_digest(name: &str) -> bool {
    name.strip_suffix(DIGEST_SUFFIX).is_some_and(is_artifact)
}
