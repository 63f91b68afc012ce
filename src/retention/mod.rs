// pgsnapd/src/retention/mod.rs
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::store::{self, SnapshotStore};

/// Maximum snapshot age; applied independently to each configured store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age: Duration,
}

impl RetentionPolicy {
    pub fn days(days: u32) -> Self {
        Self {
            max_age: Duration::days(i64::from(days)),
        }
    }
}

/// Outcome of one retention pass at one store. Per-object deletion failures
/// are non-fatal and collected here rather than aborting the pass.
#[derive(Debug, Default)]
pub struct RetentionReport {
    /// Artifacts considered (names that parse under the naming contract).
    pub scanned: usize,
    /// Snapshots fully pruned (artifact removed).
    pub deleted: usize,
    /// Orphaned digest sidecars removed.
    pub orphans_removed: usize,
    pub failures: Vec<String>,
}

/// Prunes every snapshot at `store` whose embedded timestamp is older than
/// the policy allows.
///
/// The digest sidecar is always deleted before its artifact; if the digest
/// delete fails the artifact is kept for this pass, so a stale digest can
/// never outlive its artifact. Digests with no paired artifact are removed
/// regardless of age. Fails only when the store cannot be listed at all.
pub async fn enforce(
    store: &dyn SnapshotStore,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> Result<RetentionReport> {
    let names = store.list().await?;
    let mut report = RetentionReport::default();

    let artifacts: Vec<&String> = names.iter().filter(|n| store::is_artifact(n)).collect();
    let digests: Vec<&String> = names.iter().filter(|n| store::is_digest(n)).collect();

    for digest in &digests {
        let paired = digest.strip_suffix(store::DIGEST_SUFFIX).unwrap_or(digest);
        if !artifacts.iter().any(|a| a.as_str() == paired) {
            debug!(store = store.id(), digest = %digest, "removing orphaned digest");
            match store.delete(digest).await {
                Ok(()) => report.orphans_removed += 1,
                Err(e) => report.failures.push(e.to_string()),
            }
        }
    }

    for artifact in &artifacts {
        let Some((_, timestamp)) = store::parse_artifact_name(artifact) else {
            continue;
        };
        report.scanned += 1;
        if now - timestamp <= policy.max_age {
            continue;
        }

        let digest = store::digest_name(artifact);
        if let Err(e) = store.delete(&digest).await {
            // Deleting the artifact now would leave a digest with no
            // artifact behind it; retry the whole pair next pass.
            warn!(store = store.id(), artifact = %artifact, error = %e,
                "digest delete failed, keeping artifact until next pass");
            report.failures.push(e.to_string());
            continue;
        }
        match store.delete(artifact).await {
            Ok(()) => {
                info!(store = store.id(), artifact = %artifact, "pruned expired snapshot");
                report.deleted += 1;
            }
            Err(e) => report.failures.push(e.to_string()),
        }
    }

    Ok(report)
}
