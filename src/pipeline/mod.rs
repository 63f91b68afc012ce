// pgsnapd/src/pipeline/mod.rs
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{error, info, warn};

use crate::checksum;
use crate::dump::DumpProducer;
use crate::errors::{BackupError, Result};
use crate::retention::{self, RetentionPolicy, RetentionReport};
use crate::store::{self, SnapshotStore};

const REMOTE_PUT_ATTEMPTS: u32 = 3;
const REMOTE_PUT_INITIAL_BACKOFF: StdDuration = StdDuration::from_secs(1);

/// One produced backup. Immutable once durable; `stores` lists the stores
/// where both the artifact and its digest sidecar were confirmed written.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub database: String,
    pub timestamp: DateTime<Utc>,
    pub artifact_name: String,
    pub digest_name: String,
    pub size: u64,
    pub digest: String,
    pub stores: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    /// Local durability achieved, remote replication failed.
    Partial,
    Failure,
}

/// Retention result for one store within a run.
#[derive(Debug)]
pub struct StoreRetention {
    pub store: String,
    pub outcome: std::result::Result<RetentionReport, BackupError>,
}

/// Structured outcome of one pipeline execution, with enough detail to
/// drive alerting: nothing here is ever silently swallowed.
#[derive(Debug)]
pub struct RunResult {
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub snapshot: Option<Snapshot>,
    pub error: Option<String>,
    pub retention: Vec<StoreRetention>,
}

impl RunResult {
    pub fn pruned(&self) -> usize {
        self.retention
            .iter()
            .filter_map(|r| r.outcome.as_ref().ok())
            .map(|report| report.deleted)
            .sum()
    }
}

/// Executes one full backup cycle: dump → checksum → local put → remote put
/// (with bounded backoff) → retention at every reachable store.
///
/// Fault policy: a dump or local-store failure classifies the run as
/// `Failure`; a remote-store failure as `Partial` (local durability already
/// holds). Retention runs after the attempted dump in every case, so stale
/// backups are trimmed even on a failed run; it is skipped for the remote
/// store only when that store reported itself unavailable. Retention errors
/// never change the dump/upload classification.
pub async fn run_once(
    dump: Arc<dyn DumpProducer>,
    local: &dyn SnapshotStore,
    remote: Option<&dyn SnapshotStore>,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> RunResult {
    let started = Utc::now();
    let mut snapshot = None;
    let mut error = None;
    let mut remote_unreachable = false;

    info!(database = dump.database(), "backup run starting");

    let outcome = match execute_backup(&dump, local, remote, now).await {
        Ok((snap, remote_error)) => {
            snapshot = Some(snap);
            match remote_error {
                None => RunOutcome::Success,
                Some(e) => {
                    remote_unreachable = matches!(e, BackupError::StoreUnavailable { .. });
                    error = Some(e.to_string());
                    RunOutcome::Partial
                }
            }
        }
        Err(e) => {
            error = Some(e.to_string());
            RunOutcome::Failure
        }
    };

    let mut retention = Vec::new();
    let mut stores: Vec<&dyn SnapshotStore> = vec![local];
    if let Some(remote) = remote {
        if remote_unreachable {
            warn!(store = remote.id(), "skipping retention at unreachable store");
        } else {
            stores.push(remote);
        }
    }
    for store in stores {
        let outcome = retention::enforce(store, policy, now).await;
        match &outcome {
            Ok(report) => {
                if report.deleted > 0 || report.orphans_removed > 0 || !report.failures.is_empty() {
                    info!(
                        store = store.id(),
                        deleted = report.deleted,
                        orphans = report.orphans_removed,
                        failures = report.failures.len(),
                        "retention pass complete"
                    );
                }
            }
            Err(e) => warn!(store = store.id(), error = %e, "retention pass failed"),
        }
        retention.push(StoreRetention {
            store: store.id().to_string(),
            outcome,
        });
    }

    let result = RunResult {
        started,
        finished: Utc::now(),
        outcome,
        snapshot,
        error,
        retention,
    };
    match result.outcome {
        RunOutcome::Success => info!(pruned = result.pruned(), "backup run succeeded"),
        RunOutcome::Partial => warn!(
            pruned = result.pruned(),
            error = result.error.as_deref().unwrap_or(""),
            "backup run partially succeeded; snapshot is durable locally only"
        ),
        RunOutcome::Failure => error!(
            error = result.error.as_deref().unwrap_or(""),
            "backup run failed"
        ),
    }
    result
}

/// Dump, sign and persist. Returns the snapshot plus the remote error, if
/// any; a local failure is returned as `Err` because local durability is
/// mandatory.
async fn execute_backup(
    dump: &Arc<dyn DumpProducer>,
    local: &dyn SnapshotStore,
    remote: Option<&dyn SnapshotStore>,
    now: DateTime<Utc>,
) -> Result<(Snapshot, Option<BackupError>)> {
    // pg_dump blocks on child I/O, so the dump runs off the async workers
    let producer = Arc::clone(dump);
    let bytes = tokio::task::spawn_blocking(move || producer.produce())
        .await
        .map_err(|e| BackupError::DumpFailed {
            cause: format!("dump task aborted: {}", e),
        })??;

    let artifact_name = store::artifact_name(dump.database(), now);
    let digest = checksum::sign(&bytes);
    let digest_name = store::digest_name(&artifact_name);
    let sidecar = checksum::sidecar_contents(&digest, &artifact_name);

    // artifact before digest: a store must never expose a digest without
    // its paired artifact
    local.put(&artifact_name, &bytes).await?;
    local.put(&digest_name, sidecar.as_bytes()).await?;
    info!(
        store = local.id(),
        artifact = %artifact_name,
        size = bytes.len(),
        "snapshot durable"
    );

    let mut snapshot = Snapshot {
        database: dump.database().to_string(),
        timestamp: now,
        artifact_name: artifact_name.clone(),
        digest_name: digest_name.clone(),
        size: bytes.len() as u64,
        digest,
        stores: vec![local.id().to_string()],
    };

    let mut remote_error = None;
    if let Some(remote) = remote {
        match replicate_with_retry(remote, &artifact_name, &bytes, &digest_name, &sidecar).await {
            Ok(()) => {
                info!(store = remote.id(), artifact = %artifact_name, "snapshot replicated");
                snapshot.stores.push(remote.id().to_string());
            }
            Err(e) => {
                warn!(store = remote.id(), error = %e, "remote replication failed");
                remote_error = Some(e);
            }
        }
    }

    Ok((snapshot, remote_error))
}

/// Re-uploading the same name with the same bytes is a no-op in effect, so
/// a bounded retry with exponential backoff is safe.
async fn replicate_with_retry(
    remote: &dyn SnapshotStore,
    artifact_name: &str,
    bytes: &[u8],
    digest_name: &str,
    sidecar: &str,
) -> Result<()> {
    let mut backoff = REMOTE_PUT_INITIAL_BACKOFF;
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = async {
            remote.put(artifact_name, bytes).await?;
            remote.put(digest_name, sidecar.as_bytes()).await
        }
        .await;
        match result {
            Ok(()) => return Ok(()),
            Err(e) if attempt >= REMOTE_PUT_ATTEMPTS => return Err(e),
            Err(e) => {
                warn!(
                    store = remote.id(),
                    attempt,
                    error = %e,
                    "remote put failed, backing off"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }
    }
}
