// pgsnapd/src/daemon/mod.rs
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::Notify;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::dump::PgDump;
use crate::pipeline::{self, RunResult};
use crate::retention::RetentionPolicy;
use crate::schedule::ScheduleSpec;
use crate::store::{LocalStore, S3Store, SnapshotStore};

/// Shared setup for the one-shot and daemon entry points.
pub struct BackupContext {
    producer: Arc<PgDump>,
    local: LocalStore,
    remote: Option<S3Store>,
    policy: RetentionPolicy,
}

impl BackupContext {
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let producer = PgDump::new(&config.database_url, config.password_file.clone())
            .context("Failed to configure the dump producer")?;
        let local = LocalStore::new("local", &config.local_backup_dir).with_context(|| {
            format!(
                "Failed to open local backup directory {}",
                config.local_backup_dir.display()
            )
        })?;
        let remote = match &config.remote {
            Some(remote_config) => Some(S3Store::connect("remote", remote_config).await),
            None => None,
        };
        Ok(Self {
            producer: Arc::new(producer),
            local,
            remote,
            policy: RetentionPolicy::days(config.retention_days),
        })
    }

    pub async fn run_once(&self) -> RunResult {
        pipeline::run_once(
            self.producer.clone(),
            &self.local,
            self.remote.as_ref().map(|s| s as &dyn SnapshotStore),
            &self.policy,
            Utc::now(),
        )
        .await
    }
}

/// Latched stop request. `trigger` leaves a permit behind, so a request
/// raised while no one is waiting is still observed by the next `wait`.
struct Shutdown {
    requested: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            requested: AtomicBool::new(false),
            notify: Notify::new(),
        })
    }

    fn trigger(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    async fn wait(&self) {
        if self.requested() {
            return;
        }
        self.notify.notified().await;
    }
}

/// Long-running mode: one immediate run at startup, then the schedule loop.
///
/// Exactly one run is active at a time; the next fire time is computed from
/// the instant the previous run finished, so ticks that pass while a run is
/// in flight are skipped rather than queued. Failed runs are logged and the
/// loop continues; only a schedule that cannot produce a next fire time is
/// fatal. Ctrl-c is latched from the moment the daemon starts and honored
/// between runs, never mid-run: a signal that arrives while a run is in
/// flight stops the loop as soon as that run finishes.
pub async fn run(config: &AppConfig) -> Result<()> {
    let expression = config
        .schedule
        .as_deref()
        .context("schedule must be set in config.json for daemon mode")?;
    let spec: ScheduleSpec = expression
        .parse()
        .context("Failed to parse backup schedule")?;

    let context = BackupContext::from_config(config).await?;
    info!(schedule = expression, "backup daemon starting");

    let shutdown = Shutdown::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested, finishing any in-flight run");
                shutdown.trigger();
            }
        });
    }

    // initial backup on startup
    log_outcome(&context.run_once().await);

    loop {
        if shutdown.requested() {
            info!("stopping schedule loop");
            return Ok(());
        }

        let now = Utc::now();
        let next = spec
            .next_after(now)
            .context("Failed to compute next fire time")?;
        info!(next = %next, "waiting for next scheduled backup");

        let wait = (next - now)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.wait() => {
                info!("stopping schedule loop");
                return Ok(());
            }
        }

        log_outcome(&context.run_once().await);
    }
}

fn log_outcome(result: &RunResult) {
    if let Some(snapshot) = &result.snapshot {
        info!(
            artifact = %snapshot.artifact_name,
            size = snapshot.size,
            stores = ?snapshot.stores,
            pruned = result.pruned(),
            outcome = ?result.outcome,
            "run finished"
        );
    } else {
        error!(
            error = result.error.as_deref().unwrap_or("unknown"),
            "run finished without a snapshot"
        );
    }
}
