// pgsnapd/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// `s3_storage` section as it appears in config.json. All fields optional at
/// parse time; completeness is checked during validation.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonS3StorageConfig {
    pub bucket_name: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint_url: Option<String>,
    pub folder_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawJsonConfig {
    pub database_url: Option<String>,
    pub password_file: Option<PathBuf>,
    pub local_backup_dir: Option<PathBuf>,
    pub schedule: Option<String>,
    pub retention_days: Option<u32>,
    pub s3_storage: Option<JsonS3StorageConfig>,
}

/// Validated remote store settings. Credentials are optional: when absent
/// the ambient provider chain supplies them.
#[derive(Debug, Clone)]
pub struct RemoteStoreConfig {
    pub bucket_name: String,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint_url: Option<String>,
    pub folder_prefix: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub password_file: Option<PathBuf>,
    pub local_backup_dir: PathBuf,
    /// 5-field cron expression; required for daemon mode only.
    pub schedule: Option<String>,
    pub retention_days: u32,
    pub remote: Option<RemoteStoreConfig>,
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let raw: RawJsonConfig = serde_json::from_str(&contents).with_context(|| {
            format!(
                "Failed to parse JSON from config file at {}",
                config_path.display()
            )
        })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawJsonConfig) -> Result<Self> {
        let database_url = raw
            .database_url
            .filter(|s| !s.is_empty())
            .context("database_url must be set in config.json")?;
        let local_backup_dir = raw
            .local_backup_dir
            .filter(|p| !p.as_os_str().is_empty())
            .context("local_backup_dir must be set in config.json")?;
        let retention_days = raw
            .retention_days
            .context("retention_days must be set in config.json")?;

        let remote = raw.s3_storage.as_ref().and_then(|s3| {
            let bucket = s3.bucket_name.as_ref().filter(|s| !s.is_empty());
            let region = s3.region.as_ref().filter(|s| !s.is_empty());
            match (bucket, region) {
                (Some(bucket), Some(region)) => Some(RemoteStoreConfig {
                    bucket_name: bucket.clone(),
                    region: region.clone(),
                    access_key_id: s3.access_key_id.clone().filter(|s| !s.is_empty()),
                    secret_access_key: s3.secret_access_key.clone().filter(|s| !s.is_empty()),
                    endpoint_url: s3.endpoint_url.clone().filter(|s| !s.is_empty()),
                    folder_prefix: s3.folder_prefix.clone().filter(|s| !s.is_empty()),
                }),
                _ => {
                    warn!(
                        "s3_storage section is present but bucket_name or region is missing; \
                         remote replication is disabled"
                    );
                    None
                }
            }
        });

        Ok(AppConfig {
            database_url,
            password_file: raw.password_file,
            local_backup_dir,
            schedule: raw.schedule.filter(|s| !s.is_empty()),
            retention_days,
            remote,
        })
    }
}
