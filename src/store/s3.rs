// pgsnapd/src/store/s3.rs
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use s3::config::Region;
use s3::primitives::ByteStream;
use tracing::warn;

use crate::config::RemoteStoreConfig;
use crate::errors::{BackupError, Result};
use crate::store::{ARTIFACT_PREFIX, SnapshotStore};

/// Snapshot store backed by an S3-compatible bucket (AWS S3, DigitalOcean
/// Spaces, MinIO). Object replace is atomic on the backend, so `put` needs
/// no staging step here.
pub struct S3Store {
    id: String,
    client: s3::Client,
    bucket: String,
    prefix: Option<String>,
}

impl S3Store {
    /// Builds the SDK client from the remote store configuration. Static
    /// credentials are used when both keys are configured; otherwise the
    /// ambient provider chain (env, profile, instance role) applies.
    pub async fn connect(id: impl Into<String>, config: &RemoteStoreConfig) -> Self {
        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            loader = loader.credentials_provider(s3::config::Credentials::new(
                key_id, secret, None, // session_token
                None, // expiry
                "Static",
            ));
        }
        let sdk_config = loader.load().await;

        Self {
            id: id.into(),
            client: s3::Client::new(&sdk_config),
            bucket: config.bucket_name.clone(),
            prefix: config
                .folder_prefix
                .as_ref()
                .map(|p| p.trim_matches('/').to_string())
                .filter(|p| !p.is_empty()),
        }
    }

    fn key(&self, name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix, name),
            None => name.to_string(),
        }
    }

    fn name_from_key<'a>(&self, key: &'a str) -> Option<&'a str> {
        let name = match &self.prefix {
            Some(prefix) => key.strip_prefix(prefix)?.strip_prefix('/')?,
            None => key,
        };
        (!name.contains('/') && name.starts_with(ARTIFACT_PREFIX)).then_some(name)
    }

    fn unavailable<E, R>(&self, err: &SdkError<E, R>) -> Option<BackupError>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        matches!(err, SdkError::DispatchFailure(_) | SdkError::TimeoutError(_)).then(|| {
            BackupError::StoreUnavailable {
                store: self.id.clone(),
                cause: sdk_cause(err),
            }
        })
    }

    fn write_error<E, R>(&self, name: &str, err: SdkError<E, R>) -> BackupError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.unavailable(&err)
            .unwrap_or_else(|| BackupError::StoreWrite {
                store: self.id.clone(),
                name: name.to_string(),
                cause: sdk_cause(&err),
            })
    }

    fn delete_error<E, R>(&self, name: &str, err: SdkError<E, R>) -> BackupError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.unavailable(&err)
            .unwrap_or_else(|| BackupError::StoreDelete {
                store: self.id.clone(),
                name: name.to_string(),
                cause: sdk_cause(&err),
            })
    }
}

fn sdk_cause<E, R>(err: &SdkError<E, R>) -> String
where
    E: std::error::Error + Send + Sync + 'static,
{
    match err {
        SdkError::ServiceError(context) => format!("{}", DisplayErrorContext(context.err())),
        other => format!("{}", other),
    }
}

#[async_trait]
impl SnapshotStore for S3Store {
    fn id(&self) -> &str {
        &self.id
    }

    async fn put(&self, name: &str, bytes: &[u8]) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(name))
            .body(ByteStream::from(bytes.to_vec()))
            .send()
            .await
            .map_err(|e| self.write_error(name, e))?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_prefix(self.prefix.as_ref().map(|p| format!("{}/", p)))
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| {
                    self.unavailable(&e)
                        .unwrap_or_else(|| BackupError::StoreUnavailable {
                            store: self.id.clone(),
                            cause: sdk_cause(&e),
                        })
                })?;

            for object in response.contents() {
                if let Some(name) = object.key().and_then(|k| self.name_from_key(k)) {
                    names.push(name.to_string());
                }
            }

            if response.is_truncated().unwrap_or(false) {
                continuation = response.next_continuation_token().map(str::to_string);
                if continuation.is_none() {
                    warn!(store = %self.id, "truncated listing without continuation token");
                    break;
                }
            } else {
                break;
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        // S3 DeleteObject succeeds for absent keys, which matches the
        // idempotent-delete contract.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.key(name))
            .send()
            .await
            .map_err(|e| self.delete_error(name, e))?;
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.key(name))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                if let Some(service_err) = err.as_service_error() {
                    if service_err.is_not_found() {
                        return Ok(false);
                    }
                }
                // a head failure that is not a clean 404 means existence
                // cannot be determined, which is an availability problem,
                // not a write rejection
                Err(BackupError::StoreUnavailable {
                    store: self.id.clone(),
                    cause: sdk_cause(&err),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> S3Store {
        let conf = s3::Config::builder()
            .behavior_version(s3::config::BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .build();
        S3Store {
            id: "remote".to_string(),
            client: s3::Client::from_conf(conf),
            bucket: "backups".to_string(),
            prefix: Some("prod".to_string()),
        }
    }

    #[test]
    fn timeouts_classify_as_unavailable() {
        let err: SdkError<std::io::Error, ()> = SdkError::timeout_error("request timed out");
        assert!(matches!(
            store().write_error("backup_appdb_20260830_031500.sql.gz", err),
            BackupError::StoreUnavailable { .. }
        ));
    }

    #[test]
    fn non_transport_failures_classify_per_operation() {
        let store = store();
        let put: SdkError<std::io::Error, ()> = SdkError::construction_failure("bad request");
        assert!(matches!(
            store.write_error("backup_appdb_20260830_031500.sql.gz", put),
            BackupError::StoreWrite { .. }
        ));
        let del: SdkError<std::io::Error, ()> = SdkError::construction_failure("bad request");
        assert!(matches!(
            store.delete_error("backup_appdb_20260830_031500.sql.gz", del),
            BackupError::StoreDelete { .. }
        ));
    }

    #[test]
    fn keys_carry_the_folder_prefix_both_ways() {
        let store = store();
        assert_eq!(
            store.key("backup_appdb_20260830_031500.sql.gz"),
            "prod/backup_appdb_20260830_031500.sql.gz"
        );
        assert_eq!(
            store.name_from_key("prod/backup_appdb_20260830_031500.sql.gz"),
            Some("backup_appdb_20260830_031500.sql.gz")
        );
        assert_eq!(store.name_from_key("prod/nested/backup_x.sql.gz"), None);
        assert_eq!(store.name_from_key("prod/notes.txt"), None);
    }
}
