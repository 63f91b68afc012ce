// pgsnapd/src/dump/mod.rs
use std::path::PathBuf;
use std::process::{Command, Stdio};

use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::debug;
use url::Url;
use which::which;

use crate::errors::{BackupError, Result};

/// Produces one compressed logical dump of the target database.
///
/// Implementations return the final artifact bytes and write no files; the
/// pipeline owns atomic persistence through the snapshot stores.
pub trait DumpProducer: Send + Sync {
    fn database(&self) -> &str;

    fn produce(&self) -> Result<Vec<u8>>;
}

/// `pg_dump`-backed producer. The dump stream is gzipped as it is read from
/// the child's stdout, so the uncompressed dump is never held in memory.
pub struct PgDump {
    url: Url,
    database: String,
    password_file: Option<PathBuf>,
}

impl PgDump {
    pub fn new(database_url: &str, password_file: Option<PathBuf>) -> Result<Self> {
        let url = Url::parse(database_url)
            .map_err(|e| BackupError::Config(format!("invalid database URL: {}", e)))?;
        let database = url.path().trim_start_matches('/').to_string();
        if database.is_empty() {
            return Err(BackupError::Config(
                "database URL has no database name in its path".to_string(),
            ));
        }
        Ok(Self {
            url,
            database,
            password_file,
        })
    }

    fn dump_failed(cause: impl std::fmt::Display) -> BackupError {
        BackupError::DumpFailed {
            cause: cause.to_string(),
        }
    }
}

impl DumpProducer for PgDump {
    fn database(&self) -> &str {
        &self.database
    }

    fn produce(&self) -> Result<Vec<u8>> {
        let pg_dump = which("pg_dump").map_err(|_| {
            Self::dump_failed("pg_dump not found in PATH; install the PostgreSQL client tools")
        })?;
        debug!(pg_dump = %pg_dump.display(), database = %self.database, "starting dump");

        let mut command = Command::new(pg_dump);
        command
            .arg("--no-owner")
            .arg("--no-privileges")
            .arg(self.url.as_str())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // The password never enters this process's own environment; the
        // child reads it from the passfile directly.
        if let Some(passfile) = &self.password_file {
            command.env("PGPASSFILE", passfile);
        }

        let mut child = command.spawn().map_err(Self::dump_failed)?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Self::dump_failed("pg_dump stdout was not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| Self::dump_failed("pg_dump stderr was not captured"))?;

        // stderr must be drained while stdout is copied; a chatty child
        // would otherwise fill the stderr pipe and stall both sides
        let stderr_reader = std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = std::io::Read::read_to_end(&mut stderr, &mut buf);
            buf
        });

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        let copied = std::io::copy(&mut stdout, &mut encoder);
        drop(stdout);

        let status = child.wait().map_err(Self::dump_failed)?;
        let stderr_bytes = stderr_reader.join().unwrap_or_default();
        if !status.success() {
            return Err(Self::dump_failed(format!(
                "pg_dump exited with {}: {}",
                status,
                String::from_utf8_lossy(&stderr_bytes).trim()
            )));
        }
        // a stream error with a zero exit still means the dump is incomplete
        copied.map_err(|e| Self::dump_failed(format!("dump stream ended unexpectedly: {}", e)))?;

        encoder.finish().map_err(Self::dump_failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_name_comes_from_the_url_path() {
        let dump = PgDump::new("postgres://backup@db.internal:5432/appdb", None).unwrap();
        assert_eq!(dump.database(), "appdb");
    }

    #[test]
    fn url_without_database_is_rejected() {
        assert!(PgDump::new("postgres://backup@db.internal:5432", None).is_err());
        assert!(PgDump::new("postgres://backup@db.internal:5432/", None).is_err());
    }

    #[test]
    fn malformed_url_is_rejected() {
        assert!(PgDump::new("not a url", None).is_err());
    }

    #[cfg(unix)]
    mod fake_pg_dump {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::sync::Mutex;

        // PATH is process-global, so tests that rewrite it take turns
        static PATH_LOCK: Mutex<()> = Mutex::new(());

        fn with_fake_pg_dump<T>(script: &str, body: impl FnOnce() -> T) -> T {
            let guard = PATH_LOCK.lock().unwrap_or_else(|e| e.into_inner());
            let dir = tempfile::tempdir().unwrap();
            let exe = dir.path().join("pg_dump");
            std::fs::write(&exe, script).unwrap();
            let mut perms = std::fs::metadata(&exe).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&exe, perms).unwrap();

            let original = std::env::var_os("PATH").unwrap_or_default();
            let mut paths = vec![dir.path().to_path_buf()];
            paths.extend(std::env::split_paths(&original));
            let prefixed = std::env::join_paths(paths).unwrap();
            unsafe { std::env::set_var("PATH", &prefixed) };
            let result = body();
            unsafe { std::env::set_var("PATH", &original) };
            drop(guard);
            result
        }

        #[test]
        fn noisy_stderr_does_not_stall_the_dump() {
            // ~260 KiB of stderr, far beyond any OS pipe buffer, emitted
            // before stdout closes
            let script = "#!/bin/sh\n\
                          i=0\n\
                          while [ $i -lt 4096 ]; do\n\
                            printf '%064d\\n' \"$i\" >&2\n\
                            i=$((i+1))\n\
                          done\n\
                          echo '-- dump'\n";
            with_fake_pg_dump(script, || {
                let dump = PgDump::new("postgres://backup@localhost:5432/appdb", None).unwrap();
                let bytes = dump.produce().unwrap();
                let mut decoder = flate2::read::GzDecoder::new(&bytes[..]);
                let mut restored = String::new();
                std::io::Read::read_to_string(&mut decoder, &mut restored).unwrap();
                assert_eq!(restored, "-- dump\n");
            });
        }

        #[test]
        fn nonzero_exit_surfaces_stderr_in_the_error() {
            let script = "#!/bin/sh\n\
                          echo 'FATAL: database \"appdb\" does not exist' >&2\n\
                          exit 1\n";
            with_fake_pg_dump(script, || {
                let dump = PgDump::new("postgres://backup@localhost:5432/appdb", None).unwrap();
                let err = dump.produce().unwrap_err();
                assert!(err.to_string().contains("does not exist"), "{}", err);
            });
        }
    }
}
