// pgsnapd/src/checksum/mod.rs
use sha2::{Digest, Sha256};

/// Computes the hex-encoded SHA-256 digest of a fully materialized artifact.
pub fn sign(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Re-verifies an artifact against a previously recorded digest.
pub fn verify(bytes: &[u8], expected: &str) -> bool {
    sign(bytes).eq_ignore_ascii_case(expected.trim())
}

/// Renders the digest sidecar in the conventional checksum-file format
/// (two spaces between digest and filename) so that `sha256sum -c` can
/// consume it directly.
pub fn sidecar_contents(digest: &str, artifact_name: &str) -> String {
    format!("{}  {}\n", digest, artifact_name)
}

/// Parses a sidecar file back into `(digest, artifact filename)`.
pub fn parse_sidecar(contents: &str) -> Option<(String, String)> {
    let line = contents.lines().next()?;
    let (digest, name) = line.split_once("  ")?;
    let digest = digest.trim();
    let name = name.trim_start_matches('*').trim();
    if digest.len() != 64 || !digest.bytes().all(|b| b.is_ascii_hexdigit()) || name.is_empty() {
        return None;
    }
    Some((digest.to_string(), name.to_string()))
}
