//! Content fingerprints: xxh3-64 over raw bytes, rendered as 16 hex digits.
//! Streaming variant avoids loading large files into memory.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use xxhash_rust::xxh3::{xxh3_64, Xxh3};

/// Algorithm identifier persisted alongside every snapshot entry.
pub const FINGERPRINT_ALGO: &str = "xxh3-64";

/// Fingerprint an in-memory buffer.
pub fn fingerprint_bytes(content: &[u8]) -> String {
    format!("{:016x}", xxh3_64(content))
}

/// Fingerprint a file by streaming its content.
pub fn fingerprint_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Xxh3::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:016x}", hasher.digest()))
}

/// Stable per-project key derived from the canonical root path.
/// Used to name the snapshot file and the audit log for a root.
pub fn project_key(root: &Path) -> String {
    format!("{:016x}", xxh3_64(root.to_string_lossy().as_bytes()))
}
