//! SHA-256 manifest parsing and file verification
//!
//! Release manifests (`sha256sums.txt`) hold one `<64 hex><whitespace><filename>`
//! entry per line; filenames may carry a leading `./`.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::Result;

fn manifest_line() -> &'static Regex {
    static LINE: OnceLock<Regex> = OnceLock::new();
    LINE.get_or_init(|| Regex::new(r"^([a-fA-F0-9]{64})\s+(.+)$").expect("static regex"))
}

/// Look up the lowercase SHA-256 listed for `filename` in `manifest`.
///
/// Matching is exact on the filename after stripping one leading `./`.
pub fn expected_sha256(manifest: &str, filename: &str) -> Option<String> {
    let filename = filename.trim();
    if filename.is_empty() {
        return None;
    }

    manifest
        .split(['\n', '\r'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .find_map(|line| {
            let caps = manifest_line().captures(line)?;
            let file = caps[2].trim();
            let file = file.strip_prefix("./").unwrap_or(file);
            (file == filename).then(|| caps[1].to_ascii_lowercase())
        })
}

/// Whether `value` is a 64-character hex digest.
pub fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// Hash a file without loading it into memory.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Compare a file's digest against `expected` (case-insensitive).
///
/// A malformed `expected` never verifies.
pub fn verify_file_sha256(path: &Path, expected: &str) -> Result<bool> {
    let expected = expected.trim().to_ascii_lowercase();
    if !is_sha256_hex(&expected) {
        return Ok(false);
    }
    Ok(sha256_file(path)? == expected)
}
