//! Content fingerprints for migration scripts.
//!
//! The fingerprint covers script content only, never file metadata, so the
//! same script hashes identically on every host. A recorded fingerprint that
//! no longer matches the script is drift and is never auto-corrected.

use sha2::{Digest, Sha256};

/// SHA-256 over the raw script content, lowercase hex.
pub fn fingerprint(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Whether `recorded` still matches the current content.
pub fn verify(content: &str, recorded: &str) -> bool {
    fingerprint(content) == recorded
}
