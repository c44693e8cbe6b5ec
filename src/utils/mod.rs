//! Utility functions and helpers.

pub mod http;

use sha2::{Digest, Sha256};
use url::Url;

/// Stable short hash for a target name.
///
/// First 16 hex characters of the SHA-256 digest; used as the snapshot
/// file stem, the event filename suffix, and the index key.
pub fn target_hash(name: &str) -> String {
    short_digest(name)
}

/// Short content hash for an alert summary.
pub fn summary_hash(summary: &str) -> String {
    short_digest(summary)
}

fn short_digest(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..8])
}

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(base: &Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}
