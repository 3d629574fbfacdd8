//! Branch and directory names for workspaces.

use sha2::{Digest, Sha256};

use crate::domain::{Domain, TaskRefId, sanitize_ref_component};

/// Hex characters kept from the digest.
pub const SHORT_HASH_LEN: usize = 8;

/// Candidate names tried before giving up.
pub const MAX_NAME_ATTEMPTS: u32 = 16;

/// First [`SHORT_HASH_LEN`] hex characters of SHA-256 over the timestamp,
/// the domain label and the attempt counter.
#[must_use]
pub fn short_hash(timestamp_nanos: i64, domain: &Domain, attempt: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(timestamp_nanos.to_le_bytes());
    hasher.update(domain.name().as_bytes());
    hasher.update(attempt.to_le_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(SHORT_HASH_LEN);
    digest
}

/// Branch name `{task_ref_id}/{domain}-{short_hash}`.
#[must_use]
pub fn branch_name(task_ref_id: &TaskRefId, domain: &Domain, hash: &str) -> String {
    let task_ref = sanitize_branch_segment(task_ref_id.as_str());
    format!("{task_ref}/{}-{hash}", domain.slug())
}

/// Directory name of a workspace under the workspace root.
#[must_use]
pub fn directory_name(task_ref_id: &TaskRefId, domain: &Domain, hash: &str) -> String {
    let task_ref = sanitize_ref_component(task_ref_id.as_str());
    format!("{task_ref}-{}-{hash}", domain.slug())
}

/// Keeps the task reference readable (case and `-`/`_`/`.` survive) while
/// removing what git refuses in a ref component.
fn sanitize_branch_segment(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.replace("..", "-");
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == '-');
    let cleaned = cleaned.strip_suffix(".lock").unwrap_or(cleaned);
    if cleaned.is_empty() {
        "task".to_string()
    } else {
        cleaned.to_string()
    }
}
