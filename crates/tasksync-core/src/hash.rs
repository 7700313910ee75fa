use sha2::{Digest, Sha256};

use crate::remote::RemoteTask;

/// Hex SHA-256 of a text fragment.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Fingerprint of a task line as it appears in a document.
pub fn local_content_hash(line: &str) -> String {
    hash_text(line.trim())
}

/// Fingerprint of the remote fields that matter for reconciliation.
pub fn remote_content_hash(task: &RemoteTask) -> String {
    let material = format!(
        "{}\n{}\n{}",
        task.content.trim(),
        task.completed,
        task.due.as_deref().unwrap_or("")
    );
    hash_text(&material)
}
