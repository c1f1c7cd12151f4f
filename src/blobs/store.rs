//! Attachment file storage on the local filesystem.
//!
//! Files are written under `{data_dir}/uploads/` with server-generated
//! names (UUIDv7 plus a sanitized extension). The client-supplied file name
//! is never used as a storage path — it travels with the message as display
//! metadata only.

use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("failed to write attachment: {0}")]
    Write(#[from] std::io::Error),
    #[error("blob store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid stored name")]
    InvalidName,
}

/// Maximum extension length carried over from the client-supplied name.
const MAX_EXT_LEN: usize = 10;

#[derive(Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(data_dir: &str) -> Self {
        Self {
            root: Path::new(data_dir).join("uploads"),
        }
    }

    /// Create the uploads directory. Called once at startup.
    pub fn init(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }

    /// Store attachment bytes under a generated unique name and return it.
    /// Only a sanitized extension survives from `original_name`.
    pub async fn store(&self, bytes: Vec<u8>, original_name: &str) -> Result<String, BlobError> {
        let stored_name = generate_stored_name(original_name);
        let path = self.root.join(&stored_name);

        tokio::task::spawn_blocking(move || std::fs::write(&path, &bytes))
            .await
            .map_err(|e| BlobError::Unavailable(format!("Task join: {}", e)))??;

        tracing::debug!(stored_name = %stored_name, "Attachment stored");
        Ok(stored_name)
    }

    /// Resolve a stored name to its on-disk path.
    /// Rejects anything that is not a name this store could have generated,
    /// so client-supplied values cannot escape the uploads directory.
    pub fn resolve(&self, stored_name: &str) -> Result<PathBuf, BlobError> {
        if stored_name.is_empty()
            || stored_name.starts_with('.')
            || stored_name.contains("..")
            || !stored_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        {
            return Err(BlobError::InvalidName);
        }
        Ok(self.root.join(stored_name))
    }
}

/// Build a unique stored name: UUIDv7 (timestamp-ordered) plus the
/// sanitized extension of the client-supplied name, if it has one.
fn generate_stored_name(original_name: &str) -> String {
    let id = Uuid::now_v7();
    match sanitized_extension(original_name) {
        Some(ext) => format!("{}.{}", id, ext),
        None => id.to_string(),
    }
}

/// Extract a lowercase alphanumeric extension from a client-supplied name.
/// Anything else (empty, oversized, or containing other characters) is
/// dropped rather than repaired.
fn sanitized_extension(original_name: &str) -> Option<String> {
    let (stem, ext) = original_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > MAX_EXT_LEN {
        return None;
    }
    if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
