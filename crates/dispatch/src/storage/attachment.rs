//! Attachment blob storage
//!
//! Attachment blobs are read-once: the dispatcher reads a blob for the send
//! attempt that consumes it and deletes it afterwards, whatever the outcome.
//! Absence at read time is a recoverable condition, not a fatal one.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result};

use crate::error::AttachmentError;
use crate::models::AttachmentRef;

/// Trait for attachment blob operations
pub trait AttachmentStore: Send + Sync {
    /// Check whether the blob exists
    fn exists(&self, attachment: &AttachmentRef) -> bool;

    /// Read the blob's bytes
    fn read(&self, attachment: &AttachmentRef) -> Result<Vec<u8>, AttachmentError>;

    /// Delete the blob. Deleting an already-absent blob is not an error.
    fn delete(&self, attachment: &AttachmentRef) -> Result<(), AttachmentError>;
}

/// File-backed attachment storage rooted at a single directory
///
/// `AttachmentRef::path` is resolved relative to the root.
pub struct FileAttachmentStore {
    root: PathBuf,
}

impl FileAttachmentStore {
    /// Create a store rooted at the given directory, creating it if needed
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).context("Failed to create attachment directory")?;
        Ok(Self { root })
    }

    fn blob_path(&self, attachment: &AttachmentRef) -> PathBuf {
        self.root.join(&attachment.path)
    }

    /// Store bytes under the given reference (ingestion path)
    pub fn put(&self, attachment: &AttachmentRef, data: &[u8]) -> Result<()> {
        let path = self.blob_path(attachment);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, data)
            .with_context(|| format!("Failed to write attachment {}", attachment.path))?;
        Ok(())
    }
}

impl AttachmentStore for FileAttachmentStore {
    fn exists(&self, attachment: &AttachmentRef) -> bool {
        self.blob_path(attachment).exists()
    }

    fn read(&self, attachment: &AttachmentRef) -> Result<Vec<u8>, AttachmentError> {
        let path = self.blob_path(attachment);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(AttachmentError::Missing(attachment.path.clone()))
            }
            Err(e) => Err(AttachmentError::Io {
                path: attachment.path.clone(),
                source: e,
            }),
        }
    }

    fn delete(&self, attachment: &AttachmentRef) -> Result<(), AttachmentError> {
        let path = self.blob_path(attachment);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AttachmentError::Io {
                path: attachment.path.clone(),
                source: e,
            }),
        }
    }
}

/// In-memory attachment storage (for tests)
///
/// Remembers which blobs were deleted so tests can assert per-message
/// cleanup.
pub struct InMemoryAttachmentStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    deleted: RwLock<Vec<String>>,
}

impl InMemoryAttachmentStore {
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            deleted: RwLock::new(Vec::new()),
        }
    }

    pub fn put(&self, attachment: &AttachmentRef, data: &[u8]) {
        let mut blobs = self.blobs.write().unwrap();
        blobs.insert(attachment.path.clone(), data.to_vec());
    }

    /// Paths deleted so far, in deletion order
    pub fn deleted_paths(&self) -> Vec<String> {
        self.deleted.read().unwrap().clone()
    }
}

impl Default for InMemoryAttachmentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AttachmentStore for InMemoryAttachmentStore {
    fn exists(&self, attachment: &AttachmentRef) -> bool {
        self.blobs.read().unwrap().contains_key(&attachment.path)
    }

    fn read(&self, attachment: &AttachmentRef) -> Result<Vec<u8>, AttachmentError> {
        let blobs = self.blobs.read().unwrap();
        blobs
            .get(&attachment.path)
            .cloned()
            .ok_or_else(|| AttachmentError::Missing(attachment.path.clone()))
    }

    fn delete(&self, attachment: &AttachmentRef) -> Result<(), AttachmentError> {
        let mut blobs = self.blobs.write().unwrap();
        blobs.remove(&attachment.path);
        self.deleted.write().unwrap().push(attachment.path.clone());
        Ok(())
    }
}
