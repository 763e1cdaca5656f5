//! Converter and file store abstractions
//!
//! The scheduler never touches document bytes or storage directly. It works
//! through two seams:
//! - [`Converter`] turns input bytes in one format into output bytes in another
//! - [`FileStore`] resolves input file IDs to content and persists outputs
//!
//! Both are object-safe async traits so consumers can plug in anything from a
//! pandoc subprocess wrapper to an S3-backed store. [`MemoryFileStore`] is a
//! ready-made in-memory store useful for tests and small embedded setups.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Performs document conversions
#[async_trait]
pub trait Converter: Send + Sync {
    /// Short identifier used in logs and events (e.g. "pandoc")
    fn name(&self) -> &str;

    /// Convert `input` from `input_format` to `output_format`
    ///
    /// `options` is a pass-through bag of converter-specific settings. The
    /// scheduler may mutate it between retries (e.g. strip expensive options
    /// or lower the `chunk_size` hint).
    async fn convert(
        &self,
        input: &[u8],
        input_format: &str,
        output_format: &str,
        options: &HashMap<String, Value>,
    ) -> Result<Vec<u8>>;
}

/// Metadata attached to a saved output file
#[derive(Clone, Debug)]
pub struct FileMetadata {
    /// MIME-ish content type (e.g. "application/pdf")
    pub content_type: String,

    /// Owner of the file
    pub user_id: String,

    /// ID of the input file this output was derived from
    pub parent_file_id: Option<String>,
}

/// Resolves input file IDs and persists conversion outputs
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Fetch the content of a stored file
    ///
    /// Returns [`Error::FileSystem`] if the file does not exist.
    async fn get_content(&self, file_id: &str) -> Result<Vec<u8>>;

    /// Persist a new file and return its ID
    async fn save(&self, name: &str, content: Vec<u8>, metadata: &FileMetadata) -> Result<String>;

    /// Look up the display name of a stored file, if known
    async fn file_name(&self, file_id: &str) -> Option<String>;
}

#[derive(Clone, Debug)]
struct StoredFile {
    name: String,
    content: Vec<u8>,
    metadata: Option<FileMetadata>,
}

/// In-memory [`FileStore`] backed by a `HashMap`
///
/// File IDs are sequential strings ("1", "2", ...). Content is never evicted,
/// so this is only suitable for tests and short-lived embedded use.
#[derive(Default)]
pub struct MemoryFileStore {
    files: RwLock<HashMap<String, StoredFile>>,
    next_id: AtomicU64,
}

impl MemoryFileStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a file directly (test setup, pre-seeding inputs)
    pub async fn insert(&self, name: &str, content: Vec<u8>) -> String {
        let id = (self.next_id.fetch_add(1, Ordering::Relaxed) + 1).to_string();
        let mut files = self.files.write().await;
        files.insert(
            id.clone(),
            StoredFile {
                name: name.to_string(),
                content,
                metadata: None,
            },
        );
        id
    }

    /// Number of stored files
    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }

    /// Whether the store holds no files
    pub async fn is_empty(&self) -> bool {
        self.files.read().await.is_empty()
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn get_content(&self, file_id: &str) -> Result<Vec<u8>> {
        let files = self.files.read().await;
        files
            .get(file_id)
            .map(|f| f.content.clone())
            .ok_or_else(|| Error::FileSystem(format!("file {file_id} not found")))
    }

    async fn save(&self, name: &str, content: Vec<u8>, metadata: &FileMetadata) -> Result<String> {
        let id = (self.next_id.fetch_add(1, Ordering::Relaxed) + 1).to_string();
        let mut files = self.files.write().await;
        files.insert(
            id.clone(),
            StoredFile {
                name: name.to_string(),
                content,
                metadata: Some(metadata.clone()),
            },
        );
        Ok(id)
    }

    async fn file_name(&self, file_id: &str) -> Option<String> {
        let files = self.files.read().await;
        files.get(file_id).map(|f| f.name.clone())
    }
}
