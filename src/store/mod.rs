//! Remote object storage for uploaded images.
//!
//! The upload path only needs two things from a store: put some bytes somewhere
//! reachable by URL, and later remove them again. [`AssetStore`] is that seam;
//! [`CloudinaryStore`] talks to the real service and [`MemoryStore`] stands in
//! for it in tests.

mod cloudinary;
mod memory;

pub use cloudinary::{CloudinaryConfig, CloudinaryStore, DEFAULT_API_BASE};
pub use memory::MemoryStore;

/// Result of a successful store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAsset {
    /// Store-assigned identifier, used for deletion.
    pub id: String,
    /// Public URL of the stored bytes.
    pub url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("store rejected request with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("unexpected store response: {0}")]
    InvalidResponse(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A remote object store holding assets temporarily.
#[async_trait::async_trait]
pub trait AssetStore: Send + Sync {
    /// Store `bytes` under `folder` and return where they ended up.
    async fn store(&self, bytes: &[u8], folder: &str) -> Result<StoredAsset, StoreError>;

    /// Remove an asset. Deleting an id that no longer exists is not an error.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}
