//! The upload pipeline: validate, analyze, store, schedule deletion, respond.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::color::Color;
use crate::pixels::{DecodeError, decode_pixels};
use crate::quantize::{QuantizeError, extract_dominant_color};
use crate::scheduler::DeletionScheduler;
use crate::store::{AssetStore, StoreError};

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 3 * 1024 * 1024;
pub const DEFAULT_ALLOWED_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "gif", "bmp"];
pub const DEFAULT_UPLOAD_FOLDER: &str = "temp_uploads";
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(30);

/// A file taken from the request, read into memory exactly once.
#[derive(Debug, Clone)]
pub struct FilePart {
    pub filename: String,
    pub content: Bytes,
}

impl FilePart {
    pub fn new(filename: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadResponse {
    pub hex_color: Color,
    pub filename: String,
    pub cloudinary_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingFile {
    NoFilePart,
    EmptyFilename,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("missing file: {0:?}")]
    MissingFile(MissingFile),
    #[error("{} exceeds limit of {max} bytes", describe_size(.size))]
    FileTooLarge { size: Option<usize>, max: usize },
    #[error("extension {extension:?} is not allowed")]
    UnsupportedType { extension: String },
    #[error("malformed upload request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("decoded image has no pixels")]
    EmptyImage,
    #[error("storing asset failed: {0}")]
    Storage(#[source] StoreError),
    #[error("storing asset timed out after {0:?}")]
    StorageTimeout(Duration),
    #[error("image processing failed: {0}")]
    Processing(String),
}

impl UploadError {
    /// Whether the caller sent something unacceptable, as opposed to a failure on
    /// our side or the store's.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Self::Storage(_) | Self::StorageTimeout(_) | Self::Processing(_)
        )
    }

    /// Short message safe to return to the client. Details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::MissingFile(MissingFile::NoFilePart) => "No file part".into(),
            Self::MissingFile(MissingFile::EmptyFilename) => "No selected file".into(),
            Self::FileTooLarge { max, .. } => {
                format!("File is too large, maximum size is {}", human_size(*max))
            }
            Self::UnsupportedType { .. } => "File type not allowed".into(),
            Self::InvalidRequest(_) => "Invalid upload request".into(),
            Self::Decode(_) => "File is not a valid image".into(),
            Self::EmptyImage => "Image contains no pixels".into(),
            Self::Storage(_) | Self::StorageTimeout(_) => "Failed to store image".into(),
            Self::Processing(_) => "Failed to process image".into(),
        }
    }
}

impl From<QuantizeError> for UploadError {
    fn from(err: QuantizeError) -> Self {
        match err {
            QuantizeError::EmptyImage => Self::EmptyImage,
            other => Self::Processing(other.to_string()),
        }
    }
}

fn describe_size(size: &Option<usize>) -> String {
    match size {
        Some(size) => format!("file of {size} bytes"),
        None => "request body".to_string(),
    }
}

fn human_size(bytes: usize) -> String {
    const MIB: usize = 1024 * 1024;
    if bytes >= MIB && bytes % MIB == 0 {
        format!("{}MB", bytes / MIB)
    } else {
        format!("{bytes} bytes")
    }
}

/// Limits applied to every upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPolicy {
    pub max_bytes: usize,
    pub allowed_extensions: BTreeSet<String>,
    pub folder: String,
    pub store_timeout: Duration,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            folder: DEFAULT_UPLOAD_FOLDER.to_string(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }
}

impl UploadPolicy {
    /// Checks that need nothing but the filename and length, in a fixed order so
    /// the cheapest rejection wins.
    pub fn validate<'a>(&self, file: Option<&'a FilePart>) -> Result<&'a FilePart, UploadError> {
        let file = file.ok_or(UploadError::MissingFile(MissingFile::NoFilePart))?;
        if file.filename.is_empty() {
            return Err(UploadError::MissingFile(MissingFile::EmptyFilename));
        }
        if file.content.len() > self.max_bytes {
            return Err(UploadError::FileTooLarge {
                size: Some(file.content.len()),
                max: self.max_bytes,
            });
        }
        let extension = extension_of(&file.filename);
        if !self.allowed_extensions.contains(&extension) {
            return Err(UploadError::UnsupportedType { extension });
        }
        Ok(file)
    }
}

/// Lowercased text after the last `.`; the whole name when there is no dot.
fn extension_of(filename: &str) -> String {
    filename
        .rsplit('.')
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

/// Decode and quantize in one go.
pub fn analyze(content: &[u8]) -> Result<Color, UploadError> {
    let pixels = decode_pixels(content)?;
    Ok(extract_dominant_color(&pixels)?)
}

/// Orchestrates a single upload against a store and a deletion scheduler.
#[derive(Clone)]
pub struct UploadService {
    store: Arc<dyn AssetStore>,
    scheduler: DeletionScheduler,
    policy: UploadPolicy,
}

impl UploadService {
    pub fn new(store: Arc<dyn AssetStore>, scheduler: DeletionScheduler, policy: UploadPolicy) -> Self {
        Self {
            store,
            scheduler,
            policy,
        }
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    /// Run one upload end to end.
    ///
    /// 1. Validate presence, filename, size and extension.
    /// 2. Decode and find the dominant color on a blocking thread.
    /// 3. Store the original bytes, bounded by the policy timeout. Not retried.
    /// 4. Queue deletion of the stored asset. Failure here is logged, never returned.
    #[tracing::instrument(skip_all, fields(filename))]
    pub async fn handle(&self, file: Option<FilePart>) -> Result<UploadResponse, UploadError> {
        let file = self.policy.validate(file.as_ref())?;
        tracing::Span::current().record("filename", file.filename.as_str());

        let content = file.content.clone();
        let hex_color = tokio::task::spawn_blocking(move || analyze(&content))
            .await
            .map_err(|e| UploadError::Processing(e.to_string()))?
            .inspect_err(|e| warn!(error = %e, "rejected upload"))?;

        let stored = match tokio::time::timeout(
            self.policy.store_timeout,
            self.store.store(&file.content, &self.policy.folder),
        )
        .await
        {
            Ok(Ok(stored)) => stored,
            Ok(Err(e)) => {
                error!(error = %e, "store call failed");
                return Err(UploadError::Storage(e));
            }
            Err(_) => {
                error!(timeout = ?self.policy.store_timeout, "store call timed out");
                return Err(UploadError::StorageTimeout(self.policy.store_timeout));
            }
        };

        if let Err(e) = self.scheduler.schedule_delete(stored.id.clone()) {
            warn!(asset_id = %stored.id, error = %e, "could not schedule deletion");
        }

        info!(asset_id = %stored.id, color = %hex_color, "processed upload");
        Ok(UploadResponse {
            hex_color,
            filename: file.filename.clone(),
            cloudinary_url: stored.url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> UploadPolicy {
        UploadPolicy::default()
    }

    #[test]
    fn missing_part_comes_first() {
        assert!(matches!(
            policy().validate(None),
            Err(UploadError::MissingFile(MissingFile::NoFilePart))
        ));
    }

    #[test]
    fn empty_filename_beats_size_and_type() {
        let file = FilePart::new("", vec![0u8; DEFAULT_MAX_UPLOAD_BYTES + 1]);
        assert!(matches!(
            policy().validate(Some(&file)),
            Err(UploadError::MissingFile(MissingFile::EmptyFilename))
        ));
    }

    #[test]
    fn size_is_checked_before_extension() {
        let file = FilePart::new("notes.txt", vec![0u8; DEFAULT_MAX_UPLOAD_BYTES + 1]);
        assert!(matches!(
            policy().validate(Some(&file)),
            Err(UploadError::FileTooLarge { .. })
        ));
    }

    #[test]
    fn payload_at_exact_limit_is_allowed() {
        let file = FilePart::new("a.png", vec![0u8; DEFAULT_MAX_UPLOAD_BYTES]);
        assert!(policy().validate(Some(&file)).is_ok());
    }

    #[test]
    fn extension_is_case_insensitive_and_uses_last_dot() {
        let ok = FilePart::new("holiday.final.JPEG", vec![1]);
        assert!(policy().validate(Some(&ok)).is_ok());

        let bad = FilePart::new("image.png.exe", vec![1]);
        match policy().validate(Some(&bad)) {
            Err(UploadError::UnsupportedType { extension }) => assert_eq!(extension, "exe"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bare_name_is_treated_as_extension() {
        assert_eq!(extension_of("png"), "png");
        assert_eq!(extension_of("README"), "readme");
        let file = FilePart::new("README", vec![1]);
        assert!(matches!(
            policy().validate(Some(&file)),
            Err(UploadError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn public_messages_stay_short() {
        let too_big = UploadError::FileTooLarge {
            size: Some(10),
            max: DEFAULT_MAX_UPLOAD_BYTES,
        };
        assert_eq!(too_big.public_message(), "File is too large, maximum size is 3MB");
        assert!(too_big.is_client_error());

        assert_eq!(too_big.to_string(), "file of 10 bytes exceeds limit of 3145728 bytes");
        let unknown = UploadError::FileTooLarge { size: None, max: 100 };
        assert_eq!(unknown.to_string(), "request body exceeds limit of 100 bytes");

        let storage = UploadError::Storage(StoreError::Unavailable("secret host 10.0.0.1".into()));
        assert_eq!(storage.public_message(), "Failed to store image");
        assert!(!storage.is_client_error());
    }
}
