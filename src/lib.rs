//! Dominant color extraction for uploaded images, with temporary remote storage.
//!
//! An upload is validated, decoded to RGB, reduced to a single representative
//! color, stored in a remote object store, and queued for deletion after a short
//! delay. The pieces, leaves first:
//!
//! - [`quantize`]: k-means over pixel colors; k = 1 gives the dominant color.
//! - [`pixels`]: container bytes to a flat RGB buffer.
//! - [`store`]: the remote object store seam.
//! - [`scheduler`]: deferred, best-effort deletion.
//! - [`upload`]: the request pipeline tying the above together.
//! - [`http`]: the axum router in front of it.

pub mod color;
pub mod config;
pub mod http;
pub mod pixels;
pub mod quantize;
pub mod scheduler;
pub mod store;
pub mod upload;

pub use color::{Color, ParseColorError};
pub use config::{AppConfig, ConfigError};
pub use pixels::{DecodeError, PixelBuffer, decode_pixels};
pub use quantize::{Cluster, KmeansOptions, QuantizeError, extract_dominant_color, kmeans};
pub use scheduler::{Clock, DeletionScheduler, ManualClock, PendingDeletion, SchedulerConfig, SchedulerError, TokioClock};
pub use store::{AssetStore, CloudinaryStore, MemoryStore, StoreError, StoredAsset};
pub use upload::{FilePart, UploadError, UploadPolicy, UploadResponse, UploadService};

/// Errors from the byte-level helpers below.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Quantize(#[from] QuantizeError),
}

/// Decode an image and return its dominant color.
pub fn dominant_color_bytes(input: &[u8]) -> Result<Color, ImageError> {
    let pixels = decode_pixels(input)?;
    Ok(extract_dominant_color(&pixels)?)
}

/// Decode an image and cluster its colors into at most `options.k()` groups,
/// most populated first.
pub fn palette_bytes(input: &[u8], options: &KmeansOptions) -> Result<Vec<Cluster>, ImageError> {
    let pixels = decode_pixels(input)?;
    let mut clusters = kmeans(&pixels, options)?;
    clusters.sort_by(|a, b| b.population.cmp(&a.population));
    Ok(clusters)
}
