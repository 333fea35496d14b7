//! Decoding of uploaded image bytes into a flat RGB pixel buffer.

use image::{DynamicImage, GenericImageView, RgbImage};
use palette::Srgb;

/// Failure to turn bytes into pixels.
#[derive(Debug, thiserror::Error)]
#[error("unable to decode image: {0}")]
pub struct DecodeError(#[from] image::ImageError);

/// Every pixel of an image as an 8-bit RGB point.
///
/// Consumers treat the buffer as an unordered multiset; row order is kept only
/// because it falls out of decoding for free.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PixelBuffer {
    pixels: Vec<Srgb<u8>>,
}

impl PixelBuffer {
    pub fn new(pixels: Vec<Srgb<u8>>) -> Self {
        Self { pixels }
    }

    /// Flatten a decoded image. Non-RGB sources (grayscale, paletted, RGBA, 16-bit)
    /// are converted first; alpha is dropped rather than composited.
    pub fn from_image(img: &DynamicImage) -> Self {
        match img {
            DynamicImage::ImageRgb8(rgb) => Self::from_rgb(rgb),
            other => Self::from_rgb(&other.to_rgb8()),
        }
    }

    fn from_rgb(rgb: &RgbImage) -> Self {
        let pixels = rgb
            .pixels()
            .map(|p| Srgb::new(p[0], p[1], p[2]))
            .collect();
        Self { pixels }
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Srgb<u8>> + '_ {
        self.pixels.iter()
    }

    pub fn as_slice(&self) -> &[Srgb<u8>] {
        &self.pixels
    }
}

impl From<Vec<Srgb<u8>>> for PixelBuffer {
    fn from(pixels: Vec<Srgb<u8>>) -> Self {
        Self::new(pixels)
    }
}

/// Consumes the image, so an RGB8 source is flattened without an intermediate copy.
impl From<DynamicImage> for PixelBuffer {
    fn from(img: DynamicImage) -> Self {
        Self::from_rgb(&img.into_rgb8())
    }
}

impl FromIterator<Srgb<u8>> for PixelBuffer {
    fn from_iter<I: IntoIterator<Item = Srgb<u8>>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Decode any container format the `image` crate recognises and flatten it to RGB.
#[tracing::instrument(skip(input), fields(size = input.len()))]
pub fn decode_pixels(input: &[u8]) -> Result<PixelBuffer, DecodeError> {
    let img = image::load_from_memory(input)?;
    let (width, height) = img.dimensions();
    tracing::debug!(width, height, color = ?img.color(), "decoded image");
    Ok(PixelBuffer::from(img))
}
