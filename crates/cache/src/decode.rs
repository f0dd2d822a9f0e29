//! Pixel buffers and the decode seam.

use crate::DecodeError;
use std::fmt;

/// An RGBA8 pixel buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct DecodedImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

const PLACEHOLDER_EDGE: u32 = 16;
const PLACEHOLDER_CELL: u32 = 4;

impl DecodedImage {
    /// Wrap raw RGBA8 pixels. `pixels` must hold `width * height * 4` bytes.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(pixels.len(), width as usize * height as usize * 4);
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Grey checkerboard shown in place of content that failed to load.
    pub fn placeholder() -> Self {
        let mut pixels = Vec::with_capacity((PLACEHOLDER_EDGE * PLACEHOLDER_EDGE * 4) as usize);
        for y in 0..PLACEHOLDER_EDGE {
            for x in 0..PLACEHOLDER_EDGE {
                let dark = (x / PLACEHOLDER_CELL + y / PLACEHOLDER_CELL) % 2 == 0;
                let shade = if dark { 0x66 } else { 0x99 };
                pixels.extend_from_slice(&[shade, shade, shade, 0xff]);
            }
        }
        Self::new(PLACEHOLDER_EDGE, PLACEHOLDER_EDGE, pixels)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Memory held by the pixel buffer.
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }
}

impl fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Turns encoded bytes into pixels.
///
/// Implementations are called concurrently from the window pass and the
/// thumbnail workers, so each call must be independent.
pub trait Decoder: Send + Sync {
    fn decode_full(&self, bytes: &[u8]) -> Result<DecodedImage, DecodeError>;

    /// Decode and shrink so neither edge exceeds `max_edge`.
    fn decode_thumbnail(&self, bytes: &[u8], max_edge: u32) -> Result<DecodedImage, DecodeError>;
}

/// [`Decoder`] backed by the `image` crate's format detection.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageDecoder;

impl ImageDecoder {
    fn load(bytes: &[u8]) -> Result<image::DynamicImage, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        image::load_from_memory(bytes).map_err(|e| DecodeError::Image(e.to_string()))
    }
}

fn into_decoded(image: image::DynamicImage) -> DecodedImage {
    let rgba = image.into_rgba8();
    let (width, height) = rgba.dimensions();
    DecodedImage::new(width, height, rgba.into_raw())
}

impl Decoder for ImageDecoder {
    fn decode_full(&self, bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
        Self::load(bytes).map(into_decoded)
    }

    fn decode_thumbnail(&self, bytes: &[u8], max_edge: u32) -> Result<DecodedImage, DecodeError> {
        let image = Self::load(bytes)?;
        let max_edge = max_edge.max(1);
        if image.width() <= max_edge && image.height() <= max_edge {
            return Ok(into_decoded(image));
        }
        Ok(into_decoded(image.thumbnail(max_edge, max_edge)))
    }
}
