//! Pixel formats and the image pipeline.
//!
//! Two layouts matter:
//!
//! - **Wire pixels** ([`PixelBuffer`] in `Argb32`): 4 bytes per pixel in the
//!   order A, R, G, B, rows top to bottom as the host produced them.
//! - **Driver bitmaps** ([`Bitmap`]): 32-bit ARGB words stored
//!   little-endian, i.e. bytes B, G, R, A, with alpha forced opaque. The
//!   pipeline writes source row 0 to the *last* bitmap row.
//!
//! Going from wire to driver therefore swaps red and blue positions and
//! flips the image vertically.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument};

use crate::payload::{PayloadError, PayloadStore};
use crate::protocol::{BYTES_PER_PIXEL, Dimensions, PayloadRef, Rgb};

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Buffer holds {actual} bytes, {dimensions} {format:?} needs {expected}")]
    BufferLength {
        dimensions: Dimensions,
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },

    #[error("Image is {actual}, target requires {expected}")]
    SizeMismatch {
        expected: Dimensions,
        actual: Dimensions,
    },

    #[error("Image has no pixels")]
    Empty,
}

/// Channel layouts accepted from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// A, R, G, B - the wire format.
    Argb32,
    Rgba32,
    Bgra32,
    Rgb24,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Argb32 | PixelFormat::Rgba32 | PixelFormat::Bgra32 => 4,
            PixelFormat::Rgb24 => 3,
        }
    }

    /// Return the pixel as (a, r, g, b).
    fn unpack(self, px: &[u8]) -> [u8; 4] {
        match self {
            PixelFormat::Argb32 => [px[0], px[1], px[2], px[3]],
            PixelFormat::Rgba32 => [px[3], px[0], px[1], px[2]],
            PixelFormat::Bgra32 => [px[3], px[2], px[1], px[0]],
            PixelFormat::Rgb24 => [0xFF, px[0], px[1], px[2]],
        }
    }
}

/// Host-side image, rows top to bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    dimensions: Dimensions,
    format: PixelFormat,
    data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(
        dimensions: Dimensions,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self, ImageError> {
        if dimensions.pixel_count() == 0 {
            return Err(ImageError::Empty);
        }
        let expected = dimensions.pixel_count() * format.bytes_per_pixel();
        if data.len() != expected {
            return Err(ImageError::BufferLength {
                dimensions,
                format,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            dimensions,
            format,
            data,
        })
    }

    /// Opaque single-color image in wire format.
    pub fn solid(dimensions: Dimensions, color: Rgb) -> Self {
        let data = [0xFF, color.r, color.g, color.b].repeat(dimensions.pixel_count());
        Self {
            dimensions,
            format: PixelFormat::Argb32,
            data,
        }
    }

    /// Build a wire-format image from a per-pixel function of (x, y).
    pub fn from_fn(dimensions: Dimensions, mut f: impl FnMut(u32, u32) -> Rgb) -> Self {
        let mut data = Vec::with_capacity(dimensions.byte_len());
        for y in 0..dimensions.height {
            for x in 0..dimensions.width {
                let c = f(x, y);
                data.extend_from_slice(&[0xFF, c.r, c.g, c.b]);
            }
        }
        Self {
            dimensions,
            format: PixelFormat::Argb32,
            data,
        }
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn argb_at(&self, x: u32, y: u32) -> [u8; 4] {
        let bpp = self.format.bytes_per_pixel();
        let offset = (y as usize * self.dimensions.width as usize + x as usize) * bpp;
        self.format.unpack(&self.data[offset..offset + bpp])
    }

    pub fn rgb_at(&self, x: u32, y: u32) -> Rgb {
        let [_, r, g, b] = self.argb_at(x, y);
        Rgb::new(r, g, b)
    }

    /// Convert to the wire channel order.
    pub fn to_argb32(&self) -> PixelBuffer {
        if self.format == PixelFormat::Argb32 {
            return self.clone();
        }
        let data = self
            .data
            .chunks_exact(self.format.bytes_per_pixel())
            .flat_map(|px| self.format.unpack(px))
            .collect();
        PixelBuffer {
            dimensions: self.dimensions,
            format: PixelFormat::Argb32,
            data,
        }
    }

    /// Nearest-neighbour rescale, output in wire format.
    pub fn resized(&self, target: Dimensions) -> PixelBuffer {
        if target == self.dimensions {
            return self.to_argb32();
        }
        let src = self.dimensions;
        let mut data = Vec::with_capacity(target.byte_len());
        for y in 0..target.height {
            let sy = (u64::from(y) * u64::from(src.height) / u64::from(target.height)) as u32;
            for x in 0..target.width {
                let sx = (u64::from(x) * u64::from(src.width) / u64::from(target.width)) as u32;
                data.extend_from_slice(&self.argb_at(sx, sy));
            }
        }
        PixelBuffer {
            dimensions: target,
            format: PixelFormat::Argb32,
            data,
        }
    }

    /// Produce wire bytes for a target of `target` size. Other sizes are
    /// rescaled when `allow_resize` is set and rejected otherwise.
    pub fn to_wire(&self, target: Dimensions, allow_resize: bool) -> Result<Vec<u8>, ImageError> {
        if self.dimensions != target && !allow_resize {
            return Err(ImageError::SizeMismatch {
                expected: target,
                actual: self.dimensions,
            });
        }
        Ok(self.resized(target).data)
    }
}

/// Bitmap in the layout panel drivers consume (see module docs).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    dimensions: Dimensions,
    data: Vec<u8>,
}

impl Bitmap {
    pub fn solid(dimensions: Dimensions, color: Rgb) -> Self {
        Self {
            dimensions,
            data: [color.b, color.g, color.r, 0xFF].repeat(dimensions.pixel_count()),
        }
    }

    /// Convert wire pixels into a driver bitmap, flipping rows and
    /// reordering channels.
    pub fn from_wire(src: &[u8], dimensions: Dimensions) -> Result<Self, ImageError> {
        if src.len() != dimensions.byte_len() {
            return Err(ImageError::BufferLength {
                dimensions,
                format: PixelFormat::Argb32,
                expected: dimensions.byte_len(),
                actual: src.len(),
            });
        }
        let row_len = dimensions.width as usize * BYTES_PER_PIXEL;
        let mut data = vec![0u8; src.len()];
        for (i, src_row) in src.chunks_exact(row_len).enumerate() {
            let dst_row_index = dimensions.height as usize - (i + 1);
            let dst_row = &mut data[dst_row_index * row_len..(dst_row_index + 1) * row_len];
            for (dst, px) in dst_row
                .chunks_exact_mut(BYTES_PER_PIXEL)
                .zip(src_row.chunks_exact(BYTES_PER_PIXEL))
            {
                dst.copy_from_slice(&[px[3], px[2], px[1], 0xFF]);
            }
        }
        Ok(Self { dimensions, data })
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Raw (b, g, r, a) bytes at (x, y).
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = (y as usize * self.dimensions.width as usize + x as usize) * BYTES_PER_PIXEL;
        [
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ]
    }

    pub fn rgb_at(&self, x: u32, y: u32) -> Rgb {
        let [b, g, r, _] = self.pixel(x, y);
        Rgb::new(r, g, b)
    }

    /// Copy out the `size` region whose top left corner is (x, y).
    pub fn crop(&self, x: u32, y: u32, size: Dimensions) -> Bitmap {
        let mut data = Vec::with_capacity(size.byte_len());
        for row in y..y + size.height {
            let start = (row as usize * self.dimensions.width as usize + x as usize) * BYTES_PER_PIXEL;
            data.extend_from_slice(&self.data[start..start + size.width as usize * BYTES_PER_PIXEL]);
        }
        Bitmap {
            dimensions: size,
            data,
        }
    }
}

/// Turns payload references into driver bitmaps.
pub struct ImagePipeline {
    store: Arc<dyn PayloadStore>,
}

impl ImagePipeline {
    pub fn new(store: Arc<dyn PayloadStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn PayloadStore> {
        &self.store
    }

    /// Resolve `payload` into a bitmap of `dimensions`.
    ///
    /// The payload is released exactly once, whatever the outcome.
    #[instrument(level = "debug", skip(self), fields(payload = %payload))]
    pub fn load(&self, payload: &PayloadRef, dimensions: Dimensions) -> Result<Bitmap, PayloadError> {
        let expected = dimensions.byte_len();
        if payload.len as usize != expected {
            self.store.discard(payload);
            return Err(PayloadError::LengthMismatch {
                declared: payload.len,
                expected,
            });
        }
        let data = self.store.consume(payload)?;
        let bitmap = Bitmap::from_wire(&data, dimensions).map_err(|_| PayloadError::Truncated {
            location: payload.location.clone(),
            declared: payload.len,
            found: data.len(),
        })?;
        debug!(%dimensions, "Payload converted");
        Ok(bitmap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::MemoryStore;

    fn dims() -> Dimensions {
        Dimensions::new(3, 2)
    }

    fn gradient() -> PixelBuffer {
        PixelBuffer::from_fn(dims(), |x, y| Rgb::new(x as u8 * 10, y as u8 * 10, 200))
    }

    #[test]
    fn test_from_wire_flips_rows_and_swaps_channels() {
        let src = gradient();
        let bitmap = Bitmap::from_wire(src.as_bytes(), dims()).unwrap();

        // Source row 0 lands on the last row.
        assert_eq!(bitmap.rgb_at(2, 1), Rgb::new(20, 0, 200));
        assert_eq!(bitmap.rgb_at(0, 0), Rgb::new(0, 10, 200));
        // Raw byte order is B, G, R, A.
        assert_eq!(bitmap.pixel(2, 1), [200, 0, 20, 0xFF]);
    }

    #[test]
    fn test_from_wire_ignores_source_alpha() {
        let bitmap = Bitmap::from_wire(&[0x00, 1, 2, 3], Dimensions::new(1, 1)).unwrap();
        assert_eq!(bitmap.pixel(0, 0), [3, 2, 1, 0xFF]);
    }

    #[test]
    fn test_from_wire_rejects_wrong_length() {
        assert!(Bitmap::from_wire(&[0; 8], dims()).is_err());
    }

    #[test]
    fn test_format_conversion() {
        let rgba = PixelBuffer::new(
            Dimensions::new(1, 1),
            PixelFormat::Rgba32,
            vec![10, 20, 30, 40],
        )
        .unwrap();
        assert_eq!(rgba.to_argb32().as_bytes(), &[40, 10, 20, 30]);

        let bgra = PixelBuffer::new(
            Dimensions::new(1, 1),
            PixelFormat::Bgra32,
            vec![30, 20, 10, 40],
        )
        .unwrap();
        assert_eq!(bgra.to_argb32().as_bytes(), &[40, 10, 20, 30]);

        let rgb = PixelBuffer::new(Dimensions::new(1, 1), PixelFormat::Rgb24, vec![1, 2, 3]).unwrap();
        assert_eq!(rgb.to_argb32().as_bytes(), &[0xFF, 1, 2, 3]);
    }

    #[test]
    fn test_new_checks_length() {
        assert!(matches!(
            PixelBuffer::new(dims(), PixelFormat::Argb32, vec![0; 5]),
            Err(ImageError::BufferLength { expected: 24, .. })
        ));
        assert!(matches!(
            PixelBuffer::new(Dimensions::new(0, 4), PixelFormat::Argb32, vec![]),
            Err(ImageError::Empty)
        ));
    }

    #[test]
    fn test_resize_nearest_neighbour() {
        let src = PixelBuffer::from_fn(Dimensions::new(2, 2), |x, y| {
            Rgb::new(x as u8, y as u8, 0)
        });
        let big = src.resized(Dimensions::new(4, 4));
        assert_eq!(big.dimensions(), Dimensions::new(4, 4));
        assert_eq!(big.rgb_at(0, 0), Rgb::new(0, 0, 0));
        assert_eq!(big.rgb_at(1, 1), Rgb::new(0, 0, 0));
        assert_eq!(big.rgb_at(2, 1), Rgb::new(1, 0, 0));
        assert_eq!(big.rgb_at(3, 3), Rgb::new(1, 1, 0));
    }

    #[test]
    fn test_to_wire_size_policy() {
        let src = gradient();
        assert!(matches!(
            src.to_wire(Dimensions::new(4, 4), false),
            Err(ImageError::SizeMismatch { .. })
        ));
        assert_eq!(src.to_wire(Dimensions::new(4, 4), true).unwrap().len(), 64);
        assert_eq!(src.to_wire(dims(), false).unwrap(), src.as_bytes());
    }

    #[test]
    fn test_crop() {
        let src = gradient();
        let bitmap = Bitmap::from_wire(src.as_bytes(), dims()).unwrap();
        let piece = bitmap.crop(1, 0, Dimensions::new(2, 1));
        assert_eq!(piece.rgb_at(0, 0), bitmap.rgb_at(1, 0));
        assert_eq!(piece.rgb_at(1, 0), bitmap.rgb_at(2, 0));
    }

    #[test]
    fn test_pipeline_releases_on_success() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = ImagePipeline::new(store.clone());
        let payload = store.put(gradient().as_bytes()).unwrap();

        let bitmap = pipeline.load(&payload, dims()).unwrap();
        assert_eq!(bitmap.dimensions(), dims());
        assert!(store.is_empty());
    }

    #[test]
    fn test_pipeline_truncated_payload() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = ImagePipeline::new(store.clone());
        store.insert_raw("mem:short", vec![0; 10]);
        let payload = PayloadRef::new("mem:short", dims().byte_len() as u32);

        let err = pipeline.load(&payload, dims()).unwrap_err();
        assert!(matches!(err, PayloadError::Truncated { found: 10, .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn test_pipeline_length_mismatch() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = ImagePipeline::new(store.clone());
        let payload = store.put(&[0; 8]).unwrap();

        let err = pipeline.load(&payload, dims()).unwrap_err();
        assert!(matches!(err, PayloadError::LengthMismatch { declared: 8, .. }));
        assert!(store.is_empty());
    }
}
