//! Segmentation overlay rasters.
//!
//! A [`SegmentationMask`] is an RGBA image aligned with the uploaded scan,
//! class-colored through [`CLASS_PALETTE`](crate::classes::CLASS_PALETTE) and
//! transparent wherever no tumor pixel was assigned.

use std::io::Cursor;

use base64::Engine;
use image::imageops::{self, FilterType};
use image::{ImageFormat, Rgba, RgbaImage};
use ndarray::ArrayView2;

use crate::classes::{palette_color, TRANSPARENT};
use crate::error::PersistenceError;

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationMask {
    image: RgbaImage,
}

impl SegmentationMask {
    pub fn from_image(image: RgbaImage) -> Self {
        Self { image }
    }

    /// Colorize a `[H, W]` per-pixel class index map
    pub fn colorize(class_map: ArrayView2<'_, usize>) -> Self {
        let (height, width) = class_map.dim();
        let mut image = RgbaImage::new(width as u32, height as u32);
        for ((y, x), class_index) in class_map.indexed_iter() {
            image.put_pixel(x as u32, y as u32, Rgba(palette_color(*class_index)));
        }
        Self { image }
    }

    /// Filled circle of `color` centered in a `width x height` canvas
    pub fn centered_circle(width: u32, height: u32, color: [u8; 4]) -> Self {
        let center_x = width as f64 / 2.0;
        let center_y = height as f64 / 2.0;
        let radius = width.min(height) as f64 / 4.0;

        let image = RgbaImage::from_fn(width, height, |x, y| {
            let dx = x as f64 - center_x;
            let dy = y as f64 - center_y;
            if (dx * dx + dy * dy).sqrt() < radius {
                Rgba(color)
            } else {
                Rgba(TRANSPARENT)
            }
        });
        Self { image }
    }

    /// Nearest-neighbour rescale so class boundaries stay crisp
    pub fn resized(self, width: u32, height: u32) -> Self {
        if self.image.dimensions() == (width, height) || self.image.width() == 0 || self.image.height() == 0 {
            return self;
        }
        Self {
            image: imageops::resize(&self.image, width, height, FilterType::Nearest),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    /// Number of non-transparent pixels
    pub fn covered_pixels(&self) -> usize {
        self.image.pixels().filter(|p| p.0[3] != 0).count()
    }

    pub fn to_png(&self) -> Result<Vec<u8>, PersistenceError> {
        let mut buffer = Cursor::new(Vec::new());
        self.image
            .write_to(&mut buffer, ImageFormat::Png)
            .map_err(|source| PersistenceError::Encode { source })?;
        Ok(buffer.into_inner())
    }

    /// PNG bytes as standard base64, the form stored alongside results
    pub fn to_png_base64(&self) -> Result<String, PersistenceError> {
        Ok(base64::engine::general_purpose::STANDARD.encode(self.to_png()?))
    }
}
