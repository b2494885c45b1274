//! Image Preprocessor
//!
//! Turns a decoded raster of any size or pixel format into the fixed
//! `[1, S, S, 3]` NHWC float tensor the classifier expects.

use image::imageops::{self, FilterType};
use image::DynamicImage;
use ndarray::Array4;
use serde::{Deserialize, Serialize};

use crate::error::InferenceError;
use crate::tensor::{TensorLedger, Tracked};

/// Default square input edge
pub const DEFAULT_IMAGE_SIZE: u32 = 224;

/// Value range the model was trained on. One value per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// `v / 255`
    #[default]
    ZeroOne,
    /// `v / 127.5 - 1`
    MinusOneOne,
}

impl Normalization {
    #[inline]
    pub fn apply(self, value: u8) -> f32 {
        match self {
            Normalization::ZeroOne => value as f32 / 255.0,
            Normalization::MinusOneOne => value as f32 / 127.5 - 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    size: u32,
    normalization: Normalization,
}

impl ImagePreprocessor {
    pub fn new(size: u32, normalization: Normalization) -> Self {
        Self { size, normalization }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn normalization(&self) -> Normalization {
        self.normalization
    }

    /// Shape of every tensor this preprocessor produces
    pub fn input_shape(&self) -> (usize, usize, usize, usize) {
        (1, self.size as usize, self.size as usize, 3)
    }

    /// Resize (bilinear), project to RGB, normalize, and add the batch axis.
    ///
    /// The RGB and resized rasters are dropped before returning; the caller
    /// owns the returned tensor and releases it by dropping the handle.
    pub fn preprocess(
        &self,
        image: &DynamicImage,
        ledger: &TensorLedger,
    ) -> Result<Tracked<Array4<f32>>, InferenceError> {
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Err(InferenceError::EmptyImage { width, height });
        }

        let resized = {
            let rgb = image.to_rgb8();
            imageops::resize(&rgb, self.size, self.size, FilterType::Triangle)
        };

        let side = self.size as usize;
        let mut tensor = Array4::<f32>::zeros(self.input_shape());
        for (x, y, pixel) in resized.enumerate_pixels() {
            for channel in 0..3 {
                tensor[[0, y as usize, x as usize, channel]] =
                    self.normalization.apply(pixel[channel]);
            }
        }
        debug_assert_eq!(tensor.shape(), &[1, side, side, 3]);

        Ok(ledger.track(tensor))
    }
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self::new(DEFAULT_IMAGE_SIZE, Normalization::default())
    }
}
