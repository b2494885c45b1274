//! Mock Result Generator
//!
//! Synthetic classification used whenever the real model path is
//! unavailable. Never touches the model and never fails.

use rand::Rng;

use crate::classes::TumorClass;
use crate::segmentation::SegmentationMask;

/// Confidence range for synthetic results, in percent
pub const MOCK_CONFIDENCE_RANGE: std::ops::RangeInclusive<f64> = 70.0..=95.0;

/// Classification triple produced by the mock path
#[derive(Debug, Clone, PartialEq)]
pub struct MockResult {
    pub prediction: TumorClass,
    pub confidence: f64,
    pub segmentation: Option<SegmentationMask>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MockResultGenerator;

impl MockResultGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Generate using the thread-local RNG
    pub fn generate(&self, width: u32, height: u32) -> MockResult {
        self.generate_with(&mut rand::rng(), width, height)
    }

    pub fn generate_with<R: Rng + ?Sized>(&self, rng: &mut R, width: u32, height: u32) -> MockResult {
        let index = rng.random_range(0..TumorClass::KNOWN.len());
        let prediction = TumorClass::KNOWN[index];
        let confidence = round_tenth(rng.random_range(MOCK_CONFIDENCE_RANGE));

        let segmentation = prediction
            .is_tumor()
            .then(|| SegmentationMask::centered_circle(width, height, prediction.overlay_color()));

        MockResult {
            prediction,
            confidence,
            segmentation,
        }
    }
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
