//! Tumor label set and the overlay palette shared by the model and mock paths.

use serde::{Deserialize, Serialize};
use std::fmt;

/// RGBA color per class index. Index 0 (background / no tumor) is fully
/// transparent; anything past the end of the table is treated the same way.
pub const CLASS_PALETTE: [[u8; 4]; 4] = [
    [0, 0, 0, 0],
    [255, 0, 0, 128],
    [0, 255, 0, 128],
    [0, 0, 255, 128],
];

pub const TRANSPARENT: [u8; 4] = [0, 0, 0, 0];

/// Fixed classification label set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TumorClass {
    #[serde(rename = "No Tumor")]
    NoTumor,
    Meningioma,
    Glioma,
    Pituitary,
    /// Model produced a class index outside the known table
    Unknown,
}

impl TumorClass {
    /// The four classes a model (or the mock generator) can emit, in index order
    pub const KNOWN: [TumorClass; 4] = [
        TumorClass::NoTumor,
        TumorClass::Meningioma,
        TumorClass::Glioma,
        TumorClass::Pituitary,
    ];

    pub fn from_index(index: usize) -> Self {
        Self::KNOWN.get(index).copied().unwrap_or(TumorClass::Unknown)
    }

    pub fn index(self) -> Option<usize> {
        Self::KNOWN.iter().position(|c| *c == self)
    }

    pub fn label(self) -> &'static str {
        match self {
            TumorClass::NoTumor => "No Tumor",
            TumorClass::Meningioma => "Meningioma",
            TumorClass::Glioma => "Glioma",
            TumorClass::Pituitary => "Pituitary",
            TumorClass::Unknown => "Unknown",
        }
    }

    /// True for the classes that get a segmentation overlay
    pub fn is_tumor(self) -> bool {
        matches!(
            self,
            TumorClass::Meningioma | TumorClass::Glioma | TumorClass::Pituitary
        )
    }

    pub fn overlay_color(self) -> [u8; 4] {
        self.index().map(palette_color).unwrap_or(TRANSPARENT)
    }
}

impl fmt::Display for TumorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Palette lookup for a per-pixel class index
pub fn palette_color(index: usize) -> [u8; 4] {
    CLASS_PALETTE.get(index).copied().unwrap_or(TRANSPARENT)
}
