//! Error Types with Context
//!
//! One enum per failure domain. Model load and inference failures are
//! recovered locally (mock mode); decode and persistence failures are
//! surfaced to the caller.

use thiserror::Error;

/// Remote fetch, format parse, or warm-up failure while bringing up the model
#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("Model fetch failed from {source_desc}: {reason}")]
    Fetch { source_desc: String, reason: String },

    #[error("Model fetch from {source_desc} returned HTTP {status}")]
    HttpStatus { source_desc: String, status: u16 },

    #[error("Model artifact too large: {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("Could not load model in any supported format: {attempts}")]
    UnsupportedFormat { attempts: String },

    #[error("Unsupported model output arity: expected 1 or 2 outputs, model declares {0}")]
    OutputArity(usize),

    #[error("Model warm-up failed: {0}")]
    Warmup(String),
}

impl ModelLoadError {
    /// Whether retrying the fetch could plausibly succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            ModelLoadError::Fetch { .. } => true,
            ModelLoadError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Failure while preprocessing or running a forward pass for one image
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Image has zero area ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    #[error("Forward pass failed: {0}")]
    Forward(String),

    #[error("Model produced an empty {head} output")]
    EmptyOutput { head: &'static str },

    #[error("Model produced non-finite values in the {head} output")]
    NonFinite { head: &'static str },

    #[error("Unexpected tensor shape for {what}: {shape:?}")]
    Shape { what: &'static str, shape: Vec<usize> },
}

/// Malformed or unsupported uploaded file
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unsupported file type for {file_name}: {mime_type}")]
    UnsupportedType { file_name: String, mime_type: String },

    #[error("Failed to decode image {file_name}: {source}")]
    Malformed {
        file_name: String,
        #[source]
        source: image::ImageError,
    },

    #[error("Decode task for {file_name} did not complete: {reason}")]
    Task { file_name: String, reason: String },
}

/// Result store read/write failure
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Sled database error: {operation} failed: {source}")]
    Storage {
        operation: String,
        #[source]
        source: sled::Error,
    },

    #[error("Serialization failed for key: {key}, reason: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Segmentation encoding failed: {source}")]
    Encode {
        #[source]
        source: image::ImageError,
    },
}
