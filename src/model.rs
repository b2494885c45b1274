//! Model Backends and Artifact Formats
//!
//! [`TumorModel`] is the seam between the lifecycle manager and whatever
//! actually executes the network. The production backend is ONNX Runtime
//! via `ort`; tests plug in fakes.
//!
//! A fetched artifact is handed to each [`ModelFormat`] in turn until one
//! accepts it:
//! - [`OnnxFormat`]: raw ONNX (or ORT flatbuffer) bytes
//! - [`EnvelopeFormat`]: a JSON manifest carrying the model as base64

use base64::Engine;
use ndarray::{Array4, ArrayD, IxDyn};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use serde::Deserialize;
use tracing::debug;

use crate::error::{InferenceError, ModelLoadError};

/// Output layout, decided once when the model is loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSignature {
    /// One tensor used for both classification and segmentation
    Single,
    /// `[segmentation logits, classification logits]`
    Dual,
}

impl OutputSignature {
    pub fn from_output_count(count: usize) -> Result<Self, ModelLoadError> {
        match count {
            1 => Ok(OutputSignature::Single),
            2 => Ok(OutputSignature::Dual),
            other => Err(ModelLoadError::OutputArity(other)),
        }
    }

    pub fn output_count(self) -> usize {
        match self {
            OutputSignature::Single => 1,
            OutputSignature::Dual => 2,
        }
    }
}

/// Forward-pass result, tagged by [`OutputSignature`]
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput<T> {
    Single(T),
    Dual { segmentation: T, classification: T },
}

impl<T> ModelOutput<T> {
    pub fn signature(&self) -> OutputSignature {
        match self {
            ModelOutput::Single(_) => OutputSignature::Single,
            ModelOutput::Dual { .. } => OutputSignature::Dual,
        }
    }

    /// Build from an ordered output list according to `signature`
    pub fn from_outputs(signature: OutputSignature, outputs: Vec<T>) -> Result<Self, InferenceError> {
        let count = outputs.len();
        let mut outputs = outputs.into_iter();
        match (signature, count) {
            (OutputSignature::Single, 1) => outputs
                .next()
                .map(ModelOutput::Single)
                .ok_or(InferenceError::EmptyOutput { head: "model" }),
            (OutputSignature::Dual, 2) => match (outputs.next(), outputs.next()) {
                (Some(segmentation), Some(classification)) => Ok(ModelOutput::Dual {
                    segmentation,
                    classification,
                }),
                _ => Err(InferenceError::EmptyOutput { head: "model" }),
            },
            _ => Err(InferenceError::Forward(format!(
                "model declared {} output(s) but returned {}",
                signature.output_count(),
                count
            ))),
        }
    }

    pub fn map<U, F: FnMut(T) -> U>(self, mut f: F) -> ModelOutput<U> {
        match self {
            ModelOutput::Single(t) => ModelOutput::Single(f(t)),
            ModelOutput::Dual {
                segmentation,
                classification,
            } => ModelOutput::Dual {
                segmentation: f(segmentation),
                classification: f(classification),
            },
        }
    }

    pub fn classification(&self) -> &T {
        match self {
            ModelOutput::Single(t) => t,
            ModelOutput::Dual { classification, .. } => classification,
        }
    }

    pub fn segmentation(&self) -> &T {
        match self {
            ModelOutput::Single(t) => t,
            ModelOutput::Dual { segmentation, .. } => segmentation,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let (first, second) = match self {
            ModelOutput::Single(t) => (t, None),
            ModelOutput::Dual {
                segmentation,
                classification,
            } => (segmentation, Some(classification)),
        };
        std::iter::once(first).chain(second)
    }
}

/// An executable classifier network
pub trait TumorModel: Send {
    fn signature(&self) -> OutputSignature;

    /// Run one forward pass on an NHWC `[1, S, S, 3]` tensor
    fn forward(&mut self, input: &Array4<f32>) -> Result<ModelOutput<ArrayD<f32>>, InferenceError>;
}

/// A way of interpreting fetched artifact bytes as a model
pub trait ModelFormat: Send + Sync {
    fn name(&self) -> &'static str;

    fn parse(&self, bytes: &[u8]) -> Result<Box<dyn TumorModel>, String>;
}

/// The formats tried by default, in order
pub fn default_formats() -> Vec<Box<dyn ModelFormat>> {
    vec![Box::new(OnnxFormat), Box::new(EnvelopeFormat)]
}

/// Try each format in order; collect every rejection if none accepts
pub fn parse_artifact(
    formats: &[Box<dyn ModelFormat>],
    bytes: &[u8],
) -> Result<(Box<dyn TumorModel>, &'static str), ModelLoadError> {
    let mut attempts = Vec::with_capacity(formats.len());
    for format in formats {
        match format.parse(bytes) {
            Ok(model) => return Ok((model, format.name())),
            Err(reason) => {
                debug!(format = format.name(), reason = %reason, "Artifact rejected by format");
                attempts.push(format!("{}: {}", format.name(), reason));
            }
        }
    }
    Err(ModelLoadError::UnsupportedFormat {
        attempts: if attempts.is_empty() {
            "no formats configured".to_string()
        } else {
            attempts.join("; ")
        },
    })
}

// ============================================================================
// ONNX Runtime backend
// ============================================================================

pub struct OnnxModel {
    session: Session,
    input_name: String,
    output_names: Vec<String>,
    signature: OutputSignature,
}

impl OnnxModel {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.commit_from_memory(bytes))
            .map_err(|e| format!("Failed to build ONNX Runtime session: {}", e))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| "Model declares no inputs".to_string())?;
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        let signature =
            OutputSignature::from_output_count(output_names.len()).map_err(|e| e.to_string())?;

        debug!(
            input = %input_name,
            outputs = ?output_names,
            signature = ?signature,
            "Detected model IO"
        );

        Ok(Self {
            session,
            input_name,
            output_names,
            signature,
        })
    }
}

impl TumorModel for OnnxModel {
    fn signature(&self) -> OutputSignature {
        self.signature
    }

    fn forward(&mut self, input: &Array4<f32>) -> Result<ModelOutput<ArrayD<f32>>, InferenceError> {
        let input_tensor = Tensor::from_array(input.clone())
            .map_err(|e| InferenceError::Forward(format!("Failed to create input tensor: {}", e)))?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input_tensor])
            .map_err(|e| InferenceError::Forward(format!("Inference failed: {}", e)))?;

        let mut arrays = Vec::with_capacity(self.output_names.len());
        for name in &self.output_names {
            let (shape, data) = outputs[name.as_str()]
                .try_extract_tensor::<f32>()
                .map_err(|e| InferenceError::Forward(format!("Failed to extract output '{}': {}", name, e)))?;
            let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
            let array = ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec()).map_err(|_| InferenceError::Shape {
                what: "model output",
                shape: dims.clone(),
            })?;
            arrays.push(array);
        }

        ModelOutput::from_outputs(self.signature, arrays)
    }
}

/// Raw ONNX protobuf (or ORT format) bytes
#[derive(Debug, Clone, Copy, Default)]
pub struct OnnxFormat;

impl ModelFormat for OnnxFormat {
    fn name(&self) -> &'static str {
        "onnx"
    }

    fn parse(&self, bytes: &[u8]) -> Result<Box<dyn TumorModel>, String> {
        if bytes.is_empty() {
            return Err("empty artifact".to_string());
        }
        OnnxModel::from_bytes(bytes).map(|m| Box::new(m) as Box<dyn TumorModel>)
    }
}

/// JSON manifest wrapping a base64-encoded ONNX payload
#[derive(Debug, Deserialize)]
struct ModelEnvelope {
    format: String,
    model: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeFormat;

impl EnvelopeFormat {
    /// Decode the manifest down to the embedded ONNX bytes
    pub fn unwrap_payload(bytes: &[u8]) -> Result<Vec<u8>, String> {
        let envelope: ModelEnvelope =
            serde_json::from_slice(bytes).map_err(|e| format!("not a model manifest: {}", e))?;
        if !envelope.format.eq_ignore_ascii_case("onnx") {
            return Err(format!("unsupported manifest format '{}'", envelope.format));
        }
        base64::engine::general_purpose::STANDARD
            .decode(envelope.model.trim())
            .map_err(|e| format!("Base64 decode failed: {}", e))
    }
}

impl ModelFormat for EnvelopeFormat {
    fn name(&self) -> &'static str {
        "onnx-envelope"
    }

    fn parse(&self, bytes: &[u8]) -> Result<Box<dyn TumorModel>, String> {
        let payload = Self::unwrap_payload(bytes)?;
        OnnxModel::from_bytes(&payload).map(|m| Box::new(m) as Box<dyn TumorModel>)
    }
}
