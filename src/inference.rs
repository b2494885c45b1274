//! Inference Orchestrator
//!
//! Produces a prediction for every image, always. The real model path is
//! preprocess -> forward -> classify (+ segment); every failure on that path
//! flips the lifecycle into mock mode and the call is answered by the mock
//! generator instead.
//!
//! Each attempt resolves to an explicit [`Attempt`] which `infer` matches
//! on to pick the next action.

use std::sync::Arc;

use image::DynamicImage;
use ndarray::{s, Array2, ArrayD, Ix4};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::classes::TumorClass;
use crate::error::{InferenceError, ModelLoadError};
use crate::lifecycle::{LoadOutcome, ModelLifecycle};
use crate::metrics::{self, Timer};
use crate::mock::MockResultGenerator;
use crate::model::TumorModel;
use crate::preprocess::ImagePreprocessor;
use crate::segmentation::SegmentationMask;
use crate::tensor::TensorLedger;

/// How to read the classification head
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierOutput {
    /// Raw scores; softmax is applied
    #[default]
    Logits,
    /// Already a distribution (the graph ends in a softmax); only renormalized
    Probabilities,
}

/// Which path produced a prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionSource {
    Model,
    Mock,
}

/// Classification triple plus its provenance
#[derive(Debug, Clone, PartialEq)]
pub struct TumorPrediction {
    pub prediction: TumorClass,
    /// Winning class probability in percent, one decimal, within [0, 100]
    pub confidence: f64,
    pub segmentation: Option<SegmentationMask>,
    pub source: PredictionSource,
}

/// Outcome of one attempt at the real model path
#[derive(Debug)]
enum Attempt {
    Completed(TumorPrediction),
    /// Mock mode became active before the model was reached
    MockActive,
    /// Another task is still loading the model
    LoadPending,
    LoadFailed(ModelLoadError),
    Failed(InferenceError),
}

pub struct InferenceOrchestrator {
    lifecycle: Arc<ModelLifecycle>,
    preprocessor: ImagePreprocessor,
    mock: MockResultGenerator,
    classifier_output: ClassifierOutput,
}

impl InferenceOrchestrator {
    pub fn new(
        lifecycle: Arc<ModelLifecycle>,
        preprocessor: ImagePreprocessor,
        classifier_output: ClassifierOutput,
    ) -> Self {
        Self {
            lifecycle,
            preprocessor,
            mock: MockResultGenerator::new(),
            classifier_output,
        }
    }

    pub fn lifecycle(&self) -> &Arc<ModelLifecycle> {
        &self.lifecycle
    }

    /// Classify one image. Never fails: any error resolves to a mock result.
    pub async fn infer(&self, image: &DynamicImage) -> TumorPrediction {
        if self.lifecycle.is_mock_mode() {
            return self.mock_prediction(image);
        }

        let timer = Timer::new();
        match self.attempt(image).await {
            Attempt::Completed(prediction) => {
                timer.observe_duration_seconds(&metrics::INFERENCE_DURATION);
                metrics::INFERENCES_TOTAL.with_label_values(&["model"]).inc();
                debug!(
                    prediction = %prediction.prediction,
                    confidence = prediction.confidence,
                    segmented = prediction.segmentation.is_some(),
                    elapsed_ms = timer.elapsed_ms(),
                    "Model inference completed"
                );
                prediction
            }
            Attempt::MockActive => self.mock_prediction(image),
            Attempt::LoadPending => {
                info!("Model still loading, answering with a mock result");
                self.mock_prediction(image)
            }
            Attempt::LoadFailed(err) => {
                self.lifecycle.enter_mock_mode(&err.to_string());
                self.mock_prediction(image)
            }
            Attempt::Failed(err) => {
                warn!(error = %err, "Model inference error");
                self.lifecycle.enter_mock_mode(&err.to_string());
                self.mock_prediction(image)
            }
        }
    }

    async fn attempt(&self, image: &DynamicImage) -> Attempt {
        match self.lifecycle.load().await {
            LoadOutcome::Ready => {}
            LoadOutcome::Mock => return Attempt::MockActive,
            LoadOutcome::InFlight => return Attempt::LoadPending,
            LoadOutcome::Failed(err) => return Attempt::LoadFailed(err),
        }

        let ledger = self.lifecycle.ledger().clone();
        let input = match self.preprocessor.preprocess(image, &ledger) {
            Ok(input) => input,
            Err(err) => return Attempt::Failed(err),
        };

        // The input is released on the blocking thread right after the forward pass
        let forward = move |model: &mut dyn TumorModel| model.forward(&input);
        let output = match self.lifecycle.with_model(forward).await {
            Some(Ok(output)) => output.map(|tensor| ledger.track(tensor)),
            Some(Err(err)) => return Attempt::Failed(err),
            None => return Attempt::Failed(InferenceError::Forward("model handle missing".into())),
        };

        let (prediction, confidence) = match self.classify(output.classification(), &ledger) {
            Ok(classified) => classified,
            Err(err) => return Attempt::Failed(err),
        };

        let segmentation = if prediction.is_tumor() {
            segment(output.segmentation(), image.width(), image.height(), &ledger)
        } else {
            None
        };

        Attempt::Completed(TumorPrediction {
            prediction,
            confidence,
            segmentation,
            source: PredictionSource::Model,
        })
    }

    /// Normalize batch row 0 of the classification head and pick the winner
    fn classify(&self, logits: &ArrayD<f32>, ledger: &TensorLedger) -> Result<(TumorClass, f64), InferenceError> {
        let classes = match logits.shape().last() {
            Some(&n) if n > 0 => n,
            Some(_) => return Err(InferenceError::EmptyOutput { head: "classification" }),
            None => {
                return Err(InferenceError::Shape {
                    what: "classification logits",
                    shape: logits.shape().to_vec(),
                })
            }
        };
        let row: Vec<f32> = logits.iter().take(classes).copied().collect();
        if row.iter().any(|v| !v.is_finite()) {
            return Err(InferenceError::NonFinite { head: "classification" });
        }

        let probabilities = ledger.track(match self.classifier_output {
            ClassifierOutput::Logits => softmax(&row),
            ClassifierOutput::Probabilities => renormalize(&row)?,
        });

        let (index, probability) = argmax(probabilities.iter().copied())
            .ok_or(InferenceError::EmptyOutput { head: "classification" })?;
        let confidence = (((probability as f64) * 1000.0).round() / 10.0).clamp(0.0, 100.0);

        Ok((TumorClass::from_index(index), confidence))
    }

    fn mock_prediction(&self, image: &DynamicImage) -> TumorPrediction {
        metrics::INFERENCES_TOTAL.with_label_values(&["mock"]).inc();
        let mock = self.mock.generate(image.width(), image.height());
        TumorPrediction {
            prediction: mock.prediction,
            confidence: mock.confidence,
            segmentation: mock.segmentation,
            source: PredictionSource::Mock,
        }
    }
}

/// Per-pixel argmax of `[1, H, W, C]` logits, colorized and scaled to the source size.
///
/// Any other rank means the head carries no spatial information; no mask.
fn segment(logits: &ArrayD<f32>, width: u32, height: u32, ledger: &TensorLedger) -> Option<SegmentationMask> {
    let logits = match logits.view().into_dimensionality::<Ix4>() {
        Ok(view) => view,
        Err(_) => {
            debug!(shape = ?logits.shape(), "Segmentation head is not [1, H, W, C], skipping mask");
            return None;
        }
    };
    let (batch, rows, cols, channels) = logits.dim();
    if batch == 0 || rows == 0 || cols == 0 || channels == 0 {
        return None;
    }

    let class_map = ledger.track(Array2::from_shape_fn((rows, cols), |(y, x)| {
        argmax(logits.slice(s![0, y, x, ..]).iter().copied())
            .map(|(index, _)| index)
            .unwrap_or(0)
    }));

    Some(SegmentationMask::colorize(class_map.view()).resized(width, height))
}

/// Numerically stable softmax
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / sum).collect()
}

fn renormalize(values: &[f32]) -> Result<Vec<f32>, InferenceError> {
    let clipped: Vec<f32> = values.iter().map(|v| v.max(0.0)).collect();
    let sum: f32 = clipped.iter().sum();
    if sum <= 0.0 || !sum.is_finite() {
        return Err(InferenceError::NonFinite { head: "classification" });
    }
    Ok(clipped.into_iter().map(|v| v / sum).collect())
}

/// Index and value of the largest element; the first one wins ties, NaN never wins
pub fn argmax(values: impl Iterator<Item = f32>) -> Option<(usize, f32)> {
    values
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (index, value)| match best {
            Some((_, top)) if !(value > top) => best,
            _ if value.is_nan() => best,
            _ => Some((index, value)),
        })
}
