//! Fakes shared by the integration tests: an in-memory model source, a
//! format that always accepts, and scripted models.

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use image::{DynamicImage, ImageFormat};
use ndarray::{Array4, ArrayD};
use neurolens::{
    ClassifierOutput, ImagePreprocessor, InferenceError, ModelFormat, ModelLoadError, ModelOutput,
    ModelSource, Normalization, OutputSignature, ResultStore, ServiceParts, TensorLedger,
    TumorAnalysisService, TumorModel, UploadedFile,
};

/// Serves fixed bytes (or a network error), counting fetches
pub struct FakeSource {
    pub fetches: AtomicUsize,
    pub fail: bool,
    pub delay: Duration,
}

impl FakeSource {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self {
            fetches: AtomicUsize::new(0),
            fail: false,
            delay: Duration::ZERO,
        })
    }

    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            fetches: AtomicUsize::new(0),
            fail: true,
            delay: Duration::ZERO,
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            fetches: AtomicUsize::new(0),
            fail: false,
            delay,
        })
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl ModelSource for FakeSource {
    fn describe(&self) -> String {
        "memory://fake-model".into()
    }

    fn fetch(&self) -> BoxFuture<'_, Result<Vec<u8>, ModelLoadError>> {
        Box::pin(async move {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(ModelLoadError::Fetch {
                    source_desc: self.describe(),
                    reason: "simulated network error".into(),
                });
            }
            Ok(b"fake-artifact".to_vec())
        })
    }
}

pub type ModelFactory = Arc<dyn Fn() -> Box<dyn TumorModel> + Send + Sync>;

/// Accepts any artifact and builds a model from the factory
pub struct FakeFormat {
    pub make: ModelFactory,
}

impl ModelFormat for FakeFormat {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn parse(&self, _bytes: &[u8]) -> Result<Box<dyn TumorModel>, String> {
        Ok((self.make)())
    }
}

/// Single-output classifier returning the same row every call
#[derive(Clone)]
pub struct ScriptedClassifier {
    pub row: Vec<f32>,
    pub calls: Arc<AtomicUsize>,
    /// Per-call latency, indexed by call number (cycled)
    pub latency: Vec<Duration>,
}

impl ScriptedClassifier {
    pub fn new(row: Vec<f32>) -> Self {
        Self {
            row,
            calls: Arc::new(AtomicUsize::new(0)),
            latency: Vec::new(),
        }
    }
}

impl TumorModel for ScriptedClassifier {
    fn signature(&self) -> OutputSignature {
        OutputSignature::Single
    }

    fn forward(&mut self, _input: &Array4<f32>) -> Result<ModelOutput<ArrayD<f32>>, InferenceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_empty() {
            std::thread::sleep(self.latency[call % self.latency.len()]);
        }
        let tensor = ArrayD::from_shape_vec(vec![1, self.row.len()], self.row.clone())
            .map_err(|e| InferenceError::Forward(e.to_string()))?;
        Ok(ModelOutput::Single(tensor))
    }
}

/// Two-head model: `[1, H, W, C]` segmentation logits with one class
/// everywhere, plus a classification row
#[derive(Clone)]
pub struct DualHead {
    pub seg_class: usize,
    pub seg_size: usize,
    pub row: Vec<f32>,
}

impl TumorModel for DualHead {
    fn signature(&self) -> OutputSignature {
        OutputSignature::Dual
    }

    fn forward(&mut self, _input: &Array4<f32>) -> Result<ModelOutput<ArrayD<f32>>, InferenceError> {
        let mut segmentation = Array4::<f32>::zeros((1, self.seg_size, self.seg_size, 4));
        segmentation
            .slice_mut(ndarray::s![.., .., .., self.seg_class])
            .fill(4.0);
        let classification = ArrayD::from_shape_vec(vec![1, self.row.len()], self.row.clone())
            .map_err(|e| InferenceError::Forward(e.to_string()))?;

        Ok(ModelOutput::Dual {
            segmentation: segmentation.into_dyn(),
            classification,
        })
    }
}

/// Warms up fine, then fails every forward pass after `healthy_calls`
pub struct Flaky {
    pub healthy_calls: usize,
    pub calls: usize,
}

impl TumorModel for Flaky {
    fn signature(&self) -> OutputSignature {
        OutputSignature::Single
    }

    fn forward(&mut self, _input: &Array4<f32>) -> Result<ModelOutput<ArrayD<f32>>, InferenceError> {
        self.calls += 1;
        if self.calls > self.healthy_calls {
            return Err(InferenceError::Forward("device lost".into()));
        }
        Ok(ModelOutput::Single(ndarray::array![[0.25f32, 0.25, 0.25, 0.25]].into_dyn()))
    }
}

/// Warms up fine, then emits NaN scores after `healthy_calls`
pub struct Degrading {
    pub healthy_calls: usize,
    pub calls: usize,
}

impl TumorModel for Degrading {
    fn signature(&self) -> OutputSignature {
        OutputSignature::Single
    }

    fn forward(&mut self, _input: &Array4<f32>) -> Result<ModelOutput<ArrayD<f32>>, InferenceError> {
        self.calls += 1;
        let row = if self.calls > self.healthy_calls {
            [f32::NAN, 0.1, 0.2, 0.3]
        } else {
            [0.1, 0.1, 0.7, 0.1]
        };
        Ok(ModelOutput::Single(ndarray::arr2(&[row]).into_dyn()))
    }
}

/// `ln(p)` so that softmax returns exactly `p`
pub fn log_probabilities(p: &[f32]) -> Vec<f32> {
    p.iter().map(|v| v.ln()).collect()
}

pub fn factory<M: TumorModel + Clone + Sync + 'static>(model: M) -> ModelFactory {
    Arc::new(move || Box::new(model.clone()) as Box<dyn TumorModel>)
}

pub struct Harness {
    pub service: TumorAnalysisService,
    pub source: Arc<FakeSource>,
    pub ledger: TensorLedger,
}

pub fn harness(source: Arc<FakeSource>, make: ModelFactory, classifier_output: ClassifierOutput) -> Harness {
    harness_with_store(source, make, classifier_output, ResultStore::temporary().unwrap())
}

pub fn harness_with_store(
    source: Arc<FakeSource>,
    make: ModelFactory,
    classifier_output: ClassifierOutput,
    store: ResultStore,
) -> Harness {
    let ledger = TensorLedger::new();
    let service = TumorAnalysisService::new(ServiceParts {
        source: source.clone(),
        formats: vec![Box::new(FakeFormat { make })],
        preprocessor: ImagePreprocessor::new(16, Normalization::ZeroOne),
        classifier_output,
        store,
        ledger: ledger.clone(),
        mock_mode: false,
    });

    Harness { service, source, ledger }
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut buffer = Vec::new();
    DynamicImage::new_rgb8(width, height)
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .unwrap();
    buffer
}

pub fn png_file(name: &str, width: u32, height: u32) -> UploadedFile {
    UploadedFile::new(name, Some("image/png".to_string()), png_bytes(width, height))
}
