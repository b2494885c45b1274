pub mod classes;
pub mod config;
pub mod error;
pub mod inference;
pub mod lifecycle;
pub mod metrics;
pub mod mock;
pub mod model;
pub mod preprocess;
pub mod retry;
pub mod segmentation;
pub mod service;
pub mod session;
pub mod source;
pub mod storage;
pub mod tensor;

// Re-export commonly used types for easier testing
pub use crate::classes::{TumorClass, CLASS_PALETTE};
pub use crate::config::Config;
pub use crate::error::{DecodeError, InferenceError, ModelLoadError, PersistenceError};
pub use crate::inference::{ClassifierOutput, InferenceOrchestrator, PredictionSource, TumorPrediction};
pub use crate::lifecycle::{LoadOutcome, ModelLifecycle, ModelState};
pub use crate::mock::{MockResult, MockResultGenerator};
pub use crate::model::{ModelFormat, ModelOutput, OutputSignature, TumorModel};
pub use crate::preprocess::{ImagePreprocessor, Normalization};
pub use crate::segmentation::SegmentationMask;
pub use crate::service::{ServiceParts, TumorAnalysisService};
pub use crate::session::{AnalysisResult, AnalysisSession, BatchAnalysis, BatchProgress, UploadedFile};
pub use crate::source::{ModelSource, UrlModelSource};
pub use crate::storage::{HistoryQuery, ResultStore, SortOrder, StoredAnalysis};
pub use crate::tensor::{TensorLedger, Tracked};
