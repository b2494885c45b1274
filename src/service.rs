//! Composition root.
//!
//! Wires source, formats, lifecycle, orchestrator, session and store into
//! one explicitly constructed service. Nothing here is global; tests build
//! the service from fakes through [`TumorAnalysisService::new`].

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::error::DecodeError;
use crate::inference::{ClassifierOutput, InferenceOrchestrator};
use crate::lifecycle::{LoadOutcome, ModelLifecycle, ModelState};
use crate::model::{default_formats, ModelFormat};
use crate::preprocess::ImagePreprocessor;
use crate::retry::RetryStrategy;
use crate::session::{AnalysisResult, AnalysisSession, BatchAnalysis, BatchProgress, UploadedFile};
use crate::source::{ModelSource, UrlModelSource};
use crate::storage::{HistoryQuery, ResultStore, StoredAnalysis};
use crate::tensor::TensorLedger;

/// Injectable parts of the service
pub struct ServiceParts {
    pub source: Arc<dyn ModelSource>,
    pub formats: Vec<Box<dyn ModelFormat>>,
    pub preprocessor: ImagePreprocessor,
    pub classifier_output: ClassifierOutput,
    pub store: ResultStore,
    pub ledger: TensorLedger,
    pub mock_mode: bool,
}

pub struct TumorAnalysisService {
    lifecycle: Arc<ModelLifecycle>,
    session: AnalysisSession,
}

impl TumorAnalysisService {
    pub fn from_config(config: &Config) -> Result<Self> {
        let model = &config.model_config;
        let source = UrlModelSource::new(
            model.url.clone(),
            model.fetch_timeout(),
            model.max_model_bytes,
            RetryStrategy::for_fetch(model.fetch_retries),
        )
        .context("Failed to create model source")?;

        let store = match &config.results_path {
            Some(path) => ResultStore::open(path),
            None => ResultStore::temporary(),
        }
        .context("Failed to open result store")?;

        info!(
            model_url = %model.url,
            image_size = config.preprocess_config.image_size,
            normalization = ?config.preprocess_config.normalization,
            mock_mode = config.mock_mode,
            "Tumor analysis service configured"
        );

        Ok(Self::new(ServiceParts {
            source: Arc::new(source),
            formats: default_formats(),
            preprocessor: ImagePreprocessor::new(
                config.preprocess_config.image_size,
                config.preprocess_config.normalization,
            ),
            classifier_output: model.classifier_output,
            store,
            ledger: TensorLedger::new(),
            mock_mode: config.mock_mode,
        }))
    }

    pub fn new(parts: ServiceParts) -> Self {
        let lifecycle = Arc::new(
            ModelLifecycle::new(parts.source, parts.formats, parts.preprocessor.size(), parts.ledger)
                .with_mock_mode(parts.mock_mode),
        );
        let orchestrator = Arc::new(InferenceOrchestrator::new(
            lifecycle.clone(),
            parts.preprocessor,
            parts.classifier_output,
        ));
        let session = AnalysisSession::new(orchestrator, Arc::new(parts.store));

        Self { lifecycle, session }
    }

    /// Idempotent load; true iff the real model is active afterwards
    pub async fn load_model(&self) -> bool {
        if let LoadOutcome::Failed(err) = self.lifecycle.load().await {
            info!(error = %err, "Continuing with mock results");
        }
        self.lifecycle.is_real_model_active()
    }

    pub fn is_mock_mode(&self) -> bool {
        self.lifecycle.is_mock_mode()
    }

    pub fn set_mock_mode(&self, enabled: bool) {
        self.lifecycle.set_mock_mode(enabled);
    }

    pub fn model_state(&self) -> ModelState {
        self.lifecycle.state()
    }

    pub fn lifecycle(&self) -> &Arc<ModelLifecycle> {
        &self.lifecycle
    }

    pub async fn analyze_image(&self, file: &UploadedFile) -> Result<AnalysisResult, DecodeError> {
        self.session.analyze(file).await
    }

    pub async fn analyze_batch<F>(&self, files: &[UploadedFile], on_progress: F) -> BatchAnalysis
    where
        F: FnMut(BatchProgress),
    {
        self.session.analyze_batch(files, on_progress).await
    }

    /// Persisted results, or `None` when the store cannot be read
    pub fn stored_results(&self) -> Option<Vec<StoredAnalysis>> {
        self.session.store().available_results()
    }

    pub fn history(&self, query: &HistoryQuery) -> Option<Vec<StoredAnalysis>> {
        self.stored_results().map(|records| query.apply(records))
    }

    pub fn session(&self) -> &AnalysisSession {
        &self.session
    }
}
