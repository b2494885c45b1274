//! Model Lifecycle Manager
//!
//! Owns the loaded model handle and the mock-mode flag. Loading is
//! fetch -> parse (each format in order) -> output signature check ->
//! warm-up with a zero tensor. Any failure flips the manager into mock mode
//! for the rest of the process; only an explicit [`ModelLifecycle::set_mock_mode`]
//! call leaves it.
//!
//! Transitions are serialized with atomics plus a mutex around the handle,
//! so the manager is safe to share across tasks in a multi-threaded runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::Array4;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{InferenceError, ModelLoadError};
use crate::metrics::{self, Timer};
use crate::model::{parse_artifact, ModelFormat, OutputSignature, TumorModel};
use crate::source::ModelSource;
use crate::tensor::TensorLedger;

/// Observable lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelState {
    Unloaded,
    Loading,
    Ready,
    MockFallback,
}

/// Result of one [`ModelLifecycle::load`] call
#[derive(Debug)]
pub enum LoadOutcome {
    /// A real model handle is available
    Ready,
    /// Mock mode is active; nothing was fetched
    Mock,
    /// Another load is in progress; the caller should retry later
    InFlight,
    /// This call attempted a load and it failed; mock mode is now active
    Failed(ModelLoadError),
}

impl LoadOutcome {
    /// The load request was satisfied, either by a real model or by mock mode
    pub fn succeeded(&self) -> bool {
        matches!(self, LoadOutcome::Ready | LoadOutcome::Mock)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, LoadOutcome::Ready)
    }
}

pub struct ModelLifecycle {
    source: Arc<dyn ModelSource>,
    formats: Vec<Box<dyn ModelFormat>>,
    input_shape: (usize, usize, usize, usize),
    model: Mutex<Option<Box<dyn TumorModel>>>,
    ready: AtomicBool,
    loading: AtomicBool,
    mock_mode: AtomicBool,
    ledger: TensorLedger,
}

impl ModelLifecycle {
    pub fn new(
        source: Arc<dyn ModelSource>,
        formats: Vec<Box<dyn ModelFormat>>,
        image_size: u32,
        ledger: TensorLedger,
    ) -> Self {
        let side = image_size as usize;
        Self {
            source,
            formats,
            input_shape: (1, side, side, 3),
            model: Mutex::new(None),
            ready: AtomicBool::new(false),
            loading: AtomicBool::new(false),
            mock_mode: AtomicBool::new(false),
            ledger,
        }
    }

    /// Start in mock mode (configuration switch); no fetch will ever happen
    pub fn with_mock_mode(self, enabled: bool) -> Self {
        self.mock_mode.store(enabled, Ordering::SeqCst);
        self
    }

    pub fn state(&self) -> ModelState {
        if self.mock_mode.load(Ordering::SeqCst) {
            ModelState::MockFallback
        } else if self.loading.load(Ordering::SeqCst) {
            ModelState::Loading
        } else if self.ready.load(Ordering::SeqCst) {
            ModelState::Ready
        } else {
            ModelState::Unloaded
        }
    }

    pub fn is_mock_mode(&self) -> bool {
        self.mock_mode.load(Ordering::SeqCst)
    }

    /// True when a real model handle is loaded and mock mode is off
    pub fn is_real_model_active(&self) -> bool {
        self.ready.load(Ordering::SeqCst) && !self.is_mock_mode()
    }

    /// Force mock mode on, or explicitly leave it.
    ///
    /// Leaving mock mode returns to `Ready` if a handle survives, otherwise
    /// to `Unloaded` so the next [`load`](Self::load) tries the source again.
    pub fn set_mock_mode(&self, enabled: bool) {
        let previous = self.mock_mode.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            info!(enabled, state = ?self.state(), "Mock mode set explicitly");
            if enabled {
                metrics::MOCK_FALLBACKS.inc();
            }
        }
    }

    /// Permanently switch to mock mode because something went wrong
    pub fn enter_mock_mode(&self, reason: &str) {
        if !self.mock_mode.swap(true, Ordering::SeqCst) {
            warn!(reason = %reason, "Switching to mock mode");
            metrics::MOCK_FALLBACKS.inc();
        }
    }

    /// Idempotent model load.
    ///
    /// Check order: handle present, load in flight, mock mode forced, then a
    /// real fetch. Concurrent callers are not queued; they get
    /// [`LoadOutcome::InFlight`] and must retry.
    pub async fn load(&self) -> LoadOutcome {
        if self.ready.load(Ordering::SeqCst) {
            return LoadOutcome::Ready;
        }
        if self.loading.load(Ordering::SeqCst) {
            return LoadOutcome::InFlight;
        }
        if self.is_mock_mode() {
            return LoadOutcome::Mock;
        }
        if self
            .loading
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return LoadOutcome::InFlight;
        }
        // Another caller may have finished between the checks above and the swap
        if self.ready.load(Ordering::SeqCst) {
            self.loading.store(false, Ordering::SeqCst);
            return LoadOutcome::Ready;
        }

        metrics::MODEL_LOAD_ATTEMPTS.inc();
        let timer = Timer::new();
        info!(model_url = %self.source.describe(), "Loading brain tumor classification model");

        let outcome = match self.fetch_and_validate().await {
            Ok(model) => {
                *self.model.lock().await = Some(model);
                self.ready.store(true, Ordering::SeqCst);
                timer.observe_duration_seconds(&metrics::MODEL_LOAD_DURATION);
                info!(elapsed_ms = timer.elapsed_ms(), "Model ready");
                LoadOutcome::Ready
            }
            Err(err) => {
                metrics::MODEL_LOAD_FAILURES.inc();
                error!(error = %err, "Failed to load model");
                self.enter_mock_mode(&err.to_string());
                LoadOutcome::Failed(err)
            }
        };

        self.loading.store(false, Ordering::SeqCst);
        outcome
    }

    async fn fetch_and_validate(&self) -> Result<Box<dyn TumorModel>, ModelLoadError> {
        let bytes = self.source.fetch().await?;
        metrics::MODEL_FETCH_BYTES.set(bytes.len() as i64);

        let (mut model, format) = parse_artifact(&self.formats, &bytes)?;
        drop(bytes);
        info!(format, signature = ?model.signature(), "Model artifact parsed");

        // A model rejected here is dropped on return, releasing its runtime resources
        self.warm_up(model.as_mut())?;
        Ok(model)
    }

    /// Throwaway forward pass on a zero tensor
    fn warm_up(&self, model: &mut dyn TumorModel) -> Result<(), ModelLoadError> {
        let dummy = self.ledger.track(Array4::<f32>::zeros(self.input_shape));
        let output = model
            .forward(&dummy)
            .map_err(|e| ModelLoadError::Warmup(e.to_string()))?;
        let output = output.map(|tensor| self.ledger.track(tensor));

        if output.signature() != model.signature() {
            return Err(ModelLoadError::Warmup(format!(
                "model declared {:?} outputs but produced {:?}",
                model.signature(),
                output.signature()
            )));
        }
        for tensor in output.iter() {
            if tensor.is_empty() {
                return Err(ModelLoadError::Warmup("model returned an empty output".into()));
            }
            if tensor.iter().any(|v| !v.is_finite()) {
                return Err(ModelLoadError::Warmup("model returned non-finite values".into()));
            }
        }

        debug!(outputs = output.signature().output_count(), "Model warm-up successful");
        Ok(())
    }

    /// Run `f` with exclusive access to the loaded model on the blocking pool.
    ///
    /// The handle is moved into the blocking task and put back afterwards;
    /// the mutex stays held meanwhile. Returns `None` when no handle is loaded.
    pub async fn with_model<R, F>(&self, f: F) -> Option<Result<R, InferenceError>>
    where
        R: Send + 'static,
        F: FnOnce(&mut dyn TumorModel) -> Result<R, InferenceError> + Send + 'static,
    {
        let mut guard = self.model.lock().await;
        let mut model = guard.take()?;

        let joined = tokio::task::spawn_blocking(move || {
            let result = f(model.as_mut());
            (model, result)
        })
        .await;

        match joined {
            Ok((model, result)) => {
                *guard = Some(model);
                Some(result)
            }
            // The handle went down with the task; later calls see no model
            Err(e) => Some(Err(InferenceError::Forward(format!("forward task failed: {}", e)))),
        }
    }

    pub fn signature(&self) -> Option<OutputSignature> {
        self.model.try_lock().ok().and_then(|m| m.as_ref().map(|m| m.signature()))
    }

    pub fn ledger(&self) -> &TensorLedger {
        &self.ledger
    }
}
