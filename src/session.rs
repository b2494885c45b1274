//! Analysis Session Adapter
//!
//! Uploaded file -> decoded raster -> orchestrator -> [`AnalysisResult`].
//! The adapter owns the raw upload bytes; the inference layer only ever sees
//! the decoded image. Batches run strictly one file at a time so only one
//! image's tensors are alive at once.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classes::TumorClass;
use crate::error::{DecodeError, PersistenceError};
use crate::inference::{InferenceOrchestrator, PredictionSource};
use crate::segmentation::SegmentationMask;
use crate::storage::{ResultStore, StoredAnalysis};

/// A file as handed over by the upload surface
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub mime_type: Option<String>,
    pub bytes: Arc<[u8]>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, mime_type: Option<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            mime_type,
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk, declaring its MIME type from the extension
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let mime_type = ImageFormat::from_path(path)
            .ok()
            .map(|format| format.to_mime_type().to_string());
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self::new(name, mime_type, bytes))
    }

    fn check_type(&self) -> Result<(), DecodeError> {
        match self.mime_type.as_deref() {
            Some(mime) if !mime.starts_with("image/") => Err(DecodeError::UnsupportedType {
                file_name: self.name.clone(),
                mime_type: mime.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// Opaque handle to the uploaded bytes plus their metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceImageRef {
    pub id: Uuid,
    pub file_name: String,
    pub mime_type: Option<String>,
    pub size_bytes: u64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub source: SourceImageRef,
    pub prediction: TumorClass,
    pub confidence: f64,
    /// Same width and height as the source image
    pub segmentation: Option<SegmentationMask>,
    pub origin: PredictionSource,
    pub analyzed_at: DateTime<Utc>,
}

impl AnalysisResult {
    /// Serializable form; the overlay is PNG encoded
    pub fn to_record(&self) -> Result<StoredAnalysis, PersistenceError> {
        let segmentation_png = self
            .segmentation
            .as_ref()
            .map(SegmentationMask::to_png_base64)
            .transpose()?;

        Ok(StoredAnalysis {
            id: self.source.id,
            file_name: self.source.file_name.clone(),
            mime_type: self.source.mime_type.clone(),
            size_bytes: self.source.size_bytes,
            width: self.source.width,
            height: self.source.height,
            prediction: self.prediction,
            confidence: self.confidence,
            source: self.origin,
            segmentation_png,
            analyzed_at: self.analyzed_at,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
}

impl BatchProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

/// Per-file outcomes, index aligned with the input
#[derive(Debug)]
pub struct BatchAnalysis {
    pub outcomes: Vec<Result<AnalysisResult, DecodeError>>,
    /// Set when the successful results could not be written to the store
    pub persist_error: Option<PersistenceError>,
}

impl BatchAnalysis {
    pub fn results(&self) -> impl Iterator<Item = &AnalysisResult> {
        self.outcomes.iter().filter_map(|outcome| outcome.as_ref().ok())
    }

    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.is_err()).count()
    }
}

pub struct AnalysisSession {
    orchestrator: Arc<InferenceOrchestrator>,
    store: Arc<ResultStore>,
    uploads: DashMap<Uuid, Arc<[u8]>>,
}

impl AnalysisSession {
    pub fn new(orchestrator: Arc<InferenceOrchestrator>, store: Arc<ResultStore>) -> Self {
        Self {
            orchestrator,
            store,
            uploads: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<ResultStore> {
        &self.store
    }

    /// Analyze one file. Only decode problems are errors; inference always answers.
    pub async fn analyze(&self, file: &UploadedFile) -> Result<AnalysisResult, DecodeError> {
        file.check_type()?;
        let image = decode(file).await?;

        let prediction = self.orchestrator.infer(&image).await;

        let source = SourceImageRef {
            id: Uuid::new_v4(),
            file_name: file.name.clone(),
            mime_type: file.mime_type.clone(),
            size_bytes: file.bytes.len() as u64,
            width: image.width(),
            height: image.height(),
        };
        drop(image);
        self.uploads.insert(source.id, file.bytes.clone());

        debug!(
            file = %source.file_name,
            prediction = %prediction.prediction,
            confidence = prediction.confidence,
            origin = ?prediction.source,
            "Image analyzed"
        );

        Ok(AnalysisResult {
            source,
            prediction: prediction.prediction,
            confidence: prediction.confidence,
            segmentation: prediction.segmentation,
            origin: prediction.source,
            analyzed_at: Utc::now(),
        })
    }

    /// Analyze files sequentially in input order, then persist the successful
    /// results under the fixed results key, replacing what was there.
    pub async fn analyze_batch<F>(&self, files: &[UploadedFile], mut on_progress: F) -> BatchAnalysis
    where
        F: FnMut(BatchProgress),
    {
        let total = files.len();
        let mut outcomes = Vec::with_capacity(total);

        for (index, file) in files.iter().enumerate() {
            let outcome = self.analyze(file).await;
            if let Err(err) = &outcome {
                warn!(file = %file.name, error = %err, "Skipping file that could not be decoded");
            }
            outcomes.push(outcome);
            on_progress(BatchProgress {
                completed: index + 1,
                total,
            });
        }

        let persist_error = self.persist(&outcomes).err();
        if let Some(err) = &persist_error {
            warn!(error = %err, "Failed to persist analysis results");
        }

        info!(total, failed = outcomes.iter().filter(|o| o.is_err()).count(), "Batch analysis finished");
        BatchAnalysis { outcomes, persist_error }
    }

    /// Replace the stored results; uploads not backing a stored result are released
    fn persist(&self, outcomes: &[Result<AnalysisResult, DecodeError>]) -> Result<(), PersistenceError> {
        let records = outcomes
            .iter()
            .filter_map(|outcome| outcome.as_ref().ok())
            .map(AnalysisResult::to_record)
            .collect::<Result<Vec<_>, _>>()?;
        self.store.save_results(&records)?;

        let saved: HashSet<Uuid> = records.iter().map(|record| record.id).collect();
        self.uploads.retain(|id, _| saved.contains(id));
        debug!(retained = self.uploads.len(), "Upload bytes pruned to stored results");
        Ok(())
    }

    /// Raw bytes of a previously analyzed upload
    pub fn source_bytes(&self, id: &Uuid) -> Option<Arc<[u8]>> {
        self.uploads.get(id).map(|entry| entry.value().clone())
    }

    /// Drop the retained bytes of one upload
    pub fn release(&self, id: &Uuid) -> Option<Arc<[u8]>> {
        self.uploads.remove(id).map(|(_, bytes)| bytes)
    }

    /// Number of uploads whose bytes are still held
    pub fn retained_uploads(&self) -> usize {
        self.uploads.len()
    }
}

async fn decode(file: &UploadedFile) -> Result<DynamicImage, DecodeError> {
    let bytes = file.bytes.clone();
    let decoded = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
        .await
        .map_err(|e| DecodeError::Task {
            file_name: file.name.clone(),
            reason: e.to_string(),
        })?;

    decoded.map_err(|source| DecodeError::Malformed {
        file_name: file.name.clone(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelLoadError;
    use crate::lifecycle::ModelLifecycle;
    use crate::preprocess::{ImagePreprocessor, Normalization};
    use crate::source::ModelSource;
    use crate::tensor::TensorLedger;
    use futures::future::BoxFuture;
    use std::io::Cursor;

    struct Offline;

    impl ModelSource for Offline {
        fn describe(&self) -> String {
            "offline".into()
        }

        fn fetch(&self) -> BoxFuture<'_, Result<Vec<u8>, ModelLoadError>> {
            Box::pin(async {
                Err(ModelLoadError::Fetch {
                    source_desc: "offline".into(),
                    reason: "no network".into(),
                })
            })
        }
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut buffer = Vec::new();
        DynamicImage::new_rgb8(width, height)
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        buffer
    }

    fn session() -> AnalysisSession {
        let lifecycle = Arc::new(ModelLifecycle::new(Arc::new(Offline), Vec::new(), 16, TensorLedger::new()));
        let orchestrator = Arc::new(InferenceOrchestrator::new(
            lifecycle,
            ImagePreprocessor::new(16, Normalization::ZeroOne),
            Default::default(),
        ));
        AnalysisSession::new(orchestrator, Arc::new(ResultStore::temporary().unwrap()))
    }

    #[tokio::test]
    async fn test_non_image_type_is_rejected() {
        let file = UploadedFile::new("notes.pdf", Some("application/pdf".into()), png(4, 4));
        let err = session().analyze(&file).await.unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedType { .. }));
    }

    #[tokio::test]
    async fn test_malformed_bytes_are_decode_errors() {
        let file = UploadedFile::new("broken.png", Some("image/png".into()), b"not an image".to_vec());
        let err = session().analyze(&file).await.unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_analyze_keeps_source_reference() {
        let session = session();
        let bytes = png(40, 30);
        let file = UploadedFile::new("scan.png", None, bytes.clone());

        let result = session.analyze(&file).await.unwrap();
        assert_eq!((result.source.width, result.source.height), (40, 30));
        assert_eq!(result.source.size_bytes, bytes.len() as u64);
        assert_eq!(result.origin, PredictionSource::Mock);
        if let Some(mask) = &result.segmentation {
            assert_eq!((mask.width(), mask.height()), (40, 30));
        }
        assert_eq!(session.source_bytes(&result.source.id).as_deref(), Some(bytes.as_slice()));
    }

    #[tokio::test]
    async fn test_batch_keeps_order_and_survives_bad_files() {
        let session = session();
        let files = vec![
            UploadedFile::new("a.png", Some("image/png".into()), png(8, 8)),
            UploadedFile::new("b.txt", Some("text/plain".into()), b"hello".to_vec()),
            UploadedFile::new("c.png", Some("image/png".into()), png(12, 6)),
        ];

        let mut progress = Vec::new();
        let batch = session.analyze_batch(&files, |p| progress.push(p.fraction())).await;

        assert_eq!(batch.outcomes.len(), 3);
        assert_eq!(batch.outcomes[0].as_ref().unwrap().source.file_name, "a.png");
        assert!(batch.outcomes[1].is_err());
        assert_eq!(batch.outcomes[2].as_ref().unwrap().source.file_name, "c.png");
        assert_eq!(batch.failures(), 1);
        assert!(batch.persist_error.is_none());
        assert_eq!(progress.len(), 3);
        assert!((progress[2] - 1.0).abs() < f64::EPSILON);

        let stored = session.store().load_results().unwrap();
        let names: Vec<_> = stored.iter().map(|r| r.file_name.as_str()).collect();
        assert_eq!(names, ["a.png", "c.png"]);
    }

    #[tokio::test]
    async fn test_replacing_batch_releases_previous_uploads() {
        let session = session();
        let first = session
            .analyze_batch(&[UploadedFile::new("old.png", None, png(8, 8))], |_| {})
            .await;
        let old_id = first.results().next().unwrap().source.id;
        assert!(session.source_bytes(&old_id).is_some());

        let files = vec![
            UploadedFile::new("new.png", None, png(8, 8)),
            UploadedFile::new("bad.png", Some("image/png".into()), b"garbage".to_vec()),
        ];
        let second = session.analyze_batch(&files, |_| {}).await;
        let new_id = second.results().next().unwrap().source.id;

        assert!(session.source_bytes(&old_id).is_none());
        assert!(session.source_bytes(&new_id).is_some());
        assert_eq!(session.retained_uploads(), 1);
    }

    #[tokio::test]
    async fn test_release_drops_single_upload() {
        let session = session();
        let bytes = png(6, 6);
        let result = session.analyze(&UploadedFile::new("scan.png", None, bytes.clone())).await.unwrap();

        let released = session.release(&result.source.id).unwrap();
        assert_eq!(&*released, bytes.as_slice());
        assert!(session.source_bytes(&result.source.id).is_none());
        assert!(session.release(&result.source.id).is_none());
        assert_eq!(session.retained_uploads(), 0);
    }
}
