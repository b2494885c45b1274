//! Session-scoped result store.
//!
//! The whole result collection lives as one JSON array under a fixed key,
//! replaced wholesale on every save. Readers that only need something to
//! render use [`ResultStore::available_results`], which maps any
//! persistence failure to "no results available".

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classes::TumorClass;
use crate::error::PersistenceError;
use crate::inference::PredictionSource;
use crate::metrics;

pub const RESULTS_KEY: &str = "analysisResults";

type Result<T> = std::result::Result<T, PersistenceError>;

/// JSON record consumed by the results and report views
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAnalysis {
    pub id: Uuid,
    pub file_name: String,
    pub mime_type: Option<String>,
    pub size_bytes: u64,
    pub width: u32,
    pub height: u32,
    pub prediction: TumorClass,
    pub confidence: f64,
    pub source: PredictionSource,
    /// PNG overlay, base64 encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segmentation_png: Option<String>,
    pub analyzed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Filter + sort over stored results, as the history list does it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryQuery {
    /// Case-insensitive match against id, file name, or prediction label
    pub search: Option<String>,
    pub order: SortOrder,
}

impl HistoryQuery {
    pub fn search(term: impl Into<String>) -> Self {
        Self {
            search: Some(term.into()),
            ..Default::default()
        }
    }

    pub fn with_order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    fn matches(&self, record: &StoredAnalysis) -> bool {
        let term = match self.search.as_deref().map(str::trim) {
            Some(term) if !term.is_empty() => term.to_lowercase(),
            _ => return true,
        };

        record.id.to_string().contains(&term)
            || record.file_name.to_lowercase().contains(&term)
            || record.prediction.label().to_lowercase().contains(&term)
    }

    pub fn apply(&self, records: Vec<StoredAnalysis>) -> Vec<StoredAnalysis> {
        let mut filtered: Vec<StoredAnalysis> =
            records.into_iter().filter(|record| self.matches(record)).collect();

        // Stable sort keeps batch order for records analyzed in the same instant
        match self.order {
            SortOrder::NewestFirst => filtered.sort_by(|a, b| b.analyzed_at.cmp(&a.analyzed_at)),
            SortOrder::OldestFirst => filtered.sort_by(|a, b| a.analyzed_at.cmp(&b.analyzed_at)),
        }
        filtered
    }
}

pub struct ResultStore {
    db: sled::Db,
    path: Option<PathBuf>,
}

impl ResultStore {
    /// Open (or create) a persistent store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let db = sled::Config::new()
            .path(&path)
            .use_compression(true)
            .open()
            .map_err(|source| PersistenceError::Storage {
                operation: format!("open {}", path.display()),
                source,
            })?;

        tracing::info!(path = %path.display(), "Result store opened");
        Ok(Self { db, path: Some(path) })
    }

    /// Store removed when dropped; results last for this session only
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|source| PersistenceError::Storage {
                operation: "open temporary".to_string(),
                source,
            })?;

        tracing::debug!("Temporary result store opened");
        Ok(Self { db, path: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Replace the stored collection with `records`
    pub fn save_results(&self, records: &[StoredAnalysis]) -> Result<()> {
        let bytes = serde_json::to_vec(records).map_err(|source| PersistenceError::Serialization {
            key: RESULTS_KEY.to_string(),
            source,
        })?;

        self.db
            .insert(RESULTS_KEY, bytes)
            .map_err(|source| PersistenceError::Storage {
                operation: format!("insert {}", RESULTS_KEY),
                source,
            })?;
        self.db.flush().map_err(|source| PersistenceError::Storage {
            operation: "flush".to_string(),
            source,
        })?;

        metrics::RESULTS_PERSISTED.inc_by(records.len() as u64);
        tracing::debug!(count = records.len(), "Analysis results persisted");
        Ok(())
    }

    pub fn load_results(&self) -> Result<Vec<StoredAnalysis>> {
        let bytes = self
            .db
            .get(RESULTS_KEY)
            .map_err(|source| PersistenceError::Storage {
                operation: format!("get {}", RESULTS_KEY),
                source,
            })?;

        match bytes {
            None => Ok(Vec::new()),
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|source| PersistenceError::Serialization {
                key: RESULTS_KEY.to_string(),
                source,
            }),
        }
    }

    /// Stored results, or `None` when they cannot be read
    pub fn available_results(&self) -> Option<Vec<StoredAnalysis>> {
        match self.load_results() {
            Ok(records) => Some(records),
            Err(err) => {
                tracing::warn!(error = %err, "No results available");
                None
            }
        }
    }

    pub fn clear(&self) -> Result<()> {
        self.db
            .remove(RESULTS_KEY)
            .map_err(|source| PersistenceError::Storage {
                operation: format!("remove {}", RESULTS_KEY),
                source,
            })?;
        Ok(())
    }
}
