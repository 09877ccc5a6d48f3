//! Detection model lifecycle.
//!
//! A [`ModelCell`] loads its model at most once. Callers that arrive while the
//! load is in flight wait on the same load; a failed load stays failed for the
//! lifetime of the cell.

use crate::detector::{ScrfdDetector, DETECTION_MODEL_FILE};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use thiserror::Error;
use tokio::sync::OnceCell;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("detection model not loaded yet")]
    NotReady,
    #[error("detection model failed to load: {0}")]
    LoadFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelState {
    Uninitialized,
    Loading,
    Ready,
    Failed,
}

impl ModelState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Loading,
            2 => Self::Ready,
            3 => Self::Failed,
            _ => Self::Uninitialized,
        }
    }
}

/// A loaded model, shared between the cell and the workers using it.
pub type SharedModel<D> = Arc<Mutex<D>>;

/// Lazily loaded, load-once model slot.
pub struct ModelCell<D> {
    cell: OnceCell<Result<SharedModel<D>, String>>,
    state: AtomicU8,
}

impl<D: Send + 'static> Default for ModelCell<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Send + 'static> ModelCell<D> {
    pub fn new() -> Self {
        Self {
            cell: OnceCell::new(),
            state: AtomicU8::new(ModelState::Uninitialized as u8),
        }
    }

    pub fn state(&self) -> ModelState {
        ModelState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Load the model with `loader` unless a load already ran or is running.
    ///
    /// The loader runs on a blocking worker. Only the first caller's loader
    /// is ever invoked.
    pub async fn load<F, E>(&self, loader: F) -> Result<SharedModel<D>, ModelError>
    where
        F: FnOnce() -> Result<D, E> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let result = self
            .cell
            .get_or_init(|| async move {
                self.set_state(ModelState::Loading);
                let started = std::time::Instant::now();

                let outcome = match tokio::task::spawn_blocking(loader).await {
                    Ok(Ok(model)) => Ok(Arc::new(Mutex::new(model))),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(join) => Err(format!("loader task failed: {join}")),
                };

                match &outcome {
                    Ok(_) => {
                        self.set_state(ModelState::Ready);
                        tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "detection model ready");
                    }
                    Err(reason) => {
                        self.set_state(ModelState::Failed);
                        tracing::warn!(%reason, "detection model failed to load");
                    }
                }
                outcome
            })
            .await;

        result.clone().map_err(ModelError::LoadFailed)
    }

    /// The loaded model, or `NotReady`/`LoadFailed` if there is none.
    pub fn get(&self) -> Result<SharedModel<D>, ModelError> {
        match self.cell.get() {
            Some(Ok(model)) => Ok(Arc::clone(model)),
            Some(Err(reason)) => Err(ModelError::LoadFailed(reason.clone())),
            None => Err(ModelError::NotReady),
        }
    }

    fn set_state(&self, state: ModelState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

static DETECTOR: OnceLock<ModelCell<ScrfdDetector>> = OnceLock::new();

/// The process-wide detection model slot.
pub fn shared_detector() -> &'static ModelCell<ScrfdDetector> {
    DETECTOR.get_or_init(ModelCell::new)
}

/// Load the process-wide detector from `model_dir`.
pub async fn load_detector(model_dir: &Path) -> Result<SharedModel<ScrfdDetector>, ModelError> {
    let path = model_dir.join(DETECTION_MODEL_FILE);
    shared_detector()
        .load(move || ScrfdDetector::load(&path))
        .await
}

/// Default model directory: `$POSECAP_MODEL_DIR`, then
/// `$XDG_DATA_HOME/posecap/models`, then `~/.local/share/posecap/models`.
pub fn default_model_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("POSECAP_MODEL_DIR") {
        return PathBuf::from(dir);
    }
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("posecap/models")
}
