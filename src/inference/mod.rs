mod mock;

pub use mock::MockClassifier;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;

// -----------------------------------------------------------------------------
// ----- Prediction ------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: String,
    /// In `[0, 1]`.
    pub confidence: f32,
    /// `[x1, y1, x2, y2]`.
    pub bbox: [f32; 4],
}

// -----------------------------------------------------------------------------
// ----- InferencePipeline -----------------------------------------------------

/// Turns a validated frame into predictions. Retries, if any, are the
/// pipeline's own business.
#[async_trait]
pub trait InferencePipeline: Send + Sync {
    async fn infer(&self, frame: Bytes) -> Result<Vec<Prediction>, InferenceError>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InferenceError {
    #[error("model rejected the frame: {0}")]
    Rejected(String),

    #[error("inference backend unavailable: {0}")]
    Unavailable(String),
}

// -----------------------------------------------------------------------------
// ----- PipelineRegistry ------------------------------------------------------

/// Named pipelines, owned by whoever builds the gateway.
#[derive(Default)]
pub struct PipelineRegistry {
    pipelines: RwLock<HashMap<String, Arc<dyn InferencePipeline>>>,
}

impl std::fmt::Debug for PipelineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding only the built-in `mock` pipeline.
    pub fn with_mock() -> Self {
        let registry = Self::new();
        registry.register(crate::config::MOCK_PIPELINE, Arc::new(MockClassifier::new()));
        registry
    }

    /// Returns the pipeline previously registered under `name`, if any.
    pub fn register(
        &self,
        name: impl Into<String>,
        pipeline: Arc<dyn InferencePipeline>,
    ) -> Option<Arc<dyn InferencePipeline>> {
        self.pipelines.write().insert(name.into(), pipeline)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn InferencePipeline>> {
        self.pipelines.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.pipelines.read().keys().cloned().collect();
        names.sort();
        names
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
