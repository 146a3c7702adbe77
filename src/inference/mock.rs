use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;

use super::{InferenceError, InferencePipeline, Prediction};

const LABELS: [&str; 2] = ["male", "female"];

/// Stand-in classifier: one random prediction per frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockClassifier;

impl MockClassifier {
    pub fn new() -> Self {
        Self
    }

    fn predict(&self) -> Prediction {
        let mut rng = rand::rng();

        let x1 = rng.random_range(0.0..0.5f32);
        let y1 = rng.random_range(0.0..0.5f32);
        let x2 = rng.random_range(x1 + 0.1..=1.0f32);
        let y2 = rng.random_range(y1 + 0.1..=1.0f32);

        Prediction {
            label: LABELS[rng.random_range(0..LABELS.len())].to_string(),
            confidence: rng.random_range(0.5..=0.99f32),
            bbox: [x1, y1, x2, y2],
        }
    }
}

#[async_trait]
impl InferencePipeline for MockClassifier {
    async fn infer(&self, frame: Bytes) -> Result<Vec<Prediction>, InferenceError> {
        if frame.is_empty() {
            return Err(InferenceError::Rejected("empty frame".into()));
        }
        Ok(vec![self.predict()])
    }
}
