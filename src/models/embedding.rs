use serde::{Deserialize, Serialize};

/// Fixed-length face feature vector. Only ever compared, never rendered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn norm(&self) -> f32 {
        self.0.iter().map(|v| v * v).sum::<f32>().sqrt()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// Enrolled reference embeddings for one candidate. Read-only to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityReference {
    pub candidate_id: String,
    pub embeddings: Vec<Embedding>,
}

impl IdentityReference {
    /// Empty embeddings carry no identity and are dropped.
    pub fn new(candidate_id: impl Into<String>, embeddings: Vec<Embedding>) -> Self {
        Self {
            candidate_id: candidate_id.into(),
            embeddings: embeddings.into_iter().filter(|e| !e.is_empty()).collect(),
        }
    }

    pub fn is_enrolled(&self) -> bool {
        !self.embeddings.is_empty()
    }
}
