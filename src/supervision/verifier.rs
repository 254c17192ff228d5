use serde::{Deserialize, Serialize};

use crate::models::Embedding;

/// Similarity thresholds, chosen by the frame's lighting score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct VerifierThresholds {
    /// Lighting below this uses `dim_threshold`.
    pub dim_lighting: f32,
    pub dim_threshold: f32,
    /// Lighting above this uses `bright_threshold`.
    pub bright_lighting: f32,
    pub bright_threshold: f32,
    pub default_threshold: f32,
}

impl Default for VerifierThresholds {
    fn default() -> Self {
        Self {
            dim_lighting: 40.0,
            dim_threshold: 0.60,
            bright_lighting: 85.0,
            bright_threshold: 0.75,
            default_threshold: 0.70,
        }
    }
}

impl VerifierThresholds {
    pub fn threshold_for(&self, lighting: f32) -> f32 {
        if lighting < self.dim_lighting {
            self.dim_threshold
        } else if lighting > self.bright_lighting {
            self.bright_threshold
        } else {
            self.default_threshold
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verification {
    pub matched: bool,
    pub best_similarity: f32,
    pub threshold: f32,
}

/// Cosine similarity; 0.0 for empty, zero-length or mismatched vectors.
pub fn cosine_similarity(a: &Embedding, b: &Embedding) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let norms = a.norm() * b.norm();
    if norms == 0.0 {
        return 0.0;
    }

    let dot: f32 = a.values().iter().zip(b.values()).map(|(x, y)| x * y).sum();
    dot / norms
}

#[derive(Debug, Clone, Default)]
pub struct IdentityVerifier {
    thresholds: VerifierThresholds,
}

impl IdentityVerifier {
    pub fn new(thresholds: VerifierThresholds) -> Self {
        Self { thresholds }
    }

    /// A match against any one reference is enough.
    pub fn verify(&self, embedding: &Embedding, references: &[Embedding], lighting: f32) -> Verification {
        let threshold = self.thresholds.threshold_for(lighting);
        let mut best: Option<f32> = None;
        for reference in references {
            if reference.len() != embedding.len() {
                log::debug!(
                    "Embedding length {} differs from reference length {}; similarity treated as 0",
                    embedding.len(),
                    reference.len()
                );
            }
            let similarity = cosine_similarity(embedding, reference);
            best = Some(best.map_or(similarity, |b| b.max(similarity)));
        }
        let best_similarity = best.unwrap_or(0.0);

        Verification {
            matched: best_similarity > threshold,
            best_similarity,
            threshold,
        }
    }
}
