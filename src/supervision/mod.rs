mod analyzer;
mod capture;
mod config;
mod controller;
mod descriptor;
mod lighting;
mod loop_worker;
mod verifier;

pub use analyzer::{session_seed, AnalysisError, AnalyzerMode, FaceAnalysis, FaceAnalyzer, FaceDetector, FaceRegion};
pub use capture::{CameraLease, CameraStatus, CaptureError, CaptureSource, Frame};
pub use config::{AnalyzerConfig, SupervisionConfig};
pub use controller::SupervisionController;
pub use descriptor::crop_descriptor;
pub use lighting::{classify_lighting, enhance, enhancement_for, lighting_score, Enhancement, LightingQuality};
pub use loop_worker::{classify, SupervisionContext};
pub use verifier::{cosine_similarity, IdentityVerifier, Verification, VerifierThresholds};
