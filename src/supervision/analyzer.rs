//! Face analysis: detection model, low-light retry, and the degraded fallback.
//!
//! The fallback reports exactly one face with a synthetic embedding that is
//! stable for the whole session. Sessions therefore keep running when the
//! model is gone, but identity rejection is effectively off. Entering this
//! mode is always logged and surfaced on every snapshot it produces.

use std::time::Duration;

use image::RgbImage;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use thiserror::Error;

use crate::models::Embedding;

use super::config::AnalyzerConfig;
use super::descriptor::crop_descriptor;
use super::lighting::{classify_lighting, enhance, enhancement_for, lighting_score, LightingQuality};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("face detection model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("face detection failed: {0}")]
    Detection(String),
    #[error("analyzer still busy with a previous frame")]
    Busy,
    #[error("capture cycle timed out after {0:?}")]
    Timeout(Duration),
    #[error("analysis worker failed: {0}")]
    Worker(String),
}

/// A detected face, in pixel coordinates of the analysed frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub confidence: f32,
    /// Model-provided embedding, when the model computes one.
    pub embedding: Option<Embedding>,
}

/// Primary face detection model.
pub trait FaceDetector: Send {
    fn name(&self) -> &str;
    fn initialize(&mut self) -> Result<(), AnalysisError>;
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceRegion>, AnalysisError>;
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AnalyzerMode {
    Uninitialized,
    Primary,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FaceAnalysis {
    pub face_count: usize,
    /// Present only when exactly one face was found.
    pub embedding: Option<Embedding>,
    pub lighting_score: f32,
    pub lighting: LightingQuality,
    /// Second detection pass ran on a brightness/contrast-corrected frame.
    pub enhanced: bool,
    pub degraded: bool,
}

pub struct FaceAnalyzer {
    detector: Box<dyn FaceDetector>,
    config: AnalyzerConfig,
    mode: AnalyzerMode,
    consecutive_failures: u32,
    session_seed: u64,
    fallback_embedding: Option<Embedding>,
}

impl FaceAnalyzer {
    pub fn new(detector: Box<dyn FaceDetector>, config: AnalyzerConfig, session_seed: u64) -> Self {
        Self {
            detector,
            config,
            mode: AnalyzerMode::Uninitialized,
            consecutive_failures: 0,
            session_seed,
            fallback_embedding: None,
        }
    }

    pub fn mode(&self) -> AnalyzerMode {
        self.mode
    }

    pub fn is_degraded(&self) -> bool {
        self.mode == AnalyzerMode::Fallback
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Bring the model up, falling back after `max_init_attempts` failures.
    pub fn initialize(&mut self) -> AnalyzerMode {
        if self.mode != AnalyzerMode::Uninitialized {
            return self.mode;
        }

        let attempts = self.config.max_init_attempts.max(1);
        for attempt in 1..=attempts {
            match self.detector.initialize() {
                Ok(()) => {
                    log::info!("Face detector '{}' ready (attempt {attempt})", self.detector.name());
                    self.mode = AnalyzerMode::Primary;
                    return self.mode;
                }
                Err(err) => {
                    log::warn!(
                        "Face detector '{}' init attempt {attempt}/{attempts} failed: {err}",
                        self.detector.name()
                    );
                }
            }
        }

        self.enter_fallback("model failed to initialise");
        self.mode
    }

    pub fn analyze(&mut self, image: &RgbImage) -> Result<FaceAnalysis, AnalysisError> {
        if self.mode == AnalyzerMode::Uninitialized {
            self.initialize();
        }

        let lighting = lighting_score(image);
        if self.mode == AnalyzerMode::Fallback {
            return Ok(self.fallback_analysis(lighting));
        }

        let detected = self.detect_with_low_light_retry(image, lighting);
        let (regions, enhanced_frame) = match detected {
            Ok(found) => {
                self.consecutive_failures = 0;
                found
            }
            Err(err) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures > self.config.max_consecutive_failures {
                    self.enter_fallback("too many consecutive detection failures");
                }
                return Err(err);
            }
        };

        let embedding = match regions.as_slice() {
            [only] => Some(match &only.embedding {
                Some(embedding) => embedding.clone(),
                None => crop_descriptor(enhanced_frame.as_ref().unwrap_or(image), only),
            }),
            _ => None,
        };

        Ok(FaceAnalysis {
            face_count: regions.len(),
            embedding,
            lighting_score: lighting,
            lighting: classify_lighting(lighting, self.config.low_light, self.config.high_light),
            enhanced: enhanced_frame.is_some(),
            degraded: false,
        })
    }

    // Returns the enhanced frame when the second pass was used.
    fn detect_with_low_light_retry(
        &mut self,
        image: &RgbImage,
        lighting: f32,
    ) -> Result<(Vec<FaceRegion>, Option<RgbImage>), AnalysisError> {
        let regions = self.detector.detect(image)?;
        if !regions.is_empty() || lighting >= self.config.low_light {
            return Ok((regions, None));
        }

        let enhancement = enhancement_for(lighting, self.config.low_light);
        log::debug!(
            "No face at lighting {lighting:.1}; retrying with brighten={} contrast={:.1}",
            enhancement.brighten,
            enhancement.contrast
        );
        let enhanced = enhance(image, enhancement);
        let regions = self.detector.detect(&enhanced)?;
        Ok((regions, Some(enhanced)))
    }

    fn enter_fallback(&mut self, reason: &str) {
        if self.mode == AnalyzerMode::Fallback {
            return;
        }
        log::warn!(
            "Face analyzer entering DEGRADED mode ({reason}); identity rejection disabled for the rest of this session"
        );
        self.mode = AnalyzerMode::Fallback;
    }

    fn fallback_analysis(&mut self, lighting: f32) -> FaceAnalysis {
        let (seed, len) = (self.session_seed, self.config.fallback_embedding_len);
        let embedding = self
            .fallback_embedding
            .get_or_insert_with(|| synthetic_embedding(seed, len))
            .clone();

        FaceAnalysis {
            face_count: 1,
            embedding: Some(embedding),
            lighting_score: lighting,
            lighting: classify_lighting(lighting, self.config.low_light, self.config.high_light),
            enhanced: false,
            degraded: true,
        }
    }
}

/// Stable per-session seed (FNV-1a over the session id).
pub fn session_seed(session_id: &str) -> u64 {
    session_id
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325u64, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(0x0000_0100_0000_01b3)
        })
}

fn synthetic_embedding(seed: u64, len: usize) -> Embedding {
    let mut rng = StdRng::seed_from_u64(seed);
    Embedding::new((0..len.max(1)).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
}
