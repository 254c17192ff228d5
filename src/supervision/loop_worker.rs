use std::sync::{Arc, Mutex, TryLockError};

use chrono::{DateTime, Utc};
use image::RgbImage;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::events::ExamEvent;
use crate::exam::SnapshotProducer;
use crate::metrics::{CaptureMetrics, MetricsCollector};
use crate::models::{Embedding, Snapshot, SnapshotClass};

use super::analyzer::{AnalysisError, FaceAnalysis, FaceAnalyzer};
use super::capture::{CameraLease, CameraStatus, CaptureSource};
use super::config::SupervisionConfig;
use super::verifier::IdentityVerifier;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Everything one supervision run needs. Built by the exam controller when
/// the session goes active.
pub struct SupervisionContext {
    pub session_id: String,
    pub capture: Arc<dyn CaptureSource>,
    pub analyzer: Arc<Mutex<FaceAnalyzer>>,
    pub verifier: IdentityVerifier,
    pub references: Arc<[Embedding]>,
    pub log: SnapshotProducer,
    pub metrics: MetricsCollector,
    pub config: SupervisionConfig,
    pub events: broadcast::Sender<ExamEvent>,
}

#[derive(Debug, Clone, Copy)]
enum CaptureTrigger {
    Scheduled,
    Navigation,
}

#[derive(Debug, Default, Clone, Copy)]
struct CycleTimings {
    capture_ms: u64,
    analysis_ms: Option<u64>,
}

pub async fn supervision_loop(
    ctx: SupervisionContext,
    cancel_token: CancellationToken,
    mut capture_requests: mpsc::Receiver<()>,
    camera_tx: watch::Sender<CameraStatus>,
) {
    // Dropped on every exit path, which closes the camera.
    let mut lease = CameraLease::new(Arc::clone(&ctx.capture), camera_tx);

    // First tick completes immediately, so the first capture happens at start.
    let mut ticker = tokio::time::interval(ctx.config.capture_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last_capture: Option<Instant> = None;
    let mut degraded_announced = false;

    log_info!("supervision loop started for session {}", ctx.session_id);

    loop {
        let trigger = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            _ = ticker.tick() => CaptureTrigger::Scheduled,
            Some(()) = capture_requests.recv() => {
                let recent = last_capture
                    .map(|at| at.elapsed() < ctx.config.min_capture_gap())
                    .unwrap_or(false);
                if recent {
                    log_debug!("navigation capture skipped; previous capture too recent");
                    continue;
                }
                // Push the next scheduled capture a full period out.
                ticker.reset();
                CaptureTrigger::Navigation
            }
        };

        last_capture = Some(Instant::now());
        let taken_at = Utc::now();
        let cycle_start = Instant::now();
        let timeout = ctx.config.capture_timeout();

        let outcome = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("session {} ended mid-capture; discarding in-flight result", ctx.session_id);
                break;
            }
            result = tokio::time::timeout(timeout, run_cycle(&ctx, &mut lease, taken_at)) => result,
        };

        let (snapshot, timings) = match outcome {
            Ok(cycle) => cycle,
            Err(_) => {
                log_warn!(
                    "capture cycle timeout (> {:?}) session {}",
                    timeout,
                    ctx.session_id
                );
                (
                    Snapshot::error(taken_at, None, AnalysisError::Timeout(timeout).to_string()),
                    CycleTimings {
                        capture_ms: duration_ms(cycle_start.elapsed()),
                        analysis_ms: None,
                    },
                )
            }
        };

        log_debug!(
            "{:?} capture for session {}: {} in {}ms",
            trigger,
            ctx.session_id,
            snapshot.classification.as_str(),
            cycle_start.elapsed().as_millis()
        );

        record(&ctx, snapshot, timings, cycle_start, &mut degraded_announced).await;
    }

    log_info!("supervision loop shutting down for session {}", ctx.session_id);
}

async fn run_cycle(
    ctx: &SupervisionContext,
    lease: &mut CameraLease,
    taken_at: DateTime<Utc>,
) -> (Snapshot, CycleTimings) {
    let capture_start = Instant::now();
    let frame = match lease.frame(ctx.config.camera_ready_timeout()).await {
        Ok(frame) => frame,
        Err(err) => {
            log_warn!("frame capture failed for session {}: {err}", ctx.session_id);
            let timings = CycleTimings {
                capture_ms: duration_ms(capture_start.elapsed()),
                analysis_ms: None,
            };
            return (Snapshot::error(taken_at, None, err.to_string()), timings);
        }
    };
    let capture_ms = duration_ms(capture_start.elapsed());

    let frame_ref = frame.id;
    let image = frame.image;
    let analysis_start = Instant::now();
    let analysis = tokio::task::spawn_blocking({
        let analyzer = Arc::clone(&ctx.analyzer);
        move || analyze_frame(&analyzer, &image)
    })
    .await
    .unwrap_or_else(|err| Err(AnalysisError::Worker(err.to_string())));
    let timings = CycleTimings {
        capture_ms,
        analysis_ms: Some(duration_ms(analysis_start.elapsed())),
    };

    let snapshot = match analysis {
        Ok(analysis) => {
            let (classification, matched) = classify(&analysis, &ctx.verifier, &ctx.references);
            Snapshot {
                taken_at,
                frame: Some(frame_ref),
                classification,
                embedding: analysis.embedding,
                matched,
                lighting_score: Some(analysis.lighting_score),
                degraded: analysis.degraded,
                detail: analysis.enhanced.then(|| "detected on low-light enhanced frame".to_string()),
            }
        }
        Err(err) => {
            log_warn!("face analysis failed for session {}: {err}", ctx.session_id);
            Snapshot::error(taken_at, Some(frame_ref), err.to_string())
        }
    };

    (snapshot, timings)
}

fn analyze_frame(analyzer: &Mutex<FaceAnalyzer>, image: &RgbImage) -> Result<FaceAnalysis, AnalysisError> {
    // A timed-out cycle can leave the previous analysis running.
    let mut analyzer = match analyzer.try_lock() {
        Ok(guard) => guard,
        Err(TryLockError::WouldBlock) => return Err(AnalysisError::Busy),
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
    };
    analyzer.analyze(image)
}

/// Map one analysis onto a snapshot class.
///
/// Degraded analyses are never judged against the references: their
/// embedding is synthetic, so they count as verified with `matched` unset.
pub fn classify(
    analysis: &FaceAnalysis,
    verifier: &IdentityVerifier,
    references: &[Embedding],
) -> (SnapshotClass, Option<bool>) {
    if analysis.degraded {
        return (SnapshotClass::Verified, None);
    }

    match (analysis.face_count, analysis.embedding.as_ref()) {
        (0, _) => (SnapshotClass::NoFace, None),
        (1, Some(embedding)) => {
            let verification = verifier.verify(embedding, references, analysis.lighting_score);
            let class = if verification.matched {
                SnapshotClass::Verified
            } else {
                SnapshotClass::WrongPerson
            };
            (class, Some(verification.matched))
        }
        (1, None) => (SnapshotClass::Error, None),
        _ => (SnapshotClass::MultipleFaces, None),
    }
}

async fn record(
    ctx: &SupervisionContext,
    snapshot: Snapshot,
    timings: CycleTimings,
    cycle_start: Instant,
    degraded_announced: &mut bool,
) {
    let taken_at = snapshot.taken_at;
    let classification = snapshot.classification;
    let lighting_score = snapshot.lighting_score;
    let degraded = snapshot.degraded;

    let appended = ctx.log.append(snapshot);
    if appended {
        let _ = ctx.events.send(ExamEvent::SnapshotRecorded {
            classification,
            taken_at,
            degraded,
        });
        if degraded && !*degraded_announced {
            *degraded_announced = true;
            log_warn!(
                "session {} is being supervised by the degraded analyzer; identity checks are off",
                ctx.session_id
            );
            let _ = ctx.events.send(ExamEvent::DegradedMode {
                session_id: ctx.session_id.clone(),
            });
        }
    } else {
        log_info!(
            "snapshot taken at {} arrived after session {} ended; dropped",
            taken_at,
            ctx.session_id
        );
    }

    let (cpu_percent, memory_mb) = ctx.metrics.sample_system_metrics().await;
    ctx.metrics
        .record_capture(CaptureMetrics {
            timestamp: taken_at,
            capture_ms: timings.capture_ms,
            analysis_ms: timings.analysis_ms,
            total_ms: duration_ms(cycle_start.elapsed()),
            classification,
            lighting_score,
            degraded,
            dropped: !appended,
            cpu_percent,
            memory_mb,
        })
        .await;
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
