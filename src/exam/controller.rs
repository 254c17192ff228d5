use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time;
use uuid::Uuid;

use crate::error::{ProctorError, Result};
use crate::events::ExamEvent;
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::models::{IdentityReference, OptionLabel, Question, Snapshot};
use crate::ports::{IdentityEnrollment, QuestionSource, ResultsSink};
use crate::scoring::{score, ScoreReport};
use crate::settings::{debug_mode, ProctorSettings};
use crate::supervision::{
    session_seed, CameraStatus, CaptureError, CaptureSource, FaceAnalyzer, FaceDetector, IdentityVerifier,
    SupervisionContext, SupervisionController,
};
use crate::violations::{aggregate, TerminationVerdict};

use super::session::{ExamSession, ExamStatus, ExamView, FinishTransition, FinishTrigger, TickOutcome};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Who is sitting which exam.
#[derive(Debug, Clone)]
pub struct ExamSetup {
    pub candidate_id: String,
    pub discipline: String,
    /// Empty selects every subject of the discipline.
    pub sub_categories: Vec<String>,
}

impl ExamSetup {
    pub fn new(candidate_id: impl Into<String>, discipline: impl Into<String>) -> Self {
        Self {
            candidate_id: candidate_id.into(),
            discipline: discipline.into(),
            sub_categories: Vec::new(),
        }
    }
}

/// Host-provided collaborators for one session.
pub struct ExamDeps {
    pub enrollment: Arc<dyn IdentityEnrollment>,
    pub results: Arc<dyn ResultsSink>,
    pub capture: Arc<dyn CaptureSource>,
    pub detector: Box<dyn FaceDetector>,
}

/// Everything decided when a session finishes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamOutcome {
    pub session_id: String,
    pub candidate_id: String,
    pub discipline: String,
    pub trigger: FinishTrigger,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
    pub verdict: TerminationVerdict,
    pub report: ScoreReport,
    pub persisted: bool,
    pub persistence_error: Option<String>,
}

/// Final session state taken under the lock that performed the transition.
struct ClosedSession {
    trigger: FinishTrigger,
    ended_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    candidate_id: String,
    discipline: String,
    questions: Arc<[Question]>,
    answers: BTreeMap<usize, OptionLabel>,
    snapshots: Vec<Snapshot>,
}

impl ClosedSession {
    fn collect(session: &ExamSession) -> Self {
        Self {
            trigger: session.finish_trigger().unwrap_or(FinishTrigger::Abandoned),
            ended_at: session.ended_at().unwrap_or_else(Utc::now),
            started_at: session.started_at(),
            candidate_id: session.candidate_id().to_string(),
            discipline: session.discipline().to_string(),
            questions: session.questions(),
            answers: session.answers().clone(),
            // Sealed by the transition, so this is the final log.
            snapshots: session.snapshots().entries(),
        }
    }
}

/// What the candidate sees before starting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesOverview {
    pub session_id: String,
    pub discipline: String,
    pub question_count: usize,
    pub total_secs: u64,
    pub subjects: Vec<String>,
    pub capture_interval_secs: u64,
}

/// Drives one [`ExamSession`]: countdown ticker, supervision task, and the
/// single finish path shared by expiry, submit and abandon.
#[derive(Clone)]
pub struct ExamController {
    session_id: Arc<str>,
    session: Arc<Mutex<ExamSession>>,
    supervision: Arc<Mutex<SupervisionController>>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
    analyzer: Arc<std::sync::Mutex<FaceAnalyzer>>,
    enrollment: Arc<dyn IdentityEnrollment>,
    results: Arc<dyn ResultsSink>,
    capture: Arc<dyn CaptureSource>,
    settings: Arc<ProctorSettings>,
    metrics: MetricsCollector,
    events: broadcast::Sender<ExamEvent>,
    outcome: Arc<watch::Sender<Option<ExamOutcome>>>,
    persist_lock: Arc<Mutex<()>>,
    tick_interval: Duration,
    heartbeat_every_ticks: u32,
}

impl ExamController {
    pub fn new(
        setup: ExamSetup,
        questions: Vec<Question>,
        deps: ExamDeps,
        settings: ProctorSettings,
    ) -> Result<Self> {
        let session_id = Uuid::new_v4().to_string();
        let session = ExamSession::new(&session_id, setup.candidate_id, setup.discipline, questions)?;
        let analyzer = FaceAnalyzer::new(deps.detector, settings.analyzer.clone(), session_seed(&session_id));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (outcome, _) = watch::channel(None);

        info!(
            "Loaded session {} with {} questions ({}s budget)",
            session_id,
            session.questions().len(),
            session.budget().total_secs()
        );

        Ok(Self {
            session_id: session_id.into(),
            session: Arc::new(Mutex::new(session)),
            supervision: Arc::new(Mutex::new(SupervisionController::new())),
            ticker: Arc::new(Mutex::new(None)),
            analyzer: Arc::new(std::sync::Mutex::new(analyzer)),
            enrollment: deps.enrollment,
            results: deps.results,
            capture: deps.capture,
            settings: Arc::new(settings),
            metrics: MetricsCollector::new(),
            events,
            outcome: Arc::new(outcome),
            persist_lock: Arc::new(Mutex::new(())),
            tick_interval: Duration::from_secs(1),
            heartbeat_every_ticks: if debug_mode() { 1 } else { 10 },
        })
    }

    /// Fetch the question set and build a controller in the `Rules` state.
    pub async fn load(
        setup: ExamSetup,
        source: &dyn QuestionSource,
        deps: ExamDeps,
        settings: ProctorSettings,
    ) -> Result<Self> {
        let questions = source
            .fetch_questions(&setup.discipline, &setup.sub_categories)
            .await
            .map_err(ProctorError::QuestionSource)?;
        Self::new(setup, questions, deps, settings)
    }

    /// Length of one countdown second. Only meant to be shortened in tests.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn overview(&self) -> RulesOverview {
        let session = self.session.lock().await;
        let mut subjects: Vec<String> = session.questions().iter().map(|q| q.subject.clone()).collect();
        subjects.sort();
        subjects.dedup();

        RulesOverview {
            session_id: session.id().to_string(),
            discipline: session.discipline().to_string(),
            question_count: session.questions().len(),
            total_secs: session.budget().total_secs(),
            subjects,
            capture_interval_secs: self.settings.supervision.capture_interval().as_secs(),
        }
    }

    /// `Rules -> Active`: checks enrollment, starts supervision and the countdown.
    pub async fn begin(&self) -> Result<ExamView> {
        let candidate_id = {
            let session = self.session.lock().await;
            if session.status() != ExamStatus::Rules {
                return Err(ProctorError::InvalidState {
                    expected: ExamStatus::Rules,
                    actual: session.status(),
                });
            }
            session.candidate_id().to_string()
        };

        let embeddings = self
            .enrollment
            .get_reference_embeddings(&candidate_id)
            .await
            .map_err(ProctorError::Enrollment)?;
        let reference = IdentityReference::new(&candidate_id, embeddings);
        if !reference.is_enrolled() {
            warn!("Candidate {candidate_id} has no usable reference embeddings; refusing to start");
            return Err(ProctorError::NoEnrolledReference { candidate_id });
        }

        let started = {
            let mut session = self.session.lock().await;
            session.begin(Utc::now())?;

            let ctx = SupervisionContext {
                session_id: self.session_id.to_string(),
                capture: Arc::clone(&self.capture),
                analyzer: Arc::clone(&self.analyzer),
                verifier: IdentityVerifier::new(self.settings.thresholds.clone()),
                references: reference.embeddings.into(),
                log: session.snapshots().producer(),
                metrics: self.metrics.clone(),
                config: self.settings.supervision.clone(),
                events: self.events.clone(),
            };

            match self.supervision.lock().await.start(ctx) {
                Ok(()) => Ok(session.view()),
                Err(err) => {
                    error!("Failed to start supervision for session {}: {err:#}", self.session_id);
                    session.finish(Utc::now(), FinishTrigger::Abandoned);
                    Err((ClosedSession::collect(&session), err))
                }
            }
        };

        let view = match started {
            Ok(view) => view,
            Err((closed, err)) => {
                // Waiters on the outcome must still be released.
                let _ = self.complete(closed).await;
                return Err(ProctorError::CaptureUnavailable(CaptureError::Unavailable(format!(
                    "{err:#}"
                ))));
            }
        };

        self.spawn_ticker().await;

        info!(
            "Session {} started for candidate {} ({}s on the clock)",
            self.session_id, candidate_id, view.remaining_secs
        );
        let _ = self.events.send(ExamEvent::StateChanged {
            status: ExamStatus::Active,
            remaining_secs: view.remaining_secs,
        });

        Ok(view)
    }

    pub async fn next(&self) -> Result<ExamView> {
        let (moved, view) = {
            let mut session = self.session.lock().await;
            let moved = session.next()?;
            (moved, session.view())
        };
        if moved {
            self.supervision.lock().await.request_capture();
        }
        Ok(view)
    }

    pub async fn previous(&self) -> Result<ExamView> {
        let (moved, view) = {
            let mut session = self.session.lock().await;
            let moved = session.previous()?;
            (moved, session.view())
        };
        if moved {
            self.supervision.lock().await.request_capture();
        }
        Ok(view)
    }

    pub async fn select_answer(&self, label: OptionLabel) -> Result<ExamView> {
        let mut session = self.session.lock().await;
        session.select(label)?;
        Ok(session.view())
    }

    /// Candidate-initiated finish, only from the last question.
    ///
    /// If the countdown won the race, the outcome it produced is returned.
    pub async fn submit(&self) -> Result<ExamOutcome> {
        {
            let session = self.session.lock().await;
            if session.status() == ExamStatus::Finished {
                drop(session);
                return self.wait_for_outcome().await;
            }
            session.check_submit()?;
        }
        match self.finish(FinishTrigger::Submitted).await? {
            Some(outcome) => Ok(outcome),
            None => self.wait_for_outcome().await,
        }
    }

    /// End an active session without persisting anything.
    pub async fn abandon(&self) -> Result<Option<ExamOutcome>> {
        self.finish(FinishTrigger::Abandoned).await
    }

    /// The one path into `Finished`. Returns `Ok(None)` when another trigger
    /// already finished the session.
    ///
    /// A persistence failure is returned as an error, but the outcome is kept
    /// and can be re-submitted with [`ExamController::retry_persist`].
    pub async fn finish(&self, trigger: FinishTrigger) -> Result<Option<ExamOutcome>> {
        let closed = {
            let mut session = self.session.lock().await;
            match session.finish(Utc::now(), trigger) {
                FinishTransition::Performed => ClosedSession::collect(&session),
                FinishTransition::AlreadyFinished => {
                    debug!("Finish ({trigger:?}) ignored; session {} already finished", self.session_id);
                    return Ok(None);
                }
                FinishTransition::NotStarted => {
                    return Err(ProctorError::InvalidState {
                        expected: ExamStatus::Active,
                        actual: ExamStatus::Rules,
                    });
                }
            }
        };
        self.complete(closed).await.map(Some)
    }

    /// Everything after the `Finished` transition: stop supervision, decide
    /// the verdict, score, persist and publish.
    async fn complete(&self, closed: ClosedSession) -> Result<ExamOutcome> {
        let ClosedSession {
            trigger,
            ended_at,
            started_at,
            candidate_id,
            discipline,
            questions,
            answers,
            snapshots,
        } = closed;

        info!("Session {} finished ({trigger:?})", self.session_id);

        if let Err(err) = self.supervision.lock().await.stop().await {
            error!("Failed to stop supervision for session {}: {err:#}", self.session_id);
        }
        self.cancel_ticker().await;

        let verdict = aggregate(&snapshots, &self.settings.policy);
        let report = score(&questions, &answers, &verdict);
        if let Some(reason) = verdict.reason_text() {
            info!("Session {} terminated: {reason}", self.session_id);
        }

        let mut outcome = ExamOutcome {
            session_id: self.session_id.to_string(),
            candidate_id,
            discipline,
            trigger,
            started_at,
            ended_at,
            verdict,
            report,
            persisted: false,
            persistence_error: None,
        };

        let result = if trigger == FinishTrigger::Abandoned {
            info!("Session {} abandoned; result not persisted", self.session_id);
            Ok(())
        } else {
            let _guard = self.persist_lock.lock().await;
            let saved = self.persist(&mut outcome).await;
            self.archive(&outcome, &snapshots).await;
            saved
        };

        self.outcome.send_replace(Some(outcome.clone()));
        let _ = self.events.send(ExamEvent::StateChanged {
            status: ExamStatus::Finished,
            remaining_secs: self.session.lock().await.remaining_secs(),
        });
        let _ = self.events.send(ExamEvent::Finished {
            outcome: Box::new(outcome.clone()),
        });

        result.map(|()| outcome)
    }

    /// Re-submit a result whose first save failed.
    pub async fn retry_persist(&self) -> Result<ExamOutcome> {
        let _guard = self.persist_lock.lock().await;
        let Some(mut outcome) = self.outcome() else {
            return Err(ProctorError::InvalidState {
                expected: ExamStatus::Finished,
                actual: self.session.lock().await.status(),
            });
        };
        if outcome.persisted || outcome.trigger == FinishTrigger::Abandoned {
            return Ok(outcome);
        }

        let result = self.persist(&mut outcome).await;
        self.outcome.send_replace(Some(outcome.clone()));
        result.map(|()| outcome)
    }

    async fn persist(&self, outcome: &mut ExamOutcome) -> Result<()> {
        let saved = self
            .results
            .save_result(
                &outcome.candidate_id,
                outcome.report.score,
                &outcome.report.breakdown,
                &outcome.discipline,
                outcome.report.question_count,
            )
            .await;

        match saved {
            Ok(()) => {
                info!(
                    "Saved result for session {} (score {}/{})",
                    outcome.session_id, outcome.report.score, outcome.report.question_count
                );
                outcome.persisted = true;
                outcome.persistence_error = None;
                Ok(())
            }
            Err(err) => {
                error!("Failed to persist result for session {}: {err:#}", outcome.session_id);
                outcome.persistence_error = Some(format!("{err:#}"));
                Err(ProctorError::PersistenceFailure(err))
            }
        }
    }

    async fn archive(&self, outcome: &ExamOutcome, snapshots: &[Snapshot]) {
        if let Err(err) = self
            .results
            .archive_snapshots(&outcome.session_id, &outcome.candidate_id, snapshots)
            .await
        {
            warn!("Failed to archive snapshots for session {}: {err:#}", outcome.session_id);
        }
    }

    pub async fn view(&self) -> ExamView {
        self.session.lock().await.view()
    }

    pub async fn status(&self) -> ExamStatus {
        self.session.lock().await.status()
    }

    pub async fn snapshots(&self) -> Vec<Snapshot> {
        self.session.lock().await.snapshots().entries()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExamEvent> {
        self.events.subscribe()
    }

    pub async fn camera_status(&self) -> watch::Receiver<CameraStatus> {
        self.supervision.lock().await.camera_status()
    }

    pub async fn metrics(&self) -> MetricsSnapshot {
        self.metrics.get_snapshot().await
    }

    pub fn outcome(&self) -> Option<ExamOutcome> {
        self.outcome.borrow().clone()
    }

    /// Resolves once any trigger has finished the session.
    pub async fn wait_for_outcome(&self) -> Result<ExamOutcome> {
        let mut rx = self.outcome.subscribe();
        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|outcome| outcome.clone());
        match outcome {
            Some(outcome) => Ok(outcome),
            None => Err(ProctorError::InvalidState {
                expected: ExamStatus::Finished,
                actual: self.session.lock().await.status(),
            }),
        }
    }

    async fn spawn_ticker(&self) {
        let mut ticker_guard = self.ticker.lock().await;
        if let Some(handle) = ticker_guard.take() {
            handle.abort();
        }

        let controller = self.clone();
        let handle = tokio::spawn(async move { controller.run_ticker().await });
        *ticker_guard = Some(handle);
    }

    async fn run_ticker(self) {
        let mut interval = time::interval(self.tick_interval);
        // The first tick completes immediately; a countdown second has not passed yet.
        interval.tick().await;
        let heartbeat_every = self.heartbeat_every_ticks.max(1);
        let mut ticks: u32 = 0;

        loop {
            interval.tick().await;

            let (outcome, closed) = {
                let mut session = self.session.lock().await;
                let outcome = session.tick(Utc::now());
                let closed = (outcome == TickOutcome::Expired).then(|| ClosedSession::collect(&session));
                (outcome, closed)
            };
            match outcome {
                TickOutcome::Inactive => break,
                TickOutcome::Expired => {
                    info!("Countdown expired for session {}", self.session_id);
                    // Completing cancels this ticker, so it runs on its own task.
                    if let Some(closed) = closed {
                        let controller = self.clone();
                        tokio::spawn(async move {
                            if let Err(err) = controller.complete(closed).await {
                                error!("Failed to complete expired session {}: {err}", controller.session_id);
                            }
                        });
                    }
                    break;
                }
                TickOutcome::Running { remaining_secs } => {
                    ticks = ticks.wrapping_add(1);
                    if ticks % heartbeat_every == 0 {
                        debug!("Session {} heartbeat: {remaining_secs}s remaining", self.session_id);
                        let _ = self.events.send(ExamEvent::Heartbeat { remaining_secs });
                    }
                }
            }
        }
    }

    async fn cancel_ticker(&self) {
        if let Some(handle) = self.ticker.lock().await.take() {
            handle.abort();
        }
    }
}
