use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{Rgb, RgbImage};

use proctor_lib::models::Difficulty;
use proctor_lib::ports::{InMemoryEnrollment, InMemoryQuestionSource, InMemoryResults};
use proctor_lib::supervision::{
    AnalysisError, CameraStatus, CaptureError, CaptureSource, FaceDetector, FaceRegion, Frame, SupervisionConfig,
};
use proctor_lib::{
    Embedding, ExamController, ExamDeps, ExamEvent, ExamSetup, ExamStatus, FinishTrigger, OptionLabel,
    ProctorError, ProctorSettings, Question, SnapshotClass, TerminationReason,
};

const CANDIDATE: &str = "candidate-7";

struct StillCamera {
    opens: AtomicUsize,
    closes: AtomicUsize,
}

impl StillCamera {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl CaptureSource for StillCamera {
    async fn open(&self) -> Result<(), CaptureError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_frame(&self) -> Result<Frame, CaptureError> {
        Ok(Frame::new(RgbImage::from_pixel(64, 64, Rgb([140, 140, 140]))))
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Reports whatever faces the test currently scripts.
struct ScriptedDetector {
    faces: Arc<Mutex<Vec<FaceRegion>>>,
    init_fails: bool,
    delay: Duration,
}

impl FaceDetector for ScriptedDetector {
    fn name(&self) -> &str {
        "scripted"
    }

    fn initialize(&mut self) -> Result<(), AnalysisError> {
        if self.init_fails {
            Err(AnalysisError::ModelUnavailable("weights missing".into()))
        } else {
            Ok(())
        }
    }

    fn detect(&mut self, _image: &RgbImage) -> Result<Vec<FaceRegion>, AnalysisError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        Ok(self.faces.lock().unwrap().clone())
    }
}

fn reference() -> Embedding {
    Embedding::new(vec![1.0, 0.0, 0.0, 0.0])
}

fn face(embedding: Embedding) -> FaceRegion {
    FaceRegion {
        x: 8,
        y: 8,
        width: 32,
        height: 32,
        confidence: 0.97,
        embedding: Some(embedding),
    }
}

fn questions(allowances: &[u32]) -> Vec<Question> {
    allowances
        .iter()
        .enumerate()
        .map(|(i, secs)| {
            Question::new(
                i,
                format!("question {i}"),
                ["w".into(), "x".into(), "y".into(), "z".into()],
                OptionLabel::B,
                if i % 2 == 0 { "anatomy" } else { "physiology" },
                Difficulty::Basic,
                *secs,
            )
        })
        .collect()
}

fn fast_settings() -> ProctorSettings {
    ProctorSettings {
        supervision: SupervisionConfig {
            capture_interval_ms: 40,
            min_capture_gap_ms: 20,
            capture_timeout_ms: 2_000,
            camera_ready_timeout_ms: 1_000,
        },
        ..ProctorSettings::default()
    }
}

struct Harness {
    controller: ExamController,
    camera: Arc<StillCamera>,
    faces: Arc<Mutex<Vec<FaceRegion>>>,
    results: InMemoryResults,
}

fn harness(allowances: &[u32], enrolled: bool, init_fails: bool) -> Harness {
    build_harness(allowances, enrolled, init_fails, fast_settings(), Duration::ZERO)
}

fn build_harness(
    allowances: &[u32],
    enrolled: bool,
    init_fails: bool,
    settings: ProctorSettings,
    detect_delay: Duration,
) -> Harness {
    let camera = StillCamera::new();
    let faces = Arc::new(Mutex::new(vec![face(reference())]));
    let results = InMemoryResults::new();
    let enrollment = InMemoryEnrollment::new();
    if enrolled {
        enrollment.enroll(CANDIDATE, vec![reference()]);
    }

    let deps = ExamDeps {
        enrollment: Arc::new(enrollment),
        results: Arc::new(results.clone()),
        capture: camera.clone(),
        detector: Box::new(ScriptedDetector {
            faces: Arc::clone(&faces),
            init_fails,
            delay: detect_delay,
        }),
    };

    let controller = ExamController::new(
        ExamSetup::new(CANDIDATE, "medicine"),
        questions(allowances),
        deps,
        settings,
    )
    .unwrap();

    Harness {
        controller,
        camera,
        faces,
        results,
    }
}

async fn wait_for_snapshots(controller: &ExamController, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while controller.snapshots().await.len() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("supervision did not record enough snapshots");
}

async fn answer_all_correctly(controller: &ExamController, count: usize) {
    for i in 0..count {
        controller.select_answer(OptionLabel::B).await.unwrap();
        if i + 1 < count {
            controller.next().await.unwrap();
        }
    }
}

#[tokio::test]
async fn verified_candidate_gets_full_score() {
    let h = harness(&[60, 90, 30], true, false);
    let mut events = h.controller.subscribe();

    let overview = h.controller.overview().await;
    assert_eq!(overview.question_count, 3);
    assert_eq!(overview.total_secs, 180);
    assert_eq!(overview.subjects, vec!["anatomy".to_string(), "physiology".to_string()]);

    let view = h.controller.begin().await.unwrap();
    assert_eq!(view.status, ExamStatus::Active);
    assert_eq!(view.remaining_secs, 180);
    let started = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(ExamEvent::StateChanged { status, remaining_secs }) = events.recv().await {
                return (status, remaining_secs);
            }
        }
    })
    .await
    .expect("no state change announced");
    assert_eq!(started, (ExamStatus::Active, 180));

    wait_for_snapshots(&h.controller, 1).await;
    answer_all_correctly(&h.controller, 3).await;

    let outcome = h.controller.submit().await.unwrap();
    assert_eq!(outcome.trigger, FinishTrigger::Submitted);
    assert_eq!(outcome.report.score, 3);
    assert_eq!(outcome.report.breakdown.per_subject.get("anatomy"), Some(&2));
    assert!(!outcome.verdict.terminated);
    assert!(outcome.persisted);

    let saved = h.results.records();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].candidate_id, CANDIDATE);
    assert_eq!(saved[0].score, 3);
    assert_eq!(saved[0].question_count, 3);
    assert_eq!(h.results.archived(h.controller.session_id()).len(), outcome.verdict.total);

    let snapshots = h.controller.snapshots().await;
    assert!(snapshots.iter().all(|s| s.classification == SnapshotClass::Verified));

    assert_eq!(*h.controller.camera_status().await.borrow(), CameraStatus::Released);
    assert_eq!(h.camera.closes.load(Ordering::SeqCst), 1);
    assert_eq!(h.controller.status().await, ExamStatus::Finished);
}

#[tokio::test]
async fn countdown_expiry_finishes_and_persists() {
    let h = harness(&[10], true, false);
    // Allowance is clamped to 30s; at 5ms per tick that is 150ms.
    let controller = h.controller.with_tick_interval(Duration::from_millis(5));

    let view = controller.begin().await.unwrap();
    assert_eq!(view.remaining_secs, 30);

    let outcome = tokio::time::timeout(Duration::from_secs(5), controller.wait_for_outcome())
        .await
        .expect("countdown never expired")
        .unwrap();

    assert_eq!(outcome.trigger, FinishTrigger::TimeExpired);
    assert_eq!(outcome.report.answered, 0);
    assert_eq!(outcome.report.score, 0);
    assert_eq!(controller.view().await.remaining_secs, 0);
    assert_eq!(h.results.records().len(), 1);

    // Late submit and abandon are no-ops.
    assert!(controller.abandon().await.unwrap().is_none());
    assert_eq!(h.results.records().len(), 1);
}

#[tokio::test]
async fn submit_is_only_offered_on_the_last_question() {
    let h = harness(&[60, 60], true, false);
    h.controller.begin().await.unwrap();

    assert!(matches!(h.controller.submit().await, Err(ProctorError::NotOnLastQuestion)));

    h.controller.next().await.unwrap();
    let outcome = h.controller.submit().await.unwrap();
    assert_eq!(outcome.trigger, FinishTrigger::Submitted);
}

#[tokio::test]
async fn finished_session_accepts_no_more_snapshots() {
    let h = harness(&[60], true, false);
    h.controller.begin().await.unwrap();
    wait_for_snapshots(&h.controller, 2).await;

    let outcome = h.controller.abandon().await.unwrap().expect("first finish performs");
    assert_eq!(outcome.trigger, FinishTrigger::Abandoned);
    assert!(!outcome.persisted);
    assert!(h.results.records().is_empty());

    let sealed = h.controller.snapshots().await.len();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(h.controller.snapshots().await.len(), sealed);
    assert_eq!(h.camera.closes.load(Ordering::SeqCst), 1);

    assert!(h.controller.abandon().await.unwrap().is_none());
    assert!(matches!(
        h.controller.next().await,
        Err(ProctorError::InvalidState {
            expected: ExamStatus::Active,
            actual: ExamStatus::Finished
        })
    ));
}

#[tokio::test]
async fn begin_requires_an_enrolled_reference() {
    let h = harness(&[60], false, false);

    let err = h.controller.begin().await.unwrap_err();
    assert!(matches!(err, ProctorError::NoEnrolledReference { ref candidate_id } if candidate_id == CANDIDATE));
    assert_eq!(h.controller.status().await, ExamStatus::Rules);
    assert_eq!(h.camera.opens.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_question_set_is_rejected() {
    let source = InMemoryQuestionSource::new();
    let deps = ExamDeps {
        enrollment: Arc::new(InMemoryEnrollment::new()),
        results: Arc::new(InMemoryResults::new()),
        capture: StillCamera::new(),
        detector: Box::new(ScriptedDetector {
            faces: Arc::new(Mutex::new(Vec::new())),
            init_fails: false,
            delay: Duration::ZERO,
        }),
    };

    let result = ExamController::load(ExamSetup::new(CANDIDATE, "law"), &source, deps, fast_settings()).await;
    assert!(matches!(result, Err(ProctorError::EmptyQuestionSet)));
}

#[tokio::test]
async fn loads_questions_from_source() {
    let source = InMemoryQuestionSource::new();
    source.insert("medicine", questions(&[60, 45]));
    let enrollment = InMemoryEnrollment::new();
    enrollment.enroll(CANDIDATE, vec![reference()]);
    let deps = ExamDeps {
        enrollment: Arc::new(enrollment),
        results: Arc::new(InMemoryResults::new()),
        capture: StillCamera::new(),
        detector: Box::new(ScriptedDetector {
            faces: Arc::new(Mutex::new(vec![face(reference())])),
            init_fails: false,
            delay: Duration::ZERO,
        }),
    };

    let controller = ExamController::load(ExamSetup::new(CANDIDATE, "medicine"), &source, deps, fast_settings())
        .await
        .unwrap();
    assert_eq!(controller.overview().await.total_secs, 105);
}

#[tokio::test]
async fn persistence_failure_keeps_outcome_for_retry() {
    let h = harness(&[60], true, false);
    h.results.fail_next(1);
    h.controller.begin().await.unwrap();
    h.controller.select_answer(OptionLabel::B).await.unwrap();

    let err = h.controller.submit().await.unwrap_err();
    assert!(matches!(err, ProctorError::PersistenceFailure(_)));

    let retained = h.controller.outcome().expect("outcome retained after failed save");
    assert!(!retained.persisted);
    assert!(retained.persistence_error.is_some());
    assert_eq!(retained.report.score, 1);

    let retried = h.controller.retry_persist().await.unwrap();
    assert!(retried.persisted);
    assert_eq!(h.results.records().len(), 1);

    // Already persisted: nothing is saved twice.
    h.controller.retry_persist().await.unwrap();
    assert_eq!(h.results.records().len(), 1);
}

#[tokio::test]
async fn impostor_is_terminated_with_zero_score() {
    let h = harness(&[60], true, false);
    *h.faces.lock().unwrap() = vec![face(Embedding::new(vec![0.0, 1.0, 0.0, 0.0]))];

    h.controller.begin().await.unwrap();
    h.controller.select_answer(OptionLabel::B).await.unwrap();
    wait_for_snapshots(&h.controller, 3).await;

    let outcome = h.controller.submit().await.unwrap();
    assert!(outcome.verdict.terminated);
    assert_eq!(outcome.verdict.reason, Some(TerminationReason::DifferentPerson));
    assert_eq!(outcome.report.raw_score, 1);
    assert_eq!(outcome.report.score, 0);
    assert_eq!(h.results.records()[0].score, 0);
    assert!(h.results.records()[0].breakdown.terminated);
}

#[tokio::test]
async fn second_face_terminates_session() {
    let h = harness(&[60], true, false);
    *h.faces.lock().unwrap() = vec![face(reference()), face(reference())];

    h.controller.begin().await.unwrap();
    wait_for_snapshots(&h.controller, 2).await;

    let outcome = h.controller.submit().await.unwrap();
    assert_eq!(outcome.verdict.reason, Some(TerminationReason::MultipleFaces));
    assert_eq!(outcome.report.score, 0);
}

#[tokio::test]
async fn degraded_analyzer_is_audited_but_not_penalised() {
    let h = harness(&[60], true, true);
    let mut events = h.controller.subscribe();

    h.controller.begin().await.unwrap();
    wait_for_snapshots(&h.controller, 2).await;

    let announced = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(ExamEvent::DegradedMode { session_id }) = events.recv().await {
                return session_id;
            }
        }
    })
    .await
    .expect("degraded mode was never announced");
    assert_eq!(announced, h.controller.session_id());

    h.controller.select_answer(OptionLabel::B).await.unwrap();
    let outcome = h.controller.submit().await.unwrap();
    assert!(!outcome.verdict.terminated);
    assert!(outcome.verdict.degraded >= 2);
    assert_eq!(outcome.report.score, 1);

    let snapshots = h.controller.snapshots().await;
    assert!(snapshots.iter().all(|s| s.degraded && s.matched.is_none()));

    let metrics = h.controller.metrics().await;
    assert!(metrics.degraded_count >= 2);
}

#[tokio::test]
async fn navigation_captures_respect_the_minimum_gap() {
    let settings = ProctorSettings {
        supervision: SupervisionConfig {
            capture_interval_ms: 60_000,
            min_capture_gap_ms: 300,
            capture_timeout_ms: 2_000,
            camera_ready_timeout_ms: 1_000,
        },
        ..ProctorSettings::default()
    };
    let h = build_harness(&[60, 60, 60], true, false, settings, Duration::ZERO);

    h.controller.begin().await.unwrap();
    wait_for_snapshots(&h.controller, 1).await;

    // Inside the gap: the nudge is dropped.
    h.controller.next().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.controller.snapshots().await.len(), 1);

    tokio::time::sleep(Duration::from_millis(300)).await;
    h.controller.next().await.unwrap();
    wait_for_snapshots(&h.controller, 2).await;

    h.controller.previous().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.controller.snapshots().await.len(), 2);

    h.controller.abandon().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn submit_racing_expiry_finishes_once() {
    // 30 one-millisecond ticks; submits land on both sides of expiry.
    for delay_ms in [20u64, 26, 28, 29, 30, 31, 32, 34, 40] {
        let h = harness(&[30], true, false);
        let controller = h.controller.with_tick_interval(Duration::from_millis(1));
        controller.begin().await.unwrap();

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        let (submitted, published) = tokio::join!(controller.submit(), controller.wait_for_outcome());
        let submitted = submitted.unwrap();
        let published = published.unwrap();

        assert_eq!(submitted, published);
        assert!(matches!(
            submitted.trigger,
            FinishTrigger::Submitted | FinishTrigger::TimeExpired
        ));
        assert_eq!(h.results.records().len(), 1);
        assert_eq!(controller.status().await, ExamStatus::Finished);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn answers_after_expiry_are_rejected() {
    let h = harness(&[30], true, false);
    let controller = h.controller.with_tick_interval(Duration::from_millis(1));
    controller.begin().await.unwrap();

    loop {
        match controller.select_answer(OptionLabel::B).await {
            Ok(view) => assert!(view.remaining_secs > 0),
            Err(ProctorError::InvalidState { actual, .. }) => {
                assert_eq!(actual, ExamStatus::Finished);
                break;
            }
            Err(err) => panic!("unexpected error: {err}"),
        }
    }

    let outcome = tokio::time::timeout(Duration::from_secs(5), controller.wait_for_outcome())
        .await
        .expect("countdown never expired")
        .unwrap();
    assert_eq!(outcome.trigger, FinishTrigger::TimeExpired);
    assert_eq!(controller.view().await.remaining_secs, 0);
}

#[tokio::test]
async fn slow_cycles_are_logged_as_timeouts() {
    let settings = ProctorSettings {
        supervision: SupervisionConfig {
            capture_interval_ms: 40,
            min_capture_gap_ms: 20,
            capture_timeout_ms: 50,
            camera_ready_timeout_ms: 1_000,
        },
        ..ProctorSettings::default()
    };
    let h = build_harness(&[60], true, false, settings, Duration::from_millis(250));

    h.controller.begin().await.unwrap();
    wait_for_snapshots(&h.controller, 1).await;

    let snapshots = h.controller.snapshots().await;
    let first = &snapshots[0];
    assert_eq!(first.classification, SnapshotClass::Error);
    assert!(first.detail.as_deref().unwrap_or_default().contains("timed out"));

    h.controller.abandon().await.unwrap();
}
