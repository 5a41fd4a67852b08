//! End-to-end runs of the capture session against synthetic scenes and staged
//! collaborators.

mod common;

use std::sync::Arc;

use approx::assert_relative_eq;
use common::mock_collaborators::{Fixture, StagedSegmenter, UnreachableSegmenter};
use common::synthetic_scene::{render, FoodBox};
use mealscan_lib::config::PipelineConfig;
use mealscan_lib::models::{FusionMethod, Viewpoint};
use mealscan_lib::session::{RequestKind, SessionSnapshot};
use mealscan_lib::{CaptureSession, Collaborators, PipelineError, RequestOutcome, SessionStage};

fn plate_fixture(top_class: Option<&str>, side_dropout: f64) -> Fixture {
    let fixture = Fixture::new(StagedSegmenter::default());
    let food = FoodBox::plate();
    fixture.stage(render(&food, Viewpoint::Top, 0.0, 1), top_class, Some(0.9));
    fixture.stage(render(&food, Viewpoint::Side, side_dropout, 2), None, None);
    fixture
}

fn session(fixture: &Fixture) -> CaptureSession {
    CaptureSession::new(fixture.collaborators(), &PipelineConfig::default())
}

async fn segment_both(session: &CaptureSession) {
    for viewpoint in Viewpoint::ALL {
        session.capture(viewpoint).await.unwrap();
        session.segment(viewpoint).await.unwrap();
    }
}

/// Snapshot with the per-attempt id blanked so two attempts can be compared.
fn comparable(mut snapshot: SessionSnapshot) -> SessionSnapshot {
    snapshot.attempt_id.clear();
    snapshot
}

#[tokio::test]
async fn plate_walks_every_stage_to_nutrition() {
    let fixture = plate_fixture(Some("rice"), 0.0);
    let session = session(&fixture);
    assert_eq!(session.stage().await, SessionStage::Idle);

    let stage = session.capture(Viewpoint::Top).await.unwrap();
    assert_eq!(stage, RequestOutcome::Applied(SessionStage::TopCaptured));

    let report = session.segment(Viewpoint::Top).await.unwrap().applied().unwrap();
    assert_eq!(report.stage, SessionStage::TopSegmented);
    assert!(report.retake_advised.is_none());
    assert_relative_eq!(report.observation.footprint_area, 0.01, max_relative = 0.08);

    let stage = session.capture(Viewpoint::Side).await.unwrap();
    assert_eq!(stage, RequestOutcome::Applied(SessionStage::SideCaptured));
    let report = session.segment(Viewpoint::Side).await.unwrap().applied().unwrap();
    assert_eq!(report.stage, SessionStage::SideSegmented);
    assert_relative_eq!(report.observation.height_profile.extent(), 0.03, max_relative = 0.06);

    let estimate = session.finalize().await.unwrap().applied().unwrap();
    assert_eq!(estimate.volume.method, FusionMethod::TwoViewFusion);
    assert!(
        (estimate.volume_ml - 180.0).abs() / 180.0 < 0.12,
        "volume {} mL too far from 180 mL",
        estimate.volume_ml
    );
    assert_relative_eq!(estimate.confidence, 1.0);
    assert!(estimate.volume.misregistration.is_none());

    // Rice: 1.0 g/mL, 1.3 kcal/g
    assert_relative_eq!(estimate.mass_grams, estimate.volume_ml, epsilon = 1e-9);
    assert_relative_eq!(estimate.calories, estimate.mass_grams * 1.3, epsilon = 1e-9);
    assert_eq!(estimate.nutrition.source_class, "rice");
    assert_eq!(estimate.nutrition.source_confidence, Some(0.9));
    assert_eq!(session.stage().await, SessionStage::NutritionComputed);
}

#[tokio::test]
async fn out_of_order_requests_fail_fast() {
    let fixture = plate_fixture(Some("rice"), 0.0);
    let session = session(&fixture);

    let err = session.segment(Viewpoint::Top).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::StagePrecondition {
            request: RequestKind::Segmentation,
            stage: SessionStage::Idle,
            ..
        }
    ));

    session.capture(Viewpoint::Top).await.unwrap();
    let err = session.capture(Viewpoint::Side).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::StagePrecondition {
            request: RequestKind::Capture,
            viewpoint: Some(Viewpoint::Side),
            stage: SessionStage::TopCaptured,
            ..
        }
    ));

    session.segment(Viewpoint::Top).await.unwrap();
    let err = session.segment(Viewpoint::Side).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::StagePrecondition {
            request: RequestKind::Segmentation,
            viewpoint: Some(Viewpoint::Side),
            stage: SessionStage::TopSegmented,
            ..
        }
    ));
    assert!(matches!(
        session.finalize().await.unwrap_err(),
        PipelineError::StagePrecondition {
            request: RequestKind::Finalize,
            ..
        }
    ));
    assert_eq!(session.stage().await, SessionStage::TopSegmented);
}

#[tokio::test]
async fn late_completion_after_reset_changes_nothing() {
    let fixture = Fixture::new(StagedSegmenter::gated());
    let food = FoodBox::plate();
    fixture.stage(render(&food, Viewpoint::Top, 0.0, 1), Some("rice"), Some(0.9));
    let session = session(&fixture);

    session.capture(Viewpoint::Top).await.unwrap();
    let in_flight = {
        let session = session.clone();
        tokio::spawn(async move { session.segment(Viewpoint::Top).await })
    };
    fixture.segmenter.started.notified().await;
    assert_eq!(
        session.snapshot().await.top.pending,
        Some(RequestKind::Segmentation)
    );

    session.reset().await;
    fixture.segmenter.release();
    let outcome = in_flight.await.unwrap().unwrap();
    assert!(outcome.is_superseded());

    let reference = session_after_plain_reset(&fixture).await;
    assert_eq!(comparable(session.snapshot().await), comparable(reference));
    assert_eq!(session.stage().await, SessionStage::Idle);
}

async fn session_after_plain_reset(fixture: &Fixture) -> SessionSnapshot {
    let session = session(fixture);
    session.reset().await;
    session.snapshot().await
}

#[tokio::test]
async fn newer_segmentation_supersedes_older_one() {
    let fixture = Fixture::new(StagedSegmenter::gated());
    let food = FoodBox::plate();
    fixture.stage(render(&food, Viewpoint::Top, 0.0, 1), Some("rice"), Some(0.9));
    let session = session(&fixture);
    session.capture(Viewpoint::Top).await.unwrap();

    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.segment(Viewpoint::Top).await })
    };
    fixture.segmenter.started.notified().await;
    let second = {
        let session = session.clone();
        tokio::spawn(async move { session.segment(Viewpoint::Top).await })
    };
    fixture.segmenter.started.notified().await;

    assert!(first.await.unwrap().unwrap().is_superseded());
    fixture.segmenter.release();
    let report = second.await.unwrap().unwrap().applied().unwrap();
    assert_eq!(report.stage, SessionStage::TopSegmented);
}

#[tokio::test]
async fn collaborator_failure_keeps_earlier_artifacts() {
    let fixture = plate_fixture(Some("rice"), 0.0);
    let collaborators = Collaborators {
        segmenter: Arc::new(UnreachableSegmenter),
        ..fixture.collaborators()
    };
    let session = CaptureSession::new(collaborators, &PipelineConfig::default());

    session.capture(Viewpoint::Top).await.unwrap();
    let err = session.segment(Viewpoint::Top).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(
        err,
        PipelineError::CollaboratorUnavailable {
            request: RequestKind::Segmentation,
            viewpoint: Some(Viewpoint::Top),
            ..
        }
    ));

    assert_eq!(session.stage().await, SessionStage::TopCaptured);
    assert!(session.capture_artifact(Viewpoint::Top).await.is_some());
    assert_eq!(session.snapshot().await.top.pending, None);
}

#[tokio::test]
async fn stalled_collaborator_times_out() {
    let fixture = Fixture::new(StagedSegmenter::gated());
    let food = FoodBox::plate();
    fixture.stage(render(&food, Viewpoint::Top, 0.0, 1), None, None);
    let mut config = PipelineConfig::default();
    config.session.collaborator_timeout_ms = 50;
    let session = CaptureSession::new(fixture.collaborators(), &config);

    session.capture(Viewpoint::Top).await.unwrap();
    match session.segment(Viewpoint::Top).await {
        Err(PipelineError::CollaboratorUnavailable { message, .. }) => {
            assert!(message.contains("timed out"), "unexpected message: {message}");
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
    assert_eq!(session.stage().await, SessionStage::TopCaptured);
}

#[tokio::test]
async fn retake_after_volume_drops_estimates_only() {
    let fixture = plate_fixture(Some("rice"), 0.0);
    let session = session(&fixture);
    segment_both(&session).await;
    session.finalize().await.unwrap();
    assert_eq!(session.stage().await, SessionStage::NutritionComputed);

    session.capture(Viewpoint::Top).await.unwrap();
    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.stage, SessionStage::TopCaptured);
    assert!(snapshot.volume.is_none());
    assert!(snapshot.nutrition.is_none());
    assert!(!snapshot.top.segmented);
    assert!(snapshot.side.segmented);

    session.segment(Viewpoint::Top).await.unwrap();
    assert_eq!(session.stage().await, SessionStage::SideSegmented);
    assert!(session.finalize().await.unwrap().applied().is_some());
}

#[tokio::test]
async fn reset_is_idempotent() {
    let fixture = plate_fixture(Some("rice"), 0.0);
    let session = session(&fixture);
    segment_both(&session).await;

    session.reset().await;
    let once = session.snapshot().await;
    session.reset().await;
    let twice = session.snapshot().await;

    assert_ne!(once.attempt_id, twice.attempt_id);
    assert_eq!(comparable(once), comparable(twice));
    assert!(session.capture_artifact(Viewpoint::Side).await.is_none());
}

#[tokio::test]
async fn rerun_after_reset_reproduces_the_estimate() {
    let fixture = plate_fixture(Some("rice"), 0.3);
    let session = session(&fixture);

    segment_both(&session).await;
    let first = session.finalize().await.unwrap().applied().unwrap();
    session.reset().await;
    assert!(session.volume_estimate().await.is_none());

    segment_both(&session).await;
    let second = session.finalize().await.unwrap().applied().unwrap();
    assert_eq!(first.volume, second.volume);
    assert_eq!(first, second);
}

#[tokio::test]
async fn finalize_refuses_while_a_view_is_being_redone() {
    let fixture = Fixture::new(StagedSegmenter::gated());
    let food = FoodBox::plate();
    fixture.stage(render(&food, Viewpoint::Top, 0.0, 1), Some("rice"), Some(0.9));
    fixture.stage(render(&food, Viewpoint::Side, 0.0, 2), None, None);
    let session = session(&fixture);
    for viewpoint in Viewpoint::ALL {
        session.capture(viewpoint).await.unwrap();
        fixture.segmenter.release();
        session.segment(viewpoint).await.unwrap();
    }

    let resegment = {
        let session = session.clone();
        tokio::spawn(async move { session.segment(Viewpoint::Top).await })
    };
    while session.snapshot().await.top.pending != Some(RequestKind::Segmentation) {
        tokio::task::yield_now().await;
    }

    assert!(matches!(
        session.finalize().await,
        Err(PipelineError::StagePrecondition {
            request: RequestKind::Finalize,
            ..
        })
    ));
    assert!(session.volume_estimate().await.is_none());

    fixture.segmenter.release();
    resegment.await.unwrap().unwrap().applied().unwrap();
    assert_eq!(session.stage().await, SessionStage::SideSegmented);
    assert!(session.finalize().await.unwrap().applied().is_some());
    assert_eq!(session.stage().await, SessionStage::NutritionComputed);
}

#[tokio::test]
async fn unknown_class_keeps_volume_for_manual_entry() {
    let fixture = plate_fixture(Some("mystery stew"), 0.0);
    let session = session(&fixture);
    segment_both(&session).await;

    match session.finalize().await {
        Err(PipelineError::UnknownClass { class }) => {
            assert_eq!(class.as_deref(), Some("mystery stew"))
        }
        other => panic!("expected UnknownClass, got {other:?}"),
    }
    assert_eq!(session.stage().await, SessionStage::VolumeComputed);
    let volume = session.volume_estimate().await.unwrap();

    session.set_class_override(Some("Rice".into())).await;
    let estimate = session.finalize().await.unwrap().applied().unwrap();
    assert_relative_eq!(estimate.volume_ml, volume.volume_ml, epsilon = 1e-9);
    assert_eq!(estimate.nutrition.source_class, "Rice");
    assert_eq!(session.stage().await, SessionStage::NutritionComputed);
}

#[tokio::test]
async fn missing_class_asks_for_manual_entry() {
    let fixture = plate_fixture(None, 0.0);
    let session = session(&fixture);
    segment_both(&session).await;

    assert!(matches!(
        session.finalize().await,
        Err(PipelineError::UnknownClass { class: None })
    ));
    assert_eq!(session.stage().await, SessionStage::VolumeComputed);
}

#[tokio::test]
async fn sparse_side_depth_falls_back_with_lower_confidence() {
    let full = session(&plate_fixture(Some("rice"), 0.0));
    segment_both(&full).await;
    let full_estimate = full.finalize().await.unwrap().applied().unwrap();

    let sparse = session(&plate_fixture(Some("rice"), 0.9));
    sparse.capture(Viewpoint::Top).await.unwrap();
    sparse.segment(Viewpoint::Top).await.unwrap();
    sparse.capture(Viewpoint::Side).await.unwrap();
    let report = sparse.segment(Viewpoint::Side).await.unwrap().applied().unwrap();
    let shortfall = report.retake_advised.expect("side view should ask for a retake");
    assert_eq!(shortfall.viewpoint, Viewpoint::Side);
    assert!(shortfall.valid_sample_fraction < 0.3);
    assert_eq!(report.stage, SessionStage::SideSegmented);

    let fallback = sparse.finalize().await.unwrap().applied().unwrap();
    assert_eq!(fallback.volume.method, FusionMethod::SingleViewFallback);
    assert_eq!(fallback.volume.fallback_view, Some(Viewpoint::Top));
    assert!(fallback.confidence < full_estimate.confidence);
    assert!(fallback.volume_ml > 0.0);
}

#[tokio::test]
async fn both_views_sparse_is_insufficient() {
    let fixture = Fixture::new(StagedSegmenter::default());
    let food = FoodBox::plate();
    fixture.stage(render(&food, Viewpoint::Top, 0.9, 3), Some("rice"), Some(0.9));
    fixture.stage(render(&food, Viewpoint::Side, 0.9, 4), None, None);
    let session = session(&fixture);
    segment_both(&session).await;

    match session.finalize().await {
        Err(PipelineError::InsufficientData { shortfalls }) => {
            let views: Vec<_> = shortfalls.iter().map(|s| s.viewpoint).collect();
            assert_eq!(views, vec![Viewpoint::Top, Viewpoint::Side]);
        }
        other => panic!("expected InsufficientData, got {other:?}"),
    }
    assert_eq!(session.stage().await, SessionStage::SideSegmented);
}

#[tokio::test]
async fn observers_see_every_transition() {
    let fixture = plate_fixture(Some("rice"), 0.0);
    let session = session(&fixture);
    let mut updates = session.subscribe();

    session.capture(Viewpoint::Top).await.unwrap();
    assert!(updates.has_changed().unwrap());
    assert_eq!(updates.borrow_and_update().stage, SessionStage::TopCaptured);

    session.segment(Viewpoint::Top).await.unwrap();
    let snapshot = updates.borrow_and_update().clone();
    assert_eq!(snapshot.stage, SessionStage::TopSegmented);
    assert_eq!(snapshot.class_label.as_deref(), Some("rice"));
    assert!(snapshot.top.observation.is_some());
}

#[tokio::test]
async fn quick_classification_reads_current_capture() {
    let fixture = plate_fixture(Some("rice"), 0.0);
    let session = session(&fixture);

    assert!(matches!(
        session.classify(Viewpoint::Top).await,
        Err(PipelineError::StagePrecondition {
            request: RequestKind::Classification,
            ..
        })
    ));

    session.capture(Viewpoint::Top).await.unwrap();
    let classification = session
        .classify(Viewpoint::Top)
        .await
        .unwrap()
        .applied()
        .unwrap();
    assert_eq!(classification.predicted_class, "rice");
    assert!(classification.threshold_met);
    assert_eq!(session.stage().await, SessionStage::TopCaptured);
}
