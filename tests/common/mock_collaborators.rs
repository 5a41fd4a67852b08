use std::{collections::HashMap, sync::Arc, sync::Mutex};

use async_trait::async_trait;
use mealscan_lib::collaborators::{
    CaptureSource, QuickClassification, SegmentationResponse, Segmenter,
};
use mealscan_lib::error::CollaboratorError;
use mealscan_lib::models::{CaptureArtifact, SegmentationMask, Viewpoint};
use mealscan_lib::nutrition::NutritionTable;
use mealscan_lib::Collaborators;
use tokio::sync::Notify;

use super::synthetic_scene::RenderedView;

/// Hands out whichever capture the test last staged for a viewpoint.
#[derive(Default)]
pub struct StagedCaptureSource {
    captures: Mutex<HashMap<Viewpoint, CaptureArtifact>>,
}

impl StagedCaptureSource {
    pub fn stage(&self, capture: CaptureArtifact) {
        self.captures
            .lock()
            .unwrap()
            .insert(capture.viewpoint(), capture);
    }
}

#[async_trait]
impl CaptureSource for StagedCaptureSource {
    async fn capture(&self, viewpoint: Viewpoint) -> Result<CaptureArtifact, CollaboratorError> {
        self.captures
            .lock()
            .unwrap()
            .get(&viewpoint)
            .cloned()
            .ok_or_else(|| CollaboratorError::Unreachable(format!("no {viewpoint} capture staged")))
    }
}

/// Answers with staged masks. With a gate installed, each `segment` call parks until
/// the test calls [`release`](Self::release).
#[derive(Default)]
pub struct StagedSegmenter {
    responses: Mutex<HashMap<Viewpoint, SegmentationResponse>>,
    gate: Option<Arc<Notify>>,
    pub started: Arc<Notify>,
}

impl StagedSegmenter {
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Notify::new())),
            ..Self::default()
        }
    }

    pub fn stage(
        &self,
        viewpoint: Viewpoint,
        mask: SegmentationMask,
        class: Option<&str>,
        confidence: Option<f64>,
    ) {
        self.responses.lock().unwrap().insert(
            viewpoint,
            SegmentationResponse {
                predicted_class: class.map(str::to_string),
                confidence,
                mask,
            },
        );
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }
}

#[async_trait]
impl Segmenter for StagedSegmenter {
    async fn segment(
        &self,
        capture: &CaptureArtifact,
    ) -> Result<SegmentationResponse, CollaboratorError> {
        self.started.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.responses
            .lock()
            .unwrap()
            .get(&capture.viewpoint())
            .cloned()
            .ok_or_else(|| CollaboratorError::Malformed("no mask staged".into()))
    }

    async fn classify(
        &self,
        capture: &CaptureArtifact,
    ) -> Result<QuickClassification, CollaboratorError> {
        let responses = self.responses.lock().unwrap();
        let response = responses
            .get(&capture.viewpoint())
            .ok_or_else(|| CollaboratorError::Malformed("no label staged".into()))?;
        let confidence = response.confidence.unwrap_or(0.0);
        Ok(QuickClassification {
            predicted_class: response.predicted_class.clone().unwrap_or_default(),
            confidence_percentage: confidence * 100.0,
            threshold_met: confidence >= 0.5,
            message: None,
        })
    }
}

/// Segmentation service that is always down.
pub struct UnreachableSegmenter;

#[async_trait]
impl Segmenter for UnreachableSegmenter {
    async fn segment(
        &self,
        _capture: &CaptureArtifact,
    ) -> Result<SegmentationResponse, CollaboratorError> {
        Err(CollaboratorError::Unreachable("connection refused".into()))
    }

    async fn classify(
        &self,
        _capture: &CaptureArtifact,
    ) -> Result<QuickClassification, CollaboratorError> {
        Err(CollaboratorError::Unreachable("connection refused".into()))
    }
}

/// Test fixture bundling the staged collaborators with the builtin nutrition table.
pub struct Fixture {
    pub captures: Arc<StagedCaptureSource>,
    pub segmenter: Arc<StagedSegmenter>,
}

impl Fixture {
    pub fn new(segmenter: StagedSegmenter) -> Self {
        Self {
            captures: Arc::new(StagedCaptureSource::default()),
            segmenter: Arc::new(segmenter),
        }
    }

    /// Stage a rendered view for both the camera and the segmenter.
    pub fn stage(&self, view: RenderedView, class: Option<&str>, confidence: Option<f64>) {
        let viewpoint = view.capture.viewpoint();
        self.segmenter.stage(viewpoint, view.mask, class, confidence);
        self.captures.stage(view.capture);
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            capture: self.captures.clone(),
            segmenter: self.segmenter.clone(),
            nutrition: Arc::new(NutritionTable::builtin()),
        }
    }
}
