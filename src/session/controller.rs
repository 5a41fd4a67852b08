use std::{future::Future, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::{
    sync::{watch, Mutex},
    time,
};
use tokio_util::sync::CancellationToken;

use crate::{
    collaborators::{CaptureSource, NutritionLookup, QuickClassification, Segmenter},
    config::PipelineConfig,
    error::{CollaboratorError, CoverageShortfall, PipelineError, PipelineResult},
    fusion::VolumeFusionEngine,
    models::{
        CaptureArtifact, MealEstimate, NutritionEstimate, PartialObservation,
        SegmentationArtifact, Viewpoint, VolumeEstimate,
    },
    nutrition::project_nutrition,
    reconstruction::ViewReconstructor,
};

use super::state::{RequestKind, RequestTicket, SessionStage, SessionState};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// What became of an async request once it finished.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome<T> {
    Applied(T),
    /// A newer request for the same view, or a reset, made this one obsolete. The
    /// session was left untouched.
    Superseded,
}

impl<T> RequestOutcome<T> {
    pub fn applied(self) -> Option<T> {
        match self {
            RequestOutcome::Applied(value) => Some(value),
            RequestOutcome::Superseded => None,
        }
    }

    pub fn is_superseded(&self) -> bool {
        matches!(self, RequestOutcome::Superseded)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SegmentReport {
    pub stage: SessionStage,
    pub observation: PartialObservation,
    /// Set when the view's depth coverage is too sparse to trust; the UI should prompt
    /// a retake. Fusion can still fall back to the other view.
    pub retake_advised: Option<CoverageShortfall>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ViewSnapshot {
    pub captured_at: Option<DateTime<Utc>>,
    pub segmented: bool,
    pub predicted_class: Option<String>,
    pub confidence: Option<f64>,
    pub observation: Option<PartialObservation>,
    pub pending: Option<RequestKind>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub attempt_id: String,
    pub stage: SessionStage,
    pub top: ViewSnapshot,
    pub side: ViewSnapshot,
    pub class_label: Option<String>,
    pub volume: Option<VolumeEstimate>,
    pub nutrition: Option<NutritionEstimate>,
}

impl SessionSnapshot {
    fn of(state: &SessionState) -> Self {
        let view = |viewpoint: Viewpoint| {
            let slot = state.slot(viewpoint);
            ViewSnapshot {
                captured_at: slot.capture.as_ref().map(|capture| capture.captured_at()),
                segmented: slot.segmentation.is_some(),
                predicted_class: slot
                    .segmentation
                    .as_ref()
                    .and_then(|segmentation| segmentation.predicted_class())
                    .map(str::to_string),
                confidence: slot
                    .segmentation
                    .as_ref()
                    .and_then(|segmentation| segmentation.confidence()),
                observation: slot.observation.clone(),
                pending: slot.pending(),
            }
        };

        Self {
            attempt_id: state.attempt_id.clone(),
            stage: state.stage(),
            top: view(Viewpoint::Top),
            side: view(Viewpoint::Side),
            class_label: state.class_label().map(|(class, _)| class),
            volume: state.volume.clone(),
            nutrition: state.nutrition.clone(),
        }
    }
}

/// External services the session drives.
#[derive(Clone)]
pub struct Collaborators {
    pub capture: Arc<dyn CaptureSource>,
    pub segmenter: Arc<dyn Segmenter>,
    pub nutrition: Arc<dyn NutritionLookup>,
}

/// Owns the two-view workflow for one meal-logging flow.
///
/// Cloning shares the same session. One logical owner drives it; any number of
/// observers may read snapshots or [`subscribe`](Self::subscribe) to changes.
#[derive(Clone)]
pub struct CaptureSession {
    state: Arc<Mutex<SessionState>>,
    collaborators: Collaborators,
    reconstructor: ViewReconstructor,
    fusion: VolumeFusionEngine,
    request_timeout: Duration,
    updates: Arc<watch::Sender<SessionSnapshot>>,
}

impl CaptureSession {
    pub fn new(collaborators: Collaborators, config: &PipelineConfig) -> Self {
        let state = SessionState::new();
        let (updates, _) = watch::channel(SessionSnapshot::of(&state));

        Self {
            state: Arc::new(Mutex::new(state)),
            collaborators,
            reconstructor: ViewReconstructor::new(config.reconstruction.clone()),
            fusion: VolumeFusionEngine::new(config.fusion.clone()),
            request_timeout: Duration::from_millis(config.session.collaborator_timeout_ms),
            updates: Arc::new(updates),
        }
    }

    pub async fn stage(&self) -> SessionStage {
        self.state.lock().await.stage()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::of(&*self.state.lock().await)
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.updates.subscribe()
    }

    pub async fn observation(&self, viewpoint: Viewpoint) -> Option<PartialObservation> {
        self.state.lock().await.slot(viewpoint).observation.clone()
    }

    pub async fn capture_artifact(&self, viewpoint: Viewpoint) -> Option<Arc<CaptureArtifact>> {
        self.state.lock().await.slot(viewpoint).capture.clone()
    }

    pub async fn segmentation_artifact(
        &self,
        viewpoint: Viewpoint,
    ) -> Option<Arc<SegmentationArtifact>> {
        self.state.lock().await.slot(viewpoint).segmentation.clone()
    }

    pub async fn volume_estimate(&self) -> Option<VolumeEstimate> {
        self.state.lock().await.volume.clone()
    }

    /// Accept a capture produced outside the session, e.g. pushed by the camera
    /// layer. Cancels any in-flight request for the same view.
    pub async fn submit_capture(&self, capture: CaptureArtifact) -> PipelineResult<SessionStage> {
        let viewpoint = capture.viewpoint();
        let mut state = self.state.lock().await;
        state.ensure_can_capture(viewpoint)?;
        let (ticket, _token) = state.begin_request(RequestKind::Capture, viewpoint);
        state.apply_capture(&ticket, capture)?;

        log_info!("{} capture submitted for attempt {}", viewpoint, state.attempt_id);
        self.publish(&state);
        Ok(state.stage())
    }

    /// Ask the capture collaborator for a new capture of `viewpoint`.
    pub async fn capture(&self, viewpoint: Viewpoint) -> PipelineResult<RequestOutcome<SessionStage>> {
        let (ticket, token) = {
            let mut state = self.state.lock().await;
            state.ensure_can_capture(viewpoint)?;
            let request = state.begin_request(RequestKind::Capture, viewpoint);
            self.publish(&state);
            request
        };

        let source = Arc::clone(&self.collaborators.capture);
        let result = self
            .run_request(&token, async move { source.capture(viewpoint).await })
            .await;

        let capture = match self.settle(&ticket, result).await? {
            Some(capture) => capture,
            None => return Ok(RequestOutcome::Superseded),
        };

        if capture.viewpoint() != viewpoint {
            self.abandon(&ticket).await;
            return Err(PipelineError::InvalidArtifact(format!(
                "requested a {viewpoint} capture but received {}",
                capture.viewpoint()
            )));
        }

        let mut state = self.state.lock().await;
        if let Err(err) = state.apply_capture(&ticket, capture) {
            return self.discard(err);
        }
        log_info!("{} captured (generation {})", viewpoint, ticket.generation);
        self.publish(&state);
        Ok(RequestOutcome::Applied(state.stage()))
    }

    /// Segment the most recent capture of `viewpoint` and reconstruct its partial
    /// observation.
    pub async fn segment(&self, viewpoint: Viewpoint) -> PipelineResult<RequestOutcome<SegmentReport>> {
        let (ticket, token, capture) = {
            let mut state = self.state.lock().await;
            let capture = state.ensure_can_segment(viewpoint)?;
            let (ticket, token) = state.begin_request(RequestKind::Segmentation, viewpoint);
            self.publish(&state);
            (ticket, token, capture)
        };

        let segmenter = Arc::clone(&self.collaborators.segmenter);
        let source = Arc::clone(&capture);
        let result = self
            .run_request(&token, async move { segmenter.segment(&source).await })
            .await;

        let response = match self.settle(&ticket, result).await? {
            Some(response) => response,
            None => return Ok(RequestOutcome::Superseded),
        };

        let reconstructed = SegmentationArtifact::for_capture(
            &capture,
            response.mask,
            response.predicted_class,
            response.confidence,
        )
        .and_then(|segmentation| {
            let observation = self.reconstructor.observe(&capture, &segmentation)?;
            Ok((segmentation, observation))
        });
        let (segmentation, observation) = match reconstructed {
            Ok(pair) => pair,
            Err(err) => {
                self.abandon(&ticket).await;
                return Err(err);
            }
        };

        let retake_advised = self.reconstructor.shortfall(&observation);
        let mut state = self.state.lock().await;
        if let Err(err) = state.apply_segmentation(&ticket, segmentation, observation.clone()) {
            return self.discard(err);
        }

        match &retake_advised {
            Some(shortfall) => log_warn!("{}; retake advised", shortfall),
            None => log_info!(
                "{} segmented: footprint {:.5} m², height extent {:.4} m",
                viewpoint,
                observation.footprint_area,
                observation.height_profile.extent()
            ),
        }

        self.publish(&state);
        Ok(RequestOutcome::Applied(SegmentReport {
            stage: state.stage(),
            observation,
            retake_advised,
        }))
    }

    /// Quick-path dish classification of the current capture. Leaves the session
    /// untouched; pair with [`set_class_override`](Self::set_class_override) to use it.
    pub async fn classify(
        &self,
        viewpoint: Viewpoint,
    ) -> PipelineResult<RequestOutcome<QuickClassification>> {
        let capture = {
            let state = self.state.lock().await;
            state.slot(viewpoint).capture.clone().ok_or_else(|| {
                PipelineError::StagePrecondition {
                    request: RequestKind::Classification,
                    viewpoint: Some(viewpoint),
                    stage: state.stage(),
                    requires: "a completed capture for this view",
                }
            })?
        };

        let segmenter = Arc::clone(&self.collaborators.segmenter);
        let source = Arc::clone(&capture);
        let token = CancellationToken::new();
        let result = self
            .run_request(&token, async move { segmenter.classify(&source).await })
            .await;

        let still_current = {
            let state = self.state.lock().await;
            state
                .slot(viewpoint)
                .capture
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, &capture))
        };
        if !still_current {
            log_debug!("dropping classification for replaced {} capture", viewpoint);
            return Ok(RequestOutcome::Superseded);
        }

        match result {
            Some(Ok(classification)) => Ok(RequestOutcome::Applied(classification)),
            Some(Err(err)) => Err(err.into_pipeline(RequestKind::Classification, Some(viewpoint))),
            None => Ok(RequestOutcome::Superseded),
        }
    }

    /// Manually pick the food class, e.g. after a low-confidence classification.
    /// Invalidates any computed nutrition.
    pub async fn set_class_override(&self, class: Option<String>) {
        let mut state = self.state.lock().await;
        state.class_override = class.filter(|class| !class.trim().is_empty());
        state.nutrition = None;
        self.publish(&state);
    }

    /// Fuse both views and project the volume to nutrition.
    ///
    /// On `UnknownClass` the volume estimate is kept (stage `VOLUME_COMPUTED`) so the
    /// caller can fall back to manual entry.
    pub async fn finalize(&self) -> PipelineResult<RequestOutcome<MealEstimate>> {
        let (ticket, token, top, side, label) = {
            let mut state = self.state.lock().await;
            let (top, side) = state.ensure_can_finalize()?;
            let label = state.class_label();
            let (ticket, token) = state.begin_finalize();
            (ticket, token, top, side, label)
        };

        let class = label.as_ref().map(|(class, _)| class.as_str());
        let volume = self.fusion.fuse(&top, &side, class)?;

        {
            let mut state = self.state.lock().await;
            if !state.apply_volume(&ticket, volume.clone()) {
                log_debug!("volume for a superseded finalize dropped");
                return Ok(RequestOutcome::Superseded);
            }
            log_info!(
                "volume {:.1} mL ({:?}, confidence {:.2})",
                volume.volume_ml,
                volume.method,
                volume.confidence
            );
            self.publish(&state);
        }

        let Some((class, class_confidence)) = label else {
            log_warn!("no food class available, manual entry required");
            return Err(PipelineError::UnknownClass { class: None });
        };

        let lookup = Arc::clone(&self.collaborators.nutrition);
        let lookup_class = class.clone();
        let profile = match self
            .run_request(&token, async move { lookup.lookup(&lookup_class).await })
            .await
        {
            None => return Ok(RequestOutcome::Superseded),
            Some(Ok(profile)) => profile,
            Some(Err(err)) => {
                if !self.state.lock().await.is_finalize_current(&ticket) {
                    return Ok(RequestOutcome::Superseded);
                }
                return Err(err.into_pipeline(RequestKind::NutritionLookup, None));
            }
        };

        let nutrition = project_nutrition(&volume, Some(&class), class_confidence, profile.as_ref());
        let nutrition = match nutrition {
            Ok(nutrition) => nutrition,
            Err(err) => {
                log_warn!("{}", err);
                return Err(err);
            }
        };

        let mut state = self.state.lock().await;
        if !state.apply_nutrition(&ticket, nutrition.clone()) {
            log_debug!("nutrition for a superseded finalize dropped");
            return Ok(RequestOutcome::Superseded);
        }
        log_info!(
            "{} g of {} ≈ {:.0} kcal",
            nutrition.mass_grams.round(),
            class,
            nutrition.calories
        );
        self.publish(&state);
        Ok(RequestOutcome::Applied(MealEstimate::new(volume, nutrition)))
    }

    /// Drop every artifact and start a new attempt. Requests still in flight are
    /// cancelled and their completions become no-ops.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        let previous = state.attempt_id.clone();
        state.reset();
        log_info!("session {} reset, new attempt {}", previous, state.attempt_id);
        self.publish(&state);
    }

    async fn run_request<T, F>(
        &self,
        token: &CancellationToken,
        request: F,
    ) -> Option<Result<T, CollaboratorError>>
    where
        F: Future<Output = Result<T, CollaboratorError>>,
    {
        let timeout_ms = self.request_timeout.as_millis() as u64;
        tokio::select! {
            _ = token.cancelled() => None,
            result = time::timeout(self.request_timeout, request) => Some(
                result.unwrap_or(Err(CollaboratorError::Timeout(timeout_ms)))
            ),
        }
    }

    /// Resolve a finished collaborator call: `Ok(None)` when the request was
    /// superseded, an error tied to the stage when the collaborator failed.
    async fn settle<T>(
        &self,
        ticket: &RequestTicket,
        result: Option<Result<T, CollaboratorError>>,
    ) -> PipelineResult<Option<T>> {
        match result {
            None => {
                log_debug!(
                    "{} request for {} view cancelled (generation {})",
                    ticket.kind,
                    ticket.viewpoint,
                    ticket.generation
                );
                Ok(None)
            }
            Some(Ok(value)) => Ok(Some(value)),
            Some(Err(err)) => {
                let mut state = self.state.lock().await;
                if let Err(stale) = state.finish_request(ticket) {
                    log_debug!("{}", stale);
                    return Ok(None);
                }
                log_warn!("{} for {} view failed: {}", ticket.kind, ticket.viewpoint, err);
                self.publish(&state);
                Err(err.into_pipeline(ticket.kind, Some(ticket.viewpoint)))
            }
        }
    }

    async fn abandon(&self, ticket: &RequestTicket) {
        let mut state = self.state.lock().await;
        if state.finish_request(ticket).is_ok() {
            self.publish(&state);
        }
    }

    fn discard<T>(&self, err: PipelineError) -> PipelineResult<RequestOutcome<T>> {
        match err {
            PipelineError::StaleResultDiscarded { .. } => {
                log_debug!("{}", err);
                Ok(RequestOutcome::Superseded)
            }
            other => Err(other),
        }
    }

    fn publish(&self, state: &SessionState) {
        self.updates.send_replace(SessionSnapshot::of(state));
    }
}
