use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::models::{
    CaptureArtifact, NutritionEstimate, PartialObservation, SegmentationArtifact, Viewpoint,
    VolumeEstimate,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionStage {
    Idle,
    TopCaptured,
    TopSegmented,
    SideCaptured,
    SideSegmented,
    VolumeComputed,
    NutritionComputed,
}

impl Default for SessionStage {
    fn default() -> Self {
        SessionStage::Idle
    }
}

impl SessionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStage::Idle => "IDLE",
            SessionStage::TopCaptured => "TOP_CAPTURED",
            SessionStage::TopSegmented => "TOP_SEGMENTED",
            SessionStage::SideCaptured => "SIDE_CAPTURED",
            SessionStage::SideSegmented => "SIDE_SEGMENTED",
            SessionStage::VolumeComputed => "VOLUME_COMPUTED",
            SessionStage::NutritionComputed => "NUTRITION_COMPUTED",
        }
    }
}

impl fmt::Display for SessionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RequestKind {
    Capture,
    Segmentation,
    Classification,
    Finalize,
    NutritionLookup,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RequestKind::Capture => "capture",
            RequestKind::Segmentation => "segmentation",
            RequestKind::Classification => "classification",
            RequestKind::Finalize => "finalize",
            RequestKind::NutritionLookup => "nutrition lookup",
        })
    }
}

/// Identifies one in-flight request; a completion only applies while its generation
/// is still the viewpoint's current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTicket {
    pub kind: RequestKind,
    pub viewpoint: Viewpoint,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalizeTicket {
    pub top_generation: u64,
    pub side_generation: u64,
    pub finalize_generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewProgress {
    Empty,
    Captured,
    Segmented,
}

#[derive(Debug, Default)]
pub struct ViewSlot {
    pub capture: Option<Arc<CaptureArtifact>>,
    pub segmentation: Option<Arc<SegmentationArtifact>>,
    pub observation: Option<PartialObservation>,
    pub generation: u64,
    pending: Option<RequestKind>,
    in_flight: Option<CancellationToken>,
}

impl ViewSlot {
    pub fn progress(&self) -> ViewProgress {
        match (&self.capture, &self.segmentation) {
            (None, _) => ViewProgress::Empty,
            (Some(_), None) => ViewProgress::Captured,
            (Some(_), Some(_)) => ViewProgress::Segmented,
        }
    }

    pub fn pending(&self) -> Option<RequestKind> {
        self.pending
    }

    fn cancel_in_flight(&mut self) {
        if let Some(token) = self.in_flight.take() {
            token.cancel();
        }
        self.pending = None;
    }
}

/// The capture session aggregate. Every artifact for one meal-logging attempt lives
/// here and nowhere else; [`SessionState::reset`] drops them all.
#[derive(Debug)]
pub struct SessionState {
    pub attempt_id: String,
    pub started_at: DateTime<Utc>,
    top: ViewSlot,
    side: ViewSlot,
    pub volume: Option<VolumeEstimate>,
    pub nutrition: Option<NutritionEstimate>,
    pub class_override: Option<String>,
    finalize_generation: u64,
    finalize_in_flight: Option<CancellationToken>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            attempt_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            top: ViewSlot::default(),
            side: ViewSlot::default(),
            volume: None,
            nutrition: None,
            class_override: None,
            finalize_generation: 0,
            finalize_in_flight: None,
        }
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> SessionStage {
        if self.nutrition.is_some() {
            return SessionStage::NutritionComputed;
        }
        if self.volume.is_some() {
            return SessionStage::VolumeComputed;
        }
        match (self.top.progress(), self.side.progress()) {
            (ViewProgress::Empty, _) => SessionStage::Idle,
            (ViewProgress::Captured, _) => SessionStage::TopCaptured,
            (ViewProgress::Segmented, ViewProgress::Empty) => SessionStage::TopSegmented,
            (ViewProgress::Segmented, ViewProgress::Captured) => SessionStage::SideCaptured,
            (ViewProgress::Segmented, ViewProgress::Segmented) => SessionStage::SideSegmented,
        }
    }

    pub fn slot(&self, viewpoint: Viewpoint) -> &ViewSlot {
        match viewpoint {
            Viewpoint::Top => &self.top,
            Viewpoint::Side => &self.side,
        }
    }

    fn slot_mut(&mut self, viewpoint: Viewpoint) -> &mut ViewSlot {
        match viewpoint {
            Viewpoint::Top => &mut self.top,
            Viewpoint::Side => &mut self.side,
        }
    }

    pub fn ensure_can_capture(&self, viewpoint: Viewpoint) -> PipelineResult<()> {
        if viewpoint == Viewpoint::Side && self.top.progress() != ViewProgress::Segmented {
            return Err(self.precondition(
                RequestKind::Capture,
                Some(viewpoint),
                "the top view to be segmented",
            ));
        }
        Ok(())
    }

    pub fn ensure_can_segment(&self, viewpoint: Viewpoint) -> PipelineResult<Arc<CaptureArtifact>> {
        let slot = self.slot(viewpoint);
        if slot.pending == Some(RequestKind::Capture) {
            return Err(self.precondition(
                RequestKind::Segmentation,
                Some(viewpoint),
                "the in-flight capture to complete",
            ));
        }
        slot.capture.clone().ok_or_else(|| {
            self.precondition(
                RequestKind::Segmentation,
                Some(viewpoint),
                "a completed capture for this view",
            )
        })
    }

    pub fn ensure_can_finalize(
        &self,
    ) -> PipelineResult<(PartialObservation, PartialObservation)> {
        if self.top.pending.is_some() || self.side.pending.is_some() {
            return Err(self.precondition(
                RequestKind::Finalize,
                None,
                "no capture or segmentation in flight",
            ));
        }
        match (&self.top.observation, &self.side.observation) {
            (Some(top), Some(side))
                if self.top.progress() == ViewProgress::Segmented
                    && self.side.progress() == ViewProgress::Segmented =>
            {
                Ok((top.clone(), side.clone()))
            }
            _ => Err(self.precondition(
                RequestKind::Finalize,
                None,
                "both views to be segmented",
            )),
        }
    }

    fn precondition(
        &self,
        request: RequestKind,
        viewpoint: Option<Viewpoint>,
        requires: &'static str,
    ) -> PipelineError {
        PipelineError::StagePrecondition {
            request,
            viewpoint,
            stage: self.stage(),
            requires,
        }
    }

    /// Start a request for `viewpoint`, cancelling whatever was in flight for it.
    pub fn begin_request(
        &mut self,
        kind: RequestKind,
        viewpoint: Viewpoint,
    ) -> (RequestTicket, CancellationToken) {
        let slot = self.slot_mut(viewpoint);
        slot.cancel_in_flight();
        slot.generation += 1;
        let token = CancellationToken::new();
        slot.in_flight = Some(token.clone());
        slot.pending = Some(kind);
        (
            RequestTicket {
                kind,
                viewpoint,
                generation: slot.generation,
            },
            token,
        )
    }

    pub fn begin_finalize(&mut self) -> (FinalizeTicket, CancellationToken) {
        if let Some(token) = self.finalize_in_flight.take() {
            token.cancel();
        }
        self.finalize_generation += 1;
        let token = CancellationToken::new();
        self.finalize_in_flight = Some(token.clone());
        (
            FinalizeTicket {
                top_generation: self.top.generation,
                side_generation: self.side.generation,
                finalize_generation: self.finalize_generation,
            },
            token,
        )
    }

    pub fn is_current(&self, ticket: &RequestTicket) -> bool {
        self.slot(ticket.viewpoint).generation == ticket.generation
    }

    pub fn is_finalize_current(&self, ticket: &FinalizeTicket) -> bool {
        self.top.generation == ticket.top_generation
            && self.side.generation == ticket.side_generation
            && self.finalize_generation == ticket.finalize_generation
    }

    fn check_current(&self, ticket: &RequestTicket) -> PipelineResult<()> {
        if self.is_current(ticket) {
            Ok(())
        } else {
            Err(PipelineError::StaleResultDiscarded {
                request: ticket.kind,
                viewpoint: ticket.viewpoint,
                generation: ticket.generation,
            })
        }
    }

    /// Close out a request that failed without producing data. Earlier artifacts stay.
    pub fn finish_request(&mut self, ticket: &RequestTicket) -> PipelineResult<()> {
        self.check_current(ticket)?;
        let slot = self.slot_mut(ticket.viewpoint);
        slot.in_flight = None;
        slot.pending = None;
        Ok(())
    }

    /// Store a fresh capture for its viewpoint, dropping that view's downstream
    /// artifacts and any computed estimates.
    pub fn store_capture(&mut self, capture: CaptureArtifact) {
        let slot = self.slot_mut(capture.viewpoint());
        slot.capture = Some(Arc::new(capture));
        slot.segmentation = None;
        slot.observation = None;
        self.invalidate_estimates();
    }

    pub fn apply_capture(
        &mut self,
        ticket: &RequestTicket,
        capture: CaptureArtifact,
    ) -> PipelineResult<()> {
        self.finish_request(ticket)?;
        self.store_capture(capture);
        Ok(())
    }

    pub fn apply_segmentation(
        &mut self,
        ticket: &RequestTicket,
        segmentation: SegmentationArtifact,
        observation: PartialObservation,
    ) -> PipelineResult<()> {
        self.finish_request(ticket)?;
        let slot = self.slot_mut(ticket.viewpoint);
        slot.segmentation = Some(Arc::new(segmentation));
        slot.observation = Some(observation);
        self.invalidate_estimates();
        Ok(())
    }

    pub fn apply_volume(
        &mut self,
        ticket: &FinalizeTicket,
        volume: VolumeEstimate,
    ) -> bool {
        if !self.is_finalize_current(ticket) {
            return false;
        }
        self.volume = Some(volume);
        self.nutrition = None;
        true
    }

    pub fn apply_nutrition(
        &mut self,
        ticket: &FinalizeTicket,
        nutrition: NutritionEstimate,
    ) -> bool {
        if !self.is_finalize_current(ticket) || self.volume.is_none() {
            return false;
        }
        self.nutrition = Some(nutrition);
        self.finalize_in_flight = None;
        true
    }

    pub fn invalidate_estimates(&mut self) {
        self.volume = None;
        self.nutrition = None;
    }

    /// Class used for density lookup: a manual override wins, otherwise the more
    /// confident of the two views' predictions (top on ties).
    pub fn class_label(&self) -> Option<(String, Option<f64>)> {
        if let Some(class) = &self.class_override {
            return Some((class.clone(), None));
        }

        let candidates = [&self.top, &self.side].into_iter().filter_map(|slot| {
            let segmentation = slot.segmentation.as_ref()?;
            let class = segmentation.predicted_class()?;
            Some((class.to_string(), segmentation.confidence()))
        });

        let mut best: Option<(String, Option<f64>)> = None;
        for (class, confidence) in candidates {
            let better = match &best {
                None => true,
                Some((_, best_confidence)) => {
                    confidence.unwrap_or(0.0) > best_confidence.unwrap_or(0.0)
                }
            };
            if better {
                best = Some((class, confidence));
            }
        }
        best
    }

    /// Discard every artifact and estimate and start a new attempt. Generations keep
    /// counting up so completions issued before the reset can never match again.
    pub fn reset(&mut self) {
        self.top.cancel_in_flight();
        self.side.cancel_in_flight();
        if let Some(token) = self.finalize_in_flight.take() {
            token.cancel();
        }

        let top_generation = self.top.generation + 1;
        let side_generation = self.side.generation + 1;
        let finalize_generation = self.finalize_generation + 1;

        *self = Self::default();
        self.top.generation = top_generation;
        self.side.generation = side_generation;
        self.finalize_generation = finalize_generation;
    }
}
