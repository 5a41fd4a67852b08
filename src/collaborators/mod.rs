//! Seams to the external collaborators: the capture driver, the segmentation and
//! classification model, and the nutrition lookup service.

pub mod files;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;
use crate::models::{CaptureArtifact, NutritionProfile, SegmentationMask, Viewpoint};

pub use files::{load_capture_bundle, BundleDirs, FileCaptureSource, MaskFileSegmenter};

/// Produces one capture per viewpoint on user action.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    async fn capture(&self, viewpoint: Viewpoint) -> Result<CaptureArtifact, CollaboratorError>;
}

#[derive(Debug, Clone)]
pub struct SegmentationResponse {
    pub predicted_class: Option<String>,
    pub confidence: Option<f64>,
    pub mask: SegmentationMask,
}

/// Quick-path classification without a mask.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuickClassification {
    pub predicted_class: String,
    pub confidence_percentage: f64,
    pub threshold_met: bool,
    pub message: Option<String>,
}

#[async_trait]
pub trait Segmenter: Send + Sync {
    async fn segment(
        &self,
        capture: &CaptureArtifact,
    ) -> Result<SegmentationResponse, CollaboratorError>;

    async fn classify(
        &self,
        capture: &CaptureArtifact,
    ) -> Result<QuickClassification, CollaboratorError>;
}

/// Maps a food class to density and per-gram macros. `Ok(None)` means the class is
/// unknown to the service.
#[async_trait]
pub trait NutritionLookup: Send + Sync {
    async fn lookup(&self, class: &str) -> Result<Option<NutritionProfile>, CollaboratorError>;
}
