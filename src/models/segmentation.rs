use chrono::{DateTime, Utc};
use image::GrayImage;

use crate::error::{PipelineError, PipelineResult};

use super::{CaptureArtifact, Viewpoint};

/// Food-region membership per RGB pixel, each value in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationMask {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl SegmentationMask {
    pub fn new(width: u32, height: u32, values: Vec<f32>) -> PipelineResult<Self> {
        let expected = width as usize * height as usize;
        if values.len() != expected {
            return Err(PipelineError::InvalidArtifact(format!(
                "mask {width}x{height} needs {expected} values, got {}",
                values.len()
            )));
        }
        if values.iter().any(|value| !(0.0..=1.0).contains(value)) {
            return Err(PipelineError::InvalidArtifact(
                "mask values must lie in [0, 1]".into(),
            ));
        }
        Ok(Self {
            width,
            height,
            values,
        })
    }

    pub fn from_booleans(width: u32, height: u32, members: &[bool]) -> PipelineResult<Self> {
        let values = members
            .iter()
            .map(|&member| if member { 1.0 } else { 0.0 })
            .collect();
        Self::new(width, height, values)
    }

    /// 8-bit greyscale mask, 255 = certainly food.
    pub fn from_luma(image: &GrayImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            values: image.pixels().map(|pixel| pixel.0[0] as f32 / 255.0).collect(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn value(&self, x: u32, y: u32) -> f32 {
        self.values[y as usize * self.width as usize + x as usize]
    }

    pub fn count_above(&self, threshold: f32) -> usize {
        self.values.iter().filter(|value| **value > threshold).count()
    }
}

/// What the segmentation collaborator returned for one capture.
#[derive(Debug, Clone)]
pub struct SegmentationArtifact {
    mask: SegmentationMask,
    predicted_class: Option<String>,
    confidence: Option<f64>,
    viewpoint: Viewpoint,
    source_captured_at: DateTime<Utc>,
}

impl SegmentationArtifact {
    /// Bind a mask to the capture it was produced from. The mask must be registered
    /// to the capture's RGB resolution.
    pub fn for_capture(
        capture: &CaptureArtifact,
        mask: SegmentationMask,
        predicted_class: Option<String>,
        confidence: Option<f64>,
    ) -> PipelineResult<Self> {
        if mask.dimensions() != capture.dimensions() {
            let (w, h) = capture.dimensions();
            return Err(PipelineError::InvalidArtifact(format!(
                "{} mask is {}x{} but its capture is {w}x{h}",
                capture.viewpoint(),
                mask.width(),
                mask.height()
            )));
        }
        if let Some(confidence) = confidence {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(PipelineError::InvalidArtifact(format!(
                    "classification confidence {confidence} outside [0, 1]"
                )));
            }
        }

        Ok(Self {
            mask,
            predicted_class: predicted_class.filter(|class| !class.trim().is_empty()),
            confidence,
            viewpoint: capture.viewpoint(),
            source_captured_at: capture.captured_at(),
        })
    }

    pub fn mask(&self) -> &SegmentationMask {
        &self.mask
    }

    pub fn predicted_class(&self) -> Option<&str> {
        self.predicted_class.as_deref()
    }

    pub fn confidence(&self) -> Option<f64> {
        self.confidence
    }

    pub fn viewpoint(&self) -> Viewpoint {
        self.viewpoint
    }

    pub fn source_captured_at(&self) -> DateTime<Utc> {
        self.source_captured_at
    }
}
