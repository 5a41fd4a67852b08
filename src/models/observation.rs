use nalgebra::{Point3, Vector3};
use serde::Serialize;

use super::Viewpoint;

/// Spread of a view's masked points along the world up axis, in metres.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HeightProfile {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub samples: usize,
}

impl HeightProfile {
    pub const EMPTY: HeightProfile = HeightProfile {
        min: 0.0,
        max: 0.0,
        mean: 0.0,
        samples: 0,
    };

    pub fn from_heights(heights: impl IntoIterator<Item = f64>) -> Self {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        let mut samples = 0usize;
        for height in heights {
            min = min.min(height);
            max = max.max(height);
            sum += height;
            samples += 1;
        }
        if samples == 0 {
            return Self::EMPTY;
        }
        Self {
            min,
            max,
            mean: sum / samples as f64,
            samples,
        }
    }

    pub fn extent(&self) -> f64 {
        (self.max - self.min).max(0.0)
    }
}

/// Geometric summary of one viewpoint, derived from its capture and mask.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PartialObservation {
    pub viewpoint: Viewpoint,
    /// Convex projected area of the masked region, m².
    pub footprint_area: f64,
    pub height_profile: HeightProfile,
    pub valid_sample_fraction: f64,
    pub masked_pixels: usize,
    pub valid_samples: usize,
    /// Mean world position of the valid masked points.
    pub centroid: Point3<f64>,
    /// Unit primary axis for this viewpoint, world frame.
    pub viewing_axis: Vector3<f64>,
}

impl PartialObservation {
    pub fn is_empty(&self) -> bool {
        self.masked_pixels == 0
    }
}
