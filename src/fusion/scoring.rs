use crate::models::{MisregistrationWarning, PartialObservation};

use super::config::FusionConfig;

/// Weighted product of both views' valid-depth fractions.
pub fn two_view_confidence(
    top: &PartialObservation,
    side: &PartialObservation,
    config: &FusionConfig,
) -> f64 {
    let top_score = top.valid_sample_fraction.clamp(0.0, 1.0).powf(config.top_weight);
    let side_score = side.valid_sample_fraction.clamp(0.0, 1.0).powf(config.side_weight);
    top_score * side_score
}

/// Single usable view, discounted because one dimension is guessed.
pub fn single_view_confidence(
    observation: &PartialObservation,
    weight: f64,
    config: &FusionConfig,
) -> f64 {
    observation.valid_sample_fraction.clamp(0.0, 1.0).powf(weight) * config.single_view_penalty
}

/// Horizontal distance between the two views' centroids, ignoring the component
/// along the side camera's axis: the side view only sees the near face, so its
/// centroid sits in front of the true one along that axis.
pub fn centroid_offset(top: &PartialObservation, side: &PartialObservation) -> f64 {
    let mut delta = top.centroid - side.centroid;
    delta.z = 0.0;
    let axis = side.viewing_axis;
    let along_axis = axis * delta.dot(&axis);
    (delta - along_axis).norm()
}

pub fn check_registration(
    top: &PartialObservation,
    side: &PartialObservation,
    config: &FusionConfig,
) -> Option<MisregistrationWarning> {
    if top.valid_samples == 0 || side.valid_samples == 0 {
        return None;
    }
    let offset = centroid_offset(top, side);
    if offset > config.centroid_tolerance_m {
        Some(MisregistrationWarning {
            centroid_offset_m: offset,
            tolerance_m: config.centroid_tolerance_m,
        })
    } else {
        None
    }
}
