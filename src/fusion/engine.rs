use log::{debug, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::models::{FusionMethod, PartialObservation, Viewpoint, VolumeEstimate};
use crate::reconstruction::reconstructor::coverage_shortfall;

use super::config::FusionConfig;
use super::scoring::{check_registration, single_view_confidence, two_view_confidence};

const CUBIC_METRES_TO_ML: f64 = 1_000_000.0;

/// Combines the top and side observations into one volume estimate.
///
/// The top view fixes the footprint and the side view fixes the height; each view
/// is weak along its own viewing axis, so they are treated as complementary
/// measurements of one object. The footprint × height prism is scaled by a fill
/// factor since food rarely fills its bounding prism.
#[derive(Debug, Clone, Default)]
pub struct VolumeFusionEngine {
    config: FusionConfig,
}

impl VolumeFusionEngine {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn fuse(
        &self,
        top: &PartialObservation,
        side: &PartialObservation,
        class: Option<&str>,
    ) -> PipelineResult<VolumeEstimate> {
        expect_view(top, Viewpoint::Top)?;
        expect_view(side, Viewpoint::Side)?;

        let top_shortfall = coverage_shortfall(top, self.config.min_valid_fraction);
        let side_shortfall = coverage_shortfall(side, self.config.min_valid_fraction);

        let estimate = match (top_shortfall, side_shortfall) {
            (None, None) => self.fuse_two_views(top, side, class),
            (None, Some(_)) => self.fallback_from_top(top, class),
            (Some(_), None) => self.fallback_from_side(side, class),
            (Some(top_shortfall), Some(side_shortfall)) => {
                return Err(PipelineError::InsufficientData {
                    shortfalls: vec![top_shortfall, side_shortfall],
                });
            }
        };

        debug!(
            "fused {:?}: {:.1} mL (footprint {:.5} m², height {:.4} m, fill {:.2}), confidence {:.3}",
            estimate.method,
            estimate.volume_ml,
            estimate.footprint_area_m2,
            estimate.effective_height_m,
            estimate.fill_factor,
            estimate.confidence
        );

        Ok(estimate)
    }

    fn fuse_two_views(
        &self,
        top: &PartialObservation,
        side: &PartialObservation,
        class: Option<&str>,
    ) -> VolumeEstimate {
        let fill_factor = self.config.fill_factor_for(class);
        let footprint = top.footprint_area;
        let height = side.height_profile.extent();

        let mut confidence = two_view_confidence(top, side, &self.config);
        let misregistration = check_registration(top, side, &self.config);
        if let Some(warning) = &misregistration {
            warn!(
                "views disagree by {:.3} m (tolerance {:.3} m), lowering confidence",
                warning.centroid_offset_m, warning.tolerance_m
            );
            confidence *= self.config.misregistration_penalty;
        }

        VolumeEstimate {
            volume_ml: footprint * height * fill_factor * CUBIC_METRES_TO_ML,
            confidence: confidence.clamp(0.0, 1.0),
            method: FusionMethod::TwoViewFusion,
            footprint_area_m2: footprint,
            effective_height_m: height,
            fill_factor,
            fallback_view: None,
            misregistration,
        }
    }

    /// Height guessed from the footprint width and the class's aspect ratio.
    fn fallback_from_top(&self, top: &PartialObservation, class: Option<&str>) -> VolumeEstimate {
        let fill_factor = self.config.fill_factor_for(class);
        let shape = self.config.fallback_shape_for(class);
        let footprint = top.footprint_area;
        let height = footprint.sqrt() * shape.height_to_width;
        let confidence = single_view_confidence(top, self.config.top_weight, &self.config);

        VolumeEstimate {
            volume_ml: footprint * height * fill_factor * CUBIC_METRES_TO_ML,
            confidence: confidence.clamp(0.0, 1.0),
            method: FusionMethod::SingleViewFallback,
            footprint_area_m2: footprint,
            effective_height_m: height,
            fill_factor,
            fallback_view: Some(Viewpoint::Top),
            misregistration: None,
        }
    }

    /// Footprint guessed from the silhouette width and the class's depth ratio.
    fn fallback_from_side(&self, side: &PartialObservation, class: Option<&str>) -> VolumeEstimate {
        let fill_factor = self.config.fill_factor_for(class);
        let shape = self.config.fallback_shape_for(class);
        let height = side.height_profile.extent();
        let width = if height > 0.0 {
            side.footprint_area / height
        } else {
            0.0
        };
        let footprint = width * width * shape.depth_to_width;
        let confidence = single_view_confidence(side, self.config.side_weight, &self.config);

        VolumeEstimate {
            volume_ml: footprint * height * fill_factor * CUBIC_METRES_TO_ML,
            confidence: confidence.clamp(0.0, 1.0),
            method: FusionMethod::SingleViewFallback,
            footprint_area_m2: footprint,
            effective_height_m: height,
            fill_factor,
            fallback_view: Some(Viewpoint::Side),
            misregistration: None,
        }
    }
}

fn expect_view(observation: &PartialObservation, expected: Viewpoint) -> PipelineResult<()> {
    if observation.viewpoint == expected {
        Ok(())
    } else {
        Err(PipelineError::InvalidArtifact(format!(
            "expected a {expected} observation, got {}",
            observation.viewpoint
        )))
    }
}
