use log::debug;
use nalgebra::{Point3, Vector3};

use crate::error::{CoverageShortfall, PipelineError, PipelineResult};
use crate::models::{
    CaptureArtifact, HeightProfile, PartialObservation, Pose, SegmentationArtifact, Viewpoint,
};

use super::config::ReconstructionConfig;
use super::hull::convex_hull_area;

const PIXEL_CORNERS: [(f64, f64); 4] = [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)];

/// Turns one viewpoint's capture and mask into a [`PartialObservation`].
#[derive(Debug, Clone, Default)]
pub struct ViewReconstructor {
    config: ReconstructionConfig,
}

impl ViewReconstructor {
    pub fn new(config: ReconstructionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReconstructionConfig {
        &self.config
    }

    /// Observation for the pair, failing with `InsufficientData` when too few masked
    /// pixels carry valid depth.
    pub fn reconstruct(
        &self,
        capture: &CaptureArtifact,
        segmentation: &SegmentationArtifact,
    ) -> PipelineResult<PartialObservation> {
        let observation = self.observe(capture, segmentation)?;
        self.check_coverage(&observation)?;
        Ok(observation)
    }

    /// Observation for the pair without the coverage gate.
    pub fn observe(
        &self,
        capture: &CaptureArtifact,
        segmentation: &SegmentationArtifact,
    ) -> PipelineResult<PartialObservation> {
        ensure_matching(capture, segmentation)?;

        let viewpoint = capture.viewpoint();
        let pose = capture.pose();
        let intrinsics = capture.intrinsics();
        let mask = segmentation.mask();
        let viewing_axis = primary_axis(viewpoint, pose);

        // Step 1: back-project every masked pixel that has a depth sample. The pixel's
        // four corners at the same depth bound the surface patch it covers.
        let (width, height) = capture.dimensions();
        let mut masked_pixels = 0usize;
        let mut points: Vec<Point3<f64>> = Vec::new();
        let mut corners: Vec<Point3<f64>> = Vec::new();
        for v in 0..height {
            for u in 0..width {
                if mask.value(u, v) <= self.config.mask_threshold {
                    continue;
                }
                masked_pixels += 1;
                if let Some(depth) = capture.depth_at(u, v) {
                    let (u, v, depth) = (u as f64, v as f64, depth as f64);
                    points.push(pose.camera_to_world(&intrinsics.unproject(u, v, depth)));
                    for (du, dv) in PIXEL_CORNERS {
                        let corner = intrinsics.unproject(u + du, v + dv, depth);
                        corners.push(pose.camera_to_world(&corner));
                    }
                }
            }
        }

        // Edge case: nothing masked is a valid, empty observation
        if masked_pixels == 0 {
            return Ok(PartialObservation {
                viewpoint,
                footprint_area: 0.0,
                height_profile: HeightProfile::EMPTY,
                valid_sample_fraction: 1.0,
                masked_pixels: 0,
                valid_samples: 0,
                centroid: Point3::from(pose.position),
                viewing_axis,
            });
        }

        let valid_samples = points.len();
        let valid_sample_fraction = valid_samples as f64 / masked_pixels as f64;

        // Step 2: footprint on the plane perpendicular to the primary axis
        let (e1, e2) = plane_basis(&viewing_axis);
        let projected: Vec<(f64, f64)> = corners
            .iter()
            .map(|point| (point.coords.dot(&e1), point.coords.dot(&e2)))
            .collect();
        let footprint_area = convex_hull_area(&projected);

        // Step 3: vertical profile and centroid
        let height_profile = HeightProfile::from_heights(points.iter().map(|point| point.z));
        let centroid = if points.is_empty() {
            Point3::from(pose.position)
        } else {
            let sum = points
                .iter()
                .fold(Vector3::zeros(), |acc, point| acc + point.coords);
            Point3::from(sum / valid_samples as f64)
        };

        debug!(
            "{viewpoint} observation: {masked_pixels} masked, {valid_samples} valid, footprint {:.5} m², height extent {:.4} m",
            footprint_area,
            height_profile.extent()
        );

        Ok(PartialObservation {
            viewpoint,
            footprint_area,
            height_profile,
            valid_sample_fraction,
            masked_pixels,
            valid_samples,
            centroid,
            viewing_axis,
        })
    }

    pub fn check_coverage(&self, observation: &PartialObservation) -> PipelineResult<()> {
        match self.shortfall(observation) {
            Some(shortfall) => Err(PipelineError::insufficient(shortfall)),
            None => Ok(()),
        }
    }

    pub fn shortfall(&self, observation: &PartialObservation) -> Option<CoverageShortfall> {
        coverage_shortfall(observation, self.config.min_valid_fraction)
    }
}

pub(crate) fn coverage_shortfall(
    observation: &PartialObservation,
    required_fraction: f64,
) -> Option<CoverageShortfall> {
    if observation.valid_sample_fraction >= required_fraction {
        return None;
    }
    Some(CoverageShortfall {
        viewpoint: observation.viewpoint,
        valid_sample_fraction: observation.valid_sample_fraction,
        masked_pixels: observation.masked_pixels,
        required_fraction,
    })
}

fn ensure_matching(
    capture: &CaptureArtifact,
    segmentation: &SegmentationArtifact,
) -> PipelineResult<()> {
    if capture.viewpoint() != segmentation.viewpoint() {
        return Err(PipelineError::InvalidArtifact(format!(
            "{} segmentation paired with {} capture",
            segmentation.viewpoint(),
            capture.viewpoint()
        )));
    }
    if capture.captured_at() != segmentation.source_captured_at() {
        return Err(PipelineError::InvalidArtifact(format!(
            "{} segmentation was produced from a different capture",
            capture.viewpoint()
        )));
    }
    if capture.dimensions() != segmentation.mask().dimensions() {
        return Err(PipelineError::InvalidArtifact(format!(
            "{} mask resolution does not match its capture",
            capture.viewpoint()
        )));
    }
    Ok(())
}

/// The axis a viewpoint measures poorly. Top looks along world up; side looks along
/// its optical axis flattened onto the horizontal plane.
fn primary_axis(viewpoint: Viewpoint, pose: &Pose) -> Vector3<f64> {
    match viewpoint {
        Viewpoint::Top => Vector3::z(),
        Viewpoint::Side => {
            let optical = pose.optical_axis();
            let horizontal = Vector3::new(optical.x, optical.y, 0.0);
            if horizontal.norm() < 1e-6 {
                Vector3::x()
            } else {
                horizontal.normalize()
            }
        }
    }
}

fn plane_basis(axis: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
    let helper = if axis.z.abs() < 0.9 {
        Vector3::z()
    } else {
        Vector3::x()
    };
    let e1 = helper.cross(axis).normalize();
    let e2 = axis.cross(&e1);
    (e1, e2)
}
