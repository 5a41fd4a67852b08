//! Capture artifacts: one RGB frame plus registered depth, intrinsics and pose.

use std::fmt;

use chrono::{DateTime, Utc};
use image::{ImageBuffer, Luma, RgbImage};
use nalgebra::{Point3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Viewpoint {
    Top,
    Side,
}

impl Viewpoint {
    pub const ALL: [Viewpoint; 2] = [Viewpoint::Top, Viewpoint::Side];

    pub fn as_str(&self) -> &'static str {
        match self {
            Viewpoint::Top => "top",
            Viewpoint::Side => "side",
        }
    }

    pub fn other(&self) -> Viewpoint {
        match self {
            Viewpoint::Top => Viewpoint::Side,
            Viewpoint::Side => Viewpoint::Top,
        }
    }
}

impl fmt::Display for Viewpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pinhole intrinsics in RGB pixel units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Intrinsics {
    /// Back-project pixel `(u, v)` at depth `depth` (metres along the optical axis)
    /// into camera coordinates: x right, y down, z forward.
    pub fn unproject(&self, u: f64, v: f64, depth: f64) -> Point3<f64> {
        Point3::new(
            (u - self.cx) * depth / self.fx,
            (v - self.cy) * depth / self.fy,
            depth,
        )
    }
}

/// Camera-to-world transform in the session-fixed world frame (z up).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Pose {
    pub rotation: UnitQuaternion<f64>,
    pub position: Vector3<f64>,
}

impl Pose {
    pub fn new(rotation: UnitQuaternion<f64>, position: Vector3<f64>) -> Self {
        Self { rotation, position }
    }

    pub fn camera_to_world(&self, point_camera: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation * point_camera.coords + self.position)
    }

    /// Direction the camera looks along, in world coordinates.
    pub fn optical_axis(&self) -> Vector3<f64> {
        self.rotation * Vector3::z()
    }
}

/// Per-pixel distance along the optical axis, in metres.
///
/// Missing samples are stored as [`DepthMap::INVALID`]; a zero or negative distance is
/// never accepted, so a sample is either trustworthy or explicitly absent.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthMap {
    width: u32,
    height: u32,
    samples: Vec<f32>,
}

impl DepthMap {
    pub const INVALID: f32 = f32::NAN;

    pub fn new(width: u32, height: u32, samples: Vec<f32>) -> PipelineResult<Self> {
        let expected = width as usize * height as usize;
        if samples.len() != expected {
            return Err(PipelineError::InvalidArtifact(format!(
                "depth map {width}x{height} needs {expected} samples, got {}",
                samples.len()
            )));
        }
        if let Some(index) = samples
            .iter()
            .position(|sample| !sample.is_nan() && !(sample.is_finite() && *sample > 0.0))
        {
            return Err(PipelineError::InvalidArtifact(format!(
                "depth sample {} at index {index} is neither positive nor the invalid sentinel",
                samples[index]
            )));
        }
        Ok(Self {
            width,
            height,
            samples,
        })
    }

    /// Decode a 16-bit millimetre depth image where `0` marks a missing sample.
    pub fn from_millimeters(image: &ImageBuffer<Luma<u16>, Vec<u16>>) -> Self {
        let samples = image
            .pixels()
            .map(|Luma([mm])| {
                if *mm == 0 {
                    Self::INVALID
                } else {
                    *mm as f32 / 1000.0
                }
            })
            .collect();
        Self {
            width: image.width(),
            height: image.height(),
            samples,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Valid sample at `(x, y)` in depth-map pixels, `None` when missing or out of range.
    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let sample = self.samples[y as usize * self.width as usize + x as usize];
        if sample.is_nan() {
            None
        } else {
            Some(sample)
        }
    }

    pub fn valid_count(&self) -> usize {
        self.samples.iter().filter(|sample| !sample.is_nan()).count()
    }
}

/// One viewpoint's raw capture. Immutable once built.
#[derive(Debug, Clone)]
pub struct CaptureArtifact {
    rgb_frame: RgbImage,
    depth_map: DepthMap,
    intrinsics: Intrinsics,
    pose: Pose,
    viewpoint: Viewpoint,
    captured_at: DateTime<Utc>,
}

impl CaptureArtifact {
    pub fn new(
        viewpoint: Viewpoint,
        rgb_frame: RgbImage,
        depth_map: DepthMap,
        intrinsics: Intrinsics,
        pose: Pose,
        captured_at: DateTime<Utc>,
    ) -> PipelineResult<Self> {
        let (rgb_w, rgb_h) = rgb_frame.dimensions();
        if rgb_w == 0 || rgb_h == 0 {
            return Err(PipelineError::InvalidArtifact(format!(
                "{viewpoint} capture has an empty RGB frame"
            )));
        }
        if depth_scale(rgb_w, depth_map.width()).is_none()
            || depth_scale(rgb_h, depth_map.height()).is_none()
        {
            return Err(PipelineError::InvalidArtifact(format!(
                "{viewpoint} depth map {}x{} is not integer-aligned with RGB {rgb_w}x{rgb_h}",
                depth_map.width(),
                depth_map.height()
            )));
        }
        if !(intrinsics.fx > 0.0 && intrinsics.fy > 0.0) {
            return Err(PipelineError::InvalidArtifact(format!(
                "{viewpoint} intrinsics need positive focal lengths"
            )));
        }

        Ok(Self {
            rgb_frame,
            depth_map,
            intrinsics,
            pose,
            viewpoint,
            captured_at,
        })
    }

    pub fn viewpoint(&self) -> Viewpoint {
        self.viewpoint
    }

    pub fn rgb_frame(&self) -> &RgbImage {
        &self.rgb_frame
    }

    pub fn depth_map(&self) -> &DepthMap {
        &self.depth_map
    }

    pub fn intrinsics(&self) -> &Intrinsics {
        &self.intrinsics
    }

    pub fn pose(&self) -> &Pose {
        &self.pose
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.rgb_frame.dimensions()
    }

    /// Depth sample covering RGB pixel `(u, v)`.
    pub fn depth_at(&self, u: u32, v: u32) -> Option<f32> {
        let (rgb_w, rgb_h) = self.rgb_frame.dimensions();
        let sx = depth_scale(rgb_w, self.depth_map.width())?;
        let sy = depth_scale(rgb_h, self.depth_map.height())?;
        self.depth_map.get(u / sx, v / sy)
    }
}

/// Integer factor between RGB and depth along one axis, if they are aligned.
fn depth_scale(rgb: u32, depth: u32) -> Option<u32> {
    if depth == 0 || rgb % depth != 0 {
        None
    } else {
        Some(rgb / depth)
    }
}
