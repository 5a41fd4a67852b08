//! Collaborators backed by capture bundles on disk.
//!
//! A bundle directory holds:
//! - `rgb.png`: the colour frame
//! - `depth.png`: 16-bit greyscale depth in millimetres, `0` where the sensor had no reading
//! - `camera.json`: intrinsics plus camera-to-world position and `wxyz` orientation
//! - `mask.png` (optional): 8-bit food mask, consumed by [`MaskFileSegmenter`]
//! - `label.json` (optional): `{"predictedClass": ..., "confidence": ...}`

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;
use crate::models::{CaptureArtifact, DepthMap, Intrinsics, Pose, SegmentationMask, Viewpoint};

use super::{CaptureSource, QuickClassification, SegmentationResponse, Segmenter};

const DEFAULT_CLASSIFY_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraFile {
    pub intrinsics: Intrinsics,
    pub position: [f64; 3],
    pub orientation_wxyz: [f64; 4],
    pub captured_at: Option<DateTime<Utc>>,
}

impl CameraFile {
    pub fn pose(&self) -> Pose {
        let [w, x, y, z] = self.orientation_wxyz;
        let [px, py, pz] = self.position;
        Pose::new(
            UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z)),
            Vector3::new(px, py, pz),
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LabelFile {
    predicted_class: Option<String>,
    confidence: Option<f64>,
}

pub fn load_capture_bundle(dir: &Path, viewpoint: Viewpoint) -> Result<CaptureArtifact> {
    let rgb = image::open(dir.join("rgb.png"))
        .with_context(|| format!("Failed to read rgb.png in {}", dir.display()))?
        .into_rgb8();
    let depth = image::open(dir.join("depth.png"))
        .with_context(|| format!("Failed to read depth.png in {}", dir.display()))?
        .into_luma16();

    let camera_path = dir.join("camera.json");
    let contents = fs::read_to_string(&camera_path)
        .with_context(|| format!("Failed to read {}", camera_path.display()))?;
    let camera: CameraFile = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", camera_path.display()))?;

    let capture = CaptureArtifact::new(
        viewpoint,
        rgb,
        DepthMap::from_millimeters(&depth),
        camera.intrinsics,
        camera.pose(),
        camera.captured_at.unwrap_or_else(Utc::now),
    )?;

    info!(
        "Loaded {viewpoint} capture from {} ({}x{}, {} valid depth samples)",
        dir.display(),
        capture.dimensions().0,
        capture.dimensions().1,
        capture.depth_map().valid_count()
    );
    Ok(capture)
}

fn load_mask(dir: &Path) -> Result<(SegmentationMask, LabelFile)> {
    let mask = image::open(dir.join("mask.png"))
        .with_context(|| format!("Failed to read mask.png in {}", dir.display()))?
        .into_luma8();

    let label_path = dir.join("label.json");
    let label = if label_path.exists() {
        let contents = fs::read_to_string(&label_path)
            .with_context(|| format!("Failed to read {}", label_path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", label_path.display()))?
    } else {
        LabelFile::default()
    };

    Ok((SegmentationMask::from_luma(&mask), label))
}

/// Directory for each viewpoint's bundle.
#[derive(Debug, Clone)]
pub struct BundleDirs {
    pub top: PathBuf,
    pub side: PathBuf,
}

impl BundleDirs {
    fn dir(&self, viewpoint: Viewpoint) -> PathBuf {
        match viewpoint {
            Viewpoint::Top => self.top.clone(),
            Viewpoint::Side => self.side.clone(),
        }
    }
}

/// Serves capture bundles as if they came from the camera.
#[derive(Debug, Clone)]
pub struct FileCaptureSource {
    dirs: BundleDirs,
}

impl FileCaptureSource {
    pub fn new(dirs: BundleDirs) -> Self {
        Self { dirs }
    }
}

#[async_trait]
impl CaptureSource for FileCaptureSource {
    async fn capture(&self, viewpoint: Viewpoint) -> Result<CaptureArtifact, CollaboratorError> {
        let dir = self.dirs.dir(viewpoint);
        tokio::task::spawn_blocking(move || load_capture_bundle(&dir, viewpoint))
            .await
            .map_err(|err| CollaboratorError::Unreachable(format!("capture worker join failed: {err}")))?
            .map_err(|err| CollaboratorError::Malformed(format!("{err:#}")))
    }
}

/// Stands in for the segmentation model with precomputed masks and labels.
#[derive(Debug, Clone)]
pub struct MaskFileSegmenter {
    dirs: BundleDirs,
    classify_threshold: f64,
}

impl MaskFileSegmenter {
    pub fn new(dirs: BundleDirs) -> Self {
        Self {
            dirs,
            classify_threshold: DEFAULT_CLASSIFY_THRESHOLD,
        }
    }

    pub fn with_classify_threshold(mut self, threshold: f64) -> Self {
        self.classify_threshold = threshold;
        self
    }

    async fn read(&self, viewpoint: Viewpoint) -> Result<(SegmentationMask, LabelFile), CollaboratorError> {
        let dir = self.dirs.dir(viewpoint);
        tokio::task::spawn_blocking(move || load_mask(&dir))
            .await
            .map_err(|err| CollaboratorError::Unreachable(format!("mask worker join failed: {err}")))?
            .map_err(|err| CollaboratorError::Malformed(format!("{err:#}")))
    }
}

#[async_trait]
impl Segmenter for MaskFileSegmenter {
    async fn segment(
        &self,
        capture: &CaptureArtifact,
    ) -> Result<SegmentationResponse, CollaboratorError> {
        let (mask, label) = self.read(capture.viewpoint()).await?;
        Ok(SegmentationResponse {
            predicted_class: label.predicted_class,
            confidence: label.confidence,
            mask,
        })
    }

    async fn classify(
        &self,
        capture: &CaptureArtifact,
    ) -> Result<QuickClassification, CollaboratorError> {
        let (_, label) = self.read(capture.viewpoint()).await?;
        let predicted_class = label
            .predicted_class
            .ok_or_else(|| CollaboratorError::Malformed("label.json has no predictedClass".into()))?;
        let confidence = label.confidence.unwrap_or(0.0);
        let threshold_met = confidence >= self.classify_threshold;

        Ok(QuickClassification {
            message: (!threshold_met).then(|| {
                format!(
                    "confidence {:.0}% below {:.0}%, confirm the dish manually",
                    confidence * 100.0,
                    self.classify_threshold * 100.0
                )
            }),
            predicted_class,
            confidence_percentage: confidence * 100.0,
            threshold_met,
        })
    }
}
