use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock};

use crate::fusion::FusionConfig;
use crate::reconstruction::ReconstructionConfig;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Upper bound for any single collaborator call
    pub collaborator_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            collaborator_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineConfig {
    pub reconstruction: ReconstructionConfig,
    pub fusion: FusionConfig,
    pub session: SessionConfig,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        let unit = 0.0..=1.0;
        if !unit.contains(&(self.reconstruction.mask_threshold as f64)) {
            bail!("maskThreshold must lie in [0, 1]");
        }
        if !unit.contains(&self.reconstruction.min_valid_fraction)
            || !unit.contains(&self.fusion.min_valid_fraction)
        {
            bail!("minValidFraction must lie in [0, 1]");
        }
        let fills = std::iter::once(&self.fusion.fill_factor).chain(self.fusion.class_fill_factors.values());
        for fill in fills {
            if !(*fill > 0.0 && *fill <= 1.0) {
                bail!("fill factor {fill} must lie in (0, 1]");
            }
        }
        let shapes = std::iter::once(&self.fusion.fallback_shape)
            .chain(self.fusion.class_fallback_shapes.values());
        for shape in shapes {
            if shape.height_to_width <= 0.0 || shape.depth_to_width <= 0.0 {
                bail!("fallback aspect ratios must be positive");
            }
        }
        if !unit.contains(&self.fusion.misregistration_penalty)
            || !unit.contains(&self.fusion.single_view_penalty)
        {
            bail!("confidence penalties must lie in [0, 1]");
        }
        let weights = [self.fusion.top_weight, self.fusion.side_weight];
        if weights.iter().any(|weight| !(weight.is_finite() && *weight >= 0.0)) {
            bail!("confidence weights must be finite and not negative");
        }
        if self.fusion.centroid_tolerance_m < 0.0 {
            bail!("centroidToleranceM must not be negative");
        }
        if self.session.collaborator_timeout_ms == 0 {
            bail!("collaboratorTimeoutMs must be positive");
        }
        Ok(())
    }
}

/// Pipeline configuration backed by a JSON file. A missing file means defaults.
pub struct ConfigStore {
    path: PathBuf,
    data: RwLock<PipelineConfig>,
}

impl ConfigStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config {}", path.display()))?
        } else {
            PipelineConfig::default()
        };
        data.validate()
            .with_context(|| format!("Invalid config in {}", path.display()))?;

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn config(&self) -> PipelineConfig {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update(&self, config: PipelineConfig) -> Result<()> {
        config.validate()?;
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.persist(&config)?;
        *guard = config;
        Ok(())
    }

    fn persist(&self, data: &PipelineConfig) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write config to {}", self.path.display()))
    }
}
