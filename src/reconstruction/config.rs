use serde::{Deserialize, Serialize};

/// Thresholds for turning a masked depth capture into a partial observation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ReconstructionConfig {
    /// Mask values strictly above this count as food
    pub mask_threshold: f32,

    /// Minimum fraction of masked pixels with valid depth before the view is trusted
    pub min_valid_fraction: f64,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            mask_threshold: 0.5,
            min_valid_fraction: 0.3,
        }
    }
}
