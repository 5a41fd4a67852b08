use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::nutrition::normalize_class;

/// Average proportions of a food class, used when only one view is usable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct FallbackShape {
    /// Height divided by footprint width
    pub height_to_width: f64,
    /// Footprint depth (along the side camera's axis) divided by width
    pub depth_to_width: f64,
}

impl Default for FallbackShape {
    fn default() -> Self {
        Self {
            height_to_width: 0.3,
            depth_to_width: 1.0,
        }
    }
}

/// Tunable constants for two-view volume fusion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct FusionConfig {
    /// Views below this valid-depth fraction are not trusted
    pub min_valid_fraction: f64,

    /// Share of the bounding prism a typical food item fills
    pub fill_factor: f64,
    #[serde(deserialize_with = "normalized_keys")]
    pub class_fill_factors: HashMap<String, f64>,

    pub fallback_shape: FallbackShape,
    #[serde(deserialize_with = "normalized_keys")]
    pub class_fallback_shapes: HashMap<String, FallbackShape>,

    /// Confidence weights (exponents) per view
    pub top_weight: f64,
    pub side_weight: f64,

    /// Horizontal centroid disagreement tolerated between views, metres
    pub centroid_tolerance_m: f64,
    pub misregistration_penalty: f64,
    pub single_view_penalty: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            min_valid_fraction: 0.3,
            fill_factor: 0.6,
            class_fill_factors: HashMap::new(),
            fallback_shape: FallbackShape::default(),
            class_fallback_shapes: HashMap::new(),
            top_weight: 1.0,
            side_weight: 1.0,
            centroid_tolerance_m: 0.05,
            misregistration_penalty: 0.5,
            single_view_penalty: 0.5,
        }
    }
}

impl FusionConfig {
    pub fn fill_factor_for(&self, class: Option<&str>) -> f64 {
        class
            .and_then(|class| self.class_fill_factors.get(&normalize_class(class)))
            .copied()
            .unwrap_or(self.fill_factor)
    }

    pub fn fallback_shape_for(&self, class: Option<&str>) -> FallbackShape {
        class
            .and_then(|class| self.class_fallback_shapes.get(&normalize_class(class)))
            .copied()
            .unwrap_or(self.fallback_shape)
    }
}

/// Per-class tables are keyed the same way lookups normalise class names.
fn normalized_keys<'de, D, V>(deserializer: D) -> Result<HashMap<String, V>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    let raw = HashMap::<String, V>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(class, value)| (normalize_class(&class), value))
        .collect())
}
