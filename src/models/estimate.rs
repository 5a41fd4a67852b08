use serde::{Deserialize, Serialize};

use super::Viewpoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FusionMethod {
    TwoViewFusion,
    SingleViewFallback,
}

/// The two views' footprint centroids disagree beyond tolerance, which usually means
/// the capture poses are misregistered. Lowers confidence; never fatal.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MisregistrationWarning {
    pub centroid_offset_m: f64,
    pub tolerance_m: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeEstimate {
    pub volume_ml: f64,
    pub confidence: f64,
    pub method: FusionMethod,
    pub footprint_area_m2: f64,
    pub effective_height_m: f64,
    pub fill_factor: f64,
    /// View the estimate was built from when `method` is a fallback.
    pub fallback_view: Option<Viewpoint>,
    pub misregistration: Option<MisregistrationWarning>,
}

/// Density and per-gram macros for one food class.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NutritionProfile {
    pub density_g_per_ml: f64,
    pub calories_per_gram: f64,
    pub protein_per_gram: f64,
    pub fat_per_gram: f64,
    pub carbs_per_gram: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NutritionEstimate {
    pub mass_grams: f64,
    pub calories: f64,
    pub protein_grams: f64,
    pub fat_grams: f64,
    pub carb_grams: f64,
    pub source_class: String,
    pub source_confidence: Option<f64>,
}

/// Result handed back to the UI layer once a session is finalized.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MealEstimate {
    pub volume_ml: f64,
    pub mass_grams: f64,
    pub calories: f64,
    pub protein_grams: f64,
    pub fat_grams: f64,
    pub carb_grams: f64,
    pub confidence: f64,
    pub volume: VolumeEstimate,
    pub nutrition: NutritionEstimate,
}

impl MealEstimate {
    pub fn new(volume: VolumeEstimate, nutrition: NutritionEstimate) -> Self {
        Self {
            volume_ml: volume.volume_ml,
            mass_grams: nutrition.mass_grams,
            calories: nutrition.calories,
            protein_grams: nutrition.protein_grams,
            fat_grams: nutrition.fat_grams,
            carb_grams: nutrition.carb_grams,
            confidence: volume.confidence,
            volume,
            nutrition,
        }
    }
}
