use crate::error::{PipelineError, PipelineResult};
use crate::models::{NutritionEstimate, NutritionProfile, VolumeEstimate};

/// Project a fused volume to mass and macros for one food class.
///
/// `profile` is whatever the nutrition lookup returned for `class`; `None` means the
/// class has no entry and the caller must take the manual-entry path. Values keep full
/// precision; rounding belongs to presentation.
pub fn project_nutrition(
    volume: &VolumeEstimate,
    class: Option<&str>,
    class_confidence: Option<f64>,
    profile: Option<&NutritionProfile>,
) -> PipelineResult<NutritionEstimate> {
    let (class, profile) = match (class, profile) {
        (Some(class), Some(profile)) => (class, profile),
        (class, _) => {
            return Err(PipelineError::UnknownClass {
                class: class.map(str::to_string),
            })
        }
    };

    let mass_grams = volume.volume_ml * profile.density_g_per_ml;

    Ok(NutritionEstimate {
        mass_grams,
        calories: mass_grams * profile.calories_per_gram,
        protein_grams: mass_grams * profile.protein_per_gram,
        fat_grams: mass_grams * profile.fat_per_gram,
        carb_grams: mass_grams * profile.carbs_per_gram,
        source_class: class.to_string(),
        source_confidence: class_confidence,
    })
}
