//! Data contracts passed between pipeline stages.
//!
//! Everything here is immutable once built; only the capture session mutates state.

pub mod capture;
pub mod estimate;
pub mod observation;
pub mod segmentation;

pub use capture::{CaptureArtifact, DepthMap, Intrinsics, Pose, Viewpoint};
pub use estimate::{
    FusionMethod, MealEstimate, MisregistrationWarning, NutritionEstimate, NutritionProfile,
    VolumeEstimate,
};
pub use observation::{HeightProfile, PartialObservation};
pub use segmentation::{SegmentationArtifact, SegmentationMask};
