pub mod config;
pub mod engine;
pub mod scoring;

pub use config::{FallbackShape, FusionConfig};
pub use engine::VolumeFusionEngine;
