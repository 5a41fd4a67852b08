pub mod config;
pub mod hull;
pub mod reconstructor;

pub use config::ReconstructionConfig;
pub use reconstructor::ViewReconstructor;
