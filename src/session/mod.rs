pub mod controller;
pub mod state;

pub use controller::{
    CaptureSession, Collaborators, RequestOutcome, SegmentReport, SessionSnapshot, ViewSnapshot,
};
pub use state::{RequestKind, SessionStage, SessionState};
