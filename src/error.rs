//! Error taxonomy for the capture-to-nutrition pipeline.
//!
//! Every failure that leaves the core is one of these values; the session stage
//! machine consumes them instead of aborting.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::models::Viewpoint;
use crate::session::{RequestKind, SessionStage};

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// One viewpoint whose depth/mask coverage was too sparse to trust.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageShortfall {
    pub viewpoint: Viewpoint,
    pub valid_sample_fraction: f64,
    pub masked_pixels: usize,
    pub required_fraction: f64,
}

impl fmt::Display for CoverageShortfall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} view has {:.0}% valid depth over {} masked pixels (needs {:.0}%)",
            self.viewpoint,
            self.valid_sample_fraction * 100.0,
            self.masked_pixels,
            self.required_fraction * 100.0
        )
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("insufficient depth coverage, retake photo: {}", join_shortfalls(.shortfalls))]
    InsufficientData { shortfalls: Vec<CoverageShortfall> },

    #[error("no nutrition entry for class '{}'", .class.as_deref().unwrap_or("unlabelled"))]
    UnknownClass { class: Option<String> },

    #[error("{request} collaborator unavailable{}: {message}", view_suffix(.viewpoint))]
    CollaboratorUnavailable {
        request: RequestKind,
        viewpoint: Option<Viewpoint>,
        message: String,
    },

    #[error("cannot {request}{} while session is {stage}: requires {requires}", view_suffix(.viewpoint))]
    StagePrecondition {
        request: RequestKind,
        viewpoint: Option<Viewpoint>,
        stage: SessionStage,
        requires: &'static str,
    },

    #[error("invalid artifact: {0}")]
    InvalidArtifact(String),

    /// Internal: an async completion arrived for a request that was superseded or
    /// reset. Never surfaced past the session controller.
    #[error("stale {request} result for {viewpoint} view discarded (generation {generation})")]
    StaleResultDiscarded {
        request: RequestKind,
        viewpoint: Viewpoint,
        generation: u64,
    },
}

impl PipelineError {
    pub fn insufficient(shortfall: CoverageShortfall) -> Self {
        PipelineError::InsufficientData {
            shortfalls: vec![shortfall],
        }
    }

    /// Whether the same stage can simply be retried without redoing earlier steps.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::CollaboratorUnavailable { .. })
    }
}

/// Error reported by an external collaborator implementation.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("service unreachable: {0}")]
    Unreachable(String),

    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl CollaboratorError {
    pub(crate) fn into_pipeline(self, request: RequestKind, viewpoint: Option<Viewpoint>) -> PipelineError {
        PipelineError::CollaboratorUnavailable {
            request,
            viewpoint,
            message: self.to_string(),
        }
    }
}

fn join_shortfalls(shortfalls: &[CoverageShortfall]) -> String {
    shortfalls
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn view_suffix(viewpoint: &Option<Viewpoint>) -> String {
    viewpoint
        .map(|view| format!(" for {view} view"))
        .unwrap_or_default()
}
