//! Error types for CUBECAST

use thiserror::Error;

use crate::{FaceIndex, StreamId};

/// Negotiation step that failed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NegotiationStage {
    Capabilities,
    Describe,
    Setup,
    Play,
}

impl std::fmt::Display for NegotiationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NegotiationStage::Capabilities => "capabilities",
            NegotiationStage::Describe => "describe",
            NegotiationStage::Setup => "setup",
            NegotiationStage::Play => "play",
        };
        f.write_str(name)
    }
}

/// Core CUBECAST errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CubecastError {
    // Session errors
    #[error("Negotiation failed during {stage}: {reason}")]
    Negotiation {
        stage: NegotiationStage,
        reason: String,
    },

    #[error("Invalid session transition: {event} in state {state}")]
    InvalidTransition { state: String, event: String },

    #[error("Unknown stream: {0}")]
    UnknownStream(StreamId),

    // Pipeline errors
    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Buffer allocation failed: {0}")]
    Allocation(String),

    #[error("Face {face} out of range (layout has {faces} faces)")]
    FaceOutOfRange { face: FaceIndex, faces: usize },

    #[error("Invalid picture geometry: expected {expected} bytes, got {actual}")]
    InvalidGeometry { expected: usize, actual: usize },

    #[error("Pipeline closed")]
    Closed,

    // Setup errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl CubecastError {
    /// Build a negotiation error
    pub fn negotiation(stage: NegotiationStage, reason: impl Into<String>) -> Self {
        CubecastError::Negotiation {
            stage,
            reason: reason.into(),
        }
    }

    /// Whether the pipeline stage may carry on after this error
    pub fn is_transient(&self) -> bool {
        matches!(self, CubecastError::Decode(_) | CubecastError::Allocation(_))
    }
}

/// Result type for CUBECAST operations
pub type CubecastResult<T> = Result<T, CubecastError>;
