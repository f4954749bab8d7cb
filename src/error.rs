//! Error types for advecta.

use thiserror::Error;

/// Advecta error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Invalid configuration (unknown encoding name, bad clamp, ...).
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A tensor does not have the expected extent along some dimension.
    #[error("shape mismatch for {what}: expected {expected}, got {got}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// Edge index refers to a node that does not exist.
    #[error("edge index out of range: node {index} not in [0, {num_nodes})")]
    IndexOutOfRange { index: i64, num_nodes: usize },

    /// Two connected nodes share a position, so the unit direction is undefined.
    #[error("zero distance on edge {edge} ({center} -> {neighbor})")]
    DivisionSingularity {
        edge: usize,
        center: usize,
        neighbor: usize,
    },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
