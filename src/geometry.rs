//! Per-edge relative geometry.
//!
//! For every edge `(i -> j)` the offset is `p_j - p_i`, gathered from the
//! position matrix with the edge index. Distances, unit directions and polar
//! angles are derived from that offset and stay on the autograd tape.

use candle_core::{DType, Tensor};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::graph::EdgeIndex;
use crate::ops::atan2;
use crate::{Error, Result};

/// What to do when two connected nodes coincide (`‖p_j - p_i‖ = 0`) and a
/// unit direction is requested.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroDistance {
    /// Fail the forward pass with [`Error::DivisionSingularity`].
    #[default]
    Error,
    /// Divide by `max(distance, eps)`; coincident nodes get a zero direction.
    Clamp(f64),
}

impl ZeroDistance {
    pub fn validate(self) -> Result<()> {
        match self {
            Self::Error => Ok(()),
            Self::Clamp(eps) if eps.is_finite() && eps > 0.0 => Ok(()),
            Self::Clamp(eps) => Err(Error::InvalidConfig(format!(
                "zero-distance clamp must be finite and positive, got {eps}"
            ))),
        }
    }
}

/// Offsets and distances for every edge of a graph.
#[derive(Debug, Clone)]
pub struct EdgeGeometry {
    offsets: Tensor,
    distances: Tensor,
}

impl EdgeGeometry {
    /// Gather `p_j - p_i` for every edge.
    ///
    /// # Arguments
    /// - `positions`: Node positions (N x D)
    /// - `edges`: Edge index, already validated against N
    pub fn new(positions: &Tensor, edges: &EdgeIndex) -> Result<Self> {
        let p_i = positions.index_select(edges.centers(), 0)?;
        let p_j = positions.index_select(edges.neighbors(), 0)?;
        let offsets = (p_j - p_i)?;
        let distances = offsets.sqr()?.sum_keepdim(1)?.sqrt()?;
        Ok(Self { offsets, distances })
    }

    /// `p_j - p_i`, shape (E x D).
    pub fn offsets(&self) -> &Tensor {
        &self.offsets
    }

    /// `‖p_j - p_i‖`, shape (E x 1).
    pub fn distances(&self) -> &Tensor {
        &self.distances
    }

    /// `(p_j - p_i) / ‖p_j - p_i‖`, shape (E x D).
    pub fn unit_directions(&self, policy: ZeroDistance, edges: &EdgeIndex) -> Result<Tensor> {
        match policy {
            ZeroDistance::Error => {
                let dist = self
                    .distances
                    .flatten_all()?
                    .to_dtype(DType::F64)?
                    .to_vec1::<f64>()?;
                if let Some(edge) = dist.iter().position(|&d| d == 0.0) {
                    let (center, neighbor) = edges.pair(edge)?;
                    return Err(Error::DivisionSingularity {
                        edge,
                        center,
                        neighbor,
                    });
                }
                Ok(self.offsets.broadcast_div(&self.distances)?)
            }
            ZeroDistance::Clamp(eps) => {
                policy.validate()?;
                if tracing::enabled!(tracing::Level::DEBUG) {
                    let clamped = self
                        .distances
                        .lt(eps)?
                        .to_dtype(DType::F64)?
                        .sum_all()?
                        .to_scalar::<f64>()?;
                    if clamped > 0.0 {
                        debug!(clamped, eps, "clamped short edges");
                    }
                }
                let denom = self.distances.maximum(eps)?;
                Ok(self.offsets.broadcast_div(&denom)?)
            }
        }
    }

    /// Polar angle `atan2(dy, dx)` of each offset, shape (E x 1).
    ///
    /// Only defined for 2-D positions.
    pub fn angles(&self) -> Result<Tensor> {
        let dim = self.offsets.dim(1)?;
        if dim != 2 {
            return Err(Error::InvalidConfig(format!(
                "polar angles need 2-D positions, got {dim}-D"
            )));
        }
        let dx = self.offsets.narrow(1, 0, 1)?;
        let dy = self.offsets.narrow(1, 1, 1)?;
        atan2(&dy, &dx)
    }
}
