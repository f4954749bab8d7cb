//! Edge lists under the target-to-source flow convention.
//!
//! An edge index is a `(2, E)` integer tensor. Row 0 holds the **center** of
//! each edge (the node that aggregates, `i`), row 1 the **neighbor** (the node
//! that supplies data, `j`):
//!
//! ```text
//! edge (i -> j):   m_ij = MESSAGE(x_i, x_j, p_j - p_i)
//!                  h_i  = UPDATE(x_i, AGG_j m_ij)
//! ```
//!
//! So the edges `(0 -> 1), (0 -> 2)` make node 0 aggregate from nodes 1 and 2,
//! while nodes 1 and 2 receive nothing.

use candle_core::{DType, Device, Tensor};

use crate::{Error, Result};

/// Validated `(2, E)` edge list stored as `u32` indices.
#[derive(Debug, Clone)]
pub struct EdgeIndex {
    centers: Tensor,
    neighbors: Tensor,
    num_edges: usize,
    /// Smallest and largest raw index, read before the `u32` cast.
    bounds: Option<(i64, i64)>,
}

impl EdgeIndex {
    /// Wrap an edge index tensor of any integer (or float) dtype.
    ///
    /// The tensor is coerced to `u32`; its shape must be `(2, E)`. Float
    /// indices must be integral. Range is checked later, against the node
    /// count, by [`EdgeIndex::validate`].
    pub fn new(edge_index: &Tensor) -> Result<Self> {
        let dims = edge_index.dims();
        if dims.len() != 2 {
            return Err(Error::ShapeMismatch {
                what: "edge index rank",
                expected: 2,
                got: dims.len(),
            });
        }
        if dims[0] != 2 {
            return Err(Error::ShapeMismatch {
                what: "edge index rows",
                expected: 2,
                got: dims[0],
            });
        }
        let num_edges = dims[1];
        let bounds = index_bounds(edge_index)?;
        let index = edge_index.to_dtype(DType::U32)?;
        let centers = index.get(0)?.contiguous()?;
        let neighbors = index.get(1)?.contiguous()?;
        Ok(Self {
            centers,
            neighbors,
            num_edges,
            bounds,
        })
    }

    /// Build from `(center, neighbor)` pairs.
    pub fn from_pairs(pairs: &[(u32, u32)], device: &Device) -> Result<Self> {
        let mut data: Vec<u32> = pairs.iter().map(|&(c, _)| c).collect();
        data.extend(pairs.iter().map(|&(_, n)| n));
        let index = Tensor::from_vec(data, (2, pairs.len()), device)?;
        Self::new(&index)
    }

    /// Aggregating endpoint of every edge, shape `(E,)`.
    pub fn centers(&self) -> &Tensor {
        &self.centers
    }

    /// Data-supplying endpoint of every edge, shape `(E,)`.
    pub fn neighbors(&self) -> &Tensor {
        &self.neighbors
    }

    pub fn num_edges(&self) -> usize {
        self.num_edges
    }

    pub fn is_empty(&self) -> bool {
        self.num_edges == 0
    }

    /// Endpoints of a single edge as `(center, neighbor)`.
    pub fn pair(&self, edge: usize) -> Result<(usize, usize)> {
        let center = self.centers.get(edge)?.to_scalar::<u32>()? as usize;
        let neighbor = self.neighbors.get(edge)?.to_scalar::<u32>()? as usize;
        Ok((center, neighbor))
    }

    /// All edges as `(center, neighbor)` pairs, in listed order.
    pub fn pairs(&self) -> Result<Vec<(u32, u32)>> {
        let centers = self.centers.to_vec1::<u32>()?;
        let neighbors = self.neighbors.to_vec1::<u32>()?;
        Ok(centers.into_iter().zip(neighbors).collect())
    }

    /// Check every index against the node count.
    pub fn validate(&self, num_nodes: usize) -> Result<()> {
        let Some((min, max)) = self.bounds else {
            return Ok(());
        };
        if min < 0 {
            return Err(Error::IndexOutOfRange {
                index: min,
                num_nodes,
            });
        }
        // indices past u32 were wrapped by the cast
        if max > i64::from(u32::MAX) || max as u64 >= num_nodes as u64 {
            return Err(Error::IndexOutOfRange {
                index: max,
                num_nodes,
            });
        }
        Ok(())
    }
}

/// Min and max of the raw index tensor, `None` when it is empty.
fn index_bounds(edge_index: &Tensor) -> Result<Option<(i64, i64)>> {
    if edge_index.elem_count() == 0 {
        return Ok(None);
    }
    let flat = edge_index.flatten_all()?;
    if flat.dtype().is_float() {
        let values = flat.to_dtype(DType::F64)?.to_vec1::<f64>()?;
        if let Some(bad) = values.iter().find(|v| v.fract() != 0.0) {
            return Err(Error::InvalidConfig(format!(
                "edge index {bad} is not an integer"
            )));
        }
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        return Ok(Some((min as i64, max as i64)));
    }
    let flat = flat.to_dtype(DType::I64)?;
    let min = flat.min(0)?.to_scalar::<i64>()?;
    let max = flat.max(0)?.to_scalar::<i64>()?;
    Ok(Some((min, max)))
}
