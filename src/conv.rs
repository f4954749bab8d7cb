//! Edge-convolution layers.
//!
//! Implements the three message-passing layers the models are built from:
//! - [`EdgeConv`]: generic edge convolution over node features and positions
//! - [`EdgeConvGeom`]: geometry-only layer that emits a per-node context
//! - [`EdgeConvWithCtx`]: edge convolution whose messages carry that context
//!
//! # Message Passing Framework
//!
//! Every layer runs the same fixed routine and only differs in how message
//! inputs and update inputs are assembled:
//!
//! 1. **Gather**: read endpoint data for every edge `(i -> j)`
//! 2. **Message**: `m_ij = msg_net([...])`
//! 3. **Aggregate**: `a_i = AGG_j m_ij` at the center `i` (mean by default)
//! 4. **Update**: `h_i = aggr_net([...])`
//!
//! ```text
//! EdgeConv:        m_ij = msg_net([x_i, x_j, enc(p_j - p_i)])    h_i = aggr_net([x_i, a_i])
//! EdgeConvGeom:    m_ij = msg_net([d_ij, u_ij])                  c_i = aggr_net(a_i)
//! EdgeConvWithCtx: m_ij = msg_net([x_i, x_j - x_i, d_ij, u_ij, c_i])  h_i = aggr_net([a_i, c_i])
//! ```
//!
//! where `d_ij = ‖p_j - p_i‖` and `u_ij = (p_j - p_i) / d_ij`.
//!
//! The networks are any [`Module`]: a `Linear`, an [`Mlp`](crate::nn::Mlp),
//! a `candle_nn::Sequential`, or a plain closure.

use std::fmt;
use std::str::FromStr;

use candle_core::Tensor;
use candle_nn::Module;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::geometry::{EdgeGeometry, ZeroDistance};
use crate::graph::EdgeIndex;
use crate::{Error, Result};

/// Aggregation function for message passing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Sum aggregation: a_i = Σ m_ij
    #[serde(alias = "add")]
    Sum,
    /// Mean aggregation: a_i = (1/|N(i)|) Σ m_ij
    #[default]
    Mean,
    /// Max aggregation: a_i = max_j m_ij (elementwise)
    Max,
}

impl Aggregation {
    /// Reduce per-edge messages (E x M) onto their centers, giving (N x M).
    ///
    /// Nodes with no incident edge get `empty_fill` in every column.
    pub fn reduce(
        self,
        messages: &Tensor,
        edges: &EdgeIndex,
        num_nodes: usize,
        empty_fill: f64,
    ) -> Result<Tensor> {
        edges.validate(num_nodes)?;
        let width = messages.dim(1)?;
        let dtype = messages.dtype();
        let device = messages.device();
        let centers = edges.centers();

        if self == Self::Max {
            let fill_row = Tensor::full(empty_fill, width, device)?.to_dtype(dtype)?;
            let mut buckets = vec![Vec::new(); num_nodes];
            for (edge, center) in centers.to_vec1::<u32>()?.into_iter().enumerate() {
                buckets[center as usize].push(edge as u32);
            }
            let rows = buckets
                .iter()
                .map(|ids| {
                    if ids.is_empty() {
                        Ok(fill_row.clone())
                    } else {
                        let ids = Tensor::new(ids.as_slice(), device)?;
                        messages.index_select(&ids, 0)?.max(0)
                    }
                })
                .collect::<candle_core::Result<Vec<_>>>()?;
            return Ok(Tensor::stack(&rows, 0)?);
        }

        let sums =
            Tensor::zeros((num_nodes, width), dtype, device)?.index_add(centers, messages, 0)?;
        let ones = Tensor::ones((edges.num_edges(), 1), dtype, device)?;
        let counts = Tensor::zeros((num_nodes, 1), dtype, device)?.index_add(centers, &ones, 0)?;

        let reduced = match self {
            Self::Mean => sums.broadcast_div(&counts.maximum(1.0)?)?,
            _ => sums,
        };
        if empty_fill == 0.0 {
            // rows without edges are already zero
            return Ok(reduced);
        }
        let has_edges = counts.gt(0.0)?.broadcast_as((num_nodes, width))?.contiguous()?;
        let fill = Tensor::full(empty_fill, (num_nodes, width), device)?.to_dtype(dtype)?;
        Ok(has_edges.where_cond(&reduced, &fill)?)
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Max => "max",
        })
    }
}

impl FromStr for Aggregation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sum" | "add" => Ok(Self::Sum),
            "mean" => Ok(Self::Mean),
            "max" => Ok(Self::Max),
            other => Err(Error::InvalidConfig(format!("unknown aggregation `{other}`"))),
        }
    }
}

/// How [`EdgeConv`] encodes the neighbor's location relative to the center.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NeighborEncoding {
    /// Relative offset `p_j - p_i` (D columns).
    #[default]
    Position,
    /// Distance `‖p_j - p_i‖` (1 column).
    Distance,
    /// Distance and polar angle `atan2(dy, dx)` (2 columns, 2-D positions only).
    ///
    /// The angle is computed on the host, so on GPU devices every forward
    /// pass copies the offsets to the CPU and back.
    Radial,
}

impl NeighborEncoding {
    /// Columns this encoding appends to a message input.
    pub fn width(self, position_dim: usize) -> usize {
        match self {
            Self::Position => position_dim,
            Self::Distance => 1,
            Self::Radial => 2,
        }
    }

    fn encode(self, geometry: &EdgeGeometry) -> Result<Tensor> {
        match self {
            Self::Position => Ok(geometry.offsets().clone()),
            Self::Distance => Ok(geometry.distances().clone()),
            Self::Radial => Ok(Tensor::cat(&[geometry.distances(), &geometry.angles()?], 1)?),
        }
    }
}

impl fmt::Display for NeighborEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Position => "position",
            Self::Distance => "distance",
            Self::Radial => "radial",
        })
    }
}

impl FromStr for NeighborEncoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "position" => Ok(Self::Position),
            "distance" => Ok(Self::Distance),
            "radial" => Ok(Self::Radial),
            other => Err(Error::InvalidConfig(format!(
                "unknown neighbor encoding `{other}`"
            ))),
        }
    }
}

/// Configuration for [`EdgeConv`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeConvConfig {
    pub aggregation: Aggregation,
    pub neighbor_encoding: NeighborEncoding,
    /// Feed `[x_i, a_i]` instead of `a_i` to the aggregation network.
    pub self_value: bool,
    /// Aggregate given to nodes with no incident edge.
    pub empty_fill: f64,
}

impl Default for EdgeConvConfig {
    fn default() -> Self {
        Self {
            aggregation: Aggregation::Mean,
            neighbor_encoding: NeighborEncoding::Position,
            self_value: true,
            empty_fill: 0.0,
        }
    }
}

impl EdgeConvConfig {
    /// Input width the message network must accept.
    pub fn message_input_width(&self, feature_dim: usize, position_dim: usize) -> usize {
        2 * feature_dim + self.neighbor_encoding.width(position_dim)
    }

    /// Input width the aggregation network must accept, given the message width.
    pub fn update_input_width(&self, feature_dim: usize, message_dim: usize) -> usize {
        if self.self_value {
            feature_dim + message_dim
        } else {
            message_dim
        }
    }
}

/// Configuration shared by [`EdgeConvGeom`] and [`EdgeConvWithCtx`].
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeomConvConfig {
    pub aggregation: Aggregation,
    pub zero_distance: ZeroDistance,
    /// Aggregate given to nodes with no incident edge.
    pub empty_fill: f64,
}

impl GeomConvConfig {
    /// Message input width of [`EdgeConvGeom`]: `[d, u]`.
    pub fn geometric_input_width(position_dim: usize) -> usize {
        1 + position_dim
    }

    /// Message input width of [`EdgeConvWithCtx`]: `[x_i, x_j - x_i, d, u, c_i]`.
    pub fn context_input_width(
        feature_dim: usize,
        position_dim: usize,
        context_dim: usize,
    ) -> usize {
        2 * feature_dim + 1 + position_dim + context_dim
    }
}

/// One gather/message/aggregate/update pass over an edge list.
struct Propagation<'a> {
    edges: &'a EdgeIndex,
    num_nodes: usize,
    aggregation: Aggregation,
    empty_fill: f64,
}

impl Propagation<'_> {
    /// Run the pass.
    ///
    /// `message_input` builds the (E x `input_width`) message inputs and is
    /// only called when there is at least one edge. `update_input` turns the
    /// (N x M) aggregate into the aggregation network's input.
    fn run<M, U, B, P>(
        &self,
        message_net: &M,
        aggregation_net: &U,
        like: &Tensor,
        input_width: usize,
        message_input: B,
        update_input: P,
    ) -> Result<Tensor>
    where
        M: Module,
        U: Module,
        B: FnOnce() -> Result<Tensor>,
        P: FnOnce(Tensor) -> Result<Tensor>,
    {
        trace!(
            nodes = self.num_nodes,
            edges = self.edges.num_edges(),
            aggregation = %self.aggregation,
            "propagate"
        );
        let aggregated = if self.edges.is_empty() {
            // No messages, but the aggregate still needs the message width.
            let probe = Tensor::zeros((1, input_width), like.dtype(), like.device())?;
            let width = message_net.forward(&probe)?.dim(1)?;
            Tensor::full(self.empty_fill, (self.num_nodes, width), like.device())?
                .to_dtype(like.dtype())?
        } else {
            let inputs = message_input()?;
            let messages = message_net.forward(&inputs)?;
            self.aggregation
                .reduce(&messages, self.edges, self.num_nodes, self.empty_fill)?
        };
        Ok(aggregation_net.forward(&update_input(aggregated)?)?)
    }
}

/// Node features as an (N x F) matrix; a flat (N,) vector becomes (N x 1).
fn node_matrix(x: &Tensor) -> Result<Tensor> {
    match x.rank() {
        1 => Ok(x.unsqueeze(1)?),
        2 => Ok(x.clone()),
        got => Err(Error::ShapeMismatch {
            what: "feature rank",
            expected: 2,
            got,
        }),
    }
}

/// Node count and position dimension of an (N x D) position matrix.
fn position_dims(positions: &Tensor) -> Result<(usize, usize)> {
    match positions.dims() {
        &[n, d] => Ok((n, d)),
        dims => Err(Error::ShapeMismatch {
            what: "position rank",
            expected: 2,
            got: dims.len(),
        }),
    }
}

fn check_rows(what: &'static str, t: &Tensor, num_nodes: usize) -> Result<()> {
    let got = t.dim(0)?;
    if got != num_nodes {
        return Err(Error::ShapeMismatch {
            what,
            expected: num_nodes,
            got,
        });
    }
    Ok(())
}

/// Generic edge convolution.
///
/// For every edge `(i -> j)` under the target-to-source flow:
///
/// ```text
/// m_ij = msg_net([x_i, x_j, enc(p_j - p_i)])
/// a_i  = AGG_j m_ij
/// h_i  = aggr_net([x_i, a_i])      (self_value = true)
/// h_i  = aggr_net(a_i)             (self_value = false)
/// ```
#[derive(Debug, Clone)]
pub struct EdgeConv<M, U> {
    message_net: M,
    aggregation_net: U,
    config: EdgeConvConfig,
}

impl<M: Module, U: Module> EdgeConv<M, U> {
    /// Create a new edge convolution.
    ///
    /// # Arguments
    /// - `message_net`: maps (E x [`EdgeConvConfig::message_input_width`]) to (E x M)
    /// - `aggregation_net`: maps (N x [`EdgeConvConfig::update_input_width`]) to (N x out)
    /// - `config`: reducer, neighbor encoding, self value, empty fill
    pub fn new(message_net: M, aggregation_net: U, config: EdgeConvConfig) -> Self {
        Self {
            message_net,
            aggregation_net,
            config,
        }
    }

    pub fn config(&self) -> &EdgeConvConfig {
        &self.config
    }

    pub fn message_net(&self) -> &M {
        &self.message_net
    }

    pub fn aggregation_net(&self) -> &U {
        &self.aggregation_net
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// - `x`: Node features (N x F), or (N,) for scalar fields
    /// - `edges`: Edge index; row 0 aggregates, row 1 supplies data
    /// - `positions`: Node positions (N x D)
    ///
    /// # Returns
    /// - Updated node features (N x out)
    pub fn forward(&self, x: &Tensor, edges: &EdgeIndex, positions: &Tensor) -> Result<Tensor> {
        let x = node_matrix(x)?;
        let (num_nodes, position_dim) = position_dims(positions)?;
        check_rows("node features", &x, num_nodes)?;
        edges.validate(num_nodes)?;
        if self.config.neighbor_encoding == NeighborEncoding::Radial && position_dim != 2 {
            return Err(Error::InvalidConfig(format!(
                "radial encoding needs 2-D positions, got {position_dim}-D"
            )));
        }

        let feature_dim = x.dim(1)?;
        let propagation = Propagation {
            edges,
            num_nodes,
            aggregation: self.config.aggregation,
            empty_fill: self.config.empty_fill,
        };
        propagation.run(
            &self.message_net,
            &self.aggregation_net,
            &x,
            self.config.message_input_width(feature_dim, position_dim),
            || {
                let x_i = x.index_select(edges.centers(), 0)?;
                let x_j = x.index_select(edges.neighbors(), 0)?;
                let geometry = EdgeGeometry::new(positions, edges)?;
                let encoded = self.config.neighbor_encoding.encode(&geometry)?;
                Ok(Tensor::cat(&[&x_i, &x_j, &encoded], 1)?)
            },
            |aggregated| {
                if self.config.self_value {
                    Ok(Tensor::cat(&[&x, &aggregated], 1)?)
                } else {
                    Ok(aggregated)
                }
            },
        )
    }
}

impl<M, U> fmt::Display for EdgeConv<M, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EdgeConv(msg_nn={}, aggr_nn={}, aggr={}, neighbor={}, self_value={})",
            std::any::type_name::<M>(),
            std::any::type_name::<U>(),
            self.config.aggregation,
            self.config.neighbor_encoding,
            self.config.self_value,
        )
    }
}

/// Geometry-only edge convolution producing a context vector per node.
///
/// ```text
/// m_ij = msg_net([d_ij, u_ij])
/// c_i  = aggr_net(AGG_j m_ij)
/// ```
#[derive(Debug, Clone)]
pub struct EdgeConvGeom<M, U> {
    message_net: M,
    aggregation_net: U,
    config: GeomConvConfig,
}

impl<M: Module, U: Module> EdgeConvGeom<M, U> {
    pub fn new(message_net: M, aggregation_net: U, config: GeomConvConfig) -> Self {
        Self {
            message_net,
            aggregation_net,
            config,
        }
    }

    pub fn config(&self) -> &GeomConvConfig {
        &self.config
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// - `edges`: Edge index; row 0 aggregates, row 1 supplies data
    /// - `positions`: Node positions (N x D)
    ///
    /// # Returns
    /// - Context vectors (N x C)
    pub fn forward(&self, edges: &EdgeIndex, positions: &Tensor) -> Result<Tensor> {
        let (num_nodes, position_dim) = position_dims(positions)?;
        edges.validate(num_nodes)?;

        let propagation = Propagation {
            edges,
            num_nodes,
            aggregation: self.config.aggregation,
            empty_fill: self.config.empty_fill,
        };
        propagation.run(
            &self.message_net,
            &self.aggregation_net,
            positions,
            GeomConvConfig::geometric_input_width(position_dim),
            || {
                let geometry = EdgeGeometry::new(positions, edges)?;
                let directions = geometry.unit_directions(self.config.zero_distance, edges)?;
                Ok(Tensor::cat(&[geometry.distances(), &directions], 1)?)
            },
            Ok,
        )
    }
}

impl<M, U> fmt::Display for EdgeConvGeom<M, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EdgeConvGeom(msg_nn={}, aggr_nn={}, aggr={})",
            std::any::type_name::<M>(),
            std::any::type_name::<U>(),
            self.config.aggregation,
        )
    }
}

/// Edge convolution whose messages and updates carry a per-node context.
///
/// ```text
/// m_ij = msg_net([x_i, x_j - x_i, d_ij, u_ij, c_i])
/// h_i  = aggr_net([AGG_j m_ij, c_i])
/// ```
#[derive(Debug, Clone)]
pub struct EdgeConvWithCtx<M, U> {
    message_net: M,
    aggregation_net: U,
    config: GeomConvConfig,
}

impl<M: Module, U: Module> EdgeConvWithCtx<M, U> {
    pub fn new(message_net: M, aggregation_net: U, config: GeomConvConfig) -> Self {
        Self {
            message_net,
            aggregation_net,
            config,
        }
    }

    pub fn config(&self) -> &GeomConvConfig {
        &self.config
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// - `x`: Node features (N x F), or (N,) for scalar fields
    /// - `edges`: Edge index; row 0 aggregates, row 1 supplies data
    /// - `positions`: Node positions (N x D)
    /// - `context`: Per-node context (N x C), typically from [`EdgeConvGeom`]
    ///
    /// # Returns
    /// - Updated node features (N x out)
    pub fn forward(
        &self,
        x: &Tensor,
        edges: &EdgeIndex,
        positions: &Tensor,
        context: &Tensor,
    ) -> Result<Tensor> {
        let x = node_matrix(x)?;
        let context = node_matrix(context)?;
        let (num_nodes, position_dim) = position_dims(positions)?;
        check_rows("node features", &x, num_nodes)?;
        check_rows("context", &context, num_nodes)?;
        edges.validate(num_nodes)?;

        let input_width =
            GeomConvConfig::context_input_width(x.dim(1)?, position_dim, context.dim(1)?);
        let propagation = Propagation {
            edges,
            num_nodes,
            aggregation: self.config.aggregation,
            empty_fill: self.config.empty_fill,
        };
        propagation.run(
            &self.message_net,
            &self.aggregation_net,
            &x,
            input_width,
            || {
                let x_i = x.index_select(edges.centers(), 0)?;
                let x_j = x.index_select(edges.neighbors(), 0)?;
                let ctx_i = context.index_select(edges.centers(), 0)?;
                let geometry = EdgeGeometry::new(positions, edges)?;
                let directions = geometry.unit_directions(self.config.zero_distance, edges)?;
                let delta = (&x_j - &x_i)?;
                Ok(Tensor::cat(
                    &[&x_i, &delta, geometry.distances(), &directions, &ctx_i],
                    1,
                )?)
            },
            |aggregated| Ok(Tensor::cat(&[&aggregated, &context], 1)?),
        )
    }
}

impl<M, U> fmt::Display for EdgeConvWithCtx<M, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EdgeConvWithCtx(msg_nn={}, aggr_nn={}, aggr={})",
            std::any::type_name::<M>(),
            std::any::type_name::<U>(),
            self.config.aggregation,
        )
    }
}
