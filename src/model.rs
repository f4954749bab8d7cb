//! Composite models for learning PDE dynamics.
//!
//! - [`MpnnModel`]: a single [`EdgeConv`] layer (mean, position encoding,
//!   self value included). Maps node state to its update directly.
//! - [`M3Model`]: an [`EdgeConvGeom`] layer computes a geometric context per
//!   node from the mesh alone, then an [`EdgeConvWithCtx`] layer uses it to
//!   update the node state.
//!
//! ```text
//! MPNN:  x, E, p ──EdgeConv──────────────────────────────▶ dx/dt
//! M3:       E, p ──EdgeConvGeom──▶ c
//!        x, E, p, c ──EdgeConvWithCtx───────────────────▶ dx/dt
//! ```
//!
//! Both models accept the edge index as a raw tensor of any integer dtype and
//! coerce it before propagating. Callers that reuse one graph across many
//! forward calls can build an [`EdgeIndex`] once and use `forward_edges`.

use candle_core::Tensor;
use candle_nn::{Module, VarBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::conv::{
    Aggregation, EdgeConv, EdgeConvConfig, EdgeConvGeom, EdgeConvWithCtx, GeomConvConfig,
    NeighborEncoding,
};
use crate::geometry::ZeroDistance;
use crate::graph::EdgeIndex;
use crate::nn::{Mlp, MlpConfig};
use crate::Result;

/// Sizes for building an [`MpnnModel`] out of [`Mlp`]s.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MpnnConfig {
    /// State channels per node (F).
    pub feature_dim: usize,
    /// Spatial dimension (D).
    pub position_dim: usize,
    /// Message width (M).
    pub message_dim: usize,
    /// Output channels per node.
    pub out_dim: usize,
    pub mlp: MlpConfig,
}

impl Default for MpnnConfig {
    fn default() -> Self {
        Self {
            feature_dim: 1,
            position_dim: 2,
            message_dim: 64,
            out_dim: 1,
            mlp: MlpConfig::default(),
        }
    }
}

/// Single-layer message-passing model.
#[derive(Debug, Clone)]
pub struct MpnnModel<M, U> {
    layer: EdgeConv<M, U>,
}

impl<M: Module, U: Module> MpnnModel<M, U> {
    /// Layer configuration used by this model.
    pub fn layer_config() -> EdgeConvConfig {
        EdgeConvConfig {
            aggregation: Aggregation::Mean,
            neighbor_encoding: NeighborEncoding::Position,
            self_value: true,
            empty_fill: 0.0,
        }
    }

    pub fn new(message_net: M, aggregation_net: U) -> Self {
        Self {
            layer: EdgeConv::new(message_net, aggregation_net, Self::layer_config()),
        }
    }

    pub fn layer(&self) -> &EdgeConv<M, U> {
        &self.layer
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// - `x`: Node state (N x F), or (N,)
    /// - `edge_index`: (2 x E) tensor of any integer dtype
    /// - `positions`: Node positions (N x D)
    #[instrument(level = "debug", skip_all)]
    pub fn forward(&self, x: &Tensor, edge_index: &Tensor, positions: &Tensor) -> Result<Tensor> {
        let edges = EdgeIndex::new(edge_index)?;
        self.forward_edges(x, &edges, positions)
    }

    /// Forward pass over a prebuilt edge index.
    pub fn forward_edges(
        &self,
        x: &Tensor,
        edges: &EdgeIndex,
        positions: &Tensor,
    ) -> Result<Tensor> {
        let out = self.layer.forward(x, edges, positions)?;
        let nodes = out.dim(0)?;
        debug!(nodes, edges = edges.num_edges(), "mpnn forward");
        Ok(out)
    }
}

impl MpnnModel<Mlp, Mlp> {
    /// Build the message and aggregation MLPs from a config.
    ///
    /// Parameters live under `msg_net.*` and `aggr_net.*` in `vb`.
    pub fn from_config(config: &MpnnConfig, vb: VarBuilder) -> Result<Self> {
        let layer = Self::layer_config();
        let message_net = Mlp::from_config(
            layer.message_input_width(config.feature_dim, config.position_dim),
            config.message_dim,
            &config.mlp,
            vb.pp("msg_net"),
        )?;
        let aggregation_net = Mlp::from_config(
            layer.update_input_width(config.feature_dim, config.message_dim),
            config.out_dim,
            &config.mlp,
            vb.pp("aggr_net"),
        )?;
        Ok(Self::new(message_net, aggregation_net))
    }
}

/// Sizes for building an [`M3Model`] out of [`Mlp`]s.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct M3Config {
    /// State channels per node (F).
    pub feature_dim: usize,
    /// Spatial dimension (D).
    pub position_dim: usize,
    /// Width of the geometric context (C).
    pub context_dim: usize,
    /// Message width of both layers (M).
    pub message_dim: usize,
    /// Output channels per node.
    pub out_dim: usize,
    pub zero_distance: ZeroDistance,
    pub mlp: MlpConfig,
}

impl Default for M3Config {
    fn default() -> Self {
        Self {
            feature_dim: 1,
            position_dim: 2,
            context_dim: 16,
            message_dim: 64,
            out_dim: 1,
            zero_distance: ZeroDistance::Error,
            mlp: MlpConfig::default(),
        }
    }
}

/// Two-layer model: geometric context, then context-aware convolution.
#[derive(Debug, Clone)]
pub struct M3Model<M1, U1, M2, U2> {
    geometric: EdgeConvGeom<M1, U1>,
    context: EdgeConvWithCtx<M2, U2>,
}

impl<M1, U1, M2, U2> M3Model<M1, U1, M2, U2>
where
    M1: Module,
    U1: Module,
    M2: Module,
    U2: Module,
{
    /// Create the model with mean aggregation and fail-fast zero distances.
    pub fn new(
        l1_message_net: M1,
        l1_aggregation_net: U1,
        l2_message_net: M2,
        l2_aggregation_net: U2,
    ) -> Self {
        let config = GeomConvConfig::default();
        Self::from_layers(
            EdgeConvGeom::new(l1_message_net, l1_aggregation_net, config),
            EdgeConvWithCtx::new(l2_message_net, l2_aggregation_net, config),
        )
    }

    pub fn from_layers(
        geometric: EdgeConvGeom<M1, U1>,
        context: EdgeConvWithCtx<M2, U2>,
    ) -> Self {
        Self { geometric, context }
    }

    pub fn geometric(&self) -> &EdgeConvGeom<M1, U1> {
        &self.geometric
    }

    pub fn context(&self) -> &EdgeConvWithCtx<M2, U2> {
        &self.context
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// - `x`: Node state (N x F), or (N,)
    /// - `edge_index`: (2 x E) tensor of any integer dtype
    /// - `positions`: Node positions (N x D)
    #[instrument(level = "debug", skip_all)]
    pub fn forward(&self, x: &Tensor, edge_index: &Tensor, positions: &Tensor) -> Result<Tensor> {
        let edges = EdgeIndex::new(edge_index)?;
        self.forward_edges(x, &edges, positions)
    }

    /// Forward pass over a prebuilt edge index.
    pub fn forward_edges(
        &self,
        x: &Tensor,
        edges: &EdgeIndex,
        positions: &Tensor,
    ) -> Result<Tensor> {
        let context = self.geometric.forward(edges, positions)?;
        let out = self.context.forward(x, edges, positions, &context)?;
        let (nodes, context_dim) = (out.dim(0)?, context.dim(1)?);
        debug!(nodes, context_dim, edges = edges.num_edges(), "m3 forward");
        Ok(out)
    }
}

impl M3Model<Mlp, Mlp, Mlp, Mlp> {
    /// Build all four MLPs from a config.
    ///
    /// Parameters live under `l1.msg_net.*`, `l1.aggr_net.*`, `l2.msg_net.*`
    /// and `l2.aggr_net.*` in `vb`.
    pub fn from_config(config: &M3Config, vb: VarBuilder) -> Result<Self> {
        config.zero_distance.validate()?;
        let layer = GeomConvConfig {
            zero_distance: config.zero_distance,
            ..Default::default()
        };

        let l1 = vb.pp("l1");
        let l1_message_net = Mlp::from_config(
            GeomConvConfig::geometric_input_width(config.position_dim),
            config.message_dim,
            &config.mlp,
            l1.pp("msg_net"),
        )?;
        let l1_aggregation_net = Mlp::from_config(
            config.message_dim,
            config.context_dim,
            &config.mlp,
            l1.pp("aggr_net"),
        )?;

        let l2 = vb.pp("l2");
        let l2_message_net = Mlp::from_config(
            GeomConvConfig::context_input_width(
                config.feature_dim,
                config.position_dim,
                config.context_dim,
            ),
            config.message_dim,
            &config.mlp,
            l2.pp("msg_net"),
        )?;
        let l2_aggregation_net = Mlp::from_config(
            config.message_dim + config.context_dim,
            config.out_dim,
            &config.mlp,
            l2.pp("aggr_net"),
        )?;

        Ok(Self::from_layers(
            EdgeConvGeom::new(l1_message_net, l1_aggregation_net, layer),
            EdgeConvWithCtx::new(l2_message_net, l2_aggregation_net, layer),
        ))
    }
}
