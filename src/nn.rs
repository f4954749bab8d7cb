//! Feed-forward networks for the message and aggregation slots.
//!
//! Any [`Module`] can be injected into a layer; [`Mlp`] is the one the
//! config-driven model constructors build.

use candle_core::Tensor;
use candle_nn::{linear, Linear, Module, VarBuilder};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Nonlinearity applied between MLP layers (never after the last one).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Relu,
    Tanh,
    Silu,
    Gelu,
}

impl Activation {
    pub fn apply(self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Self::Relu => xs.relu(),
            Self::Tanh => xs.tanh(),
            Self::Silu => xs.silu(),
            Self::Gelu => xs.gelu(),
        }
    }
}

/// Hidden layout of an [`Mlp`]; input and output widths come from the layer
/// the network is built for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MlpConfig {
    pub hidden: Vec<usize>,
    pub activation: Activation,
}

impl Default for MlpConfig {
    fn default() -> Self {
        Self {
            hidden: vec![64],
            activation: Activation::Relu,
        }
    }
}

/// Multi-layer perceptron: Linear → act → ... → Linear.
#[derive(Debug, Clone)]
pub struct Mlp {
    layers: Vec<Linear>,
    activation: Activation,
    input_dim: usize,
    output_dim: usize,
}

impl Mlp {
    /// Create an MLP through the given widths.
    ///
    /// # Arguments
    /// - `dims`: `[in, hidden.., out]`, at least two entries, all non-zero
    /// - `activation`: applied after every layer but the last
    /// - `vb`: Variable builder; layers live under `lin_0`, `lin_1`, ...
    pub fn new(dims: &[usize], activation: Activation, vb: VarBuilder) -> Result<Self> {
        if dims.len() < 2 {
            return Err(Error::InvalidConfig(format!(
                "mlp needs at least input and output widths, got {dims:?}"
            )));
        }
        if dims.contains(&0) {
            return Err(Error::InvalidConfig(format!(
                "mlp widths must be non-zero, got {dims:?}"
            )));
        }
        let layers = dims
            .windows(2)
            .enumerate()
            .map(|(i, w)| linear(w[0], w[1], vb.pp(format!("lin_{i}"))))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self {
            layers,
            activation,
            input_dim: dims[0],
            output_dim: dims[dims.len() - 1],
        })
    }

    /// Create an MLP from `input_dim` to `output_dim` with the configured hidden layers.
    pub fn from_config(
        input_dim: usize,
        output_dim: usize,
        config: &MlpConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        let mut dims = Vec::with_capacity(config.hidden.len() + 2);
        dims.push(input_dim);
        dims.extend_from_slice(&config.hidden);
        dims.push(output_dim);
        Self::new(&dims, config.activation, vb)
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}

impl Module for Mlp {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let last = self.layers.len() - 1;
        let mut h = xs.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            h = layer.forward(&h)?;
            if i < last {
                h = self.activation.apply(&h)?;
            }
        }
        Ok(h)
    }
}
