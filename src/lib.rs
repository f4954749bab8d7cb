#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::float_cmp)]

//! Message-passing graph neural networks for PDE dynamics on point sets.
//!
//! `advecta` learns the right-hand side of a PDE on an unstructured mesh:
//! nodes carry a state `x` and a position `p`, a fixed neighbor graph links
//! them, and message-passing layers turn `(x, E, p)` into a per-node update
//! (a time derivative or the next state). Time stepping, losses and
//! optimizers belong to the caller.
//!
//! Built on `candle` tensors, so every forward pass is differentiable with
//! respect to the parameters of the injected networks.
//!
//! # Modules
//!
//! - [`graph`]: `(2, E)` edge index under the target-to-source flow convention
//! - [`geometry`]: per-edge offsets, distances, unit directions, angles
//! - [`conv`]: edge convolutions ([`EdgeConv`], [`EdgeConvGeom`], [`EdgeConvWithCtx`])
//! - [`model`]: composite models ([`MpnnModel`], [`M3Model`])
//! - [`nn`]: [`Mlp`] for the message and aggregation slots
//! - [`ops`]: differentiable `atan2`
//!
//! # Example: M3 Forward Pass
//!
//! ```rust
//! use advecta::{M3Config, M3Model};
//! use candle_core::{DType, Device, Tensor};
//! use candle_nn::{VarBuilder, VarMap};
//!
//! # fn main() -> advecta::Result<()> {
//! let device = Device::Cpu;
//! let varmap = VarMap::new();
//! let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
//!
//! let model = M3Model::from_config(&M3Config::default(), vb)?;
//!
//! // unit square, every corner aggregates from its two sides
//! let x = Tensor::new(&[0.1f32, 0.4, 0.9, 0.3], &device)?;
//! let pos = Tensor::new(&[[0.0f32, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]], &device)?;
//! let edge_index = Tensor::new(
//!     &[[0u32, 0, 1, 1, 2, 2, 3, 3], [1, 3, 0, 2, 1, 3, 0, 2]],
//!     &device,
//! )?;
//!
//! let dxdt = model.forward(&x, &edge_index, &pos)?;
//! assert_eq!(dxdt.dims(), &[4, 1]);
//! # Ok(())
//! # }
//! ```

pub mod conv;
pub mod error;
pub mod geometry;
pub mod graph;
pub mod model;
pub mod nn;
pub mod ops;

pub use conv::{
    Aggregation, EdgeConv, EdgeConvConfig, EdgeConvGeom, EdgeConvWithCtx, GeomConvConfig,
    NeighborEncoding,
};
pub use error::{Error, Result};
pub use geometry::{EdgeGeometry, ZeroDistance};
pub use graph::EdgeIndex;
pub use model::{M3Config, M3Model, MpnnConfig, MpnnModel};
pub use nn::{Activation, Mlp, MlpConfig};
