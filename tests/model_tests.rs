//! End-to-end tests for the composite models.

use advecta::{
    EdgeConvGeom, EdgeConvWithCtx, EdgeIndex, GeomConvConfig, M3Config, M3Model, Mlp, MlpConfig,
    MpnnConfig, MpnnModel, ZeroDistance,
};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};

fn identity(xs: &Tensor) -> candle_core::Result<Tensor> {
    Ok(xs.clone())
}

/// 4x4 lattice with every node linked to its right and upper neighbors, both ways.
fn lattice(device: &Device) -> (Tensor, Tensor) {
    let side = 4u32;
    let mut coords = Vec::new();
    let mut src = Vec::new();
    let mut dst = Vec::new();
    for row in 0..side {
        for col in 0..side {
            let id = row * side + col;
            coords.push(col as f32 * 0.25);
            coords.push(row as f32 * 0.25);
            if col + 1 < side {
                src.extend([id, id + 1]);
                dst.extend([id + 1, id]);
            }
            if row + 1 < side {
                src.extend([id, id + side]);
                dst.extend([id + side, id]);
            }
        }
    }
    let num_edges = src.len();
    src.extend(dst);
    let pos = Tensor::from_vec(coords, ((side * side) as usize, 2), device).unwrap();
    let edge_index = Tensor::from_vec(src, (2, num_edges), device).unwrap();
    (pos, edge_index)
}

#[test]
fn test_mpnn_identity_scenario() {
    let device = Device::Cpu;
    let model = MpnnModel::new(identity, identity);

    let x = Tensor::new(&[1.0f32, 2.0, 3.0], &device).unwrap();
    let pos = Tensor::new(&[[0.0f32, 0.0], [1.0, 0.0], [0.0, 1.0]], &device).unwrap();
    // i64 edge index, as a data loader would hand it over
    let edge_index = Tensor::new(&[[0i64, 0], [1, 2]], &device).unwrap();

    let rows = model
        .forward(&x, &edge_index, &pos)
        .unwrap()
        .to_vec2::<f32>()
        .unwrap();
    assert_eq!(rows[0], vec![1.0, 1.0, 2.5, 0.5, 0.5]);
    assert_eq!(rows[1], vec![2.0, 0.0, 0.0, 0.0, 0.0]);
    assert_eq!(rows[2], vec![3.0, 0.0, 0.0, 0.0, 0.0]);
}

#[test]
fn test_mpnn_gradients_reach_every_parameter() {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = MpnnModel::from_config(&MpnnConfig::default(), vb).unwrap();

    let (pos, edge_index) = lattice(&device);
    let x = Tensor::randn(0f32, 1f32, 16, &device).unwrap();

    let loss = model
        .forward(&x, &edge_index, &pos)
        .unwrap()
        .sqr()
        .unwrap()
        .mean_all()
        .unwrap();
    let grads = loss.backward().unwrap();

    let vars = varmap.all_vars();
    assert_eq!(vars.len(), 8);
    for var in &vars {
        assert!(grads.get(var.as_tensor()).is_some());
    }
}

#[test]
fn test_m3_matches_manual_chaining() {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

    let config = M3Config {
        context_dim: 4,
        message_dim: 8,
        mlp: MlpConfig {
            hidden: vec![16],
            ..Default::default()
        },
        ..Default::default()
    };
    let model = M3Model::from_config(&config, vb).unwrap();

    let (pos, edge_index) = lattice(&device);
    let x = Tensor::randn(0f32, 1f32, 16, &device).unwrap();
    let out = model.forward(&x, &edge_index, &pos).unwrap();

    let edges = EdgeIndex::new(&edge_index).unwrap();
    let context = model.geometric().forward(&edges, &pos).unwrap();
    let manual = model.context().forward(&x, &edges, &pos, &context).unwrap();

    assert_eq!(out.dims(), &[16, 1]);
    assert_eq!(
        out.to_vec2::<f32>().unwrap(),
        manual.to_vec2::<f32>().unwrap()
    );
}

#[test]
fn test_m3_identity_scenario() {
    let device = Device::Cpu;
    let model = M3Model::new(identity, identity, identity, identity);

    let x = Tensor::new(&[1.0f32, 2.0, 3.0], &device).unwrap();
    let pos = Tensor::new(&[[0.0f32, 0.0], [1.0, 0.0], [0.0, 1.0]], &device).unwrap();
    let edge_index = Tensor::new(&[[0u32, 0], [1, 2]], &device).unwrap();

    let rows = model
        .forward(&x, &edge_index, &pos)
        .unwrap()
        .to_vec2::<f32>()
        .unwrap();
    // context of node 0 is mean([1, 1, 0], [1, 0, 1]) = [1, 0.5, 0.5]
    assert_eq!(
        rows[0],
        vec![1.0, 1.5, 1.0, 0.5, 0.5, 1.0, 0.5, 0.5, 1.0, 0.5, 0.5]
    );
    assert_eq!(rows[2], vec![0.0; 11]);
}

#[test]
fn test_m3_without_edges() {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = M3Model::from_config(&M3Config::default(), vb).unwrap();

    let x = Tensor::randn(0f32, 1f32, 7, &device).unwrap();
    let pos = Tensor::randn(0f32, 1f32, (7, 2), &device).unwrap();
    let edge_index = Tensor::zeros((2, 0), DType::I64, &device).unwrap();

    let out = model.forward(&x, &edge_index, &pos).unwrap();
    assert_eq!(out.dims(), &[7, 1]);
}

#[test]
fn test_m3_coincident_nodes() {
    let device = Device::Cpu;
    let x = Tensor::new(&[1.0f32, 2.0], &device).unwrap();
    let pos = Tensor::new(&[[0.5f32, 0.5], [0.5, 0.5]], &device).unwrap();
    let edge_index = Tensor::new(&[[0u32], [1]], &device).unwrap();

    let strict = M3Model::new(identity, identity, identity, identity);
    assert!(matches!(
        strict.forward(&x, &edge_index, &pos),
        Err(advecta::Error::DivisionSingularity {
            edge: 0,
            center: 0,
            neighbor: 1
        })
    ));

    let config = GeomConvConfig {
        zero_distance: ZeroDistance::Clamp(1e-9),
        ..Default::default()
    };
    let lenient = M3Model::from_layers(
        EdgeConvGeom::new(identity, identity, config),
        EdgeConvWithCtx::new(identity, identity, config),
    );
    let out = lenient.forward(&x, &edge_index, &pos).unwrap();
    assert_eq!(out.dims(), &[2, 11]);
}

#[test]
fn test_concurrent_forward() {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model: MpnnModel<Mlp, Mlp> = MpnnModel::from_config(&MpnnConfig::default(), vb).unwrap();

    let (pos, edge_index) = lattice(&device);
    let x = Tensor::randn(0f32, 1f32, 16, &device).unwrap();
    let expected = model
        .forward(&x, &edge_index, &pos)
        .unwrap()
        .to_vec2::<f32>()
        .unwrap();

    std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| s.spawn(|| model.forward(&x, &edge_index, &pos).unwrap()))
            .collect();
        for handle in handles {
            let out = handle.join().unwrap().to_vec2::<f32>().unwrap();
            assert_eq!(out, expected);
        }
    });
}

#[test]
fn test_mpnn_rejects_indices_that_would_wrap() {
    let device = Device::Cpu;
    let model = MpnnModel::new(identity, identity);
    let x = Tensor::new(&[1.0f32, 2.0, 3.0], &device).unwrap();
    let pos = Tensor::new(&[[0.0f32, 0.0], [1.0, 0.0], [0.0, 1.0]], &device).unwrap();

    let negative = Tensor::new(&[[0.0f32], [-1.0]], &device).unwrap();
    assert!(matches!(
        model.forward(&x, &negative, &pos),
        Err(advecta::Error::IndexOutOfRange { index: -1, num_nodes: 3 })
    ));

    let wide = Tensor::new(&[[0i64], [4_294_967_298]], &device).unwrap();
    assert!(matches!(
        model.forward(&x, &wide, &pos),
        Err(advecta::Error::IndexOutOfRange {
            index: 4_294_967_298,
            num_nodes: 3
        })
    ));
}
