//! Tensor ops candle does not provide.

use candle_core::{bail, CpuStorage, CustomOp2, Device, Layout, Shape, Tensor};

use crate::Result;

/// Elementwise `atan2(y, x)` with gradients for both arguments.
struct Atan2;

impl CustomOp2 for Atan2 {
    fn name(&self) -> &'static str {
        "atan2"
    }

    fn cpu_fwd(
        &self,
        s1: &CpuStorage,
        l1: &Layout,
        s2: &CpuStorage,
        l2: &Layout,
    ) -> candle_core::Result<(CpuStorage, Shape)> {
        if l1.shape() != l2.shape() {
            bail!("atan2: shape mismatch {:?} vs {:?}", l1.shape(), l2.shape());
        }
        let (Some((y_start, y_end)), Some((x_start, x_end))) =
            (l1.contiguous_offsets(), l2.contiguous_offsets())
        else {
            bail!("atan2: inputs must be contiguous");
        };
        let out = match (s1, s2) {
            (CpuStorage::F32(y), CpuStorage::F32(x)) => CpuStorage::F32(
                y[y_start..y_end]
                    .iter()
                    .zip(&x[x_start..x_end])
                    .map(|(y, x)| y.atan2(*x))
                    .collect(),
            ),
            (CpuStorage::F64(y), CpuStorage::F64(x)) => CpuStorage::F64(
                y[y_start..y_end]
                    .iter()
                    .zip(&x[x_start..x_end])
                    .map(|(y, x)| y.atan2(*x))
                    .collect(),
            ),
            _ => bail!("atan2: only matching f32 or f64 inputs are supported"),
        };
        Ok((out, l1.shape().clone()))
    }

    // d/dy atan2(y, x) = x / (x^2 + y^2),  d/dx atan2(y, x) = -y / (x^2 + y^2)
    fn bwd(
        &self,
        y: &Tensor,
        x: &Tensor,
        _res: &Tensor,
        grad: &Tensor,
    ) -> candle_core::Result<(Option<Tensor>, Option<Tensor>)> {
        let r2 = (y.sqr()? + x.sqr()?)?;
        let grad_y = ((grad * x)? / &r2)?;
        let grad_x = ((grad * y)?.neg()? / &r2)?;
        Ok((Some(grad_y), Some(grad_x)))
    }
}

/// Four-quadrant arctangent of `y / x`, elementwise.
///
/// The kernel is CPU only. Inputs on other devices are copied to the host,
/// evaluated there and copied back; gradients follow the same round trip.
/// At `x = y = 0` the value is `0` and the gradient is undefined.
pub fn atan2(y: &Tensor, x: &Tensor) -> Result<Tensor> {
    let device = y.device();
    if device.is_cpu() {
        let y = y.contiguous()?;
        let x = x.contiguous()?;
        return Ok(y.apply_op2(&x, Atan2)?);
    }
    let y_host = y.to_device(&Device::Cpu)?.contiguous()?;
    let x_host = x.to_device(&Device::Cpu)?.contiguous()?;
    Ok(y_host.apply_op2(&x_host, Atan2)?.to_device(device)?)
}
