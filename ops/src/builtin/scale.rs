use core_types::DataType;

use crate::abi::{CustomOp, HostApi};
use crate::error::{OpError, Result};
use crate::kernel::{KernelContext, KernelInfo};
use crate::register_custom_op;

use super::BUILTIN_DOMAIN;

/// Multiplies a f32 tensor by the `alpha` attribute (1.0 when absent).
pub struct ScaleOp;

pub struct ScaleKernel {
    alpha: f32,
}

impl CustomOp for ScaleOp {
    const NAME: &'static str = "Scale";
    const INPUTS: &'static [DataType] = &[DataType::Float32];
    const OUTPUTS: &'static [DataType] = &[DataType::Float32];
    type Kernel = ScaleKernel;

    fn create(_api: &HostApi, info: &KernelInfo) -> Result<ScaleKernel> {
        let alpha = match info.attribute_f32("alpha") {
            Err(OpError::AttributeNotFound(_)) => 1.0,
            other => other?,
        };
        Ok(ScaleKernel { alpha })
    }

    fn compute(kernel: &ScaleKernel, ctx: &mut KernelContext<'_>) -> Result<()> {
        let x = ctx.required_input(0)?;
        let input = x.as_slice::<f32>()?;
        let out = ctx.output(0, x.shape())?.as_mut_slice::<f32>()?;
        for (o, v) in out.iter_mut().zip(input) {
            *o = v * kernel.alpha;
        }
        Ok(())
    }
}

register_custom_op!(BUILTIN_DOMAIN, ScaleOp);
