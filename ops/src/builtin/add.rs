use core_types::DataType;
use sable_core::Severity;

use crate::abi::{CustomOp, HostApi};
use crate::error::{OpError, Result};
use crate::kernel::{KernelContext, KernelInfo};
use crate::register_custom_op;

use super::BUILTIN_DOMAIN;


/// Elementwise f32 + f32 -> f32, operands of identical shape
fn add_f32(op: &str, ctx: &mut KernelContext<'_>) -> Result<()> {
    let a = ctx.required_input(0)?;
    let b = ctx.required_input(1)?;
    if a.shape() != b.shape() {
        return Err(OpError::Kernel {
            op: op.to_string(),
            detail: format!("shapes {:?} and {:?} differ", a.shape(), b.shape()),
        });
    }
    if let Ok(logger) = ctx.logger() {
        logger.log(Severity::Verbose, &format!("adding {} elements", a.element_count()), file!(), line!(), op);
    }

    let (lhs, rhs) = (a.as_slice::<f32>()?, b.as_slice::<f32>()?);
    let out = ctx.output(0, a.shape())?.as_mut_slice::<f32>()?;
    for ((o, x), y) in out.iter_mut().zip(lhs).zip(rhs) {
        *o = x + y;
    }
    Ok(())
}


/// “Add” on the host
pub struct AddOp;

impl CustomOp for AddOp {
    const NAME: &'static str = "Add";
    const INPUTS: &'static [DataType] = &[DataType::Float32, DataType::Float32];
    const OUTPUTS: &'static [DataType] = &[DataType::Float32];
    type Kernel = ();

    fn create(_api: &HostApi, _info: &KernelInfo) -> Result<()> {
        Ok(())
    }

    fn compute(_kernel: &(), ctx: &mut KernelContext<'_>) -> Result<()> {
        add_f32(Self::NAME, ctx)
    }
}


/// “Add” on the simulated device, launched on its stream
pub struct SimAddOp;

impl CustomOp for SimAddOp {
    const NAME: &'static str = "Add";
    const PROVIDER: Option<&'static str> = Some("SimExecutionProvider");
    const INPUTS: &'static [DataType] = &[DataType::Float32, DataType::Float32];
    const OUTPUTS: &'static [DataType] = &[DataType::Float32];
    type Kernel = ();

    fn create(_api: &HostApi, _info: &KernelInfo) -> Result<()> {
        Ok(())
    }

    fn compute(_kernel: &(), ctx: &mut KernelContext<'_>) -> Result<()> {
        add_f32(Self::NAME, ctx)
    }
}

register_custom_op!(BUILTIN_DOMAIN, AddOp);
register_custom_op!(BUILTIN_DOMAIN, SimAddOp);
