use core_types::DataType;

use crate::abi::{CustomOp, HostApi};
use crate::error::Result;
use crate::kernel::{KernelContext, KernelInfo};
use crate::register_custom_op;

use super::BUILTIN_DOMAIN;

fn forward(ctx: &mut KernelContext<'_>) -> Result<()> {
    let x = ctx.required_input(0)?.clone();
    ctx.set_output(0, x)
}

/// Copies its input, whatever the element type.
pub struct IdentityOp;

impl CustomOp for IdentityOp {
    const NAME: &'static str = "Identity";
    const INPUTS: &'static [DataType] = &[DataType::Undefined];
    const OUTPUTS: &'static [DataType] = &[DataType::Undefined];
    type Kernel = ();

    fn create(_api: &HostApi, _info: &KernelInfo) -> Result<()> {
        Ok(())
    }

    fn compute(_kernel: &(), ctx: &mut KernelContext<'_>) -> Result<()> {
        forward(ctx)
    }
}

pub struct SimIdentityOp;

impl CustomOp for SimIdentityOp {
    const NAME: &'static str = "Identity";
    const PROVIDER: Option<&'static str> = Some("SimExecutionProvider");
    const INPUTS: &'static [DataType] = &[DataType::Undefined];
    const OUTPUTS: &'static [DataType] = &[DataType::Undefined];
    type Kernel = ();

    fn create(_api: &HostApi, _info: &KernelInfo) -> Result<()> {
        Ok(())
    }

    fn compute(_kernel: &(), ctx: &mut KernelContext<'_>) -> Result<()> {
        forward(ctx)
    }
}

register_custom_op!(BUILTIN_DOMAIN, IdentityOp);
register_custom_op!(BUILTIN_DOMAIN, SimIdentityOp);
