use crate::abi::{HostApi, KernelState, OperatorDescriptor};
use crate::error::{OpError, Result};
use crate::kernel::{KernelContext, KernelInfo};


/// A kernel instance bound to one node.
pub trait OpKernel: Send + Sync {
    fn compute(&self, ctx: &mut KernelContext<'_>) -> Result<()>;
}


/// Host-side adapter around a plugin kernel.
///
/// The plugin's `kernel_destroy` runs exactly once, when the adapter drops.
pub struct CustomOpKernel {
    descriptor: &'static OperatorDescriptor,
    state:      Option<KernelState>,
}

impl CustomOpKernel {
    /// Validate the plugin's version against `host_max_version`, then create its state.
    pub fn new(info: &KernelInfo, descriptor: &'static OperatorDescriptor, host_max_version: u32) -> Result<Self> {
        if descriptor.version > host_max_version {
            return Err(OpError::UnsupportedVersion {
                op: descriptor.name().to_string(),
                version: descriptor.version,
                max: host_max_version,
            });
        }
        let api = HostApi::new(descriptor.version);
        let state = (descriptor.create_kernel)(&api, info)?;
        Ok(Self { descriptor, state: Some(state) })
    }

    pub fn descriptor(&self) -> &'static OperatorDescriptor {
        self.descriptor
    }
}

impl OpKernel for CustomOpKernel {
    fn compute(&self, ctx: &mut KernelContext<'_>) -> Result<()> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| OpError::InvalidArgument(format!("kernel '{}' was destroyed", self.descriptor.name())))?;
        (self.descriptor.kernel_compute)(state, ctx)
    }
}

impl Drop for CustomOpKernel {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            (self.descriptor.kernel_destroy)(state);
        }
    }
}


/// Link-time registration of a custom op under a domain
pub struct CustomOpSubmission {
    pub domain:     &'static str,
    pub descriptor: OperatorDescriptor,
}

// Collect all registered custom ops
inventory::collect!(CustomOpSubmission);
