//! Plugin ABI: a versioned table of plain function pointers.
//!
//! A plugin fills an [`OperatorDescriptor`] and states the API version it was
//! written against. Capabilities added after version 1 live in `Option` slots
//! and the host only reads them when the declared version reaches the
//! capability's minimum; older plugins get the documented defaults.

use std::any::Any;

use core_types::{DataType, ProviderId, CPU_PROVIDER};

use crate::error::{OpError, Result};
use crate::kernel::{KernelContext, KernelInfo};

/// Highest API version this host understands.
pub const MAX_API_VERSION: u32 = 16;
/// Per-index required/optional/variadic characteristics.
pub const MIN_VERSION_OPTIONAL_IO: u32 = 8;
/// Per-input memory type query.
pub const MIN_VERSION_INPUT_MEMORY_TYPE: u32 = 13;
/// Variadic inputs and outputs, with min arity and homogeneity.
pub const MIN_VERSION_VARIADIC_IO: u32 = 14;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IoCharacteristic {
    Required,
    Optional,
    Variadic,
}

/// Where a kernel expects an input to live.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MemoryType {
    #[default]
    Default,
    CpuInput,
    CpuOutput,
}

/// Plugin-owned kernel state, opaque to the host.
pub type KernelState = Box<dyn Any + Send + Sync>;

/// Host API handed to a plugin when one of its kernels is created.
///
/// The version matches the one the plugin declared, never the host's newest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HostApi {
    version: u32,
}

impl HostApi {
    pub fn new(version: u32) -> Self {
        Self { version }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn supports(&self, min_version: u32) -> bool {
        self.version >= min_version
    }
}

/// Capability table describing one custom operator.
///
/// Types reported as [`DataType::Undefined`] are templated: they bind to a
/// single wildcard type shared by every undefined position.
#[derive(Clone, Copy)]
pub struct OperatorDescriptor {
    pub version: u32,

    pub get_name:                    fn() -> &'static str,
    pub get_execution_provider_type: fn() -> Option<&'static str>,
    pub get_input_type_count:        fn() -> usize,
    pub get_input_type:              fn(usize) -> DataType,
    pub get_output_type_count:       fn() -> usize,
    pub get_output_type:             fn(usize) -> DataType,

    pub create_kernel:  fn(&HostApi, &KernelInfo) -> Result<KernelState>,
    pub kernel_compute: fn(&KernelState, &mut KernelContext<'_>) -> Result<()>,
    pub kernel_destroy: fn(KernelState),

    // since MIN_VERSION_OPTIONAL_IO
    pub get_input_characteristic:  Option<fn(usize) -> IoCharacteristic>,
    pub get_output_characteristic: Option<fn(usize) -> IoCharacteristic>,

    // since MIN_VERSION_INPUT_MEMORY_TYPE
    pub get_input_memory_type: Option<fn(usize) -> MemoryType>,

    // since MIN_VERSION_VARIADIC_IO
    pub get_variadic_input_min_arity:    Option<fn() -> usize>,
    pub get_variadic_input_homogeneity:  Option<fn() -> bool>,
    pub get_variadic_output_min_arity:   Option<fn() -> usize>,
    pub get_variadic_output_homogeneity: Option<fn() -> bool>,
}

impl OperatorDescriptor {
    pub fn name(&self) -> &'static str {
        (self.get_name)()
    }

    /// Provider the kernels run on; descriptors that name none run on the CPU.
    pub fn provider(&self) -> ProviderId {
        (self.get_execution_provider_type)()
            .map(ProviderId::from_static)
            .unwrap_or(CPU_PROVIDER)
    }

    pub fn input_types(&self) -> Vec<DataType> {
        (0..(self.get_input_type_count)()).map(self.get_input_type).collect()
    }

    pub fn output_types(&self) -> Vec<DataType> {
        (0..(self.get_output_type_count)()).map(self.get_output_type).collect()
    }

    fn gated<F>(&self, min_version: u32, slot: Option<F>) -> Option<F> {
        if self.version >= min_version { slot } else { None }
    }

    pub fn input_characteristic(&self, index: usize) -> IoCharacteristic {
        self.gated(MIN_VERSION_OPTIONAL_IO, self.get_input_characteristic)
            .map_or(IoCharacteristic::Required, |f| f(index))
    }

    pub fn output_characteristic(&self, index: usize) -> IoCharacteristic {
        self.gated(MIN_VERSION_OPTIONAL_IO, self.get_output_characteristic)
            .map_or(IoCharacteristic::Required, |f| f(index))
    }

    /// `None` when the plugin predates the memory type query.
    pub fn input_memory_type(&self, index: usize) -> Option<MemoryType> {
        self.gated(MIN_VERSION_INPUT_MEMORY_TYPE, self.get_input_memory_type)
            .map(|f| f(index))
    }

    pub fn variadic_input_min_arity(&self) -> usize {
        self.gated(MIN_VERSION_VARIADIC_IO, self.get_variadic_input_min_arity)
            .map_or(1, |f| f())
    }

    pub fn variadic_input_homogeneity(&self) -> bool {
        self.gated(MIN_VERSION_VARIADIC_IO, self.get_variadic_input_homogeneity)
            .map_or(true, |f| f())
    }

    pub fn variadic_output_min_arity(&self) -> usize {
        self.gated(MIN_VERSION_VARIADIC_IO, self.get_variadic_output_min_arity)
            .map_or(1, |f| f())
    }

    pub fn variadic_output_homogeneity(&self) -> bool {
        self.gated(MIN_VERSION_VARIADIC_IO, self.get_variadic_output_homogeneity)
            .map_or(true, |f| f())
    }
}

impl std::fmt::Debug for OperatorDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorDescriptor")
            .field("name", &self.name())
            .field("version", &self.version)
            .field("provider", &self.provider())
            .field("inputs", &self.input_types())
            .field("outputs", &self.output_types())
            .finish()
    }
}

/* ------------------------------------------------------------------------- */
/* Typed authoring                                                           */
/* ------------------------------------------------------------------------- */

/// Rust-side way to author a descriptor; [`descriptor`] builds the table.
pub trait CustomOp: 'static {
    const NAME: &'static str;
    const VERSION: u32 = MAX_API_VERSION;
    const PROVIDER: Option<&'static str> = None;
    const INPUTS: &'static [DataType];
    const OUTPUTS: &'static [DataType];

    type Kernel: Send + Sync + 'static;

    fn create(api: &HostApi, info: &KernelInfo) -> Result<Self::Kernel>;

    fn compute(kernel: &Self::Kernel, ctx: &mut KernelContext<'_>) -> Result<()>;

    fn input_characteristic(_index: usize) -> IoCharacteristic {
        IoCharacteristic::Required
    }

    fn output_characteristic(_index: usize) -> IoCharacteristic {
        IoCharacteristic::Required
    }

    fn input_memory_type(_index: usize) -> MemoryType {
        MemoryType::Default
    }

    fn variadic_input_min_arity() -> usize {
        1
    }

    fn variadic_input_homogeneity() -> bool {
        true
    }

    fn variadic_output_min_arity() -> usize {
        1
    }

    fn variadic_output_homogeneity() -> bool {
        true
    }
}

fn name_of<T: CustomOp>() -> &'static str {
    T::NAME
}

fn provider_of<T: CustomOp>() -> Option<&'static str> {
    T::PROVIDER
}

fn input_count_of<T: CustomOp>() -> usize {
    T::INPUTS.len()
}

fn input_type_of<T: CustomOp>(index: usize) -> DataType {
    T::INPUTS.get(index).copied().unwrap_or(DataType::Undefined)
}

fn output_count_of<T: CustomOp>() -> usize {
    T::OUTPUTS.len()
}

fn output_type_of<T: CustomOp>(index: usize) -> DataType {
    T::OUTPUTS.get(index).copied().unwrap_or(DataType::Undefined)
}

fn create_of<T: CustomOp>(api: &HostApi, info: &KernelInfo) -> Result<KernelState> {
    Ok(Box::new(T::create(api, info)?))
}

fn compute_of<T: CustomOp>(state: &KernelState, ctx: &mut KernelContext<'_>) -> Result<()> {
    let kernel = (**state).downcast_ref::<T::Kernel>().ok_or_else(|| {
        OpError::InvalidArgument(format!("kernel state does not belong to '{}'", T::NAME))
    })?;
    T::compute(kernel, ctx)
}

fn destroy(state: KernelState) {
    drop(state);
}

/// Build the capability table for `T`. Usable in statics.
pub const fn descriptor<T: CustomOp>() -> OperatorDescriptor {
    OperatorDescriptor {
        version: T::VERSION,
        get_name:                        name_of::<T>,
        get_execution_provider_type:     provider_of::<T>,
        get_input_type_count:            input_count_of::<T>,
        get_input_type:                  input_type_of::<T>,
        get_output_type_count:           output_count_of::<T>,
        get_output_type:                 output_type_of::<T>,
        create_kernel:                   create_of::<T>,
        kernel_compute:                  compute_of::<T>,
        kernel_destroy:                  destroy,
        get_input_characteristic:        Some(T::input_characteristic),
        get_output_characteristic:       Some(T::output_characteristic),
        get_input_memory_type:           Some(T::input_memory_type),
        get_variadic_input_min_arity:    Some(T::variadic_input_min_arity),
        get_variadic_input_homogeneity:  Some(T::variadic_input_homogeneity),
        get_variadic_output_min_arity:   Some(T::variadic_output_min_arity),
        get_variadic_output_homogeneity: Some(T::variadic_output_homogeneity),
    }
}
