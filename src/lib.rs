//! Custom-op registration and cross-stream scheduling for an inference runtime.
//!
//! The workspace crates are re-exported under short names.

pub use core_types as types;
pub use execution;
pub use sable_core as core;
pub use sable_ops as ops;
pub use tensor;

pub use core_types::{DataType, ProviderId, CPU_PROVIDER, SIM_PROVIDER, WGPU_PROVIDER};
pub use execution::{ExecError, ExecutionPlan, Graph, Node, Runtime, RuntimeBuilder, RuntimeConfig};
pub use sable_ops::register_custom_op;
pub use tensor::Tensor;
