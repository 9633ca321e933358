use core_types::{DataType, ProviderId};
use sable_core::StreamError;
use tensor::TensorError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OpError>;

/// Errors raised while registering custom ops, matching kernels and running them.
#[derive(Debug, Error)]
pub enum OpError {
    #[error("custom op schemas mismatch for '{op}': {detail}")]
    SchemaMismatch { op: String, detail: String },

    #[error("invalid descriptor for custom op '{op}': {detail}")]
    InvalidDescriptor { op: String, detail: String },

    #[error("kernel already registered: {0}")]
    DuplicateKernel(String),

    #[error("no kernel for {domain}::{op} on '{provider}' accepting inputs {inputs:?}")]
    KernelNotFound {
        op: String,
        domain: String,
        provider: ProviderId,
        inputs: Vec<DataType>,
    },

    #[error("unsupported version '{version}' in custom op '{op}', host supports up to {max}")]
    UnsupportedVersion { op: String, version: u32, max: u32 },

    #[error("result buffer is not large enough, {required} needed")]
    BufferTooSmall { required: usize },

    #[error("{what} index {index} is out of bounds ({count} available)")]
    IndexOutOfBounds { what: &'static str, index: usize, count: usize },

    #[error("attribute '{0}' not found")]
    AttributeNotFound(String),

    #[error("attribute '{name}' does not hold {expected}")]
    AttributeType { name: String, expected: &'static str },

    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("kernel '{op}' failed: {detail}")]
    Kernel { op: String, detail: String },

    #[error(transparent)]
    Tensor(#[from] TensorError),

    #[error(transparent)]
    Stream(#[from] StreamError),
}
