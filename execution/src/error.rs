use core_types::{DataType, ProviderId};
use sable_core::StreamError;
use sable_ops::OpError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExecError>;

/// Errors raised while building the runtime, planning a graph or running it.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Op(#[from] OpError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("execution provider '{0}' is not registered")]
    UnknownProvider(ProviderId),

    #[error("execution provider '{0}' is registered twice")]
    DuplicateProvider(ProviderId),

    #[error("failed to bring up execution provider '{provider}': {detail}")]
    ProviderInit { provider: ProviderId, detail: String },

    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    #[error("graph has a cycle through {0:?}")]
    Cycle(Vec<String>),

    #[error("no value fed for graph input '{0}'")]
    MissingFeed(String),

    #[error("graph input '{name}' expects {expected}, got {found}")]
    FeedType { name: String, expected: DataType, found: DataType },

    #[error("node '{node}' failed: {source}")]
    Kernel { node: String, source: OpError },

    #[error("graph output '{0}' was not produced")]
    MissingOutput(String),
}
