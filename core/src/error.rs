use core_types::ProviderId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors raised by streams, notifications and the stream handle registry.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("provider '{found}' cannot {action}, expected '{expected}'")]
    ProviderMismatch {
        expected: ProviderId,
        found: ProviderId,
        action: &'static str,
    },

    #[error("no wait function registered for notifications from '{producer}' consumed on '{consumer}'")]
    WaitFnUnregistered { producer: ProviderId, consumer: ProviderId },

    #[error("no stream factory registered for provider '{0}'")]
    StreamFactoryUnregistered(ProviderId),

    #[error("a device-side wait needs a consumer stream")]
    MissingConsumerStream,

    #[error("notification was not created by a {0} stream")]
    ForeignNotification(&'static str),

    #[error("device job '{job}' panicked")]
    JobPanicked { job: String },

        #[error("device error: {0}")]
    Device(String),
}
