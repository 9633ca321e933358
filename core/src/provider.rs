use core_types::{ProviderId, CPU_PROVIDER};

use crate::logging::{ProviderLogger, Severity};
use crate::registry::StreamHandleRegistry;

/// A back end that runs kernels.
///
/// Providers that own an asynchronous device register their stream factory
/// and wait functions in [`StreamHandleRegistry`] during bring-up.
pub trait ExecutionProvider: Send + Sync {
    fn provider_type(&self) -> &ProviderId;

    fn logger(&self) -> Option<&ProviderLogger> {
        None
    }

    fn register_stream_handles(&self, _registry: &mut StreamHandleRegistry) {}
}

/// Host provider. Kernels run inline on the calling thread, so it owns no stream.
pub struct CpuExecutionProvider {
    logger: ProviderLogger,
}

impl CpuExecutionProvider {
    pub fn new() -> Self {
        Self { logger: ProviderLogger::new(CPU_PROVIDER, Severity::Warning) }
    }
}

impl Default for CpuExecutionProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionProvider for CpuExecutionProvider {
    fn provider_type(&self) -> &ProviderId {
        self.logger.provider()
    }

    fn logger(&self) -> Option<&ProviderLogger> {
        Some(&self.logger)
    }
}
