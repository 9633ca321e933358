use std::collections::HashMap;
use std::sync::Arc;

use core_types::{ProviderId, CPU_PROVIDER};
use sable_core::{
    CpuExecutionProvider, ExecutionProvider, SimDevice, SimExecutionProvider, StreamHandleRegistry,
    WgpuExecutionProvider,
};
use sable_ops::{CustomOpDomain, CustomRegistry};

use crate::config::{ProviderKind, RuntimeConfig};
use crate::error::{ExecError, Result};
use crate::graph::Graph;
use crate::plan::ExecutionPlan;

/// Collects providers, custom op domains and settings for a [`Runtime`].
#[derive(Default)]
pub struct RuntimeBuilder {
    config:        RuntimeConfig,
    providers:     Vec<Arc<dyn ExecutionProvider>>,
    domains:       Vec<CustomOpDomain>,
    use_inventory: bool,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Register an already constructed provider. Takes precedence over the
    /// configured provider of the same type.
    pub fn with_provider(mut self, provider: Arc<dyn ExecutionProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_domain(mut self, domain: CustomOpDomain) -> Self {
        self.domains.push(domain);
        self
    }

    /// Also register every op submitted with `register_custom_op!`.
    pub fn with_inventory_ops(mut self) -> Self {
        self.use_inventory = true;
        self
    }

    fn bring_up(kind: ProviderKind) -> Result<Arc<dyn ExecutionProvider>> {
        Ok(match kind {
            ProviderKind::Cpu => Arc::new(CpuExecutionProvider::new()),
            ProviderKind::Sim => Arc::new(SimExecutionProvider::new(SimDevice::new())),
            ProviderKind::Wgpu => {
                let provider = WgpuExecutionProvider::with_default_adapter().map_err(|e| ExecError::ProviderInit {
                    provider: kind.provider_id(),
                    detail: e.to_string(),
                })?;
                Arc::new(provider)
            }
        })
    }

    #[tracing::instrument(level = "debug", skip_all)]
    pub fn build(self) -> Result<Runtime> {
        self.config.validate()?;

        let mut providers: HashMap<ProviderId, Arc<dyn ExecutionProvider>> = HashMap::new();
        for provider in self.providers {
            let id = provider.provider_type().clone();
            if providers.insert(id.clone(), provider).is_some() {
                return Err(ExecError::DuplicateProvider(id));
            }
        }
        for &kind in &self.config.providers {
            if !providers.contains_key(&kind.provider_id()) {
                providers.insert(kind.provider_id(), Self::bring_up(kind)?);
            }
        }
        // Host fallback for nodes whose inputs are fed by the caller.
        providers
            .entry(CPU_PROVIDER)
            .or_insert_with(|| Arc::new(CpuExecutionProvider::new()));

        let default_provider = self.config.default_provider.provider_id();
        if !providers.contains_key(&default_provider) {
            return Err(ExecError::Config(format!(
                "default provider '{default_provider}' is not among the registered providers"
            )));
        }

        let mut streams = StreamHandleRegistry::new();
        for provider in providers.values() {
            provider.register_stream_handles(&mut streams);
            tracing::debug!(provider = %provider.provider_type(), "provider registered");
        }

        let mut ops = CustomRegistry::with_max_api_version(self.config.max_api_version());
        let inventory = if self.use_inventory { CustomOpDomain::from_inventory() } else { Vec::new() };
        for domain in self.domains.iter().chain(&inventory) {
            ops.register_domain(domain)?;
        }

        tracing::info!(providers = providers.len(), schemas = ops.schemas().len(), "runtime ready");
        Ok(Runtime { config: self.config, default_provider, providers, streams, ops })
    }
}

/// Immutable, shareable state of one runtime instance.
pub struct Runtime {
    config:           RuntimeConfig,
    default_provider: ProviderId,
    providers:        HashMap<ProviderId, Arc<dyn ExecutionProvider>>,
    streams:          StreamHandleRegistry,
    ops:              CustomRegistry,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn default_provider(&self) -> &ProviderId {
        &self.default_provider
    }

    pub fn provider(&self, id: &ProviderId) -> Result<&Arc<dyn ExecutionProvider>> {
        self.providers.get(id).ok_or_else(|| ExecError::UnknownProvider(id.clone()))
    }

    pub fn stream_handles(&self) -> &StreamHandleRegistry {
        &self.streams
    }

    pub fn custom_ops(&self) -> &CustomRegistry {
        &self.ops
    }

    /// Resolve kernels, types, streams and cross-provider waits for `graph`.
    pub fn prepare(&self, graph: &Graph) -> Result<ExecutionPlan> {
        ExecutionPlan::build(self, graph)
    }
}
