use std::path::Path;

use core_types::{ProviderId, CPU_PROVIDER, SIM_PROVIDER, WGPU_PROVIDER};
use sable_ops::MAX_API_VERSION;
use serde::Deserialize;

use crate::error::{ExecError, Result};

/// Built-in providers the runtime builder can bring up by itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Cpu,
    Sim,
    Wgpu,
}

impl ProviderKind {
    pub fn provider_id(self) -> ProviderId {
        match self {
            ProviderKind::Cpu => CPU_PROVIDER,
            ProviderKind::Sim => SIM_PROVIDER,
            ProviderKind::Wgpu => WGPU_PROVIDER,
        }
    }
}

/// Runtime settings, usually read from YAML:
///
/// ```yaml
/// default_provider: sim
/// max_api_version: 14
/// providers: [cpu, sim]
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Provider of nodes that do not name one.
    pub default_provider: ProviderKind,
    /// Refuse plugins newer than this; defaults to the host maximum.
    pub max_api_version: Option<u32>,
    /// Providers instantiated by the builder.
    pub providers: Vec<ProviderKind>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_provider: ProviderKind::Cpu,
            max_api_version: None,
            providers: vec![ProviderKind::Cpu],
        }
    }
}

impl RuntimeConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: RuntimeConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        match self.max_api_version {
            Some(0) => Err(ExecError::Config("max_api_version must be at least 1".to_string())),
            Some(v) if v > MAX_API_VERSION => Err(ExecError::Config(format!(
                "max_api_version {v} exceeds the host maximum {MAX_API_VERSION}"
            ))),
            _ => Ok(()),
        }
    }

    pub fn max_api_version(&self) -> u32 {
        self.max_api_version.unwrap_or(MAX_API_VERSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_run_everything_on_the_host() {
        let config = RuntimeConfig::default();
        assert_eq!(config.default_provider.provider_id(), CPU_PROVIDER);
        assert_eq!(config.max_api_version(), MAX_API_VERSION);
        assert_eq!(RuntimeConfig::from_yaml_str("{}").unwrap(), config);
    }

    #[test]
    fn yaml_overrides() {
        let config = RuntimeConfig::from_yaml_str(
            "default_provider: sim\nmax_api_version: 14\nproviders: [cpu, sim]\n",
        )
        .unwrap();
        assert_eq!(config.default_provider, ProviderKind::Sim);
        assert_eq!(config.max_api_version(), 14);
        assert_eq!(config.providers, vec![ProviderKind::Cpu, ProviderKind::Sim]);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        assert!(matches!(
            RuntimeConfig::from_yaml_str("max_api_version: 17"),
            Err(ExecError::Config(_))
        ));
        assert!(matches!(RuntimeConfig::from_yaml_str("providers: [tpu]"), Err(ExecError::Yaml(_))));
        assert!(matches!(RuntimeConfig::from_yaml_str("threads: 4"), Err(ExecError::Yaml(_))));
    }
}
