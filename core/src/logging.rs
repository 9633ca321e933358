use core_types::ProviderId;

/// Severity levels a plugin can log at, lowest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Verbose,
    Info,
    Warning,
    Error,
    Fatal,
}

/// Logger handed to kernels, scoped to the provider that owns them.
///
/// Messages are forwarded to `tracing` with the provider attached, so the
/// embedding application decides where they end up.
#[derive(Clone, Debug)]
pub struct ProviderLogger {
    provider: ProviderId,
    min_severity: Severity,
}

impl ProviderLogger {
    pub fn new(provider: ProviderId, min_severity: Severity) -> Self {
        Self { provider, min_severity }
    }

    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    /// Lowest severity that is emitted.
    pub fn severity(&self) -> Severity {
        self.min_severity
    }

    pub fn is_enabled(&self, severity: Severity) -> bool {
        severity >= self.min_severity
    }

    /// Emit `message` if `severity` passes the threshold. Returns whether it was emitted.
    pub fn log(&self, severity: Severity, message: &str, file: &str, line: u32, function: &str) -> bool {
        if !self.is_enabled(severity) {
            return false;
        }
        let provider = self.provider.as_str();
        match severity {
            Severity::Verbose => tracing::debug!(provider, file, line, function, "{message}"),
            Severity::Info => tracing::info!(provider, file, line, function, "{message}"),
            Severity::Warning => tracing::warn!(provider, file, line, function, "{message}"),
            Severity::Error => tracing::error!(provider, file, line, function, "{message}"),
            Severity::Fatal => tracing::error!(provider, file, line, function, fatal = true, "{message}"),
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::CPU_PROVIDER;

    #[test]
    fn threshold_filters_messages() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let logger = ProviderLogger::new(CPU_PROVIDER, Severity::Warning);
        assert_eq!(logger.severity(), Severity::Warning);
        assert!(!logger.log(Severity::Info, "dropped", file!(), line!(), "threshold_filters_messages"));
        assert!(logger.log(Severity::Error, "kept", file!(), line!(), "threshold_filters_messages"));
        assert!(logger.is_enabled(Severity::Fatal));
    }
}
