use std::borrow::Cow;
use std::fmt;

include!(concat!(env!("OUT_DIR"), "/generated_data_types.rs"));

/// Marker‐trait so we can go from T to DataType
pub trait Element: bytemuck::Pod {
    const DTYPE: DataType;
}

impl DataType {
    pub fn is_defined(self) -> bool {
        self != DataType::Undefined
    }

    /// All concrete element types a tensor may carry.
    pub fn tensor_types() -> impl Iterator<Item = DataType> {
        DataType::ALL.into_iter().filter(|t| t.is_defined())
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Identity of an execution provider type, e.g. `"CPUExecutionProvider"`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderId(Cow<'static, str>);

impl ProviderId {
    pub const fn from_static(name: &'static str) -> Self {
        ProviderId(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        ProviderId(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for ProviderId {
    fn from(name: &'static str) -> Self {
        ProviderId::from_static(name)
    }
}

/// Baseline host provider; kernels that declare no provider land here.
pub const CPU_PROVIDER: ProviderId = ProviderId::from_static("CPUExecutionProvider");
/// Simulated asynchronous accelerator.
pub const SIM_PROVIDER: ProviderId = ProviderId::from_static("SimExecutionProvider");
/// wgpu-backed accelerator.
pub const WGPU_PROVIDER: ProviderId = ProviderId::from_static("WgpuExecutionProvider");
