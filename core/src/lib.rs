//! Execution providers, device streams and cross-stream notifications.

pub mod error;
pub mod gpu;
pub mod logging;
pub mod provider;
pub mod registry;
pub mod sim;
pub mod stream;

pub use error::{Result, StreamError};
pub use gpu::{GpuContext, WgpuDevice, WgpuExecutionProvider};
pub use logging::{ProviderLogger, Severity};
pub use provider::{CpuExecutionProvider, ExecutionProvider};
pub use registry::{CreateStreamFn, StreamHandleRegistry, WaitNotificationFn};
pub use sim::{SimDevice, SimExecutionProvider, SimQueue, TraceEvent, TraceKind};
pub use stream::{Backend, DeviceNotification, DeviceStream, HostJob, Notification, Stream};
