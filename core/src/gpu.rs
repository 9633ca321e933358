//! wgpu back end.
//!
//! A wgpu device exposes one in-order queue, so every stream created on the
//! same [`GpuContext`] shares it and device-side waits between them are
//! implicit. Markers are submission indices; host waits poll the device until
//! the index has been processed.

use std::sync::{Arc, OnceLock};

use anyhow::Result as AnyResult;
use core_types::{ProviderId, CPU_PROVIDER, WGPU_PROVIDER};
use wgpu::{CommandBuffer, Device, Instance, PollType, Queue, SubmissionIndex};

use crate::error::{Result, StreamError};
use crate::logging::{ProviderLogger, Severity};
use crate::provider::ExecutionProvider;
use crate::registry::StreamHandleRegistry;
use crate::stream::{self, Backend, DeviceStream, HostJob, Stream};

/// Context for GPU operations
#[derive(Clone)]
pub struct GpuContext {
    pub device: Arc<Device>,
    pub queue:  Arc<Queue>,
}

impl GpuContext {
    /* ------------------------------------------------------------------ */
    /* Construction                                                       */
    /* ------------------------------------------------------------------ */
    pub async fn new() -> AnyResult<Self> {
        let instance = Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions::default())
            .await
            .map_err(|e| anyhow::anyhow!("No suitable adapter found: {}", e))?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor::default())
            .await?;

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
        })
    }

    pub fn same_device(&self, other: &GpuContext) -> bool {
        Arc::ptr_eq(&self.device, &other.device)
    }

    /* ------------------------------------------------------------------ */
    /* Submission tracking                                                */
    /* ------------------------------------------------------------------ */

    /// Submit an empty batch; its index is reached once all prior submissions are.
    fn submit_marker(&self) -> SubmissionIndex {
        self.queue.submit(std::iter::empty::<CommandBuffer>())
    }

    /// Block until `index` has been processed.
    fn wait_for(&self, index: SubmissionIndex) -> Result<()> {
        self.device
            .poll(PollType::WaitForSubmissionIndex(index))
            .map(|_| ())
            .map_err(|e| StreamError::Device(format!("wgpu poll failed: {e}")))
    }

    /// Block until GPU idle.
    fn wait_idle(&self) -> Result<()> {
        self.device
            .poll(PollType::Wait)
            .map(|_| ())
            .map_err(|e| StreamError::Device(format!("wgpu poll failed: {e}")))
    }
}

/* ---------------------------------------------------------------------- */
/* Back end                                                               */
/* ---------------------------------------------------------------------- */

pub struct WgpuDevice {
    ctx:      GpuContext,
    provider: ProviderId,
}

impl WgpuDevice {
    pub fn new(ctx: GpuContext) -> Arc<Self> {
        Arc::new(Self { ctx, provider: WGPU_PROVIDER })
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }
}

/// Stream handle: the device's queue.
pub struct WgpuQueue {
    ctx: GpuContext,
}

impl WgpuQueue {
    /// Kernels submit their device work through this context.
    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }
}

pub struct WgpuMarker {
    ctx:   GpuContext,
    index: OnceLock<SubmissionIndex>,
}

impl Backend for WgpuDevice {
    type Queue = WgpuQueue;
    type Marker = WgpuMarker;

    const NAME: &'static str = "wgpu";

    fn provider(&self) -> &ProviderId {
        &self.provider
    }

    fn is_peer(&self, other: &Self) -> bool {
        self.ctx.same_device(&other.ctx)
    }

    fn create_queue(&self) -> Result<WgpuQueue> {
        Ok(WgpuQueue { ctx: self.ctx.clone() })
    }

    fn create_marker(&self) -> Result<WgpuMarker> {
        Ok(WgpuMarker { ctx: self.ctx.clone(), index: OnceLock::new() })
    }

    /// Runs inline: device work the job submits is ordered by the wgpu queue.
    fn launch(&self, _queue: &WgpuQueue, label: &str, job: HostJob) -> Result<()> {
        tracing::trace!(job = label, "wgpu launch");
        job();
        Ok(())
    }

    fn record_marker(&self, queue: &WgpuQueue, marker: &WgpuMarker) -> Result<()> {
        if marker.index.set(queue.ctx.submit_marker()).is_err() {
            tracing::warn!("wgpu marker recorded twice, keeping the first submission");
        }
        Ok(())
    }

    fn queue_wait_marker(&self, queue: &WgpuQueue, marker: &WgpuMarker) -> Result<()> {
        if queue.ctx.same_device(&marker.ctx) {
            return Ok(());
        }
        Err(StreamError::Device("wgpu cannot order queues of different devices".to_string()))
    }

    fn synchronize_marker(&self, marker: &WgpuMarker) -> Result<()> {
        let index = marker
            .index
            .get()
            .cloned()
            .ok_or_else(|| StreamError::Device("wgpu marker was never recorded".to_string()))?;
        marker.ctx.wait_for(index)
    }

    fn synchronize_queue(&self, queue: &WgpuQueue) -> Result<()> {
        queue.ctx.wait_idle()
    }
}

/* ---------------------------------------------------------------------- */
/* Provider                                                               */
/* ---------------------------------------------------------------------- */

pub struct WgpuExecutionProvider {
    device: Arc<WgpuDevice>,
    logger: ProviderLogger,
}

impl WgpuExecutionProvider {
    pub fn new(ctx: GpuContext) -> Self {
        Self {
            device: WgpuDevice::new(ctx),
            logger: ProviderLogger::new(WGPU_PROVIDER, Severity::Warning),
        }
    }

    /// Bring up the default adapter.
    pub fn with_default_adapter() -> AnyResult<Self> {
        let ctx = pollster::block_on(GpuContext::new())?;
        Ok(Self::new(ctx))
    }

    pub fn device(&self) -> &Arc<WgpuDevice> {
        &self.device
    }
}

impl ExecutionProvider for WgpuExecutionProvider {
    fn provider_type(&self) -> &ProviderId {
        self.device.provider()
    }

    fn logger(&self) -> Option<&ProviderLogger> {
        Some(&self.logger)
    }

    fn register_stream_handles(&self, registry: &mut StreamHandleRegistry) {
        registry.register_wait_fn(WGPU_PROVIDER, WGPU_PROVIDER, stream::wait_on_device::<WgpuDevice>);
        registry.register_wait_fn(WGPU_PROVIDER, CPU_PROVIDER, stream::wait_on_host::<WgpuDevice>);

        let device = self.device.clone();
        registry.register_create_stream_fn(
            WGPU_PROVIDER,
            Arc::new(move |provider: &dyn ExecutionProvider| -> Result<Box<dyn Stream>> {
                Ok(Box::new(DeviceStream::new(device.clone(), provider)?))
            }),
        );
    }
}
