//! Streams and notifications.
//!
//! A [`DeviceStream`] owns one native queue of a [`Backend`]. Work enqueued on
//! the same stream runs in enqueue order; work on different streams is only
//! ordered through a [`DeviceNotification`] recorded by the producer and
//! waited on by the consumer.
//!
//! The notification's `ready` flag is the only state shared across threads at
//! this level and is accessed with atomic load/store only.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use core_types::ProviderId;
use crossbeam::utils::Backoff;

use crate::error::{Result, StreamError};
use crate::provider::ExecutionProvider;

/// Unit of host-described work enqueued on a stream.
pub type HostJob = Box<dyn FnOnce() + Send + 'static>;

/// Native asynchronous device: queues plus completion markers.
pub trait Backend: Send + Sync + 'static {
    type Queue: Send + Sync + 'static;
    type Marker: Send + Sync + 'static;

    /// Short name used in diagnostics.
    const NAME: &'static str;

    /// Provider type whose streams this back end serves.
    fn provider(&self) -> &ProviderId;

    /// Whether queues of `other` may wait on markers recorded here.
    fn is_peer(&self, other: &Self) -> bool;

    fn create_queue(&self) -> Result<Self::Queue>;

    fn create_marker(&self) -> Result<Self::Marker>;

    /// Enqueue `job` behind everything already on `queue`.
    fn launch(&self, queue: &Self::Queue, label: &str, job: HostJob) -> Result<()>;

    /// Enqueue `marker`; it is reached once the queue's prior work drains.
    fn record_marker(&self, queue: &Self::Queue, marker: &Self::Marker) -> Result<()>;

    /// Make work enqueued on `queue` after this call wait for `marker`.
    fn queue_wait_marker(&self, queue: &Self::Queue, marker: &Self::Marker) -> Result<()>;

    /// Block the host until `marker` is reached.
    fn synchronize_marker(&self, marker: &Self::Marker) -> Result<()>;

    /// Block the host until every operation enqueued on `queue` completed.
    fn synchronize_queue(&self, queue: &Self::Queue) -> Result<()>;
}

/// Ordered asynchronous compute queue owned by one provider.
pub trait Stream: Send + Sync {
    fn provider(&self) -> &ProviderId;

    fn create_notification(&self, num_consumers: usize) -> Result<Box<dyn Notification>>;

    fn launch(&self, label: &str, job: HostJob) -> Result<()>;

    /// Block until everything enqueued so far has completed.
    fn flush(&self) -> Result<()>;

    /// Native queue handle, for kernels that enqueue their own device work.
    fn handle(&self) -> &dyn Any;

    fn as_any(&self) -> &dyn Any;
}

/// One-shot cross-stream completion signal.
pub trait Notification: Send + Sync {
    /// Provider of the stream that created this notification.
    fn producer(&self) -> &ProviderId;

    /// Record the completion marker on the producer stream and flag readiness.
    ///
    /// Must be called at most once; a second call is unspecified.
    fn activate(&self) -> Result<()>;

    fn is_ready(&self) -> bool;

    /// Number of waits this notification was created for.
    fn consumers(&self) -> usize;

    fn as_any(&self) -> &dyn Any;
}

/* ------------------------------------------------------------------------- */
/* Stream                                                                    */
/* ------------------------------------------------------------------------- */

pub struct DeviceStream<B: Backend> {
    backend:  Arc<B>,
    queue:    Arc<B::Queue>,
    provider: ProviderId,
}

impl<B: Backend> DeviceStream<B> {
    /// Create a stream for `provider`, which must be the back end's provider.
    pub fn new(backend: Arc<B>, provider: &dyn ExecutionProvider) -> Result<Self> {
        if provider.provider_type() != backend.provider() {
            return Err(StreamError::ProviderMismatch {
                expected: backend.provider().clone(),
                found: provider.provider_type().clone(),
                action: "create this stream",
            });
        }
        let queue = Arc::new(backend.create_queue()?);
        tracing::debug!(provider = %provider.provider_type(), backend = B::NAME, "stream created");
        Ok(Self { provider: provider.provider_type().clone(), backend, queue })
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Native queue handle.
    pub fn queue(&self) -> &B::Queue {
        &self.queue
    }

    /// Notification that `consumers` waits will be issued against.
    pub fn notification(&self, consumers: usize) -> Result<DeviceNotification<B>> {
        Ok(DeviceNotification {
            marker:    self.backend.create_marker()?,
            backend:   self.backend.clone(),
            queue:     self.queue.clone(),
            producer:  self.provider.clone(),
            ready:     AtomicBool::new(false),
            consumers,
            waits:     AtomicUsize::new(0),
        })
    }
}

impl<B: Backend> Stream for DeviceStream<B> {
    fn provider(&self) -> &ProviderId {
        &self.provider
    }

    fn create_notification(&self, num_consumers: usize) -> Result<Box<dyn Notification>> {
        Ok(Box::new(self.notification(num_consumers)?))
    }

    fn launch(&self, label: &str, job: HostJob) -> Result<()> {
        self.backend.launch(&self.queue, label, job)
    }

    fn flush(&self) -> Result<()> {
        self.backend.synchronize_queue(&self.queue)
    }

    fn handle(&self) -> &dyn Any {
        &*self.queue
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<B: Backend> Drop for DeviceStream<B> {
    fn drop(&mut self) {
        tracing::debug!(provider = %self.provider, backend = B::NAME, "stream released");
    }
}

/* ------------------------------------------------------------------------- */
/* Notification                                                              */
/* ------------------------------------------------------------------------- */

/// Notification bound to the stream that created it.
///
/// It keeps the producer's native queue alive, so it may outlive the
/// `DeviceStream` value that created it.
pub struct DeviceNotification<B: Backend> {
    backend:   Arc<B>,
    queue:     Arc<B::Queue>,
    producer:  ProviderId,
    marker:    B::Marker,
    ready:     AtomicBool,
    consumers: usize,
    waits:     AtomicUsize,
}

impl<B: Backend> DeviceNotification<B> {
    pub fn marker(&self) -> &B::Marker {
        &self.marker
    }

    fn count_wait(&self) {
        let seen = self.waits.fetch_add(1, Ordering::Relaxed);
        debug_assert!(
            seen < self.consumers,
            "notification from '{}' waited on more than its {} consumer(s)",
            self.producer,
            self.consumers
        );
    }

    /// Spin until activated, then make `consumer`'s later work wait for the marker.
    ///
    /// The host thread is not blocked once the spin completes.
    pub fn wait_on_device(&self, consumer: &dyn Stream) -> Result<()> {
        let consumer = consumer
            .as_any()
            .downcast_ref::<DeviceStream<B>>()
            .filter(|s| self.backend.is_peer(s.backend()))
            .ok_or_else(|| StreamError::ProviderMismatch {
                expected: self.backend.provider().clone(),
                found: consumer.provider().clone(),
                action: "wait on this notification on device",
            })?;
        self.count_wait();
        spin_until_ready(&self.ready);
        self.backend.queue_wait_marker(consumer.queue(), &self.marker)
    }

    /// Spin until activated, then block until the marker is actually reached.
    pub fn wait_on_host(&self) -> Result<()> {
        self.count_wait();
        spin_until_ready(&self.ready);
        self.backend.synchronize_marker(&self.marker)
    }
}

impl<B: Backend> Notification for DeviceNotification<B> {
    fn producer(&self) -> &ProviderId {
        &self.producer
    }

    fn activate(&self) -> Result<()> {
        self.backend.record_marker(&self.queue, &self.marker)?;
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn consumers(&self) -> usize {
        self.consumers
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Unbounded busy-wait. Never yields to the OS scheduler and has no timeout.
fn spin_until_ready(ready: &AtomicBool) {
    let backoff = Backoff::new();
    while !ready.load(Ordering::Acquire) {
        backoff.spin();
    }
}

fn downcast<B: Backend>(notification: &dyn Notification) -> Result<&DeviceNotification<B>> {
    notification
        .as_any()
        .downcast_ref::<DeviceNotification<B>>()
        .ok_or(StreamError::ForeignNotification(B::NAME))
}

/// Wait function for a consumer on the same kind of device: device-side dependency.
pub fn wait_on_device<B: Backend>(consumer: Option<&dyn Stream>, notification: &dyn Notification) -> Result<()> {
    let consumer = consumer.ok_or(StreamError::MissingConsumerStream)?;
    downcast::<B>(notification)?.wait_on_device(consumer)
}

/// Wait function for a host consumer: blocks until the producer's marker is reached.
pub fn wait_on_host<B: Backend>(_consumer: Option<&dyn Stream>, notification: &dyn Notification) -> Result<()> {
    downcast::<B>(notification)?.wait_on_host()
}
