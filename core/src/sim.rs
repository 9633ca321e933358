//! Simulated asynchronous accelerator.
//!
//! Every queue is a worker thread draining commands in order. Completed jobs
//! and reached markers are stamped on a device-wide trace with a strictly
//! increasing tick, which makes cross-queue ordering observable in tests
//! without relying on wall-clock time.
//!
//! A device may have peers ([`SimDevice::peer`]): further devices on the same
//! timeline whose queues can wait on each other's markers.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use core_types::{ProviderId, CPU_PROVIDER, SIM_PROVIDER};
use crossbeam::channel::{self, Sender};
use parking_lot::{Condvar, Mutex};

use crate::error::{Result, StreamError};
use crate::logging::{ProviderLogger, Severity};
use crate::provider::ExecutionProvider;
use crate::registry::StreamHandleRegistry;
use crate::stream::{self, Backend, DeviceStream, HostJob, Stream};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TraceKind {
    /// A launched job finished.
    Job(String),
    /// A marker was reached on its queue.
    Marker(u64),
    /// The host returned from a blocking wait on a marker.
    HostResume(u64),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceEvent {
    pub tick:  u64,
    pub queue: Option<u32>,
    pub kind:  TraceKind,
}

/// Trace and id counters shared by a device and its peers.
#[derive(Default)]
struct Timeline {
    events:      Mutex<Vec<TraceEvent>>,
    next_queue:  AtomicU32,
    next_marker: AtomicU64,
}

impl Timeline {
    fn stamp(&self, queue: Option<u32>, kind: TraceKind) -> u64 {
        let mut events = self.events.lock();
        let tick = events.len() as u64 + 1;
        events.push(TraceEvent { tick, queue, kind });
        tick
    }
}

pub struct SimDevice {
    provider: ProviderId,
    log:      Arc<Timeline>,
}

impl SimDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { provider: SIM_PROVIDER, log: Arc::new(Timeline::default()) })
    }

    /// A second device serving `provider` on this device's timeline.
    pub fn peer(&self, provider: ProviderId) -> Arc<Self> {
        Arc::new(Self { provider, log: self.log.clone() })
    }

    /// Snapshot of everything that happened so far, in tick order.
    pub fn trace(&self) -> Vec<TraceEvent> {
        self.log.events.lock().clone()
    }

    /// Tick of the first event matching `kind`.
    pub fn tick_of(&self, kind: &TraceKind) -> Option<u64> {
        self.log.events.lock().iter().find(|e| &e.kind == kind).map(|e| e.tick)
    }
}

/* ------------------------------------------------------------------------- */
/* Markers                                                                   */
/* ------------------------------------------------------------------------- */

struct MarkerState {
    id:      u64,
    reached: Mutex<Option<u64>>,
    cond:    Condvar,
}

impl MarkerState {
    fn reach(&self, tick: u64) {
        *self.reached.lock() = Some(tick);
        self.cond.notify_all();
    }

    fn wait(&self) -> u64 {
        let mut reached = self.reached.lock();
        loop {
            if let Some(tick) = *reached {
                return tick;
            }
            self.cond.wait(&mut reached);
        }
    }
}

/// Device completion marker.
pub struct SimMarker(Arc<MarkerState>);

impl SimMarker {
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Tick at which the marker was reached, if it was.
    pub fn reached_at(&self) -> Option<u64> {
        *self.0.reached.lock()
    }
}

/* ------------------------------------------------------------------------- */
/* Queues                                                                    */
/* ------------------------------------------------------------------------- */

enum SimCommand {
    Run { label: String, job: HostJob },
    Record(Arc<MarkerState>),
    Wait(Arc<MarkerState>),
    /// Replies with the label of the first job that panicked since the last flush.
    Flush(Sender<Option<String>>),
    Shutdown,
}

pub struct SimQueue {
    id:     u32,
    sender: Sender<SimCommand>,
    worker: Option<JoinHandle<()>>,
}

impl SimQueue {
    pub fn id(&self) -> u32 {
        self.id
    }

    fn send(&self, command: SimCommand) -> Result<()> {
        self.sender
            .send(command)
            .map_err(|_| StreamError::Device(format!("sim queue {} is shut down", self.id)))
    }
}

impl Drop for SimQueue {
    fn drop(&mut self) {
        let _ = self.sender.send(SimCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            // Dropped from inside one of its own jobs: the worker exits on Shutdown.
            if worker.thread().id() == thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                tracing::error!(queue = self.id, "sim queue worker panicked");
            }
        }
    }
}

fn queue_worker(log: Arc<Timeline>, id: u32, commands: channel::Receiver<SimCommand>) {
    let mut panicked: Option<String> = None;
    while let Ok(command) = commands.recv() {
        match command {
            SimCommand::Run { label, job } => {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    tracing::error!(queue = id, job = %label, "sim job panicked");
                    panicked.get_or_insert(label);
                } else {
                    log.stamp(Some(id), TraceKind::Job(label));
                }
            }
            SimCommand::Record(marker) => {
                let tick = log.stamp(Some(id), TraceKind::Marker(marker.id));
                marker.reach(tick);
            }
            SimCommand::Wait(marker) => {
                marker.wait();
            }
            SimCommand::Flush(done) => {
                let _ = done.send(panicked.take());
            }
            SimCommand::Shutdown => break,
        }
    }
}

impl Backend for SimDevice {
    type Queue = SimQueue;
    type Marker = SimMarker;

    const NAME: &'static str = "sim";

    fn provider(&self) -> &ProviderId {
        &self.provider
    }

    fn is_peer(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.log, &other.log)
    }

    fn create_queue(&self) -> Result<SimQueue> {
        let id = self.log.next_queue.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = channel::unbounded();
        let log = self.log.clone();
        let worker = thread::Builder::new()
            .name(format!("sim-queue-{id}"))
            .spawn(move || queue_worker(log, id, receiver))
            .map_err(|e| StreamError::Device(format!("failed to spawn sim queue worker: {e}")))?;
        Ok(SimQueue { id, sender, worker: Some(worker) })
    }

    fn create_marker(&self) -> Result<SimMarker> {
        Ok(SimMarker(Arc::new(MarkerState {
            id:      self.log.next_marker.fetch_add(1, Ordering::Relaxed),
            reached: Mutex::new(None),
            cond:    Condvar::new(),
        })))
    }

    fn launch(&self, queue: &SimQueue, label: &str, job: HostJob) -> Result<()> {
        queue.send(SimCommand::Run { label: label.to_string(), job })
    }

    fn record_marker(&self, queue: &SimQueue, marker: &SimMarker) -> Result<()> {
        queue.send(SimCommand::Record(marker.0.clone()))
    }

    fn queue_wait_marker(&self, queue: &SimQueue, marker: &SimMarker) -> Result<()> {
        queue.send(SimCommand::Wait(marker.0.clone()))
    }

    fn synchronize_marker(&self, marker: &SimMarker) -> Result<()> {
        marker.0.wait();
        self.log.stamp(None, TraceKind::HostResume(marker.0.id));
        Ok(())
    }

    fn synchronize_queue(&self, queue: &SimQueue) -> Result<()> {
        let (done_tx, done_rx) = channel::bounded(1);
        queue.send(SimCommand::Flush(done_tx))?;
        match done_rx.recv() {
            Ok(None) => Ok(()),
            Ok(Some(job)) => Err(StreamError::JobPanicked { job }),
            Err(_) => Err(StreamError::Device(format!("sim queue {} stopped before flushing", queue.id))),
        }
    }
}

/* ------------------------------------------------------------------------- */
/* Provider                                                                  */
/* ------------------------------------------------------------------------- */

/// Provider running kernels on a [`SimDevice`].
pub struct SimExecutionProvider {
    device: Arc<SimDevice>,
    logger: ProviderLogger,
    peers:  Vec<ProviderId>,
}

impl SimExecutionProvider {
    pub fn new(device: Arc<SimDevice>) -> Self {
        let logger = ProviderLogger::new(device.provider().clone(), Severity::Warning);
        Self { device, logger, peers: Vec::new() }
    }

    /// Let consumers on `peer`, a provider backed by a peer device, wait on
    /// this provider's notifications on device.
    pub fn with_peer(mut self, peer: ProviderId) -> Self {
        self.peers.push(peer);
        self
    }

    pub fn device(&self) -> &Arc<SimDevice> {
        &self.device
    }
}

impl ExecutionProvider for SimExecutionProvider {
    fn provider_type(&self) -> &ProviderId {
        self.device.provider()
    }

    fn logger(&self) -> Option<&ProviderLogger> {
        Some(&self.logger)
    }

    fn register_stream_handles(&self, registry: &mut StreamHandleRegistry) {
        let own = self.device.provider().clone();
        // device -> same or peer device: device-side dependency between queues
        registry.register_wait_fn(own.clone(), own.clone(), stream::wait_on_device::<SimDevice>);
        for peer in &self.peers {
            registry.register_wait_fn(own.clone(), peer.clone(), stream::wait_on_device::<SimDevice>);
        }
        // device -> host: block until the marker is reached
        registry.register_wait_fn(own.clone(), CPU_PROVIDER, stream::wait_on_host::<SimDevice>);

        let device = self.device.clone();
        registry.register_create_stream_fn(
            own,
            Arc::new(move |provider: &dyn ExecutionProvider| -> Result<Box<dyn Stream>> {
                Ok(Box::new(DeviceStream::new(device.clone(), provider)?))
            }),
        );
    }
}
