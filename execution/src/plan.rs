//! Plan building and execution.
//!
//! Nodes run in topological order on the stream of their provider, or inline
//! on the calling thread for providers without a stream. Edges inside one
//! provider are ordered by its single stream. An edge leaving a device stream
//! for another provider is ordered through one notification per producing
//! node: the producer activates it right after its launch, and each consumer
//! calls the wait function registered for the (producer, consumer) pair before
//! its own launch. Graph outputs produced on a device are awaited on the host.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use core_types::{DataType, ProviderId, CPU_PROVIDER};
use parking_lot::Mutex;
use sable_core::{HostJob, Notification, ProviderLogger, Stream, WaitNotificationFn};
use sable_ops::{KernelContext, KernelInfo, OpError, OpKernel};
use tensor::Tensor;

use crate::error::{ExecError, Result};
use crate::graph::{Graph, Node};
use crate::runtime::Runtime;

type ValueId = usize;

struct ValueInfo {
    name:     String,
    dtype:    DataType,
    /// Index of the producing node in plan order.
    producer: Option<usize>,
}

/// Wait inserted before a consumer launches.
#[derive(Clone, Copy)]
struct PlannedWait {
    producer: usize,
    wait_fn:  WaitNotificationFn,
}

struct PlannedNode {
    name:          String,
    op_type:       String,
    provider:      ProviderId,
    kernel:        Arc<dyn OpKernel>,
    inputs:        Vec<Option<ValueId>>,
    outputs:       Vec<Option<ValueId>>,
    output_types:  Arc<[DataType]>,
    stream:        Option<usize>,
    logger:        Option<ProviderLogger>,
    waits:         Vec<PlannedWait>,
    /// Number of consumers of this node's notification; zero means none is created.
    notify_count:  usize,
}

struct PlannedOutput {
    value: ValueId,
    wait:  Option<PlannedWait>,
}

/// Kernels, streams and waits resolved for one graph.
pub struct ExecutionPlan {
    values:       Vec<ValueInfo>,
    feeds:        Vec<ValueId>,
    initializers: Vec<(ValueId, Tensor)>,
    nodes:        Vec<PlannedNode>,
    outputs:      Vec<PlannedOutput>,
    streams:      Vec<Arc<dyn Stream>>,
}

/// Kahn's algorithm; ties keep graph order.
fn topological_order(graph: &Graph, producers: &HashMap<&str, usize>) -> Result<Vec<usize>> {
    let nodes = graph.nodes();
    let mut indegree = vec![0usize; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, node) in nodes.iter().enumerate() {
        for input in node.inputs.iter().filter(|n| !n.is_empty()) {
            if let Some(&p) = producers.get(input.as_str()) {
                indegree[i] += 1;
                dependents[p].push(i);
            }
        }
    }

    let mut ready: VecDeque<usize> = (0..nodes.len()).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(i) = ready.pop_front() {
        order.push(i);
        for &d in &dependents[i] {
            indegree[d] -= 1;
            if indegree[d] == 0 {
                ready.push_back(d);
            }
        }
    }
    if order.len() != nodes.len() {
        let stuck = (0..nodes.len())
            .filter(|&i| indegree[i] > 0)
            .map(|i| nodes[i].name.clone())
            .collect();
        return Err(ExecError::Cycle(stuck));
    }
    Ok(order)
}

impl ExecutionPlan {
    #[tracing::instrument(level = "debug", skip_all, fields(nodes = graph.nodes().len()))]
    pub(crate) fn build(runtime: &Runtime, graph: &Graph) -> Result<Self> {
        /* ----------------------------- values ------------------------------ */
        let mut values: Vec<ValueInfo> = Vec::new();
        let mut by_name: HashMap<String, ValueId> = HashMap::new();
        let mut define = |name: &str, dtype: DataType, values: &mut Vec<ValueInfo>| -> Result<ValueId> {
            if by_name.contains_key(name) {
                return Err(ExecError::InvalidGraph(format!("value '{name}' is defined more than once")));
            }
            values.push(ValueInfo { name: name.to_string(), dtype, producer: None });
            by_name.insert(name.to_string(), values.len() - 1);
            Ok(values.len() - 1)
        };

        let mut feeds = Vec::with_capacity(graph.inputs().len());
        for (name, dtype) in graph.inputs() {
            feeds.push(define(name, *dtype, &mut values)?);
        }
        let mut initializers = Vec::with_capacity(graph.initializers().len());
        for (name, value) in graph.initializers() {
            initializers.push((define(name, value.dtype(), &mut values)?, value.clone()));
        }

        let mut producers: HashMap<&str, usize> = HashMap::new();
        for (i, node) in graph.nodes().iter().enumerate() {
            for output in node.outputs.iter().filter(|n| !n.is_empty()) {
                if producers.insert(output.as_str(), i).is_some() {
                    return Err(ExecError::InvalidGraph(format!("value '{output}' is produced twice")));
                }
            }
        }
        let order = topological_order(graph, &producers)?;
        for &i in &order {
            for output in graph.nodes()[i].outputs.iter().filter(|n| !n.is_empty()) {
                define(output, DataType::Undefined, &mut values)?;
            }
        }

        /* ----------------------------- kernels ----------------------------- */
        let mut nodes: Vec<PlannedNode> = Vec::with_capacity(order.len());
        for (position, &i) in order.iter().enumerate() {
            let node = &graph.nodes()[i];
            let planned = Self::plan_node(runtime, graph, node, &by_name, &mut values)?;
            for value in planned.outputs.iter().flatten() {
                values[*value].producer = Some(position);
            }
            nodes.push(planned);
        }

        /* ----------------------------- streams ----------------------------- */
        let mut streams: Vec<Arc<dyn Stream>> = Vec::new();
        let mut stream_of: HashMap<ProviderId, usize> = HashMap::new();
        for node in &mut nodes {
            if !stream_of.contains_key(&node.provider) && runtime.stream_handles().has_stream_factory(&node.provider) {
                let provider = runtime.provider(&node.provider)?;
                streams.push(Arc::from(runtime.stream_handles().create_stream(&**provider)?));
                stream_of.insert(node.provider.clone(), streams.len() - 1);
            }
            node.stream = stream_of.get(&node.provider).copied();
        }

        /* --------------------------- cross edges --------------------------- */
        for consumer in 0..nodes.len() {
            let mut waits: Vec<PlannedWait> = Vec::new();
            for value in nodes[consumer].inputs.iter().flatten() {
                let Some(producer) = values[*value].producer else { continue };
                let (from, to) = (&nodes[producer], &nodes[consumer]);
                if from.stream.is_none() || from.provider == to.provider || waits.iter().any(|w| w.producer == producer) {
                    continue;
                }
                let wait_fn = runtime.stream_handles().lookup_wait_fn(&from.provider, &to.provider)?;
                tracing::debug!(producer = %from.name, consumer = %to.name, from = %from.provider, to = %to.provider, "cross-provider edge");
                waits.push(PlannedWait { producer, wait_fn });
            }
            for wait in &waits {
                nodes[wait.producer].notify_count += 1;
            }
            nodes[consumer].waits = waits;
        }

        let mut outputs = Vec::with_capacity(graph.outputs().len());
        for name in graph.outputs() {
            let value = *by_name
                .get(name)
                .ok_or_else(|| ExecError::InvalidGraph(format!("graph output '{name}' is never defined")))?;
            let wait = match values[value].producer {
                Some(producer) if nodes[producer].stream.is_some() => {
                    let wait_fn = runtime.stream_handles().lookup_wait_fn(&nodes[producer].provider, &CPU_PROVIDER)?;
                    nodes[producer].notify_count += 1;
                    Some(PlannedWait { producer, wait_fn })
                }
                _ => None,
            };
            outputs.push(PlannedOutput { value, wait });
        }

        tracing::debug!(nodes = nodes.len(), streams = streams.len(), "plan ready");
        Ok(Self { values, feeds, initializers, nodes, outputs, streams })
    }

    fn plan_node(
        runtime: &Runtime,
        graph: &Graph,
        node: &Node,
        by_name: &HashMap<String, ValueId>,
        values: &mut [ValueInfo],
    ) -> Result<PlannedNode> {
        let provider_id = node.provider.clone().unwrap_or_else(|| runtime.default_provider().clone());
        let provider = runtime.provider(&provider_id)?;

        let lookup = |name: &String| -> Result<Option<ValueId>> {
            if name.is_empty() {
                return Ok(None);
            }
            by_name
                .get(name)
                .copied()
                .map(Some)
                .ok_or_else(|| ExecError::InvalidGraph(format!("node '{}' reads unknown value '{name}'", node.name)))
        };
        let inputs = node.inputs.iter().map(lookup).collect::<Result<Vec<_>>>()?;
        let outputs = node.outputs.iter().map(lookup).collect::<Result<Vec<_>>>()?;
        let input_types: Vec<DataType> = inputs
            .iter()
            .map(|v| v.map_or(DataType::Undefined, |id| values[id].dtype))
            .collect();

        let create_info = runtime
            .custom_ops()
            .kernels()
            .lookup(&node.op_type, &node.domain, &input_types, &provider_id)?;

        let inferred = runtime
            .custom_ops()
            .schemas()
            .get(&node.op_type, &node.domain)
            .and_then(|schema| schema.infer_node(&input_types, outputs.len()));
        let output_types = inferred.unwrap_or_else(|| {
            tracing::debug!(node = %node.name, "no type binding matched, output types left undefined");
            vec![DataType::Undefined; outputs.len()]
        });
        for (value, dtype) in outputs.iter().zip(&output_types) {
            if let Some(id) = value {
                values[*id].dtype = *dtype;
            }
        }

        let mut info = KernelInfo::new(node.name.clone());
        for (name, dtype) in node.inputs.iter().zip(&input_types) {
            info = info.with_input(name.clone(), *dtype);
        }
        for (name, dtype) in node.outputs.iter().zip(&output_types) {
            info = info.with_output(name.clone(), *dtype);
        }
        for (name, value) in &node.attributes {
            info = info.with_attribute(name.clone(), value.clone());
        }
        for (index, name) in node.inputs.iter().enumerate() {
            if let Some((_, value)) = graph.initializers().iter().find(|(n, _)| n == name) {
                info = info.with_constant_input(index, value.clone());
            }
        }
        let info = info.with_provider(&**provider);
        let kernel: Arc<dyn OpKernel> = Arc::from(create_info.instantiate(&info)?);

        tracing::debug!(node = %node.name, op = %node.op_type, domain = %node.domain, provider = %provider_id, "kernel instantiated");
        Ok(PlannedNode {
            name: node.name.clone(),
            op_type: node.op_type.clone(),
            provider: provider_id,
            kernel,
            inputs,
            outputs,
            output_types: output_types.into(),
            stream: None,
            logger: provider.logger().cloned(),
            waits: Vec::new(),
            notify_count: 0,
        })
    }

    /// Planned element type of a value, `Undefined` when unresolved.
    pub fn value_type(&self, name: &str) -> Option<DataType> {
        self.values.iter().find(|v| v.name == name).map(|v| v.dtype)
    }

    /// Node names in launch order.
    pub fn node_order(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Number of waits inserted before `node` launches.
    pub fn wait_count(&self, node: &str) -> usize {
        self.nodes.iter().find(|n| n.name == node).map_or(0, |n| n.waits.len())
    }

    /* ------------------------------------------------------------------ */
    /* Running                                                            */
    /* ------------------------------------------------------------------ */

    /// Run the plan on `feeds` and return the graph outputs in order.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn run(&self, feeds: &HashMap<String, Tensor>) -> Result<Vec<Tensor>> {
        let slots: Arc<Vec<OnceLock<Tensor>>> = Arc::new((0..self.values.len()).map(|_| OnceLock::new()).collect());
        for &id in &self.feeds {
            let info = &self.values[id];
            let value = feeds.get(&info.name).ok_or_else(|| ExecError::MissingFeed(info.name.clone()))?;
            if info.dtype.is_defined() && info.dtype != value.dtype() {
                return Err(ExecError::FeedType {
                    name: info.name.clone(),
                    expected: info.dtype,
                    found: value.dtype(),
                });
            }
            let _ = slots[id].set(value.clone());
        }
        for (id, value) in &self.initializers {
            let _ = slots[*id].set(value.clone());
        }

        let failure: Arc<Mutex<Option<ExecError>>> = Arc::new(Mutex::new(None));
        let launched = self.launch_all(&slots, &failure);
        // Drain every stream even when launching stopped early.
        let flushed = self.streams.iter().try_for_each(|s| s.flush());
        launched?;
        if let Some(err) = failure.lock().take() {
            return Err(err);
        }
        flushed?;

        self.outputs
            .iter()
            .map(|output| {
                slots[output.value]
                    .get()
                    .cloned()
                    .ok_or_else(|| ExecError::MissingOutput(self.values[output.value].name.clone()))
            })
            .collect()
    }

    fn launch_all(&self, slots: &Arc<Vec<OnceLock<Tensor>>>, failure: &Arc<Mutex<Option<ExecError>>>) -> Result<()> {
        let mut notifications: Vec<Option<Box<dyn Notification>>> = (0..self.nodes.len()).map(|_| None).collect();

        for (index, node) in self.nodes.iter().enumerate() {
            let stream = node.stream.map(|s| &self.streams[s]);
            for wait in &node.waits {
                let notification = notifications[wait.producer]
                    .as_deref()
                    .ok_or_else(|| ExecError::InvalidGraph(format!("'{}' waits on a producer that never launched", node.name)))?;
                (wait.wait_fn)(stream.map(|s| &**s), notification)?;
            }

            let job = Self::job(node, slots.clone(), failure.clone(), stream.cloned());
            match stream {
                Some(stream) => stream.launch(&node.name, job)?,
                None => {
                    job();
                    if failure.lock().is_some() {
                        return Ok(());
                    }
                }
            }

            if node.notify_count > 0 {
                if let Some(stream) = stream {
                    let notification = stream.create_notification(node.notify_count)?;
                    notification.activate()?;
                    notifications[index] = Some(notification);
                }
            }
        }

        for output in &self.outputs {
            if let Some(wait) = output.wait {
                let notification = notifications[wait.producer]
                    .as_deref()
                    .ok_or_else(|| ExecError::MissingOutput(self.values[output.value].name.clone()))?;
                (wait.wait_fn)(None, notification)?;
            }
        }
        Ok(())
    }

    fn job(
        node: &PlannedNode,
        slots: Arc<Vec<OnceLock<Tensor>>>,
        failure: Arc<Mutex<Option<ExecError>>>,
        stream: Option<Arc<dyn Stream>>,
    ) -> HostJob {
        let kernel = node.kernel.clone();
        let inputs = node.inputs.clone();
        let outputs = node.outputs.clone();
        let output_types = node.output_types.clone();
        let logger = node.logger.clone();
        let name = node.name.clone();
        let op_type = node.op_type.clone();
        Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                compute(
                    &*kernel,
                    &inputs,
                    &outputs,
                    &output_types,
                    &slots,
                    stream.as_deref(),
                    logger.as_ref(),
                )
            }))
            .unwrap_or_else(|payload| {
                Err(OpError::Kernel { op: op_type, detail: format!("panicked: {}", panic_message(&*payload)) })
            });
            if let Err(source) = result {
                tracing::error!(node = %name, error = %source, "kernel failed");
                failure.lock().get_or_insert(ExecError::Kernel { node: name, source });
            }
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

fn compute(
    kernel: &dyn OpKernel,
    inputs: &[Option<ValueId>],
    outputs: &[Option<ValueId>],
    output_types: &[DataType],
    slots: &[OnceLock<Tensor>],
    stream: Option<&dyn Stream>,
    logger: Option<&ProviderLogger>,
) -> std::result::Result<(), OpError> {
    let mut args = Vec::with_capacity(inputs.len());
    for (i, input) in inputs.iter().enumerate() {
        let value = match input {
            None => None,
            Some(id) => Some(
                slots[*id]
                    .get()
                    .ok_or_else(|| OpError::InvalidArgument(format!("input {i} was never produced")))?,
            ),
        };
        args.push(value);
    }

    let mut ctx = KernelContext::new(args, output_types, stream, logger);
    kernel.compute(&mut ctx)?;

    for (i, (produced, slot)) in ctx.into_outputs().into_iter().zip(outputs).enumerate() {
        let Some(id) = slot else { continue };
        let value = produced.ok_or_else(|| OpError::InvalidArgument(format!("output {i} was not produced")))?;
        slots[*id]
            .set(value)
            .map_err(|_| OpError::InvalidArgument(format!("output {i} was already set")))?;
    }
    Ok(())
}
