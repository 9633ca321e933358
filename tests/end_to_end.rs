use std::collections::HashMap;
use std::sync::Arc;

use sable::core::{
    CpuExecutionProvider, DeviceStream, ExecutionProvider, ProviderLogger, SimDevice, SimExecutionProvider, SimQueue,
    Stream, StreamError, StreamHandleRegistry, TraceKind,
};
use sable::ops::{
    descriptor, CustomOp, CustomOpDomain, HostApi, KernelContext, KernelInfo, OpError, OperatorDescriptor,
    Result as OpResult, BUILTIN_DOMAIN,
};
use sable::{DataType, ExecError, Graph, Node, ProviderId, Runtime, RuntimeConfig, Tensor, CPU_PROVIDER, SIM_PROVIDER};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/* ------------------------------------------------------------------------- */
/* A plugin domain authored outside the runtime                              */
/* ------------------------------------------------------------------------- */

/// Doubles every element on the simulated device, logging through its provider.
struct DeviceDouble;

impl CustomOp for DeviceDouble {
    const NAME: &'static str = "Double";
    const PROVIDER: Option<&'static str> = Some("SimExecutionProvider");
    const INPUTS: &'static [DataType] = &[DataType::Float32];
    const OUTPUTS: &'static [DataType] = &[DataType::Float32];
    type Kernel = ();

    fn create(_api: &HostApi, info: &KernelInfo) -> OpResult<()> {
        // The node is owned by the simulated provider, which exposes a logger.
        info.logger()?;
        Ok(())
    }

    fn compute(_kernel: &(), ctx: &mut KernelContext<'_>) -> OpResult<()> {
        let stream = ctx.compute_stream().ok_or_else(|| OpError::InvalidGraph("no compute stream".to_string()))?;
        assert!(stream.handle().downcast_ref::<SimQueue>().is_some());
        let x = ctx.required_input(0)?;
        let values = x.as_slice::<f32>()?;
        let out = ctx.output(0, x.shape())?.as_mut_slice::<f32>()?;
        for (o, v) in out.iter_mut().zip(values) {
            *o = v * 2.0;
        }
        Ok(())
    }
}

/// Sums its first input on the host into a scalar.
struct HostSum;

impl CustomOp for HostSum {
    const NAME: &'static str = "Sum";
    const VERSION: u32 = 10;
    const INPUTS: &'static [DataType] = &[DataType::Float32];
    const OUTPUTS: &'static [DataType] = &[DataType::Float32];
    type Kernel = ();

    fn create(api: &HostApi, _info: &KernelInfo) -> OpResult<()> {
        assert_eq!(api.version(), 10);
        Ok(())
    }

    fn compute(_kernel: &(), ctx: &mut KernelContext<'_>) -> OpResult<()> {
        assert!(ctx.compute_stream().is_none());
        let total: f32 = ctx.required_input(0)?.as_slice::<f32>()?.iter().sum();
        ctx.set_output(0, Tensor::scalar(total))
    }
}

/// Adds one on a second simulated device.
struct PeerIncrement;

impl CustomOp for PeerIncrement {
    const NAME: &'static str = "Increment";
    const PROVIDER: Option<&'static str> = Some("PeerSimExecutionProvider");
    const INPUTS: &'static [DataType] = &[DataType::Float32];
    const OUTPUTS: &'static [DataType] = &[DataType::Float32];
    type Kernel = ();

    fn create(_api: &HostApi, _info: &KernelInfo) -> OpResult<()> {
        Ok(())
    }

    fn compute(_kernel: &(), ctx: &mut KernelContext<'_>) -> OpResult<()> {
        let x = ctx.required_input(0)?;
        let values = x.as_slice::<f32>()?;
        let out = ctx.output(0, x.shape())?.as_mut_slice::<f32>()?;
        for (o, v) in out.iter_mut().zip(values) {
            *o = v + 1.0;
        }
        Ok(())
    }
}

static DOUBLE: OperatorDescriptor = descriptor::<DeviceDouble>();
static SUM: OperatorDescriptor = descriptor::<HostSum>();
static INCREMENT: OperatorDescriptor = descriptor::<PeerIncrement>();

const PEER_PROVIDER: ProviderId = ProviderId::from_static("PeerSimExecutionProvider");

fn plugin_domain() -> CustomOpDomain {
    CustomOpDomain::new("example.plugin").with_op(&DOUBLE).with_op(&SUM)
}

fn runtime(device: Arc<SimDevice>) -> Runtime {
    init_tracing();
    Runtime::builder()
        .with_provider(Arc::new(SimExecutionProvider::new(device)))
        .with_domain(plugin_domain())
        .with_inventory_ops()
        .build()
        .unwrap()
}

fn cpu_sim_cpu_graph() -> Graph {
    Graph::new()
        .input("x", DataType::Float32)
        .node(Node::new("prescale", BUILTIN_DOMAIN, "Scale").inputs(["x"]).outputs(["x1"]).attribute("alpha", 0.5f32))
        .node(Node::new("double", "example.plugin", "Double").inputs(["x1"]).outputs(["x2"]).on(SIM_PROVIDER))
        .node(Node::new("sum", "example.plugin", "Sum").inputs(["x2"]).outputs(["total"]))
        .output("total")
}

#[test]
fn cpu_to_device_to_cpu_runs_in_order() {
    let device = SimDevice::new();
    let runtime = runtime(device.clone());
    let plan = runtime.prepare(&cpu_sim_cpu_graph()).unwrap();
    assert_eq!(plan.node_order(), vec!["prescale", "double", "sum"]);
    assert_eq!(plan.wait_count("sum"), 1);

    let feeds = HashMap::from([("x".to_string(), Tensor::from_vec(&[2.0f32, 4.0, 6.0], &[3]).unwrap())]);
    let total = plan.run(&feeds).unwrap().remove(0);
    assert_eq!(total.shape(), &[] as &[usize]);
    assert_eq!(total.to_vec::<f32>().unwrap(), vec![12.0]);

    let job = device.tick_of(&TraceKind::Job("double".to_string())).unwrap();
    let marker = device.tick_of(&TraceKind::Marker(0)).unwrap();
    let resumed = device.tick_of(&TraceKind::HostResume(0)).unwrap();
    assert!(job < marker && marker < resumed);

    // Plans are reusable.
    let again = plan.run(&feeds).unwrap();
    assert_eq!(again[0].to_vec::<f32>().unwrap(), vec![12.0]);
}

#[test]
fn missing_wait_function_fails_plan_building() {
    init_tracing();

    /// A simulated provider that registers its stream factory but no wait functions.
    struct Unwired(SimExecutionProvider);

    impl ExecutionProvider for Unwired {
        fn provider_type(&self) -> &ProviderId {
            self.0.provider_type()
        }

        fn logger(&self) -> Option<&ProviderLogger> {
            self.0.logger()
        }

        fn register_stream_handles(&self, registry: &mut StreamHandleRegistry) {
            let device = self.0.device().clone();
            registry.register_create_stream_fn(
                SIM_PROVIDER,
                Arc::new(move |provider: &dyn ExecutionProvider| -> sable::core::Result<Box<dyn Stream>> {
                    Ok(Box::new(DeviceStream::new(device.clone(), provider)?))
                }),
            );
        }
    }

    let runtime = Runtime::builder()
        .with_provider(Arc::new(Unwired(SimExecutionProvider::new(SimDevice::new()))))
        .with_domain(plugin_domain())
        .with_inventory_ops()
        .build()
        .unwrap();
    let err = runtime.prepare(&cpu_sim_cpu_graph()).err().unwrap();
    assert!(matches!(
        err,
        ExecError::Stream(StreamError::WaitFnUnregistered { producer, consumer })
            if producer == SIM_PROVIDER && consumer == CPU_PROVIDER
    ));
}

#[test]
fn missing_kernel_fails_plan_building() {
    let runtime = runtime(SimDevice::new());
    let graph = Graph::new()
        .input("x", DataType::Int32)
        .node(Node::new("double", "example.plugin", "Double").inputs(["x"]).outputs(["y"]).on(SIM_PROVIDER))
        .output("y");
    assert!(matches!(
        runtime.prepare(&graph).err().unwrap(),
        ExecError::Op(OpError::KernelNotFound { .. })
    ));
}

#[test]
fn capped_configuration_refuses_newer_plugins() {
    init_tracing();
    let config = RuntimeConfig::from_yaml_str("default_provider: cpu\nmax_api_version: 12\nproviders: [cpu, sim]").unwrap();
    let runtime = Runtime::builder()
        .with_config(config)
        .with_provider(Arc::new(CpuExecutionProvider::new()))
        .with_domain(plugin_domain())
        .build()
        .unwrap();

    // Sum declares version 10 and is accepted; Double declares the host maximum.
    let sum_only = Graph::new()
        .input("x", DataType::Float32)
        .node(Node::new("sum", "example.plugin", "Sum").inputs(["x"]).outputs(["s"]))
        .output("s");
    assert!(runtime.prepare(&sum_only).is_ok());

    let double_only = Graph::new()
        .input("x", DataType::Float32)
        .node(Node::new("double", "example.plugin", "Double").inputs(["x"]).outputs(["y"]).on(SIM_PROVIDER))
        .output("y");
    let err = runtime.prepare(&double_only).err().unwrap();
    assert!(matches!(
        err,
        ExecError::Op(OpError::UnsupportedVersion { op, version: 16, max: 12 }) if op == "Double"
    ));
}

#[test]
fn device_to_peer_device_waits_on_device() {
    init_tracing();
    let device = SimDevice::new();
    let peer = device.peer(PEER_PROVIDER);
    let runtime = Runtime::builder()
        .with_provider(Arc::new(SimExecutionProvider::new(device.clone()).with_peer(PEER_PROVIDER)))
        .with_provider(Arc::new(SimExecutionProvider::new(peer)))
        .with_domain(plugin_domain())
        .with_domain(CustomOpDomain::new("example.peer").with_op(&INCREMENT))
        .build()
        .unwrap();

    let graph = Graph::new()
        .input("x", DataType::Float32)
        .node(Node::new("double", "example.plugin", "Double").inputs(["x"]).outputs(["x2"]).on(SIM_PROVIDER))
        .node(Node::new("increment", "example.peer", "Increment").inputs(["x2"]).outputs(["y"]).on(PEER_PROVIDER))
        .output("y");
    let plan = runtime.prepare(&graph).unwrap();
    assert_eq!(plan.stream_count(), 2);
    assert_eq!(plan.wait_count("increment"), 1);

    let feeds = HashMap::from([("x".to_string(), Tensor::from_vec(&[1.0f32, 2.0], &[2]).unwrap())]);
    let y = plan.run(&feeds).unwrap().remove(0);
    assert_eq!(y.to_vec::<f32>().unwrap(), vec![3.0, 5.0]);

    // The peer's queue held the increment behind the producer's marker.
    let double = device.tick_of(&TraceKind::Job("double".to_string())).unwrap();
    let marker = device.tick_of(&TraceKind::Marker(0)).unwrap();
    let increment = device.tick_of(&TraceKind::Job("increment".to_string())).unwrap();
    assert!(double < marker && marker < increment);
    let consumer_queue = device
        .trace()
        .into_iter()
        .find(|e| e.tick == increment)
        .and_then(|e| e.queue);
    let producer_queue = device.trace().into_iter().find(|e| e.tick == double).and_then(|e| e.queue);
    assert_ne!(consumer_queue, producer_queue);
}
