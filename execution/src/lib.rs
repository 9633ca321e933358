mod config;
mod error;
mod graph;
mod plan;
mod runtime;

pub use config::{ProviderKind, RuntimeConfig};
pub use error::{ExecError, Result};
pub use graph::{Graph, Node};
pub use plan::ExecutionPlan;
pub use runtime::{Runtime, RuntimeBuilder};


/* ------------------------------------------------------------------------- */
/*                                  Tests                                    */
/* ------------------------------------------------------------------------- */
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use core_types::{DataType, CPU_PROVIDER, SIM_PROVIDER};
    use sable_core::{SimDevice, SimExecutionProvider, TraceKind};
    use sable_ops::{
        descriptor, CustomOp, CustomOpDomain, HostApi, KernelContext, KernelInfo, OpError, OperatorDescriptor,
        BUILTIN_DOMAIN,
    };
    use tensor::Tensor;

    fn sim_runtime(device: Arc<SimDevice>) -> Runtime {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        Runtime::builder()
            .with_provider(Arc::new(SimExecutionProvider::new(device)))
            .with_inventory_ops()
            .build()
            .unwrap()
    }

    fn add(name: &str, a: &str, b: &str, out: &str) -> Node {
        Node::new(name, BUILTIN_DOMAIN, "Add").inputs([a, b]).outputs([out])
    }

    #[test]
    fn host_only_graph_runs_inline() -> anyhow::Result<()> {
        let runtime = sim_runtime(SimDevice::new());
        let graph = Graph::new()
            .input("x", DataType::Float32)
            .initializer("one", Tensor::from_vec(&[1.0f32, 1.0], &[2])?)
            .node(Node::new("scale", BUILTIN_DOMAIN, "Scale").inputs(["x"]).outputs(["sx"]).attribute("alpha", 3.0f32))
            .node(add("add", "sx", "one", "y"))
            .output("y");

        let plan = runtime.prepare(&graph)?;
        assert_eq!(plan.stream_count(), 0);
        assert_eq!(plan.value_type("y"), Some(DataType::Float32));

        let feeds = HashMap::from([("x".to_string(), Tensor::from_vec(&[1.0f32, 2.0], &[2])?)]);
        let outputs = plan.run(&feeds)?;
        assert_eq!(outputs[0].to_vec::<f32>()?, vec![4.0, 7.0]);
        Ok(())
    }

    #[test]
    fn nodes_launch_in_dependency_order() {
        let runtime = sim_runtime(SimDevice::new());
        let graph = Graph::new()
            .input("x", DataType::Float32)
            .node(add("second", "a", "a", "b"))
            .node(add("first", "x", "x", "a"))
            .output("b");
        let plan = runtime.prepare(&graph).unwrap();
        assert_eq!(plan.node_order(), vec!["first", "second"]);
    }

    #[test]
    fn cycles_are_fatal() {
        let runtime = sim_runtime(SimDevice::new());
        let graph = Graph::new()
            .node(add("a", "q", "q", "p"))
            .node(add("b", "p", "p", "q"))
            .output("q");
        let err = runtime.prepare(&graph).err().unwrap();
        assert!(matches!(err, ExecError::Cycle(nodes) if nodes.len() == 2));
    }

    #[test]
    fn templated_outputs_follow_their_inputs() {
        let runtime = sim_runtime(SimDevice::new());
        let graph = Graph::new()
            .input("x", DataType::Int16)
            .node(Node::new("id", BUILTIN_DOMAIN, "Identity").inputs(["x"]).outputs(["y"]))
            .output("y");
        let plan = runtime.prepare(&graph).unwrap();
        assert_eq!(plan.value_type("y"), Some(DataType::Int16));

        let feeds = HashMap::from([("x".to_string(), Tensor::from_vec(&[7i16, -7], &[2]).unwrap())]);
        assert_eq!(plan.run(&feeds).unwrap()[0].to_vec::<i16>().unwrap(), vec![7, -7]);
    }

    #[test]
    fn device_edges_get_host_waits() {
        let device = SimDevice::new();
        let runtime = sim_runtime(device.clone());
        let graph = Graph::new()
            .input("x", DataType::Float32)
            .node(add("on_host", "x", "x", "a"))
            .node(add("on_device", "a", "a", "b").on(SIM_PROVIDER))
            .node(add("back_on_host", "b", "x", "c"))
            .output("c")
            .output("b");

        let plan = runtime.prepare(&graph).unwrap();
        assert_eq!(plan.stream_count(), 1);
        assert_eq!(plan.wait_count("on_device"), 0);
        assert_eq!(plan.wait_count("back_on_host"), 1);

        let feeds = HashMap::from([("x".to_string(), Tensor::from_vec(&[1.0f32, 2.0], &[2]).unwrap())]);
        let outputs = plan.run(&feeds).unwrap();
        assert_eq!(outputs[0].to_vec::<f32>().unwrap(), vec![5.0, 10.0]);
        assert_eq!(outputs[1].to_vec::<f32>().unwrap(), vec![4.0, 8.0]);

        let job = device.tick_of(&TraceKind::Job("on_device".to_string())).unwrap();
        let marker = device.tick_of(&TraceKind::Marker(0)).unwrap();
        let resumed = device.tick_of(&TraceKind::HostResume(0)).unwrap();
        assert!(job < marker && marker < resumed);
    }

    #[test]
    fn missing_kernels_and_feeds() {
        let runtime = sim_runtime(SimDevice::new());
        let graph = Graph::new()
            .input("x", DataType::Float32)
            .node(Node::new("scale", BUILTIN_DOMAIN, "Scale").inputs(["x"]).outputs(["y"]).on(SIM_PROVIDER))
            .output("y");
        assert!(matches!(
            runtime.prepare(&graph).err().unwrap(),
            ExecError::Op(OpError::KernelNotFound { provider, .. }) if provider == SIM_PROVIDER
        ));

        let graph = Graph::new()
            .input("x", DataType::Float32)
            .node(add("add", "x", "x", "y").on(CPU_PROVIDER))
            .output("y");
        let plan = runtime.prepare(&graph).unwrap();
        assert!(matches!(plan.run(&HashMap::new()), Err(ExecError::MissingFeed(name)) if name == "x"));

        let wrong = HashMap::from([("x".to_string(), Tensor::scalar(1i64))]);
        assert!(matches!(plan.run(&wrong), Err(ExecError::FeedType { .. })));
    }

    #[test]
    fn kernel_failures_abort_the_run() {
        let runtime = sim_runtime(SimDevice::new());
        let graph = Graph::new()
            .input("x", DataType::Float32)
            .input("y", DataType::Float32)
            .node(add("mismatch", "x", "y", "z").on(SIM_PROVIDER))
            .output("z");
        let plan = runtime.prepare(&graph).unwrap();
        let feeds = HashMap::from([
            ("x".to_string(), Tensor::from_vec(&[1.0f32, 2.0], &[2]).unwrap()),
            ("y".to_string(), Tensor::from_vec(&[1.0f32], &[1]).unwrap()),
        ]);
        let err = plan.run(&feeds).unwrap_err();
        assert!(matches!(err, ExecError::Kernel { node, .. } if node == "mismatch"));
    }

    /// Fails by panicking on the simulated device.
    struct Explode;

    impl CustomOp for Explode {
        const NAME: &'static str = "Explode";
        const PROVIDER: Option<&'static str> = Some("SimExecutionProvider");
        const INPUTS: &'static [DataType] = &[DataType::Float32];
        const OUTPUTS: &'static [DataType] = &[DataType::Float32];
        type Kernel = ();

        fn create(_api: &HostApi, _info: &KernelInfo) -> sable_ops::Result<()> {
            Ok(())
        }

        fn compute(_kernel: &(), _ctx: &mut KernelContext<'_>) -> sable_ops::Result<()> {
            panic!("device fault");
        }
    }

    static EXPLODE: OperatorDescriptor = descriptor::<Explode>();

    #[test]
    fn panicking_device_kernels_fail_the_run() {
        let runtime = Runtime::builder()
            .with_provider(Arc::new(SimExecutionProvider::new(SimDevice::new())))
            .with_domain(CustomOpDomain::new("test.faults").with_op(&EXPLODE))
            .with_inventory_ops()
            .build()
            .unwrap();
        let feeds = HashMap::from([("x".to_string(), Tensor::from_vec(&[1.0f32], &[1]).unwrap())]);
        let blames_explode = |err: ExecError| {
            matches!(
                err,
                ExecError::Kernel { node, source: OpError::Kernel { op, detail } }
                    if node == "explode" && op == "Explode" && detail.contains("device fault")
            )
        };

        // the failing node's output is not a graph output
        let unobserved = Graph::new()
            .input("x", DataType::Float32)
            .node(Node::new("explode", "test.faults", "Explode").inputs(["x"]).outputs(["dropped"]).on(SIM_PROVIDER))
            .node(add("add", "x", "x", "y"))
            .output("y");
        let plan = runtime.prepare(&unobserved).unwrap();
        assert!(blames_explode(plan.run(&feeds).unwrap_err()));

        // a host consumer of the failed value is not blamed
        let consumed = Graph::new()
            .input("x", DataType::Float32)
            .node(Node::new("explode", "test.faults", "Explode").inputs(["x"]).outputs(["e"]).on(SIM_PROVIDER))
            .node(add("add", "e", "x", "y"))
            .output("y");
        let plan = runtime.prepare(&consumed).unwrap();
        assert!(blames_explode(plan.run(&feeds).unwrap_err()));
    }
}
