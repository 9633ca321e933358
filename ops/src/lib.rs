pub mod abi;
pub mod binding;
pub mod builtin;
pub mod custom_registry;
pub mod error;
pub mod kernel;
pub mod kernel_registry;
pub mod op;
pub mod schema;

pub use abi::{
    descriptor, CustomOp, HostApi, IoCharacteristic, KernelState, MemoryType, OperatorDescriptor, MAX_API_VERSION,
    MIN_VERSION_INPUT_MEMORY_TYPE, MIN_VERSION_OPTIONAL_IO, MIN_VERSION_VARIADIC_IO,
};
pub use binding::{TypeBinding, Variadic};
pub use builtin::BUILTIN_DOMAIN;
pub use custom_registry::{CustomOpDomain, CustomRegistry};
pub use error::{OpError, Result};
pub use kernel::{AttributeValue, KernelContext, KernelInfo};
pub use kernel_registry::{KernelCreateInfo, KernelDef, KernelFactory, KernelRegistry};
pub use op::{CustomOpKernel, CustomOpSubmission, OpKernel};
pub use schema::{FormalParameter, FormalParameterOption, FormalShape, OpSchema, SchemaRegistry, TypeConstraint};

#[doc(hidden)]
pub use inventory;


/// Register a custom op under a domain with the inventory system
#[macro_export]
macro_rules! register_custom_op {
    ($domain:expr, $op_type:ty) => {
        $crate::inventory::submit! {
            $crate::CustomOpSubmission {
                domain:     $domain,
                descriptor: $crate::descriptor::<$op_type>(),
            }
        }
    };
}


#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{DataType, CPU_PROVIDER, SIM_PROVIDER};
    use tensor::Tensor;

    fn builtin_registry() -> CustomRegistry {
        let mut registry = CustomRegistry::new();
        for domain in CustomOpDomain::from_inventory() {
            registry.register_domain(&domain).unwrap();
        }
        registry
    }

    #[test]
    fn inventory_collects_builtin_ops() {
        let domains = CustomOpDomain::from_inventory();
        let builtin = domains.iter().find(|d| d.domain() == BUILTIN_DOMAIN).unwrap();
        assert_eq!(builtin.ops().len(), 5);

        let registry = builtin_registry();
        let add = registry.schemas().get("Add", BUILTIN_DOMAIN).unwrap();
        assert_eq!(add.bindings().len(), 2);
        assert_eq!(add.infer(&[DataType::Float32, DataType::Float32]), Some(vec![DataType::Float32]));

        let identity = registry.schemas().get("Identity", BUILTIN_DOMAIN).unwrap();
        assert_eq!(identity.infer(&[DataType::Int8]), Some(vec![DataType::Int8]));

        for provider in [CPU_PROVIDER, SIM_PROVIDER] {
            assert!(registry.kernels().lookup("Identity", BUILTIN_DOMAIN, &[DataType::Bool], &provider).is_ok());
        }
        assert!(registry.kernels().lookup("Scale", BUILTIN_DOMAIN, &[DataType::Float32], &SIM_PROVIDER).is_err());
    }

    #[test]
    fn builtin_kernels_compute() {
        let registry = builtin_registry();
        let info = KernelInfo::new("scale")
            .with_input("x", DataType::Float32)
            .with_output("y", DataType::Float32)
            .with_attribute("alpha", 2.0f32);
        let scale = registry
            .kernels()
            .lookup("Scale", BUILTIN_DOMAIN, &[DataType::Float32], &CPU_PROVIDER)
            .unwrap()
            .instantiate(&info)
            .unwrap();

        let x = Tensor::from_vec(&[1.0f32, -3.0], &[2]).unwrap();
        let planned = [DataType::Float32];
        let mut ctx = KernelContext::new(vec![Some(&x)], &planned, None, None);
        scale.compute(&mut ctx).unwrap();
        let y = ctx.into_outputs().remove(0).unwrap();
        assert_eq!(y.to_vec::<f32>().unwrap(), vec![2.0, -6.0]);

        let add = registry
            .kernels()
            .lookup("Add", BUILTIN_DOMAIN, &[DataType::Float32, DataType::Float32], &CPU_PROVIDER)
            .unwrap()
            .instantiate(&KernelInfo::new("add"))
            .unwrap();
        let mut ctx = KernelContext::new(vec![Some(&x), Some(&y)], &planned, None, None);
        add.compute(&mut ctx).unwrap();
        assert_eq!(ctx.into_outputs()[0].as_ref().unwrap().to_vec::<f32>().unwrap(), vec![3.0, -9.0]);

        let short = Tensor::from_vec(&[1.0f32], &[1]).unwrap();
        let mut ctx = KernelContext::new(vec![Some(&x), Some(&short)], &planned, None, None);
        assert!(matches!(add.compute(&mut ctx), Err(OpError::Kernel { .. })));
    }
}
