//! Registration of custom op domains.
//!
//! A domain is registered as a whole: every descriptor is checked and staged
//! first, and schemas and kernels are only committed once nothing failed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use core_types::DataType;

use crate::abi::{OperatorDescriptor, MAX_API_VERSION, MIN_VERSION_INPUT_MEMORY_TYPE};
use crate::binding::TypeBinding;
use crate::error::{OpError, Result};
use crate::kernel::KernelInfo;
use crate::kernel_registry::{KernelCreateInfo, KernelDef, KernelFactory, KernelRegistry};
use crate::op::{CustomOpKernel, CustomOpSubmission, OpKernel};
use crate::schema::{
    FormalShape, OpSchema, SchemaRegistry, TypeConstraint, CUSTOM_DOMAIN_VERSIONS, CUSTOM_SINCE_VERSION,
};

/// Named group of custom op descriptors.
#[derive(Clone, Debug)]
pub struct CustomOpDomain {
    domain: String,
    ops:    Vec<&'static OperatorDescriptor>,
}

impl CustomOpDomain {
    pub fn new(domain: impl Into<String>) -> Self {
        Self { domain: domain.into(), ops: Vec::new() }
    }

    pub fn add(&mut self, op: &'static OperatorDescriptor) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn with_op(mut self, op: &'static OperatorDescriptor) -> Self {
        self.ops.push(op);
        self
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn ops(&self) -> &[&'static OperatorDescriptor] {
        &self.ops
    }

    /// Every op submitted with `register_custom_op!`, grouped by domain.
    pub fn from_inventory() -> Vec<CustomOpDomain> {
        let mut domains: Vec<CustomOpDomain> = Vec::new();
        for submission in inventory::iter::<CustomOpSubmission> {
            match domains.iter_mut().find(|d| d.domain == submission.domain) {
                Some(domain) => {
                    domain.add(&submission.descriptor);
                }
                None => domains.push(CustomOpDomain::new(submission.domain).with_op(&submission.descriptor)),
            }
        }
        domains
    }
}

/// Schema being assembled for one (domain, name) during a registration.
struct SchemaDraft {
    name:     String,
    shape:    FormalShape,
    bindings: Vec<TypeBinding>,
}

/// Schemas and kernels contributed by custom op domains.
#[derive(Clone, Debug)]
pub struct CustomRegistry {
    host_max_version: u32,
    schemas:          SchemaRegistry,
    kernels:          KernelRegistry,
}

impl Default for CustomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CustomRegistry {
    pub fn new() -> Self {
        Self::with_max_api_version(MAX_API_VERSION)
    }

    /// Registry whose kernels refuse plugins newer than `max_version`.
    pub fn with_max_api_version(max_version: u32) -> Self {
        Self {
            host_max_version: max_version,
            schemas: SchemaRegistry::new(),
            kernels: KernelRegistry::new(),
        }
    }

    pub fn max_api_version(&self) -> u32 {
        self.host_max_version
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn kernels(&self) -> &KernelRegistry {
        &self.kernels
    }

    /// Register every op of `domain`, or nothing if any of them is rejected.
    ///
    /// Returns the schemas the domain created or extended.
    #[tracing::instrument(level = "debug", skip_all, fields(domain = domain.domain()))]
    pub fn register_domain(&mut self, domain: &CustomOpDomain) -> Result<Vec<Arc<OpSchema>>> {
        let domain_name = domain.domain();
        let mut drafts: Vec<SchemaDraft> = Vec::new();
        let mut draft_index: HashMap<&str, usize> = HashMap::new();
        let mut staged_kernels: Vec<KernelCreateInfo> = Vec::new();
        let mut staged_keys = HashSet::new();

        for &desc in domain.ops() {
            let name = desc.name();
            let shape = FormalShape::of(desc)?;

            let index = match draft_index.get(name) {
                Some(&index) => index,
                None => {
                    let draft = match self.schemas.get(name, domain_name) {
                        Some(existing) => SchemaDraft {
                            name: name.to_string(),
                            shape: existing.shape().clone(),
                            bindings: existing.bindings().to_vec(),
                        },
                        None => SchemaDraft { name: name.to_string(), shape: shape.clone(), bindings: Vec::new() },
                    };
                    drafts.push(draft);
                    draft_index.insert(name, drafts.len() - 1);
                    drafts.len() - 1
                }
            };
            let draft = &mut drafts[index];
            draft.shape.ensure_compatible(name, &shape)?;

            let binding = shape.binding(desc);
            draft.bindings.push(binding.clone());

            let def = KernelDef {
                name: name.to_string(),
                domain: domain_name.to_string(),
                since_version: CUSTOM_SINCE_VERSION,
                provider: desc.provider(),
                binding,
                input_memory_types: Self::input_memory_types(desc),
                type_constraints: Self::kernel_constraints(desc),
            };
            let key = def.key();
            if self.kernels.contains(&key) || !staged_keys.insert(key) {
                return Err(OpError::DuplicateKernel(def.to_string()));
            }
            staged_kernels.push(KernelCreateInfo { def, factory: self.factory(desc) });
        }

        // Nothing below can fail on a staged domain.
        if !domain.ops().is_empty() {
            self.schemas.add_domain(domain_name, CUSTOM_DOMAIN_VERSIONS);
        }
        let mut committed = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let schema = Arc::new(OpSchema::new(draft.name, domain_name, draft.shape, draft.bindings));
            self.schemas.insert(schema.clone());
            committed.push(schema);
        }
        for create_info in staged_kernels {
            self.kernels.register(create_info)?;
        }
        tracing::info!(
            domain = domain_name,
            ops = domain.ops().len(),
            schemas = committed.len(),
            "custom op domain registered"
        );
        Ok(committed)
    }

    fn factory(&self, desc: &'static OperatorDescriptor) -> KernelFactory {
        let host_max_version = self.host_max_version;
        Arc::new(move |info: &KernelInfo| -> Result<Box<dyn OpKernel>> {
            Ok(Box::new(CustomOpKernel::new(info, desc, host_max_version)?))
        })
    }

    fn input_memory_types(desc: &OperatorDescriptor) -> Vec<(usize, crate::abi::MemoryType)> {
        if desc.version < MIN_VERSION_INPUT_MEMORY_TYPE {
            return Vec::new();
        }
        (0..(desc.get_input_type_count)())
            .filter_map(|i| desc.input_memory_type(i).map(|m| (i, m)))
            .collect()
    }

    /// Kernel-side constraints: the wildcard allows every type, concrete
    /// positions allow exactly their own.
    fn kernel_constraints(desc: &OperatorDescriptor) -> Vec<TypeConstraint> {
        let mut constraints = Vec::new();
        let mut push = |type_str: String, dtype: DataType| {
            if dtype.is_defined() {
                constraints.push(TypeConstraint { type_str, allowed: vec![dtype] });
            } else if !constraints.iter().any(|c: &TypeConstraint| c.type_str == "T") {
                constraints.push(TypeConstraint { type_str: "T".to_string(), allowed: DataType::tensor_types().collect() });
            }
        };
        for (i, dtype) in desc.input_types().into_iter().enumerate() {
            push(format!("Input{i}"), dtype);
        }
        for (i, dtype) in desc.output_types().into_iter().enumerate() {
            push(format!("Output{i}"), dtype);
        }
        constraints
    }
}
