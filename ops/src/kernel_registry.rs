use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use core_types::{DataType, ProviderId};

use crate::abi::MemoryType;
use crate::binding::TypeBinding;
use crate::error::{OpError, Result};
use crate::kernel::KernelInfo;
use crate::op::OpKernel;
use crate::schema::TypeConstraint;

/// Builds a kernel for one node.
pub type KernelFactory = Arc<dyn Fn(&KernelInfo) -> Result<Box<dyn OpKernel>> + Send + Sync>;

/// Everything a kernel registration is matched on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernelDef {
    pub name:               String,
    pub domain:             String,
    pub since_version:      u32,
    pub provider:           ProviderId,
    pub binding:            TypeBinding,
    pub input_memory_types: Vec<(usize, MemoryType)>,
    pub type_constraints:   Vec<TypeConstraint>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct KernelKey {
    name:          String,
    domain:        String,
    since_version: u32,
    provider:      ProviderId,
    binding:       TypeBinding,
}

impl KernelDef {
    pub(crate) fn key(&self) -> KernelKey {
        KernelKey {
            name:          self.name.clone(),
            domain:        self.domain.clone(),
            since_version: self.since_version,
            provider:      self.provider.clone(),
            binding:       self.binding.clone(),
        }
    }
}

impl fmt::Display for KernelDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}::{} v{} on '{}' {:?} -> {:?}",
            self.domain,
            self.name,
            self.since_version,
            self.provider,
            self.binding.inputs(),
            self.binding.outputs()
        )
    }
}

/// A kernel definition plus the factory creating its instances.
#[derive(Clone)]
pub struct KernelCreateInfo {
    pub def:     KernelDef,
    pub factory: KernelFactory,
}

impl KernelCreateInfo {
    pub fn instantiate(&self, info: &KernelInfo) -> Result<Box<dyn OpKernel>> {
        (self.factory)(info)
    }
}

impl fmt::Debug for KernelCreateInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelCreateInfo").field("def", &self.def).finish_non_exhaustive()
    }
}

/// Kernels by (domain, name); registration order is lookup order.
#[derive(Clone, Debug, Default)]
pub struct KernelRegistry {
    kernels: HashMap<(String, String), Vec<Arc<KernelCreateInfo>>>,
    keys:    HashSet<KernelKey>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn contains(&self, key: &KernelKey) -> bool {
        self.keys.contains(key)
    }

    /// Fails if an identical (name, domain, version, provider, binding) exists.
    pub fn register(&mut self, create_info: KernelCreateInfo) -> Result<()> {
        let key = create_info.def.key();
        if !self.keys.insert(key) {
            return Err(OpError::DuplicateKernel(create_info.def.to_string()));
        }
        tracing::debug!(kernel = %create_info.def, "kernel registered");
        self.kernels
            .entry((create_info.def.domain.clone(), create_info.def.name.clone()))
            .or_default()
            .push(Arc::new(create_info));
        Ok(())
    }

    /// First registration on `provider` whose binding accepts `inputs`.
    pub fn lookup(&self, name: &str, domain: &str, inputs: &[DataType], provider: &ProviderId) -> Result<Arc<KernelCreateInfo>> {
        self.kernels
            .get(&(domain.to_string(), name.to_string()))
            .and_then(|candidates| {
                candidates
                    .iter()
                    .find(|k| &k.def.provider == provider && k.def.binding.match_inputs(inputs).is_some())
            })
            .cloned()
            .ok_or_else(|| OpError::KernelNotFound {
                op: name.to_string(),
                domain: domain.to_string(),
                provider: provider.clone(),
                inputs: inputs.to_vec(),
            })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
