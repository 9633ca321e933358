//! Operator schemas synthesized from custom op descriptors.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use core_types::DataType;

use crate::abi::{IoCharacteristic, OperatorDescriptor, MIN_VERSION_VARIADIC_IO};
use crate::binding::{TypeBinding, Variadic};
use crate::error::{OpError, Result};

/// Opset range recorded for every custom domain.
pub const CUSTOM_DOMAIN_VERSIONS: (u32, u32) = (1, 1000);
/// Custom schemas start at opset 1.
pub const CUSTOM_SINCE_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FormalParameterOption {
    Single,
    Optional,
    Variadic,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormalParameter {
    pub name:           String,
    pub type_str:       String,
    pub option:         FormalParameterOption,
    pub is_homogeneous: bool,
    pub min_arity:      usize,
}

impl FormalParameter {
    fn variadic(&self) -> Option<Variadic> {
        (self.option == FormalParameterOption::Variadic)
            .then_some(Variadic { min_arity: self.min_arity, homogeneous: self.is_homogeneous })
    }

    /// Position-wise compatibility; names and type strings may differ.
    fn same_shape(&self, other: &FormalParameter) -> bool {
        self.option == other.option
            && self.is_homogeneous == other.is_homogeneous
            && self.min_arity == other.min_arity
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeConstraint {
    pub type_str: String,
    pub allowed:  Vec<DataType>,
}

/// Formal inputs and outputs of one descriptor, with its type constraints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormalShape {
    pub inputs:           Vec<FormalParameter>,
    pub outputs:          Vec<FormalParameter>,
    pub type_constraints: Vec<TypeConstraint>,
}

fn ordinal(index: usize) -> String {
    let suffix = match (index % 10, index % 100) {
        (1, n) if n != 11 => "st",
        (2, n) if n != 12 => "nd",
        (3, n) if n != 13 => "rd",
        _ => "th",
    };
    format!("{index}{suffix}")
}

impl FormalShape {
    /// Derive the formal parameters a descriptor declares.
    ///
    /// Characteristics are read through the version-gated accessors, and a
    /// variadic parameter is only honoured from the variadic API version on.
    pub fn of(desc: &OperatorDescriptor) -> Result<Self> {
        let op = desc.name();
        let invalid = |detail: String| OpError::InvalidDescriptor { op: op.to_string(), detail };

        let input_types = desc.input_types();
        let output_types = desc.output_types();
        let mut constraints: Vec<TypeConstraint> = Vec::new();
        let mut add_constraint = |type_str: &str| {
            if !constraints.iter().any(|c| c.type_str == type_str) {
                constraints.push(TypeConstraint {
                    type_str: type_str.to_string(),
                    allowed:  DataType::tensor_types().collect(),
                });
            }
        };

        let mut inputs = Vec::with_capacity(input_types.len());
        for (i, &dtype) in input_types.iter().enumerate() {
            let type_str = if dtype.is_defined() { format!("Input{i}") } else { "T".to_string() };
            let (option, is_homogeneous, min_arity) = match desc.input_characteristic(i) {
                IoCharacteristic::Required => (FormalParameterOption::Single, true, 1),
                IoCharacteristic::Optional => (FormalParameterOption::Optional, true, 1),
                IoCharacteristic::Variadic if desc.version >= MIN_VERSION_VARIADIC_IO => {
                    if i + 1 != input_types.len() {
                        return Err(invalid(format!("only the last input may be variadic, the {} is", ordinal(i + 1))));
                    }
                    (
                        FormalParameterOption::Variadic,
                        desc.variadic_input_homogeneity(),
                        desc.variadic_input_min_arity(),
                    )
                }
                IoCharacteristic::Variadic => (FormalParameterOption::Single, true, 1),
            };
            add_constraint(&type_str);
            inputs.push(FormalParameter {
                name: format!("Input{i}"),
                type_str,
                option,
                is_homogeneous,
                min_arity,
            });
        }

        let has_wildcard_input = input_types.iter().any(|t| !t.is_defined());
        let mut outputs = Vec::with_capacity(output_types.len());
        for (i, &dtype) in output_types.iter().enumerate() {
            let type_str = if dtype.is_defined() { format!("Output{i}") } else { "T".to_string() };
            let (option, is_homogeneous, min_arity) = match desc.output_characteristic(i) {
                IoCharacteristic::Required => (FormalParameterOption::Single, true, 1),
                IoCharacteristic::Optional => (FormalParameterOption::Optional, true, 1),
                IoCharacteristic::Variadic if desc.version >= MIN_VERSION_VARIADIC_IO => {
                    if i + 1 != output_types.len() {
                        return Err(invalid(format!("only the last output may be variadic, the {} is", ordinal(i + 1))));
                    }
                    (
                        FormalParameterOption::Variadic,
                        desc.variadic_output_homogeneity(),
                        desc.variadic_output_min_arity(),
                    )
                }
                IoCharacteristic::Variadic => (FormalParameterOption::Single, true, 1),
            };
            if !dtype.is_defined() && option == FormalParameterOption::Single && !has_wildcard_input {
                return Err(invalid(format!(
                    "the {} output is templated but no input is, its type cannot be inferred",
                    ordinal(i + 1)
                )));
            }
            add_constraint(&type_str);
            outputs.push(FormalParameter {
                name: format!("Output{i}"),
                type_str,
                option,
                is_homogeneous,
                min_arity,
            });
        }

        Ok(Self { inputs, outputs, type_constraints: constraints })
    }

    /// Type binding of `desc`, carrying the variadic tails of this shape.
    pub fn binding(&self, desc: &OperatorDescriptor) -> TypeBinding {
        let mut binding = TypeBinding::new(desc.input_types(), desc.output_types());
        if let Some(v) = self.inputs.last().and_then(FormalParameter::variadic) {
            binding = binding.with_variadic_input(v);
        }
        if let Some(v) = self.outputs.last().and_then(FormalParameter::variadic) {
            binding = binding.with_variadic_output(v);
        }
        binding
    }

    /// Fail unless `other` has the same parameter layout.
    pub fn ensure_compatible(&self, op: &str, other: &FormalShape) -> Result<()> {
        Self::compare(op, "input", &self.inputs, &other.inputs)?;
        Self::compare(op, "output", &self.outputs, &other.outputs)
    }

    fn compare(op: &str, what: &str, ours: &[FormalParameter], theirs: &[FormalParameter]) -> Result<()> {
        let mismatch = |detail: String| OpError::SchemaMismatch { op: op.to_string(), detail };
        if ours.len() != theirs.len() {
            return Err(mismatch(format!(
                "{what} count differs, {} registered and {} now",
                ours.len(),
                theirs.len()
            )));
        }
        for (i, (a, b)) in ours.iter().zip(theirs).enumerate() {
            if !a.same_shape(b) {
                return Err(mismatch(format!(
                    "the {} {what} is {:?} (homogeneous: {}, min arity: {}) but was registered as {:?} (homogeneous: {}, min arity: {})",
                    ordinal(i + 1),
                    b.option,
                    b.is_homogeneous,
                    b.min_arity,
                    a.option,
                    a.is_homogeneous,
                    a.min_arity
                )));
            }
        }
        Ok(())
    }
}

/// Shape and type inference over a schema's bindings.
pub type InferenceFn = Arc<dyn Fn(&[DataType], usize) -> Option<Vec<DataType>> + Send + Sync>;

/// Schema of one custom operator, shared by every descriptor with its name.
#[derive(Clone)]
pub struct OpSchema {
    name:          String,
    domain:        String,
    since_version: u32,
    shape:         FormalShape,
    bindings:      Vec<TypeBinding>,
    infer_fn:      InferenceFn,
}

impl OpSchema {
    pub fn new(name: impl Into<String>, domain: impl Into<String>, shape: FormalShape, bindings: Vec<TypeBinding>) -> Self {
        let captured = bindings.clone();
        let infer_fn: InferenceFn = Arc::new(move |inputs, num_outputs| {
            captured.iter().find_map(|b| b.infer(inputs, num_outputs))
        });
        Self {
            name: name.into(),
            domain: domain.into(),
            since_version: CUSTOM_SINCE_VERSION,
            shape,
            bindings,
            infer_fn,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn since_version(&self) -> u32 {
        self.since_version
    }

    pub fn inputs(&self) -> &[FormalParameter] {
        &self.shape.inputs
    }

    pub fn outputs(&self) -> &[FormalParameter] {
        &self.shape.outputs
    }

    pub fn shape(&self) -> &FormalShape {
        &self.shape
    }

    pub fn type_constraints(&self) -> &[TypeConstraint] {
        &self.shape.type_constraints
    }

    pub fn bindings(&self) -> &[TypeBinding] {
        &self.bindings
    }

    /// Custom schemas accept attributes they do not declare.
    pub fn allows_unchecked_attributes(&self) -> bool {
        true
    }

    /// Output types for the declared number of outputs; `None` when no binding
    /// matches, which only means inference is skipped for the node.
    pub fn infer(&self, inputs: &[DataType]) -> Option<Vec<DataType>> {
        (self.infer_fn)(inputs, self.shape.outputs.len())
    }

    /// Same as [`OpSchema::infer`] for a node with `num_outputs` outputs.
    pub fn infer_node(&self, inputs: &[DataType], num_outputs: usize) -> Option<Vec<DataType>> {
        (self.infer_fn)(inputs, num_outputs)
    }

    pub fn inference_fn(&self) -> &InferenceFn {
        &self.infer_fn
    }
}

impl fmt::Debug for OpSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpSchema")
            .field("name", &self.name)
            .field("domain", &self.domain)
            .field("since_version", &self.since_version)
            .field("shape", &self.shape)
            .field("bindings", &self.bindings)
            .finish()
    }
}

/// Committed schemas keyed by (domain, name), plus domain opset ranges.
#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    schemas:         HashMap<(String, String), Arc<OpSchema>>,
    domain_versions: HashMap<String, (u32, u32)>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str, domain: &str) -> Option<&Arc<OpSchema>> {
        self.schemas.get(&(domain.to_string(), name.to_string()))
    }

    pub(crate) fn insert(&mut self, schema: Arc<OpSchema>) {
        let key = (schema.domain().to_string(), schema.name().to_string());
        self.schemas.insert(key, schema);
    }

    /// Record the opset range of `domain` unless it is already known.
    pub(crate) fn add_domain(&mut self, domain: &str, range: (u32, u32)) {
        self.domain_versions.entry(domain.to_string()).or_insert(range);
    }

    pub fn domain_versions(&self, domain: &str) -> Option<(u32, u32)> {
        self.domain_versions.get(domain).copied()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<OpSchema>> {
        self.schemas.values()
    }
}
