use std::collections::HashMap;

use core_types::{DataType, ProviderId};
use sable_ops::AttributeValue;
use tensor::Tensor;

/// One operator invocation.
///
/// An empty input or output name marks an omitted optional parameter.
#[derive(Clone, Debug)]
pub struct Node {
    pub name:       String,
    pub domain:     String,
    pub op_type:    String,
    pub inputs:     Vec<String>,
    pub outputs:    Vec<String>,
    pub attributes: HashMap<String, AttributeValue>,
    /// Assigned provider; the runtime's default provider when `None`.
    pub provider:   Option<ProviderId>,
}

impl Node {
    pub fn new(name: impl Into<String>, domain: impl Into<String>, op_type: impl Into<String>) -> Self {
        Self {
            name:       name.into(),
            domain:     domain.into(),
            op_type:    op_type.into(),
            inputs:     Vec::new(),
            outputs:    Vec::new(),
            attributes: HashMap::new(),
            provider:   None,
        }
    }

    pub fn inputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn outputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn on(mut self, provider: ProviderId) -> Self {
        self.provider = Some(provider);
        self
    }
}

/// Small in-memory graph: typed inputs, initializers, nodes and outputs.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    inputs:       Vec<(String, DataType)>,
    initializers: Vec<(String, Tensor)>,
    nodes:        Vec<Node>,
    outputs:      Vec<String>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a fed input; `Undefined` accepts any element type.
    pub fn input(mut self, name: impl Into<String>, dtype: DataType) -> Self {
        self.inputs.push((name.into(), dtype));
        self
    }

    pub fn initializer(mut self, name: impl Into<String>, value: Tensor) -> Self {
        self.initializers.push((name.into(), value));
        self
    }

    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }

    pub fn inputs(&self) -> &[(String, DataType)] {
        &self.inputs
    }

    pub fn initializers(&self) -> &[(String, Tensor)] {
        &self.initializers
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }
}
