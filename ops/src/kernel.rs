//! What a kernel can see: [`KernelInfo`] while it is being created and
//! [`KernelContext`] while it computes.
//!
//! Variable-length queries follow a two-phase contract. Called without a
//! buffer they return the exact size needed. Called with a buffer that is too
//! small they fail with [`OpError::BufferTooSmall`] and leave the buffer as it
//! was. Otherwise they copy everything and return the size. String sizes count
//! a terminating NUL.

use std::collections::HashMap;

use core_types::{DataType, ProviderId};
use derive_more::From;
use sable_core::{ExecutionProvider, ProviderLogger, Stream};
use tensor::Tensor;

use crate::error::{OpError, Result};

#[derive(Clone, Debug, PartialEq, From)]
pub enum AttributeValue {
    Float(f32),
    Int(i64),
    String(String),
    Tensor(Tensor),
    Floats(Vec<f32>),
    Ints(Vec<i64>),
    Strings(Vec<String>),
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

/// Copy `src` into `dst` under the two-phase contract.
fn copy_two_phase<T: Copy>(src: &[T], dst: Option<&mut [T]>) -> Result<usize> {
    let required = src.len();
    match dst {
        None => Ok(required),
        Some(dst) if dst.len() < required => Err(OpError::BufferTooSmall { required }),
        Some(dst) => {
            dst[..required].copy_from_slice(src);
            Ok(required)
        }
    }
}

/// Copy `s` plus a terminating NUL.
fn copy_string(s: &str, dst: Option<&mut [u8]>) -> Result<usize> {
    let required = s.len() + 1;
    match dst {
        None => Ok(required),
        Some(dst) if dst.len() < required => Err(OpError::BufferTooSmall { required }),
        Some(dst) => {
            dst[..s.len()].copy_from_slice(s.as_bytes());
            dst[s.len()] = 0;
            Ok(required)
        }
    }
}

fn name_at<'a>(names: &'a [String], what: &'static str, index: usize) -> Result<&'a str> {
    names
        .get(index)
        .map(String::as_str)
        .ok_or(OpError::IndexOutOfBounds { what, index, count: names.len() })
}

/* ------------------------------------------------------------------------- */
/* Build time                                                                */
/* ------------------------------------------------------------------------- */

/// Per-node information available when a kernel is created.
#[derive(Clone, Debug, Default)]
pub struct KernelInfo {
    node_name:       String,
    input_names:     Vec<String>,
    output_names:    Vec<String>,
    input_types:     Vec<DataType>,
    output_types:    Vec<DataType>,
    attributes:      HashMap<String, AttributeValue>,
    constant_inputs: HashMap<usize, Tensor>,
    provider:        Option<ProviderId>,
    logger:          Option<ProviderLogger>,
}

impl KernelInfo {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self { node_name: node_name.into(), ..Self::default() }
    }

    /// Append an input; `Undefined` marks an untyped node argument.
    pub fn with_input(mut self, name: impl Into<String>, dtype: DataType) -> Self {
        self.input_names.push(name.into());
        self.input_types.push(dtype);
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, dtype: DataType) -> Self {
        self.output_names.push(name.into());
        self.output_types.push(dtype);
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Mark input `index` as an initializer holding `value`.
    pub fn with_constant_input(mut self, index: usize, value: Tensor) -> Self {
        self.constant_inputs.insert(index, value);
        self
    }

    /// Attach the provider that will own the kernel.
    pub fn with_provider(mut self, provider: &dyn ExecutionProvider) -> Self {
        self.provider = Some(provider.provider_type().clone());
        self.logger = provider.logger().cloned();
        self
    }

    pub fn input_count(&self) -> usize {
        self.input_names.len()
    }

    pub fn output_count(&self) -> usize {
        self.output_names.len()
    }

    pub fn node_name(&self, buf: Option<&mut [u8]>) -> Result<usize> {
        copy_string(&self.node_name, buf)
    }

    pub fn input_name(&self, index: usize, buf: Option<&mut [u8]>) -> Result<usize> {
        copy_string(name_at(&self.input_names, "input", index)?, buf)
    }

    pub fn output_name(&self, index: usize, buf: Option<&mut [u8]>) -> Result<usize> {
        copy_string(name_at(&self.output_names, "output", index)?, buf)
    }

    pub fn input_type_info(&self, index: usize) -> Result<DataType> {
        Self::type_at(&self.input_types, &self.input_names, "input", index)
    }

    pub fn output_type_info(&self, index: usize) -> Result<DataType> {
        Self::type_at(&self.output_types, &self.output_names, "output", index)
    }

    fn type_at(types: &[DataType], names: &[String], what: &'static str, index: usize) -> Result<DataType> {
        let dtype = *types
            .get(index)
            .ok_or(OpError::IndexOutOfBounds { what, index, count: types.len() })?;
        if !dtype.is_defined() {
            return Err(OpError::InvalidGraph(format!(
                "{what} '{}' has no type information",
                names[index]
            )));
        }
        Ok(dtype)
    }

    fn attribute(&self, name: &str) -> Result<&AttributeValue> {
        self.attributes
            .get(name)
            .ok_or_else(|| OpError::AttributeNotFound(name.to_string()))
    }

    fn mismatch(name: &str, expected: &'static str) -> OpError {
        OpError::AttributeType { name: name.to_string(), expected }
    }

    pub fn attribute_f32(&self, name: &str) -> Result<f32> {
        match self.attribute(name)? {
            AttributeValue::Float(v) => Ok(*v),
            _ => Err(Self::mismatch(name, "a float")),
        }
    }

    pub fn attribute_i64(&self, name: &str) -> Result<i64> {
        match self.attribute(name)? {
            AttributeValue::Int(v) => Ok(*v),
            _ => Err(Self::mismatch(name, "an int")),
        }
    }

    pub fn attribute_string(&self, name: &str, buf: Option<&mut [u8]>) -> Result<usize> {
        match self.attribute(name)? {
            AttributeValue::String(v) => copy_string(v, buf),
            _ => Err(Self::mismatch(name, "a string")),
        }
    }

    pub fn attribute_f32s(&self, name: &str, buf: Option<&mut [f32]>) -> Result<usize> {
        match self.attribute(name)? {
            AttributeValue::Floats(v) => copy_two_phase(v, buf),
            _ => Err(Self::mismatch(name, "a float array")),
        }
    }

    pub fn attribute_i64s(&self, name: &str, buf: Option<&mut [i64]>) -> Result<usize> {
        match self.attribute(name)? {
            AttributeValue::Ints(v) => copy_two_phase(v, buf),
            _ => Err(Self::mismatch(name, "an int array")),
        }
    }

    pub fn attribute_strings(&self, name: &str) -> Result<&[String]> {
        match self.attribute(name)? {
            AttributeValue::Strings(v) => Ok(v),
            _ => Err(Self::mismatch(name, "a string array")),
        }
    }

    /// Owned copy of a tensor attribute.
    pub fn attribute_tensor(&self, name: &str) -> Result<Tensor> {
        match self.attribute(name)? {
            AttributeValue::Tensor(t) => Ok(t.clone()),
            _ => Err(Self::mismatch(name, "a tensor")),
        }
    }

    /// Value of input `index` when it is an initializer.
    pub fn constant_input(&self, index: usize) -> Result<Option<&Tensor>> {
        if index >= self.input_count() {
            return Err(OpError::IndexOutOfBounds { what: "input", index, count: self.input_count() });
        }
        Ok(self.constant_inputs.get(&index))
    }

    pub fn provider(&self) -> Option<&ProviderId> {
        self.provider.as_ref()
    }

    pub fn logger(&self) -> Result<&ProviderLogger> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| OpError::InvalidGraph("node has no execution provider".to_string()))?;
        self.logger.as_ref().ok_or_else(|| {
            OpError::InvalidGraph(format!("provider '{provider}' exposes no logger"))
        })
    }
}

/* ------------------------------------------------------------------------- */
/* Run time                                                                  */
/* ------------------------------------------------------------------------- */

/// Inputs, outputs and the compute stream of one kernel invocation.
pub struct KernelContext<'a> {
    inputs:       Vec<Option<&'a Tensor>>,
    output_types: &'a [DataType],
    outputs:      Vec<Option<Tensor>>,
    stream:       Option<&'a dyn Stream>,
    logger:       Option<&'a ProviderLogger>,
}

impl<'a> KernelContext<'a> {
    /// `None` inputs are omitted optional inputs.
    pub fn new(
        inputs: Vec<Option<&'a Tensor>>,
        output_types: &'a [DataType],
        stream: Option<&'a dyn Stream>,
        logger: Option<&'a ProviderLogger>,
    ) -> Self {
        Self {
            inputs,
            output_types,
            outputs: vec![None; output_types.len()],
            stream,
            logger,
        }
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// `Ok(None)` for an omitted optional input.
    pub fn input(&self, index: usize) -> Result<Option<&'a Tensor>> {
        self.inputs
            .get(index)
            .copied()
            .ok_or(OpError::IndexOutOfBounds { what: "input", index, count: self.inputs.len() })
    }

    /// Input that must be present.
    pub fn required_input(&self, index: usize) -> Result<&'a Tensor> {
        self.input(index)?
            .ok_or_else(|| OpError::InvalidArgument(format!("input {index} was not supplied")))
    }

    /// Allocate output `index` with the planned element type.
    pub fn output(&mut self, index: usize, shape: &[usize]) -> Result<&mut Tensor> {
        let dtype = self.planned_output_type(index)?;
        if !dtype.is_defined() {
            return Err(OpError::InvalidArgument(format!(
                "output {index} has no planned type, allocate it with output_typed"
            )));
        }
        self.output_typed(index, dtype, shape)
    }

    /// Allocate output `index` with an explicit element type.
    pub fn output_typed(&mut self, index: usize, dtype: DataType, shape: &[usize]) -> Result<&mut Tensor> {
        self.check_output(index, dtype)?;
        Ok(self.outputs[index].insert(Tensor::zeros(dtype, shape)?))
    }

    /// Hand over an already computed value for output `index`.
    pub fn set_output(&mut self, index: usize, value: Tensor) -> Result<()> {
        self.check_output(index, value.dtype())?;
        self.outputs[index] = Some(value);
        Ok(())
    }

    fn planned_output_type(&self, index: usize) -> Result<DataType> {
        self.output_types
            .get(index)
            .copied()
            .ok_or(OpError::IndexOutOfBounds { what: "output", index, count: self.output_types.len() })
    }

    fn check_output(&self, index: usize, dtype: DataType) -> Result<()> {
        let planned = self.planned_output_type(index)?;
        if planned.is_defined() && planned != dtype {
            return Err(OpError::InvalidArgument(format!(
                "output {index} is planned as {planned}, kernel produced {dtype}"
            )));
        }
        Ok(())
    }

    /// Stream the kernel runs on; `None` on host providers.
    pub fn compute_stream(&self) -> Option<&'a dyn Stream> {
        self.stream
    }

    pub fn logger(&self) -> Result<&'a ProviderLogger> {
        self.logger
            .ok_or_else(|| OpError::InvalidGraph("kernel context has no logger".to_string()))
    }

    /// Outputs in order; `None` where the kernel produced nothing.
    pub fn into_outputs(self) -> Vec<Option<Tensor>> {
        self.outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::CPU_PROVIDER;
    use sable_core::{CpuExecutionProvider, Severity};

    fn info() -> KernelInfo {
        KernelInfo::new("scale_node")
            .with_input("x", DataType::Float32)
            .with_input("bias", DataType::Float32)
            .with_output("y", DataType::Undefined)
            .with_attribute("alpha", 0.5f32)
            .with_attribute("axis", 1i64)
            .with_attribute("mode", "linear")
            .with_attribute("pads", vec![1i64, 2, 3])
            .with_attribute("weights", vec![0.25f32, 0.75])
            .with_attribute("labels", vec!["a".to_string(), "b".to_string()])
            .with_attribute("table", Tensor::from_vec(&[1i32, 2], &[2]).unwrap())
            .with_constant_input(1, Tensor::scalar(3.0f32))
    }

    #[test]
    fn array_attribute_two_phase_copy() {
        let info = info();
        assert_eq!(info.attribute_i64s("pads", None).unwrap(), 3);

        let mut short = [7i64; 2];
        let err = info.attribute_i64s("pads", Some(&mut short)).unwrap_err();
        assert!(matches!(err, OpError::BufferTooSmall { required: 3 }));
        assert_eq!(short, [7, 7]);

        let mut exact = [0i64; 3];
        assert_eq!(info.attribute_i64s("pads", Some(&mut exact)).unwrap(), 3);
        assert_eq!(exact, [1, 2, 3]);

        let mut roomy = [0f32; 4];
        assert_eq!(info.attribute_f32s("weights", Some(&mut roomy)).unwrap(), 2);
        assert_eq!(roomy, [0.25, 0.75, 0.0, 0.0]);
    }

    #[test]
    fn string_queries_count_the_terminator() {
        let info = info();
        assert_eq!(info.attribute_string("mode", None).unwrap(), 7);

        let mut short = [b'x'; 6];
        assert!(matches!(
            info.attribute_string("mode", Some(&mut short)),
            Err(OpError::BufferTooSmall { required: 7 })
        ));
        assert_eq!(short, [b'x'; 6]);

        let mut buf = [0xffu8; 7];
        assert_eq!(info.attribute_string("mode", Some(&mut buf)).unwrap(), 7);
        assert_eq!(&buf, b"linear\0");

        let mut name = [0u8; 11];
        assert_eq!(info.node_name(Some(&mut name)).unwrap(), 11);
        assert_eq!(&name, b"scale_node\0");
        assert_eq!(info.input_name(1, None).unwrap(), 5);
        assert!(matches!(info.output_name(3, None), Err(OpError::IndexOutOfBounds { index: 3, .. })));
    }

    #[test]
    fn scalar_tensor_and_missing_attributes() {
        let info = info();
        assert_eq!(info.attribute_f32("alpha").unwrap(), 0.5);
        assert_eq!(info.attribute_i64("axis").unwrap(), 1);
        assert_eq!(info.attribute_strings("labels").unwrap(), ["a", "b"]);
        assert_eq!(info.attribute_tensor("table").unwrap().to_vec::<i32>().unwrap(), vec![1, 2]);
        assert!(matches!(info.attribute_f32("axis"), Err(OpError::AttributeType { .. })));
        assert!(matches!(info.attribute_i64("beta"), Err(OpError::AttributeNotFound(n)) if n == "beta"));
    }

    #[test]
    fn type_info_and_constant_inputs() {
        let info = info();
        assert_eq!(info.input_count(), 2);
        assert_eq!(info.output_count(), 1);
        assert_eq!(info.input_type_info(0).unwrap(), DataType::Float32);
        assert!(matches!(info.output_type_info(0), Err(OpError::InvalidGraph(_))));
        assert!(info.constant_input(0).unwrap().is_none());
        assert_eq!(info.constant_input(1).unwrap(), Some(&Tensor::scalar(3.0f32)));
        assert!(info.constant_input(2).is_err());
    }

    #[test]
    fn logger_requires_a_provider() {
        let bare = info();
        assert!(matches!(bare.logger(), Err(OpError::InvalidGraph(_))));
        assert!(bare.provider().is_none());

        let owned = info().with_provider(&CpuExecutionProvider::new());
        assert_eq!(owned.provider(), Some(&CPU_PROVIDER));
        assert_eq!(owned.logger().unwrap().severity(), Severity::Warning);
    }

    #[test]
    fn provider_without_logger_is_an_invalid_graph() {
        struct Silent(ProviderId);

        impl ExecutionProvider for Silent {
            fn provider_type(&self) -> &ProviderId {
                &self.0
            }
        }

        let info = info().with_provider(&Silent(ProviderId::from_static("SilentExecutionProvider")));
        assert!(info.provider().is_some());
        assert!(matches!(info.logger(), Err(OpError::InvalidGraph(msg)) if msg.contains("SilentExecutionProvider")));
    }

    #[test]
    fn context_allocates_planned_outputs() {
        let x = Tensor::from_vec(&[1.0f32, 2.0], &[2]).unwrap();
        let planned = [DataType::Float32, DataType::Undefined];
        let mut ctx = KernelContext::new(vec![Some(&x), None], &planned, None, None);

        assert_eq!(ctx.input_count(), 2);
        assert_eq!(ctx.required_input(0).unwrap(), &x);
        assert!(ctx.input(1).unwrap().is_none());
        assert!(ctx.required_input(1).is_err());
        assert!(ctx.compute_stream().is_none());
        assert!(matches!(ctx.logger(), Err(OpError::InvalidGraph(_))));

        ctx.output(0, &[2]).unwrap().as_mut_slice::<f32>().unwrap()[1] = 9.0;
        assert!(ctx.output(1, &[1]).is_err());
        ctx.output_typed(1, DataType::Int64, &[1]).unwrap();
        assert!(ctx.set_output(0, Tensor::scalar(1i32)).is_err());

        let outputs = ctx.into_outputs();
        assert_eq!(outputs[0].as_ref().unwrap().to_vec::<f32>().unwrap(), vec![0.0, 9.0]);
        assert_eq!(outputs[1].as_ref().unwrap().dtype(), DataType::Int64);
    }
}
