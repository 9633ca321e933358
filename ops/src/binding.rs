use core_types::DataType;

/// Trailing variadic formal parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Variadic {
    pub min_arity:   usize,
    pub homogeneous: bool,
}

/// One concrete instantiation of an operator: input types then output types.
///
/// `Undefined` entries are a single shared type variable. Every undefined
/// position has to resolve to the same concrete type for a match.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeBinding {
    inputs:           Vec<DataType>,
    outputs:          Vec<DataType>,
    variadic_input:   Option<Variadic>,
    variadic_output:  Option<Variadic>,
}

impl TypeBinding {
    pub fn new(inputs: Vec<DataType>, outputs: Vec<DataType>) -> Self {
        Self { inputs, outputs, variadic_input: None, variadic_output: None }
    }

    /// The last input repeats for any extra actual inputs.
    pub fn with_variadic_input(mut self, variadic: Variadic) -> Self {
        self.variadic_input = Some(variadic);
        self
    }

    pub fn with_variadic_output(mut self, variadic: Variadic) -> Self {
        self.variadic_output = Some(variadic);
        self
    }

    pub fn inputs(&self) -> &[DataType] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[DataType] {
        &self.outputs
    }

    /// Total number of entries, inputs then outputs.
    pub fn len(&self) -> usize {
        self.inputs.len() + self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_wildcard(&self) -> bool {
        self.inputs.iter().chain(&self.outputs).any(|t| !t.is_defined())
    }

    fn arity_fits(declared: usize, variadic: Option<Variadic>, actual: usize) -> bool {
        match variadic {
            Some(v) if declared > 0 => actual >= declared - 1 + v.min_arity,
            _ => actual == declared,
        }
    }

    /// Match actual input types, `Undefined` meaning unknown.
    ///
    /// Returns the type the wildcard resolved to (`Undefined` if nothing bound
    /// it), or `None` when the binding does not apply.
    pub fn match_inputs(&self, actual: &[DataType]) -> Option<DataType> {
        if !Self::arity_fits(self.inputs.len(), self.variadic_input, actual.len()) {
            return None;
        }
        let last = self.inputs.len().saturating_sub(1);
        let mut wildcard = DataType::Undefined;
        for (i, &found) in actual.iter().enumerate() {
            if !found.is_defined() {
                continue;
            }
            // Only the first slot of a heterogeneous variadic is checked.
            if i > last && self.variadic_input.is_some_and(|v| !v.homogeneous) {
                continue;
            }
            let expected = self.inputs[i.min(last)];
            if expected.is_defined() {
                if expected != found {
                    return None;
                }
            } else if wildcard.is_defined() && wildcard != found {
                return None;
            } else {
                wildcard = found;
            }
        }
        Some(wildcard)
    }

    /// Output types for a node with `count` outputs, substituting `wildcard`.
    pub fn resolve_outputs(&self, count: usize, wildcard: DataType) -> Option<Vec<DataType>> {
        if !Self::arity_fits(self.outputs.len(), self.variadic_output, count) {
            return None;
        }
        let last = self.outputs.len().saturating_sub(1);
        Some(
            (0..count)
                .map(|i| match self.outputs[i.min(last)] {
                    DataType::Undefined => wildcard,
                    t => t,
                })
                .collect(),
        )
    }

    /// Match the inputs and produce the outputs in one go.
    pub fn infer(&self, inputs: &[DataType], num_outputs: usize) -> Option<Vec<DataType>> {
        let wildcard = self.match_inputs(inputs)?;
        self.resolve_outputs(num_outputs, wildcard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DataType::*;

    #[test]
    fn concrete_binding_matches_exactly() {
        let b = TypeBinding::new(vec![Float32, Float32], vec![Float32]);
        assert_eq!(b.len(), 3);
        assert!(!b.has_wildcard());
        assert_eq!(b.infer(&[Float32, Float32], 1), Some(vec![Float32]));
        assert_eq!(b.infer(&[Float32, Int64], 1), None);
        assert_eq!(b.infer(&[Float32], 1), None);
        assert_eq!(b.infer(&[Float32, Float32], 2), None);
        // Unknown inputs are skipped.
        assert_eq!(b.infer(&[Undefined, Float32], 1), Some(vec![Float32]));
    }

    #[test]
    fn wildcard_positions_agree() {
        let b = TypeBinding::new(vec![Undefined, Undefined, Int64], vec![Undefined]);
        assert!(b.has_wildcard());
        assert_eq!(b.infer(&[Float64, Float64, Int64], 1), Some(vec![Float64]));
        assert_eq!(b.infer(&[Float64, Float32, Int64], 1), None);
        assert_eq!(b.infer(&[Undefined, Uint8, Int64], 1), Some(vec![Uint8]));
        assert_eq!(b.infer(&[Undefined, Undefined, Int64], 1), Some(vec![Undefined]));
    }

    #[test]
    fn variadic_tail_repeats() {
        let homogeneous = Variadic { min_arity: 1, homogeneous: true };
        let b = TypeBinding::new(vec![Int64, Undefined], vec![Undefined])
            .with_variadic_input(homogeneous)
            .with_variadic_output(homogeneous);

        assert_eq!(b.infer(&[Int64, Float32, Float32, Float32], 2), Some(vec![Float32, Float32]));
        assert_eq!(b.infer(&[Int64, Float32, Int8], 1), None);
        assert_eq!(b.infer(&[Int64], 1), None);

        let mixed = TypeBinding::new(vec![Undefined], vec![Bool])
            .with_variadic_input(Variadic { min_arity: 2, homogeneous: false });
        assert_eq!(mixed.infer(&[Float32, Int8, Uint16], 1), Some(vec![Bool]));
        assert_eq!(mixed.infer(&[Float32], 1), None);
    }
}
