/// Row-major strides, in elements, for `shape`.
pub fn compute_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// Number of elements described by `shape`; a scalar (`[]`) holds one.
pub fn element_count(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Number of `u64` words needed to hold `bytes` bytes.
pub(crate) fn words_for(bytes: usize) -> usize {
    bytes.div_ceil(8)
}
