mod utils;

use bytemuck::{cast_slice, cast_slice_mut};
use core_types::{DataType, Element};
use thiserror::Error;

pub use utils::{compute_strides, element_count};

pub type Result<T> = std::result::Result<T, TensorError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TensorError {
    #[error("tensor holds {found} elements, {expected} expected")]
    DtypeMismatch { expected: DataType, found: DataType },

    #[error("shape {shape:?} needs {expected} elements, got {found}")]
    ShapeMismatch { shape: Vec<usize>, expected: usize, found: usize },

    #[error("cannot allocate a tensor of undefined element type")]
    UndefinedType,
}

/// Dynamically typed host tensor: (dtype, shape, strides, bytes).
///
/// Storage is kept in `u64` words so every element view is suitably aligned.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    dtype:    DataType,
    shape:    Vec<usize>,
    strides:  Vec<usize>,
    byte_len: usize,
    words:    Vec<u64>,
}

impl Tensor {
    /* --------------------------------------------------------------------- */
    /* Constructors                                                          */
    /* --------------------------------------------------------------------- */

    /// Allocate a zero-filled tensor.
    pub fn zeros(dtype: DataType, shape: &[usize]) -> Result<Self> {
        if !dtype.is_defined() {
            return Err(TensorError::UndefinedType);
        }
        let byte_len = element_count(shape) * dtype.size_in_bytes();
        Ok(Tensor {
            dtype,
            shape:   shape.to_vec(),
            strides: compute_strides(shape),
            byte_len,
            words:   vec![0; utils::words_for(byte_len)],
        })
    }

    /// Build a tensor from host data laid out row-major.
    pub fn from_vec<T: Element>(data: &[T], shape: &[usize]) -> Result<Self> {
        let expected = element_count(shape);
        if data.len() != expected {
            return Err(TensorError::ShapeMismatch {
                shape: shape.to_vec(),
                expected,
                found: data.len(),
            });
        }
        let mut t = Tensor::zeros(T::DTYPE, shape)?;
        t.as_mut_slice::<T>()?.copy_from_slice(data);
        Ok(t)
    }

    /// Rank-0 tensor holding one value.
    pub fn scalar<T: Element>(value: T) -> Self {
        let mut t = Tensor {
            dtype:    T::DTYPE,
            shape:    Vec::new(),
            strides:  Vec::new(),
            byte_len: std::mem::size_of::<T>(),
            words:    vec![0; utils::words_for(std::mem::size_of::<T>())],
        };
        t.bytes_mut().copy_from_slice(bytemuck::bytes_of(&value));
        t
    }

    /* --------------------------------------------------------------------- */
    /* Accessors                                                             */
    /* --------------------------------------------------------------------- */

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn element_count(&self) -> usize {
        element_count(&self.shape)
    }

    pub fn bytes(&self) -> &[u8] {
        &cast_slice::<u64, u8>(&self.words)[..self.byte_len]
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        let len = self.byte_len;
        &mut cast_slice_mut::<u64, u8>(&mut self.words)[..len]
    }

    /// Typed view of the elements.
    pub fn as_slice<T: Element>(&self) -> Result<&[T]> {
        self.check_dtype::<T>()?;
        Ok(cast_slice(self.bytes()))
    }

    pub fn as_mut_slice<T: Element>(&mut self) -> Result<&mut [T]> {
        self.check_dtype::<T>()?;
        Ok(cast_slice_mut(self.bytes_mut()))
    }

    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        Ok(self.as_slice::<T>()?.to_vec())
    }

    fn check_dtype<T: Element>(&self) -> Result<()> {
        if self.dtype != T::DTYPE {
            return Err(TensorError::DtypeMismatch { expected: T::DTYPE, found: self.dtype });
        }
        Ok(())
    }
}

/* ------------------------------------------------------------------------- */
/*                                     Tests                                 */
/* ------------------------------------------------------------------------- */
