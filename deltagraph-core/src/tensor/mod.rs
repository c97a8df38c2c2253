//! The [Tensor] type: a dense, row-major, N-dimensional `f64` array.
//!
//! Tensors are allocated from a [Cpu] and share their buffer through an
//! `Arc`: cloning is cheap, and mutation ([Tensor::set],
//! [Tensor::add_in_place], [Tensor::as_mut_slice]) copies the buffer first if
//! anyone else still holds it. That copy-on-write is what lets a backward
//! accumulator keep reading the forward-time values of a parameter while an
//! optimizer updates the parameter itself.
//!
//! When the last holder of a buffer goes away the buffer is returned to the
//! [Cpu]'s cache of same-length allocations.

mod coord;
mod ops;

pub use coord::{CoordStream, Coordinate};
pub use ops::broadcast_dims;

use crate::{
    cpu::{CachableVec, Cpu},
    unique_id::{HasUniqueId, UniqueId},
    Error,
};
use std::sync::Arc;

/// Number of elements in a tensor of shape `dims`. The empty shape holds one
/// element.
pub fn num_elements(dims: &[usize]) -> usize {
    dims.iter().product()
}

/// Row-major strides of `dims` (the last axis is contiguous).
pub fn strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; dims.len()];
    for i in (0..dims.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * dims[i + 1];
    }
    strides
}

#[derive(Clone)]
pub struct Tensor {
    pub(crate) id: UniqueId,
    pub(crate) dims: Vec<usize>,
    pub(crate) data: Arc<CachableVec>,
    pub(crate) device: Cpu,
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("id", &self.id)
            .field("dims", &self.dims)
            .field("data", &self.data.data)
            .finish()
    }
}

impl HasUniqueId for Tensor {
    fn id(&self) -> UniqueId {
        self.id
    }
}

impl Tensor {
    /// The shape of this tensor.
    pub fn dimensions(&self) -> &[usize] {
        &self.dims
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn device(&self) -> &Cpu {
        &self.device
    }

    pub fn as_slice(&self) -> &[f64] {
        self.data.as_slice()
    }

    /// Mutable access to the elements. Copies the buffer first if it is
    /// shared with another tensor.
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        Arc::make_mut(&mut self.data).as_mut_slice()
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.data.to_vec()
    }

    /// Returns `true` if both tensors share the same backing buffer.
    pub fn shares_buffer(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Offset of `coords` in the row-major buffer.
    pub fn index_of(&self, coords: &[usize]) -> Result<usize, Error> {
        if coords.len() != self.dims.len() {
            return Err(Error::DimensionMismatch {
                expected: self.dims.clone(),
                found: coords.to_vec(),
            });
        }
        let mut index = 0;
        for (&c, &d) in coords.iter().zip(self.dims.iter()) {
            if c >= d {
                return Err(Error::IndexOutOfBounds { index: c, len: d });
            }
            index = index * d + c;
        }
        Ok(index)
    }

    /// Fallible version of [Tensor::get].
    pub fn try_get(&self, coords: &[usize]) -> Result<f64, Error> {
        Ok(self.data[self.index_of(coords)?])
    }

    /// The element at `coords`.
    ///
    /// **Panics** if `coords` is outside this tensor's shape.
    pub fn get(&self, coords: &[usize]) -> f64 {
        self.try_get(coords).unwrap()
    }

    /// Fallible version of [Tensor::set].
    pub fn try_set(&mut self, coords: &[usize], value: f64) -> Result<(), Error> {
        let i = self.index_of(coords)?;
        self.as_mut_slice()[i] = value;
        Ok(())
    }

    /// Sets the element at `coords`.
    ///
    /// **Panics** if `coords` is outside this tensor's shape.
    pub fn set(&mut self, coords: &[usize], value: f64) {
        self.try_set(coords, value).unwrap()
    }

    /// Same data viewed with a different shape of equal element count.
    /// The buffer is shared, not copied.
    pub fn reshape(&self, dims: &[usize]) -> Result<Tensor, Error> {
        if num_elements(dims) != self.len() {
            return Err(Error::WrongNumElements {
                dims: dims.to_vec(),
                len: self.len(),
            });
        }
        Ok(Tensor {
            id: crate::unique_id::unique_id(),
            dims: dims.to_vec(),
            data: self.data.clone(),
            device: self.device.clone(),
        })
    }

    /// A deep copy with its own buffer and id.
    pub fn try_copy(&self) -> Result<Tensor, Error> {
        let mut data = self.device.try_alloc_zeros(self.len())?;
        data.copy_from_slice(self.as_slice());
        Ok(self.device.wrap(&self.dims, data))
    }

    /// Overwrites every element with the values in `src`.
    pub fn copy_from(&mut self, src: &[f64]) -> Result<(), Error> {
        if src.len() != self.len() {
            return Err(Error::LengthMismatch {
                expected: self.len(),
                found: src.len(),
            });
        }
        self.as_mut_slice().copy_from_slice(src);
        Ok(())
    }
}

impl PartialEq for Tensor {
    /// Shape and values are compared; ids are ignored.
    fn eq(&self, other: &Self) -> bool {
        self.dims == other.dims && self.as_slice() == other.as_slice()
    }
}
