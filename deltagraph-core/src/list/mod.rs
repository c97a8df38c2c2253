//! Batches of tensors.
//!
//! A [TensorList] is an ordered batch of tensors that all share one shape.
//! [TensorArray] owns its tensors; the views in [views] compute each item on
//! demand from a backing list, which keeps crop/tile/reshape operators from
//! materializing a full copy of the batch on every forward pass.
//!
//! Batch broadcasting mirrors the tensor rule: a list of length 1 stands in
//! for a list of any length in [zip_broadcast], and [TensorArray::reduce_to_len]
//! sums a gradient back down to length 1 on the way back.

pub mod views;

pub use views::{ReshapedList, Window, WindowList};

use crate::{
    cpu::Cpu,
    tensor::{broadcast_dims, Tensor},
    Error,
};
use std::sync::Arc;

/// An ordered batch of same-shaped tensors.
pub trait TensorList: Send + Sync + std::fmt::Debug {
    /// Batch size.
    fn len(&self) -> usize;

    /// Shape of every item (the batch axis excluded).
    fn dimensions(&self) -> &[usize];

    /// The `index`-th item. Must be a pure function of `index`: repeated
    /// calls return equal tensors.
    fn get(&self, index: usize) -> Result<Tensor, Error>;

    /// The context items are allocated from.
    fn device(&self) -> &Cpu;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materializes every item into a [TensorArray], in parallel when the
    /// device allows it.
    fn to_array(&self) -> Result<TensorArray, Error> {
        let items = self.device().try_map_batch(self.len(), |i| self.get(i))?;
        Ok(TensorArray {
            dims: self.dimensions().to_vec(),
            items,
            device: self.device().clone(),
        })
    }
}

/// A shared, immutable batch, as held by a [crate::node::Node].
pub type SharedList = Arc<dyn TensorList>;

impl dyn TensorList + '_ {
    /// Lazily yields every item in order.
    pub fn stream(&self) -> ListStream<'_> {
        ListStream::new(self)
    }
}

/// Iterator over the items of a [TensorList].
pub struct ListStream<'a> {
    list: &'a dyn TensorList,
    index: usize,
}

impl<'a> ListStream<'a> {
    pub fn new(list: &'a dyn TensorList) -> Self {
        Self { list, index: 0 }
    }
}

impl<'a> Iterator for ListStream<'a> {
    type Item = Result<Tensor, Error>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.list.len() {
            return None;
        }
        let item = self.list.get(self.index);
        self.index += 1;
        Some(item)
    }
}

/// An array-backed [TensorList] that owns its items.
#[derive(Debug, Clone)]
pub struct TensorArray {
    pub(crate) dims: Vec<usize>,
    pub(crate) items: Vec<Tensor>,
    pub(crate) device: Cpu,
}

impl TensorArray {
    /// A batch of `items`, each of which must have shape `dims`.
    pub fn new(device: &Cpu, dims: &[usize], items: Vec<Tensor>) -> Result<Self, Error> {
        for t in items.iter() {
            if t.dimensions() != dims {
                return Err(Error::DimensionMismatch {
                    expected: dims.to_vec(),
                    found: t.dimensions().to_vec(),
                });
            }
        }
        Ok(Self {
            dims: dims.to_vec(),
            items,
            device: device.clone(),
        })
    }

    /// A batch whose shape is taken from the first of `items`.
    ///
    /// Returns [Error::LengthMismatch] for an empty vector, which has no shape.
    pub fn from_tensors(items: Vec<Tensor>) -> Result<Self, Error> {
        let first = items.first().ok_or(Error::LengthMismatch {
            expected: 1,
            found: 0,
        })?;
        let device = first.device().clone();
        let dims = first.dimensions().to_vec();
        Self::new(&device, &dims, items)
    }

    /// A batch of one.
    pub fn single(tensor: Tensor) -> Self {
        Self {
            dims: tensor.dimensions().to_vec(),
            device: tensor.device().clone(),
            items: vec![tensor],
        }
    }

    /// `len` zero tensors of shape `dims`.
    pub fn zeros(device: &Cpu, dims: &[usize], len: usize) -> Result<Self, Error> {
        let items = (0..len)
            .map(|_| device.try_zeros(dims))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            dims: dims.to_vec(),
            items,
            device: device.clone(),
        })
    }

    pub fn items(&self) -> &[Tensor] {
        &self.items
    }

    pub fn into_items(self) -> Vec<Tensor> {
        self.items
    }

    pub fn stream(&self) -> ListStream<'_> {
        ListStream::new(self)
    }

    /// Converts into a shared list for a [crate::node::Node].
    pub fn shared(self) -> SharedList {
        Arc::new(self)
    }

    /// Applies `f` to every item (in parallel when enabled). Every output
    /// must have shape `dims`.
    pub fn try_map_items<F>(&self, dims: &[usize], f: F) -> Result<TensorArray, Error>
    where
        F: Fn(usize, &Tensor) -> Result<Tensor, Error> + Send + Sync,
    {
        let items = self
            .device
            .try_map_batch(self.items.len(), |i| f(i, &self.items[i]))?;
        TensorArray::new(&self.device, dims, items)
    }

    /// Sum over the batch axis.
    pub fn sum(&self) -> Result<Tensor, Error> {
        let mut acc = self.device.try_zeros(&self.dims)?;
        {
            let out = acc.as_mut_slice();
            for t in self.items.iter() {
                for (o, x) in out.iter_mut().zip(t.as_slice()) {
                    *o += x;
                }
            }
        }
        Ok(acc)
    }

    /// Sums this batch down to length `len`: the identity when the lengths
    /// match, the batch sum when `len` is 1. This is the backward half of
    /// batch broadcasting.
    pub fn reduce_to_len(self, len: usize) -> Result<TensorArray, Error> {
        if len == self.items.len() {
            Ok(self)
        } else if len == 1 {
            let sum = self.sum()?;
            Ok(TensorArray::single(sum))
        } else {
            Err(Error::LengthMismatch {
                expected: len,
                found: self.items.len(),
            })
        }
    }

    /// Sums every item down to shape `dims` (see [Tensor::reduce_to]).
    pub fn reduce_items_to(self, dims: &[usize]) -> Result<TensorArray, Error> {
        if dims == self.dims.as_slice() {
            return Ok(self);
        }
        self.try_map_items(dims, |_, t| t.reduce_to(dims))
    }

    /// Flat copy of every item's data, item after item.
    pub fn to_flat_vec(&self) -> Vec<f64> {
        self.items.iter().flat_map(|t| t.as_slice().iter().copied()).collect()
    }
}

impl TensorList for TensorArray {
    fn len(&self) -> usize {
        self.items.len()
    }

    fn dimensions(&self) -> &[usize] {
        &self.dims
    }

    fn get(&self, index: usize) -> Result<Tensor, Error> {
        self.items
            .get(index)
            .cloned()
            .ok_or(Error::IndexOutOfBounds {
                index,
                len: self.items.len(),
            })
    }

    fn device(&self) -> &Cpu {
        &self.device
    }

    fn to_array(&self) -> Result<TensorArray, Error> {
        Ok(self.clone())
    }
}

/// Output batch length of a binary op: equal lengths, or a length-1 side
/// broadcast over the other.
pub fn broadcast_len(lhs: usize, rhs: usize) -> Result<usize, Error> {
    if lhs == rhs || rhs == 1 {
        Ok(lhs)
    } else if lhs == 1 {
        Ok(rhs)
    } else {
        Err(Error::LengthMismatch {
            expected: lhs,
            found: rhs,
        })
    }
}

/// Applies `f` itemwise to two lists, broadcasting a length-1 list over the
/// other's batch. Item shapes follow [broadcast_dims].
pub fn zip_broadcast<F>(
    lhs: &dyn TensorList,
    rhs: &dyn TensorList,
    f: F,
) -> Result<TensorArray, Error>
where
    F: Fn(&Tensor, &Tensor) -> Result<Tensor, Error> + Send + Sync,
{
    let len = broadcast_len(lhs.len(), rhs.len())?;
    let dims = broadcast_dims(lhs.dimensions(), rhs.dimensions())?.to_vec();
    let (l_len, r_len) = (lhs.len(), rhs.len());
    let items = lhs.device().try_map_batch(len, |i| {
        let l = lhs.get(if l_len == 1 { 0 } else { i })?;
        let r = rhs.get(if r_len == 1 { 0 } else { i })?;
        f(&l, &r)
    })?;
    TensorArray::new(lhs.device(), &dims, items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::*;

    fn batch(dev: &Cpu, rows: &[&[f64]]) -> TensorArray {
        let items = rows.iter().map(|r| dev.vector(r.to_vec())).collect();
        TensorArray::from_tensors(items).unwrap()
    }

    #[test]
    fn test_array_rejects_mixed_shapes() {
        let dev: Cpu = Default::default();
        let r = TensorArray::new(&dev, &[2], vec![dev.zeros(&[2]), dev.zeros(&[3])]);
        assert_eq!(
            r.unwrap_err(),
            Error::DimensionMismatch {
                expected: vec![2],
                found: vec![3]
            }
        );
        assert!(TensorArray::from_tensors(Vec::new()).is_err());
    }

    #[test]
    fn test_get_out_of_range() {
        let dev: Cpu = Default::default();
        let a = TensorArray::zeros(&dev, &[2], 3).unwrap();
        assert!(a.get(2).is_ok());
        assert_eq!(a.get(3).unwrap_err(), Error::IndexOutOfBounds { index: 3, len: 3 });
    }

    #[test]
    fn test_stream_yields_every_item() {
        let dev: Cpu = Default::default();
        let a = batch(&dev, &[&[1.0], &[2.0], &[3.0]]);
        let vals: Vec<f64> = a.stream().map(|t| t.unwrap().get(&[0])).collect();
        assert_eq!(vals, vec![1.0, 2.0, 3.0]);
        let shared: SharedList = a.shared();
        assert_eq!(shared.stream().count(), 3);
    }

    #[test]
    fn test_zip_broadcast_batch() {
        let dev: Cpu = Default::default();
        let a = batch(&dev, &[&[1.0, 2.0], &[3.0, 4.0], &[5.0, 6.0]]);
        let b = batch(&dev, &[&[10.0, 20.0]]);
        let r = zip_broadcast(&a, &b, |x, y| x.add(y)).unwrap();
        assert_eq!(r.len(), 3);
        assert_close!(r.to_flat_vec(), [11.0, 22.0, 13.0, 24.0, 15.0, 26.0]);
        let r = zip_broadcast(&b, &a, |x, y| x.minus(y)).unwrap();
        assert_close!(r.to_flat_vec(), [9.0, 18.0, 7.0, 16.0, 5.0, 14.0]);
    }

    #[test]
    fn test_zip_broadcast_length_mismatch() {
        let dev: Cpu = Default::default();
        let a = TensorArray::zeros(&dev, &[1], 3).unwrap();
        let b = TensorArray::zeros(&dev, &[1], 2).unwrap();
        assert_eq!(
            zip_broadcast(&a, &b, |x, y| x.add(y)).unwrap_err(),
            Error::LengthMismatch {
                expected: 3,
                found: 2
            }
        );
    }

    #[test]
    fn test_reduce_to_len() {
        let dev: Cpu = Default::default();
        let a = batch(&dev, &[&[1.0, 2.0], &[3.0, 4.0]]);
        let r = a.clone().reduce_to_len(1).unwrap();
        assert_eq!(r.len(), 1);
        assert_close!(r.to_flat_vec(), [4.0, 6.0]);
        assert_eq!(a.clone().reduce_to_len(2).unwrap().len(), 2);
        assert!(a.reduce_to_len(3).is_err());
    }

    #[test]
    fn test_reduce_items_to() {
        let dev: Cpu = Default::default();
        let a = batch(&dev, &[&[1.0, 2.0], &[3.0, 4.0]]);
        let r = a.reduce_items_to(&[1]).unwrap();
        assert_eq!(r.dimensions(), &[1]);
        assert_close!(r.to_flat_vec(), [3.0, 7.0]);
    }
}
