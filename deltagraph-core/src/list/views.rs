//! Lazily computed [TensorList]s over a backing list.

use super::{SharedList, TensorList};
use crate::{
    cpu::Cpu,
    tensor::{num_elements, CoordStream, Tensor},
    Error,
};

/// The backing list with every item reshaped to `dims`. Items share the
/// backing buffers, nothing is copied.
#[derive(Debug, Clone)]
pub struct ReshapedList {
    inner: SharedList,
    dims: Vec<usize>,
}

impl ReshapedList {
    pub fn new(inner: SharedList, dims: &[usize]) -> Result<Self, Error> {
        let len = num_elements(inner.dimensions());
        if num_elements(dims) != len {
            return Err(Error::WrongNumElements {
                dims: dims.to_vec(),
                len,
            });
        }
        Ok(Self {
            inner,
            dims: dims.to_vec(),
        })
    }
}

impl TensorList for ReshapedList {
    fn len(&self) -> usize {
        self.inner.len()
    }
    fn dimensions(&self) -> &[usize] {
        &self.dims
    }
    fn get(&self, index: usize) -> Result<Tensor, Error> {
        self.inner.get(index)?.reshape(&self.dims)
    }
    fn device(&self) -> &Cpu {
        self.inner.device()
    }
}

/// A rectangular window into an N-d tensor: output coordinate `c` reads
/// input coordinate `c + offset`. Coordinates that fall outside the input
/// read as zero, so a window may be larger than its input (padding).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub offset: Vec<isize>,
    pub dims: Vec<usize>,
}

impl Window {
    pub fn new(offset: Vec<isize>, dims: Vec<usize>) -> Self {
        Self { offset, dims }
    }

    /// The window of shape `dims` centered in `input_dims`.
    pub fn centered(input_dims: &[usize], dims: &[usize]) -> Self {
        let offset = input_dims
            .iter()
            .zip(dims)
            .map(|(&i, &o)| (i as isize - o as isize) / 2)
            .collect();
        Self::new(offset, dims.to_vec())
    }

    /// For every flat output index, the flat input index it reads (if any).
    /// Computed once per input shape and reused for every batch item.
    pub fn index_map(&self, input_dims: &[usize]) -> Result<Vec<Option<usize>>, Error> {
        if input_dims.len() != self.dims.len() || self.offset.len() != self.dims.len() {
            return Err(Error::DimensionMismatch {
                expected: input_dims.to_vec(),
                found: self.dims.clone(),
            });
        }
        let map = CoordStream::new(&self.dims)
            .map(|c| {
                let mut index = 0usize;
                for (axis, &o) in c.coords.iter().enumerate() {
                    let src = o as isize + self.offset[axis];
                    if src < 0 || src as usize >= input_dims[axis] {
                        return None;
                    }
                    index = index * input_dims[axis] + src as usize;
                }
                Some(index)
            })
            .collect();
        Ok(map)
    }
}

/// Reads a window of an input tensor through a precomputed index map.
pub fn gather(
    dev: &Cpu,
    input: &Tensor,
    dims: &[usize],
    map: &[Option<usize>],
) -> Result<Tensor, Error> {
    let mut out = dev.try_zeros(dims)?;
    let src = input.as_slice();
    for (o, m) in out.as_mut_slice().iter_mut().zip(map) {
        if let Some(i) = m {
            *o = src[*i];
        }
    }
    Ok(out)
}

/// Adjoint of [gather]: adds every element of `delta` into the input
/// position it was read from; padding positions are dropped.
pub fn scatter(
    dev: &Cpu,
    delta: &Tensor,
    input_dims: &[usize],
    map: &[Option<usize>],
) -> Result<Tensor, Error> {
    let mut out = dev.try_zeros(input_dims)?;
    let dst = out.as_mut_slice();
    for (d, m) in delta.as_slice().iter().zip(map) {
        if let Some(i) = m {
            dst[*i] += d;
        }
    }
    Ok(out)
}

/// The backing list seen through a [Window]. Each `get` materializes one
/// windowed item; the batch as a whole is never copied.
#[derive(Debug, Clone)]
pub struct WindowList {
    inner: SharedList,
    window: Window,
    map: Vec<Option<usize>>,
}

impl WindowList {
    pub fn new(inner: SharedList, window: Window) -> Result<Self, Error> {
        let map = window.index_map(inner.dimensions())?;
        Ok(Self { inner, window, map })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    /// The precomputed output-to-input index map.
    pub fn index_map(&self) -> &[Option<usize>] {
        &self.map
    }
}

impl TensorList for WindowList {
    fn len(&self) -> usize {
        self.inner.len()
    }
    fn dimensions(&self) -> &[usize] {
        &self.window.dims
    }
    fn get(&self, index: usize) -> Result<Tensor, Error> {
        let item = self.inner.get(index)?;
        gather(self.inner.device(), &item, &self.window.dims, &self.map)
    }
    fn device(&self) -> &Cpu {
        self.inner.device()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{list::TensorArray, tests::*};

    fn image(dev: &Cpu) -> Tensor {
        // 3x3x1, values 0..9
        dev.tensor((0..9).map(|x| x as f64).collect(), &[3, 3, 1]).unwrap()
    }

    #[test]
    fn test_reshaped_list() {
        let dev: Cpu = Default::default();
        let list = TensorArray::single(image(&dev)).shared();
        let view = ReshapedList::new(list.clone(), &[9]).unwrap();
        assert_eq!(view.dimensions(), &[9]);
        let t = view.get(0).unwrap();
        assert!(t.shares_buffer(&list.get(0).unwrap()));
        assert!(ReshapedList::new(list, &[4]).is_err());
    }

    #[test]
    fn test_centered_window() {
        let dev: Cpu = Default::default();
        let list = TensorArray::single(image(&dev)).shared();
        let w = Window::centered(&[3, 3, 1], &[1, 1, 1]);
        assert_eq!(w.offset, vec![1, 1, 0]);
        let view = WindowList::new(list, w).unwrap();
        assert_close!(view.get(0).unwrap().as_slice(), [4.0]);
    }

    #[test]
    fn test_window_padding_reads_zero() {
        let dev: Cpu = Default::default();
        let list = TensorArray::single(image(&dev)).shared();
        let w = Window::new(vec![-1, 2, 0], vec![2, 2, 1]);
        let view = WindowList::new(list, w).unwrap();
        // rows -1..1, cols 2..4 of the input
        assert_close!(view.get(0).unwrap().as_slice(), [0.0, 0.0, 2.0, 0.0]);
    }

    #[test]
    fn test_window_get_is_idempotent() {
        let dev: Cpu = Default::default();
        let list = TensorArray::single(image(&dev)).shared();
        let view = WindowList::new(list, Window::new(vec![0, 1, 0], vec![2, 2, 1])).unwrap();
        let a = view.get(0).unwrap();
        let b = view.get(0).unwrap();
        assert_eq!(a, b);
        assert!(!a.shares_buffer(&b));
    }

    #[test]
    fn test_scatter_is_adjoint_of_gather() {
        let dev: Cpu = Default::default();
        let x = image(&dev);
        let w = Window::new(vec![1, 0, 0], vec![3, 2, 1]);
        let map = w.index_map(x.dimensions()).unwrap();
        let y = gather(&dev, &x, &w.dims, &map).unwrap();
        let g = dev.sample_uniform(&w.dims, -1.0, 1.0).unwrap();
        let back = scatter(&dev, &g, x.dimensions(), &map).unwrap();
        // <g, gather(x)> == <scatter(g), x>
        assert_close!(g.dot(&y).unwrap(), back.dot(&x).unwrap(), 1e-12);
    }

    #[test]
    fn test_window_rank_mismatch() {
        let w = Window::new(vec![0], vec![1]);
        assert!(w.index_map(&[3, 3]).is_err());
    }
}
