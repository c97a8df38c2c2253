use super::{num_elements, CoordStream, Coordinate, Tensor};
use crate::Error;

/// Output shape of a binary op under the length-1 broadcast rule: equal
/// shapes, or one side with a single element that stands in for every
/// coordinate of the other side.
pub fn broadcast_dims<'a>(lhs: &'a [usize], rhs: &'a [usize]) -> Result<&'a [usize], Error> {
    if lhs == rhs {
        Ok(lhs)
    } else if num_elements(rhs) == 1 {
        Ok(lhs)
    } else if num_elements(lhs) == 1 {
        Ok(rhs)
    } else {
        Err(Error::DimensionMismatch {
            expected: lhs.to_vec(),
            found: rhs.to_vec(),
        })
    }
}

impl Tensor {
    /// A lazy, restartable stream over every coordinate of this tensor.
    pub fn coord_stream(&self) -> CoordStream {
        CoordStream::new(&self.dims)
    }

    /// Applies `f` to every element, returning a new tensor.
    pub fn try_map<F: Fn(f64) -> f64>(&self, f: F) -> Result<Tensor, Error> {
        let mut data = self.device.try_alloc_zeros(self.len())?;
        for (o, &x) in data.iter_mut().zip(self.as_slice()) {
            *o = f(x);
        }
        Ok(self.device.wrap(&self.dims, data))
    }

    /// See [Tensor::try_map].
    pub fn map<F: Fn(f64) -> f64>(&self, f: F) -> Tensor {
        self.try_map(f).unwrap()
    }

    /// Builds a new tensor of the same shape from a function of each
    /// coordinate.
    pub fn try_map_coords<F: Fn(&Coordinate) -> f64>(&self, f: F) -> Result<Tensor, Error> {
        let mut data = self.device.try_alloc_zeros(self.len())?;
        for c in self.coord_stream() {
            data[c.index] = f(&c);
        }
        Ok(self.device.wrap(&self.dims, data))
    }

    /// See [Tensor::try_map_coords].
    pub fn map_coords<F: Fn(&Coordinate) -> f64>(&self, f: F) -> Tensor {
        self.try_map_coords(f).unwrap()
    }

    /// Elementwise `f(lhs, rhs)` under the length-1 broadcast rule.
    pub fn zip_map<F: Fn(f64, f64) -> f64>(&self, rhs: &Tensor, f: F) -> Result<Tensor, Error> {
        let dims = broadcast_dims(&self.dims, &rhs.dims)?;
        let n = num_elements(dims);
        let (l, r) = (self.as_slice(), rhs.as_slice());
        let mut data = self.device.try_alloc_zeros(n)?;
        match (l.len() == n, r.len() == n) {
            (true, true) => {
                for i in 0..n {
                    data[i] = f(l[i], r[i]);
                }
            }
            (true, false) => {
                for i in 0..n {
                    data[i] = f(l[i], r[0]);
                }
            }
            (false, true) => {
                for i in 0..n {
                    data[i] = f(l[0], r[i]);
                }
            }
            (false, false) => unreachable!(),
        }
        Ok(self.device.wrap(dims, data))
    }

    /// Elementwise sum.
    pub fn add(&self, rhs: &Tensor) -> Result<Tensor, Error> {
        self.zip_map(rhs, |a, b| a + b)
    }

    /// Elementwise difference `self - rhs`.
    pub fn minus(&self, rhs: &Tensor) -> Result<Tensor, Error> {
        self.zip_map(rhs, |a, b| a - b)
    }

    /// Elementwise (Hadamard) product.
    pub fn product(&self, rhs: &Tensor) -> Result<Tensor, Error> {
        self.zip_map(rhs, |a, b| a * b)
    }

    pub fn scale(&self, factor: f64) -> Result<Tensor, Error> {
        self.try_map(|x| x * factor)
    }

    /// Sum of all elements.
    pub fn sum(&self) -> f64 {
        self.as_slice().iter().sum()
    }

    /// Mean of all elements.
    pub fn mean(&self) -> f64 {
        self.sum() / self.len() as f64
    }

    /// Inner product of two tensors with equal element counts.
    pub fn dot(&self, rhs: &Tensor) -> Result<f64, Error> {
        if self.len() != rhs.len() {
            return Err(Error::LengthMismatch {
                expected: self.len(),
                found: rhs.len(),
            });
        }
        Ok(self
            .as_slice()
            .iter()
            .zip(rhs.as_slice())
            .map(|(a, b)| a * b)
            .sum())
    }

    /// Euclidean norm.
    pub fn magnitude(&self) -> f64 {
        self.as_slice().iter().map(|x| x * x).sum::<f64>().sqrt()
    }

    /// `self += rhs` in place, broadcasting a single-element `rhs`.
    pub fn add_in_place(&mut self, rhs: &Tensor) -> Result<(), Error> {
        let dims = broadcast_dims(&self.dims, &rhs.dims)?;
        if dims != self.dims.as_slice() {
            return Err(Error::DimensionMismatch {
                expected: self.dims.clone(),
                found: rhs.dims.clone(),
            });
        }
        let r = rhs.data.clone();
        let out = self.as_mut_slice();
        if r.len() == out.len() {
            for (o, x) in out.iter_mut().zip(r.iter()) {
                *o += x;
            }
        } else {
            for o in out.iter_mut() {
                *o += r[0];
            }
        }
        Ok(())
    }

    /// Sums this tensor down to shape `dims`: the identity when the shapes
    /// match, a full reduction when `dims` holds a single element. This is
    /// the backward half of the length-1 broadcast.
    pub fn reduce_to(&self, dims: &[usize]) -> Result<Tensor, Error> {
        if dims == self.dims.as_slice() {
            Ok(self.clone())
        } else if num_elements(dims) == 1 {
            let mut data = self.device.try_alloc_zeros(1)?;
            data[0] = self.sum();
            Ok(self.device.wrap(dims, data))
        } else {
            Err(Error::DimensionMismatch {
                expected: dims.to_vec(),
                found: self.dims.clone(),
            })
        }
    }

    /// Returns [Error::NonFinite] if any element is NaN or infinite.
    pub fn check_finite(&self, context: &'static str) -> Result<(), Error> {
        crate::error::check_finite(self.as_slice(), context)
    }
}
