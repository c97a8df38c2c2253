use super::{CachableVec, Cpu};
use crate::{
    tensor::{num_elements, Tensor},
    unique_id::unique_id,
    Error,
};

use rand::distributions::Distribution;
use rand_distr::{Normal, Uniform};
use std::sync::Arc;

impl Cpu {
    #[inline]
    pub(crate) fn try_alloc_elem(&self, numel: usize, elem: f64) -> Result<CachableVec, Error> {
        let data = match self.cache.try_pop(numel) {
            Some(mut data) => {
                data.fill(elem);
                data
            }
            None => {
                let mut data: Vec<f64> = Vec::new();
                data.try_reserve(numel).map_err(|_| Error::OutOfMemory)?;
                data.resize(numel, elem);
                data
            }
        };
        Ok(CachableVec::new(data, self))
    }

    #[inline]
    pub(crate) fn try_alloc_zeros(&self, numel: usize) -> Result<CachableVec, Error> {
        self.try_alloc_elem(numel, 0.0)
    }

    pub(crate) fn wrap(&self, dims: &[usize], data: CachableVec) -> Tensor {
        Tensor {
            id: unique_id(),
            dims: dims.into(),
            data: Arc::new(data),
            device: self.clone(),
        }
    }

    /// A zero-filled tensor of shape `dims`.
    ///
    /// **Panics** if the allocation fails. See [Cpu::try_zeros].
    pub fn zeros(&self, dims: &[usize]) -> Tensor {
        self.try_zeros(dims).unwrap()
    }

    /// Fallible version of [Cpu::zeros].
    pub fn try_zeros(&self, dims: &[usize]) -> Result<Tensor, Error> {
        let data = self.try_alloc_zeros(num_elements(dims))?;
        Ok(self.wrap(dims, data))
    }

    /// A tensor of shape `dims` with every element set to `value`.
    pub fn try_filled(&self, dims: &[usize], value: f64) -> Result<Tensor, Error> {
        let data = self.try_alloc_elem(num_elements(dims), value)?;
        Ok(self.wrap(dims, data))
    }

    /// Wraps `data` (row-major) as a tensor of shape `dims`.
    pub fn tensor(&self, data: Vec<f64>, dims: &[usize]) -> Result<Tensor, Error> {
        if data.len() != num_elements(dims) {
            return Err(Error::WrongNumElements {
                dims: dims.to_vec(),
                len: data.len(),
            });
        }
        Ok(self.wrap(dims, CachableVec::new(data, self)))
    }

    /// A rank-1 tensor holding `data`.
    pub fn vector(&self, data: Vec<f64>) -> Tensor {
        let dims = [data.len()];
        self.wrap(&dims, CachableVec::new(data, self))
    }

    /// A single-element tensor of shape `[1]`.
    pub fn scalar(&self, value: f64) -> Tensor {
        self.vector(vec![value])
    }

    /// Samples every element uniformly from `[low, high)`.
    ///
    /// Returns [Error::EmptyRange] unless both bounds are finite and
    /// `low < high`.
    pub fn sample_uniform(&self, dims: &[usize], low: f64, high: f64) -> Result<Tensor, Error> {
        if !(low.is_finite() && high.is_finite() && low < high) {
            return Err(Error::EmptyRange { low, high });
        }
        let distr = Uniform::new(low, high);
        self.sample(dims, distr)
    }

    /// Samples every element from a normal distribution.
    pub fn sample_normal(&self, dims: &[usize], mean: f64, std_dev: f64) -> Result<Tensor, Error> {
        let distr = Normal::new(mean, std_dev).map_err(|_| Error::NonFinite {
            context: "normal distribution parameters",
        })?;
        self.sample(dims, distr)
    }

    /// Samples every element from `distr` using this context's generator.
    pub fn sample<D: Distribution<f64>>(&self, dims: &[usize], distr: D) -> Result<Tensor, Error> {
        let mut data = self.try_alloc_zeros(num_elements(dims))?;
        {
            let mut rng = self.rng.lock().unwrap();
            for v in data.iter_mut() {
                *v = distr.sample(&mut *rng);
            }
        }
        Ok(self.wrap(dims, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_wrong_num_elements() {
        let dev: Cpu = Default::default();
        let r = dev.tensor(vec![1.0, 2.0, 3.0], &[2, 2]);
        assert_eq!(
            r.unwrap_err(),
            Error::WrongNumElements {
                dims: vec![2, 2],
                len: 3
            }
        );
    }

    #[test]
    fn test_sample_uniform_bounds() {
        let dev: Cpu = Default::default();
        let t = dev.sample_uniform(&[1000], -0.5, 0.5).unwrap();
        for &v in t.as_slice() {
            assert!((-0.5..0.5).contains(&v));
        }
        assert!(t.as_slice().iter().any(|&v| v != 0.0));
    }

    #[test]
    fn test_sample_uniform_rejects_empty_ranges() {
        let dev: Cpu = Default::default();
        for (low, high) in [(0.5, 0.5), (1.0, -1.0), (f64::NEG_INFINITY, 0.0), (0.0, f64::NAN)] {
            let r = dev.sample_uniform(&[4], low, high);
            assert!(matches!(r, Err(Error::EmptyRange { .. })), "{low} {high}");
        }
    }

    #[test]
    fn test_seeded_sampling_is_reproducible() {
        let a = Cpu::seed_from_u64(7).sample_normal(&[8], 0.0, 1.0).unwrap();
        let b = Cpu::seed_from_u64(7).sample_normal(&[8], 0.0, 1.0).unwrap();
        assert_eq!(a.as_slice(), b.as_slice());
    }

    #[test]
    fn test_scalar_shape() {
        let dev: Cpu = Default::default();
        let s = dev.scalar(2.5);
        assert_eq!(s.dimensions(), &[1]);
        assert_eq!(s.as_slice(), &[2.5]);
    }
}
