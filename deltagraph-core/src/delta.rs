//! Gradient accumulation buffers for one backward pass.
//!
//! A [DeltaSet] maps a key (by default a [Parameter]'s [UniqueId]) to a
//! [Delta]. Deltas are created lazily on first reference and summed into
//! from any number of backward paths, possibly on different threads. Each
//! delta has its own lock so unrelated parameters never contend, and
//! because every contribution is an addition the final values do not depend
//! on the order contributions arrive in.

use crate::{
    error::check_finite,
    param::Parameter,
    unique_id::{HasUniqueId, UniqueId},
    Error,
};
use std::{
    collections::BTreeMap,
    fmt::Debug,
    sync::{Arc, Mutex, RwLock},
};

/// One accumulation buffer, optionally tied to the parameter it is the
/// gradient of.
#[derive(Debug)]
pub struct Delta {
    target: Option<Parameter>,
    buffer: Mutex<Vec<f64>>,
}

impl Delta {
    /// A zeroed buffer of `len` elements with no target.
    pub fn new(len: usize) -> Self {
        Self {
            target: None,
            buffer: Mutex::new(vec![0.0; len]),
        }
    }

    /// A zeroed buffer shaped like `target`.
    pub fn for_parameter(target: &Parameter) -> Self {
        Self {
            target: Some(target.clone()),
            buffer: Mutex::new(vec![0.0; target.len()]),
        }
    }

    pub fn target(&self) -> Option<&Parameter> {
        self.target.as_ref()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sums `values` into the buffer. Contributions must be finite and have
    /// exactly the buffer's length.
    pub fn add_in_place(&self, values: &[f64]) -> Result<(), Error> {
        check_finite(values, "delta contribution")?;
        let mut buffer = self.buffer.lock().unwrap();
        if buffer.len() != values.len() {
            return Err(Error::LengthMismatch {
                expected: buffer.len(),
                found: values.len(),
            });
        }
        for (b, v) in buffer.iter_mut().zip(values) {
            *b += v;
        }
        Ok(())
    }

    /// Snapshot of the accumulated values.
    pub fn values(&self) -> Vec<f64> {
        self.buffer.lock().unwrap().clone()
    }

    pub fn scale(&self, factor: f64) {
        for b in self.buffer.lock().unwrap().iter_mut() {
            *b *= factor;
        }
    }

    pub fn magnitude(&self) -> f64 {
        self.sum_sq().sqrt()
    }

    pub(crate) fn sum_sq(&self) -> f64 {
        self.buffer.lock().unwrap().iter().map(|x| x * x).sum()
    }

    pub fn dot(&self, other: &Delta) -> Result<f64, Error> {
        let a = self.values();
        let b = other.values();
        if a.len() != b.len() {
            return Err(Error::LengthMismatch {
                expected: a.len(),
                found: b.len(),
            });
        }
        Ok(a.iter().zip(b.iter()).map(|(x, y)| x * y).sum())
    }

    /// `target += factor * delta`. A delta without a target is left alone.
    pub fn apply(&self, factor: f64) -> Result<(), Error> {
        let Some(target) = &self.target else {
            return Ok(());
        };
        let values = self.values();
        target.update(|t| {
            if t.len() != values.len() {
                return Err(Error::LengthMismatch {
                    expected: t.len(),
                    found: values.len(),
                });
            }
            for (w, d) in t.as_mut_slice().iter_mut().zip(values.iter()) {
                *w += factor * d;
            }
            Ok(())
        })
    }
}

/// Map from key to [Delta] for a single backward pass.
#[derive(Debug)]
pub struct DeltaSet<K = UniqueId> {
    map: RwLock<BTreeMap<K, Arc<Delta>>>,
}

impl<K> Default for DeltaSet<K> {
    fn default() -> Self {
        Self {
            map: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<K: Ord + Copy + Debug> DeltaSet<K> {
    pub fn new() -> Self {
        Default::default()
    }

    fn get_or_insert(
        &self,
        key: K,
        len: usize,
        make: impl FnOnce() -> Delta,
    ) -> Result<Arc<Delta>, Error> {
        if let Some(d) = self.map.read().unwrap().get(&key) {
            return check_len(d, len);
        }
        let mut map = self.map.write().unwrap();
        // another thread may have inserted between the two locks
        if let Some(d) = map.get(&key) {
            return check_len(d, len);
        }
        tracing::trace!(?key, len, "allocating delta");
        let d = Arc::new(make());
        map.insert(key, d.clone());
        Ok(d)
    }

    /// The delta for `key`, created for `target` on first reference.
    pub fn get(&self, key: K, target: &Parameter) -> Result<Arc<Delta>, Error> {
        self.get_or_insert(key, target.len(), || Delta::for_parameter(target))
    }

    /// The delta for `key`, created as `len` zeros on first reference.
    pub fn get_sized(&self, key: K, len: usize) -> Result<Arc<Delta>, Error> {
        self.get_or_insert(key, len, || Delta::new(len))
    }

    /// The delta for `key` if anything has referenced it.
    pub fn delta(&self, key: K) -> Option<Arc<Delta>> {
        self.map.read().unwrap().get(&key).cloned()
    }

    /// Every key, in order.
    pub fn keys(&self) -> Vec<K> {
        self.map.read().unwrap().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.map.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Euclidean norm over every delta together.
    pub fn magnitude(&self) -> f64 {
        self.map
            .read()
            .unwrap()
            .values()
            .map(|d| d.sum_sq())
            .sum::<f64>()
            .sqrt()
    }

    /// Inner product over the keys both sets share.
    pub fn dot(&self, other: &DeltaSet<K>) -> Result<f64, Error> {
        let mine = self.map.read().unwrap();
        let theirs = other.map.read().unwrap();
        let mut sum = 0.0;
        for (k, d) in mine.iter() {
            if let Some(o) = theirs.get(k) {
                sum += d.dot(o)?;
            }
        }
        Ok(sum)
    }

    pub fn scale(&self, factor: f64) {
        for d in self.map.read().unwrap().values() {
            d.scale(factor);
        }
    }

    /// Applies every delta to its target: `target += factor * delta`.
    pub fn apply(&self, factor: f64) -> Result<(), Error> {
        for d in self.map.read().unwrap().values() {
            d.apply(factor)?;
        }
        Ok(())
    }

    /// Consumes the set, yielding its deltas in key order.
    pub fn into_deltas(self) -> Vec<(K, Arc<Delta>)> {
        self.map.into_inner().unwrap().into_iter().collect()
    }
}

impl DeltaSet<UniqueId> {
    /// The delta of `param`, keyed by its id.
    pub fn for_param(&self, param: &Parameter) -> Result<Arc<Delta>, Error> {
        self.get(param.id(), param)
    }
}

fn check_len(d: &Arc<Delta>, len: usize) -> Result<Arc<Delta>, Error> {
    if d.len() != len {
        return Err(Error::LengthMismatch {
            expected: d.len(),
            found: len,
        });
    }
    Ok(d.clone())
}
