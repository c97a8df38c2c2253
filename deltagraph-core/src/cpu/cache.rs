use std::{collections::BTreeMap, sync::RwLock};

/// Default number of buffers kept per length bucket.
pub const DEFAULT_BUCKET_LIMIT: usize = 64;

/// A cache of `f64` buffers that can be reused.
///
/// The key is the number of elements in the buffer, the value is a stack of
/// released buffers of exactly that length.
///
/// The presence of a key in the map indicates that there is *at least one*
/// buffer available. When the last buffer is removed from the list, the key
/// is removed.
#[derive(Debug)]
pub(crate) struct TensorCache {
    pub(crate) allocations: RwLock<BTreeMap<usize, Vec<Vec<f64>>>>,
    pub(crate) enabled: RwLock<bool>,
    pub(crate) bucket_limit: RwLock<usize>,
}

impl Default for TensorCache {
    fn default() -> Self {
        Self {
            allocations: Default::default(),
            enabled: RwLock::new(true),
            bucket_limit: RwLock::new(DEFAULT_BUCKET_LIMIT),
        }
    }
}

impl TensorCache {
    /// Returns the number of distinct buffer lengths in the cache.
    pub(crate) fn len(&self) -> usize {
        self.allocations.read().unwrap().len()
    }

    /// Returns the total number of buffers held by the cache.
    pub(crate) fn num_buffers(&self) -> usize {
        self.allocations
            .read()
            .unwrap()
            .values()
            .map(|items| items.len())
            .sum()
    }

    pub(crate) fn is_enabled(&self) -> bool {
        *self.enabled.read().unwrap()
    }

    pub(crate) fn enable(&self) {
        *self.enabled.write().unwrap() = true;
    }

    pub(crate) fn disable(&self) {
        *self.enabled.write().unwrap() = false;
    }

    pub(crate) fn set_bucket_limit(&self, limit: usize) {
        *self.bucket_limit.write().unwrap() = limit;
        let mut cache = self.allocations.write().unwrap();
        cache.retain(|_, items| {
            items.truncate(limit);
            !items.is_empty()
        });
    }

    /// Returns a cached buffer of length `len` if one exists.
    /// The contents of the returned buffer are unspecified.
    pub(crate) fn try_pop(&self, len: usize) -> Option<Vec<f64>> {
        if !self.is_enabled() {
            return None;
        }

        // Check if there is a cached allocation.
        let reuse = {
            let cache = self.allocations.read().unwrap();
            cache.contains_key(&len)
        };
        if !reuse {
            return None;
        }

        let mut cache = self.allocations.write().unwrap();
        // another thread may have drained the bucket between the two locks
        let items = cache.get_mut(&len)?;
        let allocation = items.pop();
        if items.is_empty() {
            cache.remove(&len);
        }
        if allocation.is_some() {
            tracing::trace!(len, "reusing cached buffer");
        }
        allocation
    }

    /// Inserts a buffer into the cache. Buffers beyond the bucket limit, and
    /// all buffers while the cache is disabled, are dropped.
    pub(crate) fn insert(&self, allocation: Vec<f64>) {
        if !self.is_enabled() {
            return;
        }
        let len = allocation.len();
        let limit = *self.bucket_limit.read().unwrap();
        let mut cache = self.allocations.write().unwrap();
        let items = cache.entry(len).or_default();
        if items.len() < limit {
            items.push(allocation);
        } else if items.is_empty() {
            cache.remove(&len);
        }
    }

    /// Drops all cached buffers.
    pub(crate) fn clear(&self) {
        self.allocations.write().unwrap().clear();
    }
}
