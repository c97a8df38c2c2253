//! The [Cpu] evaluation context: buffer allocation and recycling, the live
//! object [Census], the random number generator used for parameter
//! initialization and the batch-parallel execution helpers.

mod allocate;
mod cache;
mod census;

pub use cache::DEFAULT_BUCKET_LIMIT;
pub use census::{Census, CensusSnapshot};

use crate::Error;
use cache::TensorCache;
use rand::{rngs::StdRng, SeedableRng};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

/// The context every tensor is allocated from.
///
/// Cloning a `Cpu` is cheap and yields a handle to the *same* cache, census
/// and random number generator. Nothing here is process-global: two `Cpu`
/// values created with [Default::default] never share buffers.
///
/// ```rust
/// # use deltagraph_core::prelude::*;
/// let dev: Cpu = Default::default();
/// let t = dev.zeros(&[2, 3]);
/// assert_eq!(t.dimensions(), &[2, 3]);
/// ```
#[derive(Clone, Debug)]
pub struct Cpu {
    pub(crate) rng: Arc<Mutex<StdRng>>,
    pub(crate) cache: Arc<TensorCache>,
    pub(crate) census: Arc<Census>,
    pub(crate) parallel: Arc<AtomicBool>,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::seed_from_u64(0)
    }
}

impl Cpu {
    /// A new context whose parameter initialization is seeded with `seed`.
    pub fn seed_from_u64(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
            cache: Default::default(),
            census: Default::default(),
            parallel: Arc::new(AtomicBool::new(cfg!(feature = "parallel"))),
        }
    }

    /// Live-object counters of this context.
    pub fn census(&self) -> &Census {
        &self.census
    }

    /// Returns `true` if both handles refer to the same context.
    pub fn same_as(&self, other: &Cpu) -> bool {
        Arc::ptr_eq(&self.census, &other.census)
    }

    /// Enables recycling of released tensor buffers. On by default.
    pub fn enable_cache(&self) {
        self.cache.enable();
    }

    /// Disables buffer recycling and drops everything cached so far.
    pub fn disable_cache(&self) {
        self.cache.disable();
        self.cache.clear();
    }

    /// Drops all cached buffers without disabling the cache.
    pub fn empty_cache(&self) {
        self.cache.clear();
    }

    /// Maximum number of buffers kept for one buffer length.
    pub fn set_cache_bucket_limit(&self, limit: usize) {
        self.cache.set_bucket_limit(limit);
    }

    /// Number of buffers currently waiting in the cache.
    pub fn cached_buffers(&self) -> usize {
        self.cache.num_buffers()
    }

    /// Turns batch/branch parallelism on or off. Without the `parallel`
    /// feature this has no effect and evaluation is always sequential.
    pub fn set_parallel(&self, parallel: bool) {
        self.parallel
            .store(parallel && cfg!(feature = "parallel"), Ordering::Relaxed);
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel.load(Ordering::Relaxed)
    }

    /// Runs `f` for every batch index in `0..len`, in parallel when enabled,
    /// and collects the results in index order. The first error aborts.
    pub fn try_map_batch<T, F>(&self, len: usize, f: F) -> Result<Vec<T>, Error>
    where
        T: Send,
        F: Fn(usize) -> Result<T, Error> + Send + Sync,
    {
        #[cfg(feature = "parallel")]
        if self.is_parallel() && len > 1 {
            use rayon::prelude::*;
            return (0..len).into_par_iter().map(f).collect();
        }
        (0..len).map(f).collect()
    }

    /// Runs `f` for every item of `items`, in parallel when enabled. Used to
    /// fan a backward pass out to independent input branches.
    pub fn try_for_each_input<T, F>(&self, items: &[T], f: F) -> Result<(), Error>
    where
        T: Sync,
        F: Fn(usize, &T) -> Result<(), Error> + Send + Sync,
    {
        #[cfg(feature = "parallel")]
        if self.is_parallel() && items.len() > 1 {
            use rayon::prelude::*;
            return items
                .par_iter()
                .enumerate()
                .try_for_each(|(i, item)| f(i, item));
        }
        items.iter().enumerate().try_for_each(|(i, item)| f(i, item))
    }
}

/// A `Vec<f64>` that registers with the census and hands its allocation back
/// to the [TensorCache] when dropped.
#[derive(Debug)]
pub(crate) struct CachableVec {
    pub(crate) data: Vec<f64>,
    pub(crate) cache: Arc<TensorCache>,
    pub(crate) census: Arc<Census>,
}

impl CachableVec {
    pub(crate) fn new(data: Vec<f64>, dev: &Cpu) -> Self {
        dev.census.register_buffer();
        Self {
            data,
            cache: dev.cache.clone(),
            census: dev.census.clone(),
        }
    }
}

impl Clone for CachableVec {
    fn clone(&self) -> Self {
        let data = match self.cache.try_pop(self.data.len()) {
            Some(mut buf) => {
                buf.copy_from_slice(&self.data);
                buf
            }
            None => self.data.clone(),
        };
        self.census.register_buffer();
        Self {
            data,
            cache: self.cache.clone(),
            census: self.census.clone(),
        }
    }
}

impl std::ops::Deref for CachableVec {
    type Target = Vec<f64>;
    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl std::ops::DerefMut for CachableVec {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl Drop for CachableVec {
    fn drop(&mut self) {
        self.census.release_buffer();
        let data = std::mem::take(&mut self.data);
        if !data.is_empty() {
            self.cache.insert(data);
        }
    }
}
