//! # deltagraph-core
//!
//! The data model and autodiff protocol underneath `deltagraph`.
//!
//! # Tensors and batches
//!
//! A [tensor::Tensor] is a dense, row-major, N-dimensional `f64` array
//! allocated from a [Cpu] context. Layers consume and produce batches of
//! same-shaped tensors through the [list::TensorList] trait, which is either
//! an owned [list::TensorArray] or a lazily computed view.
//!
//! ```rust
//! # use deltagraph_core::prelude::*;
//! let dev: Cpu = Default::default();
//! let a = dev.tensor(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
//! let b = a.add(&dev.scalar(1.0)).unwrap();
//! assert_eq!(b.as_slice(), &[2.0, 3.0, 4.0, 5.0]);
//! ```
//!
//! # Forward and backward
//!
//! A [layer::Layer] evaluates a slice of input [node::Node]s into a new node.
//! Each node carries an [node::Accumulator]: given the gradient of some
//! objective with respect to the node's data, it adds parameter gradients
//! into a [delta::DeltaSet] and recurses into its inputs.
//!
//! ```rust
//! # use deltagraph_core::prelude::*;
//! let dev: Cpu = Default::default();
//! let (x, params) = Node::variable(TensorArray::single(dev.scalar(3.0)));
//! let buffer = DeltaSet::new();
//! x.accumulate(&buffer, TensorArray::single(dev.scalar(2.0))).unwrap();
//! assert_eq!(buffer.delta(params[0].id()).unwrap().values(), vec![2.0]);
//! ```
//!
//! Nodes whose whole upstream is constant or frozen are *dead*: their
//! accumulators are never invoked.
//!
//! # Resources
//!
//! Tensor buffers are reference counted and handed back to a per-[Cpu]
//! cache when released. The [cpu::Census] counts live buffers and nodes so
//! tests can assert that a forward/backward pass leaves nothing behind.
//!
//! # Feature flags
//!
//! - `parallel` (default): evaluate batch items and independent input
//!   branches on the rayon thread pool.

pub mod cpu;
pub mod delta;
pub mod error;
pub mod gradient_check;
pub mod layer;
pub mod list;
pub mod node;
pub mod param;
pub mod tensor;
pub mod unique_id;

pub use cpu::Cpu;
pub use error::Error;

pub mod prelude {
    pub use crate::cpu::{Census, CensusSnapshot, Cpu};
    pub use crate::delta::{Delta, DeltaSet};
    pub use crate::error::Error;
    pub use crate::gradient_check::{GradientCheck, GradientReport};
    pub use crate::layer::{Layer, LayerBase, StatefulLayer};
    pub use crate::list::{SharedList, TensorArray, TensorList};
    pub use crate::node::{Accumulator, Node};
    pub use crate::param::Parameter;
    pub use crate::tensor::Tensor;
    pub use crate::unique_id::{HasUniqueId, UniqueId};
}

#[cfg(test)]
pub(crate) mod tests {
    /// Anything that can be compared elementwise against expected values.
    pub trait AssertClose {
        fn close_values(&self) -> Vec<f64>;
    }

    impl AssertClose for f64 {
        fn close_values(&self) -> Vec<f64> {
            vec![*self]
        }
    }

    impl AssertClose for [f64] {
        fn close_values(&self) -> Vec<f64> {
            self.to_vec()
        }
    }

    impl<const M: usize> AssertClose for [f64; M] {
        fn close_values(&self) -> Vec<f64> {
            self.to_vec()
        }
    }

    impl AssertClose for Vec<f64> {
        fn close_values(&self) -> Vec<f64> {
            self.clone()
        }
    }

    impl<T: AssertClose + ?Sized> AssertClose for &T {
        fn close_values(&self) -> Vec<f64> {
            (**self).close_values()
        }
    }

    pub fn get_far_pair(lhs: &[f64], rhs: &[f64], tolerance: f64) -> Option<(f64, f64)> {
        assert_eq!(lhs.len(), rhs.len(), "lhs and rhs have different lengths");
        lhs.iter()
            .zip(rhs.iter())
            .find(|(l, r)| (*l - *r).abs() > tolerance)
            .map(|(l, r)| (*l, *r))
    }

    macro_rules! assert_close {
        ($Lhs:expr, $Rhs:expr) => {
            $crate::tests::assert_close!($Lhs, $Rhs, 1e-6)
        };
        ($Lhs:expr, $Rhs:expr, $Tolerance:expr) => {{
            let lhs = $crate::tests::AssertClose::close_values(&$Lhs);
            let rhs = $crate::tests::AssertClose::close_values(&$Rhs);
            if let Some((l, r)) = $crate::tests::get_far_pair(&lhs, &rhs, $Tolerance) {
                panic!("lhs != rhs | {l} != {r}\n\n{lhs:?}\n\n{rhs:?}");
            }
        }};
    }

    pub(crate) use assert_close;
}
