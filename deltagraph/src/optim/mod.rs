//! Optimizers consume the [deltagraph_core::delta::DeltaSet] of a backward
//! pass and update the parameters it refers to.
//!
//! ```rust
//! # use deltagraph::prelude::*;
//! let dev: Cpu = Default::default();
//! let layer = BiasLayer::new(&dev, &[2]).unwrap();
//! let x = Node::constant(TensorArray::single(dev.vector(vec![1.0, 2.0])).shared());
//! let y = layer.eval(&[x]).unwrap();
//!
//! let buffer = DeltaSet::new();
//! y.accumulate(&buffer, TensorArray::single(dev.vector(vec![1.0, -1.0]))).unwrap();
//!
//! let mut opt = Sgd::new(SgdConfig { lr: 0.5, ..Default::default() });
//! opt.update(&buffer).unwrap();
//! assert_eq!(layer.bias.value().as_slice(), &[-0.5, 0.5]);
//! ```

mod sgd;

pub use sgd::{Sgd, SgdConfig};
