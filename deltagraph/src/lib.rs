//! # deltagraph
//!
//! Neural network operators, an SGD optimizer and safetensors persistence
//! built on the tensor and gradient protocol of [deltagraph_core].
//!
//! Every operator implements [Layer]: `eval` turns input nodes into an output
//! node, and the output node's accumulator pushes gradients back into a
//! [DeltaSet]. Topology is left to the caller, who evaluates layers in order
//! and keeps the returned nodes alive until the backward pass is done.
//!
//! ```rust
//! # use deltagraph::prelude::*;
//! let dev: Cpu = Default::default();
//! let layer = LinearActivationLayer::with_values(&dev, 2.0, 1.0);
//! let x = Node::constant(TensorArray::single(dev.scalar(3.0)).shared());
//! let y = layer.eval(&[x]).unwrap();
//! assert_eq!(y.data().get(0).unwrap().as_slice(), &[7.0]);
//!
//! let buffer = DeltaSet::new();
//! y.accumulate(&buffer, TensorArray::single(dev.scalar(1.0))).unwrap();
//! assert_eq!(buffer.delta(layer.weight.id()).unwrap().values(), vec![3.0]);
//!
//! let mut sgd = Sgd::new(SgdConfig { lr: 0.1, ..Default::default() });
//! sgd.update(&buffer).unwrap();
//! ```
//!
//! # Feature flags
//!
//! - `parallel` (default): batch items and input branches are processed on
//!   the rayon thread pool.
//! - `safetensors`: [safetensors::SaveSafeTensors] and
//!   [safetensors::LoadSafeTensors] for every [Layer].

mod layers;
pub mod optim;
#[cfg(feature = "safetensors")]
pub mod safetensors;

pub use deltagraph_core::*;
pub use layers::*;

pub mod prelude {
    pub use crate::layers::*;
    pub use crate::optim::{Sgd, SgdConfig};
    #[cfg(feature = "safetensors")]
    pub use crate::safetensors::{LoadSafeTensors, SaveSafeTensors};
    pub use deltagraph_core::prelude::*;
}
