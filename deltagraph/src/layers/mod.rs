mod activation;
mod bias;
mod fully_connected;
mod img;
mod linear_activation;
mod loss;
mod pooling;
mod product_inputs;
mod reducers;
mod reshape;
mod running_mean;
mod softmax;
mod sum_inputs;

pub use activation::{
    ActivationLayer, ReLU, ReLULayer, Sigmoid, SigmoidLayer, Square, SquareLayer, Tanh, TanhLayer,
    UnaryDerivative,
};
pub use bias::BiasLayer;
pub use fully_connected::FullyConnectedLayer;
pub use img::{ImgCropLayer, ImgTileSelectLayer};
pub use linear_activation::LinearActivationLayer;
pub use loss::{EntropyLossLayer, MeanSqLossLayer};
pub use pooling::{PoolingLayer, PoolingMode};
pub use product_inputs::ProductInputsLayer;
pub use reducers::{AvgReducerLayer, SumReducerLayer};
pub use reshape::ReshapeLayer;
pub use running_mean::{RunningMean, RunningMeanLayer};
pub use softmax::SoftmaxActivationLayer;
pub use sum_inputs::SumInputsLayer;

use deltagraph_core::{
    delta::DeltaSet,
    list::{TensorArray, TensorList},
    node::Node,
    Error,
};
use std::sync::Arc;

/// Sums `delta` down to the batch length and item shape of `input`, then
/// hands it to `input`. Undoes both kinds of forward broadcast.
pub(crate) fn accumulate_reduced(
    input: &Arc<Node>,
    buffer: &DeltaSet,
    delta: TensorArray,
) -> Result<(), Error> {
    if !input.is_alive() {
        return Ok(());
    }
    let data = input.data();
    let delta = delta
        .reduce_to_len(data.len())?
        .reduce_items_to(data.dimensions())?;
    input.accumulate(buffer, delta)
}
