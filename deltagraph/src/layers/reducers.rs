use deltagraph_core::{
    delta::DeltaSet,
    layer::{any_alive, check_inputs, Layer, LayerBase},
    list::{TensorArray, TensorList},
    node::{Accumulator, Node},
    tensor::num_elements,
    Error,
};
use std::sync::Arc;

/// Reduces every item to a single element (shape `[1]`): the sum of its
/// elements.
#[derive(Debug, Clone)]
pub struct SumReducerLayer {
    base: LayerBase,
}

impl Default for SumReducerLayer {
    fn default() -> Self {
        Self {
            base: LayerBase::new("sum_reducer"),
        }
    }
}

/// Reduces every item to a single element (shape `[1]`): the mean of its
/// elements. Items with no elements are an [Error::WrongNumElements].
#[derive(Debug, Clone)]
pub struct AvgReducerLayer {
    base: LayerBase,
}

impl Default for AvgReducerLayer {
    fn default() -> Self {
        Self {
            base: LayerBase::new("avg_reducer"),
        }
    }
}

/// Spreads each item's single gradient value, times `factor`, over the
/// input shape.
struct ReducerBackward {
    input: Arc<Node>,
    factor: f64,
}

impl Accumulator for ReducerBackward {
    fn accumulate(&self, buffer: &DeltaSet, delta: TensorArray) -> Result<(), Error> {
        let dims = self.input.data().dimensions().to_vec();
        let dev = delta.device().clone();
        let dx = delta.try_map_items(&dims, |_, d| {
            dev.try_filled(&dims, d.as_slice()[0] * self.factor)
        })?;
        self.input.accumulate(buffer, dx)
    }
}

fn reduce(inputs: &[Arc<Node>], name: &str, mean: bool) -> Result<Arc<Node>, Error> {
    check_inputs(inputs, 1, name)?;
    let input = inputs[0].clone();
    let x = input.data().to_array()?;
    let n = num_elements(x.dimensions());
    if mean && n == 0 {
        return Err(Error::WrongNumElements {
            dims: x.dimensions().to_vec(),
            len: 0,
        });
    }
    let factor = if mean { 1.0 / n as f64 } else { 1.0 };
    let dev = x.device().clone();
    let y = x.try_map_items(&[1], |_, t| dev.try_filled(&[1], t.sum() * factor))?;
    Ok(Node::new(
        y.shared(),
        ReducerBackward { input, factor },
        any_alive(inputs),
    ))
}

impl Layer for SumReducerLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }
    fn eval(&self, inputs: &[Arc<Node>]) -> Result<Arc<Node>, Error> {
        reduce(inputs, self.name(), false)
    }
}

impl Layer for AvgReducerLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }
    fn eval(&self, inputs: &[Arc<Node>]) -> Result<Arc<Node>, Error> {
        reduce(inputs, self.name(), true)
    }
}
