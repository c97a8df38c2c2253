use deltagraph_core::{
    delta::DeltaSet,
    layer::{any_alive, check_inputs, Layer, LayerBase},
    list::{ReshapedList, TensorArray, TensorList},
    node::{Accumulator, Node},
    Error,
};
use std::sync::Arc;

/// Views every item with a different shape of the same element count. No
/// data is copied in either direction.
#[derive(Debug, Clone)]
pub struct ReshapeLayer {
    base: LayerBase,
    dims: Vec<usize>,
}

impl ReshapeLayer {
    pub fn new(dims: &[usize]) -> Self {
        Self {
            base: LayerBase::new("reshape"),
            dims: dims.to_vec(),
        }
    }
}

struct ReshapeBackward {
    input: Arc<Node>,
}

impl Accumulator for ReshapeBackward {
    fn accumulate(&self, buffer: &DeltaSet, delta: TensorArray) -> Result<(), Error> {
        let dims = self.input.data().dimensions().to_vec();
        let dx = delta.try_map_items(&dims, |_, d| d.reshape(&dims))?;
        self.input.accumulate(buffer, dx)
    }
}

impl Layer for ReshapeLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn eval(&self, inputs: &[Arc<Node>]) -> Result<Arc<Node>, Error> {
        check_inputs(inputs, 1, self.name())?;
        let input = inputs[0].clone();
        let view = ReshapedList::new(input.data().clone(), &self.dims)?;
        Ok(Node::new(
            Arc::new(view),
            ReshapeBackward { input },
            any_alive(inputs),
        ))
    }
}
