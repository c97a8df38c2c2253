use super::accumulate_reduced;
use deltagraph_core::{
    delta::DeltaSet,
    layer::{any_alive, check_nonempty, Layer, LayerBase},
    list::{zip_broadcast, TensorArray, TensorList},
    node::{Accumulator, Node},
    Error,
};
use std::sync::Arc;

/// Elementwise product of any number of inputs, with the same broadcasting
/// as [super::SumInputsLayer].
#[derive(Debug, Clone)]
pub struct ProductInputsLayer {
    base: LayerBase,
}

impl Default for ProductInputsLayer {
    fn default() -> Self {
        Self {
            base: LayerBase::new("product_inputs"),
        }
    }
}

struct ProductInputsBackward {
    inputs: Vec<Arc<Node>>,
    values: Vec<TensorArray>,
}

impl Accumulator for ProductInputsBackward {
    fn accumulate(&self, buffer: &DeltaSet, delta: TensorArray) -> Result<(), Error> {
        let dev = delta.device().clone();
        dev.try_for_each_input(&self.inputs, |k, input| {
            if !input.is_alive() {
                return Ok(());
            }
            // d * product of every other input
            let mut grad = delta.clone();
            for (j, other) in self.values.iter().enumerate() {
                if j != k {
                    grad = zip_broadcast(&grad, other, |g, x| g.product(x))?;
                }
            }
            accumulate_reduced(input, buffer, grad)
        })
    }
}

impl Layer for ProductInputsLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn eval(&self, inputs: &[Arc<Node>]) -> Result<Arc<Node>, Error> {
        check_nonempty(inputs, self.name())?;
        let values = inputs
            .iter()
            .map(|n| n.data().to_array())
            .collect::<Result<Vec<_>, _>>()?;
        let mut product = values[0].clone();
        for v in &values[1..] {
            product = zip_broadcast(&product, v, |a, b| a.product(b))?;
        }
        Ok(Node::new(
            product.shared(),
            ProductInputsBackward {
                inputs: inputs.to_vec(),
                values,
            },
            any_alive(inputs),
        ))
    }
}
