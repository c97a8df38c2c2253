use deltagraph_core::{
    delta::DeltaSet,
    layer::{any_alive, check_inputs, Layer, LayerBase},
    list::{zip_broadcast, TensorArray, TensorList},
    node::{Accumulator, Node},
    Error,
};
use std::sync::Arc;

/// Normalizes every item into a probability distribution over all of its
/// elements: `y[i] = exp(x[i]) / sum_j exp(x[j])`.
#[derive(Debug, Clone)]
pub struct SoftmaxActivationLayer {
    base: LayerBase,
}

impl Default for SoftmaxActivationLayer {
    fn default() -> Self {
        Self {
            base: LayerBase::new("softmax"),
        }
    }
}

struct SoftmaxBackward {
    input: Arc<Node>,
    y: TensorArray,
}

impl Accumulator for SoftmaxBackward {
    fn accumulate(&self, buffer: &DeltaSet, delta: TensorArray) -> Result<(), Error> {
        // dx[i] = y[i] * (d[i] - <d, y>)
        let dx = zip_broadcast(&self.y, &delta, |y, d| {
            let dot = y.dot(d)?;
            y.zip_map(d, |y, d| y * (d - dot))
        })?;
        self.input.accumulate(buffer, dx)
    }
}

impl Layer for SoftmaxActivationLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn eval(&self, inputs: &[Arc<Node>]) -> Result<Arc<Node>, Error> {
        check_inputs(inputs, 1, self.name())?;
        let input = inputs[0].clone();
        let x = input.data().to_array()?;
        let y = x.try_map_items(x.dimensions(), |_, t| {
            let max = t.as_slice().iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let exp = t.try_map(|v| (v - max).exp())?;
            let sum = exp.sum();
            exp.scale(1.0 / sum)
        })?;
        Ok(Node::new(
            y.clone().shared(),
            SoftmaxBackward { input, y },
            any_alive(inputs),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::*;

    #[test]
    fn test_items_sum_to_one() {
        let dev: Cpu = Default::default();
        let x = batch(&dev, &[&[1.0, 2.0, 3.0], &[1000.0, 1000.0, 1000.0]]);
        let x = Node::constant(x.shared());
        let y = SoftmaxActivationLayer::default().eval(&[x]).unwrap();
        let y = y.data().to_array().unwrap();
        assert_close!(
            y.items()[0].as_slice(),
            [0.09003057317038046, 0.24472847105479767, 0.6652409557748219]
        );
        // large inputs do not overflow
        assert_close!(y.items()[1].as_slice(), [1.0 / 3.0; 3]);
    }

    #[test]
    fn test_gradients() {
        let dev: Cpu = Default::default();
        assert_gradients(
            &SoftmaxActivationLayer::default(),
            &[random_batch(&dev, &[4], 2)],
        );
    }
}
