use super::accumulate_reduced;
use deltagraph_core::{
    delta::DeltaSet,
    layer::{any_alive, check_nonempty, Layer, LayerBase},
    list::{zip_broadcast, TensorArray, TensorList},
    node::{Accumulator, Node},
    Error,
};
use std::sync::Arc;

/// Elementwise sum of any number of inputs.
///
/// Inputs broadcast along both axes: a batch of length 1 is added to every
/// item of a longer batch, and a single-element item is added to every
/// element of a larger item. On the way back the gradient is summed down to
/// each input's own length and shape.
#[derive(Debug, Clone)]
pub struct SumInputsLayer {
    base: LayerBase,
}

impl Default for SumInputsLayer {
    fn default() -> Self {
        Self {
            base: LayerBase::new("sum_inputs"),
        }
    }
}

struct SumInputsBackward {
    inputs: Vec<Arc<Node>>,
}

impl Accumulator for SumInputsBackward {
    fn accumulate(&self, buffer: &DeltaSet, delta: TensorArray) -> Result<(), Error> {
        let dev = delta.device().clone();
        dev.try_for_each_input(&self.inputs, |_, input| {
            accumulate_reduced(input, buffer, delta.clone())
        })
    }
}

impl Layer for SumInputsLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn eval(&self, inputs: &[Arc<Node>]) -> Result<Arc<Node>, Error> {
        check_nonempty(inputs, self.name())?;
        let mut sum = inputs[0].data().to_array()?;
        for input in &inputs[1..] {
            sum = zip_broadcast(&sum, &**input.data(), |a, b| a.add(b))?;
        }
        Ok(Node::new(
            sum.shared(),
            SumInputsBackward {
                inputs: inputs.to_vec(),
            },
            any_alive(inputs),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::*;
    use deltagraph_core::unique_id::HasUniqueId;

    #[test]
    fn test_batch_broadcast_sums_deltas() {
        let dev: Cpu = Default::default();
        let (a, a_params) = Node::variable(batch(&dev, &[&[1.0], &[2.0], &[3.0], &[4.0]]));
        let (b, b_params) = Node::variable(batch(&dev, &[&[10.0]]));
        let y = SumInputsLayer::default().eval(&[a, b]).unwrap();
        assert_eq!(y.data().len(), 4);
        assert_close!(y.data().to_array().unwrap().to_flat_vec(), [11.0, 12.0, 13.0, 14.0]);

        let buffer = DeltaSet::new();
        y.accumulate(&buffer, batch(&dev, &[&[1.0], &[2.0], &[3.0], &[4.0]]))
            .unwrap();
        assert_close!(buffer.delta(b_params[0].id()).unwrap().values(), [10.0]);
        for (p, expected) in a_params.iter().zip([1.0, 2.0, 3.0, 4.0]) {
            assert_close!(buffer.delta(p.id()).unwrap().values(), [expected]);
        }
    }

    #[test]
    fn test_element_broadcast_sums_deltas() {
        let dev: Cpu = Default::default();
        let (a, _) = Node::variable(batch(&dev, &[&[1.0, 2.0, 3.0]]));
        let (b, b_params) = Node::variable(batch(&dev, &[&[0.5]]));
        let y = SumInputsLayer::default().eval(&[a, b]).unwrap();
        assert_close!(y.data().to_array().unwrap().to_flat_vec(), [1.5, 2.5, 3.5]);
        let buffer = DeltaSet::new();
        y.accumulate(&buffer, batch(&dev, &[&[1.0, 1.0, 2.0]])).unwrap();
        assert_close!(buffer.delta(b_params[0].id()).unwrap().values(), [4.0]);
    }

    #[test]
    fn test_incompatible_inputs() {
        let dev: Cpu = Default::default();
        let a = Node::constant(TensorArray::zeros(&dev, &[2], 3).unwrap().shared());
        let b = Node::constant(TensorArray::zeros(&dev, &[2], 2).unwrap().shared());
        assert!(SumInputsLayer::default().eval(&[a, b]).is_err());
        assert!(SumInputsLayer::default().eval(&[]).is_err());
    }

    #[test]
    fn test_gradients() {
        let dev: Cpu = Default::default();
        let layer = SumInputsLayer::default();
        assert_gradients(
            &layer,
            &[
                random_batch(&dev, &[3], 2),
                random_batch(&dev, &[3], 1),
                random_batch(&dev, &[1], 2),
            ],
        );
    }
}
