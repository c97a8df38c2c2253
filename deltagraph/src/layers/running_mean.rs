use deltagraph_core::{
    delta::DeltaSet,
    layer::{any_alive, check_inputs, Layer, LayerBase, StatefulLayer},
    list::{TensorArray, TensorList},
    node::{Accumulator, Node},
    tensor::Tensor,
    Cpu, Error,
};
use std::sync::Arc;

/// Running statistics of [RunningMeanLayer]: the mean of every item seen so
/// far and how many there were.
#[derive(Debug, Clone, PartialEq)]
pub struct RunningMean {
    pub mean: Tensor,
    pub count: usize,
}

/// Centers its input on a running mean: the state's mean is updated with
/// the current batch and subtracted from every item.
///
/// Evaluation is a pure function of `(state, inputs)`. Through
/// [StatefulLayer::eval_with_state] the caller receives the updated state
/// and decides whether to keep it; [Layer::eval] uses the layer's stored
/// state and discards the update.
#[derive(Debug, Clone)]
pub struct RunningMeanLayer {
    base: LayerBase,
    state: RunningMean,
}

impl RunningMeanLayer {
    pub fn new(dev: &Cpu, dims: &[usize]) -> Result<Self, Error> {
        Ok(Self {
            base: LayerBase::new("running_mean"),
            state: RunningMean {
                mean: dev.try_zeros(dims)?,
                count: 0,
            },
        })
    }

    pub fn running_state(&self) -> &RunningMean {
        &self.state
    }

    pub fn set_state(&mut self, state: RunningMean) {
        self.state = state;
    }
}

struct RunningMeanBackward {
    input: Arc<Node>,
    /// Number of items the updated mean was taken over.
    total: f64,
}

impl Accumulator for RunningMeanBackward {
    fn accumulate(&self, buffer: &DeltaSet, delta: TensorArray) -> Result<(), Error> {
        // y[i] = x[i] - (count * mean + sum_j x[j]) / total
        let correction = delta.sum()?.scale(1.0 / self.total)?;
        let dx = delta.try_map_items(delta.dimensions(), |_, d| d.minus(&correction))?;
        self.input.accumulate(buffer, dx)
    }
}

impl Layer for RunningMeanLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn eval(&self, inputs: &[Arc<Node>]) -> Result<Arc<Node>, Error> {
        let (_, node) = self.eval_with_state(&self.state, inputs)?;
        Ok(node)
    }
}

impl StatefulLayer for RunningMeanLayer {
    type State = RunningMean;

    fn initial_state(&self) -> RunningMean {
        self.state.clone()
    }

    fn eval_with_state(
        &self,
        state: &RunningMean,
        inputs: &[Arc<Node>],
    ) -> Result<(RunningMean, Arc<Node>), Error> {
        check_inputs(inputs, 1, self.name())?;
        let input = inputs[0].clone();
        if input.data().dimensions() != state.mean.dimensions() {
            return Err(Error::DimensionMismatch {
                expected: state.mean.dimensions().to_vec(),
                found: input.data().dimensions().to_vec(),
            });
        }
        let x = input.data().to_array()?;
        let count = state.count + x.len();
        if count == 0 {
            return Err(Error::LengthMismatch {
                expected: 1,
                found: 0,
            });
        }
        let total = count as f64;
        let mean = state
            .mean
            .scale(state.count as f64)?
            .add(&x.sum()?)?
            .scale(1.0 / total)?;
        let y = x.try_map_items(x.dimensions(), |_, t| t.minus(&mean))?;
        let node = Node::new(
            y.shared(),
            RunningMeanBackward { input, total },
            any_alive(inputs),
        );
        Ok((RunningMean { mean, count }, node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::*;

    #[test]
    fn test_state_transitions() {
        let dev: Cpu = Default::default();
        let layer = RunningMeanLayer::new(&dev, &[2]).unwrap();
        let s0 = layer.initial_state();
        assert_eq!(s0.count, 0);

        let x = Node::constant(batch(&dev, &[&[1.0, 2.0], &[3.0, 6.0]]).shared());
        let (s1, y) = layer.eval_with_state(&s0, &[x]).unwrap();
        assert_eq!(s1.count, 2);
        assert_close!(s1.mean.as_slice(), [2.0, 4.0]);
        assert_close!(y.data().to_array().unwrap().to_flat_vec(), [-1.0, -2.0, 1.0, 2.0]);

        let x = Node::constant(batch(&dev, &[&[5.0, 1.0]]).shared());
        let (s2, _) = layer.eval_with_state(&s1, &[x.clone()]).unwrap();
        assert_eq!(s2.count, 3);
        assert_close!(s2.mean.as_slice(), [3.0, 3.0]);

        // the input state is untouched and evaluation is repeatable
        let (again, _) = layer.eval_with_state(&s1, &[x]).unwrap();
        assert_eq!(again, s2);
        assert_eq!(s1.count, 2);
    }

    #[test]
    fn test_eval_uses_stored_state() {
        let dev: Cpu = Default::default();
        let mut layer = RunningMeanLayer::new(&dev, &[1]).unwrap();
        layer.set_state(RunningMean {
            mean: dev.vector(vec![10.0]),
            count: 1,
        });
        let x = Node::constant(batch(&dev, &[&[0.0]]).shared());
        let y = layer.eval(&[x]).unwrap();
        assert_close!(y.data().get(0).unwrap().as_slice(), [-5.0]);
        assert_eq!(layer.running_state().count, 1);
    }

    #[test]
    fn test_gradients() {
        let dev: Cpu = Default::default();
        let mut layer = RunningMeanLayer::new(&dev, &[3]).unwrap();
        layer.set_state(RunningMean {
            mean: dev.vector(vec![0.5, -0.5, 1.0]),
            count: 4,
        });
        assert_gradients(&layer, &[random_batch(&dev, &[3], 3)]);
    }
}
