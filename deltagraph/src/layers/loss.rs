use super::accumulate_reduced;
use deltagraph_core::{
    delta::DeltaSet,
    layer::{any_alive, check_inputs, Layer, LayerBase},
    list::{zip_broadcast, TensorArray, TensorList},
    node::{Accumulator, Node},
    tensor::{num_elements, Tensor},
    Error,
};
use std::sync::Arc;

/// Mean squared error between a prediction (input 0) and a target
/// (input 1), one value of shape `[1]` per item.
///
/// Both inputs broadcast like [super::SumInputsLayer].
#[derive(Debug, Clone)]
pub struct MeanSqLossLayer {
    base: LayerBase,
}

impl Default for MeanSqLossLayer {
    fn default() -> Self {
        Self {
            base: LayerBase::new("mean_sq_loss"),
        }
    }
}

/// Cross entropy `-sum t * ln(p)` between probabilities (input 0) and a
/// target distribution (input 1), one value of shape `[1]` per item.
///
/// Terms where the target is zero contribute nothing. A zero probability
/// under a non-zero target is an [Error::NonFinite].
#[derive(Debug, Clone)]
pub struct EntropyLossLayer {
    base: LayerBase,
}

impl Default for EntropyLossLayer {
    fn default() -> Self {
        Self {
            base: LayerBase::new("entropy_loss"),
        }
    }
}

/// Multiplies item `i` of `grads` by the single element of item `i` of the
/// loss gradient.
fn chain(grads: TensorArray, delta: &TensorArray) -> Result<TensorArray, Error> {
    let dims = grads.dimensions().to_vec();
    grads.try_map_items(&dims, |i, g| g.scale(delta.items()[i].as_slice()[0]))
}

fn loss_node<A: Accumulator + 'static>(
    inputs: &[Arc<Node>],
    losses: Vec<Tensor>,
    accumulator: A,
) -> Result<Arc<Node>, Error> {
    let dev = inputs[0].data().device().clone();
    for l in losses.iter() {
        l.check_finite("loss")?;
    }
    let y = TensorArray::new(&dev, &[1], losses)?;
    Ok(Node::new(y.shared(), accumulator, any_alive(inputs)))
}

struct MeanSqBackward {
    inputs: [Arc<Node>; 2],
    diff: TensorArray,
}

impl Accumulator for MeanSqBackward {
    fn accumulate(&self, buffer: &DeltaSet, delta: TensorArray) -> Result<(), Error> {
        let n = num_elements(self.diff.dimensions()) as f64;
        let grad = self.diff.try_map_items(self.diff.dimensions(), |_, d| d.scale(2.0 / n))?;
        let grad = chain(grad, &delta)?;
        let dev = delta.device().clone();
        dev.try_for_each_input(&self.inputs, |k, input| {
            if k == 0 {
                accumulate_reduced(input, buffer, grad.clone())
            } else {
                let neg = grad.try_map_items(grad.dimensions(), |_, g| g.scale(-1.0))?;
                accumulate_reduced(input, buffer, neg)
            }
        })
    }
}

impl Layer for MeanSqLossLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn eval(&self, inputs: &[Arc<Node>]) -> Result<Arc<Node>, Error> {
        check_inputs(inputs, 2, self.name())?;
        let diff = zip_broadcast(&**inputs[0].data(), &**inputs[1].data(), |a, b| a.minus(b))?;
        let dev = diff.device().clone();
        let n = num_elements(diff.dimensions()) as f64;
        let losses = diff
            .items()
            .iter()
            .map(|d| dev.try_filled(&[1], d.dot(d)? / n))
            .collect::<Result<Vec<_>, _>>()?;
        loss_node(
            inputs,
            losses,
            MeanSqBackward {
                inputs: [inputs[0].clone(), inputs[1].clone()],
                diff,
            },
        )
    }
}

struct EntropyBackward {
    inputs: [Arc<Node>; 2],
    p: TensorArray,
    t: TensorArray,
}

impl Accumulator for EntropyBackward {
    fn accumulate(&self, buffer: &DeltaSet, delta: TensorArray) -> Result<(), Error> {
        let dev = delta.device().clone();
        dev.try_for_each_input(&self.inputs, |k, input| {
            if !input.is_alive() {
                return Ok(());
            }
            let grad = if k == 0 {
                // d/dp = -t / p
                zip_broadcast(&self.p, &self.t, |p, t| {
                    p.zip_map(t, |p, t| if t == 0.0 { 0.0 } else { -t / p })
                })?
            } else {
                // d/dt = -ln(p)
                zip_broadcast(&self.p, &self.t, |p, t| p.zip_map(t, |p, _| -p.ln()))?
            };
            accumulate_reduced(input, buffer, chain(grad, &delta)?)
        })
    }
}

impl Layer for EntropyLossLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn eval(&self, inputs: &[Arc<Node>]) -> Result<Arc<Node>, Error> {
        check_inputs(inputs, 2, self.name())?;
        let p = inputs[0].data().to_array()?;
        let t = inputs[1].data().to_array()?;
        let terms = zip_broadcast(&p, &t, |p, t| {
            p.zip_map(t, |p, t| if t == 0.0 { 0.0 } else { -t * p.ln() })
        })?;
        let dev = terms.device().clone();
        let losses = terms
            .items()
            .iter()
            .map(|x| dev.try_filled(&[1], x.sum()))
            .collect::<Result<Vec<_>, _>>()?;
        loss_node(
            inputs,
            losses,
            EntropyBackward {
                inputs: [inputs[0].clone(), inputs[1].clone()],
                p,
                t,
            },
        )
    }
}
