use deltagraph_core::{
    delta::DeltaSet,
    layer::{any_alive, check_inputs, Layer, LayerBase},
    list::{zip_broadcast, TensorArray, TensorList},
    node::{Accumulator, Node},
    Error,
};
use std::sync::Arc;

/// An elementwise function together with its derivative.
pub trait UnaryDerivative: std::fmt::Debug + Default + Clone + Send + Sync + 'static {
    const NAME: &'static str;

    /// Whether [UnaryDerivative::df] can re-use the output of
    /// [UnaryDerivative::f].
    const DF_USES_FX: bool;

    fn f(&self, x: &f64) -> f64;

    /// Receives `f(x)` if [UnaryDerivative::DF_USES_FX] is true,
    /// otherwise `x`.
    fn df(&self, x: &f64) -> f64;
}

/// `max(0, x)`. The derivative at 0 is taken to be 0.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReLU;

impl UnaryDerivative for ReLU {
    const NAME: &'static str = "relu";
    const DF_USES_FX: bool = false;
    #[inline(always)]
    fn f(&self, x: &f64) -> f64 {
        x.max(0.0)
    }
    #[inline(always)]
    fn df(&self, x: &f64) -> f64 {
        if *x > 0.0 {
            1.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Sigmoid;

impl UnaryDerivative for Sigmoid {
    const NAME: &'static str = "sigmoid";
    const DF_USES_FX: bool = true;
    #[inline(always)]
    fn f(&self, x: &f64) -> f64 {
        1.0 / (1.0 + (-x).exp())
    }
    #[inline(always)]
    fn df(&self, &fx: &f64) -> f64 {
        fx * (1.0 - fx)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Tanh;

impl UnaryDerivative for Tanh {
    const NAME: &'static str = "tanh";
    const DF_USES_FX: bool = true;
    #[inline(always)]
    fn f(&self, x: &f64) -> f64 {
        x.tanh()
    }
    #[inline(always)]
    fn df(&self, &fx: &f64) -> f64 {
        1.0 - fx * fx
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Square;

impl UnaryDerivative for Square {
    const NAME: &'static str = "square";
    const DF_USES_FX: bool = false;
    #[inline(always)]
    fn f(&self, x: &f64) -> f64 {
        x * x
    }
    #[inline(always)]
    fn df(&self, x: &f64) -> f64 {
        2.0 * x
    }
}

/// Applies `Op` to every element of every item.
#[derive(Debug, Clone)]
pub struct ActivationLayer<Op: UnaryDerivative> {
    base: LayerBase,
    op: Op,
}

pub type ReLULayer = ActivationLayer<ReLU>;
pub type SigmoidLayer = ActivationLayer<Sigmoid>;
pub type TanhLayer = ActivationLayer<Tanh>;
pub type SquareLayer = ActivationLayer<Square>;

impl<Op: UnaryDerivative> Default for ActivationLayer<Op> {
    fn default() -> Self {
        Self::new(Op::default())
    }
}

impl<Op: UnaryDerivative> ActivationLayer<Op> {
    pub fn new(op: Op) -> Self {
        Self {
            base: LayerBase::new(Op::NAME),
            op,
        }
    }
}

struct ActivationBackward<Op> {
    op: Op,
    input: Arc<Node>,
    /// `f(x)` or `x`, see [UnaryDerivative::DF_USES_FX].
    saved: TensorArray,
}

impl<Op: UnaryDerivative> Accumulator for ActivationBackward<Op> {
    fn accumulate(&self, buffer: &DeltaSet, delta: TensorArray) -> Result<(), Error> {
        let dx = zip_broadcast(&self.saved, &delta, |s, d| {
            s.zip_map(d, |s, d| self.op.df(&s) * d)
        })?;
        self.input.accumulate(buffer, dx)
    }
}

impl<Op: UnaryDerivative> Layer for ActivationLayer<Op> {
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
        let y = x.try_map_items(x.dimensions(), |_, t| t.try_map(|v| self.op.f(&v)))?;
        let saved = if Op::DF_USES_FX { y.clone() } else { x };
        Ok(Node::new(
            y.shared(),
            ActivationBackward {
                op: self.op.clone(),
                input,
                saved,
            },
            any_alive(inputs),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::*;

    fn forward(layer: &dyn Layer, dev: &Cpu, x: &[f64]) -> Vec<f64> {
        let x = Node::constant(batch(dev, &[x]).shared());
        layer.eval(&[x]).unwrap().data().to_array().unwrap().to_flat_vec()
    }

    #[test]
    fn test_relu() {
        let dev: Cpu = Default::default();
        assert_close!(
            forward(&ReLULayer::default(), &dev, &[-2.0, -0.5, 0.0, 0.5, 2.0]),
            [0.0, 0.0, 0.0, 0.5, 2.0]
        );
        assert_gradients(
            &ReLULayer::default(),
            &[batch(&dev, &[&[-1.0, 0.5], &[2.0, -0.25]])],
        );
    }

    #[test]
    fn test_sigmoid() {
        let dev: Cpu = Default::default();
        assert_close!(
            forward(&SigmoidLayer::default(), &dev, &[0.0, 1.0]),
            [0.5, 0.7310585786300049]
        );
        assert_gradients(&SigmoidLayer::default(), &[random_batch(&dev, &[3], 2)]);
    }

    #[test]
    fn test_tanh() {
        let dev: Cpu = Default::default();
        assert_close!(
            forward(&TanhLayer::default(), &dev, &[0.0, 1.0]),
            [0.0, 0.7615941559557649]
        );
        assert_gradients(&TanhLayer::default(), &[random_batch(&dev, &[3], 2)]);
    }

    #[test]
    fn test_square() {
        let dev: Cpu = Default::default();
        assert_close!(forward(&SquareLayer::default(), &dev, &[-3.0, 0.5]), [9.0, 0.25]);
        assert_gradients(&SquareLayer::default(), &[random_batch(&dev, &[2, 2], 2)]);
    }

    #[test]
    fn test_dead_input_gives_dead_output() {
        let dev: Cpu = Default::default();
        let x = Node::constant(batch(&dev, &[&[1.0]]).shared());
        assert!(!ReLULayer::default().eval(&[x]).unwrap().is_alive());
    }
}
