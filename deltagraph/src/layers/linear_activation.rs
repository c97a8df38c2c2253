use deltagraph_core::{
    delta::DeltaSet,
    layer::{check_inputs, Layer, LayerBase},
    list::{TensorArray, TensorList},
    node::{Accumulator, Node},
    param::Parameter,
    Cpu, Error,
};
use std::sync::Arc;

/// `y = weight * x + bias`, elementwise, with a scalar weight and bias.
///
/// ```rust
/// # use deltagraph::prelude::*;
/// let dev: Cpu = Default::default();
/// let layer = LinearActivationLayer::with_values(&dev, 2.0, 1.0);
/// let x = Node::constant(TensorArray::single(dev.vector(vec![1.0, 3.0])).shared());
/// let y = layer.eval(&[x]).unwrap();
/// assert_eq!(y.data().get(0).unwrap().as_slice(), &[3.0, 7.0]);
/// ```
#[derive(Debug, Clone)]
pub struct LinearActivationLayer {
    base: LayerBase,
    pub weight: Parameter,
    pub bias: Parameter,
}

impl LinearActivationLayer {
    /// The identity: weight 1, bias 0.
    pub fn new(dev: &Cpu) -> Self {
        Self::with_values(dev, 1.0, 0.0)
    }

    pub fn with_values(dev: &Cpu, weight: f64, bias: f64) -> Self {
        Self {
            base: LayerBase::new("linear_activation"),
            weight: Parameter::new("weight", dev.scalar(weight)),
            bias: Parameter::new("bias", dev.scalar(bias)),
        }
    }
}

struct LinearActivationBackward {
    input: Arc<Node>,
    x: TensorArray,
    weight: f64,
    params: Option<(Parameter, Parameter)>,
}

impl Accumulator for LinearActivationBackward {
    fn accumulate(&self, buffer: &DeltaSet, delta: TensorArray) -> Result<(), Error> {
        if let Some((weight, bias)) = &self.params {
            let mut dw = 0.0;
            let mut db = 0.0;
            for (x, d) in self.x.items().iter().zip(delta.items()) {
                dw += x.dot(d)?;
                db += d.sum();
            }
            buffer.for_param(weight)?.add_in_place(&[dw])?;
            buffer.for_param(bias)?.add_in_place(&[db])?;
        }
        if self.input.is_alive() {
            let w = self.weight;
            let dx = delta.try_map_items(delta.dimensions(), |_, d| d.scale(w))?;
            self.input.accumulate(buffer, dx)?;
        }
        Ok(())
    }
}

impl Layer for LinearActivationLayer {
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
        let w = self.weight.value().as_slice()[0];
        let b = self.bias.value().as_slice()[0];
        let y = x.try_map_items(x.dimensions(), |_, t| t.try_map(|v| w * v + b))?;
        let alive = self.base.output_alive(inputs, true);
        let params = (!self.is_frozen()).then(|| (self.weight.clone(), self.bias.clone()));
        Ok(Node::new(
            y.shared(),
            LinearActivationBackward {
                input,
                x,
                weight: w,
                params,
            },
            alive,
        ))
    }

    fn state(&self) -> Vec<Parameter> {
        vec![self.weight.clone(), self.bias.clone()]
    }
}
