use deltagraph_core::{
    delta::DeltaSet,
    layer::{check_inputs, Layer, LayerBase},
    list::{zip_broadcast, TensorArray, TensorList},
    node::{Accumulator, Node},
    param::Parameter,
    Cpu, Error,
};
use std::sync::Arc;

/// Adds a learnable tensor to every item of the input batch.
///
/// The bias has the item shape given at construction and starts at zero.
#[derive(Debug, Clone)]
pub struct BiasLayer {
    base: LayerBase,
    pub bias: Parameter,
}

impl BiasLayer {
    pub fn new(dev: &Cpu, dims: &[usize]) -> Result<Self, Error> {
        Ok(Self {
            base: LayerBase::new("bias"),
            bias: Parameter::new("bias", dev.try_zeros(dims)?),
        })
    }
}

struct BiasBackward {
    input: Arc<Node>,
    bias: Option<Parameter>,
}

impl Accumulator for BiasBackward {
    fn accumulate(&self, buffer: &DeltaSet, delta: TensorArray) -> Result<(), Error> {
        if let Some(bias) = &self.bias {
            buffer.for_param(bias)?.add_in_place(delta.sum()?.as_slice())?;
        }
        self.input.accumulate(buffer, delta)
    }
}

impl Layer for BiasLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn eval(&self, inputs: &[Arc<Node>]) -> Result<Arc<Node>, Error> {
        check_inputs(inputs, 1, self.name())?;
        let input = inputs[0].clone();
        let bias = self.bias.value();
        if input.data().dimensions() != bias.dimensions() {
            return Err(Error::DimensionMismatch {
                expected: bias.dimensions().to_vec(),
                found: input.data().dimensions().to_vec(),
            });
        }
        let y = zip_broadcast(&**input.data(), &TensorArray::single(bias), |x, b| x.add(b))?;
        let alive = self.base.output_alive(inputs, true);
        let bias = (!self.is_frozen()).then(|| self.bias.clone());
        Ok(Node::new(y.shared(), BiasBackward { input, bias }, alive))
    }

    fn state(&self) -> Vec<Parameter> {
        vec![self.bias.clone()]
    }
}
