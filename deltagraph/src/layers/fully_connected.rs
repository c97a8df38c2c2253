use deltagraph_core::{
    delta::DeltaSet,
    layer::{check_inputs, Layer, LayerBase},
    list::{TensorArray, TensorList},
    node::{Accumulator, Node},
    param::Parameter,
    tensor::{num_elements, Tensor},
    Cpu, Error,
};
use std::sync::Arc;

/// A dense matrix product from items of shape `in_dims` to items of shape
/// `out_dims`: `y[j] = sum_i x[i] * weight[i, j]`.
///
/// Weights have shape `[in_len, out_len]` and are initialized uniformly in
/// `±1/sqrt(in_len)` from the device's random number generator. An empty
/// input shape is rejected with [Error::WrongNumElements].
#[derive(Debug, Clone)]
pub struct FullyConnectedLayer {
    base: LayerBase,
    in_dims: Vec<usize>,
    out_dims: Vec<usize>,
    pub weight: Parameter,
}

impl FullyConnectedLayer {
    pub fn new(dev: &Cpu, in_dims: &[usize], out_dims: &[usize]) -> Result<Self, Error> {
        let (i, o) = (num_elements(in_dims), num_elements(out_dims));
        if i == 0 {
            return Err(Error::WrongNumElements {
                dims: in_dims.to_vec(),
                len: 0,
            });
        }
        let scale = 1.0 / (i as f64).sqrt();
        let weight = dev.sample_uniform(&[i, o], -scale, scale)?;
        Ok(Self {
            base: LayerBase::new("fully_connected"),
            in_dims: in_dims.to_vec(),
            out_dims: out_dims.to_vec(),
            weight: Parameter::new("weight", weight),
        })
    }

    pub fn in_dims(&self) -> &[usize] {
        &self.in_dims
    }

    pub fn out_dims(&self) -> &[usize] {
        &self.out_dims
    }
}

struct FullyConnectedBackward {
    input: Arc<Node>,
    x: TensorArray,
    /// Weights as they were during the forward pass.
    weight: Tensor,
    in_dims: Vec<usize>,
    param: Option<Parameter>,
}

impl Accumulator for FullyConnectedBackward {
    fn accumulate(&self, buffer: &DeltaSet, delta: TensorArray) -> Result<(), Error> {
        let (i_len, o_len) = (num_elements(&self.in_dims), num_elements(delta.dimensions()));
        if let Some(param) = &self.param {
            let mut dw = vec![0.0; i_len * o_len];
            for (x, d) in self.x.items().iter().zip(delta.items()) {
                let (x, d) = (x.as_slice(), d.as_slice());
                for i in 0..i_len {
                    let row = &mut dw[i * o_len..(i + 1) * o_len];
                    for (r, dj) in row.iter_mut().zip(d) {
                        *r += x[i] * dj;
                    }
                }
            }
            buffer.for_param(param)?.add_in_place(&dw)?;
        }
        if self.input.is_alive() {
            let w = self.weight.as_slice();
            let dev = delta.device().clone();
            let dx = delta.try_map_items(&self.in_dims, |_, d| {
                let d = d.as_slice();
                let mut dx = dev.try_zeros(&self.in_dims)?;
                for (i, o) in dx.as_mut_slice().iter_mut().enumerate() {
                    let row = &w[i * o_len..(i + 1) * o_len];
                    *o = row.iter().zip(d).map(|(a, b)| a * b).sum();
                }
                Ok(dx)
            })?;
            self.input.accumulate(buffer, dx)?;
        }
        Ok(())
    }
}

impl Layer for FullyConnectedLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn eval(&self, inputs: &[Arc<Node>]) -> Result<Arc<Node>, Error> {
        check_inputs(inputs, 1, self.name())?;
        let input = inputs[0].clone();
        if input.data().dimensions() != self.in_dims.as_slice() {
            return Err(Error::DimensionMismatch {
                expected: self.in_dims.clone(),
                found: input.data().dimensions().to_vec(),
            });
        }
        let x = input.data().to_array()?;
        let weight = self.weight.value();
        let w = weight.as_slice();
        let o_len = num_elements(&self.out_dims);
        let dev = x.device().clone();
        let y = x.try_map_items(&self.out_dims, |_, x| {
            let mut y = dev.try_zeros(&self.out_dims)?;
            let out = y.as_mut_slice();
            for (i, xi) in x.as_slice().iter().enumerate() {
                let row = &w[i * o_len..(i + 1) * o_len];
                for (o, wij) in out.iter_mut().zip(row) {
                    *o += xi * wij;
                }
            }
            Ok(y)
        })?;
        let alive = self.base.output_alive(inputs, true);
        let param = (!self.is_frozen()).then(|| self.weight.clone());
        Ok(Node::new(
            y.shared(),
            FullyConnectedBackward {
                input,
                x,
                weight,
                in_dims: self.in_dims.clone(),
                param,
            },
            alive,
        ))
    }

    fn state(&self) -> Vec<Parameter> {
        vec![self.weight.clone()]
    }
}
