use deltagraph_core::{
    delta::DeltaSet,
    layer::{any_alive, check_inputs, Layer, LayerBase},
    list::{TensorArray, TensorList},
    node::{Accumulator, Node},
    Error,
};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolingMode {
    Max,
    Avg,
}

/// Pools non-overlapping `[width, height]` windows of `[w, h, c]` images
/// channel by channel. The output has shape
/// `[ceil(w / width), ceil(h / height), c]`; windows at the right and bottom
/// edges may be partial.
#[derive(Debug, Clone)]
pub struct PoolingLayer {
    base: LayerBase,
    width: usize,
    height: usize,
    mode: PoolingMode,
}

impl PoolingLayer {
    pub fn new(width: usize, height: usize, mode: PoolingMode) -> Self {
        Self {
            base: LayerBase::new("pooling"),
            width: width.max(1),
            height: height.max(1),
            mode,
        }
    }

    fn out_dims(&self, dims: &[usize]) -> Vec<usize> {
        vec![
            dims[0].div_ceil(self.width),
            dims[1].div_ceil(self.height),
            dims[2]
        ]
    }

    /// Flat input indices of every window, in output order.
    fn windows(&self, dims: &[usize]) -> Vec<Vec<usize>> {
        let (w, h, c) = (dims[0], dims[1], dims[2]);
        let out = self.out_dims(dims);
        let mut windows = Vec::with_capacity(out.iter().product());
        for ox in 0..out[0] {
            for oy in 0..out[1] {
                for ch in 0..c {
                    let mut window = Vec::with_capacity(self.width * self.height);
                    for x in ox * self.width..((ox + 1) * self.width).min(w) {
                        for y in oy * self.height..((oy + 1) * self.height).min(h) {
                            window.push((x * h + y) * c + ch);
                        }
                    }
                    windows.push(window);
                }
            }
        }
        windows
    }
}

struct PoolingBackward {
    input: Arc<Node>,
    windows: Arc<Vec<Vec<usize>>>,
    /// Per item, the input index each output element was taken from. Empty
    /// for average pooling.
    argmax: Vec<Vec<usize>>,
}

impl Accumulator for PoolingBackward {
    fn accumulate(&self, buffer: &DeltaSet, delta: TensorArray) -> Result<(), Error> {
        let dims = self.input.data().dimensions().to_vec();
        let dev = delta.device().clone();
        let dx = delta.try_map_items(&dims, |i, d| {
            let mut dx = dev.try_zeros(&dims)?;
            let out = dx.as_mut_slice();
            if self.argmax.is_empty() {
                for (window, g) in self.windows.iter().zip(d.as_slice()) {
                    let share = g / window.len() as f64;
                    for &j in window {
                        out[j] += share;
                    }
                }
            } else {
                for (&j, g) in self.argmax[i].iter().zip(d.as_slice()) {
                    out[j] += g;
                }
            }
            Ok(dx)
        })?;
        self.input.accumulate(buffer, dx)
    }
}

impl Layer for PoolingLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn eval(&self, inputs: &[Arc<Node>]) -> Result<Arc<Node>, Error> {
        check_inputs(inputs, 1, self.name())?;
        let input = inputs[0].clone();
        let dims = input.data().dimensions().to_vec();
        if dims.len() != 3 {
            return Err(Error::DimensionMismatch {
                expected: vec![0, 0, 0],
                found: dims,
            });
        }
        let out_dims = self.out_dims(&dims);
        let windows = Arc::new(self.windows(&dims));
        let x = input.data().to_array()?;
        let dev = x.device().clone();

        let pooled = dev.try_map_batch(x.len(), |i| {
            let src = x.items()[i].as_slice();
            let mut y = dev.try_zeros(&out_dims)?;
            let mut argmax = Vec::new();
            for (o, window) in y.as_mut_slice().iter_mut().zip(windows.iter()) {
                match self.mode {
                    PoolingMode::Max => {
                        let best = window
                            .iter()
                            .copied()
                            .fold(window[0], |b, j| if src[j] > src[b] { j } else { b });
                        *o = src[best];
                        argmax.push(best);
                    }
                    PoolingMode::Avg => {
                        *o = window.iter().map(|&j| src[j]).sum::<f64>() / window.len() as f64;
                    }
                }
            }
            Ok((y, argmax))
        })?;
        let (items, argmax): (Vec<_>, Vec<_>) = pooled.into_iter().unzip();
        let argmax = match self.mode {
            PoolingMode::Max => argmax,
            PoolingMode::Avg => Vec::new(),
        };
        let y = TensorArray::new(&dev, &out_dims, items)?;
        Ok(Node::new(
            y.shared(),
            PoolingBackward {
                input,
                windows,
                argmax,
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

    fn image(dev: &Cpu) -> TensorArray {
        // 3x3, one channel
        TensorArray::single(
            dev.tensor(
                vec![1.0, 5.0, 2.0, 3.0, 4.0, 9.0, 7.0, 0.0, 6.0],
                &[3, 3, 1],
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_max_pooling_with_partial_windows() {
        let dev: Cpu = Default::default();
        let y = PoolingLayer::new(2, 2, PoolingMode::Max)
            .eval(&[Node::constant(image(&dev).shared())])
            .unwrap();
        assert_eq!(y.data().dimensions(), &[2, 2, 1]);
        assert_close!(y.data().get(0).unwrap().as_slice(), [5.0, 9.0, 7.0, 6.0]);
    }

    #[test]
    fn test_avg_pooling() {
        let dev: Cpu = Default::default();
        let y = PoolingLayer::new(2, 2, PoolingMode::Avg)
            .eval(&[Node::constant(image(&dev).shared())])
            .unwrap();
        assert_close!(y.data().get(0).unwrap().as_slice(), [3.25, 5.5, 3.5, 6.0]);
    }

    #[test]
    fn test_max_routes_gradient_to_winner() {
        let dev: Cpu = Default::default();
        let (x, params) = Node::variable(image(&dev));
        let y = PoolingLayer::new(3, 3, PoolingMode::Max).eval(&[x]).unwrap();
        let buffer = DeltaSet::new();
        let dy = TensorArray::single(dev.tensor(vec![2.0], &[1, 1, 1]).unwrap());
        y.accumulate(&buffer, dy).unwrap();
        assert_close!(
            buffer.delta(params[0].id()).unwrap().values(),
            [0.0, 0.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0]
        );
    }

    #[test]
    fn test_gradients() {
        let dev: Cpu = Default::default();
        let x = random_batch(&dev, &[4, 3, 2], 2);
        assert_gradients(&PoolingLayer::new(2, 2, PoolingMode::Avg), &[x.clone()]);
        assert_gradients(&PoolingLayer::new(2, 2, PoolingMode::Max), &[x]);
    }
}
