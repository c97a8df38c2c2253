//! Windows into `[width, height, channels]` images.

use deltagraph_core::{
    delta::DeltaSet,
    layer::{any_alive, check_inputs, Layer, LayerBase},
    list::{views::scatter, TensorArray, TensorList, Window, WindowList},
    node::{Accumulator, Node},
    Error,
};
use std::sync::Arc;

/// The `[width, height]` region centered in each input image, all channels
/// kept. Regions larger than the image are zero padded.
#[derive(Debug, Clone)]
pub struct ImgCropLayer {
    base: LayerBase,
    width: usize,
    height: usize,
}

impl ImgCropLayer {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            base: LayerBase::new("img_crop"),
            width,
            height,
        }
    }
}

/// The `[width, height]` tile whose top-left corner is at `(x, y)` in each
/// input image, all channels kept. Parts of the tile outside the image read
/// as zero.
#[derive(Debug, Clone)]
pub struct ImgTileSelectLayer {
    base: LayerBase,
    width: usize,
    height: usize,
    x: isize,
    y: isize,
}

impl ImgTileSelectLayer {
    pub fn new(width: usize, height: usize, x: isize, y: isize) -> Self {
        Self {
            base: LayerBase::new("img_tile_select"),
            width,
            height,
            x,
            y,
        }
    }
}

fn image_dims(input: &Node) -> Result<&[usize], Error> {
    let dims = input.data().dimensions();
    if dims.len() != 3 {
        return Err(Error::DimensionMismatch {
            expected: vec![0, 0, 0],
            found: dims.to_vec(),
        });
    }
    Ok(dims)
}

struct WindowBackward {
    input: Arc<Node>,
    map: Arc<[Option<usize>]>,
}

impl Accumulator for WindowBackward {
    fn accumulate(&self, buffer: &DeltaSet, delta: TensorArray) -> Result<(), Error> {
        let dims = self.input.data().dimensions().to_vec();
        let dev = delta.device().clone();
        let dx = delta.try_map_items(&dims, |_, d| scatter(&dev, d, &dims, &self.map))?;
        self.input.accumulate(buffer, dx)
    }
}

fn window_node(inputs: &[Arc<Node>], window: Window) -> Result<Arc<Node>, Error> {
    let input = inputs[0].clone();
    let view = WindowList::new(input.data().clone(), window)?;
    let map: Arc<[Option<usize>]> = view.index_map().into();
    Ok(Node::new(
        Arc::new(view),
        WindowBackward { input, map },
        any_alive(inputs),
    ))
}

impl Layer for ImgCropLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn eval(&self, inputs: &[Arc<Node>]) -> Result<Arc<Node>, Error> {
        check_inputs(inputs, 1, self.name())?;
        let dims = image_dims(&inputs[0])?;
        let window = Window::centered(dims, &[self.width, self.height, dims[2]]);
        window_node(inputs, window)
    }
}

impl Layer for ImgTileSelectLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn eval(&self, inputs: &[Arc<Node>]) -> Result<Arc<Node>, Error> {
        check_inputs(inputs, 1, self.name())?;
        let dims = image_dims(&inputs[0])?;
        let window = Window::new(
            vec![self.x, self.y, 0],
            vec![self.width, self.height, dims[2]],
        );
        window_node(inputs, window)
    }
}
