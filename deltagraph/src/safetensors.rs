//! Persistence of layer parameters in the `.safetensors` format.
//!
//! Every parameter of [Layer::state] is stored as a little-endian `f64`
//! tensor under the key `"{layer name}.{parameter name}"`. Loading copies the
//! stored values into the existing parameters, so handles held elsewhere see
//! the loaded values.

use deltagraph_core::{layer::Layer, param::Parameter};
use memmap2::MmapOptions;
use safetensors::{
    tensor::{Dtype, SafeTensors, TensorView},
    SafeTensorError,
};
use std::{collections::BTreeMap, path::Path};

#[derive(Debug)]
pub enum Error {
    SafeTensorError(SafeTensorError),
    IoError(std::io::Error),
    /// A stored tensor does not have the shape of the parameter it is loaded into.
    MismatchedDimension {
        key: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    /// A stored tensor is not `f64`.
    WrongDtype { key: String, found: Dtype },
    Core(deltagraph_core::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SafeTensorError(e) => write!(f, "safetensors: {e:?}"),
            Self::IoError(e) => write!(f, "io: {e}"),
            Self::MismatchedDimension {
                key,
                expected,
                found,
            } => write!(f, "{key}: expected shape {expected:?}, found {found:?}"),
            Self::WrongDtype { key, found } => write!(f, "{key}: expected F64, found {found:?}"),
            Self::Core(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<SafeTensorError> for Error {
    fn from(e: SafeTensorError) -> Self {
        Self::SafeTensorError(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e)
    }
}

impl From<deltagraph_core::Error> for Error {
    fn from(e: deltagraph_core::Error) -> Self {
        Self::Core(e)
    }
}

struct TensorData {
    shape: Vec<usize>,
    data: Vec<u8>,
}

/// Collects tensors to be written into one `.safetensors` document.
#[derive(Default)]
pub struct Writer {
    tensors: BTreeMap<String, TensorData>,
}

impl Writer {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add(&mut self, key: String, param: &Parameter) {
        let value = param.value();
        let data = value
            .as_slice()
            .iter()
            .flat_map(|f| f.to_le_bytes())
            .collect();
        let shape = value.dimensions().to_vec();
        self.tensors.insert(key, TensorData { shape, data });
    }

    fn views(&self) -> Result<BTreeMap<String, TensorView<'_>>, Error> {
        self.tensors
            .iter()
            .map(|(k, t)| {
                let view = TensorView::new(Dtype::F64, t.shape.clone(), &t.data)?;
                Ok((k.clone(), view))
            })
            .collect()
    }

    /// Adds every parameter of `layer`.
    pub fn add_layer(&mut self, layer: &dyn Layer) {
        for p in layer.state() {
            self.add(key(layer.name(), &p), &p);
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let views = self.views()?;
        Ok(safetensors::serialize(&views, &None)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let views = self.views()?;
        safetensors::serialize_to_file(&views, &None, path)?;
        Ok(())
    }
}

/// Copies the tensor stored under `key` into `param`.
pub fn load_parameter(tensors: &SafeTensors, key: &str, param: &Parameter) -> Result<(), Error> {
    let view = tensors.tensor(key)?;
    if view.dtype() != Dtype::F64 {
        return Err(Error::WrongDtype {
            key: key.to_string(),
            found: view.dtype(),
        });
    }
    let expected = param.dimensions();
    if view.shape() != expected.as_slice() {
        return Err(Error::MismatchedDimension {
            key: key.to_string(),
            expected,
            found: view.shape().to_vec(),
        });
    }
    let values: Vec<f64> = view
        .data()
        .chunks_exact(8)
        .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
        .collect();
    param.set_data(&values)?;
    Ok(())
}

/// Something whose parameters can be written to a `.safetensors` file.
pub trait SaveSafeTensors {
    fn write_safetensors(&self, writer: &mut Writer);

    /// Serializes into an in-memory `.safetensors` document.
    fn to_safetensors_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut w = Writer::new();
        self.write_safetensors(&mut w);
        w.to_bytes()
    }

    /// Saves into the `.safetensors` file at `path`.
    fn save_safetensors<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let mut w = Writer::new();
        self.write_safetensors(&mut w);
        w.save(path.as_ref())
    }
}

/// Something whose parameters can be read back from a `.safetensors` file.
pub trait LoadSafeTensors {
    fn read_safetensors(&self, tensors: &SafeTensors) -> Result<(), Error>;

    fn load_safetensors_from_bytes(&self, bytes: &[u8]) -> Result<(), Error> {
        let tensors = SafeTensors::deserialize(bytes)?;
        self.read_safetensors(&tensors)
    }

    /// Loads from the `.safetensors` file at `path`, which is memory mapped.
    fn load_safetensors<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let f = std::fs::File::open(path)?;
        // SAFETY: the file is only read, and only for the duration of this call.
        let buffer = unsafe { MmapOptions::new().map(&f)? };
        let tensors = SafeTensors::deserialize(&buffer)?;
        self.read_safetensors(&tensors)
    }
}

fn key(layer: &str, param: &Parameter) -> String {
    format!("{layer}.{}", param.name())
}

impl<L: Layer + ?Sized> SaveSafeTensors for L {
    fn write_safetensors(&self, writer: &mut Writer) {
        for p in self.state() {
            writer.add(key(self.name(), &p), &p);
        }
    }
}

impl<L: Layer + ?Sized> LoadSafeTensors for L {
    fn read_safetensors(&self, tensors: &SafeTensors) -> Result<(), Error> {
        for p in self.state() {
            load_parameter(tensors, &key(self.name(), &p), &p)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{layers::*, tests::*};
    use tempfile::NamedTempFile;

    #[test]
    fn test_save_load_layer() {
        let dev: Cpu = Default::default();
        let saved = FullyConnectedLayer::new(&dev, &[3], &[2]).unwrap();
        let loaded = FullyConnectedLayer::new(&dev, &[3], &[2]).unwrap();
        assert_ne!(saved.weight.value(), loaded.weight.value());

        let file = NamedTempFile::new().expect("failed to create tempfile");
        saved.save_safetensors(file.path()).expect("");
        loaded.load_safetensors(file.path()).expect("");
        assert_eq!(saved.weight.value(), loaded.weight.value());
    }

    #[test]
    fn test_keys_are_layer_dot_parameter() {
        let dev: Cpu = Default::default();
        let layer = LinearActivationLayer::with_values(&dev, 2.0, 1.0);
        let bytes = layer.to_safetensors_bytes().unwrap();
        let tensors = SafeTensors::deserialize(&bytes).unwrap();
        let mut names = tensors.names();
        names.sort();
        assert_eq!(names, vec!["linear_activation.bias", "linear_activation.weight"]);
    }

    #[test]
    fn test_round_trip_is_bit_exact() {
        let dev: Cpu = Default::default();
        let saved = BiasLayer::new(&dev, &[3]).unwrap();
        saved
            .bias
            .set_data(&[0.1, f64::MIN_POSITIVE, -1.0 / 3.0])
            .unwrap();
        let loaded = BiasLayer::new(&dev, &[3]).unwrap();
        loaded
            .load_safetensors_from_bytes(&saved.to_safetensors_bytes().unwrap())
            .unwrap();
        let (a, b) = (saved.bias.value(), loaded.bias.value());
        for (x, y) in a.as_slice().iter().zip(b.as_slice()) {
            assert_eq!(x.to_bits(), y.to_bits());
        }
    }

    #[test]
    fn test_shape_mismatch() {
        let dev: Cpu = Default::default();
        let saved = BiasLayer::new(&dev, &[3]).unwrap();
        let loaded = BiasLayer::new(&dev, &[4]).unwrap();
        let r = loaded.load_safetensors_from_bytes(&saved.to_safetensors_bytes().unwrap());
        assert!(matches!(r, Err(Error::MismatchedDimension { .. })));
    }

    #[test]
    fn test_save_load_many_layers() {
        let dev: Cpu = Default::default();
        let build = |dev: &Cpu| -> Vec<Box<dyn Layer>> {
            let mut a = FullyConnectedLayer::new(dev, &[2], &[2]).unwrap();
            a.base_mut().set_name("fc0");
            let mut b = FullyConnectedLayer::new(dev, &[2], &[1]).unwrap();
            b.base_mut().set_name("fc1");
            vec![Box::new(a), Box::new(b)]
        };
        let saved = build(&dev);
        let loaded = build(&dev);
        let file = NamedTempFile::new().expect("failed to create tempfile");
        let mut writer = Writer::new();
        for layer in saved.iter() {
            writer.add_layer(layer.as_ref());
        }
        writer.save(file.path()).expect("");
        for layer in loaded.iter() {
            layer.load_safetensors(file.path()).expect("");
        }
        for (s, l) in saved.iter().zip(loaded.iter()) {
            assert_eq!(s.state()[0].value(), l.state()[0].value());
        }
    }
}
