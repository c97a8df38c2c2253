/// Represents the different errors that can occur while building tensors,
/// evaluating layers or accumulating gradients.
///
/// None of these are recoverable inside the engine: they abort the current
/// forward or backward pass and surface to the caller of
/// [crate::layer::Layer::eval] or [crate::node::Node::accumulate].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The backing buffer could not be allocated.
    OutOfMemory,
    /// Not enough (or too many) elements were provided for a shape.
    WrongNumElements { dims: Vec<usize>, len: usize },
    /// Two shapes that must agree (or broadcast) do not.
    DimensionMismatch { expected: Vec<usize>, found: Vec<usize> },
    /// Two lengths that must agree (or broadcast from 1) do not.
    LengthMismatch { expected: usize, found: usize },
    /// A batch index or coordinate is out of range.
    IndexOutOfBounds { index: usize, len: usize },
    /// A layer was evaluated with the wrong number of inputs.
    WrongNumInputs {
        layer: String,
        expected: usize,
        found: usize,
    },
    /// NaN or infinity appeared where a finite value is required.
    NonFinite { context: &'static str },
    /// A sampling range `[low, high)` is empty or has a non-finite bound.
    EmptyRange { low: f64, high: f64 },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::OutOfMemory => f.write_str("out of memory"),
            Self::WrongNumElements { dims, len } => {
                write!(f, "{len} elements cannot fill shape {dims:?}")
            }
            Self::DimensionMismatch { expected, found } => {
                write!(f, "dimension mismatch: expected {expected:?}, found {found:?}")
            }
            Self::LengthMismatch { expected, found } => {
                write!(f, "length mismatch: expected {expected}, found {found}")
            }
            Self::IndexOutOfBounds { index, len } => {
                write!(f, "index {index} out of bounds for length {len}")
            }
            Self::WrongNumInputs {
                layer,
                expected,
                found,
            } => write!(f, "{layer} expects {expected} input(s), got {found}"),
            Self::NonFinite { context } => write!(f, "non-finite value in {context}"),
            Self::EmptyRange { low, high } => write!(f, "cannot sample from [{low}, {high})"),
        }
    }
}

impl std::error::Error for Error {}

pub(crate) fn check_finite(values: &[f64], context: &'static str) -> Result<(), Error> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(Error::NonFinite { context })
    }
}
