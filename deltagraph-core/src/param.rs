use crate::{
    tensor::Tensor,
    unique_id::{unique_id, HasUniqueId, UniqueId},
    Error,
};
use std::sync::{Arc, RwLock};

/// A named, trainable tensor shared between a layer and whoever updates it.
///
/// The [UniqueId] is the key gradients for this parameter are accumulated
/// under in a [crate::delta::DeltaSet]. Forward passes take a [Parameter::value]
/// snapshot (sharing the buffer); [Parameter::update] then mutates a private
/// copy if a snapshot is still held, so accumulators always see the values
/// their forward pass used.
#[derive(Clone, Debug)]
pub struct Parameter {
    id: UniqueId,
    name: String,
    value: Arc<RwLock<Tensor>>,
}

impl HasUniqueId for Parameter {
    fn id(&self) -> UniqueId {
        self.id
    }
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: Tensor) -> Self {
        Self {
            id: unique_id(),
            name: name.into(),
            value: Arc::new(RwLock::new(value)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A snapshot of the current value. Cheap: the buffer is shared.
    pub fn value(&self) -> Tensor {
        self.value.read().unwrap().clone()
    }

    pub fn dimensions(&self) -> Vec<usize> {
        self.value.read().unwrap().dimensions().to_vec()
    }

    pub fn len(&self) -> usize {
        self.value.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mutates the value in place under the write lock.
    pub fn update<R, F>(&self, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut Tensor) -> Result<R, Error>,
    {
        let mut value = self.value.write().unwrap();
        f(&mut value)
    }

    /// Overwrites the value with `data`, which must have the same length.
    pub fn set_data(&self, data: &[f64]) -> Result<(), Error> {
        self.update(|t| t.copy_from(data))
    }

    /// Returns `true` if both handles refer to the same parameter.
    pub fn same_as(&self, other: &Parameter) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Cpu;

    #[test]
    fn test_update_does_not_disturb_snapshot() {
        let dev: Cpu = Default::default();
        let p = Parameter::new("weight", dev.vector(vec![1.0, 2.0]));
        let snapshot = p.value();
        p.update(|t| {
            t.as_mut_slice()[0] = 5.0;
            Ok(())
        })
        .unwrap();
        assert_eq!(snapshot.as_slice(), &[1.0, 2.0]);
        assert_eq!(p.value().as_slice(), &[5.0, 2.0]);
    }

    #[test]
    fn test_clones_share_value() {
        let dev: Cpu = Default::default();
        let p = Parameter::new("bias", dev.scalar(0.0));
        let q = p.clone();
        q.set_data(&[3.0]).unwrap();
        assert_eq!(p.value().as_slice(), &[3.0]);
        assert_eq!(p.id(), q.id());
        assert!(p.same_as(&q));
        assert!(p.set_data(&[1.0, 2.0]).is_err());
    }
}
