//! The [Layer] contract every operator implements.

use crate::{
    node::Node,
    param::Parameter,
    unique_id::{unique_id, UniqueId},
    Error,
};
use std::sync::Arc;

/// Identity, name and frozen flag shared by every layer implementation.
#[derive(Debug, Clone)]
pub struct LayerBase {
    id: UniqueId,
    name: String,
    frozen: bool,
}

impl LayerBase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: unique_id(),
            name: name.into(),
            frozen: false,
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Liveness of a node produced from `inputs`: any input is alive, or the
    /// layer has parameters and is not frozen.
    pub fn output_alive(&self, inputs: &[Arc<Node>], has_state: bool) -> bool {
        any_alive(inputs) || (has_state && !self.frozen)
    }
}

/// An operator in the graph.
///
/// `eval` must not mutate its inputs and must return a node whose data has
/// the documented output shape; errors abort the forward pass.
pub trait Layer: Send + Sync + std::fmt::Debug {
    fn base(&self) -> &LayerBase;
    fn base_mut(&mut self) -> &mut LayerBase;

    fn eval(&self, inputs: &[Arc<Node>]) -> Result<Arc<Node>, Error>;

    /// Trainable parameters, in a stable order.
    fn state(&self) -> Vec<Parameter> {
        Vec::new()
    }

    fn id(&self) -> UniqueId {
        self.base().id
    }

    fn name(&self) -> &str {
        &self.base().name
    }

    fn is_frozen(&self) -> bool {
        self.base().frozen
    }

    /// A frozen layer adds nothing to the [crate::delta::DeltaSet] but still
    /// passes gradients through to its inputs.
    fn set_frozen(&mut self, frozen: bool) {
        self.base_mut().frozen = frozen;
    }
}

impl<L: Layer + ?Sized> Layer for Box<L> {
    fn base(&self) -> &LayerBase {
        (**self).base()
    }
    fn base_mut(&mut self) -> &mut LayerBase {
        (**self).base_mut()
    }
    fn eval(&self, inputs: &[Arc<Node>]) -> Result<Arc<Node>, Error> {
        (**self).eval(inputs)
    }
    fn state(&self) -> Vec<Parameter> {
        (**self).state()
    }
}

/// A layer that carries state between evaluations, such as running
/// statistics. The state is threaded explicitly: `(state, inputs) ->
/// (state', node)`.
pub trait StatefulLayer: Layer {
    type State: Clone + Send + Sync + std::fmt::Debug;

    fn initial_state(&self) -> Self::State;

    fn eval_with_state(
        &self,
        state: &Self::State,
        inputs: &[Arc<Node>],
    ) -> Result<(Self::State, Arc<Node>), Error>;
}

/// Returns [Error::WrongNumInputs] unless there are exactly `expected`
/// inputs.
pub fn check_inputs(inputs: &[Arc<Node>], expected: usize, layer: &str) -> Result<(), Error> {
    if inputs.len() != expected {
        return Err(Error::WrongNumInputs {
            layer: layer.to_string(),
            expected,
            found: inputs.len(),
        });
    }
    Ok(())
}

/// Returns [Error::WrongNumInputs] if there are no inputs.
pub fn check_nonempty(inputs: &[Arc<Node>], layer: &str) -> Result<(), Error> {
    if inputs.is_empty() {
        return Err(Error::WrongNumInputs {
            layer: layer.to_string(),
            expected: 1,
            found: 0,
        });
    }
    Ok(())
}

pub fn any_alive(inputs: &[Arc<Node>]) -> bool {
    inputs.iter().any(|n| n.is_alive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{list::TensorArray, Cpu};

    #[derive(Debug)]
    struct Passthrough {
        base: LayerBase,
        weight: Parameter,
    }

    impl Layer for Passthrough {
        fn base(&self) -> &LayerBase {
            &self.base
        }
        fn base_mut(&mut self) -> &mut LayerBase {
            &mut self.base
        }
        fn eval(&self, inputs: &[Arc<Node>]) -> Result<Arc<Node>, Error> {
            check_inputs(inputs, 1, self.name())?;
            let alive = self.base.output_alive(inputs, true);
            let input = inputs[0].clone();
            Ok(Node::new(
                input.data().clone(),
                move |buf: &crate::delta::DeltaSet, d: TensorArray| input.accumulate(buf, d),
                alive,
            ))
        }
        fn state(&self) -> Vec<Parameter> {
            vec![self.weight.clone()]
        }
    }

    #[test]
    fn test_liveness_follows_frozen_flag() {
        let dev: Cpu = Default::default();
        let mut layer = Passthrough {
            base: LayerBase::new("pass"),
            weight: Parameter::new("weight", dev.scalar(1.0)),
        };
        let x = Node::constant(TensorArray::single(dev.scalar(2.0)).shared());
        assert!(layer.eval(&[x.clone()]).unwrap().is_alive());
        layer.set_frozen(true);
        assert!(layer.is_frozen());
        assert!(!layer.eval(&[x.clone()]).unwrap().is_alive());
        let (v, _) = Node::variable(TensorArray::single(dev.scalar(2.0)));
        assert!(layer.eval(&[v]).unwrap().is_alive());
    }

    #[test]
    fn test_wrong_number_of_inputs() {
        let dev: Cpu = Default::default();
        let layer = Passthrough {
            base: LayerBase::new("pass"),
            weight: Parameter::new("weight", dev.scalar(1.0)),
        };
        assert_eq!(
            layer.eval(&[]).unwrap_err(),
            Error::WrongNumInputs {
                layer: "pass".into(),
                expected: 1,
                found: 0
            }
        );
        assert_eq!(layer.name(), "pass");
        assert_eq!(layer.state().len(), 1);
    }
}
