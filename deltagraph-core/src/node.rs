//! The output of a layer evaluation and the backward half of the autodiff
//! contract.
//!
//! A [Node] pairs the data a layer produced with an [Accumulator] that knows
//! how to turn a gradient with respect to that data into gradients for the
//! layer's parameters and upstream nodes. Nodes are immutable, shared as
//! `Arc<Node>`, and release everything their accumulator captured once the
//! last handle goes away.

use crate::{
    cpu::Census,
    delta::DeltaSet,
    list::{SharedList, TensorArray, TensorList},
    param::Parameter,
    unique_id::{unique_id, HasUniqueId, UniqueId},
    Error,
};
use std::sync::Arc;

/// Propagates a gradient backward through one evaluated layer.
///
/// Implementations add parameter gradients into `buffer` (summing, never
/// overwriting) and call [Node::accumulate] on every live input with that
/// input's gradient. They may be called any number of times, from any
/// thread.
pub trait Accumulator: Send + Sync {
    fn accumulate(&self, buffer: &DeltaSet, delta: TensorArray) -> Result<(), Error>;
}

impl<F> Accumulator for F
where
    F: Fn(&DeltaSet, TensorArray) -> Result<(), Error> + Send + Sync,
{
    fn accumulate(&self, buffer: &DeltaSet, delta: TensorArray) -> Result<(), Error> {
        (self)(buffer, delta)
    }
}

/// Accumulator of nodes nothing can be learned through.
struct NoBackward;

impl Accumulator for NoBackward {
    fn accumulate(&self, _: &DeltaSet, _: TensorArray) -> Result<(), Error> {
        Ok(())
    }
}

/// Routes item `i` of the gradient to the `i`-th parameter.
struct VariableBackward {
    params: Vec<Parameter>,
}

impl Accumulator for VariableBackward {
    fn accumulate(&self, buffer: &DeltaSet, delta: TensorArray) -> Result<(), Error> {
        for (param, d) in self.params.iter().zip(delta.items()) {
            buffer.for_param(param)?.add_in_place(d.as_slice())?;
        }
        Ok(())
    }
}

pub struct Node {
    id: UniqueId,
    data: SharedList,
    accumulator: Box<dyn Accumulator>,
    alive: bool,
    census: Arc<Census>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("len", &self.data.len())
            .field("dims", &self.data.dimensions())
            .field("alive", &self.alive)
            .finish()
    }
}

impl HasUniqueId for Node {
    fn id(&self) -> UniqueId {
        self.id
    }
}

impl Node {
    /// A node over `data` whose gradients are handled by `accumulator`.
    /// When `alive` is false the accumulator is never invoked.
    pub fn new<A: Accumulator + 'static>(
        data: SharedList,
        accumulator: A,
        alive: bool,
    ) -> Arc<Node> {
        let census = data.device().census.clone();
        census.register_node();
        Arc::new(Node {
            id: unique_id(),
            data,
            accumulator: Box::new(accumulator),
            alive,
            census,
        })
    }

    /// A dead node: data with nothing upstream to learn.
    pub fn constant(data: SharedList) -> Arc<Node> {
        Self::new(data, NoBackward, false)
    }

    /// A live node over the current value of `param`, as a batch of one.
    /// Gradients flow into the parameter's delta.
    pub fn parameter(param: &Parameter) -> Arc<Node> {
        let data = TensorArray::single(param.value()).shared();
        Self::new(
            data,
            VariableBackward {
                params: vec![param.clone()],
            },
            true,
        )
    }

    /// A live node over `data` with one parameter per batch item, so the
    /// gradient with respect to every input item can be read back from the
    /// [DeltaSet].
    pub fn variable(data: TensorArray) -> (Arc<Node>, Vec<Parameter>) {
        let params: Vec<Parameter> = data
            .items()
            .iter()
            .enumerate()
            .map(|(i, t)| Parameter::new(format!("input[{i}]"), t.clone()))
            .collect();
        let node = Self::new(
            data.shared(),
            VariableBackward {
                params: params.clone(),
            },
            true,
        );
        (node, params)
    }

    pub fn data(&self) -> &SharedList {
        &self.data
    }

    /// Whether any gradient can flow through this node.
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Backpropagates `delta`, a gradient with the same length and item shape
    /// as [Node::data]. Dead nodes return immediately.
    pub fn accumulate(&self, buffer: &DeltaSet, delta: TensorArray) -> Result<(), Error> {
        if delta.len() != self.data.len() {
            return Err(Error::LengthMismatch {
                expected: self.data.len(),
                found: delta.len(),
            });
        }
        if delta.dimensions() != self.data.dimensions() {
            return Err(Error::DimensionMismatch {
                expected: self.data.dimensions().to_vec(),
                found: delta.dimensions().to_vec(),
            });
        }
        if !self.alive {
            tracing::debug!(node = %self.id, "pruned dead branch");
            return Ok(());
        }
        self.accumulator.accumulate(buffer, delta)
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.census.release_node();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{tests::*, Cpu};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_variable_routes_items_to_parameters() {
        let dev: Cpu = Default::default();
        let data =
            TensorArray::from_tensors(vec![dev.vector(vec![1.0, 2.0]), dev.vector(vec![3.0, 4.0])])
                .unwrap();
        let (node, params) = Node::variable(data);
        assert!(node.is_alive());
        let set = DeltaSet::new();
        let delta =
            TensorArray::from_tensors(vec![dev.vector(vec![0.1, 0.2]), dev.vector(vec![0.3, 0.4])])
                .unwrap();
        node.accumulate(&set, delta.clone()).unwrap();
        node.accumulate(&set, delta).unwrap();
        assert_close!(set.delta(params[0].id()).unwrap().values(), [0.2, 0.4]);
        assert_close!(set.delta(params[1].id()).unwrap().values(), [0.6, 0.8]);
    }

    #[test]
    fn test_dead_node_never_invokes_accumulator() {
        let dev: Cpu = Default::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let node = Node::new(
            TensorArray::single(dev.scalar(1.0)).shared(),
            move |_: &DeltaSet, _: TensorArray| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            false,
        );
        let set = DeltaSet::new();
        node.accumulate(&set, TensorArray::single(dev.scalar(1.0))).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(set.is_empty());
    }

    #[test]
    fn test_accumulate_validates_delta_shape() {
        let dev: Cpu = Default::default();
        let node = Node::constant(TensorArray::zeros(&dev, &[2], 3).unwrap().shared());
        let set = DeltaSet::new();
        assert_eq!(
            node.accumulate(&set, TensorArray::zeros(&dev, &[2], 2).unwrap()),
            Err(Error::LengthMismatch {
                expected: 3,
                found: 2
            })
        );
        assert_eq!(
            node.accumulate(&set, TensorArray::zeros(&dev, &[3], 3).unwrap()),
            Err(Error::DimensionMismatch {
                expected: vec![2],
                found: vec![3]
            })
        );
    }

    #[test]
    fn test_census_counts_nodes() {
        let dev: Cpu = Default::default();
        let base = dev.census().snapshot();
        let a = Node::constant(TensorArray::single(dev.scalar(1.0)).shared());
        let b = a.clone();
        assert_eq!(dev.census().live_nodes(), 1);
        drop(a);
        assert_eq!(dev.census().live_nodes(), 1);
        drop(b);
        dev.census().assert_balanced(base);
    }
}
