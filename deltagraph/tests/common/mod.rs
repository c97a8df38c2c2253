#![allow(dead_code)]

use deltagraph::prelude::*;

/// A batch with one vector item per row.
pub fn batch(dev: &Cpu, rows: &[&[f64]]) -> TensorArray {
    TensorArray::from_tensors(rows.iter().map(|r| dev.vector(r.to_vec())).collect()).unwrap()
}

/// A batch of `len` items of shape `[1]`, all one. Seeds the backward pass
/// of a loss.
pub fn ones(dev: &Cpu, len: usize) -> TensorArray {
    TensorArray::from_tensors((0..len).map(|_| dev.vector(vec![1.0])).collect()).unwrap()
}

pub fn assert_all_close(lhs: &[f64], rhs: &[f64], tolerance: f64) {
    assert_eq!(lhs.len(), rhs.len(), "{lhs:?} vs {rhs:?}");
    for (i, (l, r)) in lhs.iter().zip(rhs.iter()).enumerate() {
        assert!(
            (l - r).abs() <= tolerance,
            "index {i}: {l} vs {r} ({lhs:?} vs {rhs:?})"
        );
    }
}
