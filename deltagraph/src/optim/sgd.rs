use deltagraph_core::{
    delta::DeltaSet,
    unique_id::{HasUniqueId, UniqueId},
    Error,
};
use std::collections::BTreeMap;

/// Configuration of [Sgd].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SgdConfig {
    /// Learning rate. Defaults to `1e-2`.
    pub lr: f64,
    /// Classic momentum factor. Defaults to `None`.
    pub momentum: Option<f64>,
    /// L2 weight decay added to the gradient. Defaults to `None`.
    pub weight_decay: Option<f64>,
}

impl Default for SgdConfig {
    fn default() -> Self {
        Self {
            lr: 1e-2,
            momentum: None,
            weight_decay: None,
        }
    }
}

/// Stochastic gradient descent.
///
/// For every delta with a target parameter `w` and gradient `g`:
/// 1. `g += weight_decay * w` with L2 weight decay,
/// 2. `v = momentum * v + g; g = v` with momentum, `v` kept per parameter id,
/// 3. `w -= lr * g`.
#[derive(Debug, Clone)]
pub struct Sgd {
    pub cfg: SgdConfig,
    velocity: BTreeMap<UniqueId, Vec<f64>>,
}

impl Sgd {
    pub fn new(cfg: SgdConfig) -> Self {
        Self {
            cfg,
            velocity: BTreeMap::new(),
        }
    }

    /// Applies one step for every parameter in `gradients`. Deltas without a
    /// target are skipped.
    pub fn update(&mut self, gradients: &DeltaSet) -> Result<(), Error> {
        let cfg = self.cfg;
        let mut updated = 0;
        for key in gradients.keys() {
            let Some(delta) = gradients.delta(key) else {
                continue;
            };
            let Some(param) = delta.target() else {
                continue;
            };
            let mut g = delta.values();
            let velocity = &mut self.velocity;
            param.update(|w| {
                if w.len() != g.len() {
                    return Err(Error::LengthMismatch {
                        expected: w.len(),
                        found: g.len(),
                    });
                }
                let w = w.as_mut_slice();
                if let Some(wd) = cfg.weight_decay {
                    for (g, w) in g.iter_mut().zip(w.iter()) {
                        *g += wd * w;
                    }
                }
                if let Some(momentum) = cfg.momentum {
                    let v = velocity
                        .entry(param.id())
                        .or_insert_with(|| vec![0.0; g.len()]);
                    for (v, g) in v.iter_mut().zip(g.iter_mut()) {
                        *v = momentum * *v + *g;
                        *g = *v;
                    }
                }
                for (w, g) in w.iter_mut().zip(g.iter()) {
                    *w -= cfg.lr * g;
                }
                Ok(())
            })?;
            updated += 1;
        }
        tracing::debug!(
            params = updated,
            magnitude = gradients.magnitude(),
            lr = cfg.lr,
            "sgd step"
        );
        Ok(())
    }
}
