//! Verifies a layer's backward pass against centered finite differences.
//!
//! The check projects the layer output onto a random direction `r`, so the
//! objective is the scalar `f(x, w) = <r, layer(x, w)>`. One backward pass
//! with delta `r` yields the analytic gradient of `f` with respect to every
//! input element and every parameter; the numeric gradient perturbs each of
//! those elements by `±eps` and re-evaluates.

use crate::{
    delta::DeltaSet,
    layer::Layer,
    list::{TensorArray, TensorList},
    node::Node,
    param::Parameter,
    unique_id::HasUniqueId,
    Error,
};
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
pub struct GradientCheck {
    /// Perturbation size of the centered difference.
    pub eps: f64,
    /// Largest acceptable error, relative to `max(1, |analytic| + |numeric|)`.
    pub tolerance: f64,
}

impl Default for GradientCheck {
    fn default() -> Self {
        Self {
            eps: 1e-5,
            tolerance: 1e-5,
        }
    }
}

/// The element with the largest disagreement.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientEntry {
    pub location: String,
    pub analytic: f64,
    pub numeric: f64,
}

#[derive(Debug, Clone)]
pub struct GradientReport {
    pub max_error: f64,
    pub tolerance: f64,
    /// Number of scalar gradient entries compared.
    pub checked: usize,
    pub worst: Option<GradientEntry>,
}

impl GradientReport {
    pub fn passed(&self) -> bool {
        self.max_error <= self.tolerance
    }

    fn record(&mut self, location: impl FnOnce() -> String, analytic: f64, numeric: f64) {
        self.checked += 1;
        let err = (analytic - numeric).abs() / (analytic.abs() + numeric.abs()).max(1.0);
        if err > self.max_error || self.worst.is_none() {
            self.max_error = self.max_error.max(err);
            self.worst = Some(GradientEntry {
                location: location(),
                analytic,
                numeric,
            });
        }
    }
}

impl GradientCheck {
    pub fn new(eps: f64, tolerance: f64) -> Self {
        Self { eps, tolerance }
    }

    /// Compares analytic and numeric gradients of `layer` evaluated on
    /// `inputs`, for every input element and, unless the layer is frozen,
    /// every element of [Layer::state].
    pub fn check(
        &self,
        layer: &dyn Layer,
        inputs: &[TensorArray],
    ) -> Result<GradientReport, Error> {
        let dev = inputs
            .first()
            .ok_or_else(|| Error::WrongNumInputs {
                layer: layer.name().to_string(),
                expected: 1,
                found: 0,
            })?
            .device()
            .clone();

        let (nodes, input_params): (Vec<Arc<Node>>, Vec<Vec<Parameter>>) =
            inputs.iter().map(|a| Node::variable(a.clone())).unzip();
        let output = layer.eval(&nodes)?;
        let out_dims = output.data().dimensions().to_vec();
        let probe_items = (0..output.data().len())
            .map(|_| dev.sample_uniform(&out_dims, -1.0, 1.0))
            .collect::<Result<Vec<_>, _>>()?;
        let probe = TensorArray::new(&dev, &out_dims, probe_items)?;

        let buffer = DeltaSet::new();
        output.accumulate(&buffer, probe.clone())?;
        drop(output);
        drop(nodes);

        let objective = |inputs: &[TensorArray]| -> Result<f64, Error> {
            let nodes: Vec<Arc<Node>> = inputs
                .iter()
                .map(|a| Node::constant(a.clone().shared()))
                .collect();
            let y = layer.eval(&nodes)?.data().to_array()?;
            let mut sum = 0.0;
            for (a, b) in y.items().iter().zip(probe.items()) {
                sum += a.dot(b)?;
            }
            Ok(sum)
        };
        let analytic_of = |p: &Parameter| -> Vec<f64> {
            match buffer.delta(p.id()) {
                Some(d) => d.values(),
                None => vec![0.0; p.len()],
            }
        };

        let mut report = GradientReport {
            max_error: 0.0,
            tolerance: self.tolerance,
            checked: 0,
            worst: None,
        };

        for (i, params) in input_params.iter().enumerate() {
            for (b, param) in params.iter().enumerate() {
                let analytic = analytic_of(param);
                for (e, &a) in analytic.iter().enumerate() {
                    let mut perturbed = inputs.to_vec();
                    perturbed[i] = perturb_item(&inputs[i], b, e, self.eps)?;
                    let plus = objective(&perturbed)?;
                    perturbed[i] = perturb_item(&inputs[i], b, e, -self.eps)?;
                    let minus = objective(&perturbed)?;
                    let numeric = (plus - minus) / (2.0 * self.eps);
                    report.record(|| format!("input {i} item {b} element {e}"), a, numeric);
                }
            }
        }

        if !layer.is_frozen() {
            for param in layer.state() {
                let analytic = analytic_of(&param);
                for (e, &a) in analytic.iter().enumerate() {
                    let original = param.value().as_slice()[e];
                    param.update(|t| {
                        t.as_mut_slice()[e] = original + self.eps;
                        Ok(())
                    })?;
                    let plus = objective(inputs);
                    param.update(|t| {
                        t.as_mut_slice()[e] = original - self.eps;
                        Ok(())
                    })?;
                    let minus = objective(inputs);
                    param.update(|t| {
                        t.as_mut_slice()[e] = original;
                        Ok(())
                    })?;
                    let numeric = (plus? - minus?) / (2.0 * self.eps);
                    report.record(
                        || format!("{}.{} element {e}", layer.name(), param.name()),
                        a,
                        numeric,
                    );
                }
            }
        }
        Ok(report)
    }
}

fn perturb_item(
    list: &TensorArray,
    item: usize,
    element: usize,
    eps: f64,
) -> Result<TensorArray, Error> {
    let mut items = list.items().to_vec();
    let mut t = items[item].try_copy()?;
    t.as_mut_slice()[element] += eps;
    items[item] = t;
    TensorArray::new(list.device(), list.dimensions(), items)
}
