//! Early stopping criteria.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Which quantity decides that training has converged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarlyStop {
    /// The loss changed by less than the tolerance since the last check.
    Diff,
    /// The loss is at most the tolerance.
    Abs,
    /// The weights moved by less than the tolerance (L2 norm) since the last epoch.
    WeightDiff,
}

impl EarlyStop {
    /// Whether the criterion is evaluated on the loss.
    pub fn is_loss_based(self) -> bool {
        matches!(self, EarlyStop::Diff | EarlyStop::Abs)
    }
}

/// The state of an early stopping criterion.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergeFunc {
    early_stop: EarlyStop,
    eps: f64,
    pre_loss: Option<f64>,
    pre_weight: Option<Array1<f64>>,
}

impl ConvergeFunc {
    /// A criterion of the given kind with tolerance `eps`.
    pub fn new(early_stop: EarlyStop, eps: f64) -> Self {
        Self {
            early_stop,
            eps,
            pre_loss: None,
            pre_weight: None,
        }
    }

    /// The kind of the criterion.
    pub fn early_stop(&self) -> EarlyStop {
        self.early_stop
    }

    /// Checks a loss based criterion against the latest loss.
    ///
    /// `Diff` never converges on the first loss it sees. Weight based criteria always return
    /// `false` here, see [`ConvergeFunc::compute_weight_diff`].
    pub fn is_converge(&mut self, loss: f64) -> bool {
        match self.early_stop {
            EarlyStop::Diff => {
                let converged = self
                    .pre_loss
                    .is_some_and(|pre_loss| (pre_loss - loss).abs() < self.eps);
                self.pre_loss = Some(loss);
                converged
            }
            EarlyStop::Abs => loss <= self.eps,
            EarlyStop::WeightDiff => false,
        }
    }

    /// The L2 norm of a weight delta.
    pub fn compute_weight_diff(&self, delta: &Array1<f64>) -> f64 {
        delta.dot(delta).sqrt()
    }

    /// Remembers the weights the next delta is computed against.
    pub fn set_pre_weight(&mut self, weight: Array1<f64>) {
        self.pre_weight = Some(weight);
    }

    /// The norm of the change from the remembered weights to `weight`, remembering `weight`.
    ///
    /// Without remembered weights the full norm of `weight` is returned.
    pub fn advance_weight(&mut self, weight: Array1<f64>) -> f64 {
        let delta = match &self.pre_weight {
            Some(pre) => &weight - pre,
            None => weight.clone(),
        };
        let diff = self.compute_weight_diff(&delta);
        self.set_pre_weight(weight);
        diff
    }

    /// The tolerance.
    pub fn eps(&self) -> f64 {
        self.eps
    }
}
