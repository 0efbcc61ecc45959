//! Secure layers of a vertically split linear regression.
//!
//! `rank_a` holds the features `X_a` and `rank_b` the features `X_b` plus the label. The weights
//! `wa` (for `X_a`) and `wb` (for `X_b`) are shared between both ranks for the whole training, so
//! neither rank ever sees the other's weights or the joint prediction in the clear.

use ndarray::{Array1, Array2, Axis};
use tracing::{Level, instrument};

use super::{Error, Mpc, SharedTensor};
use crate::channel::Channel;

/// The shared weights of a linear model `z = X_a · wa + X_b · wb`.
#[derive(Debug, Clone)]
pub struct SsheLinearRegressionLayer {
    wa: SharedTensor,
    wb: SharedTensor,
    input: Option<Array2<f64>>,
}

/// The shared gradients of both weight vectors.
#[derive(Debug, Clone)]
pub struct Gradients {
    /// The gradient of `wa`.
    pub ga: SharedTensor,
    /// The gradient of `wb`.
    pub gb: SharedTensor,
}

impl SsheLinearRegressionLayer {
    /// Shares the initial weights, `wa_init` must be given on `rank_a` and `wb_init` on `rank_b`.
    pub async fn new<C: Channel>(
        mpc: &Mpc<'_, C>,
        wa_init: Option<Array1<f64>>,
        wb_init: Option<Array1<f64>>,
    ) -> Result<Self, Error> {
        let wa = mpc
            .share(mpc.rank_a(), wa_init.map(|w| w.insert_axis(Axis(1))), "wa")
            .await?;
        let wb = mpc
            .share(mpc.rank_b(), wb_init.map(|w| w.insert_axis(Axis(1))), "wb")
            .await?;
        Ok(Self {
            wa,
            wb,
            input: None,
        })
    }

    /// The shared weights of `rank_a`'s features.
    pub fn wa(&self) -> &SharedTensor {
        &self.wa
    }

    /// The shared weights of `rank_b`'s features.
    pub fn wb(&self) -> &SharedTensor {
        &self.wb
    }

    /// Computes shares of `X_a · wa + X_b · wb`, where `x` are this party's own features.
    #[instrument(level = Level::DEBUG, skip_all, err)]
    pub async fn forward<C: Channel>(
        &mut self,
        mpc: &Mpc<'_, C>,
        x: &Array2<f64>,
    ) -> Result<SharedTensor, Error> {
        let (rank_a, rank_b) = (mpc.rank_a(), mpc.rank_b());
        let za = mpc
            .matmul(rank_a, mpc.option_call(|| x, rank_a), &self.wa, "forward_a")
            .await?;
        let zb = mpc
            .matmul(rank_b, mpc.option_call(|| x, rank_b), &self.wb, "forward_b")
            .await?;
        self.input = Some(x.clone());
        Ok(&za + &zb)
    }

    /// Computes shares of the gradients `X_aᵀ · dz / n` and `X_bᵀ · dz / n`.
    #[instrument(level = Level::DEBUG, skip_all, err)]
    pub async fn backward<C: Channel>(
        &self,
        mpc: &Mpc<'_, C>,
        dz: &SharedTensor,
    ) -> Result<Gradients, Error> {
        let x = self
            .input
            .as_ref()
            .ok_or(Error::MissingInput("the input of the forward pass"))?;
        let n = dz.dim().0;
        if x.nrows() != n {
            return Err(Error::ShapeMismatch {
                op: "backward",
                expected: (x.nrows(), 1),
                actual: dz.dim(),
            });
        }
        let xt = x.t().to_owned() / n as f64;
        let (rank_a, rank_b) = (mpc.rank_a(), mpc.rank_b());
        let ga = mpc
            .matmul(rank_a, mpc.option_call(|| &xt, rank_a), dz, "backward_a")
            .await?;
        let gb = mpc
            .matmul(rank_b, mpc.option_call(|| &xt, rank_b), dz, "backward_b")
            .await?;
        Ok(Gradients { ga, gb })
    }
}

/// The mean squared error of a linear regression.
#[derive(Debug, Clone, Copy, Default)]
pub struct SsheLinearRegressionLossLayer;

/// The shared residual of a batch, from which its loss and gradient follow.
#[derive(Debug, Clone)]
pub struct Loss {
    dz: SharedTensor,
    n: usize,
}

impl SsheLinearRegressionLossLayer {
    /// Computes shares of `dz = z - y`, where `y` is given on `rank_b` only.
    pub fn forward<C: Channel>(
        &self,
        mpc: &Mpc<'_, C>,
        z: &SharedTensor,
        y: Option<&Array1<f64>>,
    ) -> Result<Loss, Error> {
        let n = z.dim().0;
        let dz = if mpc.rank() == mpc.rank_b() {
            let y = y.ok_or(Error::MissingInput("the label"))?;
            if y.len() != n {
                return Err(Error::ShapeMismatch {
                    op: "loss",
                    expected: (n, 1),
                    actual: (y.len(), 1),
                });
            }
            SharedTensor(&z.0 - &y.view().insert_axis(Axis(1)))
        } else {
            z.clone()
        };
        Ok(Loss { dz, n })
    }
}

impl Loss {
    /// Reveals the loss `0.5 · mean(dz²)` to `dst`, all other parties get `None`.
    pub async fn get<C: Channel>(
        &self,
        mpc: &Mpc<'_, C>,
        dst: usize,
    ) -> Result<Option<f64>, Error> {
        let squares = mpc.square_sum(&self.dz, "loss_squares").await?;
        let half_mean = squares.scale(0.5 / self.n as f64);
        let loss = mpc.reveal(&half_mean, dst, "loss").await?;
        Ok(loss.map(|l| l.sum()))
    }

    /// The shared residual `dz`, the gradient of the loss with respect to `z` (times `n`).
    pub fn grad(&self) -> &SharedTensor {
        &self.dz
    }
}

/// Plain stochastic gradient descent on shared weights.
#[derive(Debug, Clone, Copy)]
pub struct SsheOptimizerSgd {
    /// The learning rate.
    pub lr: f64,
}

impl SsheOptimizerSgd {
    /// Updates both weight vectors by `-lr · gradient`, a purely local operation.
    pub fn step(&self, layer: &mut SsheLinearRegressionLayer, grads: &Gradients) {
        layer.wa.sub_scaled(self.lr, &grads.ga);
        layer.wb.sub_scaled(self.lr, &grads.gb);
    }
}
