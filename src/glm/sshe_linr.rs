//! Linear regression between a guest (holding the label) and a single host, with the weights
//! secret-shared between both parties for the whole training.
//!
//! Only the final weights are revealed, and each party only learns the weights of its own
//! features. Predictions are combined on the guest from the partial predictions of every party.

use ndarray::{Array1, Axis};
use serde::{Deserialize, Serialize};
use tracing::{Level, debug, info, instrument};

use super::{
    ConvergeFunc, EarlyStop, Error, InitParam,
    param::{ModelParam, deserialize_param, serialize_param},
    predict::{PREDICT_SCORE, compute_predict_details},
};
use crate::{
    channel::Channel,
    dataframe::{
        self, DataFrame, Item, Scalar,
        loader::{DataLoader, FederationMode, LoaderConfig},
    },
    federation::{self, Context},
    mpc::{
        self, Mpc,
        nn::{SsheLinearRegressionLayer, SsheLinearRegressionLossLayer, SsheOptimizerSgd},
    },
};

/// The name of the constant column the guest adds when fitting an intercept.
pub const INTERCEPT: &str = "intercept";

/// The hyperparameters of [`SsheLinearRegression`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SsheLinRParams {
    /// The maximum number of passes over the training data.
    pub epochs: usize,
    /// The number of samples per batch, `None` for full batches.
    pub batch_size: Option<usize>,
    /// The tolerance of the early stopping criterion.
    pub tol: f64,
    /// The early stopping criterion, `None` to always train for `epochs` epochs.
    pub early_stop: Option<EarlyStop>,
    /// The learning rate of the SGD optimizer.
    pub learning_rate: f64,
    /// The initialisation of the weights.
    pub init_param: InitParam,
    /// Revealing the weights after every epoch is not supported and must be `false`.
    pub reveal_every_epoch: bool,
    /// The loss is revealed to the guest every `reveal_loss_freq` epochs.
    pub reveal_loss_freq: usize,
}

impl Default for SsheLinRParams {
    fn default() -> Self {
        Self {
            epochs: 20,
            batch_size: None,
            tol: 1e-4,
            early_stop: Some(EarlyStop::Diff),
            learning_rate: 0.5,
            init_param: InitParam::default(),
            reveal_every_epoch: false,
            reveal_loss_freq: 1,
        }
    }
}

impl SsheLinRParams {
    fn validate(&self) -> Result<(), Error> {
        if self.reveal_every_epoch {
            return Err(Error::Config(
                "reveal_every_epoch is currently not supported in SSHE LinR".into(),
            ));
        }
        if self.reveal_loss_freq == 0 {
            return Err(Error::Config("reveal_loss_freq must be positive".into()));
        }
        if self.batch_size == Some(0) {
            return Err(Error::Config("batch_size must be positive".into()));
        }
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return Err(Error::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

/// A persisted [`SsheLinearRegression`], holding one party's half of the weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// The fitted state.
    pub data: ModelData,
    /// The hyperparameters the model was fitted with.
    pub meta: SsheLinRParams,
}

/// The fitted state of a [`Model`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelData {
    /// The fitted estimator.
    pub estimator: EstimatorModel,
}

/// The fitted state of a [`SsheLrEstimator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorModel {
    /// The weights of this party's features.
    pub param: ModelParam,
    /// The epoch training stopped at.
    pub end_epoch: usize,
    /// Whether training stopped early.
    pub is_converged: bool,
    /// Whether the weights include an intercept.
    pub fit_intercept: bool,
    /// The feature columns the weights belong to.
    pub header: Vec<String>,
    /// The learning rate the model was fitted with.
    pub lr: f64,
}

impl Model {
    /// Serializes the model.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        bincode::serialize(self).map_err(|e| Error::Serde(format!("{e:?}")))
    }

    /// Deserializes a model serialized with [`Model::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        bincode::deserialize(bytes).map_err(|e| Error::Serde(format!("{e:?}")))
    }
}

/// Secret-shared linear regression, run by the guest and a single host.
#[derive(Debug, Clone)]
pub struct SsheLinearRegression {
    params: SsheLinRParams,
    estimator: Option<SsheLrEstimator>,
}

impl SsheLinearRegression {
    /// A model that still has to be fitted.
    pub fn new(params: SsheLinRParams) -> Result<Self, Error> {
        params.validate()?;
        Ok(Self {
            params,
            estimator: None,
        })
    }

    /// The hyperparameters of the model.
    pub fn params(&self) -> &SsheLinRParams {
        &self.params
    }

    /// The fitted estimator, if any.
    pub fn estimator(&self) -> Option<&SsheLrEstimator> {
        self.estimator.as_ref()
    }

    /// Changes the batch size of the next fit.
    pub fn set_batch_size(&mut self, batch_size: Option<usize>) {
        self.params.batch_size = batch_size;
        if let Some(estimator) = &mut self.estimator {
            estimator.batch_size = batch_size;
        }
    }

    /// Changes the number of epochs of the next fit.
    pub fn set_epochs(&mut self, epochs: usize) {
        self.params.epochs = epochs;
        if let Some(estimator) = &mut self.estimator {
            estimator.epochs = epochs;
        }
    }

    /// Fits the model on this party's training data.
    ///
    /// A model that was fitted (or restored) before continues from its weights.
    #[instrument(level = Level::DEBUG, skip_all, fields(role = %ctx.role()), err)]
    pub async fn fit<C: Channel>(
        &mut self,
        ctx: &Context<'_, C>,
        train: &DataFrame,
    ) -> Result<(), Error> {
        let hosts = ctx.hosts().len();
        if hosts != 1 {
            return Err(Error::Config(format!(
                "SSHE LinR only supports the single-host case, got {hosts} hosts"
            )));
        }
        if ctx.is_on_arbiter() {
            return Err(Error::Config(
                "SSHE LinR runs between the guest and the host only".into(),
            ));
        }
        if ctx.is_on_host() {
            self.params.init_param.fit_intercept = false;
        }
        let mut estimator = match &self.estimator {
            None => SsheLrEstimator::new(&self.params),
            Some(estimator) => {
                info!("estimator is not none, will train with warm start");
                let mut estimator = estimator.clone();
                estimator.epochs = self.params.epochs;
                estimator.batch_size = self.params.batch_size;
                estimator
            }
        };
        estimator.fit_single_model(ctx, train.clone()).await?;
        self.estimator = Some(estimator);
        Ok(())
    }

    /// Predicts the label of the test samples.
    ///
    /// The guest returns the prediction frame, the host only contributes its partial prediction
    /// and returns `None`.
    pub async fn predict<C: Channel>(
        &self,
        ctx: &Context<'_, C>,
        test: &DataFrame,
    ) -> Result<Option<DataFrame>, Error> {
        let estimator = self.estimator.as_ref().ok_or(Error::NotFitted)?;
        estimator.predict(ctx, test).await
    }

    /// The fitted model of this party.
    pub fn get_model(&self) -> Result<Model, Error> {
        let estimator = self.estimator.as_ref().ok_or(Error::NotFitted)?;
        Ok(Model {
            data: ModelData {
                estimator: estimator.get_model()?,
            },
            meta: self.params.clone(),
        })
    }

    /// Restores a model returned by [`SsheLinearRegression::get_model`].
    pub fn from_model(model: &Model) -> Result<Self, Error> {
        let mut linr = Self::new(model.meta.clone())?;
        let mut estimator = SsheLrEstimator::new(&model.meta);
        estimator.restore(&model.data.estimator);
        linr.params.init_param.fit_intercept = model.data.estimator.fit_intercept;
        linr.estimator = Some(estimator);
        Ok(linr)
    }
}

/// The training state of one party.
#[derive(Debug, Clone)]
pub struct SsheLrEstimator {
    epochs: usize,
    batch_size: Option<usize>,
    lr: f64,
    init_param: InitParam,
    reveal_loss_freq: usize,
    early_stop: Option<EarlyStop>,
    tol: f64,
    w: Option<Array1<f64>>,
    end_epoch: usize,
    is_converged: bool,
    header: Vec<String>,
}

impl SsheLrEstimator {
    fn new(params: &SsheLinRParams) -> Self {
        Self {
            epochs: params.epochs,
            batch_size: params.batch_size,
            lr: params.learning_rate,
            init_param: params.init_param.clone(),
            reveal_loss_freq: params.reveal_loss_freq,
            early_stop: params.early_stop,
            tol: params.tol,
            w: None,
            end_epoch: 0,
            is_converged: false,
            header: vec![],
        }
    }

    /// The revealed weights of this party's features, intercept last.
    pub fn weights(&self) -> Option<&Array1<f64>> {
        self.w.as_ref()
    }

    /// The epoch training stopped at.
    pub fn end_epoch(&self) -> usize {
        self.end_epoch
    }

    /// Whether the last fit stopped early.
    pub fn is_converged(&self) -> bool {
        self.is_converged
    }

    /// The feature columns of the training data.
    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// Runs the secure training protocol with the other party and reveals this party's weights.
    pub async fn fit_single_model<C: Channel>(
        &mut self,
        ctx: &Context<'_, C>,
        mut train: DataFrame,
    ) -> Result<(), Error> {
        self.header = train.columns();
        let parties = ctx.parties();
        let rank_a = *parties
            .hosts
            .first()
            .ok_or(federation::Error::MissingRole("host"))?;
        let rank_b = parties.guest;
        self.is_converged = false;

        if self.init_param.fit_intercept {
            train.set(&[INTERCEPT], Item::Scalar(Scalar::Float64(1.0)))?;
        }
        let train_n = train.len();
        let features = train.columns().len();
        let w_init = match &self.w {
            Some(w) if w.len() == features => w.clone(),
            Some(w) => {
                return Err(dataframe::Error::Shape(format!(
                    "warm start weights have {} elements for {features} features",
                    w.len()
                ))
                .into());
            }
            None => self.init_param.initialize(features),
        };

        let mpc = Mpc::new(&ctx.sub("init"), rank_a, rank_b)?;
        let mut layer = SsheLinearRegressionLayer::new(
            &mpc,
            mpc.option_call(|| w_init.clone(), rank_a),
            mpc.option_call(|| w_init.clone(), rank_b),
        )
        .await?;
        let loss_fn = SsheLinearRegressionLossLayer;
        let optimizer = SsheOptimizerSgd { lr: self.lr };

        let config = LoaderConfig {
            mode: FederationMode::Hetero,
            batch_size: self.batch_size,
            ..Default::default()
        };
        let loader = DataLoader::new(ctx, Some(train), config).await?;

        let mut converge_func = self.early_stop.map(|e| ConvergeFunc::new(e, self.tol));
        if let Some(f) = weight_diff(&mut converge_func) {
            let pre_mpc = mpc.with_ctx(&ctx.sub("pre_weight"));
            f.set_pre_weight(reveal_own(&pre_mpc, &layer).await?);
        }

        for (i, epoch_ctx) in ctx.range(self.epochs) {
            info!(epoch = i, "enter epoch");
            let reveal_loss = i % self.reveal_loss_freq == 0;
            let mut epoch_loss: Option<f64> = None;
            for (batch_ctx, batch) in epoch_ctx.zip(loader.batches()) {
                let mpc = mpc.with_ctx(&batch_ctx);
                let y = mpc.cond_call(|| batch.label.as_ref(), || None, rank_b);
                let z = layer.forward(&mpc, &batch.x).await?;
                let loss = loss_fn.forward(&mpc, &z, y)?;
                if reveal_loss
                    && let Some(batch_loss) = loss.get(&mpc, rank_b).await?
                {
                    *epoch_loss.get_or_insert(0.0) += batch_loss * batch.x.nrows() as f64;
                }
                let grads = layer.backward(&mpc, loss.grad()).await?;
                optimizer.step(&mut layer, &grads);
            }
            if let Some(loss) = epoch_loss.as_mut() {
                *loss /= train_n as f64;
                info!(epoch = i, loss = *loss, "linr_loss");
            }

            let epoch_mpc = mpc.with_ctx(&epoch_ctx);
            if ctx.is_on_guest() {
                match converge_func.as_mut() {
                    Some(f) if !f.early_stop().is_loss_based() => {
                        let wb_p_delta = f.advance_weight(reveal_own(&epoch_mpc, &layer).await?);
                        let wa_p_delta: Vec<f64> = epoch_ctx.hosts().get("wa_p_delta").await?;
                        let w_diff = wb_p_delta + wa_p_delta.iter().sum::<f64>();
                        debug!(epoch = i, w_diff, "weight diff");
                        if w_diff < f.eps() {
                            self.is_converged = true;
                        }
                    }
                    Some(f) => {
                        if let Some(loss) = epoch_loss {
                            self.is_converged = f.is_converge(loss);
                        }
                    }
                    None => {}
                }
                let converged = self.is_converged;
                epoch_ctx.hosts().put("converge_flag", &converged).await?;
            } else {
                if let Some(f) = weight_diff(&mut converge_func) {
                    let wa_p_delta = f.advance_weight(reveal_own(&epoch_mpc, &layer).await?);
                    epoch_ctx.guest().put("wa_p_delta", &wa_p_delta).await?;
                }
                self.is_converged = epoch_ctx.guest().get("converge_flag").await?;
            }
            if self.is_converged {
                info!(epoch = i, "converged");
                self.end_epoch = i;
                break;
            }
        }
        if !self.is_converged {
            self.end_epoch = self.epochs;
        }

        let final_mpc = mpc.with_ctx(&ctx.sub("final"));
        self.w = Some(reveal_own(&final_mpc, &layer).await?);
        final_mpc.finish().await?;
        Ok(())
    }

    /// Predicts with this party's weights, combining all partial predictions on the guest.
    pub async fn predict<C: Channel>(
        &self,
        ctx: &Context<'_, C>,
        test: &DataFrame,
    ) -> Result<Option<DataFrame>, Error> {
        let w = self.w.as_ref().ok_or(Error::NotFitted)?;
        if ctx.is_on_guest() {
            let mut data = test.clone();
            if self.init_param.fit_intercept {
                data.set(&[INTERCEPT], Item::Scalar(Scalar::Float64(1.0)))?;
            }
            let mut pred = partial_prediction(&data, w)?;
            for h_pred in ctx.hosts().get_vec::<f64>("h_pred", pred.len()).await? {
                pred += &Array1::from(h_pred);
            }
            let mut builder = DataFrame::builder(test.sample_ids()).partitions(test.partitions());
            if let (Some(name), Some(label)) = (test.manager().label_name(), test.label()?) {
                builder = builder.label(name, &label);
            }
            let mut pred_df = builder.build()?;
            pred_df.set(&[PREDICT_SCORE], Item::Tensor(pred.insert_axis(Axis(1))))?;
            compute_predict_details(&mut pred_df)?;
            Ok(Some(pred_df))
        } else if ctx.is_on_host() {
            let output = partial_prediction(test, w)?;
            ctx.guest().put("h_pred", &output.to_vec()).await?;
            Ok(None)
        } else {
            Err(Error::Config("the arbiter takes no part in predictions".into()))
        }
    }

    fn get_model(&self) -> Result<EstimatorModel, Error> {
        let w = self.w.as_ref().ok_or(Error::NotFitted)?;
        Ok(EstimatorModel {
            param: serialize_param(w, self.init_param.fit_intercept),
            end_epoch: self.end_epoch,
            is_converged: self.is_converged,
            fit_intercept: self.init_param.fit_intercept,
            header: self.header.clone(),
            lr: self.lr,
        })
    }

    fn restore(&mut self, model: &EstimatorModel) {
        self.w = Some(deserialize_param(&model.param, model.fit_intercept));
        self.end_epoch = model.end_epoch;
        self.is_converged = model.is_converged;
        self.header = model.header.clone();
        self.init_param.fit_intercept = model.fit_intercept;
        self.lr = model.lr;
    }
}

fn weight_diff(converge_func: &mut Option<ConvergeFunc>) -> Option<&mut ConvergeFunc> {
    converge_func
        .as_mut()
        .filter(|f| !f.early_stop().is_loss_based())
}

/// Reveals `wa` to `rank_a` and `wb` to `rank_b`, returning this party's own weights.
async fn reveal_own<C: Channel>(
    mpc: &Mpc<'_, C>,
    layer: &SsheLinearRegressionLayer,
) -> Result<Array1<f64>, Error> {
    let wa = mpc.reveal(layer.wa(), mpc.rank_a(), "wa").await?;
    let wb = mpc.reveal(layer.wb(), mpc.rank_b(), "wb").await?;
    let w = wa
        .or(wb)
        .ok_or(mpc::Error::MissingInput("a revealed weight"))?;
    Ok(w.column(0).to_owned())
}

fn partial_prediction(data: &DataFrame, w: &Array1<f64>) -> Result<Array1<f64>, Error> {
    let x = data.values()?;
    if x.ncols() != w.len() {
        return Err(dataframe::Error::Shape(format!(
            "the model has {} weights for {} features",
            w.len(),
            x.ncols()
        ))
        .into());
    }
    Ok(x.dot(w))
}
