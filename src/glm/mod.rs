//! Generalized linear models trained across the parties of a federation.

pub mod convergence;
pub mod param;
pub mod predict;
pub mod sshe_linr;

pub use convergence::{ConvergeFunc, EarlyStop};
pub use param::{InitMethod, InitParam};
pub use sshe_linr::{Model, SsheLinRParams, SsheLinearRegression, SsheLrEstimator};

use crate::{dataframe, federation, mpc};

/// Errors raised while fitting or applying a model.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The model or the federation is configured in an unsupported way.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The model has to be fitted (or restored) first.
    #[error("the model has not been fitted")]
    NotFitted,
    /// The training or test data is unusable.
    #[error(transparent)]
    DataFrame(#[from] dataframe::Error),
    /// The training data could not be split into batches.
    #[error(transparent)]
    Loader(#[from] dataframe::loader::Error),
    /// A secure computation failed.
    #[error(transparent)]
    Mpc(#[from] mpc::Error),
    /// A value could not be exchanged with another party.
    #[error(transparent)]
    Federation(#[from] federation::Error),
    /// A model could not be (de-)serialized.
    #[error("could not (de-)serialize the model: {0}")]
    Serde(String),
}
