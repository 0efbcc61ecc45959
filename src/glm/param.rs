//! Weight initialisation and the persisted form of fitted weights.

use ndarray::{Array1, s};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

/// How initial weights are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitMethod {
    /// All weights are `0`.
    Zeros,
    /// All weights are `1`.
    Ones,
    /// All weights are `fill_val`.
    Consts,
    /// Weights are drawn uniformly from `[0, 1)`.
    Random,
}

/// The initialisation of a model's weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitParam {
    /// How initial weights are chosen.
    pub method: InitMethod,
    /// The value of every weight for [`InitMethod::Consts`].
    pub fill_val: f64,
    /// Whether the model has an intercept (stored as the last weight).
    pub fit_intercept: bool,
    /// The seed for [`InitMethod::Random`], a random one is drawn if not set.
    pub random_state: Option<u64>,
}

impl Default for InitParam {
    fn default() -> Self {
        Self {
            method: InitMethod::Zeros,
            fill_val: 0.0,
            fit_intercept: true,
            random_state: None,
        }
    }
}

impl InitParam {
    /// Initial weights for `d` features.
    pub fn initialize(&self, d: usize) -> Array1<f64> {
        match self.method {
            InitMethod::Zeros => Array1::zeros(d),
            InitMethod::Ones => Array1::ones(d),
            InitMethod::Consts => Array1::from_elem(d, self.fill_val),
            InitMethod::Random => {
                let mut rng = match self.random_state {
                    Some(seed) => ChaCha20Rng::seed_from_u64(seed),
                    None => ChaCha20Rng::from_rng(&mut rand::rng()),
                };
                Array1::from_shape_simple_fn(d, || rng.random::<f64>())
            }
        }
    }
}

/// Fitted weights, with the intercept split off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParam {
    /// One weight per feature column.
    pub coef: Vec<f64>,
    /// The intercept, `0` if the model has none.
    pub intercept: f64,
}

/// Splits a weight vector into coefficients and (if `fit_intercept`) its last element.
pub fn serialize_param(w: &Array1<f64>, fit_intercept: bool) -> ModelParam {
    match w.len().checked_sub(1) {
        Some(last) if fit_intercept => ModelParam {
            coef: w.slice(s![..last]).to_vec(),
            intercept: w[last],
        },
        _ => ModelParam {
            coef: w.to_vec(),
            intercept: 0.0,
        },
    }
}

/// Joins coefficients and intercept back into a weight vector.
pub fn deserialize_param(param: &ModelParam, fit_intercept: bool) -> Array1<f64> {
    let mut w = param.coef.clone();
    if fit_intercept {
        w.push(param.intercept);
    }
    Array1::from(w)
}
