//! Additive shares of real-valued tensors.

use std::ops::{Add, Sub};

use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Masks are drawn uniformly from `-MASK_RANGE..MASK_RANGE`.
pub(crate) const MASK_RANGE: f64 = 256.0;

/// One party's additive share of a tensor.
///
/// The plaintext tensor is the sum of the shares of both parties. A single share reveals nothing
/// about the plaintext as long as the other share stays with the other party.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedTensor(pub(crate) Array2<f64>);

impl SharedTensor {
    /// The shape of the tensor.
    pub fn dim(&self) -> (usize, usize) {
        self.0.dim()
    }

    /// Multiplies the tensor with a public constant.
    pub fn scale(&self, factor: f64) -> SharedTensor {
        SharedTensor(&self.0 * factor)
    }

    /// Subtracts `factor * other` in place.
    pub fn sub_scaled(&mut self, factor: f64, other: &SharedTensor) {
        self.0.scaled_add(-factor, &other.0);
    }
}

impl Add for &SharedTensor {
    type Output = SharedTensor;

    fn add(self, rhs: Self) -> SharedTensor {
        SharedTensor(&self.0 + &rhs.0)
    }
}

impl Sub for &SharedTensor {
    type Output = SharedTensor;

    fn sub(self, rhs: Self) -> SharedTensor {
        SharedTensor(&self.0 - &rhs.0)
    }
}

/// A random tensor used to mask a value before it leaves a party.
pub(crate) fn random_mask(shape: (usize, usize)) -> Array2<f64> {
    let mut rng = rand::rng();
    Array2::from_shape_simple_fn(shape, || rng.random_range(-MASK_RANGE..MASK_RANGE))
}

/// Splits `value` into two random shares summing up to it.
pub(crate) fn split(value: &Array2<f64>) -> (Array2<f64>, Array2<f64>) {
    let mask = random_mask(value.dim());
    let rest = value - &mask;
    (mask, rest)
}
