//! A trusted dealer providing the correlated randomness that secure multiplications consume.
//!
//! Both computing parties send the same [`Request`] for every multiplication they are about to
//! run. The dealer answers each of them with their half of a random correlation, without ever
//! seeing any of the values being multiplied.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{Level, debug, instrument};

use super::share::{random_mask, split};
use crate::channel::{self, Channel, recv_from, send_to};

/// Errors that can occur while running the dealer.
#[derive(Debug)]
pub enum Error {
    /// The two parties asked for different correlations.
    RequestMismatch(Request, Request),
    /// A matrix product was requested for a party that is not one of the computing parties.
    UnknownOwner(usize),
    /// An error occurred while trying to communicate over the channel.
    Channel(channel::Error),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::RequestMismatch(a, b) => write!(f, "Parties requested {a:?} vs {b:?}"),
            Error::UnknownOwner(p) => write!(f, "Party {p} is not a computing party"),
            Error::Channel(e) => write!(f, "Channel error: {e}"),
        }
    }
}

impl From<channel::Error> for Error {
    fn from(e: channel::Error) -> Self {
        Error::Channel(e)
    }
}

/// The correlation a party needs for its next secure operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Beaver-style randomness for a `rows × cols` matrix held by `owner` times a shared
    /// `cols × width` tensor.
    MatMul {
        /// The party holding the plaintext matrix.
        owner: usize,
        /// The rows of the plaintext matrix.
        rows: usize,
        /// The columns of the plaintext matrix.
        cols: usize,
        /// The columns of the shared tensor.
        width: usize,
    },
    /// A shared random vector `a` of length `len` together with shares of `a ∘ a`.
    Square {
        /// The number of elements.
        len: usize,
    },
    /// No further requests will be sent.
    Done,
}

/// The dealer's answer to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum Response {
    /// The owner's half: a random mask `a` and a share of `a · b`.
    MatMulOwner { a: Array2<f64>, c: Array2<f64> },
    /// The other party's half: a random mask `b` and a share of `a · b`.
    MatMulOther { b: Array2<f64>, c: Array2<f64> },
    /// A share of the random vector `a` and a share of `a ∘ a`.
    Square { a: Array2<f64>, s: Array2<f64> },
    /// Acknowledges [`Request::Done`].
    Done,
}

/// Runs the trusted dealer for the two computing parties until both of them are done.
///
/// Returns the number of correlations served.
#[instrument(level = Level::DEBUG, skip_all, err)]
pub async fn dealer(channel: &impl Channel, parties: [usize; 2]) -> Result<usize, Error> {
    let mut served = 0;
    loop {
        let a: Request = recv_from(channel, parties[0], "dealer request").await?;
        let b: Request = recv_from(channel, parties[1], "dealer request").await?;
        if a != b {
            return Err(abort(channel, parties, Error::RequestMismatch(a, b)).await);
        }
        let responses = match a {
            Request::Done => [Response::Done, Response::Done],
            Request::MatMul {
                owner,
                rows,
                cols,
                width,
            } => {
                let Some(owner_pos) = parties.iter().position(|&p| p == owner) else {
                    return Err(abort(channel, parties, Error::UnknownOwner(owner)).await);
                };
                let (owner_half, other_half) = matmul_correlation(rows, cols, width);
                if owner_pos == 0 {
                    [owner_half, other_half]
                } else {
                    [other_half, owner_half]
                }
            }
            Request::Square { len } => square_correlation(len),
        };
        for (p, response) in parties.into_iter().zip(responses) {
            send_to(channel, p, "dealer response", &Ok::<_, String>(response)).await?;
        }
        if a == Request::Done {
            debug!(served, "dealer done");
            return Ok(served);
        }
        served += 1;
    }
}

/// Tells both parties that the dealer gives up, returning `e` or the error of telling them.
async fn abort(channel: &impl Channel, parties: [usize; 2], e: Error) -> Error {
    let msg: Result<Response, String> = Err(format!("{e}"));
    for p in parties {
        if let Err(send_error) = send_to(channel, p, "dealer response", &msg).await {
            return send_error.into();
        }
    }
    e
}

fn matmul_correlation(rows: usize, cols: usize, width: usize) -> (Response, Response) {
    let a = random_mask((rows, cols));
    let b = random_mask((cols, width));
    let (c0, c1) = split(&a.dot(&b));
    (
        Response::MatMulOwner { a, c: c0 },
        Response::MatMulOther { b, c: c1 },
    )
}

fn square_correlation(len: usize) -> [Response; 2] {
    let a = random_mask((len, 1));
    let (a0, a1) = split(&a);
    let (s0, s1) = split(&(&a * &a));
    [
        Response::Square { a: a0, s: s0 },
        Response::Square { a: a1, s: s1 },
    ]
}
