//! Two-party computation on additively shared real-valued tensors.
//!
//! The two computing parties are called `rank_a` and `rank_b`. Values are shared by their owner,
//! combined locally where the operation is linear and multiplied with the help of correlated
//! randomness from a trusted [`dealer()`]. Only [`Mpc::reveal`] turns shares back into plaintext,
//! and only on the party it is revealed to.

use ndarray::Array2;
use tracing::{Level, instrument, trace};

use crate::{
    channel::{self, Channel, recv_from, send_to},
    federation::{self, Context},
};

pub mod dealer;
pub mod nn;
mod share;

pub use dealer::{Request, dealer};
pub use share::SharedTensor;

use dealer::Response;

/// Errors raised while computing on shared values.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A message could not be exchanged with the dealer.
    #[error(transparent)]
    Channel(#[from] channel::Error),
    /// A message could not be exchanged with the other computing party.
    #[error(transparent)]
    Federation(#[from] federation::Error),
    /// The operands of an operation do not fit together.
    #[error("shape mismatch in {op}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// The operation that failed.
        op: &'static str,
        /// The shape the operation expected.
        expected: (usize, usize),
        /// The shape the operation got.
        actual: (usize, usize),
    },
    /// The dealer refused a request or sent an unexpected response.
    #[error("dealer error: {0}")]
    Dealer(String),
    /// The party owning a value called an operation without providing it.
    #[error("the owner of {0} did not provide it")]
    MissingInput(&'static str),
}

/// The secure computation capability of one of the two computing parties.
#[derive(Debug)]
pub struct Mpc<'a, C: Channel> {
    ctx: Context<'a, C>,
    rank: usize,
    peer: usize,
    rank_a: usize,
    rank_b: usize,
    dealer: usize,
}

impl<C: Channel> Clone for Mpc<'_, C> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            rank: self.rank,
            peer: self.peer,
            rank_a: self.rank_a,
            rank_b: self.rank_b,
            dealer: self.dealer,
        }
    }
}

impl<'a, C: Channel> Mpc<'a, C> {
    /// Sets up secure computation between `rank_a` and `rank_b`, exchanging values within `ctx`.
    pub fn new(ctx: &Context<'a, C>, rank_a: usize, rank_b: usize) -> Result<Self, Error> {
        let rank = ctx.party();
        let peer = if rank == rank_a {
            rank_b
        } else if rank == rank_b {
            rank_a
        } else {
            return Err(federation::Error::UnknownParty(rank).into());
        };
        let dealer = ctx
            .parties()
            .dealer
            .ok_or(federation::Error::MissingRole("dealer"))?;
        Ok(Self {
            ctx: ctx.clone(),
            rank,
            peer,
            rank_a,
            rank_b,
            dealer,
        })
    }

    /// The same computing parties, exchanging values within `ctx`.
    pub fn with_ctx(&self, ctx: &Context<'a, C>) -> Self {
        Self {
            ctx: ctx.clone(),
            ..self.clone()
        }
    }

    /// The party index of this party.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// The party index of the first computing party.
    pub fn rank_a(&self) -> usize {
        self.rank_a
    }

    /// The party index of the second computing party.
    pub fn rank_b(&self) -> usize {
        self.rank_b
    }

    /// Calls `f` on `dst` and `g` on every other party.
    pub fn cond_call<T>(&self, f: impl FnOnce() -> T, g: impl FnOnce() -> T, dst: usize) -> T {
        if self.rank == dst { f() } else { g() }
    }

    /// Calls `f` on `dst` only.
    pub fn option_call<T>(&self, f: impl FnOnce() -> T, dst: usize) -> Option<T> {
        if self.rank == dst { Some(f()) } else { None }
    }

    /// Shares a value held by `owner`, who must pass `Some(value)`.
    ///
    /// The owner keeps `value - mask` and sends the random mask to the other party.
    pub async fn share(
        &self,
        owner: usize,
        value: Option<Array2<f64>>,
        key: &str,
    ) -> Result<SharedTensor, Error> {
        let peer = self.ctx.peer(self.peer);
        if self.rank == owner {
            let value = value.ok_or(Error::MissingInput("a shared value"))?;
            let (mask, rest) = share::split(&value);
            peer.put(key, &mask).await?;
            Ok(SharedTensor(rest))
        } else {
            Ok(SharedTensor(peer.get(key).await?))
        }
    }

    /// Reveals `x` to `dst` only, all other parties get `None`.
    pub async fn reveal(
        &self,
        x: &SharedTensor,
        dst: usize,
        key: &str,
    ) -> Result<Option<Array2<f64>>, Error> {
        let peer = self.ctx.peer(self.peer);
        if self.rank == dst {
            let other: Array2<f64> = peer.get(key).await?;
            if other.dim() != x.dim() {
                return Err(Error::ShapeMismatch {
                    op: "reveal",
                    expected: x.dim(),
                    actual: other.dim(),
                });
            }
            Ok(Some(other + &x.0))
        } else {
            peer.put(key, &x.0).await?;
            Ok(None)
        }
    }

    /// Multiplies a plaintext matrix held by `owner` with a shared tensor.
    ///
    /// The owner passes `Some(x)`, the other party `None`; both end up with a share of `x · w`.
    #[instrument(level = Level::TRACE, skip_all, fields(key = %key), err)]
    pub async fn matmul(
        &self,
        owner: usize,
        x: Option<&Array2<f64>>,
        w: &SharedTensor,
        key: &str,
    ) -> Result<SharedTensor, Error> {
        let ctx = self.ctx.sub(key);
        let peer = ctx.peer(self.peer);
        let width = w.dim().1;
        if self.rank == owner {
            let x = x.ok_or(Error::MissingInput("the matrix of a product"))?;
            let (rows, cols) = x.dim();
            if w.dim().0 != cols {
                return Err(Error::ShapeMismatch {
                    op: "matmul",
                    expected: (cols, width),
                    actual: w.dim(),
                });
            }
            peer.put("shape", &(rows, cols)).await?;
            let response = self.request(owner, rows, cols, width).await?;
            let Response::MatMulOwner { a, c } = response else {
                return Err(Error::Dealer("expected the owner's half of a product".into()));
            };
            let e = x - &a;
            peer.put("e", &e).await?;
            let f: Array2<f64> = peer.get("f").await?;
            trace!(rows, cols, "owner share of product");
            Ok(SharedTensor(x.dot(&w.0) + x.dot(&f) + c))
        } else {
            let (rows, cols): (usize, usize) = peer.get("shape").await?;
            if w.dim().0 != cols {
                return Err(Error::ShapeMismatch {
                    op: "matmul",
                    expected: (cols, width),
                    actual: w.dim(),
                });
            }
            let response = self.request(owner, rows, cols, width).await?;
            let Response::MatMulOther { b, c } = response else {
                return Err(Error::Dealer("expected the other half of a product".into()));
            };
            let f = &w.0 - &b;
            peer.put("f", &f).await?;
            let e: Array2<f64> = peer.get("e").await?;
            if e.dim() != (rows, cols) {
                return Err(Error::ShapeMismatch {
                    op: "matmul",
                    expected: (rows, cols),
                    actual: e.dim(),
                });
            }
            Ok(SharedTensor(e.dot(&b) + c))
        }
    }

    /// Shares of the sum of the squares of all elements of `x`, as a `1 × 1` tensor.
    pub async fn square_sum(&self, x: &SharedTensor, key: &str) -> Result<SharedTensor, Error> {
        let ctx = self.ctx.sub(key);
        let peer = ctx.peer(self.peer);
        let len = x.0.len();
        let response = self.send_request(Request::Square { len }).await?;
        let Response::Square { a, s } = response else {
            return Err(Error::Dealer("expected a square correlation".into()));
        };
        let x = x.0.to_shape((len, 1)).map_err(|_| Error::ShapeMismatch {
            op: "square_sum",
            expected: (len, 1),
            actual: x.dim(),
        })?;
        let e_own = &x - &a;
        peer.put("e", &e_own).await?;
        let e_other: Array2<f64> = peer.get("e").await?;
        if e_other.dim() != e_own.dim() {
            return Err(Error::ShapeMismatch {
                op: "square_sum",
                expected: e_own.dim(),
                actual: e_other.dim(),
            });
        }
        let e = e_own + e_other;
        let mut square = &e * &a * 2.0 + s;
        if self.rank == self.rank_a {
            square += &(&e * &e);
        }
        Ok(SharedTensor(Array2::from_elem((1, 1), square.sum())))
    }

    /// Tells the dealer that this party will not send any further requests.
    pub async fn finish(&self) -> Result<(), Error> {
        match self.send_request(Request::Done).await? {
            Response::Done => Ok(()),
            other => Err(Error::Dealer(format!("unexpected response {other:?}"))),
        }
    }

    async fn request(
        &self,
        owner: usize,
        rows: usize,
        cols: usize,
        width: usize,
    ) -> Result<Response, Error> {
        self.send_request(Request::MatMul {
            owner,
            rows,
            cols,
            width,
        })
        .await
    }

    async fn send_request(&self, request: Request) -> Result<Response, Error> {
        let channel = self.ctx.channel();
        send_to(channel, self.dealer, "dealer request", &request).await?;
        let response: Result<Response, String> =
            recv_from(channel, self.dealer, "dealer response").await?;
        response.map_err(Error::Dealer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{channel::SimpleChannel, federation::Parties};
    use ndarray::array;

    fn parties() -> Parties {
        Parties {
            guest: 1,
            hosts: vec![0],
            arbiter: None,
            dealer: Some(2),
        }
    }

    fn close(a: &Array2<f64>, b: &Array2<f64>) -> bool {
        a.dim() == b.dim() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-6)
    }

    #[tokio::test]
    async fn shared_products_and_squares() -> Result<(), Error> {
        let mut channels = SimpleChannel::channels(3);
        let dealer_channel = channels.pop().unwrap();
        let handle = tokio::spawn(async move { dealer(&dealer_channel, [0, 1]).await });
        let parties = parties();
        let x = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let w = array![[0.5], [-1.0]];

        let (a, b) = {
            let ctx_a = Context::new(&channels[0], &parties, 0)?;
            let ctx_b = Context::new(&channels[1], &parties, 1)?;
            let mpc_a = Mpc::new(&ctx_a, 0, 1)?;
            let mpc_b = Mpc::new(&ctx_b, 0, 1)?;
            let run_a = async {
                let w = mpc_a.share(1, None, "w").await?;
                let z = mpc_a.matmul(0, Some(&x), &w, "z").await?;
                let ss = mpc_a.square_sum(&z, "ss").await?;
                let z_plain = mpc_a.reveal(&z, 1, "z_plain").await?;
                let ss_plain = mpc_a.reveal(&ss, 0, "ss_plain").await?;
                mpc_a.finish().await?;
                Ok::<_, Error>((z_plain, ss_plain))
            };
            let run_b = async {
                let w = mpc_b.share(1, Some(w.clone()), "w").await?;
                let z = mpc_b.matmul(0, None, &w, "z").await?;
                let ss = mpc_b.square_sum(&z, "ss").await?;
                let z_plain = mpc_b.reveal(&z, 1, "z_plain").await?;
                let ss_plain = mpc_b.reveal(&ss, 0, "ss_plain").await?;
                mpc_b.finish().await?;
                Ok::<_, Error>((z_plain, ss_plain))
            };
            tokio::try_join!(run_a, run_b)?
        };
        handle.await.unwrap().unwrap();

        let expected = x.dot(&w);
        assert!(a.0.is_none());
        assert!(close(b.0.as_ref().unwrap(), &expected));
        let squares = expected.mapv(|v| v * v).sum();
        assert!(close(a.1.as_ref().unwrap(), &array![[squares]]));
        assert!(b.1.is_none());
        Ok(())
    }

    #[test]
    fn calls_depend_on_the_rank() {
        let channels = SimpleChannel::channels(3);
        let parties = parties();
        let ctx = Context::new(&channels[1], &parties, 1).unwrap();
        let mpc = Mpc::new(&ctx, 0, 1).unwrap();
        assert_eq!(mpc.cond_call(|| "b", || "a", 1), "b");
        assert_eq!(mpc.cond_call(|| "b", || "a", 0), "a");
        assert_eq!(mpc.option_call(|| 1, 0), None);
        assert_eq!(mpc.option_call(|| 1, 1), Some(1));
    }

    #[test]
    fn a_dealer_is_required() {
        let channels = SimpleChannel::channels(2);
        let parties = Parties {
            dealer: None,
            ..parties()
        };
        let ctx = Context::new(&channels[0], &parties, 0).unwrap();
        assert!(matches!(
            Mpc::new(&ctx, 0, 1),
            Err(Error::Federation(federation::Error::MissingRole("dealer")))
        ));
    }
}
