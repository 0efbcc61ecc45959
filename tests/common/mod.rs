#![allow(dead_code)]

use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sshe_glm::{
    channel::SimpleChannel,
    dataframe::DataFrame,
    federation::{Context, Parties},
    glm::{Error, Model, SsheLinRParams, SsheLinearRegression},
    mpc::dealer,
};
use tokio::task::JoinHandle;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

pub const GUEST: usize = 0;
pub const HOST: usize = 1;
pub const DEALER: usize = 2;

pub fn init_tracing() -> DefaultGuard {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .set_default()
}

pub fn parties() -> Parties {
    Parties {
        guest: GUEST,
        hosts: vec![HOST],
        arbiter: None,
        dealer: Some(DEALER),
    }
}

/// The same samples split into the guest's and the host's frames.
pub struct Split {
    pub guest: DataFrame,
    pub host: DataFrame,
    pub x_guest: Array2<f64>,
    pub x_host: Array2<f64>,
    pub y: Array1<f64>,
}

/// `y = x_guest · w_guest + x_host · w_host + 0.5` with a little noise.
pub fn synthetic(n: usize, guest_features: usize, host_features: usize, seed: u64) -> Split {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let mut uniform = |shape| Array2::from_shape_simple_fn(shape, || rng.random_range(-1.0..1.0));
    let x_guest = uniform((n, guest_features));
    let x_host = uniform((n, host_features));
    let w_guest = Array1::linspace(0.5, 1.5, guest_features);
    let w_host = Array1::linspace(-1.0, 0.0, host_features);
    let noise = uniform((n, 1)).column(0).to_owned() * 0.01;
    let y = x_guest.dot(&w_guest) + x_host.dot(&w_host) + 0.5 + noise;

    let ids: Vec<String> = (0..n).map(|i| format!("id{i}")).collect();
    let guest_header: Vec<String> = (0..guest_features).map(|i| format!("g{i}")).collect();
    let host_header: Vec<String> = (0..host_features).map(|i| format!("h{i}")).collect();
    let guest = DataFrame::builder(ids.clone())
        .features(guest_header, &x_guest)
        .label("y", &y)
        .partitions(4)
        .build()
        .unwrap();
    let host = DataFrame::builder(ids)
        .features(host_header, &x_host)
        .partitions(3)
        .build()
        .unwrap();
    Split {
        guest,
        host,
        x_guest,
        x_host,
        y,
    }
}

/// Spawns the trusted dealer on its own channel.
pub fn spawn_dealer(channel: SimpleChannel) -> JoinHandle<Result<usize, dealer::Error>> {
    tokio::spawn(async move { dealer(&channel, [HOST, GUEST]).await })
}

/// Fits a model on both parties, returning the guest's and the host's model.
pub async fn fit_both(
    params: SsheLinRParams,
    guest: DataFrame,
    host: DataFrame,
) -> Result<(SsheLinearRegression, SsheLinearRegression), Error> {
    let (guest, host, _) = fit_counting(params, guest, host).await?;
    Ok((guest, host))
}

/// Like [`fit_both`], also returning how many correlations the dealer served.
pub async fn fit_counting(
    params: SsheLinRParams,
    guest: DataFrame,
    host: DataFrame,
) -> Result<(SsheLinearRegression, SsheLinearRegression, usize), Error> {
    let mut channels = SimpleChannel::channels(3);
    let dealer = spawn_dealer(channels.pop().unwrap());
    let host_channel = channels.pop().unwrap();
    let guest_channel = channels.pop().unwrap();

    let guest_params = params.clone();
    let guest_task = tokio::spawn(async move {
        let parties = parties();
        let ctx = Context::new(&guest_channel, &parties, GUEST)?;
        let mut linr = SsheLinearRegression::new(guest_params)?;
        linr.fit(&ctx, &guest).await?;
        Ok::<_, Error>(linr)
    });
    let host_task = tokio::spawn(async move {
        let parties = parties();
        let ctx = Context::new(&host_channel, &parties, HOST)?;
        let mut linr = SsheLinearRegression::new(params)?;
        linr.fit(&ctx, &host).await?;
        Ok::<_, Error>(linr)
    });
    let guest = guest_task.await.unwrap()?;
    let host = host_task.await.unwrap()?;
    let served = dealer.await.unwrap().unwrap();
    Ok((guest, host, served))
}

/// Restores both models and predicts on both parties, returning the guest's prediction frame.
pub async fn predict_both(
    guest_model: Model,
    host_model: Model,
    guest: DataFrame,
    host: DataFrame,
) -> Result<DataFrame, Error> {
    let mut channels = SimpleChannel::channels(2);
    let host_channel = channels.pop().unwrap();
    let guest_channel = channels.pop().unwrap();

    let guest_task = tokio::spawn(async move {
        let parties = parties();
        let ctx = Context::new(&guest_channel, &parties, GUEST)?;
        let linr = SsheLinearRegression::from_model(&guest_model)?;
        linr.predict(&ctx, &guest).await
    });
    let host_task = tokio::spawn(async move {
        let parties = parties();
        let ctx = Context::new(&host_channel, &parties, HOST)?;
        let linr = SsheLinearRegression::from_model(&host_model)?;
        linr.predict(&ctx, &host).await
    });
    let prediction = guest_task.await.unwrap()?;
    assert!(host_task.await.unwrap()?.is_none());
    Ok(prediction.expect("the guest receives the prediction"))
}
