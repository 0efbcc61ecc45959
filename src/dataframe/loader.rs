//! Splits a frame into mini-batches that line up across the parties of a federation.
//!
//! In a hetero federation only the guest decides which samples form a batch. It sends the
//! sample ids of every batch to the hosts, which slice their own frames accordingly, so that batch
//! `i` refers to the same samples on every party. The arbiter holds no data and only learns how
//! many batches there are.

use ndarray::{Array1, Array2};
use rand::{SeedableRng, seq::SliceRandom};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use tracing::{Level, debug, instrument};

use super::DataFrame;
use crate::{
    channel::Channel,
    federation::{self, Context},
};

/// Errors raised while preparing batches.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The loader was configured with an unsupported or inconsistent setting.
    #[error("invalid loader config: {0}")]
    Config(String),
    /// Batch information could not be exchanged with another party.
    #[error(transparent)]
    Federation(#[from] federation::Error),
    /// The dataset could not be sliced into batches.
    #[error(transparent)]
    DataFrame(#[from] super::Error),
}

/// How the parties of a job share their samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FederationMode {
    /// A single party, nothing is exchanged.
    Local,
    /// Horizontally partitioned: every party holds its own samples with the same features.
    Homo,
    /// Vertically partitioned: every party holds other features of the same samples.
    Hetero,
}

/// The configuration of a [`DataLoader`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// How the parties share their samples.
    pub mode: FederationMode,
    /// The number of samples per batch, `None` for a single batch of all samples.
    pub batch_size: Option<usize>,
    /// Whether sample ids are shuffled before they are split into batches.
    pub shuffle: bool,
    /// How samples are split into batches, only `"full"` is supported.
    pub batch_strategy: String,
    /// The seed of the shuffle, a random one is drawn if not set.
    pub random_seed: Option<u64>,
    /// Whether the hosts of a hetero job reorder their rows to the guest's sample ids.
    ///
    /// Without it, a full batch is taken as is, so the frames must already list the same samples
    /// in the same order. Hosts always follow the guest's ids for smaller batches.
    pub need_align: bool,
    /// Whether the guest tells the arbiter how many batches there are (hetero mode).
    pub sync_arbiter: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            mode: FederationMode::Hetero,
            batch_size: None,
            shuffle: false,
            batch_strategy: "full".to_string(),
            random_seed: None,
            need_align: false,
            sync_arbiter: false,
        }
    }
}

/// What the guest of a homo federation tells the arbiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct BatchInfo {
    batch_size: usize,
    batch_num: usize,
}

/// A mini-batch of samples.
#[derive(Debug, Clone)]
pub struct Batch {
    /// The rows of the batch.
    pub frame: DataFrame,
    /// The feature values, `rows × features`.
    pub x: Array2<f64>,
    /// The label values, if the frame has a label.
    pub label: Option<Array1<f64>>,
    /// The sample weights, if the frame has weights.
    pub weight: Option<Array1<f64>>,
}

impl Batch {
    fn new(frame: DataFrame) -> Result<Self, super::Error> {
        Ok(Self {
            x: frame.values()?,
            label: frame.label()?,
            weight: frame.weight()?,
            frame,
        })
    }
}

/// A single training round as seen by one party.
#[derive(Debug, Clone, Copy)]
pub enum Round<'a> {
    /// The batch of a party holding data.
    Data(&'a Batch),
    /// The round of the arbiter, which holds no data.
    Placeholder {
        /// The position of the round.
        batch_id: usize,
    },
}

/// Provides the batches of one party, prepared once and replayed every epoch.
#[derive(Debug, Clone)]
pub struct DataLoader {
    inner: FullBatchDataLoader,
}

impl DataLoader {
    /// Prepares the batches, exchanging batch information with the other parties as needed.
    #[instrument(
        level = Level::DEBUG,
        skip_all,
        fields(role = %ctx.role(), mode = ?config.mode),
        err
    )]
    pub async fn new<C: Channel>(
        ctx: &Context<'_, C>,
        dataset: Option<DataFrame>,
        config: LoaderConfig,
    ) -> Result<Self, Error> {
        if config.batch_strategy != "full" {
            return Err(Error::Config(format!(
                "batch strategy {} is not supported",
                config.batch_strategy
            )));
        }
        if config.batch_size == Some(0) {
            return Err(Error::Config("batch size must be positive".into()));
        }
        let inner = FullBatchDataLoader::new(&ctx.sub("dataloader"), dataset, &config).await?;
        Ok(Self { inner })
    }

    /// The number of batches per epoch.
    pub fn batch_num(&self) -> usize {
        self.inner.batch_num
    }

    /// The number of samples per batch (the last batch may be smaller).
    pub fn batch_size(&self) -> usize {
        self.inner.batch_size
    }

    /// The batches of a party holding data, empty for the arbiter.
    pub fn batches(&self) -> impl Iterator<Item = &Batch> {
        self.inner.batches.iter()
    }

    /// One round per batch, placeholders for the arbiter.
    pub fn rounds(&self) -> impl Iterator<Item = Round<'_>> {
        let batches = &self.inner.batches;
        (0..self.inner.batch_num).map(move |batch_id| match batches.get(batch_id) {
            Some(batch) => Round::Data(batch),
            None => Round::Placeholder { batch_id },
        })
    }
}

#[derive(Debug, Clone)]
struct FullBatchDataLoader {
    batch_size: usize,
    batch_num: usize,
    batches: Vec<Batch>,
}

impl FullBatchDataLoader {
    async fn new<C: Channel>(
        ctx: &Context<'_, C>,
        dataset: Option<DataFrame>,
        config: &LoaderConfig,
    ) -> Result<Self, Error> {
        if config.mode != FederationMode::Local && ctx.is_on_arbiter() {
            let info = match config.mode {
                FederationMode::Homo => ctx.guest().get::<BatchInfo>("batch_info").await?,
                FederationMode::Hetero if config.sync_arbiter => {
                    let batch_num = ctx.guest().get::<usize>("batch_num").await?;
                    BatchInfo {
                        batch_size: 0,
                        batch_num,
                    }
                }
                _ => {
                    return Err(Error::Config(
                        "the arbiter of a hetero job needs sync_arbiter to learn the batch count"
                            .into(),
                    ));
                }
            };
            debug!(batch_num = info.batch_num, "arbiter received batch info");
            return Ok(Self {
                batch_size: info.batch_size,
                batch_num: info.batch_num,
                batches: vec![],
            });
        }

        let Some(dataset) = dataset else {
            return Err(Error::Config(format!("the {} needs a dataset", ctx.role())));
        };
        let n = dataset.len();
        if n == 0 {
            return Err(Error::Config("cannot load batches from an empty dataset".into()));
        }
        let batch_size = config.batch_size.map_or(n, |b| b.min(n));
        let batch_num = n.div_ceil(batch_size);

        match config.mode {
            FederationMode::Homo if ctx.is_on_guest() && ctx.parties().arbiter.is_some() => {
                let info = BatchInfo {
                    batch_size,
                    batch_num,
                };
                ctx.arbiter()?.put("batch_info", &info).await?;
            }
            FederationMode::Hetero if ctx.is_on_guest() && config.sync_arbiter => {
                ctx.arbiter()?.put("batch_num", &batch_num).await?;
            }
            _ => {}
        }

        let mut batches = Vec::with_capacity(batch_num);
        let align = config.mode == FederationMode::Hetero && config.need_align;
        if batch_size == n && !align {
            batches.push(Batch::new(dataset)?);
        } else if config.mode != FederationMode::Hetero || ctx.is_on_guest() {
            let ids = sample_order(&dataset, config);
            let send_to_hosts = config.mode == FederationMode::Hetero;
            for ((_, iter_ctx), chunk) in ctx.range(batch_num).zip(ids.chunks(batch_size)) {
                if send_to_hosts {
                    iter_ctx.hosts().put("batch_indexes", &chunk).await?;
                }
                batches.push(Batch::new(dataset.loc(chunk)?)?);
            }
        } else {
            for (_, iter_ctx) in ctx.range(batch_num) {
                let ids: Vec<String> = iter_ctx.guest().get("batch_indexes").await?;
                batches.push(Batch::new(dataset.loc(&ids)?)?);
            }
        }
        debug!(batch_size, batch_num, "prepared batches");
        Ok(Self {
            batch_size,
            batch_num,
            batches,
        })
    }
}

/// The sample ids in the order they are split into batches.
fn sample_order(dataset: &DataFrame, config: &LoaderConfig) -> Vec<String> {
    let mut ids = dataset.sample_ids();
    if config.shuffle {
        let mut rng = match config.random_seed {
            Some(seed) => ChaCha20Rng::seed_from_u64(seed),
            None => ChaCha20Rng::from_rng(&mut rand::rng()),
        };
        ids.shuffle(&mut rng);
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{channel::SimpleChannel, federation::Parties};
    use ndarray::Array;

    fn frame(rows: usize) -> DataFrame {
        let x = Array::from_shape_fn((rows, 2), |(i, j)| (i * 2 + j) as f64);
        DataFrame::builder((0..rows).map(|i| format!("s{i}")))
            .features(["x0", "x1"], &x)
            .label("y", &Array1::from_iter((0..rows).map(|i| i as f64)))
            .partitions(3)
            .build()
            .unwrap()
    }

    fn local() -> (Vec<SimpleChannel>, Parties) {
        let parties = Parties {
            guest: 0,
            hosts: vec![],
            arbiter: None,
            dealer: None,
        };
        (SimpleChannel::channels(1), parties)
    }

    #[tokio::test]
    async fn local_batches_cover_every_sample_once() -> Result<(), Error> {
        let (channels, parties) = local();
        let ctx = Context::new(&channels[0], &parties, 0)?;
        let config = LoaderConfig {
            mode: FederationMode::Local,
            batch_size: Some(4),
            shuffle: true,
            random_seed: Some(7),
            ..Default::default()
        };
        let loader = DataLoader::new(&ctx, Some(frame(10)), config).await?;
        assert_eq!(loader.batch_num(), 3);
        let sizes: Vec<usize> = loader.batches().map(|b| b.x.nrows()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        let mut ids: Vec<String> = loader
            .batches()
            .flat_map(|b| b.frame.sample_ids())
            .collect();
        ids.sort_by_key(|id| id[1..].parse::<usize>().unwrap());
        assert_eq!(ids, (0..10).map(|i| format!("s{i}")).collect::<Vec<_>>());
        for batch in loader.batches() {
            let label = batch.label.as_ref().unwrap();
            for (row, id) in batch.frame.sample_ids().iter().enumerate() {
                assert_eq!(label[row], id[1..].parse::<f64>().unwrap());
            }
        }
        Ok(())
    }

    #[tokio::test]
    async fn full_batch_keeps_the_frame() -> Result<(), Error> {
        let (channels, parties) = local();
        let ctx = Context::new(&channels[0], &parties, 0)?;
        let config = LoaderConfig {
            mode: FederationMode::Local,
            batch_size: Some(100),
            shuffle: true,
            ..Default::default()
        };
        let loader = DataLoader::new(&ctx, Some(frame(6)), config).await?;
        assert_eq!(loader.batch_num(), 1);
        assert_eq!(loader.batch_size(), 6);
        let batch = loader.batches().next().unwrap();
        assert_eq!(batch.frame.sample_ids(), frame(6).sample_ids());
        assert!(matches!(loader.rounds().next(), Some(Round::Data(_))));
        Ok(())
    }

    #[tokio::test]
    async fn invalid_configs_are_rejected() {
        let (channels, parties) = local();
        let ctx = Context::new(&channels[0], &parties, 0).unwrap();
        let config = LoaderConfig {
            batch_strategy: "random".into(),
            ..Default::default()
        };
        let err = DataLoader::new(&ctx, Some(frame(3)), config)
            .await
            .unwrap_err();
        let Error::Config(msg) = err else {
            panic!("expected a config error");
        };
        assert_eq!(msg, "batch strategy random is not supported");

        let config = LoaderConfig {
            batch_size: Some(0),
            ..Default::default()
        };
        let err = DataLoader::new(&ctx, Some(frame(3)), config)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = DataLoader::new(&ctx, None, LoaderConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn seeded_shuffles_are_reproducible() {
        let df = frame(20);
        let config = LoaderConfig {
            shuffle: true,
            random_seed: Some(42),
            ..Default::default()
        };
        let a = sample_order(&df, &config);
        let b = sample_order(&df, &config);
        assert_eq!(a, b);
        assert_ne!(a, df.sample_ids());
    }
}
