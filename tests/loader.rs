use std::collections::HashSet;

use sshe_glm::{
    channel::SimpleChannel,
    dataframe::{
        self, DataFrame,
        loader::{DataLoader, Error, FederationMode, LoaderConfig, Round},
    },
    federation::{Context, Parties},
};

mod common;
use common::{GUEST, HOST, synthetic};

const ARBITER: usize = 2;

fn with_arbiter() -> Parties {
    Parties {
        guest: GUEST,
        hosts: vec![HOST],
        arbiter: Some(ARBITER),
        dealer: None,
    }
}

async fn load(
    channel: SimpleChannel,
    parties: Parties,
    party: usize,
    frame: Option<DataFrame>,
    config: LoaderConfig,
) -> Result<DataLoader, Error> {
    let ctx = Context::new(&channel, &parties, party)?;
    DataLoader::new(&ctx, frame, config).await
}

#[tokio::test]
async fn hetero_batches_line_up_across_parties() -> Result<(), Error> {
    let data = synthetic(53, 3, 2, 1);
    let config = LoaderConfig {
        batch_size: Some(10),
        shuffle: true,
        random_seed: Some(5),
        ..Default::default()
    };
    let mut channels = SimpleChannel::channels(2);
    let host_channel = channels.pop().unwrap();
    let guest_channel = channels.pop().unwrap();
    let host = tokio::spawn(load(
        host_channel,
        common::parties(),
        HOST,
        Some(data.host),
        config.clone(),
    ));
    let parties = common::parties();
    let guest = load(guest_channel, parties, GUEST, Some(data.guest), config).await?;
    let host = host.await.unwrap()?;

    assert_eq!(guest.batch_num(), 6);
    assert_eq!(host.batch_num(), 6);
    let mut seen = HashSet::new();
    for (g, h) in guest.batches().zip(host.batches()) {
        let ids = g.frame.sample_ids();
        assert_eq!(ids, h.frame.sample_ids());
        assert_eq!(g.x.ncols(), 3);
        assert_eq!(h.x.ncols(), 2);
        assert_eq!(g.x.nrows(), h.x.nrows());
        assert!(g.label.is_some());
        assert!(h.label.is_none());
        for id in ids {
            assert!(seen.insert(id), "a sample is in two batches");
        }
    }
    assert_eq!(seen.len(), 53);
    let sizes: Vec<usize> = guest.batches().map(|b| b.x.nrows()).collect();
    assert_eq!(sizes, vec![10, 10, 10, 10, 10, 3]);
    Ok(())
}

#[tokio::test]
async fn hetero_arbiter_only_learns_the_batch_count() -> Result<(), Error> {
    let data = synthetic(30, 2, 2, 2);
    let config = LoaderConfig {
        batch_size: Some(8),
        sync_arbiter: true,
        ..Default::default()
    };
    let mut channels = SimpleChannel::channels(3);
    let arbiter_channel = channels.pop().unwrap();
    let host_channel = channels.pop().unwrap();
    let guest_channel = channels.pop().unwrap();
    let arbiter = tokio::spawn(load(
        arbiter_channel,
        with_arbiter(),
        ARBITER,
        None,
        config.clone(),
    ));
    let host = tokio::spawn(load(
        host_channel,
        with_arbiter(),
        HOST,
        Some(data.host),
        config.clone(),
    ));
    let parties = with_arbiter();
    let guest = load(guest_channel, parties, GUEST, Some(data.guest), config).await?;
    let host = host.await.unwrap()?;
    let arbiter = arbiter.await.unwrap()?;

    assert_eq!(guest.batch_num(), 4);
    assert_eq!(host.batch_num(), 4);
    assert_eq!(arbiter.batch_num(), 4);
    assert_eq!(arbiter.batches().count(), 0);
    let rounds: Vec<Round<'_>> = arbiter.rounds().collect();
    assert_eq!(rounds.len(), 4);
    for (i, round) in rounds.into_iter().enumerate() {
        assert!(matches!(round, Round::Placeholder { batch_id } if batch_id == i));
    }
    assert!(guest.rounds().all(|round| matches!(round, Round::Data(_))));
    Ok(())
}

#[tokio::test]
async fn homo_arbiter_receives_the_batch_info() -> Result<(), Error> {
    let data = synthetic(25, 2, 2, 3);
    let config = LoaderConfig {
        mode: FederationMode::Homo,
        batch_size: Some(10),
        ..Default::default()
    };
    let mut channels = SimpleChannel::channels(3);
    let arbiter_channel = channels.pop().unwrap();
    channels.pop();
    let guest_channel = channels.pop().unwrap();
    let arbiter = tokio::spawn(load(
        arbiter_channel,
        with_arbiter(),
        ARBITER,
        None,
        config.clone(),
    ));
    let parties = with_arbiter();
    let guest = load(guest_channel, parties, GUEST, Some(data.guest), config).await?;
    let arbiter = arbiter.await.unwrap()?;

    assert_eq!(guest.batch_num(), 3);
    assert_eq!(arbiter.batch_num(), 3);
    assert_eq!(arbiter.batch_size(), 10);
    Ok(())
}

#[tokio::test]
async fn hetero_arbiter_without_sync_is_rejected() {
    let channels = SimpleChannel::channels(3);
    let parties = with_arbiter();
    let ctx = Context::new(&channels[ARBITER], &parties, ARBITER).unwrap();
    let err = DataLoader::new(&ctx, None, LoaderConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

async fn load_pair(
    guest_frame: DataFrame,
    host_frame: DataFrame,
    config: LoaderConfig,
) -> (Result<DataLoader, Error>, Result<DataLoader, Error>) {
    let mut channels = SimpleChannel::channels(2);
    let host_channel = channels.pop().unwrap();
    let guest_channel = channels.pop().unwrap();
    let host = tokio::spawn(load(
        host_channel,
        common::parties(),
        HOST,
        Some(host_frame),
        config.clone(),
    ));
    let parties = common::parties();
    let guest = load(guest_channel, parties, GUEST, Some(guest_frame), config).await;
    (guest, host.await.unwrap())
}

#[tokio::test]
async fn aligned_full_batch_follows_the_guest_order() -> Result<(), Error> {
    let data = synthetic(12, 2, 2, 7);
    let reversed: Vec<String> = data.host.sample_ids().into_iter().rev().collect();
    let host_frame = data.host.loc(&reversed)?;

    let config = LoaderConfig {
        need_align: true,
        ..Default::default()
    };
    let (guest, host) = load_pair(data.guest.clone(), host_frame.clone(), config).await;
    let (guest, host) = (guest?, host?);
    assert_eq!(host.batch_num(), 1);
    let g = guest.batches().next().unwrap();
    let h = host.batches().next().unwrap();
    assert_eq!(h.frame.sample_ids(), g.frame.sample_ids());
    assert_eq!(h.x, data.x_host);

    let (guest, host) = load_pair(data.guest, host_frame, LoaderConfig::default()).await;
    let (guest, host) = (guest?, host?);
    let g = guest.batches().next().unwrap();
    let h = host.batches().next().unwrap();
    assert_eq!(h.frame.sample_ids(), reversed);
    assert_ne!(h.frame.sample_ids(), g.frame.sample_ids());
    Ok(())
}

#[tokio::test]
async fn aligning_a_host_without_a_guest_sample_fails() -> Result<(), Error> {
    let data = synthetic(8, 2, 2, 8);
    let ids = data.host.sample_ids();
    let host_frame = data.host.loc(&ids[1..])?;
    let config = LoaderConfig {
        need_align: true,
        ..Default::default()
    };
    let (guest, host) = load_pair(data.guest, host_frame, config).await;
    assert_eq!(guest?.batch_num(), 1);
    let err = host.unwrap_err();
    assert!(matches!(
        err,
        Error::DataFrame(dataframe::Error::MissingSampleId(id)) if id == "id0"
    ));
    Ok(())
}
