//! Federation roles and the rendezvous [`Context`] through which parties exchange named values.
//!
//! Every party runs the same sequence of rounds. A value `put` by one party under a key is
//! matched by exactly one `get` of the same key on the receiving party. Keys are namespaced by
//! the sub-context they are exchanged in (e.g. `iter-2.batch-0.converge_flag`), so a party that
//! runs ahead or behind its peer fails with a key mismatch instead of reading the wrong value.

use std::fmt;

use futures::future::try_join_all;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::channel::{self, Channel, ErrorKind, recv_from, send_to};

/// The role a party plays in the federation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Holds the labels (and its own feature columns).
    Guest,
    /// Holds additional feature columns for the same samples.
    Host,
    /// Coordinates rounds without holding any data.
    Arbiter,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Guest => f.write_str("guest"),
            Role::Host => f.write_str("host"),
            Role::Arbiter => f.write_str("arbiter"),
        }
    }
}

/// Maps federation roles to party indices of the underlying [`Channel`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parties {
    /// The party index of the guest.
    pub guest: usize,
    /// The party indices of all hosts.
    pub hosts: Vec<usize>,
    /// The party index of the arbiter, if the federation has one.
    #[serde(default)]
    pub arbiter: Option<usize>,
    /// The party index of the trusted dealer providing correlated randomness, if any.
    #[serde(default)]
    pub dealer: Option<usize>,
}

impl Parties {
    /// Returns the role of the given party index, `None` for the dealer or unknown indices.
    pub fn role_of(&self, party: usize) -> Option<Role> {
        if party == self.guest {
            Some(Role::Guest)
        } else if self.hosts.contains(&party) {
            Some(Role::Host)
        } else if self.arbiter == Some(party) {
            Some(Role::Arbiter)
        } else {
            None
        }
    }
}

/// Errors raised while exchanging values between federation roles.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The party index does not belong to the guest, a host or the arbiter.
    #[error("party {0} has no role in this federation")]
    UnknownParty(usize),
    /// The federation has no party for the requested role.
    #[error("no {0} is configured for this federation")]
    MissingRole(&'static str),
    /// A value could not be sent or received.
    #[error(transparent)]
    Channel(#[from] channel::Error),
}

/// The per-party view of a federated job, scoped to a (nested) namespace of rounds.
pub struct Context<'a, C: Channel> {
    channel: &'a C,
    parties: &'a Parties,
    party: usize,
    role: Role,
    namespace: String,
}

impl<C: Channel> Clone for Context<'_, C> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel,
            parties: self.parties,
            party: self.party,
            role: self.role,
            namespace: self.namespace.clone(),
        }
    }
}

impl<C: Channel> fmt::Debug for Context<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("party", &self.party)
            .field("role", &self.role)
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl<'a, C: Channel> Context<'a, C> {
    /// Creates the root context for the party with the given index.
    pub fn new(channel: &'a C, parties: &'a Parties, party: usize) -> Result<Self, Error> {
        let role = parties.role_of(party).ok_or(Error::UnknownParty(party))?;
        Ok(Self {
            channel,
            parties,
            party,
            role,
            namespace: String::new(),
        })
    }

    /// The role of this party.
    pub fn role(&self) -> Role {
        self.role
    }

    /// The channel index of this party.
    pub fn party(&self) -> usize {
        self.party
    }

    /// All parties of the federation.
    pub fn parties(&self) -> &'a Parties {
        self.parties
    }

    /// The namespace values are currently exchanged in.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub(crate) fn channel(&self) -> &'a C {
        self.channel
    }

    /// Whether this party is the guest.
    pub fn is_on_guest(&self) -> bool {
        self.role == Role::Guest
    }

    /// Whether this party is a host.
    pub fn is_on_host(&self) -> bool {
        self.role == Role::Host
    }

    /// Whether this party is the arbiter.
    pub fn is_on_arbiter(&self) -> bool {
        self.role == Role::Arbiter
    }

    /// Returns a child context whose keys are prefixed with `name`.
    pub fn sub(&self, name: impl fmt::Display) -> Self {
        let namespace = if self.namespace.is_empty() {
            name.to_string()
        } else {
            format!("{}.{name}", self.namespace)
        };
        Self {
            namespace,
            ..self.clone()
        }
    }

    /// Yields one child context per round `0..n`.
    pub fn range(&self, n: usize) -> impl Iterator<Item = (usize, Self)> {
        (0..n).map(|i| (i, self.sub(format_args!("iter-{i}"))))
    }

    /// Pairs every item with its own child context, one per batch.
    pub fn zip<I: IntoIterator>(&self, items: I) -> impl Iterator<Item = (Self, I::Item)> {
        items
            .into_iter()
            .enumerate()
            .map(|(i, item)| (self.sub(format_args!("batch-{i}")), item))
    }

    /// The guest as a peer.
    pub fn guest(&self) -> Peer<'_, 'a, C> {
        Peer {
            ctx: self,
            party: self.parties.guest,
        }
    }

    /// All hosts as a group of peers.
    pub fn hosts(&self) -> Peers<'_, 'a, C> {
        Peers {
            ctx: self,
            parties: self.parties.hosts.clone(),
        }
    }

    /// The arbiter as a peer.
    pub fn arbiter(&self) -> Result<Peer<'_, 'a, C>, Error> {
        let party = self.parties.arbiter.ok_or(Error::MissingRole("arbiter"))?;
        Ok(Peer { ctx: self, party })
    }

    /// Any party of the channel as a peer.
    pub fn peer(&self, party: usize) -> Peer<'_, 'a, C> {
        Peer { ctx: self, party }
    }

    fn key(&self, key: &str) -> String {
        if self.namespace.is_empty() {
            key.to_string()
        } else {
            format!("{}.{key}", self.namespace)
        }
    }

    async fn put<T: Serialize + Sync>(
        &self,
        party: usize,
        key: &str,
        value: &T,
    ) -> Result<(), Error> {
        let key = self.key(key);
        send_to(self.channel, party, &key, &(&key, value)).await?;
        Ok(())
    }

    async fn get<T: DeserializeOwned>(&self, party: usize, key: &str) -> Result<T, Error> {
        let key = self.key(key);
        let (actual, value): (String, T) = recv_from(self.channel, party, &key).await?;
        if actual != key {
            return Err(channel::Error {
                phase: key.clone(),
                reason: ErrorKind::KeyMismatch {
                    expected: key,
                    actual,
                },
            }
            .into());
        }
        Ok(value)
    }

    async fn get_vec<T: DeserializeOwned>(
        &self,
        party: usize,
        key: &str,
        len: usize,
    ) -> Result<Vec<T>, Error> {
        let values: Vec<T> = self.get(party, key).await?;
        if values.len() != len {
            return Err(channel::Error {
                phase: self.key(key),
                reason: ErrorKind::InvalidLength {
                    expected: len,
                    actual: values.len(),
                },
            }
            .into());
        }
        Ok(values)
    }
}

/// A single party that values can be put to or received from.
#[derive(Debug)]
pub struct Peer<'c, 'a, C: Channel> {
    ctx: &'c Context<'a, C>,
    party: usize,
}

impl<C: Channel> Peer<'_, '_, C> {
    /// The channel index of the peer.
    pub fn party(&self) -> usize {
        self.party
    }

    /// Sends `value` to the peer under `key`.
    pub async fn put<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), Error> {
        self.ctx.put(self.party, key, value).await
    }

    /// Waits for the value the peer sent under `key`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, Error> {
        self.ctx.get(self.party, key).await
    }
}

/// A group of parties sharing the same role.
#[derive(Debug)]
pub struct Peers<'c, 'a, C: Channel> {
    ctx: &'c Context<'a, C>,
    parties: Vec<usize>,
}

impl<C: Channel> Peers<'_, '_, C> {
    /// The number of peers in the group.
    pub fn len(&self) -> usize {
        self.parties.len()
    }

    /// Whether the group is empty.
    pub fn is_empty(&self) -> bool {
        self.parties.is_empty()
    }

    /// Sends `value` to every peer of the group under `key`.
    pub async fn put<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), Error> {
        try_join_all(self.parties.iter().map(|&p| self.ctx.put(p, key, value))).await?;
        Ok(())
    }

    /// Waits for the value every peer sent under `key`, in party order.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>, Error> {
        try_join_all(self.parties.iter().map(|&p| self.ctx.get(p, key))).await
    }

    /// Like [`Peers::get`], but every peer must send exactly `len` elements.
    pub async fn get_vec<T: DeserializeOwned>(
        &self,
        key: &str,
        len: usize,
    ) -> Result<Vec<Vec<T>>, Error> {
        try_join_all(self.parties.iter().map(|&p| self.ctx.get_vec(p, key, len))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::SimpleChannel;

    fn parties() -> Parties {
        Parties {
            guest: 0,
            hosts: vec![1],
            arbiter: Some(2),
            dealer: None,
        }
    }

    #[test]
    fn roles_are_resolved_from_party_indices() {
        let parties = parties();
        assert_eq!(parties.role_of(0), Some(Role::Guest));
        assert_eq!(parties.role_of(1), Some(Role::Host));
        assert_eq!(parties.role_of(2), Some(Role::Arbiter));
        assert_eq!(parties.role_of(3), None);
    }

    #[test]
    fn sub_contexts_nest_namespaces() {
        let channels = SimpleChannel::channels(3);
        let parties = parties();
        let ctx = Context::new(&channels[0], &parties, 0).unwrap();
        let names: Vec<String> = ctx
            .sub("fit")
            .range(2)
            .map(|(_, c)| c.namespace().to_string())
            .collect();
        assert_eq!(names, vec!["fit.iter-0", "fit.iter-1"]);
        let (batch_ctx, item) = ctx.zip(["a"]).next().unwrap();
        assert_eq!(batch_ctx.namespace(), "batch-0");
        assert_eq!(item, "a");
    }

    #[tokio::test]
    async fn put_and_get_between_roles() -> Result<(), Error> {
        let channels = SimpleChannel::channels(3);
        let parties = parties();
        let guest = Context::new(&channels[0], &parties, 0)?;
        let host = Context::new(&channels[1], &parties, 1)?;
        let arbiter = Context::new(&channels[2], &parties, 2)?;

        guest.hosts().put("flag", &true).await?;
        guest.arbiter()?.put("batch_num", &5_usize).await?;
        assert!(host.guest().get::<bool>("flag").await?);
        assert_eq!(arbiter.guest().get::<usize>("batch_num").await?, 5);

        host.guest().put("h_pred", &vec![1.5_f64]).await?;
        let preds: Vec<Vec<f64>> = guest.hosts().get("h_pred").await?;
        assert_eq!(preds, vec![vec![1.5]]);

        host.guest().put("h_pred", &vec![1.5_f64, 2.5]).await?;
        let err = guest.hosts().get_vec::<f64>("h_pred", 3).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Channel(channel::Error {
                reason: ErrorKind::InvalidLength {
                    expected: 3,
                    actual: 2
                },
                ..
            })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn out_of_sync_rounds_are_detected() {
        let channels = SimpleChannel::channels(2);
        let parties = Parties {
            guest: 0,
            hosts: vec![1],
            arbiter: None,
            dealer: None,
        };
        let guest = Context::new(&channels[0], &parties, 0).unwrap();
        let host = Context::new(&channels[1], &parties, 1).unwrap();

        let (guest_iter, host_iter) = (guest.sub("iter-1"), host.sub("iter-0"));
        guest_iter.hosts().put("flag", &true).await.unwrap();
        let err = host_iter.guest().get::<bool>("flag").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Channel(channel::Error {
                reason: ErrorKind::KeyMismatch { .. },
                ..
            })
        ));
        assert!(matches!(guest.arbiter(), Err(Error::MissingRole("arbiter"))));
    }
}
