//! A communication channel used to send/receive messages to/from another party.

use std::{fmt, future::Future, time::Duration};

use serde::{Serialize, de::DeserializeOwned};
use tokio::{
    sync::{
        Mutex,
        mpsc::{Receiver, Sender, channel},
    },
    time::timeout,
};
use tracing::trace;

/// Errors related to sending / receiving / (de-)serializing messages.
#[derive(Debug, thiserror::Error)]
#[error("channel error during '{phase}': {reason}")]
pub struct Error {
    /// The protocol phase during which the error occurred.
    pub phase: String,
    /// The specific error that was raised.
    pub reason: ErrorKind,
}

/// The specific error that occurred when trying to send / receive a message.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// The (serialized) message could not be received over the channel.
    #[error("could not receive message: {0}")]
    RecvError(String),
    /// The (serialized) message could not be sent over the channel.
    #[error("could not send message: {0}")]
    SendError(String),
    /// The message could not be (de-)serialized.
    #[error("could not (de-)serialize message: {0}")]
    SerdeError(String),
    /// The message is a Vec, but not of the expected length.
    #[error("expected {expected} elements, received {actual}")]
    InvalidLength {
        /// The number of elements the receiver expected.
        expected: usize,
        /// The number of elements that were received.
        actual: usize,
    },
    /// The peer sent a value under a different key than the one this party is waiting for.
    ///
    /// Both parties advance through the same rounds, so this means they are out of sync.
    #[error("expected a message for '{expected}', received one for '{actual}'")]
    KeyMismatch {
        /// The key this party asked for.
        expected: String,
        /// The key attached to the received message.
        actual: String,
    },
}

/// A communication channel used to send/receive messages to/from another party.
pub trait Channel {
    /// The error that can occur sending messages over the channel.
    type SendError: fmt::Debug;
    /// The error that can occur receiving messages over the channel.
    type RecvError: fmt::Debug;

    /// Sends a message to the party with the given index (must be between `0..participants`).
    fn send_bytes_to(
        &self,
        party: usize,
        msg: Vec<u8>,
    ) -> impl Future<Output = Result<(), Self::SendError>> + Send;

    /// Awaits a response from the party with the given index (must be between `0..participants`).
    fn recv_bytes_from(
        &self,
        party: usize,
    ) -> impl Future<Output = Result<Vec<u8>, Self::RecvError>> + Send;
}

/// Serializes and sends a message to the other party.
pub(crate) async fn send_to<S: Serialize + ?Sized>(
    channel: &impl Channel,
    party: usize,
    phase: &str,
    msg: &S,
) -> Result<(), Error> {
    let msg = bincode::serialize(msg).map_err(|e| Error {
        phase: format!("sending {phase}"),
        reason: ErrorKind::SerdeError(format!("{e:?}")),
    })?;
    channel.send_bytes_to(party, msg).await.map_err(|e| Error {
        phase: phase.to_string(),
        reason: ErrorKind::SendError(format!("{e:?}")),
    })
}

/// Receives and deserializes a message from the other party.
pub(crate) async fn recv_from<T: DeserializeOwned>(
    channel: &impl Channel,
    party: usize,
    phase: &str,
) -> Result<T, Error> {
    let msg = channel.recv_bytes_from(party).await.map_err(|e| Error {
        phase: phase.to_string(),
        reason: ErrorKind::RecvError(format!("{e:?}")),
    })?;
    bincode::deserialize(&msg).map_err(|e| Error {
        phase: format!("receiving {phase}"),
        reason: ErrorKind::SerdeError(format!("{e:?}")),
    })
}

/// A simple in-memory channel using tokio's [`Sender`] and [`Receiver`].
#[derive(Debug)]
pub struct SimpleChannel {
    s: Vec<Option<Sender<Vec<u8>>>>,
    r: Vec<Option<Mutex<Receiver<Vec<u8>>>>>,
}

impl SimpleChannel {
    /// Creates channels for N parties to communicate with each other.
    pub fn channels(parties: usize) -> Vec<Self> {
        let buffer_capacity = 1024;
        let mut channels = vec![];
        for _ in 0..parties {
            let mut s = vec![];
            let mut r = vec![];
            for _ in 0..parties {
                s.push(None);
                r.push(None);
            }
            channels.push(SimpleChannel { s, r });
        }
        for a in 0..parties {
            for b in 0..parties {
                if a >= b {
                    continue;
                }
                let (send_a_to_b, recv_a_to_b) = channel(buffer_capacity);
                let (send_b_to_a, recv_b_to_a) = channel(buffer_capacity);
                channels[a].s[b] = Some(send_a_to_b);
                channels[b].s[a] = Some(send_b_to_a);
                channels[a].r[b] = Some(Mutex::new(recv_b_to_a));
                channels[b].r[a] = Some(Mutex::new(recv_a_to_b));
            }
        }
        channels
    }
}

/// The error raised by `send` calls of a [`SimpleChannel`].
#[derive(Debug)]
pub enum AsyncSendError {
    /// The receiving half has been dropped.
    Closed,
    /// There is no connection to the given party.
    UnknownParty(usize),
}

/// The error raised by `recv` calls of a [`SimpleChannel`].
#[derive(Debug)]
pub enum AsyncRecvError {
    /// The channel has been closed.
    Closed,
    /// No message was received before the timeout.
    TimeoutElapsed,
    /// There is no connection to the given party.
    UnknownParty(usize),
}

impl Channel for SimpleChannel {
    type SendError = AsyncSendError;
    type RecvError = AsyncRecvError;

    async fn send_bytes_to(&self, p: usize, msg: Vec<u8>) -> Result<(), AsyncSendError> {
        let sender = self
            .s
            .get(p)
            .and_then(Option::as_ref)
            .ok_or(AsyncSendError::UnknownParty(p))?;
        let kb = msg.len() as f64 / 1024.0;
        trace!("Sending msg to party {p} ({kb:.2}KB)");
        let chunk_size = 100 * 1024 * 1024;
        let mut chunks: Vec<_> = msg.chunks(chunk_size).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }
        let length = chunks.len();
        for (i, chunk) in chunks.into_iter().enumerate() {
            let mut msg = Vec::with_capacity(2 * 4 + chunk.len());
            msg.extend((i as u32).to_be_bytes());
            msg.extend((length as u32).to_be_bytes());
            msg.extend(chunk);
            sender.send(msg).await.map_err(|_| AsyncSendError::Closed)?;
        }
        Ok(())
    }

    async fn recv_bytes_from(&self, p: usize) -> Result<Vec<u8>, AsyncRecvError> {
        let mut receiver = self
            .r
            .get(p)
            .and_then(Option::as_ref)
            .ok_or(AsyncRecvError::UnknownParty(p))?
            .lock()
            .await;
        let mut msg: Vec<u8> = vec![];
        loop {
            let chunk = match timeout(Duration::from_secs(10 * 60), receiver.recv()).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => return Err(AsyncRecvError::Closed),
                Err(_) => return Err(AsyncRecvError::TimeoutElapsed),
            };
            let i = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let length = u32::from_be_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
            msg.extend(&chunk[8..]);
            if i == length - 1 {
                break Ok(msg);
            }
        }
    }
}
