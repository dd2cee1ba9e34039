//! Bounded transport between row production and batch assembly.
//!
//! The producer writes messages with [`ChannelWriter::write`]. When the
//! buffer cannot take a message right away the write reports
//! [`WriteStatus::Full`] and keeps the message aside; the producer must stop
//! writing and await [`ChannelWriter::drained`], which suspends until the
//! consumer has made room and the held message has been delivered.
//!
//! ```text
//!  producer ──write()──▶ [ bounded buffer ] ──next()──▶ consumer
//!      ▲                        │
//!      └──── drained() ◀────────┘ (room again)
//! ```

use crate::message::Message;
use crate::{Error, Result};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

/// Outcome of a non-blocking write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// The message is buffered; the producer may keep writing.
    Accepted,
    /// The buffer is full; the message is held until [`ChannelWriter::drained`].
    Full,
}

/// Creates a channel buffering at most `capacity` messages.
pub fn backpressure_channel(capacity: usize) -> (ChannelWriter, ChannelReader) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ChannelWriter {
            tx,
            pending: None,
            written: 0,
            full_events: 0,
        },
        ChannelReader {
            inner: ReceiverStream::new(rx),
        },
    )
}

/// Producer half of the backpressure channel.
#[derive(Debug)]
pub struct ChannelWriter {
    tx: mpsc::Sender<Message>,
    pending: Option<Message>,
    written: u64,
    full_events: u64,
}

impl ChannelWriter {
    /// Writes a message without waiting.
    ///
    /// Writing while the buffer is reported full is a protocol violation.
    pub fn write(&mut self, message: Message) -> Result<WriteStatus> {
        if self.pending.is_some() {
            return Err(Error::Pipeline(
                "write while the channel buffer is full".to_string(),
            ));
        }
        self.written += 1;
        match self.tx.try_send(message) {
            Ok(()) => Ok(WriteStatus::Accepted),
            Err(TrySendError::Full(message)) => {
                self.pending = Some(message);
                self.full_events += 1;
                Ok(WriteStatus::Full)
            }
            Err(TrySendError::Closed(_)) => Err(closed()),
        }
    }

    pub fn is_full(&self) -> bool {
        self.pending.is_some()
    }

    /// Suspends until the consumer drained the buffer enough to take the
    /// held message. Returns immediately when nothing is held.
    pub async fn drained(&mut self) -> Result<()> {
        if let Some(message) = self.pending.take() {
            let permit = self.tx.reserve().await.map_err(|_| closed())?;
            permit.send(message);
        }
        Ok(())
    }

    /// Number of messages written, including a held one.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// How many times a write found the buffer full.
    pub fn full_events(&self) -> u64 {
        self.full_events
    }

    /// Delivers any held message and closes the producer side.
    pub async fn finish(mut self) -> Result<u64> {
        self.drained().await?;
        Ok(self.written)
    }
}

fn closed() -> Error {
    Error::Pipeline("channel consumer has stopped".to_string())
}

/// Consumer half of the backpressure channel.
#[derive(Debug)]
pub struct ChannelReader {
    inner: ReceiverStream<Message>,
}

impl ChannelReader {
    /// Next message, or `None` once the writer finished and the buffer is empty.
    pub async fn next(&mut self) -> Option<Message> {
        self.inner.next().await
    }

    /// Stops accepting messages; the writer sees a closed channel.
    pub fn close(&mut self) {
        self.inner.close();
    }
}
