use crate::hub::{Batch, HubClient, HubProperties};
use crate::message::Message;
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// A batch as received by [`MemoryHub`].
#[derive(Debug, Clone)]
pub struct SentBatch {
    pub partition_key: Option<String>,
    pub bodies: Vec<Value>,
    pub messages: Vec<Message>,
}

/// In-process hub that records every batch it receives.
///
/// Used to run the whole pipeline without a broker.
#[derive(Debug)]
pub struct MemoryHub {
    name: String,
    partitions: usize,
    max_batch_bytes: usize,
    send_delay: Option<Duration>,
    fail_connect: Option<String>,
    fail_batch: Option<usize>,
    sent: Mutex<Vec<SentBatch>>,
    send_calls: AtomicUsize,
    connect_calls: AtomicUsize,
    close_calls: AtomicUsize,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self {
            name: "memory-hub".to_string(),
            partitions: 2,
            max_batch_bytes: 1_046_528,
            send_delay: None,
            fail_connect: None,
            fail_batch: None,
            sent: Mutex::new(Vec::new()),
            send_calls: AtomicUsize::new(0),
            connect_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_max_batch_bytes(mut self, max_batch_bytes: usize) -> Self {
        self.max_batch_bytes = max_batch_bytes;
        self
    }

    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = Some(delay);
        self
    }

    /// Makes `connect` fail with a connection error carrying `message`.
    pub fn fail_connect(mut self, message: impl Into<String>) -> Self {
        self.fail_connect = Some(message.into());
        self
    }

    /// Makes the n-th (1-based) `send_batch` call fail.
    pub fn fail_batch(mut self, n: usize) -> Self {
        self.fail_batch = Some(n);
        self
    }

    pub fn sent(&self) -> Vec<SentBatch> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HubClient for MemoryHub {
    async fn connect(&self) -> Result<HubProperties> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_connect {
            return Err(Error::Connection(message.clone()));
        }
        Ok(HubProperties {
            name: self.name.clone(),
            partition_ids: (0..self.partitions).map(|p| p.to_string()).collect(),
        })
    }

    async fn send_batch(&self, batch: &Batch) -> Result<()> {
        let call = self.send_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_batch == Some(call) {
            return Err(Error::Connection(format!("failed to send batch {}", call)));
        }

        let sent = SentBatch {
            partition_key: batch.partition_key().map(str::to_string),
            bodies: batch.messages().iter().map(|m| m.body.clone()).collect(),
            messages: batch.messages().to_vec(),
        };
        self.sent
            .lock()
            .map_err(|_| Error::Pipeline("memory hub lock poisoned".to_string()))?
            .push(sent);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn max_batch_bytes(&self) -> usize {
        self.max_batch_bytes
    }
}
