use crate::hub::{Batch, HubClient, HubProperties};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Counters of what has actually been delivered to the hub.
#[derive(Debug, Default)]
pub struct PublishStats {
    messages_sent: AtomicU64,
    batches_sent: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub messages_sent: u64,
    pub batches_sent: u64,
}

impl PublishStats {
    pub(crate) fn record_batch(&self, messages: usize) {
        self.messages_sent.fetch_add(messages as u64, Ordering::Relaxed);
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
        }
    }
}

/// Sends completed batches to the hub.
///
/// Publishes for different partition keys overlap; a batch for a key whose
/// previous batch is still in flight waits for it first, so per-key order is
/// kept and at most one publish per key is outstanding. The in-flight map is
/// only touched by the task that also drives the [`BatchAssembler`], so flush
/// decisions and in-flight bookkeeping never race.
///
/// [`BatchAssembler`]: crate::hub::BatchAssembler
pub struct Publisher {
    client: Arc<dyn HubClient>,
    stats: Arc<PublishStats>,
    in_flight: HashMap<Option<String>, JoinHandle<Result<()>>>,
    max_in_flight: usize,
    closed: bool,
}

impl Publisher {
    pub fn new(client: Arc<dyn HubClient>, max_in_flight: usize) -> Self {
        Self {
            client,
            stats: Arc::new(PublishStats::default()),
            in_flight: HashMap::new(),
            max_in_flight: max_in_flight.max(1),
            closed: false,
        }
    }

    pub fn stats(&self) -> Arc<PublishStats> {
        self.stats.clone()
    }

    pub fn max_batch_bytes(&self) -> usize {
        self.client.max_batch_bytes()
    }

    /// Opens the hub session. Failures are not retried.
    pub async fn connect(&self) -> Result<HubProperties> {
        let properties = self.client.connect().await?;
        info!(
            hub = %properties.name,
            partitions = properties.partition_ids.len(),
            "Connected to hub"
        );
        Ok(properties)
    }

    /// Number of publishes currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Starts publishing a non-empty batch.
    ///
    /// Returns once the batch has been handed to a publish task; the result
    /// of that task is collected by a later `publish` for the same key or by
    /// [`Publisher::wait_all`].
    #[instrument(
        skip(self, batch),
        fields(partition_key = ?batch.partition_key(), items = batch.len())
    )]
    pub async fn publish(&mut self, batch: Batch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        if self.closed {
            return Err(Error::Pipeline("publish after close".to_string()));
        }

        let key = batch.partition_key().map(str::to_string);
        if let Some(previous) = self.in_flight.remove(&key) {
            debug!("Waiting for previous batch of the same partition key");
            join(previous).await?;
        }
        if self.in_flight.len() >= self.max_in_flight {
            debug!(in_flight = self.in_flight.len(), "In-flight limit reached, waiting");
            self.wait_all().await?;
        }

        let client = self.client.clone();
        let stats = self.stats.clone();
        let handle = tokio::spawn(async move {
            client.send_batch(&batch).await?;
            stats.record_batch(batch.len());
            debug!(items = batch.len(), bytes = batch.size_bytes(), "Batch published");
            Ok(())
        });
        self.in_flight.insert(key, handle);
        Ok(())
    }

    /// Waits for every in-flight publish and returns the first failure.
    pub async fn wait_all(&mut self) -> Result<()> {
        let mut first_error = None;
        for (_, handle) in self.in_flight.drain() {
            if let Err(e) = join(handle).await {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    warn!("Additional publish failure: {}", e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Releases broker resources. Only the first call reaches the hub.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.client.close().await
    }
}

async fn join(handle: JoinHandle<Result<()>>) -> Result<()> {
    handle
        .await
        .map_err(|e| Error::Pipeline(format!("publish task failed: {}", e)))?
}
