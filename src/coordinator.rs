//! End-to-end export pipeline.
//!
//! ```text
//!  RowSource ─▶ MessageMapper ─▶ ChannelWriter ═▶ ChannelReader ─▶ BatchAssembler ─▶ Publisher
//!  └──────────── production task ─────────────┘  └────────────── coordinator task ──────────────┘
//! ```
//!
//! The production task converts a fixed number of rows per turn and then
//! yields; it suspends whenever the channel reports a full buffer. The
//! coordinator task owns the batch assembler and the publisher, so flush
//! decisions and in-flight bookkeeping happen on a single task.

use crate::channel::{backpressure_channel, ChannelReader, ChannelWriter, WriteStatus};
use crate::config::Parameters;
use crate::hub::{BatchAssembler, HubClient, HubProperties, PublishStats, Publisher, StatsSnapshot};
use crate::message::{FrameReader, MessageMapper};
use crate::table::RowSource;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Rows converted per turn before the production task yields.
pub const ROWS_PER_TURN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportState {
    Idle,
    Connecting,
    Streaming,
    Draining,
    Done,
    Failed,
}

impl ExportState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExportState::Done | ExportState::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub batch_size: usize,
    pub channel_capacity: usize,
    pub max_in_flight: usize,
    pub rows_per_turn: usize,
    pub progress_interval: Duration,
    pub connect_timeout: Duration,
}

impl ExportOptions {
    pub fn from_parameters(params: &Parameters) -> Self {
        Self {
            batch_size: params.batch_size,
            channel_capacity: params.channel_capacity,
            max_in_flight: params.max_in_flight_batches,
            rows_per_turn: ROWS_PER_TURN,
            progress_interval: Duration::from_secs(params.progress_interval_secs.max(1)),
            connect_timeout: Duration::from_secs(params.connect_timeout_secs.max(1)),
        }
    }
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            channel_capacity: 1000,
            max_in_flight: 16,
            rows_per_turn: ROWS_PER_TURN,
            progress_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Final counts of a run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSummary {
    pub rows_read: u64,
    pub messages_sent: u64,
    pub batches_sent: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Requests a graceful stop of a running export.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

pub struct ExportCoordinator {
    client: Arc<dyn HubClient>,
    options: ExportOptions,
    state: ExportState,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown: watch::Receiver<bool>,
    progress: Arc<watch::Sender<StatsSnapshot>>,
}

impl ExportCoordinator {
    pub fn new(client: Arc<dyn HubClient>, options: ExportOptions) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            client,
            options,
            state: ExportState::Idle,
            shutdown_tx: Arc::new(tx),
            shutdown: rx,
            progress: Arc::new(watch::channel(StatsSnapshot::default()).0),
        }
    }

    pub fn state(&self) -> ExportState {
        self.state
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Counts sent so far, refreshed every progress interval.
    pub fn progress(&self) -> watch::Receiver<StatsSnapshot> {
        self.progress.subscribe()
    }

    fn transition(&mut self, next: ExportState) {
        debug!(from = ?self.state, to = ?next, "Export state change");
        self.state = next;
    }

    /// Checks that the hub is reachable without reading any row.
    pub async fn test_connection(&mut self) -> Result<HubProperties> {
        self.transition(ExportState::Connecting);
        let result =
            with_connect_timeout(self.options.connect_timeout, self.client.connect()).await;
        if let Err(e) = self.client.close().await {
            warn!("Failed to close hub client: {}", e);
        }

        match result {
            Ok(properties) => {
                self.transition(ExportState::Done);
                Ok(properties)
            }
            Err(e) => {
                self.transition(ExportState::Failed);
                Err(e.into_user_error())
            }
        }
    }

    /// Exports every row of `source`.
    pub async fn run<S>(&mut self, source: S, mapper: MessageMapper) -> Result<ExportSummary>
    where
        S: RowSource + 'static,
    {
        let rows_per_turn = self.options.rows_per_turn.max(1);
        self.execute(move |writer, shutdown| {
            produce_rows(source, mapper, writer, rows_per_turn, shutdown)
        })
        .await
    }

    /// Publishes every message of a frame stream.
    pub async fn run_frames<R>(&mut self, frames: FrameReader<R>) -> Result<ExportSummary>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let per_turn = self.options.rows_per_turn.max(1);
        self.execute(move |writer, shutdown| produce_frames(frames, writer, per_turn, shutdown))
            .await
    }

    async fn execute<P, F>(&mut self, production: P) -> Result<ExportSummary>
    where
        P: FnOnce(ChannelWriter, watch::Receiver<bool>) -> F,
        F: Future<Output = Result<u64>> + Send + 'static,
    {
        if self.state != ExportState::Idle {
            return Err(Error::Pipeline(format!("export already ran, state {:?}", self.state)));
        }
        let started_at = Utc::now();
        let mut publisher = Publisher::new(self.client.clone(), self.options.max_in_flight);
        let stats = publisher.stats();
        let progress = spawn_progress(
            stats.clone(),
            self.options.progress_interval,
            self.progress.clone(),
        );

        let result = self.drive(&mut publisher, production).await;
        progress.abort();

        // Resources are released on the failure path too.
        let closed = publisher.close().await;
        let sent = stats.snapshot();
        self.progress.send_replace(sent);

        let outcome = match (result, closed) {
            (Ok(rows), Ok(())) => Ok(rows),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    warn!("Failed to close hub client: {}", close_err);
                }
                Err(e)
            }
        };

        match outcome {
            Ok(rows_read) => {
                self.transition(ExportState::Done);
                let summary = ExportSummary {
                    rows_read,
                    messages_sent: sent.messages_sent,
                    batches_sent: sent.batches_sent,
                    started_at,
                    finished_at: Utc::now(),
                };
                info!(
                    rows = summary.rows_read,
                    messages = summary.messages_sent,
                    batches = summary.batches_sent,
                    "Export finished"
                );
                Ok(summary)
            }
            Err(e) => {
                self.transition(ExportState::Failed);
                error!(
                    messages = sent.messages_sent,
                    batches = sent.batches_sent,
                    "Export failed after sending {} messages in {} batches",
                    sent.messages_sent,
                    sent.batches_sent
                );
                Err(e)
            }
        }
    }

    async fn drive<P, F>(&mut self, publisher: &mut Publisher, production: P) -> Result<u64>
    where
        P: FnOnce(ChannelWriter, watch::Receiver<bool>) -> F,
        F: Future<Output = Result<u64>> + Send + 'static,
    {
        self.transition(ExportState::Connecting);
        let properties =
            with_connect_timeout(self.options.connect_timeout, publisher.connect()).await?;
        debug!(partitions = ?properties.partition_ids, "Hub properties");

        self.transition(ExportState::Streaming);
        let (writer, reader) = backpressure_channel(self.options.channel_capacity);
        let producer = tokio::spawn(production(writer, self.shutdown.clone()));
        let mut assembler =
            BatchAssembler::new(self.options.batch_size, publisher.max_batch_bytes());

        let consumed = consume(reader, &mut assembler, publisher, self.shutdown.clone()).await;
        if let Err(e) = consumed {
            producer.abort();
            settle(publisher).await;
            return Err(e);
        }

        let rows = match join_producer(producer).await {
            Ok(rows) => rows,
            Err(e) => {
                settle(publisher).await;
                return Err(e);
            }
        };

        self.transition(ExportState::Draining);
        for batch in assembler.finish() {
            if let Err(e) = publisher.publish(batch).await {
                settle(publisher).await;
                return Err(e);
            }
        }
        publisher.wait_all().await?;
        Ok(rows)
    }
}

async fn with_connect_timeout<F>(timeout: Duration, connect: F) -> Result<HubProperties>
where
    F: Future<Output = Result<HubProperties>>,
{
    match tokio::time::timeout(timeout, connect).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            message: format!(
                "Connection to the hub timed out after {:.1} seconds.",
                timeout.as_secs_f64()
            ),
        }),
    }
}

async fn consume(
    mut reader: ChannelReader,
    assembler: &mut BatchAssembler,
    publisher: &mut Publisher,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    while let Some(message) = reader.next().await {
        if *shutdown.borrow() {
            reader.close();
            return Err(Error::Shutdown);
        }
        for batch in assembler.add(message)? {
            publisher.publish(batch).await?;
        }
    }
    Ok(())
}

async fn join_producer(handle: JoinHandle<Result<u64>>) -> Result<u64> {
    handle
        .await
        .map_err(|e| Error::Pipeline(format!("production task failed: {}", e)))?
}

/// Lets publishes already in flight finish after a failure.
async fn settle(publisher: &mut Publisher) {
    if let Err(e) = publisher.wait_all().await {
        warn!("In-flight publish failed during shutdown: {}", e);
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            // Nobody can trigger a shutdown anymore.
            std::future::pending::<()>().await;
        }
    }
}

/// Suspends the producer until the buffer drained, or fails on shutdown.
async fn wait_drained(
    writer: &mut ChannelWriter,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    tokio::select! {
        drained = writer.drained() => drained,
        _ = wait_for_shutdown(shutdown) => Err(Error::Shutdown),
    }
}

async fn produce_rows<S: RowSource>(
    mut source: S,
    mapper: MessageMapper,
    mut writer: ChannelWriter,
    rows_per_turn: usize,
    mut shutdown: watch::Receiver<bool>,
) -> Result<u64> {
    let mut rows = 0u64;
    loop {
        for _ in 0..rows_per_turn {
            if *shutdown.borrow() {
                info!(rows, "Shutdown requested, stopping row production");
                return Err(Error::Shutdown);
            }
            let Some(row) = source.next_row()? else {
                writer.finish().await?;
                debug!(rows, "Row source exhausted");
                return Ok(rows);
            };
            rows += 1;
            let message = mapper.map(&row, rows)?;
            if writer.write(message)? == WriteStatus::Full {
                wait_drained(&mut writer, &mut shutdown).await?;
            }
        }
        tokio::task::yield_now().await;
    }
}

async fn produce_frames<R: AsyncRead + Unpin>(
    mut frames: FrameReader<R>,
    mut writer: ChannelWriter,
    per_turn: usize,
    mut shutdown: watch::Receiver<bool>,
) -> Result<u64> {
    let mut count = 0u64;
    loop {
        for _ in 0..per_turn {
            if *shutdown.borrow() {
                return Err(Error::Shutdown);
            }
            let Some(message) = frames.next_message().await? else {
                writer.finish().await?;
                return Ok(count);
            };
            count += 1;
            if writer.write(message)? == WriteStatus::Full {
                wait_drained(&mut writer, &mut shutdown).await?;
            }
        }
        tokio::task::yield_now().await;
    }
}

fn spawn_progress(
    stats: Arc<PublishStats>,
    every: Duration,
    report: Arc<watch::Sender<StatsSnapshot>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let sent = stats.snapshot();
            info!(
                messages = sent.messages_sent,
                batches = sent.batches_sent,
                "Sent {} messages in {} batches so far",
                sent.messages_sent,
                sent.batches_sent
            );
            report.send_replace(sent);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::MemoryHub;
    use crate::message::RowAsJsonMapper;
    use crate::table::MemoryRowSource;

    fn options(batch_size: usize) -> ExportOptions {
        ExportOptions {
            batch_size,
            channel_capacity: 4,
            rows_per_turn: 3,
            ..ExportOptions::default()
        }
    }

    fn row_mapper(header: &[&str], key: Option<&str>) -> MessageMapper {
        let header: Vec<String> = header.iter().map(|s| s.to_string()).collect();
        MessageMapper::RowAsJson(RowAsJsonMapper::new(&header, "t", key).unwrap())
    }

    #[tokio::test]
    async fn test_states_on_success() {
        let hub = Arc::new(MemoryHub::new());
        let mut coordinator = ExportCoordinator::new(hub.clone(), options(2));
        assert_eq!(coordinator.state(), ExportState::Idle);

        let source = MemoryRowSource::new(["id"], vec![vec!["1"], vec!["2"], vec!["3"]]);
        let summary = coordinator.run(source, row_mapper(&["id"], None)).await.unwrap();

        assert_eq!(coordinator.state(), ExportState::Done);
        assert!(coordinator.state().is_terminal());
        assert_eq!(summary.rows_read, 3);
        assert_eq!(summary.messages_sent, 3);
        assert_eq!(summary.batches_sent, 2);
        assert_eq!(hub.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_closes_and_reads_nothing() {
        let hub = Arc::new(MemoryHub::new().fail_connect("unreachable"));
        let mut coordinator = ExportCoordinator::new(hub.clone(), options(2));

        let err = coordinator
            .run(MemoryRowSource::new(["id"], vec![vec!["1"]]), row_mapper(&["id"], None))
            .await
            .unwrap_err();

        assert!(err.is_user_error());
        assert_eq!(coordinator.state(), ExportState::Failed);
        assert_eq!(hub.close_calls(), 1);
        assert!(hub.sent().is_empty());
    }

    #[tokio::test]
    async fn test_run_twice_is_rejected() {
        let hub = Arc::new(MemoryHub::new());
        let mut coordinator = ExportCoordinator::new(hub.clone(), options(2));
        coordinator
            .run(MemoryRowSource::new(["id"], Vec::<Vec<&str>>::new()), row_mapper(&["id"], None))
            .await
            .unwrap();

        let err = coordinator
            .run(MemoryRowSource::new(["id"], Vec::<Vec<&str>>::new()), row_mapper(&["id"], None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Pipeline(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_reported_every_interval() {
        let stats = Arc::new(PublishStats::default());
        let (tx, mut rx) = watch::channel(StatsSnapshot::default());
        let ticker = spawn_progress(stats.clone(), Duration::from_secs(30), Arc::new(tx));

        stats.record_batch(3);
        tokio::time::advance(Duration::from_secs(31)).await;
        rx.changed().await.unwrap();
        assert_eq!(
            *rx.borrow_and_update(),
            StatsSnapshot {
                messages_sent: 3,
                batches_sent: 1
            }
        );

        stats.record_batch(2);
        tokio::time::advance(Duration::from_secs(30)).await;
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().messages_sent, 5);
        ticker.abort();
    }

    #[tokio::test]
    async fn test_progress_receiver_sees_final_counts() {
        let hub = Arc::new(MemoryHub::new().with_send_delay(Duration::from_millis(30)));
        let mut coordinator = ExportCoordinator::new(
            hub.clone(),
            ExportOptions {
                progress_interval: Duration::from_millis(10),
                ..options(1)
            },
        );
        let progress = coordinator.progress();

        let rows: Vec<Vec<String>> = (1..=5).map(|i| vec![i.to_string()]).collect();
        let source = MemoryRowSource::new(["id"], rows);
        coordinator.run(source, row_mapper(&["id"], None)).await.unwrap();

        assert_eq!(progress.borrow().batches_sent, 5);
        assert_eq!(progress.borrow().messages_sent, 5);
    }

    #[tokio::test]
    async fn test_test_connection_states() {
        let hub = Arc::new(MemoryHub::new());
        let mut coordinator = ExportCoordinator::new(hub.clone(), options(2));

        let properties = coordinator.test_connection().await.unwrap();
        assert_eq!(properties.name, "memory-hub");
        assert_eq!(coordinator.state(), ExportState::Done);
        assert_eq!(hub.close_calls(), 1);
        assert!(hub.sent().is_empty());
    }

    #[tokio::test]
    async fn test_connection_timeout_is_bounded() {
        struct HangingHub;

        #[async_trait::async_trait]
        impl HubClient for HangingHub {
            async fn connect(&self) -> Result<HubProperties> {
                std::future::pending().await
            }
            async fn send_batch(&self, _batch: &crate::hub::Batch) -> Result<()> {
                Ok(())
            }
            async fn close(&self) -> Result<()> {
                Ok(())
            }
            fn max_batch_bytes(&self) -> usize {
                1024
            }
        }

        let mut coordinator = ExportCoordinator::new(
            Arc::new(HangingHub),
            ExportOptions {
                connect_timeout: Duration::from_millis(50),
                ..ExportOptions::default()
            },
        );

        let err = coordinator.test_connection().await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(coordinator.state(), ExportState::Failed);
    }
}
