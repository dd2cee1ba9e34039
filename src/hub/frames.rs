use crate::hub::{Batch, HubClient, HubProperties};
use crate::message::FrameEncoder;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Writes batches as a frame stream instead of sending them to a broker.
///
/// This is the driver side of the frame protocol: its output can be fed to
/// another process that publishes the frames.
pub struct FrameSink<W> {
    name: String,
    writer: Mutex<W>,
    encoder: FrameEncoder,
    max_batch_bytes: usize,
}

impl<W: AsyncWrite + Unpin + Send + 'static> FrameSink<W> {
    pub fn new(
        name: impl Into<String>,
        writer: W,
        encoder: FrameEncoder,
        max_batch_bytes: usize,
    ) -> Self {
        Self {
            name: name.into(),
            writer: Mutex::new(writer),
            encoder,
            max_batch_bytes,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send + 'static> HubClient for FrameSink<W> {
    async fn connect(&self) -> Result<HubProperties> {
        Ok(HubProperties {
            name: self.name.clone(),
            partition_ids: Vec::new(),
        })
    }

    async fn send_batch(&self, batch: &Batch) -> Result<()> {
        let mut buf = BytesMut::with_capacity(batch.size_bytes());
        for message in batch.messages() {
            self.encoder.encode(message, &mut buf)?;
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(&buf).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer
            .flush()
            .await
            .map_err(|e| Error::Pipeline(format!("failed to flush frame stream: {}", e)))
    }

    fn max_batch_bytes(&self) -> usize {
        self.max_batch_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{FrameDecoder, Message};
    use serde_json::json;

    #[tokio::test]
    async fn test_frame_sink_writes_decodable_frames() {
        let sink = FrameSink::new("frames", Vec::new(), FrameEncoder::default(), 1_000_000);
        let mut batch = Batch::new(Some("k".to_string()), 10, 1_000_000);
        batch.try_add(Message::new(json!({"a": 1})).with_partition_key(Some("k"))).unwrap();
        batch.try_add(Message::new(json!("b")).with_partition_key(Some("k"))).unwrap();

        sink.send_batch(&batch).await.unwrap();
        sink.close().await.unwrap();

        let mut decoder = FrameDecoder::default();
        decoder.extend(&sink.into_inner());
        let first = decoder.decode().unwrap().unwrap();
        let second = decoder.decode().unwrap().unwrap();
        assert_eq!(first.body, json!({"a": 1}));
        assert_eq!(second.partition_key.as_deref(), Some("k"));
        assert!(decoder.decode().unwrap().is_none());
    }
}
