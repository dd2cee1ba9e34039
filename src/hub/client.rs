use crate::hub::Batch;
use crate::Result;
use async_trait::async_trait;
use serde::Serialize;

/// Properties reported by the hub once a session is established.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubProperties {
    pub name: String,
    pub partition_ids: Vec<String>,
}

/// Narrow interface to the streaming hub.
///
/// Transport concerns (TLS, authentication handshakes, retries of
/// transport-level faults) stay behind this trait.
#[async_trait]
pub trait HubClient: Send + Sync + 'static {
    /// Establishes the session and fetches the hub properties.
    async fn connect(&self) -> Result<HubProperties>;

    /// Sends every message of the batch, in order, as one unit.
    async fn send_batch(&self, batch: &Batch) -> Result<()>;

    /// Releases broker resources.
    async fn close(&self) -> Result<()>;

    /// Byte capacity of a single batch enforced by the hub.
    fn max_batch_bytes(&self) -> usize;
}
