pub mod batch;
pub mod client;
pub mod frames;
pub mod memory;
pub mod publisher;

pub use batch::{Batch, BatchAssembler, BATCH_OVERHEAD_BYTES};
pub use client::{HubClient, HubProperties};
pub use frames::FrameSink;
pub use memory::{MemoryHub, SentBatch};
pub use publisher::{PublishStats, Publisher, StatsSnapshot};
