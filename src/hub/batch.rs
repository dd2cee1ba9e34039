use crate::message::Message;
use crate::{Error, Result};
use std::collections::BTreeMap;
use tracing::debug;

/// Fixed envelope overhead of a batch, counted before any message is added.
pub const BATCH_OVERHEAD_BYTES: usize = 128;

/// A bounded group of messages sent to the hub in one operation.
///
/// All messages share the same partition key and are sent in insertion
/// order. Handing a batch to the publisher moves it, so nothing can be
/// appended once it is in flight.
#[derive(Debug, Clone)]
pub struct Batch {
    partition_key: Option<String>,
    messages: Vec<Message>,
    size_bytes: usize,
    max_items: usize,
    max_bytes: usize,
}

impl Batch {
    pub fn new(partition_key: Option<String>, max_items: usize, max_bytes: usize) -> Self {
        Self {
            partition_key,
            messages: Vec::new(),
            size_bytes: BATCH_OVERHEAD_BYTES,
            max_items,
            max_bytes,
        }
    }

    /// Appends the message if both the item and the byte limits allow it,
    /// otherwise hands the message back.
    pub fn try_add(&mut self, message: Message) -> std::result::Result<(), Message> {
        let size = message.encoded_size();
        if self.messages.len() >= self.max_items || self.size_bytes + size > self.max_bytes {
            return Err(message);
        }
        self.size_bytes += size;
        self.messages.push(message);
        Ok(())
    }

    pub fn is_full(&self) -> bool {
        self.messages.len() >= self.max_items
    }

    pub fn partition_key(&self) -> Option<&str> {
        self.partition_key.as_deref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }
}

/// Routes messages into one open batch per partition key.
///
/// Returns batches as soon as they must be published. The assembler is the
/// only writer of the open-batch map and is driven from a single task.
#[derive(Debug)]
pub struct BatchAssembler {
    open: BTreeMap<Option<String>, Batch>,
    max_items: usize,
    max_bytes: usize,
    received: u64,
}

impl BatchAssembler {
    pub fn new(max_items: usize, max_bytes: usize) -> Self {
        Self {
            open: BTreeMap::new(),
            max_items: max_items.max(1),
            max_bytes,
            received: 0,
        }
    }

    /// Number of messages received so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Number of partition keys with an open, non-empty batch.
    pub fn open_batches(&self) -> usize {
        self.open.len()
    }

    /// Adds a message and returns the batches that became ready.
    pub fn add(&mut self, message: Message) -> Result<Vec<Batch>> {
        self.received += 1;

        // A message that does not fit into an empty batch can never be sent.
        let size = message.encoded_size() + BATCH_OVERHEAD_BYTES;
        if size > self.max_bytes {
            return Err(Error::MessageTooLarge {
                ordinal: self.received,
                size,
                capacity: self.max_bytes,
            });
        }

        let key = message.partition_key.clone();
        let mut ready = Vec::new();
        let batch = self
            .open
            .entry(key.clone())
            .or_insert_with(|| Batch::new(key.clone(), self.max_items, self.max_bytes));

        if let Err(message) = batch.try_add(message) {
            debug!(partition_key = ?key, items = batch.len(), "Batch at byte capacity, flushing");
            let mut fresh = Batch::new(key.clone(), self.max_items, self.max_bytes);
            let accepted = fresh.try_add(message).is_ok();
            // The size check above guarantees room in an empty batch.
            debug_assert!(accepted, "message rejected by an empty batch");
            ready.push(std::mem::replace(batch, fresh));
        }

        if batch.is_full() {
            if let Some(full) = self.open.remove(&key) {
                ready.push(full);
            }
        }

        Ok(ready)
    }

    /// Closes every open batch; each partition key is flushed exactly once.
    pub fn finish(&mut self) -> Vec<Batch> {
        std::mem::take(&mut self.open)
            .into_values()
            .filter(|batch| !batch.is_empty())
            .collect()
    }
}
