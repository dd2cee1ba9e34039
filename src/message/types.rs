use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Property key lifted into the transport-level correlation id.
pub const CORRELATION_ID: &str = "correlationId";

/// Property key lifted into the transport-level message id.
pub const MESSAGE_ID: &str = "messageId";

/// Fixed per-message envelope overhead counted against the batch capacity.
pub const MESSAGE_OVERHEAD_BYTES: usize = 64;

/// A single message sent to the hub.
///
/// `correlation_id` and `message_id` are never part of `properties`; they
/// are lifted out by [`Message::with_properties`] and travel as dedicated
/// transport metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub body: Value,
    pub properties: Option<Map<String, Value>>,
    pub partition_key: Option<String>,
    pub correlation_id: Option<String>,
    pub message_id: Option<String>,
}

impl Message {
    pub fn new(body: Value) -> Self {
        Self {
            body,
            properties: None,
            partition_key: None,
            correlation_id: None,
            message_id: None,
        }
    }

    /// Sets the application properties, lifting the reserved keys out.
    pub fn with_properties(mut self, mut properties: Map<String, Value>) -> Self {
        self.correlation_id = properties.remove(CORRELATION_ID).map(property_to_string);
        self.message_id = properties.remove(MESSAGE_ID).map(property_to_string);
        self.properties = if properties.is_empty() { None } else { Some(properties) };
        self
    }

    /// Sets the partition key; an empty key is treated as absent.
    pub fn with_partition_key(mut self, key: Option<&str>) -> Self {
        self.partition_key = key.filter(|k| !k.is_empty()).map(str::to_string);
        self
    }

    /// All properties including the reserved ones, as they appear in a frame.
    pub fn all_properties(&self) -> Option<Map<String, Value>> {
        let mut all = self.properties.clone().unwrap_or_default();
        if let Some(id) = &self.correlation_id {
            all.insert(CORRELATION_ID.to_string(), Value::String(id.clone()));
        }
        if let Some(id) = &self.message_id {
            all.insert(MESSAGE_ID.to_string(), Value::String(id.clone()));
        }
        if all.is_empty() {
            None
        } else {
            Some(all)
        }
    }

    /// Number of bytes this message occupies inside a batch.
    pub fn encoded_size(&self) -> usize {
        let body = json_len(&self.body);
        let key = self.partition_key.as_ref().map_or(0, String::len);
        let properties = self.properties.as_ref().map_or(0, |props| {
            props.iter().map(|(k, v)| k.len() + json_len(v)).sum()
        });
        let ids = self.correlation_id.as_ref().map_or(0, String::len)
            + self.message_id.as_ref().map_or(0, String::len);

        MESSAGE_OVERHEAD_BYTES + body + key + properties + ids
    }
}

fn property_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn json_len(value: &Value) -> usize {
    serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0)
}
