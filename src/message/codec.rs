//! Frame codec for the driver/worker byte stream.
//!
//! Each message is written as one compact JSON document followed by a
//! delimiter. Compact JSON never contains a raw newline (newlines inside
//! strings are escaped), so any delimiter containing `\n` can never occur
//! inside a frame.
//!
//! ```text
//! {"body":{"id":"1"},"partitionKey":"eu"}\n---\n{"body":42}\n---\n
//! ```

use crate::message::Message;
use crate::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

/// Delimiter used when none is configured.
pub const DEFAULT_DELIMITER: &str = "\n---\n";

const READ_CHUNK_SIZE: usize = 8192;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Frame {
    body: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    properties: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    partition_key: Option<String>,
}

fn validate_delimiter(delimiter: &str) -> Result<Bytes> {
    if !delimiter.contains('\n') {
        return Err(Error::Frame(format!(
            "Delimiter {:?} must contain a newline so it cannot occur inside a JSON document.",
            delimiter
        )));
    }
    Ok(Bytes::copy_from_slice(delimiter.as_bytes()))
}

/// Serializes messages into delimited frames.
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    delimiter: Bytes,
}

impl FrameEncoder {
    pub fn new(delimiter: &str) -> Result<Self> {
        Ok(Self {
            delimiter: validate_delimiter(delimiter)?,
        })
    }

    pub fn encode(&self, message: &Message, dst: &mut BytesMut) -> Result<()> {
        let frame = Frame {
            body: message.body.clone(),
            properties: message.all_properties(),
            partition_key: message.partition_key.clone(),
        };
        let json = serde_json::to_vec(&frame)?;
        dst.reserve(json.len() + self.delimiter.len());
        dst.put_slice(&json);
        dst.put_slice(&self.delimiter);
        Ok(())
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self {
            delimiter: Bytes::from_static(DEFAULT_DELIMITER.as_bytes()),
        }
    }
}

/// Buffers raw bytes and splits them back into messages.
#[derive(Debug)]
pub struct FrameDecoder {
    delimiter: Bytes,
    buffer: BytesMut,
    // Bytes before this offset are known not to start a delimiter.
    scanned: usize,
}

impl FrameDecoder {
    pub fn new(delimiter: &str) -> Result<Self> {
        Ok(Self {
            delimiter: validate_delimiter(delimiter)?,
            buffer: BytesMut::new(),
            scanned: 0,
        })
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Returns the next complete message, or `None` if more input is needed.
    pub fn decode(&mut self) -> Result<Option<Message>> {
        loop {
            let Some(pos) = find(&self.buffer[self.scanned..], &self.delimiter) else {
                self.scanned = self.buffer.len().saturating_sub(self.delimiter.len() - 1);
                return Ok(None);
            };
            let chunk = self.buffer.split_to(self.scanned + pos);
            let _ = self.buffer.split_to(self.delimiter.len());
            self.scanned = 0;
            if let Some(message) = parse_frame(&chunk)? {
                return Ok(Some(message));
            }
        }
    }

    /// Drains what is left once the input has ended.
    ///
    /// A trailing document without a delimiter is accepted as the last frame.
    pub fn decode_eof(&mut self) -> Result<Option<Message>> {
        if let Some(message) = self.decode()? {
            return Ok(Some(message));
        }
        let rest = self.buffer.split();
        self.scanned = 0;
        parse_frame(&rest)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self {
            delimiter: Bytes::from_static(DEFAULT_DELIMITER.as_bytes()),
            buffer: BytesMut::new(),
            scanned: 0,
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn parse_frame(chunk: &[u8]) -> Result<Option<Message>> {
    if chunk.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let frame: Frame = serde_json::from_slice(chunk).map_err(|e| {
        Error::Frame(format!(
            "{} in {:?}",
            e,
            String::from_utf8_lossy(&chunk[..chunk.len().min(200)])
        ))
    })?;
    trace!("Decoded frame of {} bytes", chunk.len());

    let mut message = Message::new(frame.body).with_partition_key(frame.partition_key.as_deref());
    if let Some(properties) = frame.properties {
        message = message.with_properties(properties);
    }
    Ok(Some(message))
}

/// Reads a frame stream from any async reader.
pub struct FrameReader<R> {
    reader: R,
    decoder: FrameDecoder,
    eof: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, decoder: FrameDecoder) -> Self {
        Self {
            reader,
            decoder,
            eof: false,
        }
    }

    pub async fn next_message(&mut self) -> Result<Option<Message>> {
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];
        loop {
            if let Some(message) = self.decoder.decode()? {
                return Ok(Some(message));
            }
            if self.eof {
                return Ok(None);
            }
            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                self.eof = true;
                return self.decoder.decode_eof();
            }
            self.decoder.extend(&chunk[..n]);
        }
    }
}
