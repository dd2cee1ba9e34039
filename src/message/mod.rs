pub mod codec;
pub mod mapper;
pub mod types;

pub use codec::{FrameDecoder, FrameEncoder, FrameReader, DEFAULT_DELIMITER};
pub use mapper::{ColumnValueMapper, MessageMapper, RowAsJsonMapper};
pub use types::{Message, CORRELATION_ID, MESSAGE_ID, MESSAGE_OVERHEAD_BYTES};
