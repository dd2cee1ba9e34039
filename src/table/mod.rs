pub mod reader;
pub mod types;

pub use reader::{CsvRowSource, MemoryRowSource, RowSource};
pub use types::Row;
