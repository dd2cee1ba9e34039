pub mod channel;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod hub;
pub mod message;
pub mod table;

pub mod kafka;

pub use config::Config;
pub use coordinator::{ExportCoordinator, ExportOptions, ExportState, ExportSummary, ShutdownHandle};
pub use error::{Error, Result};
