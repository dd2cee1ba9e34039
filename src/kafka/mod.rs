pub mod connection_string;
pub mod producer;

#[cfg(test)]
mod tests;

pub use connection_string::ConnectionString;
pub use producer::KafkaHubClient;
