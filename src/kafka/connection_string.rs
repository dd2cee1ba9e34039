use crate::{Error, Result};

/// Port of the Kafka endpoint exposed by an event hub namespace.
pub const KAFKA_PORT: u16 = 9093;

/// Parsed `Endpoint=sb://...;SharedAccessKeyName=...;SharedAccessKey=...` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub host: String,
    pub shared_access_key_name: Option<String>,
    pub shared_access_key: Option<String>,
    pub entity_path: Option<String>,
}

impl ConnectionString {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut host = None;
        let mut shared_access_key_name = None;
        let mut shared_access_key = None;
        let mut entity_path = None;

        for part in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            // Keys are base64 and may contain '=', split on the first one only.
            let Some((key, value)) = part.split_once('=') else {
                return Err(invalid("each part must be a key=value pair"));
            };
            match key.trim().to_ascii_lowercase().as_str() {
                "endpoint" => host = Some(parse_endpoint(value.trim())?),
                "sharedaccesskeyname" => shared_access_key_name = Some(value.to_string()),
                "sharedaccesskey" => shared_access_key = Some(value.to_string()),
                "entitypath" => entity_path = Some(value.to_string()),
                _ => {}
            }
        }

        Ok(Self {
            host: host.ok_or_else(|| invalid("missing \"Endpoint\""))?,
            shared_access_key_name,
            shared_access_key,
            entity_path,
        })
    }

    /// Extracts the access key without failing on malformed input.
    pub fn shared_access_key_of(raw: &str) -> Option<&str> {
        raw.split(';').find_map(|part| {
            let (key, value) = part.trim().split_once('=')?;
            key.eq_ignore_ascii_case("SharedAccessKey").then_some(value)
        })
    }

    pub fn bootstrap_server(&self) -> String {
        format!("{}:{}", self.host, KAFKA_PORT)
    }

    /// A connection string scoped to one hub must name the configured hub.
    pub fn check_entity_path(&self, hub_name: &str) -> Result<()> {
        match &self.entity_path {
            Some(path) if path != hub_name => Err(Error::Connection(format!(
                "The connection string is scoped to event hub \"{}\", but \"{}\" is configured.",
                path, hub_name
            ))),
            _ => Ok(()),
        }
    }
}

fn parse_endpoint(value: &str) -> Result<String> {
    let without_scheme = value.split_once("://").map_or(value, |(_, rest)| rest);
    let host = without_scheme.trim_end_matches('/');
    if host.is_empty() || host.contains('/') {
        return Err(invalid("\"Endpoint\" must look like sb://<namespace>.servicebus.windows.net/"));
    }
    Ok(host.to_string())
}

fn invalid(reason: &str) -> Error {
    Error::Config(format!("Invalid connection string: {}.", reason))
}
