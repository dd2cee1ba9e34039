use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub action: Action,
    pub parameters: Parameters,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
pub enum Action {
    #[default]
    #[serde(rename = "run")]
    Run,
    #[serde(rename = "testConnection")]
    TestConnection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameters {
    pub hub: HubConfig,
    #[serde(default)]
    pub table_id: Option<String>,
    #[serde(default)]
    pub mode: MappingMode,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub properties_column: Option<String>,
    #[serde(default)]
    pub partition_key_column: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_batch_bytes")]
    pub max_batch_bytes: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_max_in_flight_batches")]
    pub max_in_flight_batches: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HubConfig {
    #[serde(rename = "#connectionString", default)]
    pub connection_string: String,
    #[serde(rename = "eventHubName", default)]
    pub hub_name: String,
    /// Plain Kafka bootstrap servers, bypassing the connection string endpoint.
    #[serde(default)]
    pub brokers: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MappingMode {
    #[default]
    RowAsJson,
    ColumnValue,
}

impl std::fmt::Display for MappingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MappingMode::RowAsJson => f.write_str("row_as_json"),
            MappingMode::ColumnValue => f.write_str("column_value"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub input: InputMapping,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct InputMapping {
    #[serde(default)]
    pub tables: Vec<InputTable>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputTable {
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub columns: Vec<String>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("Cannot read configuration file {:?}: {}", path.as_ref(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))?;
        Ok(config)
    }

    /// Validates the parts of the configuration the given action needs.
    pub fn validate(&self, action: Action) -> Result<()> {
        self.parameters.hub.validate()?;
        if action == Action::TestConnection {
            return Ok(());
        }

        let params = &self.parameters;
        if params.batch_size == 0 {
            return Err(Error::Config(
                "Invalid configuration, \"batchSize\" must be a positive integer.".to_string(),
            ));
        }
        if params.max_batch_bytes == 0
            || params.channel_capacity == 0
            || params.max_in_flight_batches == 0
        {
            return Err(Error::Config(
                "Invalid configuration, \"maxBatchBytes\", \"channelCapacity\" and \"maxInFlightBatches\" must be positive."
                    .to_string(),
            ));
        }

        match (params.mode, &params.column) {
            (MappingMode::ColumnValue, None) => {
                return Err(Error::Config(format!(
                    "Invalid configuration, missing \"column\" key, \"mode\" is set to \"{}\".",
                    params.mode
                )));
            }
            (MappingMode::RowAsJson, Some(_)) => {
                return Err(Error::Config(format!(
                    "Invalid configuration, \"column\" is configured, but \"mode\" is set to \"{}\".",
                    params.mode
                )));
            }
            _ => {}
        }

        self.input_table().map(|_| ())
    }

    pub fn table_id(&self) -> Result<String> {
        if let Some(table_id) = &self.parameters.table_id {
            return Ok(table_id.clone());
        }
        match self.storage.input.tables.as_slice() {
            [table] => Ok(table.source.clone()),
            tables => Err(Error::Config(format!(
                "Please define one table in the input mapping, found {} tables.",
                tables.len()
            ))),
        }
    }

    pub fn input_table(&self) -> Result<&InputTable> {
        let table_id = self.table_id()?;
        self.storage
            .input
            .tables
            .iter()
            .find(|table| table.source == table_id)
            .ok_or_else(|| {
                Error::Config(format!(
                    "Table source = \"{}\" not found in the input mapping.",
                    table_id
                ))
            })
    }

    pub fn table_csv_path(&self, data_dir: &Path) -> Result<PathBuf> {
        let table = self.input_table()?;
        Ok(data_dir.join("in").join("tables").join(&table.destination))
    }

    /// Values that must never appear in user-facing messages.
    pub fn secrets(&self) -> Vec<&str> {
        let mut secrets = vec![self.parameters.hub.connection_string.as_str()];
        if let Some(key) = crate::kafka::ConnectionString::shared_access_key_of(
            &self.parameters.hub.connection_string,
        ) {
            secrets.push(key);
        }
        secrets
    }
}

impl HubConfig {
    pub fn validate(&self) -> Result<()> {
        if self.connection_string.trim().is_empty() {
            return Err(Error::Config(
                "The child node \"#connectionString\" at path \"root.parameters.hub\" must be configured."
                    .to_string(),
            ));
        }
        if self.hub_name.trim().is_empty() {
            return Err(Error::Config(
                "The child node \"eventHubName\" at path \"root.parameters.hub\" must be configured."
                    .to_string(),
            ));
        }
        Ok(())
    }
}

fn default_batch_size() -> usize {
    100
}

fn default_max_batch_bytes() -> usize {
    1_046_528 // Event Hubs batch limit
}

fn default_channel_capacity() -> usize {
    1000
}

fn default_progress_interval_secs() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_max_in_flight_batches() -> usize {
    16
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hub_node() -> serde_json::Value {
        json!({
            "#connectionString": "Endpoint=sb://abc.servicebus.windows.net/;SharedAccessKeyName=def;SharedAccessKey=ghi",
            "eventHubName": "my-event-hub"
        })
    }

    fn parse(value: serde_json::Value) -> Config {
        Config::from_json(&value.to_string()).unwrap()
    }

    #[test]
    fn test_minimal_config() {
        let config = parse(json!({
            "parameters": {"hub": hub_node(), "tableId": "in.c-ex-generic-test.data"},
            "storage": {"input": {"tables": [{"source": "in.c-ex-generic-test.data", "destination": "data.csv"}]}}
        }));

        assert_eq!(config.action, Action::Run);
        assert_eq!(config.parameters.mode, MappingMode::RowAsJson);
        assert_eq!(config.parameters.batch_size, 100);
        assert_eq!(config.parameters.hub.hub_name, "my-event-hub");
        assert!(config.validate(Action::Run).is_ok());
        assert_eq!(
            config.table_csv_path(Path::new("/data")).unwrap(),
            PathBuf::from("/data/in/tables/data.csv")
        );
    }

    #[test]
    fn test_table_id_from_input_mapping() {
        let config = parse(json!({
            "parameters": {"hub": hub_node()},
            "storage": {"input": {"tables": [{"source": "in.c-ex-generic-test.data", "destination": "data.csv"}]}}
        }));

        assert_eq!(config.table_id().unwrap(), "in.c-ex-generic-test.data");
    }

    #[test]
    fn test_invalid_configs() {
        let cases = vec![
            (
                json!({"parameters": {"hub": {}}}),
                "The child node \"#connectionString\" at path \"root.parameters.hub\" must be configured.",
            ),
            (
                json!({"parameters": {"hub": hub_node()}}),
                "Please define one table in the input mapping, found 0 tables.",
            ),
            (
                json!({
                    "parameters": {"hub": hub_node()},
                    "storage": {"input": {"tables": [
                        {"source": "a", "destination": "a.csv"},
                        {"source": "b", "destination": "b.csv"}
                    ]}}
                }),
                "Please define one table in the input mapping, found 2 tables.",
            ),
            (
                json!({"parameters": {"hub": hub_node(), "tableId": "t", "mode": "column_value"}}),
                "Invalid configuration, missing \"column\" key, \"mode\" is set to \"column_value\".",
            ),
            (
                json!({"parameters": {"hub": hub_node(), "tableId": "t", "mode": "row_as_json", "column": "foo"}}),
                "Invalid configuration, \"column\" is configured, but \"mode\" is set to \"row_as_json\".",
            ),
            (
                json!({"parameters": {"hub": hub_node(), "tableId": "t", "batchSize": 0}}),
                "Invalid configuration, \"batchSize\" must be a positive integer.",
            ),
        ];

        for (value, expected) in cases {
            let err = parse(value).validate(Action::Run).unwrap_err();
            assert!(err.is_user_error());
            assert_eq!(err.to_string(), expected);
        }
    }

    #[test]
    fn test_test_connection_needs_only_hub() {
        let config = parse(json!({"action": "testConnection", "parameters": {"hub": hub_node()}}));

        assert_eq!(config.action, Action::TestConnection);
        assert!(config.validate(Action::TestConnection).is_ok());
        assert!(config.validate(Action::Run).is_err());
    }

    #[test]
    fn test_secrets_include_access_key() {
        let config = parse(json!({"parameters": {"hub": hub_node()}}));
        let secrets = config.secrets();

        assert!(secrets.contains(&"ghi"));
        assert_eq!(secrets.len(), 2);
    }
}
