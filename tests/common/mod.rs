#![allow(dead_code)]

use hub_writer::config::Config;
use hub_writer::hub::{MemoryHub, SentBatch};
use hub_writer::message::{MessageMapper, RowAsJsonMapper};
use hub_writer::{ExportCoordinator, ExportOptions};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Options with small buffers so tests exercise flushing and backpressure.
pub fn test_options(batch_size: usize) -> ExportOptions {
    ExportOptions {
        batch_size,
        channel_capacity: 8,
        rows_per_turn: 5,
        max_in_flight: 4,
        ..ExportOptions::default()
    }
}

pub fn coordinator(hub: &Arc<MemoryHub>, batch_size: usize) -> ExportCoordinator {
    ExportCoordinator::new(hub.clone(), test_options(batch_size))
}

pub fn header(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

pub fn row_mapper(names: &[&str], partition_key: Option<&str>) -> MessageMapper {
    let mapper = RowAsJsonMapper::new(&header(names), "in.c-test.data", partition_key).unwrap();
    MessageMapper::RowAsJson(mapper)
}

/// Rows `["1"], ["2"], ...` for a single `id` column.
pub fn id_rows(count: usize) -> Vec<Vec<String>> {
    (1..=count).map(|i| vec![i.to_string()]).collect()
}

pub fn batch_sizes(sent: &[SentBatch]) -> Vec<usize> {
    sent.iter().map(|b| b.bodies.len()).collect()
}

pub fn all_bodies(sent: &[SentBatch]) -> Vec<Value> {
    sent.iter().flat_map(|b| b.bodies.clone()).collect()
}

/// Creates a data dir with `config.json` and `in/tables/<destination>`.
pub fn data_dir(parameters: Value, csv: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    let tables = dir.path().join("in").join("tables");
    std::fs::create_dir_all(&tables).unwrap();
    std::fs::write(tables.join("data.csv"), csv).unwrap();

    let config = json!({
        "action": "run",
        "parameters": parameters,
        "storage": {
            "input": {
                "tables": [
                    {"source": "in.c-test.data", "destination": "data.csv", "columns": []}
                ]
            }
        }
    });
    std::fs::write(dir.path().join("config.json"), config.to_string()).unwrap();
    dir
}

pub fn hub_parameters(extra: Value) -> Value {
    let mut parameters = json!({
        "hub": {
            "#connectionString": "Endpoint=sb://test.servicebus.windows.net/;SharedAccessKeyName=writer;SharedAccessKey=c2VjcmV0",
            "eventHubName": "test-hub"
        }
    });
    if let (Some(target), Value::Object(extra)) = (parameters.as_object_mut(), extra) {
        target.extend(extra);
    }
    parameters
}

pub fn load_config(dir: &Path) -> Config {
    Config::from_file(dir.join("config.json")).unwrap()
}
