use crate::config::{MappingMode, Parameters};
use crate::message::Message;
use crate::table::Row;
use crate::{Error, Result};
use serde_json::{Map, Value};
use tracing::debug;

/// Converts table rows into hub messages.
///
/// Column lookups are resolved once, when the mapper is built from the
/// table header; mapping a row never fails because of a missing column.
#[derive(Debug, Clone)]
pub enum MessageMapper {
    RowAsJson(RowAsJsonMapper),
    ColumnValue(ColumnValueMapper),
}

impl MessageMapper {
    pub fn from_parameters(params: &Parameters, header: &[String], table: &str) -> Result<Self> {
        let partition_key = params.partition_key_column.as_deref();
        match params.mode {
            MappingMode::RowAsJson => Ok(MessageMapper::RowAsJson(RowAsJsonMapper::new(
                header,
                table,
                partition_key,
            )?)),
            MappingMode::ColumnValue => {
                let column = params.column.as_deref().ok_or_else(|| {
                    Error::Config(format!(
                        "Invalid configuration, missing \"column\" key, \"mode\" is set to \"{}\".",
                        params.mode
                    ))
                })?;
                Ok(MessageMapper::ColumnValue(ColumnValueMapper::new(
                    header,
                    table,
                    column,
                    params.properties_column.as_deref(),
                    partition_key,
                )?))
            }
        }
    }

    /// Maps one row; `row_number` is 1-based and only used in error messages.
    pub fn map(&self, row: &Row, row_number: u64) -> Result<Message> {
        match self {
            MessageMapper::RowAsJson(mapper) => Ok(mapper.map(row)),
            MessageMapper::ColumnValue(mapper) => mapper.map(row, row_number),
        }
    }
}

/// Sends the whole row as a JSON document keyed by column name.
#[derive(Debug, Clone)]
pub struct RowAsJsonMapper {
    partition_key_index: Option<usize>,
}

impl RowAsJsonMapper {
    pub fn new(header: &[String], table: &str, partition_key_column: Option<&str>) -> Result<Self> {
        let partition_key_index = partition_key_column
            .map(|column| column_index(header, table, column))
            .transpose()?;

        Ok(Self { partition_key_index })
    }

    pub fn map(&self, row: &Row) -> Message {
        let body: Map<String, Value> = row
            .iter()
            .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
            .collect();

        Message::new(Value::Object(body))
            .with_partition_key(self.partition_key_index.and_then(|i| row.get(i)))
    }
}

/// Sends the content of a single column as the message body.
#[derive(Debug, Clone)]
pub struct ColumnValueMapper {
    column_index: usize,
    properties: Option<(String, usize)>,
    partition_key_index: Option<usize>,
}

impl ColumnValueMapper {
    pub fn new(
        header: &[String],
        table: &str,
        column: &str,
        properties_column: Option<&str>,
        partition_key_column: Option<&str>,
    ) -> Result<Self> {
        let value_index = column_index(header, table, column)?;
        let properties = properties_column
            .map(|c| column_index(header, table, c).map(|i| (c.to_string(), i)))
            .transpose()?;
        let partition_key_index = partition_key_column
            .map(|c| column_index(header, table, c))
            .transpose()?;

        Ok(Self {
            column_index: value_index,
            properties,
            partition_key_index,
        })
    }

    pub fn map(&self, row: &Row, row_number: u64) -> Result<Message> {
        let raw = row.get(self.column_index).unwrap_or_default();
        let body = match serde_json::from_str::<Value>(raw) {
            Ok(value) => value,
            Err(e) => {
                debug!(row = row_number, "Column value is not JSON, wrapping it: {}", e);
                let mut data = Map::new();
                data.insert("data".to_string(), Value::String(raw.to_string()));
                Value::Object(data)
            }
        };

        let mut message = Message::new(body);

        if let Some((column, index)) = &self.properties {
            let raw = row.get(*index).unwrap_or_default();
            if !raw.trim().is_empty() {
                message = message.with_properties(parse_properties(raw, column, row_number)?);
            }
        }

        Ok(message.with_partition_key(self.partition_key_index.and_then(|i| row.get(i))))
    }
}

fn parse_properties(raw: &str, column: &str, row_number: u64) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(properties)) => Ok(properties),
        Ok(_) => Err(Error::InvalidMessage(format!(
            "Invalid properties in column \"{}\" on row {}: values must be valid JSON objects, found a non-object value.",
            column, row_number
        ))),
        Err(e) => Err(Error::InvalidMessage(format!(
            "Invalid properties in column \"{}\" on row {}: values must be valid JSON objects. {}",
            column, row_number, e
        ))),
    }
}

fn column_index(header: &[String], table: &str, column: &str) -> Result<usize> {
    header
        .iter()
        .position(|name| name == column)
        .ok_or_else(|| Error::ColumnNotFound {
            column: column.to_string(),
            table: table.to_string(),
        })
}
