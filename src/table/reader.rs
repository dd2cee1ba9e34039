use crate::table::Row;
use crate::{Error, Result};
use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Forward-only cursor over the rows of a table.
///
/// The header is available before the first row is read. `next_row`
/// returns `Ok(None)` once the source is exhausted.
pub trait RowSource: Send {
    fn header(&self) -> &[String];

    fn next_row(&mut self) -> Result<Option<Row>>;

    /// Name used in error messages.
    fn table_name(&self) -> &str;
}

/// Reads rows from a CSV file whose first record is the header.
pub struct CsvRowSource {
    table: String,
    header: Arc<[String]>,
    records: csv::StringRecordsIntoIter<File>,
    row_number: u64,
}

impl CsvRowSource {
    pub fn open(path: &Path, table: impl Into<String>) -> Result<Self> {
        if !path.exists() {
            return Err(Error::InvalidData(format!("CSV file {:?} not found.", path)));
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)?;

        let header: Vec<String> = reader.headers()?.iter().map(|s| s.to_string()).collect();
        if header.is_empty() || header.iter().all(|name| name.is_empty()) {
            return Err(Error::InvalidData("Missing CSV header.".to_string()));
        }

        debug!("Opened table {:?} with {} columns", path, header.len());

        Ok(Self {
            table: table.into(),
            header: header.into(),
            records: reader.into_records(),
            row_number: 0,
        })
    }
}

impl RowSource for CsvRowSource {
    fn header(&self) -> &[String] {
        &self.header
    }

    fn next_row(&mut self) -> Result<Option<Row>> {
        let record = match self.records.next() {
            Some(record) => record?,
            None => return Ok(None),
        };
        self.row_number += 1;

        if record.len() != self.header.len() {
            return Err(Error::InvalidData(format!(
                "Row {} of table \"{}\" has {} cells, header has {} columns.",
                self.row_number,
                self.table,
                record.len(),
                self.header.len()
            )));
        }

        let cells = record.iter().map(|s| s.to_string()).collect();
        Ok(Some(Row::new(self.header.clone(), cells)))
    }

    fn table_name(&self) -> &str {
        &self.table
    }
}

/// Serves rows kept in memory.
pub struct MemoryRowSource {
    table: String,
    header: Arc<[String]>,
    rows: VecDeque<Vec<String>>,
}

impl MemoryRowSource {
    pub fn new<H, R, C>(header: H, rows: R) -> Self
    where
        H: IntoIterator,
        H::Item: Into<String>,
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            table: "memory".to_string(),
            header: header.into_iter().map(Into::into).collect::<Vec<_>>().into(),
            rows: rows
                .into_iter()
                .map(|row| row.into_iter().map(Into::into).collect())
                .collect(),
        }
    }

    pub fn with_table_name(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl RowSource for MemoryRowSource {
    fn header(&self) -> &[String] {
        &self.header
    }

    fn next_row(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.pop_front().map(|cells| Row::new(self.header.clone(), cells)))
    }

    fn table_name(&self) -> &str {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_csv(dir: &TempDir, content: &str) -> std::path::PathBuf {
        let path = dir.path().join("data.csv");
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_csv_source_reads_rows() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "id,name\n1,\"Alice, A.\"\n2,Bob\n");

        let mut source = CsvRowSource::open(&path, "in.c-test.data").unwrap();
        assert_eq!(source.header(), &["id".to_string(), "name".to_string()]);

        let row = source.next_row().unwrap().unwrap();
        assert_eq!(row.cells(), &["1".to_string(), "Alice, A.".to_string()]);
        let row = source.next_row().unwrap().unwrap();
        assert_eq!(row.get(1), Some("Bob"));
        assert!(source.next_row().unwrap().is_none());
    }

    #[test]
    fn test_csv_source_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = CsvRowSource::open(&dir.path().join("missing.csv"), "t").err().unwrap();
        assert!(!err.is_user_error());
    }

    #[test]
    fn test_csv_source_missing_header() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "");
        let err = CsvRowSource::open(&path, "t").err().unwrap();
        assert_eq!(err.to_string(), "Invalid data: Missing CSV header.");
    }

    #[test]
    fn test_csv_source_rejects_ragged_rows() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "id,name\n1\n");

        let mut source = CsvRowSource::open(&path, "t").unwrap();
        let err = source.next_row().unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_memory_source() {
        let mut source = MemoryRowSource::new(["a", "b"], vec![vec!["1", "2"]]);
        assert_eq!(source.remaining(), 1);

        let row = source.next_row().unwrap().unwrap();
        assert_eq!(row.iter().collect::<Vec<_>>(), vec![("a", "1"), ("b", "2")]);
        assert!(source.next_row().unwrap().is_none());
    }
}
