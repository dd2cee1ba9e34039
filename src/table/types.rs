use std::sync::Arc;

/// One data row of the input table together with the table header.
///
/// Rows are immutable once read; the header is shared between all rows of
/// the same table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    header: Arc<[String]>,
    cells: Vec<String>,
}

impl Row {
    pub fn new(header: Arc<[String]>, cells: Vec<String>) -> Self {
        Self { header, cells }
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn cells(&self) -> &[String] {
        &self.cells
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.cells.get(index).map(String::as_str)
    }

    /// Pairs every column name with the cell value at the same position.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.header
            .iter()
            .zip(self.cells.iter())
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}
