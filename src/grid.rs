//! The ragged table handed to the spreadsheet writer.

use serde::{Deserialize, Serialize};

/// One table row. Cells are already trimmed.
pub type Row = Vec<String>;

/// Ordered rows of string cells.
///
/// Rows are never padded, so two rows may have different lengths. An empty
/// row is a section separator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Grid {
    rows: Vec<Row>,
}

impl Grid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn push_row(&mut self, row: Row) {
        self.rows.push(row);
    }

    pub fn extend_rows(&mut self, rows: impl IntoIterator<Item = Row>) {
        self.rows.extend(rows);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Length of the widest row.
    pub fn column_count(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Per-column width hint: the longest cell (in characters) of each
    /// column, capped at `max_width`.
    pub fn column_widths(&self, max_width: usize) -> Vec<usize> {
        let mut widths = vec![0usize; self.column_count()];
        for row in &self.rows {
            for (col, cell) in row.iter().enumerate() {
                let w = cell.chars().count().min(max_width);
                widths[col] = widths[col].max(w);
            }
        }
        widths
    }
}

impl From<Vec<Row>> for Grid {
    fn from(rows: Vec<Row>) -> Self {
        Self { rows }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(rows: &[&[&str]]) -> Grid {
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect::<Vec<Row>>()
            .into()
    }

    #[test]
    fn column_count_uses_widest_row() {
        let g = grid(&[&["a", "b", "c"], &[], &["d"]]);
        assert_eq!(g.column_count(), 3);
        assert_eq!(g.len(), 3);
    }

    #[test]
    fn column_widths_are_capped() {
        let long = "x".repeat(80);
        let g = grid(&[&["abc", &long], &["abcdef"]]);
        assert_eq!(g.column_widths(50), vec![6, 50]);
    }

    #[test]
    fn column_widths_count_chars_not_bytes() {
        let g = grid(&[&["Qté", "été"]]);
        assert_eq!(g.column_widths(50), vec![3, 3]);
    }

    #[test]
    fn empty_grid() {
        let g = Grid::new();
        assert!(g.is_empty());
        assert_eq!(g.column_count(), 0);
        assert!(g.column_widths(50).is_empty());
    }
}
