use chrono::NaiveDateTime;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;

use crate::error::TableError;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single typed cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Missing,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
}

/// Hashable view of a [`Value`], used for duplicate detection and distinct counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKey<'a> {
    Missing,
    Bool(bool),
    Int(i64),
    Float(u64),
    Text(&'a str),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn key(&self) -> ValueKey<'_> {
        match self {
            Value::Missing => ValueKey::Missing,
            Value::Bool(b) => ValueKey::Bool(*b),
            Value::Int(i) => ValueKey::Int(*i),
            // -0.0 and 0.0 must collide
            Value::Float(f) => ValueKey::Float(if *f == 0.0 { 0 } else { f.to_bits() }),
            Value::Text(s) => ValueKey::Text(s),
            Value::Timestamp(t) => ValueKey::Timestamp(*t),
        }
    }

    fn digest_into(&self, hasher: &mut Sha256) {
        match self {
            Value::Missing => hasher.update([0u8]),
            Value::Bool(b) => hasher.update([1u8, u8::from(*b)]),
            Value::Int(i) => {
                hasher.update([2u8]);
                hasher.update(i.to_le_bytes());
            }
            Value::Float(f) => {
                hasher.update([3u8]);
                hasher.update(f.to_bits().to_le_bytes());
            }
            Value::Text(s) => {
                hasher.update([4u8]);
                hasher.update((s.len() as u64).to_le_bytes());
                hasher.update(s.as_bytes());
            }
            Value::Timestamp(t) => {
                hasher.update([5u8]);
                hasher.update(t.and_utc().timestamp_micros().to_le_bytes());
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Missing => write!(f, "NaN"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
            Value::Timestamp(t) => write!(f, "{}", t.format(TIMESTAMP_FORMAT)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn missing_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_missing()).count()
    }

    pub fn distinct_count(&self) -> usize {
        self.values
            .iter()
            .filter(|v| !v.is_missing())
            .map(Value::key)
            .collect::<HashSet<_>>()
            .len()
    }
}

/// Ordered, named, equal-length columns. Never mutated in place: transforms
/// such as [`Table::retain_rows`] return a new table.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    n_rows: usize,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Result<Self, TableError> {
        let n_rows = columns.first().map_or(0, |c| c.values.len());

        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(TableError::DuplicateColumn(column.name.clone()));
            }
            if column.values.len() != n_rows {
                return Err(TableError::RaggedColumn {
                    column: column.name.clone(),
                    found: column.values.len(),
                    expected: n_rows,
                });
            }
        }

        Ok(Self { columns, n_rows })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn missing_cells(&self) -> usize {
        self.columns.iter().map(Column::missing_count).sum()
    }

    fn row_key(&self, row: usize) -> Vec<ValueKey<'_>> {
        self.columns.iter().map(|c| c.values[row].key()).collect()
    }

    pub fn row_has_missing(&self, row: usize) -> bool {
        self.columns.iter().any(|c| c.values[row].is_missing())
    }

    /// Indices of rows that repeat an earlier row exactly.
    pub fn duplicate_rows(&self) -> Vec<usize> {
        let mut seen = HashSet::with_capacity(self.n_rows);
        (0..self.n_rows)
            .filter(|&row| !seen.insert(self.row_key(row)))
            .collect()
    }

    pub fn duplicate_row_count(&self) -> usize {
        self.duplicate_rows().len()
    }

    /// New table keeping only rows for which `keep` returns true.
    pub fn retain_rows(&self, keep: impl Fn(usize) -> bool) -> Table {
        let kept: Vec<usize> = (0..self.n_rows).filter(|&row| keep(row)).collect();
        let columns = self
            .columns
            .iter()
            .map(|c| Column {
                name: c.name.clone(),
                values: kept.iter().map(|&row| c.values[row].clone()).collect(),
            })
            .collect();

        Table {
            columns,
            n_rows: kept.len(),
        }
    }

    /// First `n` rows rendered as a right-aligned text grid with a header line.
    pub fn head_text(&self, n: usize) -> String {
        let n = n.min(self.n_rows);
        let cells: Vec<Vec<String>> = self
            .columns
            .iter()
            .map(|c| c.values[..n].iter().map(Value::to_string).collect())
            .collect();
        let widths: Vec<usize> = self
            .columns
            .iter()
            .zip(&cells)
            .map(|(c, values)| {
                values
                    .iter()
                    .map(|v| v.chars().count())
                    .chain(std::iter::once(c.name.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let mut lines = Vec::with_capacity(n + 1);
        lines.push(
            self.columns
                .iter()
                .zip(&widths)
                .map(|(c, w)| format!("{:>width$}", c.name, width = w))
                .collect::<Vec<_>>()
                .join("  "),
        );
        for row in 0..n {
            lines.push(
                cells
                    .iter()
                    .zip(&widths)
                    .map(|(values, w)| format!("{:>width$}", values[row], width = w))
                    .collect::<Vec<_>>()
                    .join("  "),
            );
        }
        lines.join("\n")
    }

    /// SHA-256 over column names and every cell, in order.
    pub fn content_digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update((self.columns.len() as u64).to_le_bytes());
        hasher.update((self.n_rows as u64).to_le_bytes());
        for column in &self.columns {
            hasher.update((column.name.len() as u64).to_le_bytes());
            hasher.update(column.name.as_bytes());
            for value in &column.values {
                value.digest_into(&mut hasher);
            }
        }
        hasher.finalize().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::new(vec![
            Column::new("city", vec![
                Value::Text("Paris".into()),
                Value::Text("Lyon".into()),
                Value::Text("Paris".into()),
            ]),
            Column::new("price", vec![Value::Int(100), Value::Float(2.5), Value::Int(100)]),
        ])
        .unwrap()
    }

    #[test]
    fn rejects_ragged_and_duplicate_columns() {
        let ragged = Table::new(vec![
            Column::new("a", vec![Value::Int(1), Value::Int(2)]),
            Column::new("b", vec![Value::Int(1)]),
        ]);
        assert_eq!(
            ragged.unwrap_err(),
            TableError::RaggedColumn {
                column: "b".into(),
                found: 1,
                expected: 2
            }
        );

        let duplicated = Table::new(vec![
            Column::new("a", vec![Value::Int(1)]),
            Column::new("a", vec![Value::Int(2)]),
        ]);
        assert_eq!(
            duplicated.unwrap_err(),
            TableError::DuplicateColumn("a".into())
        );
    }

    #[test]
    fn finds_duplicate_rows() {
        let table = sample();
        assert_eq!(table.duplicate_rows(), vec![2]);
        assert_eq!(table.duplicate_row_count(), 1);
    }

    #[test]
    fn retain_rows_returns_a_new_table() {
        let table = sample();
        let trimmed = table.retain_rows(|row| row != 1);
        assert_eq!(trimmed.n_rows(), 2);
        assert_eq!(table.n_rows(), 3);
        assert_eq!(trimmed.column("price").unwrap().values, vec![Value::Int(100), Value::Int(100)]);
    }

    #[test]
    fn head_text_is_aligned() {
        let text = sample().head_text(2);
        assert_eq!(text, " city  price\nParis    100\n Lyon    2.5");
    }

    #[test]
    fn digest_tracks_content() {
        let table = sample();
        assert_eq!(table.content_digest(), sample().content_digest());
        let changed = table.retain_rows(|row| row < 2);
        assert_ne!(table.content_digest(), changed.content_digest());
    }

    #[test]
    fn zero_and_negative_zero_share_a_key() {
        assert_eq!(Value::Float(0.0).key(), Value::Float(-0.0).key());
    }
}
