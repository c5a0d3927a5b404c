//! Raw bytes to [`Table`]: size ceiling, format sniffing, encoding and
//! delimiter detection, plus the `clean` transform.

pub mod delimited;
pub mod excel;
pub mod utils;

use std::time::Instant;

use crate::error::IngestError;
use crate::models::Table;

pub const MIN_COLUMNS: usize = 2;

/// Loads `content` into a table. The size check runs before any parsing.
pub fn load(content: &[u8], size_limit: usize) -> Result<Table, IngestError> {
    if content.len() > size_limit {
        return Err(IngestError::SizeExceeded {
            size: content.len(),
            limit: size_limit,
        });
    }

    let start = Instant::now();
    let table = if excel::is_workbook(content) {
        excel::parse(content)?
    } else {
        let (text, encoding) = delimited::decode(content)?;
        let delimiter = delimited::detect_delimiter(&text);
        tracing::debug!(
            "decoded as {}, delimiter {:?}",
            encoding.name(),
            delimiter as char
        );
        delimited::parse(&text, delimiter)?
    };

    tracing::info!(
        "Loaded table with {} rows and {} columns in {:?}",
        table.n_rows(),
        table.n_columns(),
        start.elapsed()
    );
    Ok(table)
}

/// Returns a new table without duplicate rows (first occurrence kept) and,
/// when `drop_missing` is set, without rows holding any missing value.
pub fn clean(table: &Table, drop_missing: bool) -> Table {
    let mut duplicate = vec![false; table.n_rows()];
    for row in table.duplicate_rows() {
        duplicate[row] = true;
    }

    let cleaned = table.retain_rows(|row| {
        !duplicate[row] && !(drop_missing && table.row_has_missing(row))
    });

    tracing::info!(
        "Cleaning kept {} of {} rows",
        cleaned.n_rows(),
        table.n_rows()
    );
    cleaned
}
