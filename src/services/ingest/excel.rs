use std::io::Cursor;

use calamine::{open_workbook_from_rs, Data, Range, Reader, Xlsx};
use chrono::{Duration, NaiveDate, NaiveDateTime};

use super::utils::{parse_cell, unique_column_names};
use super::MIN_COLUMNS;
use crate::error::IngestError;
use crate::models::{Column, Table, Value};

pub const ZIP_MAGIC: [u8; 4] = *b"PK\x03\x04";

pub fn is_workbook(content: &[u8]) -> bool {
    content.starts_with(&ZIP_MAGIC)
}

/// Converts an Excel serial day number (1900 date system) to a timestamp.
pub fn serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (serial * 86_400_000.0).round();
    if !millis.is_finite() || millis.abs() > i64::MAX as f64 {
        return None;
    }
    epoch.checked_add_signed(Duration::milliseconds(millis as i64))
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Empty | Data::Error(_) => Value::Missing,
        Data::Int(i) => Value::Int(*i),
        Data::Float(f) => Value::Float(*f),
        Data::Bool(b) => Value::Bool(*b),
        Data::String(s) => parse_cell(s),
        Data::DateTime(d) => {
            serial_to_datetime(d.as_f64()).map_or(Value::Missing, Value::Timestamp)
        }
        Data::DateTimeIso(s) => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
            .map(Value::Timestamp)
            .unwrap_or_else(|_| parse_cell(s)),
        _ => parse_cell(&cell.to_string()),
    }
}

fn range_to_table(sheet_name: &str, range: &Range<Data>) -> Result<Table, IngestError> {
    let mut rows = range
        .rows()
        .skip_while(|row| row.iter().all(|c| matches!(c, Data::Empty)));

    let header = rows
        .next()
        .ok_or_else(|| IngestError::EmptyContent(format!("sheet '{}' has no header row", sheet_name)))?;
    if header.len() < MIN_COLUMNS {
        return Err(IngestError::InsufficientColumns {
            found: header.len(),
            required: MIN_COLUMNS,
        });
    }

    let names = unique_column_names(header.iter().map(|cell| cell.to_string()));
    let mut values: Vec<Vec<Value>> = vec![Vec::new(); names.len()];

    for row in rows {
        if row.iter().all(|c| matches!(c, Data::Empty)) {
            continue;
        }
        for (idx, column) in values.iter_mut().enumerate() {
            column.push(row.get(idx).map_or(Value::Missing, cell_value));
        }
    }

    if values[0].is_empty() {
        return Err(IngestError::EmptyContent(format!(
            "sheet '{}' has no data rows",
            sheet_name
        )));
    }

    let columns = names
        .into_iter()
        .zip(values)
        .map(|(name, values)| Column::new(name, values))
        .collect();

    Table::new(columns).map_err(|e| IngestError::MalformedContent {
        line: 1,
        reason: e.to_string(),
    })
}

/// Reads the first non-empty worksheet of an XLSX workbook.
pub fn parse(content: &[u8]) -> Result<Table, IngestError> {
    let cursor = Cursor::new(content);
    let mut workbook: Xlsx<_> = open_workbook_from_rs(cursor).map_err(|e| {
        IngestError::MalformedContent {
            line: 0,
            reason: format!("failed to open workbook: {}", e),
        }
    })?;

    let sheet_names = workbook.sheet_names().to_vec();
    tracing::info!("Workbook has {} sheets", sheet_names.len());

    for sheet_name in &sheet_names {
        match workbook.worksheet_range(sheet_name) {
            Ok(range) if !range.is_empty() => {
                tracing::info!("Reading sheet {}", sheet_name);
                return range_to_table(sheet_name, &range);
            }
            Ok(_) => tracing::warn!("Sheet {} is empty, skipping", sheet_name),
            Err(e) => tracing::warn!("Failed to read worksheet {}: {}", sheet_name, e),
        }
    }

    Err(IngestError::EmptyContent(
        "workbook has no non-empty worksheet".to_string(),
    ))
}
