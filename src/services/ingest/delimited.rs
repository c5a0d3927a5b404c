use std::borrow::Cow;

use csv::{ReaderBuilder, Trim};
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};

use super::utils::{parse_cell, unique_column_names};
use super::MIN_COLUMNS;
use crate::error::IngestError;
use crate::models::{Column, Table, Value};

/// Tried in order when the content carries no byte-order mark.
pub const ENCODING_CANDIDATES: [&Encoding; 2] = [UTF_8, WINDOWS_1252];

/// Tried in order; a later candidate must produce strictly more fields to win.
pub const DELIMITER_CANDIDATES: [u8; 4] = [b',', b';', b'\t', b'|'];

/// Decodes `content` with the BOM-declared encoding, or the first candidate that
/// decodes cleanly. Text containing NUL is treated as binary and rejected.
pub fn decode(content: &[u8]) -> Result<(Cow<'_, str>, &'static Encoding), IngestError> {
    if let Some((encoding, bom_len)) = Encoding::for_bom(content) {
        return encoding
            .decode_without_bom_handling_and_without_replacement(&content[bom_len..])
            .filter(|text| !text.contains('\0'))
            .map(|text| (text, encoding))
            .ok_or_else(|| IngestError::UndecodableContent {
                tried: encoding.name().to_string(),
            });
    }

    for encoding in ENCODING_CANDIDATES {
        match encoding.decode_without_bom_handling_and_without_replacement(content) {
            Some(text) if !text.contains('\0') => return Ok((text, encoding)),
            _ => tracing::debug!("content does not decode as {}", encoding.name()),
        }
    }

    Err(IngestError::UndecodableContent {
        tried: ENCODING_CANDIDATES
            .iter()
            .map(|e| e.name())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

fn field_count(line: &str, delimiter: u8) -> usize {
    ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes())
        .records()
        .next()
        .and_then(Result::ok)
        .map_or(0, |record| record.len())
}

/// Picks the candidate splitting the first non-empty line into the most fields.
pub fn detect_delimiter(text: &str) -> u8 {
    let Some(first_line) = text.lines().find(|line| !line.trim().is_empty()) else {
        return DELIMITER_CANDIDATES[0];
    };

    let mut best = (DELIMITER_CANDIDATES[0], field_count(first_line, DELIMITER_CANDIDATES[0]));
    for &delimiter in &DELIMITER_CANDIDATES[1..] {
        let count = field_count(first_line, delimiter);
        if count > best.1 {
            best = (delimiter, count);
        }
    }
    best.0
}

fn malformed(err: &csv::Error) -> IngestError {
    IngestError::MalformedContent {
        line: err.position().map_or(0, |p| p.line()),
        reason: err.to_string(),
    }
}

/// Parses decoded delimited text. The first non-empty record is the header.
pub fn parse(text: &str, delimiter: u8) -> Result<Table, IngestError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let header = reader.headers().map_err(|e| malformed(&e))?.clone();
    if header.is_empty() || header.iter().all(|h| h.is_empty()) {
        return Err(IngestError::EmptyContent("no header row".to_string()));
    }
    if header.len() < MIN_COLUMNS {
        return Err(IngestError::InsufficientColumns {
            found: header.len(),
            required: MIN_COLUMNS,
        });
    }

    let names = unique_column_names(header.iter());
    let mut values: Vec<Vec<Value>> = vec![Vec::new(); names.len()];

    for record in reader.records() {
        let record = record.map_err(|e| malformed(&e))?;
        let line = record.position().map_or(0, |p| p.line());
        if record.len() > names.len() {
            return Err(IngestError::MalformedContent {
                line,
                reason: format!(
                    "row has {} fields but the header declares {}",
                    record.len(),
                    names.len()
                ),
            });
        }

        for (idx, column) in values.iter_mut().enumerate() {
            column.push(record.get(idx).map_or(Value::Missing, parse_cell));
        }
    }

    if values[0].is_empty() {
        return Err(IngestError::EmptyContent("header row has no data rows".to_string()));
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_utf8_then_falls_back_to_latin() {
        let (text, encoding) = decode("café,prix\n".as_bytes()).unwrap();
        assert_eq!(encoding, UTF_8);
        assert_eq!(text, "café,prix\n");

        let (text, encoding) = decode(b"caf\xe9,prix\n").unwrap();
        assert_eq!(encoding, WINDOWS_1252);
        assert_eq!(text, "café,prix\n");
    }

    #[test]
    fn honours_byte_order_marks() {
        let mut utf16 = vec![0xFF, 0xFE];
        for unit in "a,b\n1,2\n".encode_utf16() {
            utf16.extend_from_slice(&unit.to_le_bytes());
        }
        let (text, encoding) = decode(&utf16).unwrap();
        assert_eq!(encoding.name(), "UTF-16LE");
        assert_eq!(text, "a,b\n1,2\n");
    }

    #[test]
    fn binary_content_is_undecodable() {
        let err = decode(&[0x00, 0x01, 0x02, 0xFF]).unwrap_err();
        assert!(matches!(err, IngestError::UndecodableContent { .. }));
    }

    #[test]
    fn delimiter_with_most_fields_wins() {
        assert_eq!(detect_delimiter("a;b;c\n1;2;3"), b';');
        assert_eq!(detect_delimiter("\n\na\tb\n"), b'\t');
        assert_eq!(detect_delimiter("a|b|c|d"), b'|');
    }

    #[test]
    fn ties_keep_the_comma() {
        assert_eq!(detect_delimiter("a,b;c"), b',');
        assert_eq!(detect_delimiter("single"), b',');
    }

    #[test]
    fn short_rows_are_padded_and_long_rows_rejected() {
        let table = parse("a,b,c\n1,2\n", b',').unwrap();
        assert_eq!(table.column("c").unwrap().values, vec![Value::Missing]);

        let err = parse("a,b\n1,2\n3,4,5\n", b',').unwrap_err();
        assert_eq!(
            err,
            IngestError::MalformedContent {
                line: 3,
                reason: "row has 3 fields but the header declares 2".into()
            }
        );
    }

    #[test]
    fn header_only_is_empty() {
        let err = parse("a,b\n", b',').unwrap_err();
        assert!(matches!(err, IngestError::EmptyContent(_)));
    }
}
