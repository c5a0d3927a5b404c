use std::collections::HashSet;

use crate::models::Value;

/// Cell tokens read as missing in addition to the empty cell.
pub const MISSING_TOKENS: [&str; 9] = ["NA", "N/A", "NaN", "nan", "null", "NULL", "None", "#N/A", "-"];

pub fn is_missing_token(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty() || MISSING_TOKENS.contains(&trimmed)
}

/// Header names made unique: blanks become `column_<n>`, repeats get `_<k>`.
pub fn unique_column_names<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut existing_names = HashSet::new();
    raw.into_iter()
        .enumerate()
        .map(|(idx, name)| {
            let trimmed = name.as_ref().trim();
            let base = if trimmed.is_empty() {
                format!("column_{}", idx + 1)
            } else {
                trimmed.to_string()
            };

            let mut candidate = base.clone();
            let mut counter = 1;
            while !existing_names.insert(candidate.clone()) {
                candidate = format!("{}_{}", base, counter);
                counter += 1;
            }
            candidate
        })
        .collect()
}

/// Parses one delimited-text cell into its narrowest scalar value.
pub fn parse_cell(raw: &str) -> Value {
    let trimmed = raw.trim();
    if is_missing_token(trimmed) {
        return Value::Missing;
    }

    if trimmed.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }

    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::Int(i);
    }
    match trimmed.parse::<f64>() {
        Ok(f) if f.is_finite() => Value::Float(f),
        _ => Value::Text(trimmed.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_and_repeated_headers_are_renamed() {
        let names = unique_column_names(["price", " ", "price", "price", "size"]);
        assert_eq!(names, vec!["price", "column_2", "price_1", "price_2", "size"]);
    }

    #[test]
    fn parses_scalars() {
        assert_eq!(parse_cell(" 42 "), Value::Int(42));
        assert_eq!(parse_cell("2.5"), Value::Float(2.5));
        assert_eq!(parse_cell("TRUE"), Value::Bool(true));
        assert_eq!(parse_cell("Paris"), Value::Text("Paris".into()));
        assert_eq!(parse_cell("inf"), Value::Text("inf".into()));
    }

    #[test]
    fn missing_tokens_are_missing() {
        for token in MISSING_TOKENS.iter().chain(["", "  "].iter()) {
            assert_eq!(parse_cell(token), Value::Missing, "token {token:?}");
        }
    }
}
