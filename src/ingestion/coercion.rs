//! Cell parsing shared by schema inference and batch coercion.
//!
//! Inference asks "does every value parse as X"; coercion asks "turn this
//! value into X or fail". Both go through the same parsers so a column
//! inferred as X never fails coercion to X within the first batch.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::error::{IngestError, Result};
use crate::ingestion::batch::{RecordBatch, Scalar, TypedBatch};
use crate::ingestion::schema_inference::{ColumnSchema, SemanticType};

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

pub fn parse_integer(s: &str) -> Option<i64> {
    s.trim().parse::<i64>().ok()
}

/// Finite decimal numbers only; `nan` and `inf` spellings are text.
pub fn parse_float(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Whole numbers, including float spellings such as `3.0` or `1e3`.
pub fn parse_whole_number(s: &str) -> Option<i64> {
    if let Some(v) = parse_integer(s) {
        return Some(v);
    }
    whole_number(parse_float(s)?)
}

/// `f` as an `i64` when it has no fractional part and fits.
pub fn whole_number(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

/// ISO-8601-like date/time strings. Values with an offset are normalised to UTC.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    // Cheap reject before trying every format: must start with YYYY-MM-DD.
    let bytes = s.as_bytes();
    if bytes.len() < 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return None;
    }

    for fmt in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ts);
        }
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.naive_utc());
    }
    if let Ok(ts) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(ts.naive_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

pub fn parse_boolean(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

/// Convert one non-blank cell to the requested type.
pub fn coerce_value(raw: &str, ty: SemanticType) -> Option<Scalar> {
    match ty {
        SemanticType::Integer => parse_whole_number(raw).map(Scalar::Int),
        SemanticType::Float => parse_float(raw).map(Scalar::Float),
        SemanticType::Text => Some(Scalar::Text(raw.to_string())),
        SemanticType::Timestamp => parse_timestamp(raw).map(Scalar::Timestamp),
        SemanticType::Boolean => parse_boolean(raw).map(Scalar::Bool),
    }
}

/// Coerce a whole batch to `schema`. The first failing cell aborts the batch.
pub fn coerce_batch(schema: &ColumnSchema, batch: &RecordBatch) -> Result<TypedBatch> {
    schema.conform(batch)?;

    let columns = schema.columns();
    let mut rows = Vec::with_capacity(batch.num_rows());
    for (row_idx, row) in batch.rows().iter().enumerate() {
        let mut typed = Vec::with_capacity(columns.len());
        for (col, cell) in columns.iter().zip(row.iter()) {
            let value = match cell {
                None => Scalar::Null,
                Some(raw) => coerce_value(raw, col.data_type).ok_or_else(|| {
                    IngestError::TypeCoercion(format!(
                        "column '{}' at line {}: cannot read {:?} as {}",
                        col.name,
                        batch.line(row_idx).unwrap_or(0),
                        raw,
                        col.data_type
                    ))
                })?,
            };
            typed.push(value);
        }
        rows.push(typed);
    }

    Ok(TypedBatch {
        index: batch.index(),
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::schema_inference::ColumnDef;

    #[test]
    fn test_parse_timestamp_variants() {
        let expected = NaiveDate::from_ymd_opt(2021, 1, 1)
            .unwrap()
            .and_hms_opt(0, 30, 10)
            .unwrap();
        assert_eq!(parse_timestamp("2021-01-01 00:30:10"), Some(expected));
        assert_eq!(parse_timestamp("2021-01-01T00:30:10"), Some(expected));
        assert_eq!(parse_timestamp("2021-01-01T01:30:10+01:00"), Some(expected));
        assert_eq!(
            parse_timestamp("2021-01-01"),
            NaiveDate::from_ymd_opt(2021, 1, 1).unwrap().and_hms_opt(0, 0, 0)
        );
        assert_eq!(parse_timestamp("01/01/2021"), None);
        assert_eq!(parse_timestamp("N"), None);
    }

    #[test]
    fn test_whole_numbers() {
        assert_eq!(parse_whole_number("3"), Some(3));
        assert_eq!(parse_whole_number(" 3.0 "), Some(3));
        assert_eq!(parse_whole_number("3.5"), None);
        assert_eq!(parse_whole_number("abc"), None);
        assert_eq!(whole_number(-2.0), Some(-2));
        assert_eq!(whole_number(1e30), None);
    }

    #[test]
    fn test_non_finite_spellings_are_not_numbers() {
        for token in ["nan", "NaN", "inf", "-inf", "Infinity"] {
            assert_eq!(parse_float(token), None, "{token}");
            assert_eq!(coerce_value(token, SemanticType::Float), None, "{token}");
        }
        assert_eq!(parse_float("1e3"), Some(1000.0));

        let codes = RecordBatch::from_rows(
            0,
            &["code"],
            vec![vec![Some("nan")], vec![Some("inf")], vec![Some("Infinity")]],
        );
        let schema = crate::ingestion::SchemaInference::new().infer_schema(&codes).unwrap();
        assert_eq!(schema.columns()[0].data_type, SemanticType::Text);
    }

    #[test]
    fn test_boolean_words() {
        for word in ["true", "T", "yes", "Y", "1"] {
            assert_eq!(parse_boolean(word), Some(true), "{word}");
        }
        for word in ["false", "f", "No", "n", "0"] {
            assert_eq!(parse_boolean(word), Some(false), "{word}");
        }
        assert_eq!(parse_boolean("maybe"), None);
        assert_eq!(parse_boolean("2"), None);
    }

    #[test]
    fn test_coerce_batch_nulls_and_errors() {
        let schema = ColumnSchema::new(vec![
            ColumnDef::new("passenger_count", SemanticType::Integer),
            ColumnDef::new("fare", SemanticType::Float),
        ]);
        let ok = RecordBatch::from_rows(
            0,
            &["passenger_count", "fare"],
            vec![vec![Some("2"), Some("7")], vec![None, Some("3.5")]],
        );
        let typed = coerce_batch(&schema, &ok).unwrap();
        assert_eq!(typed.rows[0], vec![Scalar::Int(2), Scalar::Float(7.0)]);
        assert_eq!(typed.rows[1], vec![Scalar::Null, Scalar::Float(3.5)]);

        let bad = RecordBatch::from_rows(
            1,
            &["passenger_count", "fare"],
            vec![vec![Some("2"), Some("1")], vec![Some("1.5"), Some("1")]],
        );
        let err = coerce_batch(&schema, &bad).unwrap_err();
        match err {
            IngestError::TypeCoercion(msg) => {
                assert!(msg.contains("passenger_count"));
                assert!(msg.contains("line 3"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
