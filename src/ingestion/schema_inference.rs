//! Schema Inference - Deterministic column typing from the first batch
//!
//! The schema is derived once per run and is authoritative afterwards: later
//! batches are coerced to it, never re-inferred.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};
use crate::ingestion::batch::RecordBatch;
use crate::ingestion::coercion::{parse_float, parse_integer, parse_timestamp};

/// Semantic column type. Every type is nullable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Integer,
    Float,
    Text,
    Timestamp,
    Boolean,
}

impl SemanticType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticType::Integer => "integer",
            SemanticType::Float => "float",
            SemanticType::Text => "text",
            SemanticType::Timestamp => "timestamp",
            SemanticType::Boolean => "boolean",
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SemanticType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "integer" | "int" | "int64" | "bigint" => Ok(SemanticType::Integer),
            "float" | "float64" | "double" => Ok(SemanticType::Float),
            "text" | "string" | "varchar" => Ok(SemanticType::Text),
            "timestamp" | "datetime" => Ok(SemanticType::Timestamp),
            "boolean" | "bool" => Ok(SemanticType::Boolean),
            other => Err(format!(
                "unknown column type '{}' (expected integer, float, text, timestamp or boolean)",
                other
            )),
        }
    }
}

/// One (name, type) pair of a `ColumnSchema`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: SemanticType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: SemanticType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Ordered column names and types for a run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    columns: Vec<ColumnDef>,
}

impl ColumnSchema {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Reject a batch whose columns differ in name or order.
    pub fn conform(&self, batch: &RecordBatch) -> Result<()> {
        let same = batch.columns().len() == self.columns.len()
            && self.names().zip(batch.columns()).all(|(a, b)| a == b);
        if same {
            return Ok(());
        }
        Err(IngestError::SchemaMismatch(format!(
            "batch {} has columns [{}], expected [{}]",
            batch.index(),
            batch.columns().join(", "),
            self.names().collect::<Vec<_>>().join(", ")
        )))
    }
}

/// Schema Inference Engine
///
/// Per column, in priority order: integer, float, timestamp, else text.
/// Blank cells are ignored; an all-blank column is text. Pinned types skip
/// inference for their column.
#[derive(Clone, Debug, Default)]
pub struct SchemaInference {
    pinned: BTreeMap<String, SemanticType>,
}

impl SchemaInference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pinned_types(pinned: BTreeMap<String, SemanticType>) -> Self {
        Self { pinned }
    }

    pub fn infer_schema(&self, batch: &RecordBatch) -> Result<ColumnSchema> {
        for name in self.pinned.keys() {
            if !batch.columns().iter().any(|c| c == name) {
                return Err(IngestError::SchemaMismatch(format!(
                    "column type given for '{}', which is not in the source header",
                    name
                )));
            }
        }

        let columns = batch
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let data_type = match self.pinned.get(name) {
                    Some(ty) => *ty,
                    None => infer_column(batch.column_values(idx)),
                };
                ColumnDef::new(name.clone(), data_type)
            })
            .collect();

        Ok(ColumnSchema::new(columns))
    }
}

fn infer_column<'a>(values: impl Iterator<Item = &'a str>) -> SemanticType {
    let mut seen = false;
    let mut all_int = true;
    let mut all_float = true;
    let mut all_ts = true;

    for v in values {
        seen = true;
        if all_int && parse_integer(v).is_none() {
            all_int = false;
        }
        if !all_int && all_float && parse_float(v).is_none() {
            all_float = false;
        }
        if all_ts && parse_timestamp(v).is_none() {
            all_ts = false;
        }
        if !all_int && !all_float && !all_ts {
            break;
        }
    }

    if !seen {
        SemanticType::Text
    } else if all_int {
        SemanticType::Integer
    } else if all_float {
        SemanticType::Float
    } else if all_ts {
        SemanticType::Timestamp
    } else {
        SemanticType::Text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trips() -> RecordBatch {
        RecordBatch::from_rows(
            0,
            &["VendorID", "tpep_pickup_datetime", "trip_distance", "store_and_fwd_flag", "empty"],
            vec![
                vec![Some("1"), Some("2021-01-01 00:30:10"), Some("2.10"), Some("N"), None],
                vec![None, Some("2021-01-01 00:51:20"), Some("0.2"), Some("N"), None],
                vec![Some("2"), Some("2021-01-01 00:43:30"), Some("14"), Some("Y"), None],
            ],
        )
    }

    #[test]
    fn test_priority_order() {
        let schema = SchemaInference::new().infer_schema(&trips()).unwrap();
        let types: Vec<SemanticType> = schema.columns().iter().map(|c| c.data_type).collect();
        assert_eq!(
            types,
            vec![
                SemanticType::Integer,
                SemanticType::Timestamp,
                SemanticType::Float,
                SemanticType::Text,
                SemanticType::Text,
            ]
        );
    }

    #[test]
    fn test_inference_is_deterministic() {
        let inference = SchemaInference::new();
        let a = inference.infer_schema(&trips()).unwrap();
        let b = inference.infer_schema(&trips()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_pinned_types() {
        let mut pinned = BTreeMap::new();
        pinned.insert("VendorID".to_string(), SemanticType::Float);
        pinned.insert("store_and_fwd_flag".to_string(), SemanticType::Boolean);
        let schema = SchemaInference::with_pinned_types(pinned)
            .infer_schema(&trips())
            .unwrap();
        assert_eq!(schema.columns()[0].data_type, SemanticType::Float);
        assert_eq!(schema.columns()[3].data_type, SemanticType::Boolean);

        let mut unknown = BTreeMap::new();
        unknown.insert("nope".to_string(), SemanticType::Integer);
        let err = SchemaInference::with_pinned_types(unknown)
            .infer_schema(&trips())
            .unwrap_err();
        assert!(matches!(err, IngestError::SchemaMismatch(_)));
    }

    #[test]
    fn test_conform_rejects_renamed_column() {
        let schema = SchemaInference::new().infer_schema(&trips()).unwrap();
        let renamed = RecordBatch::from_rows(
            1,
            &["VendorID", "pickup", "trip_distance", "store_and_fwd_flag", "empty"],
            vec![vec![Some("1"), None, None, None, None]],
        );
        assert!(matches!(
            schema.conform(&renamed),
            Err(IngestError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_semantic_type_from_str() {
        assert_eq!("Int64".parse::<SemanticType>().unwrap(), SemanticType::Integer);
        assert_eq!("float64".parse::<SemanticType>().unwrap(), SemanticType::Float);
        assert_eq!("string".parse::<SemanticType>().unwrap(), SemanticType::Text);
        assert!("money".parse::<SemanticType>().is_err());
    }
}
