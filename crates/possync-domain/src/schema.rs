//! Field schema model and the on-disk schema file format.
//!
//! A table's schema is an ordered list of field descriptors loaded from
//! `<schema_dir>/<table>.json`. Schemas are immutable after load and drive
//! type conversion only; records may carry fields not present in the schema
//! (those are stored with best-effort typing).

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Declared type of a field, serialized as the single-letter codes used by
/// the terminals (`C`, `N`, `F`, `D`, `L`, `M`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    /// Free text, trimmed on conversion.
    #[serde(rename = "C")]
    Character,
    /// Fixed-decimal numeric.
    #[serde(rename = "N")]
    Numeric,
    /// Floating numeric.
    #[serde(rename = "F")]
    Float,
    /// Calendar date, received as `DD/MM/YYYY`.
    #[serde(rename = "D")]
    Date,
    /// Boolean flag.
    #[serde(rename = "L")]
    Logical,
    /// Long text, passed through untrimmed.
    #[serde(rename = "M")]
    Memo,
}

impl FieldType {
    /// Returns the wire code for this type.
    pub fn code(&self) -> char {
        match self {
            FieldType::Character => 'C',
            FieldType::Numeric => 'N',
            FieldType::Float => 'F',
            FieldType::Date => 'D',
            FieldType::Logical => 'L',
            FieldType::Memo => 'M',
        }
    }

    /// Looks up a type from its wire code.
    pub fn from_code(code: char) -> Option<Self> {
        match code.to_ascii_uppercase() {
            'C' => Some(FieldType::Character),
            'N' => Some(FieldType::Numeric),
            'F' => Some(FieldType::Float),
            'D' => Some(FieldType::Date),
            'L' => Some(FieldType::Logical),
            'M' => Some(FieldType::Memo),
            _ => None,
        }
    }
}

/// Descriptor for a single field of a logical table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Field (column) name.
    pub name: String,
    /// Declared type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Declared width, when the type uses one.
    #[serde(default)]
    pub length: Option<u32>,
    /// Declared decimal places, when the type uses them.
    #[serde(default)]
    pub decimal_places: Option<u32>,
    /// Whether null values are allowed. Defaults to true.
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl FieldSchema {
    /// Returns the PostgreSQL column type for this descriptor. Width defaults
    /// to 255 and decimal places to 0 when the file omits them.
    pub fn sql_type(&self) -> String {
        match self.field_type {
            FieldType::Character => format!("VARCHAR({})", self.length.unwrap_or(255)),
            FieldType::Numeric | FieldType::Float => format!(
                "NUMERIC({},{})",
                self.length.unwrap_or(255),
                self.decimal_places.unwrap_or(0)
            ),
            FieldType::Date => "DATE".to_string(),
            FieldType::Logical => "BOOLEAN".to_string(),
            FieldType::Memo => "TEXT".to_string(),
        }
    }
}

/// Ordered field schema for one logical table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Logical table name.
    pub table: String,
    /// Ordered field descriptors.
    pub fields: Vec<FieldSchema>,
}

impl TableSchema {
    /// Parses a schema file body.
    pub fn from_json(table: &str, body: &str) -> DomainResult<Self> {
        serde_json::from_str(body).map_err(|e| DomainError::SchemaParseError {
            table: table.to_string(),
            message: e.to_string(),
        })
    }

    /// Finds the descriptor for a field name (exact match, as stored in the
    /// schema file).
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_type_codes_round_trip() {
        for code in ['C', 'N', 'F', 'D', 'L', 'M'] {
            let ft = FieldType::from_code(code).unwrap();
            assert_eq!(ft.code(), code);
        }
        assert_eq!(FieldType::from_code('X'), None);
        assert_eq!(FieldType::from_code('c'), Some(FieldType::Character));
    }

    #[test]
    fn test_schema_file_parses_with_defaults() {
        let body = r#"{
            "table": "xcorte",
            "fields": [
                {"name": "vta", "type": "N", "length": 12, "decimal_places": 4},
                {"name": "descrip", "type": "C", "length": 40},
                {"name": "fecha", "type": "D", "nullable": false},
                {"name": "activo", "type": "L"},
                {"name": "notas", "type": "M"}
            ]
        }"#;
        let schema = TableSchema::from_json("xcorte", body).unwrap();
        assert_eq!(schema.table, "xcorte");
        assert_eq!(schema.fields.len(), 5);
        assert_eq!(schema.fields[0].field_type, FieldType::Numeric);
        assert!(schema.fields[0].nullable);
        assert!(!schema.fields[2].nullable);
        assert_eq!(schema.field("vta").unwrap().decimal_places, Some(4));
        assert!(schema.field("missing").is_none());
    }

    #[test]
    fn test_schema_parse_error_names_table() {
        let err = TableSchema::from_json("canota", "not json").unwrap_err();
        assert!(err.to_string().contains("canota"));
    }

    #[test]
    fn test_sql_types() {
        let body = r#"{
            "table": "t",
            "fields": [
                {"name": "a", "type": "C"},
                {"name": "b", "type": "N", "length": 12, "decimal_places": 4},
                {"name": "c", "type": "D"},
                {"name": "d", "type": "L"},
                {"name": "e", "type": "M"}
            ]
        }"#;
        let schema = TableSchema::from_json("t", body).unwrap();
        assert_eq!(schema.fields[0].sql_type(), "VARCHAR(255)");
        assert_eq!(schema.fields[1].sql_type(), "NUMERIC(12,4)");
        assert_eq!(schema.fields[2].sql_type(), "DATE");
        assert_eq!(schema.fields[3].sql_type(), "BOOLEAN");
        assert_eq!(schema.fields[4].sql_type(), "TEXT");
    }
}
