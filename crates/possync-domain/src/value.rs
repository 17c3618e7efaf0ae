//! The typed value union produced by conversion.
//!
//! Downstream code (SQL construction, the in-memory store, result
//! projection) operates only on `Value`, never on raw wire payloads.

use std::fmt;

use chrono::NaiveDate;

/// A converted field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Declared nullable and the wire value was absent or empty.
    Null,
    /// Text, including the string fallback for unparseable values.
    Text(String),
    /// Numeric value, full precision as parsed, never rounded.
    Number(f64),
    /// Calendar date.
    Date(NaiveDate),
    /// Boolean flag.
    Bool(bool),
}

impl Value {
    /// Whether this value is the null marker.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Projects the value into JSON, used for error-detail payloads.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
            Value::Bool(b) => serde_json::Value::Bool(*b),
        }
    }
}

impl fmt::Display for Value {
    /// Formats the value in the representation sent to the store: ISO dates,
    /// plain decimal numbers, `true`/`false` booleans, empty string for null.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Text(s) => write!(f, "{s}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Bool(b) => write!(f, "{b}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        assert_eq!(Value::Text("abc".into()).to_string(), "abc");
        assert_eq!(Value::Number(3957.33).to_string(), "3957.33");
        assert_eq!(
            Value::Date(NaiveDate::from_ymd_opt(2025, 9, 25).unwrap()).to_string(),
            "2025-09-25"
        );
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::Null.to_string(), "");
    }

    #[test]
    fn test_json_projection() {
        assert_eq!(Value::Null.to_json(), serde_json::Value::Null);
        assert_eq!(Value::Bool(false).to_json(), serde_json::json!(false));
        assert_eq!(Value::Number(12.5).to_json(), serde_json::json!(12.5));
        assert_eq!(
            Value::Date(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()).to_json(),
            serde_json::json!("2024-01-02")
        );
    }
}
