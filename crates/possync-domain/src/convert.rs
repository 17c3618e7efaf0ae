//! Raw wire value to typed `Value` conversion.
//!
//! Terminals send loosely-typed JSON scalars. Conversion is driven by the
//! field descriptor when one exists and degrades instead of failing: a value
//! the declared type cannot parse becomes its normalized string form, so a
//! single malformed field never aborts a batch.

use chrono::NaiveDate;
use serde_json::Value as JsonValue;

use crate::schema::{FieldSchema, FieldType};
use crate::value::Value;

/// Tokens treated as true for `Logical` fields, compared after trimming and
/// uppercasing.
pub const TRUTHY_TOKENS: [&str; 4] = ["T", "Y", "S", "1"];

/// Normalizes a raw wire value before conversion.
///
/// Absent values, empty strings and single-element `[null]` arrays (a known
/// malformation in terminal payloads) all normalize to `None`; everything
/// else passes through.
pub fn normalize(raw: &JsonValue) -> Option<&JsonValue> {
    match raw {
        JsonValue::Null => None,
        JsonValue::String(s) if s.is_empty() => None,
        JsonValue::Array(items) if items.len() == 1 && items[0].is_null() => None,
        other => Some(other),
    }
}

/// Converts one raw field value according to its descriptor.
///
/// Null handling: a null value with a nullable descriptor converts to
/// `Value::Null`; with a non-nullable descriptor, or with no descriptor at
/// all, it converts to the empty string so non-null column constraints are
/// satisfied without inventing content.
///
/// Without a descriptor, non-null JSON scalars keep their natural typing
/// (strings stay text, numbers stay numeric, booleans stay boolean);
/// composite values are stringified as compact JSON.
pub fn convert(raw: &JsonValue, descriptor: Option<&FieldSchema>) -> Value {
    let Some(normalized) = normalize(raw) else {
        return match descriptor {
            Some(d) if d.nullable => Value::Null,
            _ => Value::Text(String::new()),
        };
    };

    let Some(descriptor) = descriptor else {
        return best_effort(normalized);
    };

    match descriptor.field_type {
        FieldType::Character => Value::Text(scalar_text(normalized).trim().to_string()),
        FieldType::Numeric | FieldType::Float => convert_number(normalized),
        FieldType::Date => convert_date(normalized),
        FieldType::Logical => convert_logical(normalized),
        FieldType::Memo => Value::Text(scalar_text(normalized)),
    }
}

/// Typed conversion for values with no descriptor or an unknown field.
fn best_effort(value: &JsonValue) -> Value {
    match value {
        JsonValue::String(s) => Value::Text(s.clone()),
        JsonValue::Number(n) => match n.as_f64() {
            Some(f) if f.is_finite() => Value::Number(f),
            _ => Value::Text(n.to_string()),
        },
        JsonValue::Bool(b) => Value::Bool(*b),
        other => Value::Text(scalar_text(other)),
    }
}

fn convert_number(value: &JsonValue) -> Value {
    if let JsonValue::Number(n) = value {
        if let Some(f) = n.as_f64() {
            if f.is_finite() {
                return Value::Number(f);
            }
        }
    }
    let text = scalar_text(value);
    match text.trim().parse::<f64>() {
        Ok(f) if f.is_finite() => Value::Number(f),
        _ => Value::Text(text),
    }
}

fn convert_date(value: &JsonValue) -> Value {
    let text = scalar_text(value);
    let trimmed = text.trim();
    NaiveDate::parse_from_str(trimmed, "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y-%m-%d"))
        .map(Value::Date)
        .unwrap_or(Value::Text(text))
}

fn convert_logical(value: &JsonValue) -> Value {
    if let JsonValue::Bool(b) = value {
        return Value::Bool(*b);
    }
    let token = scalar_text(value).trim().to_uppercase();
    Value::Bool(TRUTHY_TOKENS.contains(&token.as_str()))
}

/// String form of a raw value: strings as-is, scalars via display, composite
/// values as compact JSON.
pub fn scalar_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}
