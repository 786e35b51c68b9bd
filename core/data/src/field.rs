//! FILENAME: core/data/src/field.rs
//! PURPOSE: Field metadata and raw value coercion.
//! CONTEXT: A `Field` names one column of a source record and knows how to turn a
//! raw JSON value into a typed `Value`. Fields are immutable once constructed.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::DataError;
use crate::value::{format_number, Value};

// ============================================================================
// FIELD TYPE
// ============================================================================

/// Data types for fields. The set is closed: unknown tokens are rejected when a
/// field config is parsed, so coercion itself never fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    /// No conversion.
    #[default]
    Auto,
    Bool,
    Date,
    Int,
    Json,
    LocalDate,
    Number,
    Pwd,
    String,
}

impl FieldType {
    pub const ALL: [FieldType; 9] = [
        FieldType::Auto,
        FieldType::Bool,
        FieldType::Date,
        FieldType::Int,
        FieldType::Json,
        FieldType::LocalDate,
        FieldType::Number,
        FieldType::Pwd,
        FieldType::String,
    ];

    pub fn token(&self) -> &'static str {
        match self {
            FieldType::Auto => "auto",
            FieldType::Bool => "bool",
            FieldType::Date => "date",
            FieldType::Int => "int",
            FieldType::Json => "json",
            FieldType::LocalDate => "localDate",
            FieldType::Number => "number",
            FieldType::Pwd => "pwd",
            FieldType::String => "string",
        }
    }
}

impl FromStr for FieldType {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldType::ALL
            .iter()
            .find(|t| t.token() == s)
            .copied()
            .ok_or_else(|| DataError::UnknownFieldType(s.to_string()))
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

// ============================================================================
// FIELD
// ============================================================================

/// Serializable field configuration. `type` is kept as a raw token so that an
/// unknown type surfaces as `DataError::UnknownFieldType` rather than a serde error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConfig {
    pub name: String,

    #[serde(rename = "type", default)]
    pub field_type: Option<String>,

    #[serde(default)]
    pub display_name: Option<String>,

    /// Value used for records with a null or missing value.
    #[serde(default)]
    pub default_value: serde_json::Value,
}

/// Metadata for an individual data field within a record.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    pub display_name: String,
    /// Raw default, coerced through `field_type` like any other raw value.
    pub default_value: serde_json::Value,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        Field {
            display_name: gen_display_name(&name),
            name,
            field_type,
            default_value: serde_json::Value::Null,
        }
    }

    pub fn from_config(config: FieldConfig) -> Result<Self, DataError> {
        let field_type = match config.field_type.as_deref() {
            Some(token) => token.parse()?,
            None => FieldType::Auto,
        };
        let mut field = Field::new(config.name, field_type);
        if let Some(display_name) = config.display_name {
            field.display_name = display_name;
        }
        field.default_value = config.default_value;
        Ok(field)
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_default_value(mut self, default_value: serde_json::Value) -> Self {
        self.default_value = default_value;
        self
    }

    /// Parses a raw value (absent keys pass `None`) according to this field's type.
    pub fn parse_val(&self, raw: Option<&serde_json::Value>) -> Value {
        parse_field_value(
            raw.unwrap_or(&serde_json::Value::Null),
            self.field_type,
            &self.default_value,
        )
    }

    pub fn is_equal(&self, a: &Value, b: &Value) -> bool {
        a == b
    }
}

/// Validates a config and builds the field. Name uniqueness is the caller's concern.
pub fn create_field(config: FieldConfig) -> Result<Field, DataError> {
    Field::from_config(config)
}

// ============================================================================
// VALUE COERCION
// ============================================================================

/// Parse a raw value according to a field type, substituting `default_value`
/// when the raw value is null.
pub fn parse_field_value(
    raw: &serde_json::Value,
    field_type: FieldType,
    default_value: &serde_json::Value,
) -> Value {
    let raw = if raw.is_null() { default_value } else { raw };
    if raw.is_null() {
        return Value::Null;
    }

    match field_type {
        FieldType::Auto | FieldType::Json => Value::from_json(raw),
        FieldType::Int => {
            let n = to_number(raw);
            if n.is_finite() {
                Value::Int(n.trunc() as i64)
            } else {
                Value::Null
            }
        }
        FieldType::Number => Value::number(to_number(raw)),
        FieldType::Bool => Value::Bool(is_truthy(raw)),
        FieldType::Pwd | FieldType::String => Value::String(to_text(raw)),
        FieldType::Date => parse_date(raw).map(Value::Date).unwrap_or_else(|| {
            warn!("Unable to parse '{}' as a date", raw);
            Value::Null
        }),
        FieldType::LocalDate => parse_local_date(raw).map(Value::LocalDate).unwrap_or_else(|| {
            warn!("Unable to parse '{}' as a local date", raw);
            Value::Null
        }),
    }
}

/// Re-coerces an already typed value to `field_type`, e.g. a filter value
/// compared against a typed column.
pub fn coerce_value(value: &Value, field_type: FieldType) -> Value {
    match value {
        Value::Null | Value::Multiple => value.clone(),
        _ => parse_field_value(&value.to_json(), field_type, &serde_json::Value::Null),
    }
}

/// Numeric conversion with the usual loose rules: booleans are 0/1, blank text is 0,
/// anything unparseable is NaN.
fn to_number(raw: &serde_json::Value) -> f64 {
    match raw {
        serde_json::Value::Null => 0.0,
        serde_json::Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        serde_json::Value::String(s) => {
            let text = s.trim();
            if text.is_empty() {
                return 0.0;
            }
            match text {
                "Infinity" | "+Infinity" => f64::INFINITY,
                "-Infinity" => f64::NEG_INFINITY,
                _ => match text.parse::<f64>() {
                    Ok(n) if n.is_finite() => n,
                    _ => f64::NAN,
                },
            }
        }
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => f64::NAN,
    }
}

fn is_truthy(raw: &serde_json::Value) -> bool {
    match raw {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => true,
    }
}

fn to_text(raw: &serde_json::Value) -> String {
    match raw {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => format_number(n.as_f64().unwrap_or(f64::NAN)),
        other => other.to_string(),
    }
}

fn parse_date(raw: &serde_json::Value) -> Option<DateTime<Utc>> {
    match raw {
        serde_json::Value::Number(n) => {
            let millis = n.as_f64()?;
            if !millis.is_finite() {
                return None;
            }
            DateTime::from_timestamp_millis(millis as i64)
        }
        serde_json::Value::String(s) => {
            let text = s.trim();
            if let Ok(d) = DateTime::parse_from_rfc3339(text) {
                return Some(d.with_timezone(&Utc));
            }
            if let Ok(d) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
                return Some(d.and_utc());
            }
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|d| d.and_utc())
        }
        _ => None,
    }
}

fn parse_local_date(raw: &serde_json::Value) -> Option<NaiveDate> {
    let text = match raw {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => format_number(n.as_f64()?),
        _ => return None,
    };
    NaiveDate::parse_from_str(&text, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&text, "%Y%m%d"))
        .ok()
}

// ============================================================================
// DISPLAY NAMES
// ============================================================================

/// Transforms a short field code into a user-facing name:
/// `"id"` becomes `"ID"`, `"myField"` becomes `"My Field"`.
pub fn gen_display_name(field_name: &str) -> String {
    if field_name == "id" {
        return "ID".to_string();
    }

    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut prev: Option<char> = None;

    for c in field_name.chars() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev = None;
            continue;
        }
        let boundary = match prev {
            Some(p) => {
                (p.is_lowercase() && c.is_uppercase())
                    || (p.is_alphabetic() && c.is_ascii_digit())
                    || (p.is_ascii_digit() && c.is_alphabetic())
            }
            None => false,
        };
        if boundary && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        current.push(c);
        prev = Some(c);
    }
    if !current.is_empty() {
        words.push(current);
    }

    words
        .iter()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
