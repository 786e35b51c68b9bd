//! FILENAME: core/filter-engine/src/parse.rs
//! PURPOSE: Normalizes the accepted filter shapes into a `Filter` tree.

use std::sync::Arc;

use data::{coerce_value, FieldType, SourceRecord, Value};
use log::warn;

use crate::error::FilterError;
use crate::filter::{CompoundFilter, CompoundOp, FieldFilter, Filter, FilterValue, FunctionFilter, TestFn};

/// Key given to function filters created from a bare predicate.
pub const DEFAULT_FUNCTION_KEY: &str = "default";

/// Anything `parse_filter` accepts.
#[derive(Clone)]
pub enum FilterLike {
    None,
    Filter(Filter),
    Json(serde_json::Value),
    Function(TestFn),
    List(Vec<FilterLike>),
}

impl From<Filter> for FilterLike {
    fn from(f: Filter) -> Self {
        FilterLike::Filter(f)
    }
}

impl From<Option<Filter>> for FilterLike {
    fn from(f: Option<Filter>) -> Self {
        f.map(FilterLike::Filter).unwrap_or(FilterLike::None)
    }
}

impl From<serde_json::Value> for FilterLike {
    fn from(v: serde_json::Value) -> Self {
        FilterLike::Json(v)
    }
}

impl From<Vec<Filter>> for FilterLike {
    fn from(fs: Vec<Filter>) -> Self {
        FilterLike::List(fs.into_iter().map(FilterLike::Filter).collect())
    }
}

impl From<Vec<FilterLike>> for FilterLike {
    fn from(fs: Vec<FilterLike>) -> Self {
        FilterLike::List(fs)
    }
}

impl FilterLike {
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&SourceRecord) -> bool + Send + Sync + 'static,
    {
        FilterLike::Function(Arc::new(f))
    }
}

/// Parses a filter from any accepted representation.
///
/// * `None` and JSON `null` mean "no filter".
/// * An existing `Filter` is returned as-is.
/// * A bare predicate becomes a `FunctionFilter` keyed `"default"`.
/// * Lists become an AND `CompoundFilter`.
/// * Objects with `field` become a `FieldFilter`, objects with `filters` a
///   `CompoundFilter`.
///
/// Compound results with no children collapse to `None`, and with one child
/// collapse to that child.
pub fn parse_filter(spec: impl Into<FilterLike>) -> Result<Option<Filter>, FilterError> {
    match spec.into() {
        FilterLike::None => Ok(None),
        FilterLike::Filter(f) => Ok(Some(f)),
        FilterLike::Function(test_fn) => Ok(Some(Filter::Function(FunctionFilter {
            key: DEFAULT_FUNCTION_KEY.to_string(),
            test_fn,
        }))),
        FilterLike::List(items) => {
            let filters = parse_children(items)?;
            Ok(collapse(CompoundFilter::new(filters, CompoundOp::And)))
        }
        FilterLike::Json(json) => parse_json(&json),
    }
}

fn parse_children(items: Vec<FilterLike>) -> Result<Vec<Filter>, FilterError> {
    let mut ret = Vec::with_capacity(items.len());
    for item in items {
        if let Some(f) = parse_filter(item)? {
            ret.push(f);
        }
    }
    Ok(ret)
}

fn collapse(mut compound: CompoundFilter) -> Option<Filter> {
    match compound.filters.len() {
        0 => None,
        1 => compound.filters.pop(),
        _ => Some(Filter::Compound(compound)),
    }
}

fn parse_json(json: &serde_json::Value) -> Result<Option<Filter>, FilterError> {
    match json {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Array(items) => {
            let items = items.iter().cloned().map(FilterLike::Json).collect();
            parse_filter(FilterLike::List(items))
        }
        serde_json::Value::Object(obj) => {
            if obj.get("field").is_some_and(|f| !f.is_null()) {
                parse_field_filter(obj).map(|f| Some(Filter::Field(f)))
            } else if let Some(filters) = obj.get("filters") {
                let items = match filters {
                    serde_json::Value::Array(items) => items.clone(),
                    other => vec![other.clone()],
                };
                let op = match obj.get("op").and_then(|v| v.as_str()) {
                    Some(token) => token.parse()?,
                    None => CompoundOp::And,
                };
                let filters = parse_children(items.into_iter().map(FilterLike::Json).collect())?;
                Ok(collapse(CompoundFilter::new(filters, op)))
            } else {
                warn!("Unable to identify filter type: {}", json);
                Err(FilterError::InvalidFilterSpec(json.to_string()))
            }
        }
        other => {
            warn!("Unable to identify filter type: {}", other);
            Err(FilterError::InvalidFilterSpec(other.to_string()))
        }
    }
}

fn parse_field_filter(obj: &serde_json::Map<String, serde_json::Value>) -> Result<FieldFilter, FilterError> {
    let field = match obj.get("field") {
        Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
        other => {
            return Err(FilterError::InvalidFilterSpec(format!(
                "field must be a non-empty string, got {}",
                other.cloned().unwrap_or_default()
            )))
        }
    };
    let op = match obj.get("op") {
        Some(serde_json::Value::String(s)) => s.parse()?,
        None => {
            return Err(FilterError::InvalidFilterSpec(format!(
                "missing op for field '{}'",
                field
            )))
        }
        Some(other) => return Err(FilterError::UnknownOperator(other.to_string())),
    };
    let value_type = match obj.get("valueType").and_then(|v| v.as_str()) {
        Some(token) => Some(token.parse::<FieldType>()?),
        None => None,
    };
    let parse_value = |raw: &serde_json::Value| {
        let v = Value::from_json(raw);
        match value_type {
            Some(t) => coerce_value(&v, t),
            None => v,
        }
    };
    let value = match obj.get("value") {
        Some(serde_json::Value::Array(items)) => {
            FilterValue::List(items.iter().map(parse_value).collect())
        }
        Some(raw) => FilterValue::Single(parse_value(raw)),
        None => FilterValue::Single(Value::Null),
    };
    FieldFilter::new(field, op, value)
}

// ============================================================================
// UNTRUSTED INPUT
// ============================================================================

/// Result of validating user-edited filter JSON.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilterValidation {
    pub filter: Option<Filter>,
    /// Human readable problems. Empty when the text parsed cleanly.
    pub messages: Vec<String>,
}

impl FilterValidation {
    pub fn is_valid(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Parses filter JSON typed by a user. Never fails: problems are reported as
/// messages and the filter is left empty.
pub fn parse_filter_json(text: &str) -> FilterValidation {
    if text.trim().is_empty() {
        return FilterValidation::default();
    }
    let json: serde_json::Value = match serde_json::from_str(text) {
        Ok(json) => json,
        Err(e) => {
            return FilterValidation {
                filter: None,
                messages: vec![format!("Invalid JSON: {}", e)],
            }
        }
    };
    match parse_filter(json) {
        Ok(filter) => FilterValidation {
            filter,
            messages: Vec::new(),
        },
        Err(e) => FilterValidation {
            filter: None,
            messages: vec![e.to_string()],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterOp;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_object_shapes() {
        let f = parse_filter(json!({"field": "x", "op": "=", "value": 1})).unwrap().unwrap();
        assert_eq!(f, FieldFilter::new("x", FilterOp::Eq, 1.0).unwrap().into());

        let c = parse_filter(json!({"filters": [
            {"field": "x", "op": ">", "value": 1},
            {"field": "y", "op": "like", "value": ["a", "b"]},
        ], "op": "or"}))
        .unwrap()
        .unwrap();
        match c {
            Filter::Compound(c) => {
                assert_eq!(c.op, CompoundOp::Or);
                assert_eq!(c.filters.len(), 2);
            }
            other => panic!("expected compound, got {:?}", other),
        }
    }

    #[test]
    fn test_degenerate_compounds_collapse() {
        assert_eq!(parse_filter(json!([])).unwrap(), None);
        assert_eq!(parse_filter(json!({"filters": []})).unwrap(), None);
        assert_eq!(parse_filter(json!(null)).unwrap(), None);
        let single = parse_filter(json!([{"field": "x", "op": "!=", "value": "a"}])).unwrap();
        assert_eq!(single, Some(FieldFilter::new("x", FilterOp::Ne, "a").unwrap().into()));
    }

    #[test]
    fn test_bare_function_gets_default_key() {
        let f = parse_filter(FilterLike::function(|_| true)).unwrap().unwrap();
        assert_eq!(f.key(), Some(DEFAULT_FUNCTION_KEY));
    }

    #[test]
    fn test_unrecognized_shapes_error() {
        assert!(matches!(
            parse_filter(json!({"foo": 1})),
            Err(FilterError::InvalidFilterSpec(_))
        ));
        assert!(matches!(parse_filter(json!(12)), Err(FilterError::InvalidFilterSpec(_))));
        assert_eq!(
            parse_filter(json!({"field": "x", "op": "~", "value": 1})).unwrap_err(),
            FilterError::UnknownOperator("~".to_string())
        );
        assert_eq!(
            parse_filter(json!({"field": "x", "op": "<", "value": [1, 2]})).unwrap_err(),
            FilterError::MultipleValuesNotSupported("<".to_string())
        );
    }

    #[test]
    fn test_value_type_restores_dates() {
        let f = parse_filter(json!({
            "field": "d", "op": "=", "value": ["2024-01-02"], "valueType": "localDate"
        }))
        .unwrap()
        .unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(f, FieldFilter::new("d", FilterOp::Eq, vec![day]).unwrap().into());
    }

    #[test]
    fn test_round_trip_through_json() {
        let day = NaiveDate::from_ymd_opt(2023, 6, 30).unwrap();
        let original: Filter = CompoundFilter::or(vec![
            FieldFilter::new("region", FilterOp::Eq, vec!["East", "West"]).unwrap().into(),
            CompoundFilter::and(vec![
                FieldFilter::new("amt", FilterOp::Ge, 10i64).unwrap().into(),
                FieldFilter::new("day", FilterOp::Lt, day).unwrap().into(),
            ])
            .into(),
        ])
        .into();
        let json = original.to_json().unwrap();
        assert_eq!(parse_filter(json).unwrap(), Some(original));
    }

    #[test]
    fn test_parse_filter_json_reports_messages() {
        let ok = parse_filter_json(r#"{"field": "x", "op": "=", "value": 1}"#);
        assert!(ok.is_valid());
        assert!(ok.filter.is_some());

        let bad = parse_filter_json("{not json");
        assert!(!bad.is_valid());
        assert!(bad.filter.is_none());
        assert!(bad.messages[0].starts_with("Invalid JSON"));

        let unknown = parse_filter_json(r#"{"foo": 1}"#);
        assert_eq!(unknown.messages.len(), 1);

        assert_eq!(parse_filter_json("  "), FilterValidation::default());
    }
}
