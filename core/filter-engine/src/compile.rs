//! FILENAME: core/filter-engine/src/compile.rs
//! PURPOSE: Compiles a filter tree into a single predicate closure.
//! CONTEXT: The closure is built once per query and called per record, so all
//! value coercion and regex construction happens here, not in the closure.

use std::cmp::Ordering;
use std::sync::Arc;

use data::{coerce_value, Field, FieldType, RecordStore, SourceRecord, Value};
use log::warn;
use regex::{Regex, RegexBuilder};

use crate::filter::{CompoundFilter, CompoundOp, FieldFilter, Filter, FilterOp, TestFn};

/// Describes the fields a filter will be evaluated against.
pub trait FieldSource {
    fn field_type(&self, name: &str) -> Option<FieldType>;
}

impl FieldSource for [Field] {
    fn field_type(&self, name: &str) -> Option<FieldType> {
        self.iter().find(|f| f.name == name).map(|f| f.field_type)
    }
}

impl FieldSource for Vec<Field> {
    fn field_type(&self, name: &str) -> Option<FieldType> {
        self.as_slice().field_type(name)
    }
}

impl FieldSource for RecordStore {
    fn field_type(&self, name: &str) -> Option<FieldType> {
        self.get_field(name).map(|f| f.field_type)
    }
}

impl Filter {
    /// Builds the predicate for this filter.
    ///
    /// With a `source`, filter values are coerced to the type of the field they test
    /// and filters on fields the source does not know pass every record.
    pub fn get_test_fn(&self, source: Option<&dyn FieldSource>) -> TestFn {
        match self {
            Filter::Field(f) => field_test_fn(f, source),
            Filter::Compound(f) => compound_test_fn(f, source),
            Filter::Function(f) => Arc::clone(&f.test_fn),
        }
    }

    pub fn test(&self, record: &SourceRecord) -> bool {
        (self.get_test_fn(None))(record)
    }
}

fn always() -> TestFn {
    Arc::new(|_| true)
}

fn compound_test_fn(filter: &CompoundFilter, source: Option<&dyn FieldSource>) -> TestFn {
    if filter.filters.is_empty() {
        return always();
    }
    let tests: Vec<TestFn> = filter.filters.iter().map(|f| f.get_test_fn(source)).collect();
    match filter.op {
        CompoundOp::And => Arc::new(move |r| tests.iter().all(|t| t(r))),
        CompoundOp::Or => Arc::new(move |r| tests.iter().any(|t| t(r))),
    }
}

fn field_test_fn(filter: &FieldFilter, source: Option<&dyn FieldSource>) -> TestFn {
    let field_type = match source {
        Some(s) => match s.field_type(&filter.field) {
            Some(t) => t,
            None => return always(),
        },
        None => FieldType::Auto,
    };

    let values: Vec<Value> = filter
        .values()
        .iter()
        .map(|v| match field_type {
            FieldType::Auto => v.clone(),
            t => coerce_value(v, t),
        })
        .collect();
    let field = filter.field.clone();

    match filter.op {
        FilterOp::Eq | FilterOp::Ne => {
            let negate = filter.op == FilterOp::Ne;
            let values: Vec<Value> = values.into_iter().map(blank_to_null).collect();
            Arc::new(move |r| {
                let v = r.get(&field);
                let v = if is_blank(v) { Value::null_ref() } else { v };
                values.iter().any(|x| x.loosely_equals(v)) != negate
            })
        }
        FilterOp::Gt | FilterOp::Ge | FilterOp::Lt | FilterOp::Le => {
            let op = filter.op;
            let target = values.into_iter().next().unwrap_or_default();
            Arc::new(move |r| {
                let v = r.get(&field);
                if v.is_null() || target.is_null() {
                    return false;
                }
                match v.compare(&target) {
                    Some(ord) => match op {
                        FilterOp::Gt => ord == Ordering::Greater,
                        FilterOp::Ge => ord != Ordering::Less,
                        FilterOp::Lt => ord == Ordering::Less,
                        _ => ord != Ordering::Greater,
                    },
                    None => false,
                }
            })
        }
        FilterOp::Like | FilterOp::NotLike | FilterOp::Begins | FilterOp::Ends => {
            let negate = filter.op == FilterOp::NotLike;
            let regexes = text_regexes(filter.op, &values);
            Arc::new(move |r| {
                let v = r.get(&field);
                let hit = !v.is_null() && {
                    let text = v.to_string();
                    regexes.iter().any(|re| re.is_match(&text))
                };
                hit != negate
            })
        }
    }
}

fn is_blank(v: &Value) -> bool {
    matches!(v, Value::String(s) if s.is_empty())
}

fn blank_to_null(v: Value) -> Value {
    if is_blank(&v) {
        Value::Null
    } else {
        v
    }
}

/// Case-insensitive literal matchers for the text operators.
fn text_regexes(op: FilterOp, values: &[Value]) -> Vec<Regex> {
    values
        .iter()
        .filter(|v| !v.is_null())
        .filter_map(|v| {
            let literal = regex::escape(&v.to_string());
            let pattern = match op {
                FilterOp::Begins => format!("^{}", literal),
                FilterOp::Ends => format!("{}$", literal),
                _ => literal,
            };
            match RegexBuilder::new(&pattern).case_insensitive(true).build() {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("Skipping filter value '{}': {}", v, e);
                    None
                }
            }
        })
        .collect()
}
