//! FILENAME: core/filter-engine/src/utils.rs
//! PURPOSE: Pure transforms over filter trees.
//! CONTEXT: None of these mutate their input. Results are re-normalized through
//! `parse_filter`, so a transform that leaves one filter returns it bare and one
//! that leaves none returns `None`.

use rustc_hash::FxHashMap;

use crate::error::FilterError;
use crate::filter::{CompoundFilter, CompoundOp, FieldFilter, Filter, FilterType, FilterValue};
use crate::parse::parse_filter;

/// All non-compound filters nested anywhere in `filter`, in tree order.
pub fn flatten_filter(filter: Option<&Filter>) -> Vec<Filter> {
    match filter {
        None => Vec::new(),
        Some(Filter::Compound(c)) => c.filters.iter().flat_map(|f| flatten_filter(Some(f))).collect(),
        Some(other) => vec![other.clone()],
    }
}

/// ANDs `new_filter` onto `filter`. An existing top-level AND compound is extended
/// rather than nested.
pub fn with_filter(filter: Option<&Filter>, new_filter: Filter) -> Filter {
    match filter {
        None => new_filter,
        Some(Filter::Compound(c)) if c.op == CompoundOp::And => {
            let mut filters = c.filters.clone();
            filters.push(new_filter);
            Filter::Compound(CompoundFilter::and(filters))
        }
        Some(existing) => Filter::Compound(CompoundFilter::and(vec![existing.clone(), new_filter])),
    }
}

/// Removes the top-level filters matching `pred`, keeping the compound operator.
fn without(filter: Option<&Filter>, pred: impl Fn(&Filter) -> bool) -> Option<Filter> {
    match filter? {
        Filter::Compound(c) => {
            let filters: Vec<Filter> = c.filters.iter().filter(|f| !pred(f)).cloned().collect();
            collapse(filters, c.op)
        }
        other if pred(other) => None,
        other => Some(other.clone()),
    }
}

fn collapse(mut filters: Vec<Filter>, op: CompoundOp) -> Option<Filter> {
    match filters.len() {
        0 => None,
        1 => filters.pop(),
        _ => Some(Filter::Compound(CompoundFilter::new(filters, op))),
    }
}

pub fn without_filters_by_field(filter: Option<&Filter>, field: &str) -> Option<Filter> {
    without(filter, |f| f.field() == Some(field))
}

pub fn without_filters_by_key(filter: Option<&Filter>, key: &str) -> Option<Filter> {
    without(filter, |f| f.key() == Some(key))
}

pub fn without_filters_by_type(filter: Option<&Filter>, types: &[FilterType]) -> Option<Filter> {
    without(filter, |f| types.contains(&f.filter_type()))
}

/// Replaces the top-level filters matching `pred` with `new_filters`.
fn replace(
    filter: Option<&Filter>,
    new_filters: Vec<Filter>,
    pred: impl Fn(&Filter) -> bool,
) -> Result<Option<Filter>, FilterError> {
    let (current, op) = match filter {
        Some(Filter::Compound(c)) => (c.filters.clone(), c.op),
        Some(other) => (vec![other.clone()], CompoundOp::And),
        None => (Vec::new(), CompoundOp::And),
    };
    let mut filters: Vec<Filter> = current.into_iter().filter(|f| !pred(f)).collect();
    filters.extend(new_filters);
    match op {
        CompoundOp::And => parse_filter(filters),
        CompoundOp::Or => Ok(collapse(filters, op)),
    }
}

pub fn with_filter_by_field(
    filter: Option<&Filter>,
    new_filters: Vec<Filter>,
    field: &str,
) -> Result<Option<Filter>, FilterError> {
    replace(filter, new_filters, |f| f.field() == Some(field))
}

pub fn with_filter_by_key(
    filter: Option<&Filter>,
    new_filters: Vec<Filter>,
    key: &str,
) -> Result<Option<Filter>, FilterError> {
    replace(filter, new_filters, |f| f.key() == Some(key))
}

pub fn with_filter_by_types(
    filter: Option<&Filter>,
    new_filters: Vec<Filter>,
    types: &[FilterType],
) -> Result<Option<Filter>, FilterError> {
    replace(filter, new_filters, |f| types.contains(&f.filter_type()))
}

/// Merges field filters sharing a field and a list-capable operator into one
/// filter holding the union of their values. Groups keep the position of their
/// first member; all other filters pass through unchanged.
pub fn combine_value_filters(filters: &[Filter]) -> Vec<Filter> {
    let mut ret: Vec<Filter> = Vec::with_capacity(filters.len());
    let mut groups: FxHashMap<(String, &'static str), usize> = FxHashMap::default();

    for filter in filters {
        let Filter::Field(ff) = filter else {
            ret.push(filter.clone());
            continue;
        };
        if !ff.op.supports_list() {
            ret.push(filter.clone());
            continue;
        }
        let key = (ff.field.clone(), ff.op.token());
        match groups.get(&key) {
            Some(&i) => {
                if let Filter::Field(existing) = &ret[i] {
                    let mut values = existing.values().to_vec();
                    values.extend(ff.values().iter().cloned());
                    if let Ok(merged) = FieldFilter::new(ff.field.clone(), ff.op, FilterValue::List(values)) {
                        ret[i] = Filter::Field(merged);
                    }
                }
            }
            None => {
                groups.insert(key, ret.len());
                ret.push(filter.clone());
            }
        }
    }
    ret
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterOp, FunctionFilter};
    use pretty_assertions::assert_eq;

    fn ff(field: &str, op: FilterOp, v: impl Into<FilterValue>) -> Filter {
        FieldFilter::new(field, op, v).unwrap().into()
    }

    #[test]
    fn test_combine_value_filters() {
        let combined = combine_value_filters(&[
            ff("x", FilterOp::Eq, 1.0),
            ff("x", FilterOp::Eq, 2.0),
        ]);
        assert_eq!(combined, vec![ff("x", FilterOp::Eq, vec![1.0, 2.0])]);
    }

    #[test]
    fn test_combine_leaves_other_filters() {
        let func: Filter = FunctionFilter::new("k", |_| true).into();
        let combined = combine_value_filters(&[
            ff("x", FilterOp::Gt, 1.0),
            ff("y", FilterOp::Like, "a"),
            func.clone(),
            ff("x", FilterOp::Gt, 2.0),
            ff("y", FilterOp::Like, vec!["b", "a"]),
        ]);
        assert_eq!(
            combined,
            vec![
                ff("x", FilterOp::Gt, 1.0),
                ff("y", FilterOp::Like, vec!["a", "b"]),
                func,
                ff("x", FilterOp::Gt, 2.0),
            ]
        );
    }

    #[test]
    fn test_flatten_filter() {
        let nested: Filter = CompoundFilter::or(vec![
            ff("a", FilterOp::Eq, 1.0),
            CompoundFilter::and(vec![ff("b", FilterOp::Eq, 2.0), ff("c", FilterOp::Eq, 3.0)]).into(),
        ])
        .into();
        let flat = flatten_filter(Some(&nested));
        let fields: Vec<_> = flat.iter().filter_map(|f| f.field()).collect();
        assert_eq!(fields, vec!["a", "b", "c"]);
        assert!(flatten_filter(None).is_empty());
    }

    #[test]
    fn test_with_filter_extends_and() {
        let a = ff("a", FilterOp::Eq, 1.0);
        let b = ff("b", FilterOp::Eq, 2.0);
        let c = ff("c", FilterOp::Eq, 3.0);
        assert_eq!(with_filter(None, a.clone()), a);
        let ab = with_filter(Some(&a), b.clone());
        let abc = with_filter(Some(&ab), c.clone());
        assert_eq!(abc, CompoundFilter::and(vec![a, b, c]).into());
    }

    #[test]
    fn test_without_filters() {
        let func: Filter = FunctionFilter::new("k", |_| true).into();
        let filter: Filter = CompoundFilter::or(vec![
            ff("a", FilterOp::Eq, 1.0),
            ff("b", FilterOp::Eq, 2.0),
            func.clone(),
        ])
        .into();

        let no_a = without_filters_by_field(Some(&filter), "a").unwrap();
        assert_eq!(no_a, CompoundFilter::or(vec![ff("b", FilterOp::Eq, 2.0), func.clone()]).into());

        let no_key = without_filters_by_key(Some(&no_a), "k");
        assert_eq!(no_key, Some(ff("b", FilterOp::Eq, 2.0)));

        assert_eq!(without_filters_by_type(no_key.as_ref(), &[FilterType::Field]), None);
        assert_eq!(without_filters_by_field(Some(&func), "a"), Some(func));
    }

    #[test]
    fn test_with_filter_by_field_replaces() {
        let filter: Filter =
            CompoundFilter::and(vec![ff("a", FilterOp::Eq, 1.0), ff("b", FilterOp::Eq, 2.0)]).into();
        let replaced =
            with_filter_by_field(Some(&filter), vec![ff("a", FilterOp::Eq, 5.0)], "a").unwrap();
        assert_eq!(
            replaced,
            Some(CompoundFilter::and(vec![ff("b", FilterOp::Eq, 2.0), ff("a", FilterOp::Eq, 5.0)]).into())
        );

        let cleared = with_filter_by_types(Some(&filter), vec![], &[FilterType::Field]).unwrap();
        assert_eq!(cleared, None);

        let keyed = with_filter_by_key(None, vec![FunctionFilter::new("k", |_| false).into()], "k")
            .unwrap()
            .unwrap();
        assert_eq!(keyed.key(), Some("k"));
    }
}
