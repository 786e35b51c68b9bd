//! FILENAME: core/cube-engine/src/aggregate.rs
//! PURPOSE: The aggregator set and the incremental replace path.
//! CONTEXT: Every aggregate row keeps one `MeasureCell` per view field. The cell's
//! accumulator summarizes what the row's children contribute, so SUM and AVG
//! style aggregators can absorb a change without looking at any sibling. A row
//! that does not aggregate a field contributes its visible value only, as a
//! leaf would.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use data::Value;

use crate::error::CubeError;

// ============================================================================
// ACCUMULATOR
// ============================================================================

/// Running totals over the leaf values beneath a row.
/// NaN is present but not numeric, so a NaN leaf never poisons the running sum.
/// The sum is compensated (Neumaier), so merging and unmerging many deltas stays
/// within rounding of a fresh pass over the same leaves.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AggregateAccumulator {
    pub sum: f64,
    /// Low-order error carried alongside `sum`.
    pub compensation: f64,
    /// Leaves counted, null or not.
    pub count: u64,
    /// Leaves holding a finite-or-infinite number.
    pub count_numbers: u64,
    /// Leaves holding any non-null value.
    pub count_present: u64,
}

impl AggregateAccumulator {
    pub fn new() -> Self {
        AggregateAccumulator::default()
    }

    /// Accumulator for a single leaf value.
    pub fn of(value: &Value) -> Self {
        let mut acc = AggregateAccumulator::new();
        acc.add_value(value);
        acc
    }

    pub fn add_value(&mut self, value: &Value) {
        self.count += 1;
        if value.is_null() {
            return;
        }
        self.count_present += 1;
        if let Some(n) = value.as_f64().filter(|n| !n.is_nan()) {
            self.add(n);
            self.count_numbers += 1;
        }
    }

    /// Compensated sum of the numeric leaves.
    pub fn total(&self) -> f64 {
        self.sum + self.compensation
    }

    pub fn merge(&mut self, other: &AggregateAccumulator) {
        self.add(other.sum);
        self.add(other.compensation);
        self.count += other.count;
        self.count_numbers += other.count_numbers;
        self.count_present += other.count_present;
    }

    /// Inverse of `merge`.
    pub fn unmerge(&mut self, other: &AggregateAccumulator) {
        self.add(-other.sum);
        self.add(-other.compensation);
        self.count = self.count.saturating_sub(other.count);
        self.count_numbers = self.count_numbers.saturating_sub(other.count_numbers);
        self.count_present = self.count_present.saturating_sub(other.count_present);
        if self.count_numbers == 0 {
            self.sum = 0.0;
            self.compensation = 0.0;
        }
    }

    fn add(&mut self, x: f64) {
        let t = self.sum + x;
        if t.is_finite() {
            if self.sum.abs() >= x.abs() {
                self.compensation += (self.sum - t) + x;
            } else {
                self.compensation += (x - t) + self.sum;
            }
        }
        self.sum = t;
    }
}

// ============================================================================
// CELLS
// ============================================================================

/// A child's contribution to its parent's cell: its visible value and its
/// accumulator.
#[derive(Debug, Clone, Copy)]
pub struct ChildCell<'a> {
    pub value: &'a Value,
    pub acc: AggregateAccumulator,
}

/// The cached aggregate for one field of one row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeasureCell {
    pub value: Value,
    pub acc: AggregateAccumulator,
    /// Number of direct children with a non-null value.
    pub present: u32,
}

impl MeasureCell {
    /// Accumulator and child counts over `children`, with a null value.
    pub fn scan(children: &[ChildCell<'_>]) -> Self {
        let mut cell = MeasureCell::default();
        for child in children {
            cell.acc.merge(&child.acc);
            if !child.value.is_null() {
                cell.present += 1;
            }
        }
        cell
    }

    /// Cell of a row that does not aggregate the field. It holds `value` and
    /// passes it upward as a single leaf would.
    pub fn fixed(value: Value) -> Self {
        MeasureCell {
            acc: AggregateAccumulator::of(&value),
            present: 0,
            value,
        }
    }

    /// Applies a child change to the accumulator and counts, keeping `value`.
    pub fn shift(&self, update: &CellUpdate) -> Self {
        let mut acc = self.acc;
        acc.unmerge(&update.old_acc);
        acc.merge(&update.new_acc);

        let mut present = self.present;
        if !update.old_value.is_null() {
            present = present.saturating_sub(1);
        }
        if !update.new_value.is_null() {
            present += 1;
        }

        MeasureCell {
            value: self.value.clone(),
            acc,
            present,
        }
    }
}

/// A change to one child's contribution for one field.
#[derive(Debug, Clone, PartialEq)]
pub struct CellUpdate {
    pub old_value: Value,
    pub new_value: Value,
    pub old_acc: AggregateAccumulator,
    pub new_acc: AggregateAccumulator,
}

impl CellUpdate {
    /// Update for a leaf whose raw value changed.
    pub fn for_leaf(old_value: Value, new_value: Value) -> Self {
        CellUpdate {
            old_acc: AggregateAccumulator::of(&old_value),
            new_acc: AggregateAccumulator::of(&new_value),
            old_value,
            new_value,
        }
    }
}

/// A change to one field of one source record.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub field: String,
    pub old_value: Value,
    pub new_value: Value,
}

impl FieldUpdate {
    pub fn new(field: impl Into<String>, old_value: impl Into<Value>, new_value: impl Into<Value>) -> Self {
        FieldUpdate {
            field: field.into(),
            old_value: old_value.into(),
            new_value: new_value.into(),
        }
    }
}

// ============================================================================
// AGGREGATORS
// ============================================================================

/// App-defined reducer. Replacement always re-aggregates the affected row.
pub trait CustomAggregator: Send + Sync {
    fn name(&self) -> &str;

    fn aggregate(&self, children: &[ChildCell<'_>]) -> Value;

    /// Return false if the result depends on anything other than the row's
    /// children. Views using such an aggregator rebuild on every data change.
    fn depends_on_children_only(&self) -> bool {
        true
    }
}

#[derive(Clone)]
pub enum Aggregator {
    /// Sum of numeric values, nulls ignored.
    Sum,
    /// Sum, or null if any leaf is not numeric.
    SumStrict,
    /// Mean over numeric values.
    Avg,
    /// Mean over all leaves, or null if any leaf is not numeric.
    AvgStrict,
    Min,
    Max,
    /// The value shared by every child, else `Value::Multiple`.
    Unique,
    /// The value of the only child with a value, else null.
    Single,
    /// Always null.
    Null,
    Custom(Arc<dyn CustomAggregator>),
}

impl Aggregator {
    pub const BUILT_INS: [(&'static str, Aggregator); 9] = [
        ("SUM", Aggregator::Sum),
        ("SUM_STRICT", Aggregator::SumStrict),
        ("AVG", Aggregator::Avg),
        ("AVG_STRICT", Aggregator::AvgStrict),
        ("MIN", Aggregator::Min),
        ("MAX", Aggregator::Max),
        ("UNIQUE", Aggregator::Unique),
        ("SINGLE", Aggregator::Single),
        ("NULL", Aggregator::Null),
    ];

    /// Resolves a built-in aggregator from its token, ignoring case.
    pub fn from_token(token: &str) -> Result<Self, CubeError> {
        Aggregator::BUILT_INS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(token))
            .map(|(_, agg)| agg.clone())
            .ok_or_else(|| CubeError::UnknownAggregator(token.to_string()))
    }

    pub fn custom(aggregator: impl CustomAggregator + 'static) -> Self {
        Aggregator::Custom(Arc::new(aggregator))
    }

    pub fn name(&self) -> &str {
        match self {
            Aggregator::Custom(c) => c.name(),
            built_in => Aggregator::BUILT_INS
                .iter()
                .find(|(_, agg)| agg == built_in)
                .map(|(name, _)| *name)
                .unwrap_or("NULL"),
        }
    }

    pub fn depends_on_children_only(&self) -> bool {
        match self {
            Aggregator::Custom(c) => c.depends_on_children_only(),
            _ => true,
        }
    }

    /// Full aggregation over a row's children.
    pub fn aggregate(&self, children: &[ChildCell<'_>]) -> MeasureCell {
        let mut cell = MeasureCell::scan(children);
        if children.is_empty() {
            return cell;
        }
        cell.value = match self {
            Aggregator::Sum | Aggregator::SumStrict | Aggregator::Avg | Aggregator::AvgStrict => {
                self.from_accumulator(&cell.acc)
            }
            Aggregator::Min => extremum(children, Ordering::Less),
            Aggregator::Max => extremum(children, Ordering::Greater),
            Aggregator::Unique => {
                let first = children[0].value;
                if children.iter().all(|c| c.value == first) {
                    first.clone()
                } else {
                    Value::Multiple
                }
            }
            Aggregator::Single => {
                if cell.present == 1 {
                    children
                        .iter()
                        .find(|c| !c.value.is_null())
                        .map(|c| c.value.clone())
                        .unwrap_or_default()
                } else {
                    Value::Null
                }
            }
            Aggregator::Null => Value::Null,
            Aggregator::Custom(c) => c.aggregate(children),
        };
        cell
    }

    /// Folds one child's change into `current`.
    ///
    /// `rescan` performs a full aggregation over the row's (already updated)
    /// children. It is only called when the delta alone cannot determine the
    /// result: a MIN/MAX losing its extremum, a UNIQUE leaving `Multiple`, a
    /// SINGLE whose value moved to a sibling, or a custom aggregator.
    pub fn replace(
        &self,
        current: &MeasureCell,
        update: &CellUpdate,
        child_count: usize,
        rescan: &dyn Fn() -> MeasureCell,
    ) -> MeasureCell {
        let mut cell = current.shift(update);
        let (old, new) = (&update.old_value, &update.new_value);

        cell.value = match self {
            Aggregator::Sum | Aggregator::SumStrict | Aggregator::Avg | Aggregator::AvgStrict => {
                self.from_accumulator(&cell.acc)
            }
            Aggregator::Min | Aggregator::Max => {
                let better = if matches!(self, Aggregator::Min) {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
                if !new.is_null() && (current.value.is_null() || new.compare(&current.value) == Some(better)) {
                    new.clone()
                } else if !old.is_null() && old.loosely_equals(&current.value) && !new.loosely_equals(old) {
                    return rescan();
                } else {
                    current.value.clone()
                }
            }
            Aggregator::Unique => {
                if child_count <= 1 {
                    new.clone()
                } else if current.value == Value::Multiple {
                    return rescan();
                } else if *new == current.value {
                    current.value.clone()
                } else {
                    Value::Multiple
                }
            }
            Aggregator::Single => {
                if cell.present != 1 {
                    Value::Null
                } else if !new.is_null() {
                    new.clone()
                } else {
                    return rescan();
                }
            }
            Aggregator::Null => Value::Null,
            Aggregator::Custom(_) => return rescan(),
        };
        cell
    }

    fn from_accumulator(&self, acc: &AggregateAccumulator) -> Value {
        match self {
            Aggregator::Sum if acc.count_numbers > 0 => Value::number(acc.total()),
            Aggregator::SumStrict if acc.count > 0 && acc.count_numbers == acc.count => {
                Value::number(acc.total())
            }
            Aggregator::Avg if acc.count_numbers > 0 => {
                Value::number(acc.total() / acc.count_numbers as f64)
            }
            Aggregator::AvgStrict if acc.count > 0 && acc.count_numbers == acc.count => {
                Value::number(acc.total() / acc.count as f64)
            }
            _ => Value::Null,
        }
    }
}

/// Smallest (`Less`) or largest (`Greater`) non-null child value. Values that
/// cannot be ordered against the current pick are skipped.
fn extremum(children: &[ChildCell<'_>], want: Ordering) -> Value {
    let mut best: Option<&Value> = None;
    for child in children.iter().filter(|c| !c.value.is_null()) {
        best = match best {
            None => Some(child.value),
            Some(b) if child.value.compare(b) == Some(want) => Some(child.value),
            keep => keep,
        };
    }
    best.cloned().unwrap_or_default()
}

impl fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Aggregator({})", self.name())
    }
}

impl PartialEq for Aggregator {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Aggregator::Custom(a), Aggregator::Custom(b)) => Arc::ptr_eq(a, b),
            (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b),
        }
    }
}
