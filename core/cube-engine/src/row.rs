//! FILENAME: core/cube-engine/src/row.rs
//! PURPOSE: The row arena backing a view.
//! CONTEXT: Rows own their children by index. `parent` is a plain back-index used
//! to walk updates upward and is never followed when rendering.

use std::collections::BTreeMap;
use std::sync::Arc;

use data::{SourceRecord, Value};

use crate::aggregate::{AggregateAccumulator, ChildCell, MeasureCell};
use crate::definition::FieldIndex;
use crate::field::CubeField;

/// Separates the path segments of a row id.
pub const RECORD_ID_DELIMITER: &str = ">>";

pub const ROOT_ID: &str = "root";

pub const ROOT_LABEL: &str = "Total";

/// Id of a grouping or bucket row: the parent's id plus `name=[value]`. A null
/// value is written as `null` so its group stays distinct from an empty string.
pub fn group_row_id(parent_id: &str, name: &str, value: &Value) -> String {
    if value.is_null() {
        format!("{}{}{}=[null]", parent_id, RECORD_ID_DELIMITER, name)
    } else {
        format!("{}{}{}=[{}]", parent_id, RECORD_ID_DELIMITER, name, value)
    }
}

/// Position of a row in its view's arena. Stable until the view is rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RowId(pub u32);

#[derive(Debug, Clone)]
pub enum RowKind {
    /// One source record.
    Leaf { record: Arc<SourceRecord> },
    /// A grouping level. `dim` is `None` for the grand total.
    Aggregate { dim: Option<FieldIndex> },
    /// An app-defined grouping of sibling rows.
    Bucket { name: String },
}

#[derive(Debug, Clone)]
pub struct RowNode {
    pub id: String,
    pub kind: RowKind,
    /// Dimension or bucket value shown for the row.
    pub label: Value,
    pub parent: Option<RowId>,
    pub children: Vec<RowId>,
    /// One per view field. Empty for leaves.
    pub cells: Vec<MeasureCell>,
    /// One per view field. Empty for leaves.
    pub can_aggregate: Vec<bool>,
    /// Bucket values applied to this row by enclosing bucket rows.
    pub buckets: BTreeMap<String, Value>,
}

impl RowNode {
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, RowKind::Leaf { .. })
    }
}

// ============================================================================
// ARENA
// ============================================================================

#[derive(Debug, Clone)]
pub struct RowTree {
    fields: Vec<Arc<CubeField>>,
    nodes: Vec<RowNode>,
}

impl RowTree {
    pub fn new(fields: Vec<Arc<CubeField>>) -> Self {
        RowTree {
            fields,
            nodes: Vec::new(),
        }
    }

    pub fn fields(&self) -> &[Arc<CubeField>] {
        &self.fields
    }

    pub fn field_index(&self, name: &str) -> Option<FieldIndex> {
        self.fields.iter().position(|f| f.name() == name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn push(&mut self, node: RowNode) -> RowId {
        let id = RowId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn get(&self, id: RowId) -> Option<&RowNode> {
        self.nodes.get(id.0 as usize)
    }

    pub fn node(&self, id: RowId) -> &RowNode {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: RowId) -> &mut RowNode {
        &mut self.nodes[id.0 as usize]
    }

    /// The row's value for a field: the record value for leaves, the cached
    /// cell value otherwise.
    pub fn value(&self, id: RowId, field: FieldIndex) -> &Value {
        let node = self.node(id);
        match &node.kind {
            RowKind::Leaf { record } => record.get(self.fields[field].name()),
            _ => node
                .cells
                .get(field)
                .map(|c| &c.value)
                .unwrap_or(Value::null_ref()),
        }
    }

    pub fn child_cell(&self, id: RowId, field: FieldIndex) -> ChildCell<'_> {
        let node = self.node(id);
        match &node.kind {
            RowKind::Leaf { record } => {
                let value = record.get(self.fields[field].name());
                ChildCell {
                    value,
                    acc: AggregateAccumulator::of(value),
                }
            }
            _ => match node.cells.get(field) {
                Some(cell) => ChildCell {
                    value: &cell.value,
                    acc: cell.acc,
                },
                None => ChildCell {
                    value: Value::null_ref(),
                    acc: AggregateAccumulator::new(),
                },
            },
        }
    }

    pub fn child_cells(&self, id: RowId, field: FieldIndex) -> Vec<ChildCell<'_>> {
        self.node(id)
            .children
            .iter()
            .map(|&c| self.child_cell(c, field))
            .collect()
    }

    /// Recomputes one cell of an aggregate row from its children. Cells the row
    /// does not aggregate keep their value.
    pub fn compute_cell(&self, id: RowId, field: FieldIndex) -> MeasureCell {
        let node = self.node(id);
        let can_aggregate = node.can_aggregate.get(field).copied().unwrap_or(false);
        match (&self.fields[field].aggregator, can_aggregate) {
            (Some(agg), true) => agg.aggregate(&self.child_cells(id, field)),
            _ => MeasureCell::fixed(
                node.cells
                    .get(field)
                    .map(|c| c.value.clone())
                    .unwrap_or_default(),
            ),
        }
    }

    /// Records `name = value` in the `buckets` of every row beneath `id`.
    pub fn note_bucketed(&mut self, id: RowId, name: &str, value: &Value) {
        let mut stack = self.node(id).children.clone();
        while let Some(next) = stack.pop() {
            let node = self.node_mut(next);
            node.buckets.insert(name.to_string(), value.clone());
            stack.extend(node.children.iter().copied());
        }
    }

    pub fn row_ref(&self, id: RowId) -> RowRef<'_> {
        RowRef { tree: self, id }
    }
}

// ============================================================================
// ROW REF
// ============================================================================

/// Read-only handle to a row, passed to query callbacks.
#[derive(Clone, Copy)]
pub struct RowRef<'a> {
    tree: &'a RowTree,
    id: RowId,
}

impl<'a> RowRef<'a> {
    pub fn row(&self) -> RowId {
        self.id
    }

    pub fn node(&self) -> &'a RowNode {
        self.tree.node(self.id)
    }

    /// Path id, e.g. `root>>region=[East]`.
    pub fn id(&self) -> &'a str {
        &self.node().id
    }

    pub fn is_leaf(&self) -> bool {
        self.node().is_leaf()
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self.node().kind, RowKind::Aggregate { .. })
    }

    pub fn is_bucket(&self) -> bool {
        matches!(self.node().kind, RowKind::Bucket { .. })
    }

    pub fn label(&self) -> &'a Value {
        &self.node().label
    }

    /// Name of the dimension or bucket that produced this row.
    pub fn dimension(&self) -> Option<&'a str> {
        match &self.node().kind {
            RowKind::Aggregate { dim: Some(i) } => Some(self.tree.fields[*i].name()),
            RowKind::Bucket { name } => Some(name),
            _ => None,
        }
    }

    pub fn value(&self, field: &str) -> &'a Value {
        match &self.node().kind {
            RowKind::Leaf { record } => record.get(field),
            _ => match self.tree.field_index(field) {
                Some(i) => self.tree.value(self.id, i),
                None => Value::null_ref(),
            },
        }
    }

    pub fn record(&self) -> Option<&'a SourceRecord> {
        match &self.node().kind {
            RowKind::Leaf { record } => Some(record),
            _ => None,
        }
    }

    pub fn buckets(&self) -> &'a BTreeMap<String, Value> {
        &self.node().buckets
    }

    pub fn parent(&self) -> Option<RowRef<'a>> {
        self.node().parent.map(|p| self.tree.row_ref(p))
    }

    pub fn children(&self) -> impl Iterator<Item = RowRef<'a>> + 'a {
        let tree = self.tree;
        self.node().children.iter().map(move |&c| tree.row_ref(c))
    }

    pub fn child_count(&self) -> usize {
        self.node().children.len()
    }

    /// Distance from the grand total.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.node().parent;
        while let Some(p) = current {
            depth += 1;
            current = self.tree.node(p).parent;
        }
        depth
    }
}
