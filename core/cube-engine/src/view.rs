//! FILENAME: core/cube-engine/src/view.rs
//! PURPOSE: Builds, renders and incrementally updates the row tree for one query.
//! CONTEXT: A view owns its arena outright. A full update regroups every record
//! that passes the filter; a data-only update walks from one leaf to the root,
//! folding the change into each ancestor with its aggregator's `replace`.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use data::{ChangeLog, RecordChange, RecordId, SourceRecord, Value};
use log::{debug, trace};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::aggregate::{Aggregator, CellUpdate, FieldUpdate, MeasureCell};
use crate::definition::FieldIndex;
use crate::error::CubeError;
use crate::field::{AppliedDimensions, CubeField};
use crate::query::{Query, QueryConfig};
use crate::render::RenderRow;
use crate::row::{group_row_id, RowId, RowKind, RowNode, RowRef, RowTree, RECORD_ID_DELIMITER, ROOT_ID, ROOT_LABEL};

// ============================================================================
// RESULT TYPES
// ============================================================================

/// Rows whose visible values changed during an incremental update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet(FxHashSet<RowId>);

impl ChangeSet {
    pub fn new() -> Self {
        ChangeSet::default()
    }

    pub fn insert(&mut self, row: RowId) -> bool {
        self.0.insert(row)
    }

    pub fn contains(&self, row: RowId) -> bool {
        self.0.contains(&row)
    }

    pub fn extend(&mut self, other: ChangeSet) {
        self.0.extend(other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Changed rows in arena order.
    pub fn rows(&self) -> Vec<RowId> {
        let mut rows: Vec<RowId> = self.0.iter().copied().collect();
        rows.sort();
        rows
    }
}

/// How a view responded to a change in its cube.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewChange {
    Unchanged,
    Patched(ChangeSet),
    Rebuilt,
}

/// Distinct values of one query dimension across the view's records.
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionValues {
    pub name: String,
    pub values: Vec<Value>,
}

// ============================================================================
// VIEW
// ============================================================================

pub struct View {
    query: Query,
    tree: RowTree,
    root: RowId,
    leaf_map: FxHashMap<RecordId, RowId>,
    /// Records passing the query filter, in source order.
    records: Vec<Arc<SourceRecord>>,
    record_index: FxHashMap<RecordId, usize>,
    generation: u64,
    last_updated: DateTime<Utc>,
}

/// Resolves `config` against `fields` and builds a view over `records`.
pub fn build_view(
    records: &[Arc<SourceRecord>],
    fields: &[Arc<CubeField>],
    config: QueryConfig,
) -> Result<View, CubeError> {
    let query = Query::new(config, fields)?;
    Ok(View::new(query, records))
}

impl View {
    pub fn new(query: Query, records: &[Arc<SourceRecord>]) -> Self {
        let mut view = View {
            tree: RowTree::new(query.fields.clone()),
            query,
            root: RowId(0),
            leaf_map: FxHashMap::default(),
            records: Vec::new(),
            record_index: FxHashMap::default(),
            generation: 0,
            last_updated: Utc::now(),
        };
        view.full_update(records);
        view
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Replaces the query and rebuilds.
    pub fn set_query(&mut self, query: Query, records: &[Arc<SourceRecord>]) {
        self.query = query;
        self.full_update(records);
    }

    pub fn records(&self) -> &[Arc<SourceRecord>] {
        &self.records
    }

    /// Incremented on every full rebuild. Row ids from an older generation are stale.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    pub fn row_count(&self) -> usize {
        self.tree.len()
    }

    // ------------------------------------------------------------------------
    // Full rebuild
    // ------------------------------------------------------------------------

    /// Filters `all_records` and regenerates the whole tree.
    pub fn full_update(&mut self, all_records: &[Arc<SourceRecord>]) {
        let start = Instant::now();

        self.records = all_records
            .iter()
            .filter(|r| self.query.test(r))
            .cloned()
            .collect();
        self.record_index = self
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();

        self.tree = RowTree::new(self.query.fields.clone());
        self.leaf_map = FxHashMap::default();
        self.generate_rows();

        self.generation += 1;
        self.last_updated = Utc::now();
        debug!(
            "Rebuilt view: {} of {} records, {} rows in {:?}",
            self.records.len(),
            all_records.len(),
            self.tree.len(),
            start.elapsed()
        );
    }

    fn generate_rows(&mut self) {
        let records = self.records.clone();
        let dims = self.query.dimensions.clone();
        let applied = AppliedDimensions::new();

        let children = self.group_and_insert(records, &dims, ROOT_ID, &applied);
        let children = self.bucket_rows(children, ROOT_ID, &applied);
        self.root = self.push_aggregate(
            ROOT_ID.to_string(),
            RowKind::Aggregate { dim: None },
            Value::from(ROOT_LABEL),
            children,
            None,
            &applied,
        );
    }

    /// Partitions `records` by the first of `dims`, in order of first appearance,
    /// and recurses. Records left once `dims` is exhausted become leaves.
    fn group_and_insert(
        &mut self,
        records: Vec<Arc<SourceRecord>>,
        dims: &[FieldIndex],
        parent_id: &str,
        applied: &AppliedDimensions,
    ) -> Vec<RowId> {
        if records.is_empty() {
            return Vec::new();
        }
        let Some((&dim, rest)) = dims.split_first() else {
            return records
                .into_iter()
                .map(|record| {
                    let id = format!("{}{}{}", parent_id, RECORD_ID_DELIMITER, record.id);
                    let record_id = record.id.clone();
                    let row = self.tree.push(RowNode {
                        id,
                        kind: RowKind::Leaf { record },
                        label: Value::Null,
                        parent: None,
                        children: Vec::new(),
                        cells: Vec::new(),
                        can_aggregate: Vec::new(),
                        buckets: Default::default(),
                    });
                    self.leaf_map.insert(record_id, row);
                    row
                })
                .collect();
        };

        let dim_field = Arc::clone(&self.query.fields[dim]);
        let dim_name = dim_field.name();

        let mut groups: Vec<(Value, Vec<Arc<SourceRecord>>)> = Vec::new();
        let mut group_index: FxHashMap<Value, usize> = FxHashMap::default();
        for record in records {
            let value = record.get(dim_name).clone();
            match group_index.get(&value) {
                Some(&i) => groups[i].1.push(record),
                None => {
                    group_index.insert(value.clone(), groups.len());
                    groups.push((value, vec![record]));
                }
            }
        }

        groups
            .into_iter()
            .map(|(value, group)| {
                let applied = applied.with(dim_name, value.clone());
                let id = group_row_id(parent_id, dim_name, &value);
                let children = self.group_and_insert(group, rest, &id, &applied);
                let children = self.bucket_rows(children, &id, &applied);
                self.push_aggregate(
                    id,
                    RowKind::Aggregate { dim: Some(dim) },
                    value,
                    children,
                    Some(dim_name),
                    &applied,
                )
            })
            .collect()
    }

    /// Wraps rows in bucket rows when the query's bucket spec assigns them a value.
    fn bucket_rows(&mut self, rows: Vec<RowId>, parent_id: &str, applied: &AppliedDimensions) -> Vec<RowId> {
        let Some(spec_fn) = self.query.bucket_spec_fn.clone() else {
            return rows;
        };
        if rows.is_empty() {
            return rows;
        }
        if !self.query.include_leaves && self.tree.node(rows[0]).is_leaf() {
            return rows;
        }

        let refs: Vec<RowRef<'_>> = rows.iter().map(|&r| self.tree.row_ref(r)).collect();
        let Some(spec) = spec_fn(&refs) else {
            return rows;
        };
        let assigned: Vec<Value> = refs.iter().map(|r| (spec.bucket_fn)(r)).collect();
        drop(refs);

        let mut ret = Vec::with_capacity(rows.len());
        let mut buckets: Vec<(Value, Vec<RowId>)> = Vec::new();
        for (row, value) in rows.into_iter().zip(assigned) {
            if value.is_null() {
                ret.push(row);
                continue;
            }
            match buckets.iter_mut().find(|(v, _)| *v == value) {
                Some((_, members)) => members.push(row),
                None => buckets.push((value, vec![row])),
            }
        }

        for (value, members) in buckets {
            let id = group_row_id(parent_id, &spec.name, &value);
            let bucket = self.push_aggregate(
                id,
                RowKind::Bucket {
                    name: spec.name.clone(),
                },
                value.clone(),
                members,
                Some(spec.name.as_str()),
                applied,
            );
            self.tree.note_bucketed(bucket, &spec.name, &value);
            ret.push(bucket);
        }
        ret
    }

    /// Adds an aggregate or bucket row over `children` and computes its cells.
    fn push_aggregate(
        &mut self,
        id: String,
        kind: RowKind,
        label: Value,
        children: Vec<RowId>,
        dim_name: Option<&str>,
        applied: &AppliedDimensions,
    ) -> RowId {
        let can_aggregate: Vec<bool> = self
            .query
            .fields
            .iter()
            .map(|f| f.can_aggregate(dim_name, &label, applied))
            .collect();

        let cells: Vec<MeasureCell> = self
            .query
            .fields
            .iter()
            .enumerate()
            .map(|(i, field)| {
                match (&field.aggregator, can_aggregate[i]) {
                    (Some(agg), true) => {
                        let child_cells: Vec<_> = children.iter().map(|&c| self.tree.child_cell(c, i)).collect();
                        agg.aggregate(&child_cells)
                    }
                    _ => MeasureCell::fixed(applied.get(field.name()).cloned().unwrap_or_default()),
                }
            })
            .collect();

        let row = self.tree.push(RowNode {
            id,
            kind,
            label,
            parent: None,
            children: children.clone(),
            cells,
            can_aggregate,
            buckets: Default::default(),
        });
        for child in children {
            self.tree.node_mut(child).parent = Some(row);
        }
        row
    }

    // ------------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------------

    /// The rows exposed to a grid: `[root]` when the query includes the root,
    /// otherwise the root's visible children.
    pub fn rows(&self) -> Vec<RenderRow> {
        if self.query.include_root {
            return self.visible_datas(self.root);
        }
        let root = self.tree.node(self.root);
        if !self.query.include_leaves && root.children.first().is_some_and(|&c| self.tree.node(c).is_leaf()) {
            return Vec::new();
        }
        self.visible_list(&root.children)
    }

    /// The grand-total row with its visible children.
    pub fn root_row(&self) -> RenderRow {
        let (children, locked) = self.visible_children(self.root);
        let mut row = self.snapshot(self.root);
        row.children = children;
        row.locked = locked;
        row
    }

    pub fn root(&self) -> RowId {
        self.root
    }

    pub fn row(&self, row: RowId) -> Option<RowRef<'_>> {
        self.tree.get(row).map(|_| self.tree.row_ref(row))
    }

    /// One row's own data, without children.
    pub fn row_data(&self, row: RowId) -> Option<RenderRow> {
        self.tree.get(row).map(|_| self.snapshot(row))
    }

    pub fn leaf_for(&self, record_id: &str) -> Option<RowId> {
        self.leaf_map.get(record_id).copied()
    }

    fn snapshot(&self, row: RowId) -> RenderRow {
        let node = self.tree.node(row);
        let data = self
            .query
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name().to_string(), self.tree.value(row, i).clone()))
            .collect();
        RenderRow {
            id: node.id.clone(),
            cube_label: node.label.clone(),
            cube_dimension: self.tree.row_ref(row).dimension().map(str::to_string),
            locked: false,
            buckets: node.buckets.clone(),
            data,
            children: None,
            row,
        }
    }

    /// The row itself, or its visible children when it is omitted.
    fn visible_datas(&self, row: RowId) -> Vec<RenderRow> {
        let (mut children, locked) = self.visible_children(row);

        while let Some([only]) = children.as_deref() {
            if self.is_redundant_child(row, only.row) {
                children = only.children.clone();
            } else {
                break;
            }
        }

        let mut data = self.snapshot(row);
        data.children = children;
        data.locked = locked;
        vec![data]
    }

    fn visible_children(&self, row: RowId) -> (Option<Vec<RenderRow>>, bool) {
        let node = self.tree.node(row);
        let Some(&first) = node.children.first() else {
            return (None, false);
        };
        if !self.query.include_leaves && self.tree.node(first).is_leaf() {
            return (None, false);
        }
        if let Some(lock_fn) = &self.query.lock_fn {
            if lock_fn(&self.tree.row_ref(row)) {
                return (None, true);
            }
        }
        (Some(self.visible_list(&node.children)), false)
    }

    /// Renders sibling rows. A lone non-leaf child the omit policy rejects is
    /// replaced by its own visible children.
    fn visible_list(&self, rows: &[RowId]) -> Vec<RenderRow> {
        if let ([only], Some(omit_fn)) = (rows, &self.query.omit_fn) {
            let only_ref = self.tree.row_ref(*only);
            if !only_ref.is_leaf() && omit_fn(&only_ref) {
                return self.visible_children(*only).0.unwrap_or_default();
            }
        }
        rows.iter().flat_map(|&r| self.visible_datas(r)).collect()
    }

    /// A single child grouped by a dimension declared to refine the parent's
    /// dimension, holding the same value, adds nothing.
    fn is_redundant_child(&self, parent: RowId, child: RowId) -> bool {
        let (RowKind::Aggregate { dim: Some(pd) }, RowKind::Aggregate { dim: Some(cd) }) =
            (&self.tree.node(parent).kind, &self.tree.node(child).kind)
        else {
            return false;
        };
        let (parent_dim, child_dim) = (&self.query.fields[*pd], &self.query.fields[*cd]);
        child_dim.parent_dimension.as_deref() == Some(parent_dim.name())
            && self.tree.value(child, *cd) == self.tree.value(parent, *pd)
    }

    // ------------------------------------------------------------------------
    // Incremental updates
    // ------------------------------------------------------------------------

    /// Applies field changes to one record in place, re-aggregating only the
    /// leaf's ancestors. Updates to grouping dimensions are rejected because they
    /// would move the leaf. Old values are taken from the view's own record.
    /// A record that no longer passes the filter drops out of the view, which
    /// then rebuilds over its remaining records.
    pub fn apply_data_update(&mut self, record_id: &str, updates: &[FieldUpdate]) -> Result<ViewChange, CubeError> {
        let leaf = self
            .leaf_for(record_id)
            .ok_or_else(|| CubeError::UnknownRecord(record_id.to_string()))?;
        for update in updates {
            if let Some(i) = self.query.field_index(&update.field) {
                if self.query.is_dimension(i) {
                    return Err(CubeError::DimensionUpdate(update.field.clone()));
                }
            }
        }

        let RowKind::Leaf { record } = &self.tree.node(leaf).kind else {
            return Err(CubeError::UnknownRecord(record_id.to_string()));
        };
        let mut new_record = SourceRecord::clone(record);
        for update in updates {
            new_record.set(update.field.clone(), update.new_value.clone());
        }
        let new_record = Arc::new(new_record);
        if !self.query.test(&new_record) {
            self.replace_and_rebuild(&[new_record]);
            return Ok(ViewChange::Rebuilt);
        }
        Ok(ViewChange::Patched(self.patch_leaf(leaf, new_record)))
    }

    /// Replaces records already in the view with new versions, as long as no
    /// grouping dimension changed. Rebuilds if any of them fails the filter.
    pub fn apply_record_updates(&mut self, records: &[Arc<SourceRecord>]) -> Result<ViewChange, CubeError> {
        for record in records {
            let leaf = self
                .leaf_for(&record.id)
                .ok_or_else(|| CubeError::UnknownRecord(record.id.clone()))?;
            if let Some(dim) = self.changed_dimension(leaf, record) {
                return Err(CubeError::DimensionUpdate(dim));
            }
        }
        if records.iter().any(|r| !self.query.test(r)) {
            self.replace_and_rebuild(records);
            return Ok(ViewChange::Rebuilt);
        }
        let mut changes = ChangeSet::new();
        for record in records {
            if let Some(leaf) = self.leaf_for(&record.id) {
                changes.extend(self.patch_leaf(leaf, Arc::clone(record)));
            }
        }
        Ok(ViewChange::Patched(changes))
    }

    /// Substitutes `updated` into the view's own records and regroups them.
    fn replace_and_rebuild(&mut self, updated: &[Arc<SourceRecord>]) {
        let mut records = self.records.clone();
        for record in updated {
            if let Some(&i) = self.record_index.get(&record.id) {
                records[i] = Arc::clone(record);
            }
        }
        debug!("Record left the filter of a view; rebuilding");
        self.full_update(&records);
    }

    /// Reacts to a store change: patches in place when only measure values of
    /// rows already in the view changed, otherwise rebuilds.
    pub fn note_cube_updated(&mut self, change_log: Option<&ChangeLog>, all_records: &[Arc<SourceRecord>]) -> ViewChange {
        let Some(log) = change_log else {
            return ViewChange::Unchanged;
        };
        let Some(updates) = self.simple_updates(log) else {
            self.full_update(all_records);
            return ViewChange::Rebuilt;
        };
        if updates.is_empty() {
            return ViewChange::Unchanged;
        }

        let mut changes = ChangeSet::new();
        for record in updates {
            if let Some(leaf) = self.leaf_for(&record.id) {
                changes.extend(self.patch_leaf(leaf, record));
            }
        }
        self.last_updated = Utc::now();
        ViewChange::Patched(changes)
    }

    /// Updates that can be applied to existing leaves, or `None` if the change
    /// alters which records are in the view, moves a record between groups, or
    /// involves an aggregator that needs more than its row's children.
    fn simple_updates(&self, log: &ChangeLog) -> Option<Vec<Arc<SourceRecord>>> {
        if !self.query.aggregators_are_simple() {
            return None;
        }

        let mut ret = Vec::new();
        if self.query.filter.is_none() {
            if !log.add.is_empty() || !log.remove.is_empty() {
                return None;
            }
            ret.extend(log.update.iter().map(|RecordChange { new, .. }| Arc::clone(new)));
        } else {
            if log.add.iter().any(|r| self.query.test(r)) {
                return None;
            }
            if log.remove.iter().any(|id| self.leaf_map.contains_key(id)) {
                return None;
            }
            for RecordChange { new, .. } in &log.update {
                let passes = self.query.test(new);
                let present = self.leaf_map.contains_key(&new.id);
                if passes != present {
                    return None;
                }
                if present {
                    ret.push(Arc::clone(new));
                }
            }
        }

        for record in &ret {
            let leaf = self.leaf_for(&record.id)?;
            if self.changed_dimension(leaf, record).is_some() {
                return None;
            }
        }
        Some(ret)
    }

    /// The field's aggregator, if `row` aggregates it.
    fn aggregator_at(&self, row: RowId, field: FieldIndex) -> Option<Aggregator> {
        if !self.tree.node(row).can_aggregate[field] {
            return None;
        }
        self.query.fields[field].aggregator.clone()
    }

    fn changed_dimension(&self, leaf: RowId, record: &SourceRecord) -> Option<String> {
        let RowKind::Leaf { record: current } = &self.tree.node(leaf).kind else {
            return None;
        };
        self.query
            .dimension_fields()
            .find(|d| current.get(d.name()) != record.get(d.name()))
            .map(|d| d.name().to_string())
    }

    /// Swaps a leaf's record and folds the changed values up the ancestor chain,
    /// stopping at the first row whose cells come out unchanged.
    fn patch_leaf(&mut self, leaf: RowId, record: Arc<SourceRecord>) -> ChangeSet {
        let mut changes = ChangeSet::new();

        let RowKind::Leaf { record: current } = &self.tree.node(leaf).kind else {
            return changes;
        };
        let mut updates: Vec<(FieldIndex, CellUpdate)> = self
            .query
            .fields
            .iter()
            .enumerate()
            .filter_map(|(i, f)| {
                let (old, new) = (current.get(f.name()), record.get(f.name()));
                (old != new).then(|| (i, CellUpdate::for_leaf(old.clone(), new.clone())))
            })
            .collect();

        if let Some(&i) = self.record_index.get(&record.id) {
            self.records[i] = Arc::clone(&record);
        }
        self.tree.node_mut(leaf).kind = RowKind::Leaf { record };
        if updates.is_empty() {
            return changes;
        }
        changes.insert(leaf);

        let mut next = self.tree.node(leaf).parent;
        let mut depth = 0;
        while let Some(row) = next {
            let child_count = self.tree.node(row).children.len();
            let mut visible_change = false;
            let mut parent_updates = Vec::with_capacity(updates.len());

            for (field, update) in &updates {
                let Some(agg) = self.aggregator_at(row, *field) else {
                    // Fixed cells do not depend on their children.
                    continue;
                };
                let current = self.tree.node(row).cells[*field].clone();
                let new_cell = {
                    let tree = &self.tree;
                    agg.replace(&current, update, child_count, &|| tree.compute_cell(row, *field))
                };
                if new_cell == current {
                    continue;
                }
                if new_cell.value != current.value {
                    visible_change = true;
                }
                parent_updates.push((
                    *field,
                    CellUpdate {
                        old_value: current.value,
                        new_value: new_cell.value.clone(),
                        old_acc: current.acc,
                        new_acc: new_cell.acc,
                    },
                ));
                self.tree.node_mut(row).cells[*field] = new_cell;
            }

            if visible_change {
                changes.insert(row);
            }
            if parent_updates.is_empty() {
                break;
            }
            updates = parent_updates;
            next = self.tree.node(row).parent;
            depth += 1;
        }

        trace!(
            "Patched leaf {}: {} rows changed, {} levels visited",
            self.tree.node(leaf).id,
            changes.len(),
            depth
        );
        changes
    }

    // ------------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------------

    /// Distinct values of each query dimension across the view's records, in
    /// order of first appearance.
    pub fn get_dimension_values(&self) -> Vec<DimensionValues> {
        self.query
            .dimension_fields()
            .map(|dim| {
                let mut seen: FxHashSet<&Value> = FxHashSet::default();
                let values = self
                    .records
                    .iter()
                    .map(|r| r.get(dim.name()))
                    .filter(|v| seen.insert(*v))
                    .cloned()
                    .collect();
                DimensionValues {
                    name: dim.name().to_string(),
                    values,
                }
            })
            .collect()
    }
}
