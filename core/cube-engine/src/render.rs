//! FILENAME: core/cube-engine/src/render.rs
//! PURPOSE: Immutable snapshot of a view row, as handed to grid renderers.
//! CONTEXT: Built on demand from the row arena. Only visible children are
//! included, so the nested structure is what a tree grid displays.

use std::collections::BTreeMap;

use data::Value;
use serde::Serialize;

use crate::row::RowId;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRow {
    pub id: String,

    /// Dimension or bucket value for grouped rows, "Total" for the grand total.
    #[serde(skip_serializing_if = "Value::is_null")]
    pub cube_label: Value,

    /// Name of the dimension or bucket that produced the row.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cube_dimension: Option<String>,

    /// True when a lock policy hid this row's children.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub locked: bool,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub buckets: BTreeMap<String, Value>,

    /// Field values keyed by field name.
    #[serde(flatten)]
    pub data: BTreeMap<String, Value>,

    /// `None` for rows without visible children.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<RenderRow>>,

    /// Arena position, for matching against a `ChangeSet`.
    #[serde(skip)]
    pub row: RowId,
}

impl RenderRow {
    pub fn get(&self, field: &str) -> &Value {
        self.data.get(field).unwrap_or(Value::null_ref())
    }

    pub fn children(&self) -> &[RenderRow] {
        self.children.as_deref().unwrap_or(&[])
    }

    /// Depth-first search by path id.
    pub fn find(&self, id: &str) -> Option<&RenderRow> {
        if self.id == id {
            return Some(self);
        }
        self.children().iter().find_map(|c| c.find(id))
    }

    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
