//! FILENAME: core/cube-engine/src/definition.rs
//! Cube Definition - The serializable configuration.
//!
//! This module contains the types needed to DESCRIBE a cube and a query over it.
//! These structures are designed to be:
//! - Loadable from JSON
//! - Free of callbacks (policy functions are attached through builders on
//!   `CubeField` and `QueryConfig`)

use serde::{Deserialize, Serialize};

use crate::error::CubeError;

/// Unique identifier for a view within a cube.
pub type ViewId = u32;

/// Index into a query's field list (0-based).
pub type FieldIndex = usize;

pub const DEFAULT_ID_FIELD: &str = "id";

// ============================================================================
// FIELD CONFIG
// ============================================================================

/// Configuration for one cube field. Optional keys that are left unset are
/// filled from `CubeConfig::field_defaults`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CubeFieldConfig {
    pub name: String,

    /// Field type token (`"number"`, `"localDate"`, ...). Defaults to `auto`.
    #[serde(rename = "type", default)]
    pub field_type: Option<String>,

    #[serde(default)]
    pub display_name: Option<String>,

    /// Raw value substituted for null or missing values.
    #[serde(default)]
    pub default_value: serde_json::Value,

    /// Whether the field may be used to group records.
    #[serde(default)]
    pub is_dimension: Option<bool>,

    /// Aggregator token (`"SUM"`, `"MAX"`, ...). Unset means the field is not aggregated.
    #[serde(default)]
    pub aggregator: Option<String>,

    /// Grouping stops at this dimension: later dimensions in a query are dropped.
    #[serde(default)]
    pub is_leaf_dimension: Option<bool>,

    /// Name of a dimension this one refines. A single child grouped by this
    /// dimension with the same value as its parent is collapsed into the parent.
    #[serde(default)]
    pub parent_dimension: Option<String>,
}

/// Defaults merged under every field config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefaults {
    #[serde(rename = "type", default)]
    pub field_type: Option<String>,
    #[serde(default)]
    pub default_value: serde_json::Value,
    #[serde(default)]
    pub is_dimension: Option<bool>,
    #[serde(default)]
    pub aggregator: Option<String>,
    #[serde(default)]
    pub is_leaf_dimension: Option<bool>,
    #[serde(default)]
    pub parent_dimension: Option<String>,
}

impl CubeFieldConfig {
    pub fn new(name: impl Into<String>) -> Self {
        CubeFieldConfig {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Fills keys left unset in this config from `defaults`.
    pub fn with_defaults(mut self, defaults: &FieldDefaults) -> Self {
        if self.field_type.is_none() {
            self.field_type = defaults.field_type.clone();
        }
        if self.default_value.is_null() {
            self.default_value = defaults.default_value.clone();
        }
        if self.is_dimension.is_none() {
            self.is_dimension = defaults.is_dimension;
        }
        if self.aggregator.is_none() {
            self.aggregator = defaults.aggregator.clone();
        }
        if self.is_leaf_dimension.is_none() {
            self.is_leaf_dimension = defaults.is_leaf_dimension;
        }
        if self.parent_dimension.is_none() {
            self.parent_dimension = defaults.parent_dimension.clone();
        }
        self
    }
}

// ============================================================================
// CUBE CONFIG
// ============================================================================

fn default_id_field() -> String {
    DEFAULT_ID_FIELD.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CubeConfig {
    pub fields: Vec<CubeFieldConfig>,

    #[serde(default)]
    pub field_defaults: FieldDefaults,

    /// Key of the raw record property holding the record id.
    #[serde(default = "default_id_field")]
    pub id_field: String,

    /// Initial raw records.
    #[serde(default)]
    pub data: Vec<serde_json::Value>,

    /// App-defined metadata carried alongside the data.
    #[serde(default)]
    pub info: serde_json::Map<String, serde_json::Value>,
}

impl Default for CubeConfig {
    fn default() -> Self {
        CubeConfig {
            fields: Vec::new(),
            field_defaults: FieldDefaults::default(),
            id_field: default_id_field(),
            data: Vec::new(),
            info: serde_json::Map::new(),
        }
    }
}

impl CubeConfig {
    pub fn from_json(text: &str) -> Result<Self, CubeError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Field configs with `field_defaults` applied.
    pub fn resolved_fields(&self) -> Vec<CubeFieldConfig> {
        self.fields
            .iter()
            .cloned()
            .map(|f| f.with_defaults(&self.field_defaults))
            .collect()
    }
}

// ============================================================================
// QUERY SPEC
// ============================================================================

/// The JSON-shaped part of a query. Callbacks are added on `QueryConfig`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySpec {
    /// Ordered dimension names to group by.
    #[serde(default)]
    pub dimensions: Vec<String>,

    /// Fields to include. `None` means every cube field.
    #[serde(default)]
    pub fields: Option<Vec<String>>,

    /// Filter in `parse_filter` JSON form.
    #[serde(default)]
    pub filter: serde_json::Value,

    /// Expose the grand-total row as the single top-level row.
    #[serde(default)]
    pub include_root: bool,

    /// Expose leaf rows beneath the lowest grouping level.
    #[serde(default)]
    pub include_leaves: bool,
}
