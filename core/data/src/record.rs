//! FILENAME: core/data/src/record.rs
//! PURPOSE: Source records and the store that owns them.
//! CONTEXT: Records are parsed once through the field registry and then shared
//! read-only (`Arc<SourceRecord>`) by every view built over the store. A record
//! is never mutated in place: updates replace it with a new `Arc`.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

use crate::error::DataError;
use crate::field::Field;
use crate::value::Value;

pub type RecordId = String;

// ============================================================================
// SOURCE RECORD
// ============================================================================

/// One flat fact row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRecord {
    pub id: RecordId,
    pub data: FxHashMap<String, Value>,
}

impl SourceRecord {
    pub fn new(id: impl Into<RecordId>) -> Self {
        SourceRecord {
            id: id.into(),
            data: FxHashMap::default(),
        }
    }

    /// Builder form of `set`.
    pub fn with_value(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(field.into(), value.into());
    }

    /// Value for `field`, `Null` when absent.
    pub fn get(&self, field: &str) -> &Value {
        self.data.get(field).unwrap_or(Value::null_ref())
    }

    /// Parses a raw JSON object through `fields`. The id is read from `id_field`;
    /// numeric ids are accepted and stored in their text form.
    pub fn from_raw(
        raw: &serde_json::Value,
        fields: &[Field],
        id_field: &str,
    ) -> Result<Self, DataError> {
        let obj = raw
            .as_object()
            .ok_or_else(|| DataError::InvalidRecord(raw.to_string()))?;

        let id = match obj.get(id_field) {
            None | Some(serde_json::Value::Null) => {
                return Err(DataError::MissingRecordId(id_field.to_string()))
            }
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => Value::from_json(other).to_string(),
        };

        let mut record = SourceRecord::new(id);
        for field in fields {
            record
                .data
                .insert(field.name.clone(), field.parse_val(obj.get(&field.name)));
        }
        Ok(record)
    }

    /// Fields whose values differ between two versions of a record.
    pub fn changed_fields<'a>(&self, other: &SourceRecord, fields: &'a [Field]) -> Vec<&'a Field> {
        fields
            .iter()
            .filter(|f| !f.is_equal(self.get(&f.name), other.get(&f.name)))
            .collect()
    }
}

// ============================================================================
// TRANSACTIONS
// ============================================================================

/// A batch of raw changes applied atomically to a `RecordStore`.
#[derive(Debug, Clone, Default)]
pub struct StoreTransaction {
    /// New raw records. Ids must not already exist.
    pub add: Vec<serde_json::Value>,
    /// Replacements for existing raw records, matched by id.
    pub update: Vec<serde_json::Value>,
    /// Ids of records to remove.
    pub remove: Vec<RecordId>,
    /// Raw records added when new and replacing otherwise.
    pub upsert: Vec<serde_json::Value>,
}

impl StoreTransaction {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.update.is_empty() && self.remove.is_empty() && self.upsert.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordChange {
    pub old: Arc<SourceRecord>,
    pub new: Arc<SourceRecord>,
}

/// What actually changed in a store. Updates that left a record unchanged are dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeLog {
    pub add: Vec<Arc<SourceRecord>>,
    pub update: Vec<RecordChange>,
    pub remove: Vec<RecordId>,
}

impl ChangeLog {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.update.is_empty() && self.remove.is_empty()
    }
}

// ============================================================================
// RECORD STORE
// ============================================================================

/// Ordered, id-indexed collection of parsed records.
#[derive(Debug, Clone)]
pub struct RecordStore {
    fields: Vec<Field>,
    id_field: String,
    records: Vec<Arc<SourceRecord>>,
    index: FxHashMap<RecordId, usize>,
}

impl RecordStore {
    pub fn new(fields: Vec<Field>, id_field: impl Into<String>) -> Self {
        RecordStore {
            fields,
            id_field: id_field.into(),
            records: Vec::new(),
            index: FxHashMap::default(),
        }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn get_field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    pub fn records(&self) -> &[Arc<SourceRecord>] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get_by_id(&self, id: &str) -> Option<&Arc<SourceRecord>> {
        self.index.get(id).map(|&i| &self.records[i])
    }

    pub fn parse_record(&self, raw: &serde_json::Value) -> Result<SourceRecord, DataError> {
        SourceRecord::from_raw(raw, &self.fields, &self.id_field)
    }

    /// Replaces the entire contents of the store. On error the store is left untouched.
    pub fn load_data(&mut self, raw: &[serde_json::Value]) -> Result<(), DataError> {
        let mut records = Vec::with_capacity(raw.len());
        let mut index = FxHashMap::default();
        for item in raw {
            let record = self.parse_record(item)?;
            if index.insert(record.id.clone(), records.len()).is_some() {
                return Err(DataError::DuplicateRecordId(record.id));
            }
            records.push(Arc::new(record));
        }
        self.records = records;
        self.index = index;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.index.clear();
    }

    /// Applies a transaction. Everything is parsed and validated before the store
    /// is modified. Returns `None` when the transaction changed nothing.
    pub fn update_data(&mut self, tx: StoreTransaction) -> Result<Option<ChangeLog>, DataError> {
        let mut log = ChangeLog::default();
        let mut add = Vec::new();
        let mut update = Vec::new();

        for raw in &tx.add {
            add.push(self.parse_record(raw)?);
        }
        for raw in &tx.update {
            let record = self.parse_record(raw)?;
            if !self.index.contains_key(&record.id) {
                return Err(DataError::UnknownRecord(record.id));
            }
            update.push(record);
        }
        for raw in &tx.upsert {
            let record = self.parse_record(raw)?;
            if self.index.contains_key(&record.id) {
                update.push(record);
            } else {
                add.push(record);
            }
        }

        let removed: FxHashSet<&str> = tx.remove.iter().map(String::as_str).collect();
        for id in &removed {
            if !self.index.contains_key(*id) {
                return Err(DataError::UnknownRecord(id.to_string()));
            }
        }
        let mut seen: FxHashSet<&str> = FxHashSet::default();
        for record in &add {
            let exists = self.index.contains_key(&record.id) && !removed.contains(record.id.as_str());
            if exists || !seen.insert(record.id.as_str()) {
                return Err(DataError::DuplicateRecordId(record.id.clone()));
            }
        }

        // Validated, now mutate.
        for record in update {
            let Some(&i) = self.index.get(&record.id) else {
                continue;
            };
            if *self.records[i] == record {
                continue;
            }
            let new = Arc::new(record);
            let old = std::mem::replace(&mut self.records[i], Arc::clone(&new));
            log.update.push(RecordChange { old, new });
        }

        if !removed.is_empty() {
            self.records.retain(|r| !removed.contains(r.id.as_str()));
            log.remove = tx.remove.clone();
        }

        for record in add {
            let record = Arc::new(record);
            self.records.push(Arc::clone(&record));
            log.add.push(record);
        }

        self.rebuild_index();

        if log.is_empty() {
            Ok(None)
        } else {
            Ok(Some(log))
        }
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn make_store() -> RecordStore {
        let mut store = RecordStore::new(
            vec![
                Field::new("id", FieldType::String),
                Field::new("region", FieldType::String),
                Field::new("amt", FieldType::Number),
            ],
            "id",
        );
        store
            .load_data(&[
                json!({"id": "a", "region": "East", "amt": 10}),
                json!({"id": "b", "region": "East", "amt": 20}),
                json!({"id": "c", "region": "West", "amt": 5}),
            ])
            .unwrap();
        store
    }

    #[test]
    fn test_load_parses_through_fields() {
        let store = make_store();
        assert_eq!(store.len(), 3);
        let a = store.get_by_id("a").unwrap();
        assert_eq!(a.get("amt"), &Value::number(10.0));
        assert_eq!(a.get("missing"), &Value::Null);
    }

    #[test]
    fn test_load_rejects_duplicates_and_missing_ids() {
        let mut store = make_store();
        let err = store
            .load_data(&[json!({"id": "x"}), json!({"id": "x"})])
            .unwrap_err();
        assert_eq!(err, DataError::DuplicateRecordId("x".to_string()));
        assert_eq!(store.len(), 3);

        let err = store.load_data(&[json!({"region": "East"})]).unwrap_err();
        assert_eq!(err, DataError::MissingRecordId("id".to_string()));
    }

    #[test]
    fn test_numeric_ids_are_text() {
        let record = SourceRecord::from_raw(&json!({"id": 42}), &[], "id").unwrap();
        assert_eq!(record.id, "42");
    }

    #[test]
    fn test_update_logs_only_real_changes() {
        let mut store = make_store();
        let log = store
            .update_data(StoreTransaction {
                update: vec![
                    json!({"id": "a", "region": "East", "amt": 15}),
                    json!({"id": "b", "region": "East", "amt": 20}),
                ],
                ..Default::default()
            })
            .unwrap()
            .unwrap();
        assert_eq!(log.update.len(), 1);
        assert_eq!(log.update[0].old.get("amt"), &Value::number(10.0));
        assert_eq!(log.update[0].new.get("amt"), &Value::number(15.0));
        assert_eq!(store.get_by_id("a").unwrap().get("amt"), &Value::number(15.0));
    }

    #[test]
    fn test_noop_transaction_returns_none() {
        let mut store = make_store();
        let log = store
            .update_data(StoreTransaction {
                update: vec![json!({"id": "c", "region": "West", "amt": 5})],
                ..Default::default()
            })
            .unwrap();
        assert!(log.is_none());
    }

    #[test]
    fn test_add_remove_and_upsert() {
        let mut store = make_store();
        let log = store
            .update_data(StoreTransaction {
                add: vec![json!({"id": "d", "region": "North", "amt": 1})],
                remove: vec!["b".to_string()],
                upsert: vec![
                    json!({"id": "c", "region": "West", "amt": 6}),
                    json!({"id": "e", "region": "South", "amt": 2}),
                ],
                ..Default::default()
            })
            .unwrap()
            .unwrap();
        assert_eq!(log.add.len(), 2);
        assert_eq!(log.update.len(), 1);
        assert_eq!(log.remove, vec!["b".to_string()]);

        let ids: Vec<&str> = store.records().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "d", "e"]);
        assert_eq!(store.get_by_id("e").unwrap().get("region"), &Value::from("South"));
    }

    #[test]
    fn test_invalid_transaction_leaves_store_untouched() {
        let mut store = make_store();
        let err = store
            .update_data(StoreTransaction {
                update: vec![json!({"id": "a", "amt": 99})],
                remove: vec!["zzz".to_string()],
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err, DataError::UnknownRecord("zzz".to_string()));
        assert_eq!(store.get_by_id("a").unwrap().get("amt"), &Value::number(10.0));
    }
}
