//! FILENAME: core/cube-engine/src/cube.rs
//! PURPOSE: The cube facade: owns the fields, the record store and the views.
//! CONTEXT: Connected views are notified of every data change. Disconnected
//! views keep the records they were last built from until reconnected by a
//! query update.

use std::sync::Arc;

use data::{RecordStore, SourceRecord, StoreTransaction};
use filter_engine::Filter;
use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::definition::{CubeConfig, ViewId};
use crate::error::CubeError;
use crate::field::CubeField;
use crate::query::{Query, QueryConfig};
use crate::render::RenderRow;
use crate::view::{View, ViewChange};

pub type Info = serde_json::Map<String, serde_json::Value>;

pub struct Cube {
    fields: Vec<Arc<CubeField>>,
    store: RecordStore,
    info: Info,
    views: FxHashMap<ViewId, View>,
    connected: FxHashSet<ViewId>,
    next_view_id: ViewId,
}

impl Cube {
    /// Builds a cube from its serializable config and loads `config.data`.
    pub fn new(config: CubeConfig) -> Result<Self, CubeError> {
        let fields = config
            .resolved_fields()
            .into_iter()
            .map(CubeField::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        let mut cube = Cube::with_id_field(fields, &config.id_field);
        cube.store.load_data(&config.data)?;
        cube.info = config.info;
        Ok(cube)
    }

    /// An empty cube over code-built fields, keyed by `"id"`.
    pub fn from_fields(fields: Vec<CubeField>) -> Self {
        Cube::with_id_field(fields, crate::definition::DEFAULT_ID_FIELD)
    }

    pub fn with_id_field(fields: Vec<CubeField>, id_field: &str) -> Self {
        let store = RecordStore::new(fields.iter().map(|f| f.field.clone()).collect(), id_field);
        Cube {
            fields: fields.into_iter().map(Arc::new).collect(),
            store,
            info: Info::new(),
            views: FxHashMap::default(),
            connected: FxHashSet::default(),
            next_view_id: 1,
        }
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn fields(&self) -> &[Arc<CubeField>] {
        &self.fields
    }

    pub fn get_field(&self, name: &str) -> Option<&Arc<CubeField>> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub fn dimensions(&self) -> impl Iterator<Item = &Arc<CubeField>> {
        self.fields.iter().filter(|f| f.is_dimension)
    }

    pub fn records(&self) -> &[Arc<SourceRecord>] {
        self.store.records()
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn info(&self) -> &Info {
        &self.info
    }

    // ========================================================================
    // QUERIES AND VIEWS
    // ========================================================================

    /// One-shot query: builds a view, renders it, and discards it.
    pub fn execute_query(&self, config: QueryConfig) -> Result<Vec<RenderRow>, CubeError> {
        let query = Query::new(config, &self.fields)?;
        Ok(View::new(query, self.store.records()).rows())
    }

    pub fn create_view(&mut self, config: QueryConfig, connect: bool) -> Result<ViewId, CubeError> {
        let query = Query::new(config, &self.fields)?;
        let view = View::new(query, self.store.records());

        let id = self.next_view_id;
        self.next_view_id += 1;
        self.views.insert(id, view);
        if connect {
            self.connected.insert(id);
        }
        debug!("Created view {} (connected: {})", id, connect);
        Ok(id)
    }

    pub fn view(&self, id: ViewId) -> Result<&View, CubeError> {
        self.views.get(&id).ok_or(CubeError::UnknownView(id))
    }

    pub fn view_mut(&mut self, id: ViewId) -> Result<&mut View, CubeError> {
        self.views.get_mut(&id).ok_or(CubeError::UnknownView(id))
    }

    /// Replaces a view's query and rebuilds it against the current records.
    /// Returns false if the resolved query is unchanged.
    pub fn update_view_query(&mut self, id: ViewId, config: QueryConfig) -> Result<bool, CubeError> {
        let query = Query::new(config, &self.fields)?;
        let view = self.views.get_mut(&id).ok_or(CubeError::UnknownView(id))?;
        if *view.query() == query {
            return Ok(false);
        }
        view.set_query(query, self.store.records());
        Ok(true)
    }

    pub fn set_view_filter(&mut self, id: ViewId, filter: Option<Filter>) -> Result<bool, CubeError> {
        let config = self.view(id)?.query().to_config().with_filter(filter);
        self.update_view_query(id, config)
    }

    /// Stops routing data changes to the view. The view itself is kept.
    pub fn disconnect_view(&mut self, id: ViewId) -> Result<(), CubeError> {
        if !self.views.contains_key(&id) {
            return Err(CubeError::UnknownView(id));
        }
        self.connected.remove(&id);
        Ok(())
    }

    pub fn destroy_view(&mut self, id: ViewId) -> Result<View, CubeError> {
        self.connected.remove(&id);
        self.views.remove(&id).ok_or(CubeError::UnknownView(id))
    }

    pub fn view_is_connected(&self, id: ViewId) -> bool {
        self.connected.contains(&id)
    }

    pub fn connected_view_count(&self) -> usize {
        self.connected.len()
    }

    // ========================================================================
    // DATA
    // ========================================================================

    /// Replaces every record and rebuilds connected views. `info`, when given,
    /// replaces the cube's info.
    pub fn load_data(&mut self, raw: &[serde_json::Value], info: Option<Info>) -> Result<(), CubeError> {
        self.store.load_data(raw)?;
        if let Some(info) = info {
            self.info = info;
        }
        for id in self.connected_ids() {
            if let Some(view) = self.views.get_mut(&id) {
                view.full_update(self.store.records());
            }
        }
        Ok(())
    }

    /// Applies a transaction and notifies connected views, in view id order.
    /// `info_updates` are merged into the cube's info.
    pub fn update_data(
        &mut self,
        tx: StoreTransaction,
        info_updates: Option<Info>,
    ) -> Result<Vec<(ViewId, ViewChange)>, CubeError> {
        let log = self.store.update_data(tx)?;
        if let Some(updates) = info_updates {
            self.update_info(updates);
        }

        let mut ret = Vec::new();
        for id in self.connected_ids() {
            if let Some(view) = self.views.get_mut(&id) {
                let change = view.note_cube_updated(log.as_ref(), self.store.records());
                ret.push((id, change));
            }
        }
        Ok(ret)
    }

    pub fn update_info(&mut self, updates: Info) {
        self.info.extend(updates);
    }

    /// Removes every record and rebuilds connected views.
    pub fn clear(&mut self) {
        self.store.clear();
        for id in self.connected_ids() {
            if let Some(view) = self.views.get_mut(&id) {
                view.full_update(&[]);
            }
        }
    }

    fn connected_ids(&self) -> Vec<ViewId> {
        let mut ids: Vec<ViewId> = self.connected.iter().copied().collect();
        ids.sort_unstable();
        ids
    }
}
