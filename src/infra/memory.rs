//! In-process [`FeatureStoreApi`] backing `--dry-run` and the test suite.
//!
//! Mirrors the remote platform closely enough for the pipeline: loose title
//! search, one layer per service, protected items refusing deletion. Failures
//! can be injected per call.

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::BoundingBox;
use crate::services::feature_store::{
    EditResult, Feature, FeatureStoreApi, FieldType, LayerDefinition, RemoteStore, StoreKind,
};
use crate::sync::schema::vehicle_layer_definition;

struct Entry {
    store: RemoteStore,
    service_url: String,
    layer: LayerDefinition,
    features: Vec<Feature>,
    next_oid: i64,
}

struct State {
    next_id: u64,
    clock: DateTime<Utc>,
    entries: Vec<Entry>,
    add_calls: Vec<usize>,
    fail_create: bool,
    fail_add_call: Option<usize>,
    reject_add_call: Option<usize>,
    truncate_supported: bool,
    fail_delete: HashSet<String>,
}

pub struct MemoryStore {
    owner: String,
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            state: Mutex::new(State {
                next_id: 1,
                clock: Utc::now(),
                entries: Vec::new(),
                add_calls: Vec::new(),
                fail_create: false,
                fail_add_call: None,
                reject_add_call: None,
                truncate_supported: true,
                fail_delete: HashSet::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds an item with the vehicle schema, modified "now" on the store clock.
    pub fn seed(&self, title: &str, kind: StoreKind, protected: bool) -> RemoteStore {
        let modified = self.state().tick();
        self.seed_at(title, kind, protected, modified)
    }

    pub fn seed_at(
        &self,
        title: &str,
        kind: StoreKind,
        protected: bool,
        modified: DateTime<Utc>,
    ) -> RemoteStore {
        let layer = vehicle_layer_definition(title, BoundingBox::default().to_extent());
        self.state()
            .insert(&self.owner, title, kind, protected, modified, layer)
    }

    pub fn fail_create(&self, fail: bool) {
        self.state().fail_create = fail;
    }

    /// The `n`th add call (1-based) fails as a transport error.
    pub fn fail_add_call(&self, n: usize) {
        self.state().fail_add_call = Some(n);
    }

    /// The `n`th add call (1-based) answers with every feature rejected.
    pub fn reject_add_call(&self, n: usize) {
        self.state().reject_add_call = Some(n);
    }

    pub fn set_truncate_supported(&self, supported: bool) {
        self.state().truncate_supported = supported;
    }

    pub fn fail_delete(&self, id: &str) {
        self.state().fail_delete.insert(id.to_string());
    }

    /// Changes a declared field type in place, as a hand edit on the platform would.
    pub fn alter_field(&self, id: &str, field: &str, field_type: FieldType) {
        let mut state = self.state();
        if let Some(entry) = state.entries.iter_mut().find(|e| e.store.id == id) {
            for f in entry.layer.fields.iter_mut().filter(|f| f.name == field) {
                f.field_type = field_type;
            }
        }
    }

    /// Sizes of every add request, in order.
    pub fn add_calls(&self) -> Vec<usize> {
        self.state().add_calls.clone()
    }

    pub fn item_count(&self) -> usize {
        self.state().entries.len()
    }

    pub fn ids(&self) -> Vec<String> {
        self.state().entries.iter().map(|e| e.store.id.clone()).collect()
    }

    pub fn feature_count(&self, id: &str) -> usize {
        self.features(id).len()
    }

    pub fn features(&self, id: &str) -> Vec<Feature> {
        self.state()
            .entries
            .iter()
            .find(|e| e.store.id == id)
            .map(|e| e.features.clone())
            .unwrap_or_default()
    }
}

impl State {
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += Duration::seconds(1);
        self.clock
    }

    fn insert(
        &mut self,
        owner: &str,
        title: &str,
        kind: StoreKind,
        protected: bool,
        modified: DateTime<Utc>,
        layer: LayerDefinition,
    ) -> RemoteStore {
        let id = format!("mem{:04}", self.next_id);
        self.next_id += 1;

        let service_url = format!("memory://{owner}/{id}/FeatureServer");
        let url = match kind {
            StoreKind::Layer => format!("{service_url}/0"),
            _ => service_url.clone(),
        };
        let store = RemoteStore {
            id,
            title: title.to_string(),
            kind,
            owner: owner.to_string(),
            url: Some(url),
            modified,
            protected,
        };

        self.entries.push(Entry {
            store: store.clone(),
            service_url,
            layer,
            features: Vec::new(),
            next_oid: 1,
        });
        store
    }

    fn layer_mut(&mut self, layer_url: &str) -> Result<&mut Entry> {
        self.entries
            .iter_mut()
            .find(|e| format!("{}/0", e.service_url) == layer_url)
            .ok_or_else(|| anyhow!("no layer at {layer_url}"))
    }
}

#[async_trait]
impl FeatureStoreApi for MemoryStore {
    async fn search_owned(&self, title: &str, kinds: &[StoreKind]) -> Result<Vec<RemoteStore>> {
        let needle = title.to_lowercase();
        Ok(self
            .state()
            .entries
            .iter()
            .map(|e| &e.store)
            .filter(|s| s.title.to_lowercase().contains(&needle))
            .filter(|s| kinds.is_empty() || kinds.contains(&s.kind))
            .cloned()
            .collect())
    }

    async fn create_point_store(
        &self,
        title: &str,
        definition: &LayerDefinition,
    ) -> Result<RemoteStore> {
        let mut state = self.state();
        if state.fail_create {
            bail!("createService failed: service name unavailable");
        }
        if state.entries.iter().any(|e| e.store.title == title) {
            bail!("a service named '{title}' already exists");
        }
        let modified = state.tick();
        Ok(state.insert(
            &self.owner,
            title,
            StoreKind::Service,
            false,
            modified,
            definition.clone(),
        ))
    }

    async fn layer_definition(&self, layer_url: &str) -> Result<LayerDefinition> {
        Ok(self.state().layer_mut(layer_url)?.layer.clone())
    }

    async fn truncate(&self, layer_url: &str) -> Result<()> {
        let mut state = self.state();
        if !state.truncate_supported {
            bail!("truncate is not supported on this layer");
        }
        state.layer_mut(layer_url)?.features.clear();
        Ok(())
    }

    async fn delete_all_features(&self, layer_url: &str) -> Result<()> {
        self.state().layer_mut(layer_url)?.features.clear();
        Ok(())
    }

    async fn add_features(&self, layer_url: &str, features: &[Feature]) -> Result<Vec<EditResult>> {
        let mut state = self.state();
        state.add_calls.push(features.len());
        let call = state.add_calls.len();

        if state.fail_add_call == Some(call) {
            bail!("addFeatures request {call} timed out");
        }
        if state.reject_add_call == Some(call) {
            return Ok(features
                .iter()
                .map(|_| EditResult::failed("Setting of value for field failed"))
                .collect());
        }

        let entry = state.layer_mut(layer_url)?;
        let mut results = Vec::with_capacity(features.len());
        for f in features {
            entry.features.push(f.clone());
            results.push(EditResult::ok(entry.next_oid));
            entry.next_oid += 1;
        }
        Ok(results)
    }

    async fn delete_item(&self, store: &RemoteStore) -> Result<()> {
        let mut state = self.state();
        if state.fail_delete.contains(&store.id) {
            bail!("delete of item {} failed", store.id);
        }
        let pos = state
            .entries
            .iter()
            .position(|e| e.store.id == store.id)
            .ok_or_else(|| anyhow!("item {} not found", store.id))?;
        if state.entries[pos].store.protected {
            bail!("item {} is protected from deletion", store.id);
        }
        state.entries.remove(pos);
        Ok(())
    }
}
