//! Key-value storage seam and the record keys the scheduler reads and writes.
//!
//! Every read is parse-or-default: a missing key, or a value that is not the
//! JSON we expect, comes back as an empty collection (or a default config)
//! and is logged. Callers never see a storage error.

use std::collections::{BTreeSet, HashMap};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::model::PlantId;

/// Key of the collaborator plant list.
pub const PLANTS_KEY: &str = "myPlants";

/// Session-scoped key carrying the selected plant across screens.
pub const SELECTED_PLANT_KEY: &str = "selectedPlant";

pub fn watering_key(plant: &PlantId) -> String {
    format!("watering_{plant}")
}

pub fn recurrences_key(plant: &PlantId) -> String {
    format!("watering_recurrences_{plant}")
}

pub fn irrigation_config_key(plant: &PlantId) -> String {
    format!("irrigation_config_{plant}")
}

pub fn irrigation_exceptions_key(plant: &PlantId) -> String {
    format!("irrigation_exceptions_{plant}")
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Minimal string key-value capability (get / set / remove by key).
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String);
    fn remove(&mut self, key: &str);
}

/// In-memory store. Tracks which keys changed since the last
/// [`MemoryStore::drain_dirty`] so a host can write them back elsewhere.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
    dirty: BTreeSet<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from already-persisted rows. Nothing is marked dirty.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self {
            entries: entries.into_iter().collect(),
            dirty: BTreeSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys written or removed since the previous call, each paired with its
    /// current value (`None` when the key was removed).
    pub fn drain_dirty(&mut self) -> Vec<(String, Option<String>)> {
        std::mem::take(&mut self.dirty)
            .into_iter()
            .map(|k| {
                let v = self.entries.get(&k).cloned();
                (k, v)
            })
            .collect()
    }
}

impl MemoryStore {
    /// Put keys back on the dirty list, e.g. after a failed write-back.
    pub fn mark_dirty<I>(&mut self, keys: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.dirty.extend(keys);
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) {
        self.entries.insert(key.to_string(), value);
        self.dirty.insert(key.to_string());
    }

    fn remove(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.dirty.insert(key.to_string());
        }
    }
}

// ---------------------------------------------------------------------------
// JSON helpers
// ---------------------------------------------------------------------------

/// Read a JSON array stored under `key`. Elements that do not parse are
/// skipped one by one; a value that is not an array at all is empty.
pub(crate) fn load_list<T: DeserializeOwned>(store: &impl KeyValueStore, key: &str) -> Vec<T> {
    let raw: Vec<serde_json::Value> = load_or_default(store, key);
    let total = raw.len();
    let items: Vec<T> = raw
        .into_iter()
        .enumerate()
        .filter_map(|(i, v)| match serde_json::from_value(v) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(key = %key, index = i, "store: skipping malformed element: {e}");
                None
            }
        })
        .collect();
    if items.len() < total {
        debug!(key = %key, kept = items.len(), total, "store: partial list loaded");
    }
    items
}

/// Read a JSON value stored under `key`, falling back to `T::default()`.
pub(crate) fn load_or_default<T>(store: &impl KeyValueStore, key: &str) -> T
where
    T: DeserializeOwned + Default,
{
    let Some(raw) = store.get(key) else {
        return T::default();
    };
    match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(key = %key, "store: malformed record, treating as empty: {e}");
            T::default()
        }
    }
}

pub(crate) fn save<T: Serialize + ?Sized>(store: &mut impl KeyValueStore, key: &str, value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => store.set(key, json),
        Err(e) => warn!(key = %key, "store: failed to encode record, write skipped: {e}"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
