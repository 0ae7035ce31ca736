//! Global content cache.
//!
//! Holds every loaded source, grouped by content type. Each type has an
//! ordered repository index (exported as `__repository.<type>`) and a keyed
//! store. Pages live in the `pages` store, structured data is merged into a
//! flat namespace keyed by data id, and page membership of declared
//! collection keys is tracked in `collections`.
//!
//! Every mutating method keeps the index, the store and the collections in
//! agreement: an id is in a type's index exactly when its store holds it.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, OnceLock},
};

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};
use trellis_core::{ContentEntry, StoreKind, content::PAGES};

/// Cache handle shared between the orchestrator, templaters and the server.
pub type SharedCache = Arc<RwLock<GlobalCache>>;

/// Keys of the exported cache object that data ids cannot shadow.
const RESERVED_KEYS: &[&str] = &[PAGES, "collections", "servermode"];

/// A value stored in the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheItem {
    /// A page, layout, partial or other file-backed entry.
    Entry(ContentEntry),
    /// Parsed structured data.
    Data(Value),
}

impl From<ContentEntry> for CacheItem {
    fn from(entry: ContentEntry) -> Self {
        Self::Entry(entry)
    }
}

impl From<Value> for CacheItem {
    fn from(value: Value) -> Self {
        Self::Data(value)
    }
}

/// Pages sharing one value of a collection key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Collection {
    /// The bucket value.
    pub name: String,

    /// Page ids in insertion order.
    pub files: Vec<String>,
}

/// In-memory content cache.
#[derive(Debug, Default)]
pub struct GlobalCache {
    repository: BTreeMap<String, Vec<String>>,
    stores: BTreeMap<String, HashMap<String, ContentEntry>>,
    pages: HashMap<String, ContentEntry>,
    data: Map<String, Value>,
    collection_keys: Vec<String>,
    collections: BTreeMap<String, BTreeMap<String, Collection>>,
    servermode: bool,
    context: OnceLock<Map<String, Value>>,
}

impl GlobalCache {
    /// Create an empty cache tracking the given collection keys.
    #[must_use]
    pub fn new(collection_keys: Vec<String>) -> Self {
        let collections = collection_keys
            .iter()
            .map(|key| (key.clone(), BTreeMap::new()))
            .collect();
        Self {
            collection_keys,
            collections,
            ..Default::default()
        }
    }

    /// Create a shareable cache handle.
    #[must_use]
    pub fn shared(collection_keys: Vec<String>) -> SharedCache {
        Arc::new(RwLock::new(Self::new(collection_keys)))
    }

    /// Whether the cache was built for the dev server.
    pub fn servermode(&self) -> bool {
        self.servermode
    }

    pub fn set_servermode(&mut self, servermode: bool) {
        self.invalidate();
        self.servermode = servermode;
    }

    /// Whether `id` would be shadowed by a built-in key of the exported cache.
    pub fn is_reserved_key(id: &str) -> bool {
        RESERVED_KEYS.contains(&id) || id.starts_with("__")
    }

    /// Insert an item, appending its id to the type's index.
    ///
    /// An id that is already present is replaced in place and keeps its index
    /// position. Returns the previous item, if any.
    pub fn add_to_cache(
        &mut self,
        kind: &str,
        id: &str,
        item: impl Into<CacheItem>,
    ) -> Option<CacheItem> {
        self.invalidate();
        let previous = self.take(kind, id);
        let index = self.repository.entry(kind.to_string()).or_default();
        if !index.iter().any(|existing| existing == id) {
            index.push(id.to_string());
        }

        match (StoreKind::of(kind), item.into()) {
            (StoreKind::Data, CacheItem::Data(value)) => {
                self.data.insert(id.to_string(), value);
            }
            (StoreKind::Data, CacheItem::Entry(entry)) => {
                self.data.insert(id.to_string(), document_value(&entry));
            }
            (store, item) => {
                let entry = match item {
                    CacheItem::Entry(entry) => entry,
                    CacheItem::Data(value) => ContentEntry {
                        id: id.to_string(),
                        kind: kind.to_string(),
                        raw: value.to_string(),
                        ..Default::default()
                    },
                };
                if store == StoreKind::Pages {
                    self.index_collections(id, &entry);
                    self.pages.insert(id.to_string(), entry);
                } else {
                    self.stores
                        .entry(kind.to_string())
                        .or_default()
                        .insert(id.to_string(), entry);
                }
            }
        }
        previous
    }

    /// Remove an item and its index entry.
    ///
    /// Removing an unknown id is a no-op that returns `None`.
    pub fn delete_from_cache(&mut self, kind: &str, id: &str) -> Option<CacheItem> {
        self.invalidate();
        let removed = self.take(kind, id);
        if let Some(index) = self.repository.get_mut(kind) {
            index.retain(|existing| existing != id);
        }
        removed
    }

    /// Replace an item: delete followed by add, so the id moves to the end
    /// of the type's index.
    pub fn replace_in_cache(
        &mut self,
        kind: &str,
        id: &str,
        item: impl Into<CacheItem>,
    ) -> Option<CacheItem> {
        let previous = self.delete_from_cache(kind, id);
        self.add_to_cache(kind, id, item);
        previous
    }

    /// Remove every item of one type. Returns how many were removed.
    pub fn delete_all_from_repo_by_type(&mut self, kind: &str) -> usize {
        self.invalidate();
        let ids = self.repository.remove(kind).unwrap_or_default();
        for id in &ids {
            self.take(kind, id);
        }
        ids.len()
    }

    fn invalidate(&mut self) {
        self.context.take();
    }

    /// Detach an item from its store without touching the index.
    fn take(&mut self, kind: &str, id: &str) -> Option<CacheItem> {
        match StoreKind::of(kind) {
            StoreKind::Data => self.data.remove(id).map(CacheItem::Data),
            StoreKind::Pages => {
                self.unindex_collections(id);
                self.pages.remove(id).map(CacheItem::Entry)
            }
            StoreKind::Typed => self
                .stores
                .get_mut(kind)
                .and_then(|store| store.remove(id))
                .map(CacheItem::Entry),
        }
    }

    fn index_collections(&mut self, id: &str, entry: &ContentEntry) {
        for key in &self.collection_keys {
            let Some(value) = entry.front_matter().get(key) else {
                continue;
            };
            let buckets = self.collections.entry(key.clone()).or_default();
            for name in bucket_names(&value) {
                let bucket = buckets.entry(name.clone()).or_insert_with(|| Collection {
                    name,
                    files: Vec::new(),
                });
                if !bucket.files.iter().any(|f| f == id) {
                    bucket.files.push(id.to_string());
                }
            }
        }
    }

    fn unindex_collections(&mut self, id: &str) {
        for buckets in self.collections.values_mut() {
            for bucket in buckets.values_mut() {
                bucket.files.retain(|f| f != id);
            }
            buckets.retain(|_, bucket| !bucket.files.is_empty());
        }
    }

    /// Ordered ids of one type. Unknown types have an empty index.
    pub fn repository(&self, kind: &str) -> &[String] {
        self.repository.get(kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether an item is cached.
    pub fn contains(&self, kind: &str, id: &str) -> bool {
        match StoreKind::of(kind) {
            StoreKind::Data => self.data.contains_key(id),
            StoreKind::Pages => self.pages.contains_key(id),
            StoreKind::Typed => self.stores.get(kind).is_some_and(|s| s.contains_key(id)),
        }
    }

    /// A file-backed entry of any non-data type.
    pub fn entry(&self, kind: &str, id: &str) -> Option<&ContentEntry> {
        match StoreKind::of(kind) {
            StoreKind::Data => None,
            StoreKind::Pages => self.pages.get(id),
            StoreKind::Typed => self.stores.get(kind).and_then(|s| s.get(id)),
        }
    }

    /// A page by id.
    pub fn page(&self, id: &str) -> Option<&ContentEntry> {
        self.pages.get(id)
    }

    /// All pages keyed by id.
    pub fn pages(&self) -> &HashMap<String, ContentEntry> {
        &self.pages
    }

    /// Keyed store of a non-page, non-data type.
    pub fn store(&self, kind: &str) -> Option<&HashMap<String, ContentEntry>> {
        self.stores.get(kind)
    }

    /// A structured-data item by id.
    pub fn data(&self, id: &str) -> Option<&Value> {
        self.data.get(id)
    }

    /// The flat data namespace.
    pub fn data_namespace(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Page ids in bucket `value` of collection `key`.
    ///
    /// Unknown keys and values yield an empty slice.
    pub fn collection(&self, key: &str, value: &str) -> &[String] {
        self.collections
            .get(key)
            .and_then(|buckets| buckets.get(value))
            .map(|bucket| bucket.files.as_slice())
            .unwrap_or(&[])
    }

    /// Every bucket of one collection key.
    pub fn collection_buckets(&self, key: &str) -> Option<&BTreeMap<String, Collection>> {
        self.collections.get(key)
    }

    /// Global part of every render context: data ids, `pages`,
    /// `collections` and `servermode`.
    ///
    /// Built on first use and kept until the next mutation, so a render pass
    /// or a run of dev server requests shares one copy.
    pub fn render_context(&self) -> &Map<String, Value> {
        self.context.get_or_init(|| {
            let mut global = self.data_entries();
            global.insert(PAGES.into(), to_json(&self.pages));
            global.insert("collections".into(), to_json(&self.collections));
            global.insert("servermode".into(), Value::Bool(self.servermode));
            global
        })
    }

    /// Serialise the whole cache, the shape of the export file.
    ///
    /// The render context plus `__repository` (ordered ids per type) and one
    /// `__<type>` store per typed content type.
    pub fn to_value(&self) -> Value {
        let mut out = self.render_context().clone();
        out.insert("__repository".into(), to_json(&self.repository));
        for (kind, store) in &self.stores {
            out.insert(format!("__{kind}"), to_json(store));
        }
        Value::Object(out)
    }

    fn data_entries(&self) -> Map<String, Value> {
        self.data
            .iter()
            .filter(|(id, _)| !Self::is_reserved_key(id))
            .map(|(id, value)| (id.clone(), value.clone()))
            .collect()
    }

    /// Number of cached items of one type.
    pub fn len(&self, kind: &str) -> usize {
        self.repository(kind).len()
    }

    /// Whether nothing at all is cached.
    pub fn is_empty(&self) -> bool {
        self.repository.values().all(Vec::is_empty)
    }
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Data items loaded from non-structured files keep frontmatter and body.
fn document_value(entry: &ContentEntry) -> Value {
    let mut map = Map::new();
    map.insert("data".into(), Value::Object(entry.parsed.data.to_map()));
    map.insert("content".into(), Value::String(entry.parsed.content.clone()));
    Value::Object(map)
}

/// Bucket names for one front matter value. Arrays contribute one bucket per
/// scalar element; objects and nulls contribute none.
fn bucket_names(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(scalar_name).collect(),
        other => scalar_name(other).into_iter().collect(),
    }
}

fn scalar_name(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
