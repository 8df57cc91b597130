use crate::document::Document;
use crate::errors::DbError;
use crate::index::{FieldBounds, IndexManager, IndexScan, IndexSpec, RecordId, index_insert_all, index_remove_all};
use crate::types::DocumentId;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

/// Documents keyed by record id, so iteration is insertion order.
#[derive(Debug, Default)]
struct Store {
    next_rid: RecordId,
    by_rid: BTreeMap<RecordId, Document>,
    rid_of: HashMap<DocumentId, RecordId>,
}

#[derive(Debug)]
pub struct Collection {
    name: String,
    store: RwLock<Store>,
    pub(crate) indexes: RwLock<IndexManager>,
}

impl Collection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            store: RwLock::new(Store::default()),
            indexes: RwLock::new(IndexManager::new()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn insert_document(&self, document: Document) -> DocumentId {
        let mut store = self.store.write();
        let rid = store.next_rid;
        store.next_rid += 1;
        let id = document.id.clone();
        index_insert_all(&mut self.indexes.write(), &document.data, rid);
        store.rid_of.insert(id.clone(), rid);
        store.by_rid.insert(rid, document);
        id
    }

    /// Replaces the stored document with `id`, keeping its position. Returns `false` if absent.
    pub fn update_document(&self, id: &DocumentId, new_document: Document) -> bool {
        let mut store = self.store.write();
        let Some(rid) = store.rid_of.get(id).copied() else { return false };
        let Some(slot) = store.by_rid.get_mut(&rid) else { return false };
        let mut mgr = self.indexes.write();
        index_remove_all(&mut mgr, &slot.data, rid);
        index_insert_all(&mut mgr, &new_document.data, rid);
        *slot = new_document;
        true
    }

    pub fn delete_document(&self, id: &DocumentId) -> bool {
        let mut store = self.store.write();
        let Some(rid) = store.rid_of.remove(id) else { return false };
        match store.by_rid.remove(&rid) {
            Some(doc) => {
                index_remove_all(&mut self.indexes.write(), &doc.data, rid);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn list_ids(&self) -> Vec<DocumentId> {
        self.store.read().by_rid.values().map(|d| d.id.clone()).collect()
    }

    /// All documents in insertion order.
    #[must_use]
    pub fn get_all_documents(&self) -> Vec<Document> {
        self.store.read().by_rid.values().cloned().collect()
    }

    pub(crate) fn records(&self, rids: &[RecordId]) -> Vec<Document> {
        let store = self.store.read();
        rids.iter().filter_map(|rid| store.by_rid.get(rid).cloned()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.store.read().by_rid.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // --- Index admin ---

    /// Creates the index and builds it from the current documents, returning its name.
    ///
    /// # Errors
    /// Returns `DbError::IndexError` if the name is taken by a different key pattern.
    pub fn create_index(&self, spec: IndexSpec) -> Result<String, DbError> {
        let store = self.store.read();
        let mut mgr = self.indexes.write();
        let name = spec.name.clone();
        if !mgr.create_index(spec)? {
            return Ok(name);
        }
        let start = Instant::now();
        if let Some(idx) = mgr.get_mut(&name) {
            for (rid, doc) in &store.by_rid {
                idx.insert(&doc.data, *rid);
            }
            idx.stats.build_time_ms = start.elapsed().as_millis();
        }
        log::info!("built index {} on {} ({} documents)", name, self.name, store.by_rid.len());
        Ok(name)
    }

    #[must_use]
    pub fn index_specs(&self) -> Vec<IndexSpec> {
        self.indexes.read().specs()
    }

    pub(crate) fn plan_scan(&self, bounds: &HashMap<String, FieldBounds>) -> Option<IndexScan> {
        self.indexes.read().best_scan(bounds)
    }
}
