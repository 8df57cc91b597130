pub mod aggregate;
pub mod catalog;
pub mod collection;
pub mod config;
pub mod document;
pub mod engine;
pub mod errors;
pub mod import;
pub mod index;
pub mod logger;
pub mod query;
pub mod runner;
pub mod types;

use crate::aggregate::Pipeline;
use crate::collection::Collection;
use crate::config::AppConfig;
use crate::document::Document;
use crate::engine::Engine;
use crate::errors::DbError;
use crate::index::IndexSpec;
use crate::query::{Cursor, DeleteReport, ExecutionStats, Filter, FindOptions, UpdateDoc, UpdateReport};
use crate::types::DocumentId;
use bson::Document as BsonDocument;
use std::sync::Arc;

/// The main database handle.
#[derive(Debug)]
pub struct Database {
    engine: Arc<Engine>,
}

impl Database {
    /// Opens the database named by `config` under its data directory.
    ///
    /// # Errors
    /// Returns an error if the snapshot file exists but cannot be loaded.
    pub fn open(config: &AppConfig) -> Result<Self, DbError> {
        let engine = Engine::open(&config.data_dir, &config.db_name)?;
        Ok(Self { engine: Arc::new(engine) })
    }

    /// Creates a database with no backing file.
    #[must_use]
    pub fn in_memory(name: &str) -> Self {
        Self { engine: Arc::new(Engine::in_memory(name)) }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.engine.name()
    }

    /// Creates a new collection with the given name, or returns the existing one.
    pub fn create_collection(&self, name: &str) -> Arc<Collection> {
        self.engine.create_collection(name)
    }

    /// Retrieves a collection by its name.
    #[must_use]
    pub fn get_collection(&self, name: &str) -> Option<Arc<Collection>> {
        self.engine.get_collection(name)
    }

    /// Lists the names of all collections.
    #[must_use]
    pub fn list_collection_names(&self) -> Vec<String> {
        self.engine.list_collection_names()
    }

    /// The named collection, or an unregistered empty one when it does not exist, so reads
    /// and writes against a missing collection see no documents instead of failing.
    fn collection(&self, name: &str) -> Arc<Collection> {
        self.engine.get_collection(name).unwrap_or_else(|| {
            log::debug!("collection {name} does not exist; treating it as empty");
            Arc::new(Collection::new(name))
        })
    }

    /// Inserts a document, creating the collection if needed.
    ///
    /// # Errors
    /// Currently infallible.
    pub fn insert_document(&self, collection_name: &str, data: BsonDocument) -> Result<DocumentId, DbError> {
        Ok(self.engine.create_collection(collection_name).insert_document(Document::new(data)))
    }

    // --- Query API (façade over query, aggregate and index modules) ---
    // A missing collection behaves as an empty one: no documents, zero counts.

    /// # Errors
    /// Currently infallible; a missing collection yields an empty cursor.
    pub fn find(&self, collection_name: &str, filter: &Filter, opts: &FindOptions) -> Result<Cursor, DbError> {
        Ok(query::find_docs(&self.collection(collection_name), filter, opts))
    }

    /// # Errors
    /// Currently infallible.
    pub fn count(&self, collection_name: &str, filter: &Filter) -> Result<usize, DbError> {
        Ok(query::count_docs(&self.collection(collection_name), filter))
    }

    /// # Errors
    /// Currently infallible; a missing collection reports zero counts.
    pub fn update_one(&self, collection_name: &str, filter: &Filter, update: &UpdateDoc) -> Result<UpdateReport, DbError> {
        Ok(query::update_one(&self.collection(collection_name), filter, update))
    }

    /// # Errors
    /// Currently infallible; a missing collection reports zero counts.
    pub fn update_many(&self, collection_name: &str, filter: &Filter, update: &UpdateDoc) -> Result<UpdateReport, DbError> {
        Ok(query::update_many(&self.collection(collection_name), filter, update))
    }

    /// # Errors
    /// Currently infallible; a missing collection reports zero counts.
    pub fn delete_one(&self, collection_name: &str, filter: &Filter) -> Result<DeleteReport, DbError> {
        Ok(query::delete_one(&self.collection(collection_name), filter))
    }

    /// # Errors
    /// Currently infallible; a missing collection reports zero counts.
    pub fn delete_many(&self, collection_name: &str, filter: &Filter) -> Result<DeleteReport, DbError> {
        Ok(query::delete_many(&self.collection(collection_name), filter))
    }

    /// # Errors
    /// Returns `DbError::AggregationError` when a stage fails to evaluate.
    pub fn aggregate(&self, collection_name: &str, pipeline: &Pipeline) -> Result<Vec<BsonDocument>, DbError> {
        aggregate::aggregate(&self.collection(collection_name), pipeline)
    }

    /// Creates the index, creating the collection first if needed.
    ///
    /// # Errors
    /// Returns `DbError::IndexError` when the name is taken by a different key pattern.
    pub fn create_index(&self, collection_name: &str, spec: IndexSpec) -> Result<String, DbError> {
        self.engine.create_collection(collection_name).create_index(spec)
    }

    /// # Errors
    /// Returns `DbError::NoSuchCollection` if the collection does not exist.
    pub fn list_indexes(&self, collection_name: &str) -> Result<Vec<IndexSpec>, DbError> {
        self.engine
            .get_collection(collection_name)
            .map(|c| c.index_specs())
            .ok_or_else(|| DbError::NoSuchCollection(collection_name.to_string()))
    }

    /// # Errors
    /// Currently infallible; a missing collection explains as an empty collection scan.
    pub fn explain(&self, collection_name: &str, filter: &Filter, opts: &FindOptions) -> Result<ExecutionStats, DbError> {
        Ok(query::explain_find(&self.collection(collection_name), filter, opts))
    }

    /// Persists the database to its snapshot file, if it has one.
    ///
    /// # Errors
    /// Returns an error if the snapshot cannot be written.
    pub fn flush(&self) -> Result<(), DbError> {
        self.engine.flush()
    }
}
