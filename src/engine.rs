use crate::collection::Collection;
use crate::document::Document;
use crate::errors::DbError;
use crate::index::IndexSpec;
use crate::types::CollectionName;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CollectionSnapshot {
    name: CollectionName,
    #[serde(default)]
    indexes: Vec<IndexSpec>,
    #[serde(default)]
    documents: Vec<Document>,
}

/// On-disk form of a database: collections with their documents in insertion order.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    database: String,
    collections: Vec<CollectionSnapshot>,
}

/// The embedded engine: named collections, optionally backed by a JSON snapshot file.
pub struct Engine {
    name: String,
    path: Option<PathBuf>,
    collections: RwLock<HashMap<CollectionName, Arc<Collection>>>,
    // creation order, for listing and snapshots
    order: RwLock<Vec<CollectionName>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// An engine with no backing file; `flush` is a no-op.
    #[must_use]
    pub fn in_memory(name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: None,
            collections: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
        }
    }

    /// Opens the database stored at `{data_dir}/{name}.json`, loading it if the file exists.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created or the snapshot cannot be read.
    pub fn open(data_dir: &Path, name: &str) -> Result<Self, DbError> {
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join(format!("{name}.json"));
        let mut engine = Self::in_memory(name);
        if path.exists() {
            engine.load_snapshot(&path)?;
            log::info!("opened database {} from {}", name, path.display());
        } else {
            log::info!("new database {} at {}", name, path.display());
        }
        engine.path = Some(path);
        Ok(engine)
    }

    fn load_snapshot(&self, path: &Path) -> Result<(), DbError> {
        let reader = BufReader::new(fs::File::open(path)?);
        let snap: Snapshot = serde_json::from_reader(reader)?;
        if snap.version != SNAPSHOT_VERSION {
            return Err(DbError::SnapshotError(format!(
                "unsupported snapshot version {} in {}",
                snap.version,
                path.display()
            )));
        }
        if snap.database != self.name {
            log::warn!("snapshot {} names database {}, opening as {}", path.display(), snap.database, self.name);
        }
        for cs in snap.collections {
            let col = self.create_collection(&cs.name);
            for spec in cs.indexes {
                col.create_index(spec)?;
            }
            for doc in cs.documents {
                col.insert_document(doc);
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the named collection, creating it if needed.
    pub fn create_collection(&self, name: &str) -> Arc<Collection> {
        let mut cols = self.collections.write();
        if let Some(c) = cols.get(name) {
            return c.clone();
        }
        let col = Arc::new(Collection::new(name));
        cols.insert(name.to_string(), col.clone());
        self.order.write().push(name.to_string());
        col
    }

    #[must_use]
    pub fn get_collection(&self, name: &str) -> Option<Arc<Collection>> {
        self.collections.read().get(name).cloned()
    }

    #[must_use]
    pub fn list_collection_names(&self) -> Vec<String> {
        self.order.read().clone()
    }

    /// Writes the snapshot atomically: a temp file in the same directory, then a rename.
    ///
    /// # Errors
    /// Returns an error if the snapshot cannot be serialized or written.
    pub fn flush(&self) -> Result<(), DbError> {
        let Some(path) = &self.path else { return Ok(()) };
        let snap = Snapshot {
            version: SNAPSHOT_VERSION,
            database: self.name.clone(),
            collections: self
                .list_collection_names()
                .into_iter()
                .filter_map(|n| self.get_collection(&n))
                .map(|c| CollectionSnapshot {
                    name: c.name().to_string(),
                    indexes: c.index_specs(),
                    documents: c.get_all_documents(),
                })
                .collect(),
        };
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut w = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer_pretty(&mut w, &snap)?;
            w.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| DbError::Io(format!("persist snapshot {}: {}", path.display(), e.error)))?;
        log::debug!("flushed {} to {}", self.name, path.display());
        Ok(())
    }
}
