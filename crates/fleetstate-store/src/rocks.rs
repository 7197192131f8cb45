//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.
//! Batches are applied under a commit lock: every assert is checked against
//! the current documents, then all effects are written in one `WriteBatch`.
//! Readers never take the lock; a `WriteBatch` becomes visible atomically.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};

use crate::doc::matches_all;
use crate::error::{Result, StoreError};
use crate::schema::{all_column_families, Collection};
use crate::types::{Cond, Document, Effect, Mutation, Op};
use crate::Store;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    commit: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            commit: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, collection: Collection) -> Result<Arc<BoundColumnFamily<'_>>> {
        let name = collection.cf_name();
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a document using CBOR.
    fn serialize(doc: &Document) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(doc, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a document from CBOR.
    fn deserialize(data: &[u8]) -> Result<Document> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn load(&self, collection: Collection, id: &str) -> Result<Option<Document>> {
        let cf = self.cf(collection)?;
        self.db
            .get_cf(&cf, id.as_bytes())
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }
}

impl Store for RocksStore {
    fn apply(&self, ops: &[Op]) -> Result<()> {
        let _guard = self.commit.lock();

        let mut working: BTreeMap<(Collection, &str), Option<Document>> = BTreeMap::new();
        for op in ops {
            let key = (op.collection, op.id.as_str());
            if !working.contains_key(&key) {
                let doc = self.load(op.collection, &op.id)?;
                working.insert(key, doc);
            }
        }

        // Every assert sees the pre-batch state.
        for op in ops {
            let current = working
                .get(&(op.collection, op.id.as_str()))
                .and_then(Option::as_ref);
            if !op.assert.holds(current) {
                tracing::debug!(
                    collection = %op.collection,
                    id = %op.id,
                    assert = ?op.assert,
                    "Assertion failed, aborting batch"
                );
                return Err(StoreError::Aborted);
            }
        }

        let mut dirty = BTreeSet::new();
        for op in ops {
            let key = (op.collection, op.id.as_str());
            let slot = working.entry(key).or_default();
            if op.effect.apply(&op.id, slot)? {
                dirty.insert(key);
            }
        }

        let mut batch = WriteBatch::default();
        for key in dirty {
            let (collection, id) = key;
            let cf = self.cf(collection)?;
            match working.get(&key).and_then(Option::as_ref) {
                Some(doc) => batch.put_cf(&cf, id.as_bytes(), Self::serialize(doc)?),
                None => batch.delete_cf(&cf, id.as_bytes()),
            }
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn find_id(&self, collection: Collection, id: &str) -> Result<Option<Document>> {
        self.load(collection, id)
    }

    fn find(&self, collection: Collection, filter: &[Cond]) -> Result<Vec<Document>> {
        let cf = self.cf(collection)?;

        let mut docs = Vec::new();
        let iter = self.db.iterator_cf(&cf, IteratorMode::Start);

        for item in iter {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let doc = Self::deserialize(&value)?;
            if matches_all(&doc, filter) {
                docs.push(doc);
            }
        }

        Ok(docs)
    }

    fn increment(
        &self,
        collection: Collection,
        id: &str,
        path: &str,
        delta: i64,
    ) -> Result<Document> {
        let _guard = self.commit.lock();

        let mut slot = self.load(collection, id)?;
        if slot.is_none() {
            return Err(StoreError::NotFound);
        }
        Effect::Update(vec![Mutation::inc(path, delta)]).apply(id, &mut slot)?;
        let doc = slot.ok_or(StoreError::NotFound)?;

        let cf = self.cf(collection)?;
        self.db
            .put_cf(&cf, id.as_bytes(), Self::serialize(&doc)?)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(doc)
    }
}
