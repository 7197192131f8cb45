//! `RocksDB` document store for fleetstate.
//!
//! This crate provides the document store adapter the lifecycle engine runs
//! its transactions against. Documents are JSON objects, encoded with CBOR
//! on disk, one column family per collection:
//!
//! - `services`: Service records, keyed by service name
//! - `units`: Unit records, keyed by unit name
//! - `relations`: Relation records, keyed by relation key
//! - `charms`: Charm metadata, keyed by charm URL
//! - `settings`: Per-entity settings, keyed by the owner's global key
//! - `sequences`: Named counters
//!
//! The one write primitive is [`Store::apply`]: a batch of conditional
//! operations that either applies completely or is rejected with
//! [`StoreError::Aborted`] when any precondition does not hold.
//!
//! # Example
//!
//! ```no_run
//! use fleetstate_store::{Assert, Collection, Cond, Mutation, Op, RocksStore, Store};
//!
//! let store = RocksStore::open("/tmp/fleetstate-db").unwrap();
//!
//! // Mark a service exposed, but only while it is alive.
//! let op = Op::new(Collection::Services, "wordpress")
//!     .assert(Assert::fields([Cond::eq("life", "alive")]))
//!     .update([Mutation::set("exposed", true)]);
//! match store.apply(&[op]) {
//!     Ok(()) => println!("exposed"),
//!     Err(e) if e.is_aborted() => println!("not alive"),
//!     Err(e) => panic!("{e}"),
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod doc;
pub mod error;
pub mod rocks;
pub mod schema;
pub mod types;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;
pub use schema::Collection;
pub use types::{
    from_document, to_document, Assert, Cond, Document, Effect, Mutation, Op, ID_FIELD,
    REVNO_FIELD,
};

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, a replicated document database).
pub trait Store: Send + Sync {
    /// Apply a batch of conditional operations atomically.
    ///
    /// Every assert is evaluated against the documents as they were before
    /// the batch. If all hold, every effect is applied; otherwise nothing is.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Aborted` if any assert did not hold.
    fn apply(&self, ops: &[Op]) -> Result<()>;

    /// Get a document by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_id(&self, collection: Collection, id: &str) -> Result<Option<Document>>;

    /// List every document in `collection` matching all of `filter`, in id order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find(&self, collection: Collection, filter: &[Cond]) -> Result<Vec<Document>>;

    /// Count documents in `collection` matching all of `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn count(&self, collection: Collection, filter: &[Cond]) -> Result<usize> {
        Ok(self.find(collection, filter)?.len())
    }

    /// Atomically add `delta` to the integer at `path` and return the
    /// document as it is after the increment.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the document doesn't exist.
    fn increment(&self, collection: Collection, id: &str, path: &str, delta: i64)
        -> Result<Document>;
}
