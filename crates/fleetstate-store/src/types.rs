//! Transaction operation types.
//!
//! A batch is a list of [`Op`]s. Each op names one document, carries an
//! [`Assert`] that must hold against the document as it was before the batch,
//! and an [`Effect`] applied if every assert in the batch holds.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::schema::Collection;

/// A stored document.
pub type Document = serde_json::Map<String, Value>;

/// Field holding the document id.
pub const ID_FIELD: &str = "_id";

/// Field holding the revision counter bumped by every committed effect.
pub const REVNO_FIELD: &str = "txn-revno";

/// Convert a typed record into a document.
///
/// # Errors
///
/// Returns `StoreError::Serialization` if the record does not serialize to an object.
pub fn to_document<T: Serialize>(value: &T) -> Result<Document> {
    match serde_json::to_value(value).map_err(|e| StoreError::Serialization(e.to_string()))? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Serialization(format!(
            "expected a document, got {other}"
        ))),
    }
}

/// Convert a document into a typed record.
///
/// # Errors
///
/// Returns `StoreError::Serialization` if the document does not match `T`.
pub fn from_document<T: DeserializeOwned>(doc: Document) -> Result<T> {
    serde_json::from_value(Value::Object(doc)).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// A condition on one (possibly dotted) field path.
///
/// Paths descend through nested documents; when a path crosses an array, the
/// condition is tested against every element.
#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    /// Some value at the path equals the operand, or is an array containing it.
    Eq(String, Value),
    /// No value at the path equals the operand. Holds for a missing field.
    Ne(String, Value),
    /// Some integer at the path is strictly greater than the operand.
    Gt(String, i64),
    /// No string at the path (or within an array at the path) starts with the prefix.
    NoElementWithPrefix(String, String),
}

impl Cond {
    /// Equality condition.
    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(path.into(), value.into())
    }

    /// Inequality condition.
    pub fn ne(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Ne(path.into(), value.into())
    }

    /// Greater-than condition.
    pub fn gt(path: impl Into<String>, value: i64) -> Self {
        Self::Gt(path.into(), value)
    }

    /// Prefix exclusion condition.
    pub fn no_element_with_prefix(path: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::NoElementWithPrefix(path.into(), prefix.into())
    }
}

/// A precondition on the target document of an op.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Assert {
    /// No precondition.
    #[default]
    None,
    /// The document must exist.
    DocExists,
    /// The document must not exist.
    DocMissing,
    /// The document must exist and satisfy every condition.
    Fields(Vec<Cond>),
}

impl Assert {
    /// Build a field assertion.
    pub fn fields(conds: impl IntoIterator<Item = Cond>) -> Self {
        Self::Fields(conds.into_iter().collect())
    }
}

/// A change to one (possibly dotted) field path.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Set the field.
    Set(String, Value),
    /// Remove the field.
    Unset(String),
    /// Add to an integer field, treating a missing field as zero.
    Inc(String, i64),
    /// Append to an array field unless an equal element is present.
    AddToSet(String, Value),
    /// Remove every equal element from an array field.
    Pull(String, Value),
}

impl Mutation {
    /// Set `path` to `value`.
    pub fn set(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Set(path.into(), value.into())
    }

    /// Remove `path`.
    pub fn unset(path: impl Into<String>) -> Self {
        Self::Unset(path.into())
    }

    /// Add `delta` to `path`.
    pub fn inc(path: impl Into<String>, delta: i64) -> Self {
        Self::Inc(path.into(), delta)
    }

    /// Add `value` to the set at `path`.
    pub fn add_to_set(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::AddToSet(path.into(), value.into())
    }

    /// Remove `value` from the array at `path`.
    pub fn pull(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Pull(path.into(), value.into())
    }
}

/// What an op does once the batch's assertions have held.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Effect {
    /// Nothing; the op only asserts.
    #[default]
    None,
    /// Create the document. A no-op if it already exists.
    Insert(Document),
    /// Mutate the document. A no-op if it does not exist.
    Update(Vec<Mutation>),
    /// Delete the document. A no-op if it does not exist.
    Remove,
}

/// One conditional operation in a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Op {
    /// Target collection.
    pub collection: Collection,
    /// Target document id.
    pub id: String,
    /// Precondition.
    pub assert: Assert,
    /// Effect.
    pub effect: Effect,
}

impl Op {
    /// Start an op targeting `id` in `collection`, with no assert and no effect.
    pub fn new(collection: Collection, id: impl Into<String>) -> Self {
        Self {
            collection,
            id: id.into(),
            assert: Assert::None,
            effect: Effect::None,
        }
    }

    /// Set the precondition.
    #[must_use]
    pub fn assert(mut self, assert: Assert) -> Self {
        self.assert = assert;
        self
    }

    /// Insert `doc` as this op's effect.
    #[must_use]
    pub fn insert(mut self, doc: Document) -> Self {
        self.effect = Effect::Insert(doc);
        self
    }

    /// Apply `mutations` as this op's effect.
    #[must_use]
    pub fn update(mut self, mutations: impl IntoIterator<Item = Mutation>) -> Self {
        self.effect = Effect::Update(mutations.into_iter().collect());
        self
    }

    /// Remove the document as this op's effect.
    #[must_use]
    pub fn remove(mut self) -> Self {
        self.effect = Effect::Remove;
        self
    }
}
