//! Evaluation of conditions and effects against documents.
//!
//! This is the part of the store shared by every backend: given the document
//! currently stored under an id, decide whether an [`Assert`] holds and
//! compute what an [`Effect`] leaves behind.

use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::types::{Assert, Cond, Document, Effect, Mutation, ID_FIELD, REVNO_FIELD};

/// Collect every value reachable at a dotted `path`.
///
/// Arrays met on the way are traversed element-wise, so `endpoints.service`
/// yields the `service` field of every element of `endpoints`.
#[must_use]
pub fn values_at<'a>(doc: &'a Document, path: &str) -> Vec<&'a Value> {
    let mut out = Vec::new();
    let mut segments = path.split('.');
    if let Some(head) = segments.next() {
        if let Some(value) = doc.get(head) {
            let rest: Vec<&str> = segments.collect();
            collect(value, &rest, &mut out);
        }
    }
    out
}

fn collect<'a>(value: &'a Value, path: &[&str], out: &mut Vec<&'a Value>) {
    match (path.split_first(), value) {
        (None, _) => out.push(value),
        (Some((head, rest)), Value::Object(map)) => {
            if let Some(next) = map.get(*head) {
                collect(next, rest, out);
            }
        }
        (Some(_), Value::Array(items)) => {
            for item in items {
                collect(item, path, out);
            }
        }
        (Some(_), _) => {}
    }
}

fn contains_equal(candidates: &[&Value], operand: &Value) -> bool {
    candidates.iter().any(|v| match v {
        Value::Array(items) if !operand.is_array() => items.contains(operand),
        _ => *v == operand,
    })
}

impl Cond {
    /// Check this condition against `doc`.
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Self::Eq(path, operand) => contains_equal(&values_at(doc, path), operand),
            Self::Ne(path, operand) => !contains_equal(&values_at(doc, path), operand),
            Self::Gt(path, operand) => values_at(doc, path)
                .iter()
                .any(|v| v.as_i64().is_some_and(|n| n > *operand)),
            Self::NoElementWithPrefix(path, prefix) => {
                !values_at(doc, path).iter().any(|v| match v {
                    Value::String(s) => s.starts_with(prefix.as_str()),
                    Value::Array(items) => items
                        .iter()
                        .any(|i| i.as_str().is_some_and(|s| s.starts_with(prefix.as_str()))),
                    _ => false,
                })
            }
        }
    }
}

/// Check that `doc` satisfies every condition in `filter`.
#[must_use]
pub fn matches_all(doc: &Document, filter: &[Cond]) -> bool {
    filter.iter().all(|cond| cond.matches(doc))
}

impl Assert {
    /// Check this assertion against the document currently stored, if any.
    #[must_use]
    pub fn holds(&self, doc: Option<&Document>) -> bool {
        match (self, doc) {
            (Self::None, _) | (Self::DocExists, Some(_)) | (Self::DocMissing, None) => true,
            (Self::DocExists | Self::Fields(_), None) | (Self::DocMissing, Some(_)) => false,
            (Self::Fields(conds), Some(doc)) => matches_all(doc, conds),
        }
    }
}

/// Walk to the document holding the last segment of `path`.
///
/// With `create`, missing intermediate documents are added; without it, a
/// missing intermediate yields `None`.
fn parent_mut<'a, 'p>(
    doc: &'a mut Document,
    path: &'p str,
    create: bool,
) -> Result<Option<(&'a mut Document, &'p str)>> {
    let (parents, last) = match path.rsplit_once('.') {
        Some((parents, last)) => (Some(parents), last),
        None => (None, path),
    };
    let mut current = doc;
    for seg in parents.into_iter().flat_map(|p| p.split('.')) {
        if create {
            current
                .entry(seg.to_string())
                .or_insert_with(|| Value::Object(Document::new()));
        }
        current = match current.get_mut(seg) {
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(StoreError::Serialization(format!(
                    "field {seg:?} of path {path:?} is not a document"
                )))
            }
            None => return Ok(None),
        };
    }
    Ok(Some((current, last)))
}

impl Mutation {
    /// Apply this mutation to `doc` in place.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Serialization` if the path runs through a
    /// non-document, or the target field has the wrong type.
    pub fn apply(&self, doc: &mut Document) -> Result<()> {
        match self {
            Self::Set(path, value) => {
                if let Some((parent, field)) = parent_mut(doc, path, true)? {
                    parent.insert(field.to_string(), value.clone());
                }
            }
            Self::Unset(path) => {
                if let Some((parent, field)) = parent_mut(doc, path, false)? {
                    parent.remove(field);
                }
            }
            Self::Inc(path, delta) => {
                if let Some((parent, field)) = parent_mut(doc, path, true)? {
                    let current = match parent.get(field) {
                        None => 0,
                        Some(v) => v.as_i64().ok_or_else(|| {
                            StoreError::Serialization(format!("field {path:?} is not an integer"))
                        })?,
                    };
                    parent.insert(field.to_string(), Value::from(current + delta));
                }
            }
            Self::AddToSet(path, value) => {
                if let Some((parent, field)) = parent_mut(doc, path, true)? {
                    let slot = parent
                        .entry(field.to_string())
                        .or_insert_with(|| Value::Array(Vec::new()));
                    let Value::Array(items) = slot else {
                        return Err(StoreError::Serialization(format!(
                            "field {path:?} is not an array"
                        )));
                    };
                    if !items.contains(value) {
                        items.push(value.clone());
                    }
                }
            }
            Self::Pull(path, value) => {
                if let Some((parent, field)) = parent_mut(doc, path, false)? {
                    match parent.get_mut(field) {
                        Some(Value::Array(items)) => items.retain(|item| item != value),
                        None | Some(Value::Null) => {}
                        Some(_) => {
                            return Err(StoreError::Serialization(format!(
                                "field {path:?} is not an array"
                            )))
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn bump_revno(doc: &mut Document) {
    let next = doc.get(REVNO_FIELD).and_then(Value::as_i64).unwrap_or(0) + 1;
    doc.insert(REVNO_FIELD.to_string(), Value::from(next));
}

impl Effect {
    /// Apply this effect to the document stored under `id`.
    ///
    /// Returns whether the slot changed and needs to be written.
    ///
    /// # Errors
    ///
    /// Returns an error if a mutation cannot be applied.
    pub fn apply(&self, id: &str, slot: &mut Option<Document>) -> Result<bool> {
        match self {
            Self::None => Ok(false),
            Self::Insert(doc) => {
                if slot.is_some() {
                    return Ok(false);
                }
                let mut doc = doc.clone();
                doc.insert(ID_FIELD.to_string(), Value::from(id));
                doc.insert(REVNO_FIELD.to_string(), Value::from(0));
                bump_revno(&mut doc);
                *slot = Some(doc);
                Ok(true)
            }
            Self::Update(mutations) => {
                let Some(doc) = slot.as_mut() else {
                    return Ok(false);
                };
                for mutation in mutations {
                    mutation.apply(doc)?;
                }
                bump_revno(doc);
                Ok(true)
            }
            Self::Remove => Ok(slot.take().is_some()),
        }
    }
}
