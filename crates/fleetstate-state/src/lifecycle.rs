//! Life transitions shared by every entity kind.
//!
//! Life only moves forward:
//!
//! ```text
//!   ┌───────┐  ensure_dying  ┌───────┐  ensure_dead  ┌──────┐
//!   │ Alive │───────────────▶│ Dying │──────────────▶│ Dead │
//!   └───────┘                └───────┘               └──────┘
//!       │                                               ▲
//!       └───────────────── ensure_dead ─────────────────┘
//! ```
//!
//! Each transition asserts the current life in the same batch that sets the
//! new one, so no writer can move an entity backwards.

use fleetstate_core::Life;
use fleetstate_store::{Assert, Collection, Cond, Mutation, Op, Store, StoreError};
use serde_json::Value;

use crate::docs::field;
use crate::error::{Result, StateError};
use crate::txn::Runner;

/// Condition matching an Alive document.
pub(crate) fn alive_cond() -> Cond {
    Cond::eq(field::LIFE, Life::Alive.as_str())
}

/// Condition matching a document that is not yet Dead.
pub(crate) fn not_dead_cond() -> Cond {
    Cond::ne(field::LIFE, Life::Dead.as_str())
}

/// Assertion that the target is Alive.
pub(crate) fn is_alive() -> Assert {
    Assert::fields([alive_cond()])
}

/// Assertion that the target is Dead.
pub(crate) fn is_dead() -> Assert {
    Assert::fields([Cond::eq(field::LIFE, Life::Dead.as_str())])
}

/// Mutation moving the target to `life`.
pub(crate) fn set_life(life: Life) -> Mutation {
    Mutation::set(field::LIFE, life.as_str())
}

/// Read the current life of a document, or `None` if it is gone.
pub(crate) fn life_of(store: &dyn Store, collection: Collection, id: &str) -> Result<Option<Life>> {
    let Some(doc) = store.find_id(collection, id)? else {
        return Ok(None);
    };
    let life = doc.get(field::LIFE).cloned().unwrap_or(Value::Null);
    let life = serde_json::from_value(life)
        .map_err(|e| StoreError::Serialization(format!("bad life in {collection} {id:?}: {e}")))?;
    Ok(Some(life))
}

/// Returns true if the document exists and is Alive.
pub(crate) fn is_alive_in_store(store: &dyn Store, collection: Collection, id: &str) -> Result<bool> {
    Ok(life_of(store, collection, id)?.is_some_and(Life::is_alive))
}

/// Move an Alive entity to Dying.
///
/// Does nothing if the cached life is already past Alive. An abort means
/// another writer moved the entity first; the life found on re-reading it
/// is returned.
///
/// # Errors
///
/// Returns `StateError::NotFound` if the document is gone.
pub(crate) fn ensure_dying(
    runner: &Runner,
    store: &dyn Store,
    collection: Collection,
    id: &str,
    kind: &'static str,
    cached: Life,
) -> Result<Life> {
    if cached != Life::Alive {
        return Ok(cached);
    }
    let op = Op::new(collection, id)
        .assert(is_alive())
        .update([set_life(Life::Dying)]);
    match runner.apply(&[op]) {
        Ok(()) => {
            tracing::info!(kind, id, "Entity is now dying");
            Ok(Life::Dying)
        }
        Err(StoreError::Aborted) => match life_of(store, collection, id)? {
            Some(life) => Ok(life),
            None => Err(not_found(kind, id)),
        },
        Err(e) => Err(e.into()),
    }
}

/// Move an Alive or Dying entity to Dead.
///
/// `conds` are extra conditions on the entity's own document that must hold
/// for it to die, typically that nothing still depends on it. When the
/// batch aborts, the document is re-read: if it is already Dead the call
/// succeeds, otherwise the conditions failed and `reason` is reported.
///
/// # Errors
///
/// Returns `StateError::HasDependents` if `conds` did not hold, or
/// `StateError::NotFound` if the document is gone.
pub(crate) fn ensure_dead(
    runner: &Runner,
    store: &dyn Store,
    collection: Collection,
    id: &str,
    kind: &'static str,
    conds: Vec<Cond>,
    reason: &'static str,
) -> Result<()> {
    let mut assert = vec![not_dead_cond()];
    assert.extend(conds);
    let op = Op::new(collection, id)
        .assert(Assert::Fields(assert))
        .update([set_life(Life::Dead)]);
    match runner.apply(&[op]) {
        Ok(()) => {
            tracing::info!(kind, id, "Entity is now dead");
            Ok(())
        }
        Err(StoreError::Aborted) => match life_of(store, collection, id)? {
            None => Err(not_found(kind, id)),
            Some(Life::Dead) => Ok(()),
            Some(_) => Err(StateError::HasDependents {
                kind,
                name: id.to_string(),
                reason,
            }),
        },
        Err(e) => Err(e.into()),
    }
}

/// Check that a re-read life does not move backwards from the cached one.
///
/// # Errors
///
/// Returns `StateError::InconsistentState` if `stored` is behind `cached`.
pub(crate) fn check_forward(kind: &'static str, name: &str, cached: Life, stored: Life) -> Result<()> {
    if cached.can_become(stored) {
        return Ok(());
    }
    Err(StateError::InconsistentState(format!(
        "{kind} {name:?} went back from {} to {}",
        cached.as_str(),
        stored.as_str()
    )))
}

pub(crate) fn not_found(kind: &'static str, name: impl Into<String>) -> StateError {
    StateError::NotFound {
        kind,
        name: name.into(),
    }
}

pub(crate) fn not_alive(kind: &'static str, name: impl Into<String>) -> StateError {
    StateError::NotAlive {
        kind,
        name: name.into(),
    }
}
