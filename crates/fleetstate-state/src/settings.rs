//! Key/value settings documents.
//!
//! A [`Settings`] keeps two copies of the values: what was last read from
//! the store, and the local edits. [`Settings::write`] sends only the keys
//! that differ, one `Set` or `Unset` per key, so concurrent writers touching
//! different keys do not overwrite each other.

use std::collections::BTreeMap;

use fleetstate_core::ServiceName;
use fleetstate_store::{Assert, Collection, Mutation, Op};
use serde_json::Value;

use crate::docs::{self, field, SettingsDoc};
use crate::error::{on_abort, Result, StateError};
use crate::lifecycle;
use crate::state::State;

/// Settings key for a service's configuration.
pub(crate) fn service_key(service: &ServiceName) -> String {
    format!("s#{service}")
}

/// A change made by [`Settings::write`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemChange {
    /// A key was added.
    Added {
        /// Key.
        key: String,
        /// New value.
        new: Value,
    },
    /// A key's value changed.
    Modified {
        /// Key.
        key: String,
        /// Value before the write.
        old: Value,
        /// Value after the write.
        new: Value,
    },
    /// A key was removed.
    Deleted {
        /// Key.
        key: String,
        /// Value before the write.
        old: Value,
    },
}

impl ItemChange {
    /// The key the change applies to.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Added { key, .. } | Self::Modified { key, .. } | Self::Deleted { key, .. } => {
                key
            }
        }
    }
}

/// A settings document with local edits.
#[derive(Clone)]
pub struct Settings {
    st: State,
    key: String,
    disk: BTreeMap<String, Value>,
    core: BTreeMap<String, Value>,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("key", &self.key)
            .field("values", &self.core)
            .finish_non_exhaustive()
    }
}

/// Read the settings stored under `key`.
///
/// # Errors
///
/// Returns `StateError::NotFound` if there is no such document.
pub(crate) fn read_settings(st: &State, key: &str) -> Result<Settings> {
    let mut settings = Settings {
        st: st.clone(),
        key: key.to_string(),
        disk: BTreeMap::new(),
        core: BTreeMap::new(),
    };
    settings.read()?;
    Ok(settings)
}

/// Operation creating a settings document.
pub(crate) fn create_settings_op(key: &str, values: BTreeMap<String, Value>) -> Result<Op> {
    Ok(Op::new(Collection::Settings, key)
        .assert(Assert::DocMissing)
        .insert(docs::encode(&SettingsDoc { values })?))
}

/// Operation removing a settings document.
pub(crate) fn remove_settings_op(key: &str) -> Op {
    Op::new(Collection::Settings, key).remove()
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() || key.contains('.') || key.starts_with('$') {
        return Err(StateError::InvalidReference(format!(
            "invalid settings key {key:?}"
        )));
    }
    Ok(())
}

impl Settings {
    /// The document key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Sorted list of keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.core.keys().cloned().collect()
    }

    /// The value of `key`, if set.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.core.get(key)
    }

    /// A copy of every value.
    #[must_use]
    pub fn map(&self) -> BTreeMap<String, Value> {
        self.core.clone()
    }

    /// Set `key` locally. Nothing is stored until [`Settings::write`].
    ///
    /// # Errors
    ///
    /// Returns `StateError::InvalidReference` if the key is empty, contains a
    /// dot, or starts with `$`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        check_key(&key)?;
        self.core.insert(key, value.into());
        Ok(())
    }

    /// Set every key in `values` locally.
    ///
    /// # Errors
    ///
    /// Returns `StateError::InvalidReference` for any invalid key; no key is
    /// set in that case.
    pub fn update(&mut self, values: BTreeMap<String, Value>) -> Result<()> {
        values.keys().try_for_each(|key| check_key(key))?;
        self.core.extend(values);
        Ok(())
    }

    /// Remove `key` locally.
    pub fn delete(&mut self, key: &str) {
        self.core.remove(key);
    }

    /// Discard local edits and reload from the store.
    ///
    /// # Errors
    ///
    /// Returns `StateError::NotFound` if the document has been removed.
    pub fn read(&mut self) -> Result<()> {
        let doc: SettingsDoc = docs::load(self.st.store(), Collection::Settings, &self.key)?
            .ok_or_else(|| lifecycle::not_found("settings", &self.key))?;
        self.disk = doc.values;
        self.core = self.disk.clone();
        Ok(())
    }

    /// The edits made since the last read or write, in key order.
    fn changes(&self) -> Vec<ItemChange> {
        let mut changes = Vec::new();
        for (key, new) in &self.core {
            match self.disk.get(key) {
                None => changes.push(ItemChange::Added {
                    key: key.clone(),
                    new: new.clone(),
                }),
                Some(old) if old != new => changes.push(ItemChange::Modified {
                    key: key.clone(),
                    old: old.clone(),
                    new: new.clone(),
                }),
                Some(_) => {}
            }
        }
        for (key, old) in &self.disk {
            if !self.core.contains_key(key) {
                changes.push(ItemChange::Deleted {
                    key: key.clone(),
                    old: old.clone(),
                });
            }
        }
        changes.sort_by(|a, b| a.key().cmp(b.key()));
        changes
    }

    /// Store local edits and return what changed.
    ///
    /// # Errors
    ///
    /// Returns `StateError::NotFound` if the document has been removed.
    pub fn write(&mut self) -> Result<Vec<ItemChange>> {
        let changes = self.changes();
        if changes.is_empty() {
            return Ok(changes);
        }
        let mutations = changes.iter().map(|change| {
            let path = format!("{}.{}", field::VALUES, change.key());
            match change {
                ItemChange::Added { new, .. } | ItemChange::Modified { new, .. } => {
                    Mutation::set(path, new.clone())
                }
                ItemChange::Deleted { .. } => Mutation::unset(path),
            }
        });
        let op = Op::new(Collection::Settings, self.key.as_str())
            .assert(Assert::DocExists)
            .update(mutations);
        self.st
            .runner()
            .apply(&[op])
            .map_err(|e| on_abort(e, lifecycle::not_found("settings", &self.key)))?;
        tracing::debug!(key = %self.key, changes = changes.len(), "Wrote settings");
        self.disk = self.core.clone();
        Ok(changes)
    }
}
