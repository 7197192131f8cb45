//! Charm metadata.
//!
//! A charm describes what a service runs and which relations it can take
//! part in. Only the metadata the lifecycle engine consults is modelled here.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The role an endpoint plays in a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationRole {
    /// Both sides of the relation are units of the same service.
    Peer,
    /// The endpoint offers an interface.
    Provider,
    /// The endpoint consumes an interface.
    Requirer,
}

impl RelationRole {
    /// Return the role on the other side of a relation.
    #[must_use]
    pub const fn counterpart(self) -> Self {
        match self {
            Self::Peer => Self::Peer,
            Self::Provider => Self::Requirer,
            Self::Requirer => Self::Provider,
        }
    }
}

impl fmt::Display for RelationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Peer => "peer",
            Self::Provider => "provider",
            Self::Requirer => "requirer",
        })
    }
}

/// How widely a relation's units can see each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationScope {
    /// Every unit sees every unit on the other side.
    #[default]
    Global,
    /// Units only see the units sharing their container.
    Container,
}

/// One relation a charm declares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharmRelation {
    /// The interface name both sides must agree on.
    pub interface: String,
    /// Visibility scope.
    #[serde(default)]
    pub scope: RelationScope,
    /// Whether the charm works without this relation.
    #[serde(default)]
    pub optional: bool,
}

impl CharmRelation {
    /// Create a globally scoped relation on `interface`.
    #[must_use]
    pub fn global(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            scope: RelationScope::Global,
            optional: false,
        }
    }

    /// Create a container scoped relation on `interface`.
    #[must_use]
    pub fn container(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            scope: RelationScope::Container,
            optional: false,
        }
    }
}

/// Charm metadata, keyed by relation name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharmMeta {
    /// Charm name.
    pub name: String,
    /// One-line description.
    #[serde(default)]
    pub summary: String,
    /// Whether units of this charm must live beside a principal unit.
    #[serde(default)]
    pub subordinate: bool,
    /// Interfaces this charm offers.
    #[serde(default)]
    pub provides: BTreeMap<String, CharmRelation>,
    /// Interfaces this charm consumes.
    #[serde(default)]
    pub requires: BTreeMap<String, CharmRelation>,
    /// Interfaces shared between units of the same service.
    #[serde(default)]
    pub peers: BTreeMap<String, CharmRelation>,
}

impl CharmMeta {
    /// Create empty metadata for a principal charm.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Mark the charm as subordinate.
    #[must_use]
    pub fn subordinate(mut self) -> Self {
        self.subordinate = true;
        self
    }

    /// Add a provided relation.
    #[must_use]
    pub fn provides(mut self, name: impl Into<String>, rel: CharmRelation) -> Self {
        self.provides.insert(name.into(), rel);
        self
    }

    /// Add a required relation.
    #[must_use]
    pub fn requires(mut self, name: impl Into<String>, rel: CharmRelation) -> Self {
        self.requires.insert(name.into(), rel);
        self
    }

    /// Add a peer relation.
    #[must_use]
    pub fn peer(mut self, name: impl Into<String>, rel: CharmRelation) -> Self {
        self.peers.insert(name.into(), rel);
        self
    }
}
