//! Relations and their endpoints.

use std::cmp::Reverse;
use std::fmt;

use fleetstate_core::{Life, RelationRole, RelationScope, ServiceName};
use fleetstate_store::Collection;
use serde::{Deserialize, Serialize};

use crate::docs::{self, RelationDoc};
use crate::error::{Result, ResultExt, StateError};
use crate::lifecycle;
use crate::state::State;

/// One side of a relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Service offering or consuming the interface.
    #[serde(rename = "service")]
    pub service_name: ServiceName,
    /// Interface both sides must agree on.
    pub interface: String,
    /// Relation name as declared by the service's charm.
    #[serde(rename = "relation")]
    pub relation_name: String,
    /// Role in the relation.
    pub role: RelationRole,
    /// Visibility scope.
    #[serde(default)]
    pub scope: RelationScope,
}

impl Endpoint {
    /// Returns true if a relation between `self` and `other` makes sense.
    ///
    /// The two must belong to different services, share an interface, and
    /// play opposite provider/requirer roles.
    #[must_use]
    pub fn can_relate_to(&self, other: &Self) -> bool {
        self.service_name != other.service_name
            && self.interface == other.interface
            && self.role != RelationRole::Peer
            && self.role.counterpart() == other.role
    }

    /// Returns true if `other` describes the same charm relation, regardless
    /// of scope.
    pub(crate) fn same_relation(&self, other: &Self) -> bool {
        self.service_name == other.service_name
            && self.relation_name == other.relation_name
            && self.interface == other.interface
            && self.role == other.role
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service_name, self.relation_name)
    }
}

/// Put endpoints in canonical order: requirers, then providers, then peers,
/// each by service name.
pub(crate) fn sort_endpoints(endpoints: &mut [Endpoint]) {
    endpoints.sort_by(|a, b| {
        (Reverse(a.role), &a.service_name).cmp(&(Reverse(b.role), &b.service_name))
    });
}

/// Compute the key identifying the relation between `endpoints`.
#[must_use]
pub fn relation_key(endpoints: &[Endpoint]) -> String {
    let mut sorted = endpoints.to_vec();
    sort_endpoints(&mut sorted);
    sorted
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// A relation between one or two service endpoints.
#[derive(Clone)]
pub struct Relation {
    st: State,
    doc: RelationDoc,
}

impl fmt::Debug for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relation").field("doc", &self.doc).finish()
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.doc.key)
    }
}

impl Relation {
    pub(crate) const fn new(st: State, doc: RelationDoc) -> Self {
        Self { st, doc }
    }

    /// The relation key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.doc.key
    }

    /// The numeric relation id.
    #[must_use]
    pub const fn id(&self) -> i64 {
        self.doc.id
    }

    /// Cached lifecycle state.
    #[must_use]
    pub const fn life(&self) -> Life {
        self.doc.life
    }

    /// The relation's endpoints, in canonical order.
    #[must_use]
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.doc.endpoints
    }

    /// The endpoint belonging to `service`.
    ///
    /// # Errors
    ///
    /// Returns `StateError::InvalidReference` if the service is not a member.
    pub fn endpoint(&self, service: &str) -> Result<Endpoint> {
        self.doc
            .endpoints
            .iter()
            .find(|ep| ep.service_name.as_str() == service)
            .cloned()
            .ok_or_else(|| {
                StateError::InvalidReference(format!(
                    "service {service:?} is not a member of relation {:?}",
                    self.doc.key
                ))
            })
    }

    /// The endpoints `service` relates to: itself for a peer relation,
    /// otherwise the endpoint playing the opposite role.
    ///
    /// # Errors
    ///
    /// Returns `StateError::InvalidReference` if the service is not a member.
    pub fn related_endpoints(&self, service: &str) -> Result<Vec<Endpoint>> {
        let local = self.endpoint(service)?;
        let role = local.role.counterpart();
        let related: Vec<_> = self
            .doc
            .endpoints
            .iter()
            .filter(|ep| ep.role == role)
            .cloned()
            .collect();
        if related.is_empty() {
            return Err(StateError::InvalidReference(format!(
                "no endpoints of relation {:?} relate to service {service:?}",
                self.doc.key
            )));
        }
        Ok(related)
    }

    /// Reload the relation from the store.
    ///
    /// # Errors
    ///
    /// Returns `StateError::NotFound` if the relation has been removed.
    pub fn refresh(&mut self) -> Result<()> {
        let key = self.doc.key.as_str();
        let doc: RelationDoc = docs::load(self.st.store(), Collection::Relations, key)?
            .ok_or_else(|| lifecycle::not_found("relation", key))?;
        lifecycle::check_forward("relation", key, self.doc.life, doc.life)?;
        self.doc = doc;
        Ok(())
    }

    /// Move the relation to Dying if it is Alive. Does nothing otherwise.
    ///
    /// # Errors
    ///
    /// Returns `StateError::NotFound` if the relation has been removed.
    pub fn ensure_dying(&mut self) -> Result<()> {
        self.doc.life = lifecycle::ensure_dying(
            self.st.runner(),
            self.st.store(),
            Collection::Relations,
            &self.doc.key,
            "relation",
            self.doc.life,
        )
        .context(|| format!("cannot destroy relation {:?}", self.doc.key))?;
        Ok(())
    }

    /// Move the relation to Dead if it is Alive or Dying.
    ///
    /// # Errors
    ///
    /// Returns `StateError::NotFound` if the relation has been removed.
    pub fn ensure_dead(&mut self) -> Result<()> {
        if self.doc.life == Life::Dead {
            return Ok(());
        }
        lifecycle::ensure_dead(
            self.st.runner(),
            self.st.store(),
            Collection::Relations,
            &self.doc.key,
            "relation",
            Vec::new(),
            "cannot become dead",
        )
        .context(|| format!("cannot finish relation {:?}", self.doc.key))?;
        self.doc.life = Life::Dead;
        Ok(())
    }
}
