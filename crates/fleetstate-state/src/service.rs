//! Services: named deployments of a charm.
//!
//! A service owns a unit sequence and keeps counts of the units and
//! relations referring to it. The counts are only ever changed in the same
//! transaction that adds or removes the referring document, which is what
//! lets `ensure_dead` refuse a service that still has dependents without
//! scanning other collections.

use std::fmt;

use fleetstate_core::{
    CharmMeta, CharmRelation, CharmUrl, Life, RelationRole, ServiceName, UnitName,
};
use fleetstate_store::{Assert, Collection, Cond, Mutation, Op, StoreError};

use crate::charm::Charm;
use crate::docs::{self, field, RelationDoc, ServiceDoc, UnitDoc};
use crate::error::{on_abort, Result, ResultExt, StateError};
use crate::lifecycle;
use crate::relation::{Endpoint, Relation};
use crate::settings::{self, Settings};
use crate::state::State;
use crate::txn::{Outcome, Step};
use crate::unit::{Unit, UnitStatus};

/// Relation every service provides without declaring it.
pub const IMPLICIT_RELATION: &str = "info";

/// How a new unit is to be placed.
#[derive(Debug, Clone, Copy)]
pub enum NewUnit<'a> {
    /// A unit of a principal service.
    Principal,
    /// A unit of a subordinate service, deployed beside `principal`.
    Subordinate {
        /// The principal unit.
        principal: &'a Unit,
        /// Refuse if `principal` already has a unit of this service.
        strict: bool,
    },
}

/// A deployed service.
#[derive(Clone)]
pub struct Service {
    st: State,
    doc: ServiceDoc,
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service").field("doc", &self.doc).finish()
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.doc.name, f)
    }
}

impl Service {
    pub(crate) const fn new(st: State, doc: ServiceDoc) -> Self {
        Self { st, doc }
    }

    /// The service name.
    #[must_use]
    pub const fn name(&self) -> &ServiceName {
        &self.doc.name
    }

    /// Cached lifecycle state.
    #[must_use]
    pub const fn life(&self) -> Life {
        self.doc.life
    }

    /// Whether the service is exposed outside the deployment.
    #[must_use]
    pub const fn is_exposed(&self) -> bool {
        self.doc.exposed
    }

    /// The charm URL, and whether units upgrade even when in error.
    #[must_use]
    pub const fn charm_url(&self) -> (&CharmUrl, bool) {
        (&self.doc.charm_url, self.doc.force_charm)
    }

    /// Cached number of units.
    #[must_use]
    pub const fn unit_count(&self) -> i64 {
        self.doc.unit_count
    }

    /// Cached number of relations.
    #[must_use]
    pub const fn relation_count(&self) -> i64 {
        self.doc.relation_count
    }

    /// Key of the service's settings document.
    pub(crate) fn global_key(&self) -> String {
        settings::service_key(&self.doc.name)
    }

    /// Reload the service from the store.
    ///
    /// # Errors
    ///
    /// Returns `StateError::NotFound` if the service has been removed, or
    /// `StateError::InconsistentState` if its stored life is behind the
    /// cached one.
    pub fn refresh(&mut self) -> Result<()> {
        let name = self.doc.name.as_str();
        let doc: ServiceDoc = docs::load(self.st.store(), Collection::Services, name)?
            .ok_or_else(|| lifecycle::not_found("service", name))?;
        lifecycle::check_forward("service", name, self.doc.life, doc.life)?;
        self.doc = doc;
        Ok(())
    }

    /// Move the service, and every Alive relation it takes part in, to
    /// Dying in one transaction. Does nothing unless the service is Alive.
    ///
    /// # Errors
    ///
    /// Returns `StateError::NotFound` if the service has been removed, or
    /// `StateError::ExcessiveContention` if the retry policy ran out.
    pub fn ensure_dying(&mut self) -> Result<()> {
        let runner = self.st.runner().clone();
        let outcome = runner
            .run(|attempt| {
                if attempt > 0 {
                    self.refresh()?;
                }
                if self.doc.life != Life::Alive {
                    return Ok(Step::Done);
                }
                tracing::debug!(
                    service = %self.doc.name,
                    relations = self.doc.relation_count,
                    "Collecting relations"
                );
                let rels = self.relation_docs()?;
                if i64::try_from(rels.len()).ok() != Some(self.doc.relation_count) {
                    tracing::debug!(service = %self.doc.name, "Service relations changed");
                    return Ok(Step::Retry);
                }
                let mut ops = vec![Op::new(Collection::Services, self.doc.name.as_str())
                    .assert(Assert::fields([
                        lifecycle::alive_cond(),
                        Cond::eq(field::REVNO, self.doc.txn_revno),
                    ]))
                    .update([lifecycle::set_life(Life::Dying)])];
                ops.extend(rels.iter().filter(|rel| rel.life == Life::Alive).map(|rel| {
                    Op::new(Collection::Relations, rel.key.as_str())
                        .assert(lifecycle::is_alive())
                        .update([lifecycle::set_life(Life::Dying)])
                }));
                Ok(Step::Apply(ops))
            })
            .context(|| format!("cannot destroy service {:?}", self.doc.name.as_str()))?;
        if outcome == Outcome::Committed {
            tracing::info!(service = %self.doc.name, "Service is now dying");
            self.doc.life = Life::Dying;
        }
        Ok(())
    }

    /// Move the service to Dead if it is Alive or Dying.
    ///
    /// # Errors
    ///
    /// Returns `StateError::HasDependents` if the service still has units or
    /// relations when the transaction is applied.
    pub fn ensure_dead(&mut self) -> Result<()> {
        if self.doc.life == Life::Dead {
            return Ok(());
        }
        lifecycle::ensure_dead(
            self.st.runner(),
            self.st.store(),
            Collection::Services,
            self.doc.name.as_str(),
            "service",
            vec![
                Cond::eq(field::UNIT_COUNT, 0),
                Cond::eq(field::RELATION_COUNT, 0),
            ],
            "still has units and/or relations",
        )
        .context(|| format!("cannot finish service {:?}", self.doc.name.as_str()))?;
        self.doc.life = Life::Dead;
        Ok(())
    }

    /// Mark the service as exposed.
    ///
    /// # Errors
    ///
    /// Returns `StateError::NotAlive` if the service is not Alive.
    pub fn set_exposed(&mut self) -> Result<()> {
        self.set_exposed_flag(true)
    }

    /// Clear the service's exposed flag.
    ///
    /// # Errors
    ///
    /// Returns `StateError::NotAlive` if the service is not Alive.
    pub fn clear_exposed(&mut self) -> Result<()> {
        self.set_exposed_flag(false)
    }

    fn set_exposed_flag(&mut self, exposed: bool) -> Result<()> {
        let name = self.doc.name.as_str();
        let op = Op::new(Collection::Services, name)
            .assert(lifecycle::is_alive())
            .update([Mutation::set(field::EXPOSED, exposed)]);
        self.st
            .runner()
            .apply(&[op])
            .map_err(|e| on_abort(e, lifecycle::not_alive("service", name)))
            .context(|| format!("cannot set exposed flag for service {name:?} to {exposed}"))?;
        tracing::info!(service = %self.doc.name, exposed, "Set exposed flag");
        self.doc.exposed = exposed;
        Ok(())
    }

    /// The service's charm, and whether units upgrade even when in error.
    ///
    /// # Errors
    ///
    /// Returns `StateError::NotFound` if the charm is not in the store.
    pub fn charm(&self) -> Result<(Charm, bool)> {
        let charm = self.st.charm(&self.doc.charm_url)?;
        Ok((charm, self.doc.force_charm))
    }

    /// Switch the service to a different charm.
    ///
    /// Existing units are not checked against the new charm.
    ///
    /// # Errors
    ///
    /// Returns `StateError::NotAlive` if the service is not Alive.
    pub fn set_charm(&mut self, charm: &Charm, force: bool) -> Result<()> {
        let name = self.doc.name.as_str();
        let op = Op::new(Collection::Services, name)
            .assert(lifecycle::is_alive())
            .update([
                Mutation::set(field::CHARM_URL, charm.url().to_string()),
                Mutation::set(field::FORCE_CHARM, force),
            ]);
        self.st
            .runner()
            .apply(&[op])
            .map_err(|e| on_abort(e, lifecycle::not_alive("service", name)))
            .context(|| format!("cannot set charm for service {name:?}"))?;
        tracing::info!(service = %self.doc.name, charm = %charm.url(), force, "Set service charm");
        self.doc.charm_url = charm.url().clone();
        self.doc.force_charm = force;
        Ok(())
    }

    /// The relation endpoints the service's current charm offers.
    ///
    /// Endpoints are derived from the charm each time; they change when the
    /// charm does.
    ///
    /// # Errors
    ///
    /// Returns `StateError::NotFound` if the charm is not in the store.
    pub fn endpoints(&self) -> Result<Vec<Endpoint>> {
        let (charm, _) = self.charm()?;
        Ok(endpoints_of(&self.doc.name, charm.meta()))
    }

    /// The endpoint with relation name `relation`.
    ///
    /// # Errors
    ///
    /// Returns `StateError::NotFound` if the charm has no such relation.
    pub fn endpoint(&self, relation: &str) -> Result<Endpoint> {
        self.endpoints()?
            .into_iter()
            .find(|ep| ep.relation_name == relation)
            .ok_or_else(|| {
                lifecycle::not_found("relation endpoint", format!("{}:{relation}", self.doc.name))
            })
    }

    /// Add a unit to the service.
    ///
    /// The unit name is allocated before the transaction runs, so a failed
    /// attempt consumes a sequence number. This operation does not retry.
    ///
    /// # Errors
    ///
    /// Returns `StateError::InvalidReference` if the placement does not fit
    /// the charm, `StateError::NotAlive` if the service or principal unit
    /// is not Alive, `StateError::AlreadyExists` if a strict subordinate
    /// placement finds an existing subordinate of this service, or
    /// `StateError::InconsistentState` if the abort has no known cause.
    pub fn add_unit(&self, placement: NewUnit<'_>) -> Result<Unit> {
        let name = self.doc.name.as_str();
        match placement {
            NewUnit::Principal => self
                .add_unit_inner(None)
                .context(|| format!("cannot add unit to service {name:?}")),
            NewUnit::Subordinate { principal, strict } => self
                .add_unit_inner(Some((principal, strict)))
                .context(|| {
                    format!(
                        "cannot add unit to service {name:?} as a subordinate of {:?}",
                        principal.name().as_str()
                    )
                }),
        }
    }

    fn add_unit_inner(&self, principal: Option<(&Unit, bool)>) -> Result<Unit> {
        let (charm, _) = self.charm()?;
        let subordinate = charm.meta().subordinate;
        match principal {
            None if subordinate => {
                return Err(StateError::InvalidReference("service is subordinate".to_string()))
            }
            Some(_) if !subordinate => {
                return Err(StateError::InvalidReference(
                    "service is not a subordinate".to_string(),
                ))
            }
            Some((unit, _)) if !unit.is_principal() => {
                return Err(StateError::InvalidReference("unit is not a principal".to_string()))
            }
            _ => {}
        }

        let name = self.new_unit_name()?;
        let doc = UnitDoc {
            name: name.clone(),
            service: self.doc.name.clone(),
            life: Life::Alive,
            status: UnitStatus::Pending,
            status_info: String::new(),
            status_since: None,
            principal: principal.map(|(unit, _)| unit.name().clone()),
            subordinates: Vec::new(),
            machine_id: None,
            txn_revno: 0,
        };
        let mut ops = vec![
            Op::new(Collection::Units, name.as_str())
                .assert(Assert::DocMissing)
                .insert(docs::encode(&doc)?),
            Op::new(Collection::Services, self.doc.name.as_str())
                .assert(lifecycle::is_alive())
                .update([Mutation::inc(field::UNIT_COUNT, 1)]),
        ];
        if let Some((unit, strict)) = principal {
            let mut conds = vec![lifecycle::alive_cond()];
            if strict {
                conds.push(Cond::no_element_with_prefix(
                    field::SUBORDINATES,
                    self.subordinate_prefix(),
                ));
            }
            ops.push(
                Op::new(Collection::Units, unit.name().as_str())
                    .assert(Assert::Fields(conds))
                    .update([Mutation::add_to_set(field::SUBORDINATES, name.as_str())]),
            );
        }

        match self.st.runner().apply(&ops) {
            Ok(()) => {
                tracing::info!(service = %self.doc.name, unit = %name, "Added unit");
                self.unit(name.as_str())
            }
            Err(StoreError::Aborted) => Err(self.explain_add_unit_abort(principal)?),
            Err(e) => Err(e.into()),
        }
    }

    fn explain_add_unit_abort(&self, principal: Option<(&Unit, bool)>) -> Result<StateError> {
        let store = self.st.store();
        let name = self.doc.name.as_str();
        if !lifecycle::is_alive_in_store(store, Collection::Services, name)? {
            return Ok(lifecycle::not_alive("service", name));
        }
        if let Some((unit, strict)) = principal {
            let unit_name = unit.name().as_str();
            let doc: Option<UnitDoc> = docs::load(store, Collection::Units, unit_name)?;
            let Some(doc) = doc.filter(|doc| doc.life == Life::Alive) else {
                return Ok(lifecycle::not_alive("principal unit", unit_name));
            };
            let prefix = self.subordinate_prefix();
            if strict && doc.subordinates.iter().any(|s| s.as_str().starts_with(&prefix)) {
                return Ok(StateError::AlreadyExists(format!(
                    "subordinate of {unit_name:?} from service {name:?}"
                )));
            }
        }
        Ok(StateError::InconsistentState(
            "unit creation aborted without cause".to_string(),
        ))
    }

    fn subordinate_prefix(&self) -> String {
        format!("{}/", self.doc.name)
    }

    /// Allocate the next unit name from the service's sequence.
    fn new_unit_name(&self) -> Result<UnitName> {
        let name = self.doc.name.as_str();
        let doc = self
            .st
            .store()
            .increment(Collection::Services, name, field::UNIT_SEQ, 1)
            .map_err(|e| match e {
                StoreError::NotFound => lifecycle::not_found("service", name),
                other => StateError::from(other)
                    .context("cannot increment unit sequence".to_string()),
            })?;
        let seq = docs::counter(&doc, Collection::Services, name, field::UNIT_SEQ)?;
        let number = u64::try_from(seq - 1).map_err(|_| {
            StateError::InconsistentState(format!("unit sequence of service {name:?} is {seq}"))
        })?;
        Ok(self.doc.name.unit(number))
    }

    /// Remove a Dead unit of this service.
    ///
    /// A unit still assigned to a machine is unassigned first. If another
    /// writer removed the unit concurrently, this succeeds.
    ///
    /// # Errors
    ///
    /// Returns `StateError::NotDead` if the unit is not Dead,
    /// `StateError::InvalidReference` if it belongs to another service, or
    /// `StateError::InconsistentState` if the unit survived an aborted
    /// removal.
    pub fn remove_unit(&self, unit: &mut Unit) -> Result<()> {
        let unit_name = unit.name().to_string();
        self.remove_unit_inner(unit)
            .context(|| format!("cannot remove unit {unit_name:?}"))
    }

    fn remove_unit_inner(&self, unit: &mut Unit) -> Result<()> {
        if unit.life() != Life::Dead {
            return Err(StateError::NotDead {
                kind: "unit",
                name: unit.name().to_string(),
            });
        }
        if unit.service_name() != &self.doc.name {
            return Err(StateError::InvalidReference(format!(
                "unit is not a unit of service {:?}",
                self.doc.name.as_str()
            )));
        }
        if unit.assigned_machine_id().is_some() {
            match unit.unassign_from_machine() {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    tracing::warn!(
                        service = %self.doc.name,
                        unit = %unit.name(),
                        "Unit already removed"
                    );
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }

        let unit_name = unit.name().as_str();
        let mut ops = vec![
            Op::new(Collection::Units, unit_name)
                .assert(lifecycle::is_dead())
                .remove(),
            Op::new(Collection::Services, self.doc.name.as_str())
                .assert(Assert::fields([Cond::gt(field::UNIT_COUNT, 0)]))
                .update([Mutation::inc(field::UNIT_COUNT, -1)]),
        ];
        if let Some(principal) = unit.principal_name() {
            ops.push(
                Op::new(Collection::Units, principal.as_str())
                    .assert(Assert::DocExists)
                    .update([Mutation::pull(field::SUBORDINATES, unit_name)]),
            );
        }

        match self.st.runner().apply(&ops) {
            Ok(()) => {
                tracing::info!(service = %self.doc.name, unit = unit_name, "Removed unit");
                Ok(())
            }
            Err(StoreError::Aborted) => {
                if self.st.store().find_id(Collection::Units, unit_name)?.is_some() {
                    return Err(StateError::InconsistentState(
                        "unit remains after aborted removal".to_string(),
                    ));
                }
                tracing::warn!(
                    service = %self.doc.name,
                    unit = unit_name,
                    "Unit already removed"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The unit of this service named `name`.
    ///
    /// # Errors
    ///
    /// Returns `StateError::InvalidName` for a malformed name, or
    /// `StateError::NotFound` if the service has no such unit.
    pub fn unit(&self, name: &str) -> Result<Unit> {
        let name = UnitName::new(name)?;
        let doc: Option<UnitDoc> = docs::load(self.st.store(), Collection::Units, name.as_str())?;
        match doc {
            Some(doc) if doc.service == self.doc.name => Ok(Unit::new(self.st.clone(), doc)),
            _ => Err(lifecycle::not_found("unit", name.as_str())),
        }
    }

    /// Every unit of the service.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn all_units(&self) -> Result<Vec<Unit>> {
        let docs: Vec<UnitDoc> = docs::load_all(
            self.st.store(),
            Collection::Units,
            &[Cond::eq(field::SERVICE, self.doc.name.as_str())],
        )
        .context(|| format!("cannot get all units from service {:?}", self.doc.name.as_str()))?;
        Ok(docs
            .into_iter()
            .map(|doc| Unit::new(self.st.clone(), doc))
            .collect())
    }

    fn relation_docs(&self) -> Result<Vec<RelationDoc>> {
        docs::load_all(
            self.st.store(),
            Collection::Relations,
            &[Cond::eq(field::ENDPOINT_SERVICES, self.doc.name.as_str())],
        )
        .context(|| format!("cannot get relations for service {:?}", self.doc.name.as_str()))
    }

    /// Every relation the service takes part in.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn relations(&self) -> Result<Vec<Relation>> {
        Ok(self
            .relation_docs()?
            .into_iter()
            .map(|doc| Relation::new(self.st.clone(), doc))
            .collect())
    }

    /// The service's configuration settings.
    ///
    /// # Errors
    ///
    /// Returns `StateError::NotFound` if the settings document is missing.
    pub fn config(&self) -> Result<Settings> {
        settings::read_settings(&self.st, &self.global_key())
            .context(|| format!("cannot get configuration of service {:?}", self.doc.name.as_str()))
    }
}

/// Derive the endpoints a charm gives `service`.
fn endpoints_of(service: &ServiceName, meta: &CharmMeta) -> Vec<Endpoint> {
    let implicit = [(
        IMPLICIT_RELATION.to_string(),
        CharmRelation::global(IMPLICIT_RELATION),
    )];
    let declared = [
        (RelationRole::Peer, &meta.peers),
        (RelationRole::Provider, &meta.provides),
        (RelationRole::Requirer, &meta.requires),
    ];
    declared
        .into_iter()
        .flat_map(|(role, rels)| rels.iter().map(move |(name, rel)| (role, name, rel)))
        .chain(
            implicit
                .iter()
                .map(|(name, rel)| (RelationRole::Provider, name, rel)),
        )
        .map(|(role, name, rel)| Endpoint {
            service_name: service.clone(),
            interface: rel.interface.clone(),
            relation_name: name.clone(),
            role,
            scope: rel.scope,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use fleetstate_core::RelationScope;
    use serde_json::Value;

    #[test]
    fn endpoints_include_implicit_provider() {
        let fx = Fixture::new();
        let eps = fx.wordpress().endpoints().unwrap();
        let names: Vec<_> = eps.iter().map(|ep| ep.relation_name.as_str()).collect();
        assert_eq!(names, ["db", IMPLICIT_RELATION]);

        let info = fx.mysql().endpoint(IMPLICIT_RELATION).unwrap();
        assert_eq!(info.role, RelationRole::Provider);
        assert_eq!(info.interface, IMPLICIT_RELATION);
        assert_eq!(info.scope, RelationScope::Global);

        let err = fx.mysql().endpoint("cache").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn units_are_numbered_from_zero() {
        let fx = Fixture::new();
        let mut wordpress = fx.wordpress();
        let first = wordpress.add_unit(NewUnit::Principal).unwrap();
        let second = wordpress.add_unit(NewUnit::Principal).unwrap();
        assert_eq!(first.name().as_str(), "wordpress/0");
        assert_eq!(second.name().as_str(), "wordpress/1");
        assert_eq!(first.life(), Life::Alive);
        assert!(first.is_principal());

        wordpress.refresh().unwrap();
        assert_eq!(wordpress.unit_count(), 2);
        let names: Vec<_> = wordpress
            .all_units()
            .unwrap()
            .iter()
            .map(|u| u.name().to_string())
            .collect();
        assert_eq!(names, ["wordpress/0", "wordpress/1"]);
    }

    #[test]
    fn dying_cascades_to_relations() {
        let fx = Fixture::new();
        let rel = fx.relate_wordpress_mysql();
        let mut wordpress = fx.wordpress();
        assert_eq!(wordpress.relation_count(), 1);

        wordpress.ensure_dying().unwrap();
        assert_eq!(wordpress.life(), Life::Dying);

        let rel = fx.state.relation(rel.key()).unwrap();
        assert_eq!(rel.life(), Life::Dying);
        assert_eq!(fx.mysql().life(), Life::Alive);

        let err = wordpress.add_unit(NewUnit::Principal).unwrap_err();
        assert!(err.is_not_alive());
        assert_eq!(
            err.to_string(),
            "cannot add unit to service \"wordpress\": service \"wordpress\" is not alive"
        );
    }

    #[test]
    fn dying_with_stale_relation_count_refreshes() {
        let fx = Fixture::new();
        let mut wordpress = fx.wordpress();
        let rel = fx.relate_wordpress_mysql();
        // The cached copy predates the relation.
        assert_eq!(wordpress.relation_count(), 0);

        wordpress.ensure_dying().unwrap();
        assert_eq!(wordpress.life(), Life::Dying);
        assert_eq!(wordpress.relation_count(), 1);
        assert_eq!(fx.state.relation(rel.key()).unwrap().life(), Life::Dying);
    }

    #[test]
    fn dying_skips_relations_already_dying() {
        let fx = Fixture::new();
        let mut rel = fx.relate_wordpress_mysql();
        rel.ensure_dying().unwrap();
        rel.ensure_dead().unwrap();

        let mut wordpress = fx.wordpress();
        wordpress.ensure_dying().unwrap();
        assert_eq!(fx.state.relation(rel.key()).unwrap().life(), Life::Dead);
    }

    #[test]
    fn dying_is_idempotent() {
        let fx = Fixture::new();
        let mut wordpress = fx.wordpress();
        wordpress.ensure_dying().unwrap();
        let revno = fx.wordpress().doc.txn_revno;

        wordpress.ensure_dying().unwrap();
        let mut stale = fx.wordpress();
        stale.doc.life = Life::Alive;
        stale.ensure_dying().unwrap();
        assert_eq!(stale.life(), Life::Dying);
        assert_eq!(fx.wordpress().doc.txn_revno, revno);
    }

    #[test]
    fn dead_requires_no_dependents() {
        let fx = Fixture::new();
        let mut wordpress = fx.wordpress();
        let mut unit = wordpress.add_unit(NewUnit::Principal).unwrap();

        let err = wordpress.ensure_dead().unwrap_err();
        assert!(err.is_has_dependents());
        assert!(err.to_string().contains("still has units and/or relations"));

        unit.ensure_dead().unwrap();
        wordpress.remove_unit(&mut unit).unwrap();
        wordpress.ensure_dead().unwrap();
        wordpress.ensure_dead().unwrap();
        assert_eq!(wordpress.life(), Life::Dead);

        wordpress.refresh().unwrap();
        assert_eq!(wordpress.unit_count(), 0);
        assert_eq!(wordpress.life(), Life::Dead);
    }

    #[test]
    fn exposed_flag_requires_alive() {
        let fx = Fixture::new();
        let mut wordpress = fx.wordpress();
        assert!(!wordpress.is_exposed());
        wordpress.set_exposed().unwrap();
        assert!(fx.wordpress().is_exposed());
        wordpress.clear_exposed().unwrap();
        assert!(!fx.wordpress().is_exposed());

        wordpress.ensure_dying().unwrap();
        let err = wordpress.set_exposed().unwrap_err();
        assert!(err.is_not_alive());
        assert!(!fx.wordpress().is_exposed());
    }

    #[test]
    fn set_charm_swaps_endpoints() {
        let fx = Fixture::new();
        let mut wordpress = fx.wordpress();
        let meta = CharmMeta::new("wordpress")
            .requires("db", CharmRelation::global("mysql"))
            .provides("website", CharmRelation::global("http"));
        let url = CharmUrl::parse("cs:precise/wordpress-4").unwrap();
        let upgraded = fx.state.add_charm(url.clone(), meta).unwrap();

        wordpress.set_charm(&upgraded, true).unwrap();
        assert_eq!(wordpress.charm_url(), (&url, true));
        let reread = fx.wordpress();
        assert_eq!(reread.charm_url(), (&url, true));
        assert!(reread.endpoint("website").is_ok());

        wordpress.ensure_dying().unwrap();
        let err = wordpress.set_charm(&upgraded, false).unwrap_err();
        assert!(err.is_not_alive());
    }

    #[test]
    fn subordinate_requires_principal() {
        let fx = Fixture::new();
        let logging = fx.logging();
        let revno = fx.logging().doc.txn_revno;

        let err = logging.add_unit(NewUnit::Principal).unwrap_err();
        assert!(matches!(err.cause(), StateError::InvalidReference(_)));
        assert_eq!(
            err.to_string(),
            "cannot add unit to service \"logging\": service is subordinate"
        );
        // Rejected before the sequence was touched.
        assert_eq!(fx.logging().doc.txn_revno, revno);
        assert_eq!(fx.logging().doc.unit_seq, 0);

        let principal = fx.wordpress().add_unit(NewUnit::Principal).unwrap();
        let err = fx
            .mysql()
            .add_unit(NewUnit::Subordinate {
                principal: &principal,
                strict: false,
            })
            .unwrap_err();
        assert!(err.to_string().ends_with("service is not a subordinate"));
    }

    #[test]
    fn subordinate_needs_principal_unit() {
        let fx = Fixture::new();
        let logging = fx.logging();
        let principal = fx.wordpress().add_unit(NewUnit::Principal).unwrap();
        let sub = logging
            .add_unit(NewUnit::Subordinate {
                principal: &principal,
                strict: false,
            })
            .unwrap();

        let err = logging
            .add_unit(NewUnit::Subordinate {
                principal: &sub,
                strict: false,
            })
            .unwrap_err();
        assert!(err.to_string().ends_with("unit is not a principal"));
    }

    #[test]
    fn strict_subordinates_are_unique_per_principal() {
        let fx = Fixture::new();
        let logging = fx.logging();
        let principal = fx.wordpress().add_unit(NewUnit::Principal).unwrap();
        let strict = NewUnit::Subordinate {
            principal: &principal,
            strict: true,
        };

        logging.add_unit(strict).unwrap();
        let err = logging.add_unit(strict).unwrap_err();
        assert!(matches!(err.cause(), StateError::AlreadyExists(_)));

        // Non-strict placement allows a second subordinate.
        let loose = logging
            .add_unit(NewUnit::Subordinate {
                principal: &principal,
                strict: false,
            })
            .unwrap();
        assert_eq!(loose.name().as_str(), "logging/2");
    }

    #[test]
    fn subordinate_of_dying_principal_fails() {
        let fx = Fixture::new();
        let mut principal = fx.wordpress().add_unit(NewUnit::Principal).unwrap();
        principal.ensure_dying().unwrap();
        let err = fx
            .logging()
            .add_unit(NewUnit::Subordinate {
                principal: &principal,
                strict: false,
            })
            .unwrap_err();
        assert!(err.is_not_alive());
        assert!(err.to_string().contains("principal unit \"wordpress/0\""));
    }

    #[test]
    fn remove_unit_preconditions() {
        let fx = Fixture::new();
        let wordpress = fx.wordpress();
        let mut unit = wordpress.add_unit(NewUnit::Principal).unwrap();

        let err = wordpress.remove_unit(&mut unit).unwrap_err();
        assert!(matches!(err.cause(), StateError::NotDead { .. }));

        unit.ensure_dead().unwrap();
        let err = fx.mysql().remove_unit(&mut unit).unwrap_err();
        assert!(matches!(err.cause(), StateError::InvalidReference(_)));
    }

    #[test]
    fn remove_unit_unassigns_and_detaches() {
        let fx = Fixture::new();
        let wordpress = fx.wordpress();
        let logging = fx.logging();
        let mut principal = wordpress.add_unit(NewUnit::Principal).unwrap();
        principal.assign_to_machine("0").unwrap();
        let mut sub = logging
            .add_unit(NewUnit::Subordinate {
                principal: &principal,
                strict: true,
            })
            .unwrap();

        sub.ensure_dead().unwrap();
        logging.remove_unit(&mut sub).unwrap();
        assert!(fx.state.unit("logging/0").unwrap_err().is_not_found());
        principal.refresh().unwrap();
        assert!(principal.subordinate_names().is_empty());

        principal.ensure_dead().unwrap();
        wordpress.remove_unit(&mut principal).unwrap();
        assert_eq!(principal.assigned_machine_id(), None);
        assert_eq!(fx.wordpress().unit_count(), 0);
        assert_eq!(fx.logging().unit_count(), 0);

        // A second removal finds the unit gone.
        wordpress.remove_unit(&mut principal).unwrap();
        assert_eq!(fx.wordpress().unit_count(), 0);
    }

    #[test]
    fn remove_stale_assigned_unit_after_removal() {
        let fx = Fixture::new();
        let wordpress = fx.wordpress();
        let mut unit = wordpress.add_unit(NewUnit::Principal).unwrap();
        unit.assign_to_machine("0").unwrap();
        unit.ensure_dead().unwrap();
        let mut stale = unit.clone();

        wordpress.remove_unit(&mut unit).unwrap();
        assert_eq!(stale.assigned_machine_id(), Some("0"));
        wordpress.remove_unit(&mut stale).unwrap();
        assert!(fx.state.unit("wordpress/0").unwrap_err().is_not_found());
        assert_eq!(fx.wordpress().unit_count(), 0);
    }

    #[test]
    fn remove_unit_with_broken_count_is_inconsistent() {
        let fx = Fixture::new();
        let wordpress = fx.wordpress();
        let mut unit = wordpress.add_unit(NewUnit::Principal).unwrap();
        unit.ensure_dead().unwrap();
        fx.state
            .store()
            .apply(&[Op::new(Collection::Services, "wordpress")
                .update([Mutation::set(field::UNIT_COUNT, 0)])])
            .unwrap();

        let err = wordpress.remove_unit(&mut unit).unwrap_err();
        assert!(err.is_inconsistent_state());
        assert!(fx.state.unit("wordpress/0").is_ok());
    }

    #[test]
    fn dead_refused_while_relations_remain() {
        let fx = Fixture::new();
        let rel = fx.relate_wordpress_mysql();
        let mut mysql = fx.mysql();
        mysql.ensure_dying().unwrap();
        assert_eq!(mysql.unit_count(), 0);

        let err = mysql.ensure_dead().unwrap_err();
        assert!(err.is_has_dependents());
        assert_eq!(fx.mysql().life(), Life::Dying);

        let mut rel = fx.state.relation(rel.key()).unwrap();
        rel.ensure_dead().unwrap();
        fx.state.remove_relation(&rel).unwrap();
        mysql.ensure_dead().unwrap();
        assert_eq!(fx.mysql().life(), Life::Dead);
    }

    #[test]
    fn unit_lookup() {
        let fx = Fixture::new();
        let wordpress = fx.wordpress();
        wordpress.add_unit(NewUnit::Principal).unwrap();

        assert!(wordpress.unit("wordpress/0").is_ok());
        assert!(wordpress.unit("wordpress/1").unwrap_err().is_not_found());
        assert!(fx.mysql().unit("wordpress/0").unwrap_err().is_not_found());
        assert!(matches!(
            wordpress.unit("wordpress").unwrap_err(),
            StateError::InvalidName(_)
        ));
    }

    #[test]
    fn config_settings() {
        let fx = Fixture::new();
        let mut config = fx.wordpress().config().unwrap();
        assert!(config.keys().is_empty());
        config.set("blog-title", "My Blog").unwrap();
        config.write().unwrap();

        let config = fx.wordpress().config().unwrap();
        assert_eq!(config.get("blog-title"), Some(&Value::from("My Blog")));
    }
}
