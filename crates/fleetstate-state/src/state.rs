//! The state context: entry point and entity factory.

use std::collections::BTreeMap;
use std::sync::Arc;

use fleetstate_core::{CharmMeta, CharmUrl, Life, RelationRole, RelationScope, ServiceName};
use fleetstate_store::{Assert, Collection, Cond, Mutation, Op, Store, StoreError};
use serde_json::Value;

use crate::charm::Charm;
use crate::docs::{self, field, CharmDoc, RelationDoc, ServiceDoc, UnitDoc};
use crate::error::{on_abort, Result, ResultExt, StateError};
use crate::lifecycle;
use crate::relation::{relation_key, sort_endpoints, Endpoint, Relation};
use crate::service::Service;
use crate::settings;
use crate::txn::{Runner, Step};
use crate::types::StateConfig;
use crate::unit::Unit;

/// Handle on the shared state.
///
/// Cloning is cheap; every entity keeps a clone to run its transactions.
#[derive(Clone)]
pub struct State {
    store: Arc<dyn Store>,
    runner: Runner,
    config: Arc<StateConfig>,
}

impl State {
    /// Create a state over `store`.
    #[must_use]
    pub fn open(store: Arc<dyn Store>, config: StateConfig) -> Self {
        let runner = Runner::new(Arc::clone(&store), config.retry.clone());
        Self {
            store,
            runner,
            config: Arc::new(config),
        }
    }

    /// Create a state with default configuration.
    #[must_use]
    pub fn with_defaults(store: Arc<dyn Store>) -> Self {
        Self::open(store, StateConfig::default())
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    /// The transaction runner.
    #[must_use]
    pub const fn runner(&self) -> &Runner {
        &self.runner
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &StateConfig {
        &self.config
    }

    /// Store a charm.
    ///
    /// # Errors
    ///
    /// Returns `StateError::AlreadyExists` if a charm with this URL is stored.
    pub fn add_charm(&self, url: CharmUrl, meta: CharmMeta) -> Result<Charm> {
        let doc = CharmDoc { url, meta };
        let op = Op::new(Collection::Charms, doc.url.to_string())
            .assert(Assert::DocMissing)
            .insert(docs::encode(&doc)?);
        self.runner
            .apply(&[op])
            .map_err(|e| on_abort(e, StateError::AlreadyExists(format!("charm {:?}", doc.url.to_string()))))
            .context(|| format!("cannot add charm {:?}", doc.url.to_string()))?;
        tracing::info!(charm = %doc.url, "Added charm");
        Ok(Charm::new(doc))
    }

    /// Get a charm by URL.
    ///
    /// # Errors
    ///
    /// Returns `StateError::NotFound` if the charm is not stored.
    pub fn charm(&self, url: &CharmUrl) -> Result<Charm> {
        let id = url.to_string();
        docs::load(self.store(), Collection::Charms, &id)?
            .map(Charm::new)
            .ok_or_else(|| lifecycle::not_found("charm", id))
    }

    /// Deploy a new service running `charm`, with empty configuration.
    ///
    /// # Errors
    ///
    /// Returns `StateError::InvalidName` for a malformed name,
    /// `StateError::AlreadyExists` if the service exists, or
    /// `StateError::NotFound` if the charm has been removed.
    pub fn add_service(&self, name: &str, charm: &Charm) -> Result<Service> {
        let ctx = || format!("cannot add service {name:?}");
        let name = ServiceName::new(name).map_err(StateError::from).context(ctx)?;
        let doc = ServiceDoc {
            name: name.clone(),
            charm_url: charm.url().clone(),
            force_charm: false,
            life: Life::Alive,
            unit_seq: 0,
            unit_count: 0,
            relation_count: 0,
            exposed: false,
            txn_revno: 0,
        };
        let ops = [
            Op::new(Collection::Charms, charm.url().to_string()).assert(Assert::DocExists),
            Op::new(Collection::Services, name.as_str())
                .assert(Assert::DocMissing)
                .insert(docs::encode(&doc)?),
            settings::create_settings_op(&settings::service_key(&name), BTreeMap::new())?,
        ];
        match self.runner.apply(&ops) {
            Ok(()) => {}
            Err(StoreError::Aborted) => {
                let err = if self.store.find_id(Collection::Services, name.as_str())?.is_some() {
                    StateError::AlreadyExists(format!("service {:?}", name.as_str()))
                } else if self.store.find_id(Collection::Charms, &charm.url().to_string())?.is_none() {
                    lifecycle::not_found("charm", charm.url().to_string())
                } else {
                    StateError::InconsistentState("stale settings for new service".to_string())
                };
                return Err(err).context(ctx);
            }
            Err(e) => return Err(StateError::from(e)).context(ctx),
        }
        tracing::info!(service = %name, charm = %charm.url(), "Added service");
        self.service(name.as_str())
    }

    /// Get a service by name.
    ///
    /// # Errors
    ///
    /// Returns `StateError::InvalidName` for a malformed name, or
    /// `StateError::NotFound` if there is no such service.
    pub fn service(&self, name: &str) -> Result<Service> {
        let name = ServiceName::new(name)?;
        docs::load(self.store(), Collection::Services, name.as_str())?
            .map(|doc| Service::new(self.clone(), doc))
            .ok_or_else(|| lifecycle::not_found("service", name.as_str()))
    }

    /// Every service, in name order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn all_services(&self) -> Result<Vec<Service>> {
        let docs: Vec<ServiceDoc> = docs::load_all(self.store(), Collection::Services, &[])?;
        Ok(docs
            .into_iter()
            .map(|doc| Service::new(self.clone(), doc))
            .collect())
    }

    /// Get a unit by name.
    ///
    /// # Errors
    ///
    /// Returns `StateError::InvalidName` for a malformed name, or
    /// `StateError::NotFound` if there is no such unit.
    pub fn unit(&self, name: &str) -> Result<Unit> {
        let name = fleetstate_core::UnitName::new(name)?;
        let doc: Option<UnitDoc> = docs::load(self.store(), Collection::Units, name.as_str())?;
        doc.map(|doc| Unit::new(self.clone(), doc))
            .ok_or_else(|| lifecycle::not_found("unit", name.as_str()))
    }

    /// Allocate the next value of a named sequence, starting at zero.
    pub(crate) fn sequence(&self, name: &str) -> Result<i64> {
        let doc = match self.store.increment(Collection::Sequences, name, field::COUNTER, 1) {
            Ok(doc) => doc,
            Err(StoreError::NotFound) => {
                let mut seed = fleetstate_store::Document::new();
                seed.insert(field::COUNTER.to_string(), Value::from(0));
                // Insert is a no-op if another writer created it first.
                self.store
                    .apply(&[Op::new(Collection::Sequences, name).insert(seed)])?;
                self.store
                    .increment(Collection::Sequences, name, field::COUNTER, 1)?
            }
            Err(e) => return Err(e.into()),
        };
        let next = docs::counter(&doc, Collection::Sequences, name, field::COUNTER)?;
        Ok(next - 1)
    }

    /// Relate one peer endpoint, or two endpoints that can relate.
    ///
    /// A container-scoped endpoint on either side makes the relation
    /// container-scoped on both. Each service must be Alive and its charm
    /// must declare its endpoint; if a charm changes while the relation is
    /// being added, the checks are repeated.
    ///
    /// # Errors
    ///
    /// Returns `StateError::InvalidReference` for endpoints that cannot
    /// relate, `StateError::NotAlive` if a service is not Alive, or
    /// `StateError::AlreadyExists` if the relation exists.
    pub fn add_relation(&self, endpoints: &[Endpoint]) -> Result<Relation> {
        let mut eps = endpoints.to_vec();
        sort_endpoints(&mut eps);
        let key = relation_key(&eps);
        let ctx = || format!("cannot add relation {key:?}");

        match eps.as_slice() {
            [ep] if ep.role != RelationRole::Peer => {
                return Err(StateError::InvalidReference(
                    "single endpoint must be a peer relation".to_string(),
                ))
                .context(ctx);
            }
            [a, b] if !a.can_relate_to(b) => {
                return Err(StateError::InvalidReference(
                    "endpoints do not relate".to_string(),
                ))
                .context(ctx);
            }
            [_] | [_, _] => {}
            _ => {
                return Err(StateError::InvalidReference(format!(
                    "cannot relate {} endpoints",
                    eps.len()
                )))
                .context(ctx);
            }
        }
        if eps.iter().any(|ep| ep.scope == RelationScope::Container) {
            for ep in &mut eps {
                ep.scope = RelationScope::Container;
            }
        }

        let mut rel_id = None;
        self.runner
            .run(|_| {
                if self.store.find_id(Collection::Relations, &key)?.is_some() {
                    return Err(StateError::AlreadyExists(format!("relation {key:?}")));
                }
                let mut ops = Vec::with_capacity(eps.len() + 1);
                for ep in &eps {
                    let svc = self.service(ep.service_name.as_str())?;
                    if svc.life() != Life::Alive {
                        return Err(lifecycle::not_alive("service", ep.service_name.as_str()));
                    }
                    if !svc.endpoints()?.iter().any(|have| have.same_relation(ep)) {
                        return Err(StateError::InvalidReference(format!(
                            "service {:?} does not implement {ep}",
                            ep.service_name.as_str()
                        )));
                    }
                    let (charm_url, _) = svc.charm_url();
                    ops.push(
                        Op::new(Collection::Services, ep.service_name.as_str())
                            .assert(Assert::fields([
                                lifecycle::alive_cond(),
                                Cond::eq(field::CHARM_URL, charm_url.to_string()),
                            ]))
                            .update([Mutation::inc(field::RELATION_COUNT, 1)]),
                    );
                }
                let id = match rel_id {
                    Some(id) => id,
                    None => {
                        let id = self.sequence("relation")?;
                        rel_id = Some(id);
                        id
                    }
                };
                let doc = RelationDoc {
                    key: key.clone(),
                    id,
                    endpoints: eps.clone(),
                    life: Life::Alive,
                    txn_revno: 0,
                };
                ops.push(
                    Op::new(Collection::Relations, key.as_str())
                        .assert(Assert::DocMissing)
                        .insert(docs::encode(&doc)?),
                );
                Ok(Step::Apply(ops))
            })
            .context(ctx)?;
        tracing::info!(relation = %key, "Added relation");
        self.relation(&key)
    }

    /// Get a relation by key.
    ///
    /// # Errors
    ///
    /// Returns `StateError::NotFound` if there is no such relation.
    pub fn relation(&self, key: &str) -> Result<Relation> {
        docs::load(self.store(), Collection::Relations, key)?
            .map(|doc| Relation::new(self.clone(), doc))
            .ok_or_else(|| lifecycle::not_found("relation", key))
    }

    /// Get the relation between `endpoints`.
    ///
    /// # Errors
    ///
    /// Returns `StateError::NotFound` if there is no such relation.
    pub fn relation_for(&self, endpoints: &[Endpoint]) -> Result<Relation> {
        self.relation(&relation_key(endpoints))
    }

    /// Remove a Dead relation, releasing it from each of its services.
    ///
    /// If another writer removed the relation concurrently, this succeeds.
    ///
    /// # Errors
    ///
    /// Returns `StateError::NotDead` if the relation is not Dead, or
    /// `StateError::InconsistentState` if it survived an aborted removal.
    pub fn remove_relation(&self, relation: &Relation) -> Result<()> {
        let key = relation.key();
        let ctx = || format!("cannot remove relation {key:?}");
        if relation.life() != Life::Dead {
            return Err(StateError::NotDead {
                kind: "relation",
                name: key.to_string(),
            })
            .context(ctx);
        }
        let mut services: Vec<&ServiceName> =
            relation.endpoints().iter().map(|ep| &ep.service_name).collect();
        services.dedup();
        let mut ops = vec![Op::new(Collection::Relations, key)
            .assert(lifecycle::is_dead())
            .remove()];
        ops.extend(services.into_iter().map(|svc| {
            Op::new(Collection::Services, svc.as_str())
                .assert(Assert::fields([Cond::gt(field::RELATION_COUNT, 0)]))
                .update([Mutation::inc(field::RELATION_COUNT, -1)])
        }));
        match self.runner.apply(&ops) {
            Ok(()) => {
                tracing::info!(relation = %key, "Removed relation");
                Ok(())
            }
            Err(StoreError::Aborted) => {
                if self.store.find_id(Collection::Relations, key)?.is_some() {
                    return Err(StateError::InconsistentState(
                        "relation remains after aborted removal".to_string(),
                    ))
                    .context(ctx);
                }
                tracing::warn!(relation = %key, "Relation already removed");
                Ok(())
            }
            Err(e) => Err(StateError::from(e)).context(ctx),
        }
    }

    /// Remove a Dead service and its settings.
    ///
    /// # Errors
    ///
    /// Returns `StateError::NotDead` if the service is not Dead, or
    /// `StateError::InconsistentState` if it survived an aborted removal.
    pub fn remove_service(&self, service: &Service) -> Result<()> {
        let name = service.name().as_str();
        let ctx = || format!("cannot remove service {name:?}");
        if service.life() != Life::Dead {
            return Err(StateError::NotDead {
                kind: "service",
                name: name.to_string(),
            })
            .context(ctx);
        }
        let ops = [
            Op::new(Collection::Services, name)
                .assert(Assert::fields([
                    Cond::eq(field::LIFE, Life::Dead.as_str()),
                    Cond::eq(field::UNIT_COUNT, 0),
                    Cond::eq(field::RELATION_COUNT, 0),
                ]))
                .remove(),
            settings::remove_settings_op(&service.global_key()),
        ];
        match self.runner.apply(&ops) {
            Ok(()) => {
                tracing::info!(service = name, "Removed service");
                Ok(())
            }
            Err(StoreError::Aborted) => {
                if self.store.find_id(Collection::Services, name)?.is_some() {
                    return Err(StateError::InconsistentState(
                        "service remains after aborted removal".to_string(),
                    ))
                    .context(ctx);
                }
                tracing::warn!(service = name, "Service already removed");
                Ok(())
            }
            Err(e) => Err(StateError::from(e)).context(ctx),
        }
    }
}
