//! Units: running instances of a service.

use std::fmt;

use chrono::Utc;
use fleetstate_core::{Life, ServiceName, UnitName};
use fleetstate_store::{Assert, Collection, Cond, Mutation, Op, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::docs::{self, field, UnitDoc};
use crate::error::{Result, ResultExt, StateError};
use crate::lifecycle;
use crate::state::State;

/// Status a unit's agent reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// Not yet installed.
    #[default]
    Pending,
    /// Installed but not started.
    Installed,
    /// Running.
    Started,
    /// Deliberately stopped.
    Stopped,
    /// A hook failed.
    Error,
    /// The agent stopped reporting.
    Down,
}

impl UnitStatus {
    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Installed => "installed",
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Error => "error",
            Self::Down => "down",
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of a service.
#[derive(Clone)]
pub struct Unit {
    st: State,
    doc: UnitDoc,
}

impl fmt::Debug for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unit").field("doc", &self.doc).finish()
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.doc.name, f)
    }
}

impl Unit {
    pub(crate) const fn new(st: State, doc: UnitDoc) -> Self {
        Self { st, doc }
    }

    /// The unit name.
    #[must_use]
    pub const fn name(&self) -> &UnitName {
        &self.doc.name
    }

    /// The owning service's name.
    #[must_use]
    pub const fn service_name(&self) -> &ServiceName {
        &self.doc.service
    }

    /// Cached lifecycle state.
    #[must_use]
    pub const fn life(&self) -> Life {
        self.doc.life
    }

    /// Cached status and its detail text.
    #[must_use]
    pub fn status(&self) -> (UnitStatus, &str) {
        (self.doc.status, &self.doc.status_info)
    }

    /// Returns true unless this unit is a subordinate.
    #[must_use]
    pub const fn is_principal(&self) -> bool {
        self.doc.principal.is_none()
    }

    /// The principal unit, for a subordinate.
    #[must_use]
    pub const fn principal_name(&self) -> Option<&UnitName> {
        self.doc.principal.as_ref()
    }

    /// Subordinate units attached to this unit.
    #[must_use]
    pub fn subordinate_names(&self) -> &[UnitName] {
        &self.doc.subordinates
    }

    /// The machine this unit is assigned to, if any.
    #[must_use]
    pub fn assigned_machine_id(&self) -> Option<&str> {
        self.doc.machine_id.as_deref()
    }

    /// Reload the unit from the store.
    ///
    /// # Errors
    ///
    /// Returns `StateError::NotFound` if the unit has been removed.
    pub fn refresh(&mut self) -> Result<()> {
        let name = self.doc.name.as_str();
        let doc: UnitDoc = docs::load(self.st.store(), Collection::Units, name)?
            .ok_or_else(|| lifecycle::not_found("unit", name))?;
        lifecycle::check_forward("unit", name, self.doc.life, doc.life)?;
        self.doc = doc;
        Ok(())
    }

    /// Record a new status for the unit.
    ///
    /// # Errors
    ///
    /// Returns `StateError::NotAlive` if the unit is Dead, or
    /// `StateError::NotFound` if it has been removed.
    pub fn set_status(&mut self, status: UnitStatus, info: &str) -> Result<()> {
        let since = Utc::now();
        let op = Op::new(Collection::Units, self.doc.name.as_str())
            .assert(Assert::fields([lifecycle::not_dead_cond()]))
            .update([
                Mutation::set(field::STATUS, status.as_str()),
                Mutation::set(field::STATUS_INFO, info),
                Mutation::set(field::STATUS_SINCE, since.to_rfc3339()),
            ]);
        let name = self.doc.name.as_str();
        match self.st.runner().apply(&[op]) {
            Ok(()) => {}
            Err(StoreError::Aborted) => {
                let err = match lifecycle::life_of(self.st.store(), Collection::Units, name)? {
                    None => lifecycle::not_found("unit", name),
                    Some(_) => lifecycle::not_alive("unit", name),
                };
                return Err(err.context(format!("cannot set status of unit {name:?}")));
            }
            Err(e) => return Err(e.into()),
        }
        tracing::debug!(unit = %self.doc.name, status = %status, "Set unit status");
        self.doc.status = status;
        self.doc.status_info = info.to_string();
        self.doc.status_since = Some(since);
        Ok(())
    }

    /// Assign the unit to a machine.
    ///
    /// Succeeds without change if the unit is already on that machine.
    ///
    /// # Errors
    ///
    /// Returns `StateError::NotAlive` if the unit is not Alive, or
    /// `StateError::InvalidReference` if it is on a different machine.
    pub fn assign_to_machine(&mut self, machine_id: &str) -> Result<()> {
        let unit_name = self.doc.name.to_string();
        let ctx = || format!("cannot assign unit {unit_name:?} to machine {machine_id:?}");
        if machine_id.is_empty() {
            return Err(StateError::InvalidReference("empty machine id".to_string()))
                .context(ctx);
        }
        let current = match self.doc.machine_id.as_deref() {
            Some(id) if id == machine_id => return Ok(()),
            Some(id) => Value::from(id),
            None => Value::Null,
        };
        let op = Op::new(Collection::Units, self.doc.name.as_str())
            .assert(Assert::fields([
                lifecycle::alive_cond(),
                Cond::Eq(field::MACHINE_ID.to_string(), current),
            ]))
            .update([Mutation::set(field::MACHINE_ID, machine_id)]);
        match self.st.runner().apply(&[op]) {
            Ok(()) => {
                tracing::info!(unit = %self.doc.name, machine_id, "Assigned unit to machine");
                self.doc.machine_id = Some(machine_id.to_string());
                Ok(())
            }
            Err(StoreError::Aborted) => {
                self.refresh().context(ctx)?;
                match self.doc.machine_id.as_deref() {
                    _ if self.doc.life != Life::Alive => {
                        Err(lifecycle::not_alive("unit", &unit_name)).context(ctx)
                    }
                    Some(id) if id == machine_id => Ok(()),
                    Some(id) => Err(StateError::InvalidReference(format!(
                        "unit is already assigned to machine {id:?}"
                    )))
                    .context(ctx),
                    None => Err(StateError::InconsistentState(
                        "assignment aborted without cause".to_string(),
                    ))
                    .context(ctx),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the unit's machine assignment.
    ///
    /// # Errors
    ///
    /// Returns `StateError::NotFound` if the unit has been removed.
    pub fn unassign_from_machine(&mut self) -> Result<()> {
        let op = Op::new(Collection::Units, self.doc.name.as_str())
            .assert(Assert::DocExists)
            .update([Mutation::set(field::MACHINE_ID, Value::Null)]);
        self.st
            .runner()
            .apply(&[op])
            .map_err(|e| {
                crate::error::on_abort(e, lifecycle::not_found("unit", self.doc.name.as_str()))
            })
            .context(|| format!("cannot unassign unit {:?} from machine", self.doc.name.as_str()))?;
        tracing::info!(unit = %self.doc.name, "Unassigned unit from machine");
        self.doc.machine_id = None;
        Ok(())
    }

    /// Move the unit to Dying if it is Alive. Does nothing otherwise.
    ///
    /// # Errors
    ///
    /// Returns `StateError::NotFound` if the unit has been removed.
    pub fn ensure_dying(&mut self) -> Result<()> {
        self.doc.life = lifecycle::ensure_dying(
            self.st.runner(),
            self.st.store(),
            Collection::Units,
            self.doc.name.as_str(),
            "unit",
            self.doc.life,
        )
        .context(|| format!("cannot destroy unit {:?}", self.doc.name.as_str()))?;
        Ok(())
    }

    /// Move the unit to Dead if it is Alive or Dying.
    ///
    /// # Errors
    ///
    /// Returns `StateError::HasDependents` while subordinate units remain.
    pub fn ensure_dead(&mut self) -> Result<()> {
        if self.doc.life == Life::Dead {
            return Ok(());
        }
        lifecycle::ensure_dead(
            self.st.runner(),
            self.st.store(),
            Collection::Units,
            self.doc.name.as_str(),
            "unit",
            vec![Cond::eq(field::SUBORDINATES, json!([]))],
            "still has subordinate units",
        )
        .context(|| format!("cannot finish unit {:?}", self.doc.name.as_str()))?;
        self.doc.life = Life::Dead;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::NewUnit;
    use crate::testing::Fixture;

    #[test]
    fn status_round_trip() {
        let fx = Fixture::new();
        let wordpress = fx.wordpress();
        let mut unit = wordpress.add_unit(NewUnit::Principal).unwrap();
        assert_eq!(unit.status(), (UnitStatus::Pending, ""));

        unit.set_status(UnitStatus::Error, "hook failed: install").unwrap();
        assert_eq!(unit.status(), (UnitStatus::Error, "hook failed: install"));

        let reread = fx.state.unit("wordpress/0").unwrap();
        assert_eq!(reread.status(), (UnitStatus::Error, "hook failed: install"));
        assert!(reread.doc.status_since.is_some());
    }

    #[test]
    fn dead_unit_rejects_status() {
        let fx = Fixture::new();
        let mut unit = fx.wordpress().add_unit(NewUnit::Principal).unwrap();
        unit.ensure_dead().unwrap();
        let err = unit.set_status(UnitStatus::Started, "").unwrap_err();
        assert!(err.is_not_alive());
    }

    #[test]
    fn machine_assignment() {
        let fx = Fixture::new();
        let wordpress = fx.wordpress();
        let mut unit = wordpress.add_unit(NewUnit::Principal).unwrap();
        assert_eq!(unit.assigned_machine_id(), None);

        unit.assign_to_machine("0").unwrap();
        assert_eq!(unit.assigned_machine_id(), Some("0"));
        unit.assign_to_machine("0").unwrap();

        // A stale copy that believes the unit unassigned.
        let mut stale = wordpress.unit("wordpress/0").unwrap();
        stale.unassign_from_machine().unwrap();
        stale.assign_to_machine("3").unwrap();

        let err = unit.assign_to_machine("1").unwrap_err();
        assert!(matches!(err.cause(), StateError::InvalidReference(_)));

        unit.refresh().unwrap();
        assert_eq!(unit.assigned_machine_id(), Some("3"));
    }

    #[test]
    fn dying_unit_cannot_be_assigned() {
        let fx = Fixture::new();
        let mut unit = fx.wordpress().add_unit(NewUnit::Principal).unwrap();
        unit.ensure_dying().unwrap();
        let err = unit.assign_to_machine("0").unwrap_err();
        assert!(err.is_not_alive());
    }

    #[test]
    fn lifecycle_is_idempotent() {
        let fx = Fixture::new();
        let mut unit = fx.wordpress().add_unit(NewUnit::Principal).unwrap();

        unit.ensure_dying().unwrap();
        unit.ensure_dying().unwrap();
        assert_eq!(unit.life(), Life::Dying);

        unit.ensure_dead().unwrap();
        unit.ensure_dead().unwrap();
        unit.ensure_dying().unwrap();
        assert_eq!(unit.life(), Life::Dead);

        unit.refresh().unwrap();
        assert_eq!(unit.life(), Life::Dead);
    }

    #[test]
    fn principal_with_subordinates_cannot_die() {
        let fx = Fixture::new();
        let mut principal = fx.wordpress().add_unit(NewUnit::Principal).unwrap();
        let logging = fx.logging();
        let sub = logging
            .add_unit(NewUnit::Subordinate {
                principal: &principal,
                strict: true,
            })
            .unwrap();
        assert!(!sub.is_principal());
        assert_eq!(sub.principal_name(), Some(principal.name()));

        let err = principal.ensure_dead().unwrap_err();
        assert!(err.is_has_dependents());

        principal.refresh().unwrap();
        assert_eq!(principal.subordinate_names(), [sub.name().clone()]);
    }
}
